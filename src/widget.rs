//! The widget collaborator interface and the arena that owns widget trees.
//!
//! Widgets never hold references to each other. They are addressed through generational [`WidgetId`]s,
//! which go stale (rather than dangle) once the widget is removed from its [`WidgetTree`].

use crate::{
	dom::{DomChange, DomElement},
	error::CollectionError,
};
use core::{
	any::{type_name, Any},
	convert::TryFrom,
};
use tracing::{error, trace};

/// Generational handle into a [`WidgetTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId {
	index: u32,
	generation: u32,
}

/// A node of server-side UI state.
///
/// The renderer only needs these capabilities. Everything else about a widget is its own business.
pub trait Widget: Send + 'static {
	/// Name used in log output.
	fn kind(&self) -> &'static str {
		type_name::<Self>()
	}

	fn is_hidden(&self) -> bool {
		false
	}

	/// Containers are candidates for the acknowledgement puzzle.
	fn is_container(&self) -> bool {
		false
	}

	/// Widgets whose client-side value is posted back with each request.
	fn is_form_object(&self) -> bool {
		false
	}

	/// Receives the value the client posted for this form object.
	fn set_form_data(&mut self, _value: &str) {}

	/// Builds the complete DOM subtree of this widget.
	///
	/// Children must be rendered through [`RenderContext::create_child_element`] so that the tree can track them.
	///
	/// # Errors
	///
	/// Aborts the current response.
	fn create_element(&mut self, cx: &mut RenderContext<'_>) -> Result<DomElement, CollectionError>;

	/// Appends the changes needed to bring the client DOM in line with the current state,
	/// then considers itself synchronised.
	///
	/// # Errors
	///
	/// Aborts the current response. The widget is not retried.
	fn compute_dom_changes(&mut self, cx: &mut RenderContext<'_>, changes: &mut Vec<DomChange>) -> Result<(), CollectionError>;

	fn as_any(&self) -> &dyn Any;
	fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Dirty notifications, drained by the renderer at each collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyNotice {
	/// The widget changed. `later_only` changes may wait for a follow-up pass.
	NeedUpdate { id: WidgetId, later_only: bool },
	/// The widget was synchronised as part of another widget.
	Done { id: WidgetId },
}

/// Flags of the collection run a [`RenderContext`] belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderFlags {
	pub pre_learning: bool,
	/// Set by widgets whose effect cannot be replayed client-side.
	pub learning_incomplete: bool,
}

struct Node {
	/// Taken out while the widget itself is being rendered.
	widget: Option<Box<dyn Widget>>,
	parent: Option<WidgetId>,
	children: Vec<WidgetId>,
	dom_id: String,
	rendered: bool,
	removed_children: Vec<String>,
}

struct Slot {
	generation: u32,
	node: Option<Node>,
}

#[derive(Default)]
pub struct WidgetTree {
	slots: Vec<Slot>,
	free: Vec<u32>,
	serial: u64,
	notices: Vec<DirtyNotice>,
}

impl core::fmt::Debug for WidgetTree {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("WidgetTree")
			.field("len", &self.len())
			.field("pending_notices", &self.notices.len())
			.finish()
	}
}

impl WidgetTree {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.slots.iter().filter(|slot| slot.node.is_some()).count()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn node(&self, id: WidgetId) -> Option<&Node> {
		self.slots
			.get(id.index as usize)
			.filter(|slot| slot.generation == id.generation)
			.and_then(|slot| slot.node.as_ref())
	}

	fn node_mut(&mut self, id: WidgetId) -> Option<&mut Node> {
		self.slots
			.get_mut(id.index as usize)
			.filter(|slot| slot.generation == id.generation)
			.and_then(|slot| slot.node.as_mut())
	}

	/// Adds `widget` below `parent` (appended), or as a new root.
	///
	/// The new widget is marked dirty, so that its first render is picked up by the next collection.
	///
	/// # Panics
	///
	/// Iff `parent` is stale. That's a bug in the calling code.
	pub fn insert(&mut self, parent: Option<WidgetId>, widget: impl Widget) -> WidgetId {
		self.insert_boxed(parent, Box::new(widget))
	}

	pub fn insert_boxed(&mut self, parent: Option<WidgetId>, widget: Box<dyn Widget>) -> WidgetId {
		if let Some(parent) = parent {
			assert!(self.contains(parent), "Tried to insert a widget below stale parent {:?}", parent);
		}

		self.serial += 1;
		let node = Node {
			widget: Some(widget),
			parent,
			children: Vec::new(),
			dom_id: format!("o{:x}", self.serial),
			rendered: false,
			removed_children: Vec::new(),
		};

		let id = match self.free.pop() {
			Some(index) => {
				let slot = &mut self.slots[index as usize];
				slot.node = Some(node);
				WidgetId {
					index,
					generation: slot.generation,
				}
			}
			None => {
				let index = u32::try_from(self.slots.len()).expect("Too many widgets");
				self.slots.push(Slot { generation: 0, node: Some(node) });
				WidgetId { index, generation: 0 }
			}
		};

		if let Some(parent) = parent {
			if let Some(parent) = self.node_mut(parent) {
				parent.children.push(id);
			}
		}
		self.mark_dirty(id, false);
		trace!("Inserted widget {:?} ({:?}) below {:?}.", id, self.dom_id(id), parent);
		id
	}

	/// Removes `id` and its descendants. Returns the removed handles, deepest last.
	///
	/// If the widget was rendered below a rendered parent, the parent is marked dirty and removes the client node
	/// during its next update.
	pub fn remove(&mut self, id: WidgetId) -> Vec<WidgetId> {
		let (parent, dom_id, rendered) = match self.node(id) {
			Some(node) => (node.parent, node.dom_id.clone(), node.rendered),
			None => {
				trace!("Ignoring removal of stale widget {:?}.", id);
				return Vec::new();
			}
		};

		if let Some(parent) = parent {
			let parent_rendered = self.is_rendered(parent);
			if let Some(parent_node) = self.node_mut(parent) {
				parent_node.children.retain(|&child| child != id);
				if rendered && parent_rendered {
					parent_node.removed_children.push(dom_id);
				}
			}
			if rendered && parent_rendered {
				self.mark_dirty(parent, false);
			}
		}

		let mut removed = vec![id];
		let mut i = 0;
		while i < removed.len() {
			if let Some(node) = self.node(removed[i]) {
				removed.extend(node.children.iter().copied());
			}
			i += 1;
		}
		for &removed_id in &removed {
			let slot = &mut self.slots[removed_id.index as usize];
			slot.node = None;
			slot.generation = slot.generation.wrapping_add(1);
			self.free.push(removed_id.index);
		}
		removed
	}

	#[must_use]
	pub fn contains(&self, id: WidgetId) -> bool {
		self.node(id).is_some()
	}

	#[must_use]
	pub fn get<W: Widget>(&self, id: WidgetId) -> Option<&W> {
		self.node(id)?.widget.as_ref()?.as_any().downcast_ref()
	}

	/// Mutates a widget without marking it dirty.
	pub fn get_mut<W: Widget>(&mut self, id: WidgetId) -> Option<&mut W> {
		self.node_mut(id)?.widget.as_mut()?.as_any_mut().downcast_mut()
	}

	/// Mutates a widget and marks it dirty for the next response.
	pub fn update<W: Widget, R>(&mut self, id: WidgetId, f: impl FnOnce(&mut W) -> R) -> Option<R> {
		let result = f(self.get_mut::<W>(id)?);
		self.mark_dirty(id, false);
		Some(result)
	}

	/// Queues a dirty notification. Duplicates are fine.
	pub fn mark_dirty(&mut self, id: WidgetId, later_only: bool) {
		self.notices.push(DirtyNotice::NeedUpdate { id, later_only });
	}

	pub fn drain_notices(&mut self) -> std::vec::Drain<'_, DirtyNotice> {
		self.notices.drain(..)
	}

	#[must_use]
	pub fn has_notices(&self) -> bool {
		!self.notices.is_empty()
	}

	#[must_use]
	pub fn parent(&self, id: WidgetId) -> Option<WidgetId> {
		self.node(id)?.parent
	}

	#[must_use]
	pub fn children(&self, id: WidgetId) -> &[WidgetId] {
		self.node(id).map_or(&[], |node| &node.children)
	}

	#[must_use]
	pub fn dom_id(&self, id: WidgetId) -> Option<&str> {
		self.node(id).map(|node| node.dom_id.as_str())
	}

	#[must_use]
	pub fn find_by_dom_id(&self, dom_id: &str) -> Option<WidgetId> {
		self.slots.iter().enumerate().find_map(|(index, slot)| match &slot.node {
			Some(node) if node.dom_id == dom_id => Some(WidgetId {
				index: index as u32,
				generation: slot.generation,
			}),
			_ => None,
		})
	}

	/// The root of `id`'s tree and the number of nodes on the path to it, counting both ends.
	#[must_use]
	pub fn root_and_depth(&self, id: WidgetId) -> Option<(WidgetId, usize)> {
		let mut current = id;
		let mut depth = 1;
		self.node(id)?;
		while let Some(parent) = self.parent(current) {
			current = parent;
			depth += 1;
		}
		Some((current, depth))
	}

	/// Whether the widget and all of its ancestors exist in the client DOM.
	#[must_use]
	pub fn is_rendered(&self, id: WidgetId) -> bool {
		let mut current = Some(id);
		while let Some(id) = current {
			match self.node(id) {
				Some(node) if node.rendered => current = node.parent,
				_ => return false,
			}
		}
		true
	}

	/// The widget's own rendered flag, regardless of its ancestors.
	#[must_use]
	pub fn is_rendered_flag(&self, id: WidgetId) -> bool {
		self.node(id).map_or(false, |node| node.rendered)
	}

	#[must_use]
	pub fn is_hidden(&self, id: WidgetId) -> bool {
		self.widget(id).map_or(false, |widget| widget.is_hidden())
	}

	/// Rendered, and neither the widget nor any ancestor is hidden.
	#[must_use]
	pub fn is_visible(&self, id: WidgetId) -> bool {
		if !self.is_rendered(id) {
			return false;
		}
		let mut current = Some(id);
		while let Some(id) = current {
			if self.is_hidden(id) {
				return false;
			}
			current = self.parent(id);
		}
		true
	}

	#[must_use]
	pub fn widget(&self, id: WidgetId) -> Option<&dyn Widget> {
		self.node(id)?.widget.as_deref()
	}

	/// Mutates a widget through its dynamic interface without marking it dirty.
	pub fn widget_mut(&mut self, id: WidgetId) -> Option<&mut (dyn Widget + 'static)> {
		self.node_mut(id)?.widget.as_deref_mut()
	}

	/// Forgets the rendered state of a whole subtree, e.g. before a full page render.
	pub fn reset_rendered(&mut self, id: WidgetId) {
		let mut stack = vec![id];
		while let Some(id) = stack.pop() {
			if let Some(node) = self.node_mut(id) {
				node.rendered = false;
				node.removed_children.clear();
				stack.extend(node.children.iter().copied());
			}
		}
	}

	pub(crate) fn take_removed_children(&mut self, id: WidgetId) -> Vec<String> {
		self.node_mut(id).map(|node| core::mem::take(&mut node.removed_children)).unwrap_or_default()
	}

	/// Position of `id` among its parent's children.
	#[must_use]
	pub fn position(&self, id: WidgetId) -> Option<usize> {
		let parent = self.parent(id)?;
		self.children(parent).iter().position(|&child| child == id)
	}

	/// Lends the widget out of its slot for the duration of `f`, so that `f` may also access the rest of the tree.
	///
	/// Returns `None` if `id` is stale or the widget is already lent out (re-entrant rendering).
	pub(crate) fn with_widget<R>(
		&mut self,
		id: WidgetId,
		flags: &mut RenderFlags,
		f: impl FnOnce(&mut dyn Widget, &mut RenderContext<'_>) -> R,
	) -> Option<R> {
		let mut widget = match self.node_mut(id)?.widget.take() {
			Some(widget) => widget,
			None => {
				error!("Widget {:?} is already being rendered. Skipping re-entrant render.", id);
				return None;
			}
		};

		let result = {
			let mut cx = RenderContext { tree: self, id, flags };
			f(&mut *widget, &mut cx)
		};

		match self.node_mut(id) {
			Some(node) => node.widget = Some(widget),
			None => trace!("Widget {:?} was removed while it was being rendered.", id),
		}
		Some(result)
	}

	/// Renders the complete subtree of `id` and marks it as rendered and clean.
	///
	/// # Errors
	///
	/// Propagates the first widget failure.
	pub fn create_element(&mut self, id: WidgetId, flags: &mut RenderFlags) -> Result<DomElement, CollectionError> {
		let dom_id = self
			.dom_id(id)
			.map(str::to_owned)
			.ok_or_else(|| CollectionError::new(format!("{:?}", id), "stale widget handle"))?;
		let element = self
			.with_widget(id, flags, |widget, cx| widget.create_element(cx))
			.unwrap_or_else(|| Err(CollectionError::new(dom_id.clone(), "widget is unavailable")))?;

		if cfg!(debug_assertions) && element.id != dom_id {
			panic!("Widget {} created an element with mismatching id {:?}", dom_id, element.id);
		}

		if let Some(node) = self.node_mut(id) {
			node.rendered = true;
			node.removed_children.clear();
		}
		self.notices.push(DirtyNotice::Done { id });
		Ok(element)
	}
}

/// What a widget may touch while it renders.
pub struct RenderContext<'a> {
	tree: &'a mut WidgetTree,
	id: WidgetId,
	flags: &'a mut RenderFlags,
}

impl<'a> RenderContext<'a> {
	#[must_use]
	pub fn id(&self) -> WidgetId {
		self.id
	}

	/// The DOM id of the widget being rendered.
	#[must_use]
	pub fn dom_id(&self) -> String {
		self.tree.dom_id(self.id).map(str::to_owned).unwrap_or_default()
	}

	#[must_use]
	pub fn children(&self) -> Vec<WidgetId> {
		self.tree.children(self.id).to_vec()
	}

	#[must_use]
	pub fn tree(&self) -> &WidgetTree {
		self.tree
	}

	/// Renders a child's subtree, typically as part of [`Widget::create_element`].
	///
	/// # Errors
	///
	/// Propagates the child's failure.
	pub fn create_child_element(&mut self, child: WidgetId) -> Result<DomElement, CollectionError> {
		debug_assert_eq!(self.tree.parent(child), Some(self.id), "Not a child of the rendering widget");
		self.tree.create_element(child, self.flags)
	}

	/// Marks another widget (e.g. a child affected by this update) dirty.
	pub fn mark_dirty(&mut self, id: WidgetId, later_only: bool) {
		self.tree.mark_dirty(id, later_only);
	}

	#[must_use]
	pub fn is_pre_learning(&self) -> bool {
		self.flags.pre_learning
	}

	/// Signals that the current effect cannot be captured as client-side JavaScript.
	pub fn learning_incomplete(&mut self) {
		self.flags.learning_incomplete = true;
	}
}
