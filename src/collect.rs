//! Dirty widget tracking and depth-ordered change collection.

use crate::{
	dom::DomChange,
	error::CollectionError,
	widget::{DirtyNotice, RenderFlags, WidgetId, WidgetTree},
};
use hashbrown::HashSet;
use std::collections::BTreeMap;
use tracing::{error, instrument, trace, trace_span};

/// Widgets awaiting synchronisation.
///
/// Insertion is idempotent. Whether any insertion asked for an immediate update is tracked separately.
#[derive(Debug, Default)]
pub struct DirtySet {
	widgets: HashSet<WidgetId>,
	more_updates: bool,
}

impl DirtySet {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn need_update(&mut self, id: WidgetId, later_only: bool) {
		self.widgets.insert(id);
		if !later_only {
			self.more_updates = true;
		}
	}

	pub fn done_update(&mut self, id: WidgetId) {
		self.widgets.remove(&id);
	}

	#[must_use]
	pub fn contains(&self, id: WidgetId) -> bool {
		self.widgets.contains(&id)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.widgets.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.widgets.is_empty()
	}

	/// Whether an immediate update was requested since the flag was last reset.
	#[must_use]
	pub fn more_updates(&self) -> bool {
		self.more_updates
	}

	pub fn clear(&mut self) {
		self.widgets.clear();
		self.more_updates = false;
	}

	/// Applies all queued dirty notifications of `tree`.
	pub fn absorb(&mut self, tree: &mut WidgetTree) {
		for notice in tree.drain_notices() {
			match notice {
				DirtyNotice::NeedUpdate { id, later_only } => {
					trace!("needUpdate: {:?}", id);
					self.widgets.insert(id);
					if !later_only {
						self.more_updates = true;
					}
				}
				DirtyNotice::Done { id } => {
					trace!("doneUpdate: {:?}", id);
					self.widgets.remove(&id);
				}
			}
		}
	}

	fn snapshot(&self) -> Vec<WidgetId> {
		self.widgets.iter().copied().collect()
	}
}

/// How a collection run treats widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
	/// Repeats passes until no more widgets become dirty.
	/// With `visible_only`, widgets that aren't currently visible on the client stay dirty for a later batch.
	Full { visible_only: bool },
	/// Exactly one pass over every dirty widget, visible or not.
	Learning,
}

/// Turns the dirty set into an ordered list of [`DomChange`]s.
#[derive(Debug, Clone)]
pub struct ChangeCollector {
	pass_limit: usize,
}

impl Default for ChangeCollector {
	fn default() -> Self {
		Self { pass_limit: 64 }
	}
}

impl ChangeCollector {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Caps the number of repeated passes of a [`CollectMode::Full`] run.
	///
	/// Only a widget that keeps dirtying itself reaches the limit.
	#[must_use]
	pub fn with_pass_limit(pass_limit: usize) -> Self {
		Self { pass_limit }
	}

	/// Collects the changes of all dirty widgets below `roots`, ancestors before descendants.
	///
	/// Dirty widgets not rooted in `roots` (removed from the tree) are cleaned without emitting anything.
	///
	/// # Errors
	///
	/// The first widget failure ends the run. That widget and all widgets not visited yet stay dirty.
	#[instrument(skip(self, dirty, tree, flags))]
	pub fn collect(
		&self,
		dirty: &mut DirtySet,
		tree: &mut WidgetTree,
		roots: &[WidgetId],
		mode: CollectMode,
		flags: &mut RenderFlags,
	) -> Result<Vec<DomChange>, CollectionError> {
		let mut changes = Vec::new();
		let visible_only = matches!(mode, CollectMode::Full { visible_only: true });
		let mut passes = 0;

		dirty.absorb(tree);
		loop {
			dirty.more_updates = false;
			passes += 1;

			let mut depth_order = BTreeMap::<usize, Vec<WidgetId>>::new();
			for id in dirty.snapshot() {
				let depth = match tree.root_and_depth(id) {
					Some((root, depth)) if roots.contains(&root) => depth,
					Some((root, _)) => {
						trace!("ignoring: {:?} (detached below {:?})", id, root);
						0
					}
					None => {
						trace!("ignoring: {:?} (removed)", id);
						0
					}
				};
				depth_order.entry(depth).or_default().push(id);
			}

			for (depth, mut ids) in depth_order {
				ids.sort();
				for id in ids {
					dirty.absorb(tree);
					if !dirty.contains(id) {
						continue;
					}

					if depth == 0 {
						dirty.done_update(id);
						continue;
					}

					let span = trace_span!("Collecting widget", ?id, depth);
					let _enter = span.enter();

					if visible_only && !Self::is_on_screen(tree, id) {
						trace!("Ignoring invisible widget {:?}.", id);
						continue;
					}

					trace!("updating: {:?}", id);
					dirty.done_update(id);
					Self::collect_widget(tree, id, flags, &mut changes).map_err(|error| {
						dirty.need_update(id, true);
						error
					})?;
					dirty.absorb(tree);
				}
			}

			if matches!(mode, CollectMode::Learning) || !dirty.more_updates {
				break;
			}
			if passes >= self.pass_limit {
				error!("Pass limit ({}) reached while collecting changes. {} widget(s) stay dirty.", self.pass_limit, dirty.len());
				break;
			}
		}

		Ok(changes)
	}

	/// Rendered on the client, and only hidden (if at all) by its own flag, which it must still be able to update.
	fn is_on_screen(tree: &WidgetTree, id: WidgetId) -> bool {
		let parent = match tree.parent(id) {
			Some(parent) => parent,
			None => return tree.is_rendered_flag(id),
		};
		if !tree.is_visible(parent) {
			return false;
		}
		tree.is_rendered_flag(id) || tree.is_rendered(parent)
	}

	fn collect_widget(tree: &mut WidgetTree, id: WidgetId, flags: &mut RenderFlags, changes: &mut Vec<DomChange>) -> Result<(), CollectionError> {
		for removed in tree.take_removed_children(id) {
			changes.push(DomChange::delete(removed));
		}

		if tree.is_rendered_flag(id) {
			let mut widget_changes = Vec::new();
			if let Some(result) = tree.with_widget(id, flags, |widget, cx| widget.compute_dom_changes(cx, &mut widget_changes)) {
				result?;
			}
			changes.extend(widget_changes.into_iter().filter(|change| !change.is_noop()));
			return Ok(());
		}

		let parent = match tree.parent(id) {
			Some(parent) if tree.is_rendered(parent) => parent,
			Some(parent) => {
				trace!("Parent {:?} isn't rendered yet and will render {:?} itself.", parent, id);
				return Ok(());
			}
			None => {
				trace!("Root {:?} is rendered by its page.", id);
				return Ok(());
			}
		};

		let position = tree.children(parent).iter().take_while(|&&sibling| sibling != id).filter(|&&sibling| tree.is_rendered_flag(sibling)).count();
		let parent_dom_id = tree.dom_id(parent).map(str::to_owned).unwrap_or_default();
		let element = tree.create_element(id, flags)?;
		changes.push(DomChange::create(parent_dom_id, Some(position), element));
		Ok(())
	}
}
