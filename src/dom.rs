//! DOM construction trees and the change records that patch an existing client DOM.

use std::collections::BTreeMap;

/// DOM properties the renderer knows how to assign both in HTML and through JavaScript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Property {
	InnerHtml,
	Value,
	Checked,
	Disabled,
	ReadOnly,
	ClassName,
	Title,
	Src,
	StyleDisplay,
	StyleVisibility,
	StyleWidth,
	StyleHeight,
	StyleColor,
	StyleBackgroundColor,
}

impl Property {
	/// The CSS property name, for style properties.
	#[must_use]
	pub fn style_name(self) -> Option<&'static str> {
		Some(match self {
			Self::StyleDisplay => "display",
			Self::StyleVisibility => "visibility",
			Self::StyleWidth => "width",
			Self::StyleHeight => "height",
			Self::StyleColor => "color",
			Self::StyleBackgroundColor => "background-color",
			_ => return None,
		})
	}

	/// The JavaScript property path below an element reference.
	#[must_use]
	pub fn js_name(self) -> &'static str {
		match self {
			Self::InnerHtml => "innerHTML",
			Self::Value => "value",
			Self::Checked => "checked",
			Self::Disabled => "disabled",
			Self::ReadOnly => "readOnly",
			Self::ClassName => "className",
			Self::Title => "title",
			Self::Src => "src",
			Self::StyleDisplay => "style.display",
			Self::StyleVisibility => "style.visibility",
			Self::StyleWidth => "style.width",
			Self::StyleHeight => "style.height",
			Self::StyleColor => "style.color",
			Self::StyleBackgroundColor => "style.backgroundColor",
		}
	}

	/// The HTML attribute carrying this property, if it isn't content or style.
	#[must_use]
	pub fn attribute_name(self) -> Option<&'static str> {
		Some(match self {
			Self::Value => "value",
			Self::Checked => "checked",
			Self::Disabled => "disabled",
			Self::ReadOnly => "readonly",
			Self::ClassName => "class",
			Self::Title => "title",
			Self::Src => "src",
			_ => return None,
		})
	}

	/// Boolean properties are written as presence-only attributes and as unquoted JavaScript values.
	#[must_use]
	pub fn is_boolean(self) -> bool {
		matches!(self, Self::Checked | Self::Disabled | Self::ReadOnly)
	}
}

/// A timer attached to a rendered element.
///
/// Folded into the page refresh interval, or turned into client-side timers for scripted sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutEvent {
	pub msec: u32,
	pub repeat: bool,
}

/// A DOM subtree to be created from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomElement {
	pub tag: String,
	pub id: String,
	pub attributes: BTreeMap<String, String>,
	pub properties: BTreeMap<Property, String>,
	/// Event name (without `on`) to JavaScript handler body.
	pub events: BTreeMap<String, String>,
	pub children: Vec<DomElement>,
	pub timeout: Option<TimeoutEvent>,
}

impl DomElement {
	#[must_use]
	pub fn new(tag: impl Into<String>, id: impl Into<String>) -> Self {
		Self {
			tag: tag.into(),
			id: id.into(),
			..Self::default()
		}
	}

	#[must_use]
	pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.insert(name.into(), value.into());
		self
	}

	#[must_use]
	pub fn property(mut self, property: Property, value: impl Into<String>) -> Self {
		self.properties.insert(property, value.into());
		self
	}

	#[must_use]
	pub fn event(mut self, name: impl Into<String>, js: impl Into<String>) -> Self {
		self.events.insert(name.into(), js.into());
		self
	}

	#[must_use]
	pub fn child(mut self, child: DomElement) -> Self {
		self.children.push(child);
		self
	}

	#[must_use]
	pub fn timeout(mut self, msec: u32, repeat: bool) -> Self {
		self.timeout = Some(TimeoutEvent { msec, repeat });
		self
	}

	/// Collects the timers of this element and all of its descendants, in document order.
	pub fn collect_timeouts(&self, timeouts: &mut Vec<(String, TimeoutEvent)>) {
		if let Some(timeout) = self.timeout {
			timeouts.push((self.id.clone(), timeout));
		}
		for child in &self.children {
			child.collect_timeouts(timeouts);
		}
	}
}

/// Which emission pass a change belongs to.
///
/// All [`Priority::Delete`] instructions of a batch are emitted before any [`Priority::Update`] instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
	Delete,
	Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
	/// Insert a new subtree below `parent`, at `position` or appended.
	Create {
		parent: String,
		position: Option<usize>,
		element: DomElement,
	},
	/// Mutate properties and attributes of the existing node in place.
	Update,
	/// Swap the existing node for a freshly built subtree with the same id.
	Replace { element: DomElement },
	/// Remove the node.
	Delete,
	/// Reinsert the existing node below `parent`.
	Move { parent: String, position: Option<usize> },
}

/// One mutation against the DOM node with id `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomChange {
	pub target: String,
	pub kind: ChangeKind,
	/// `None` removes the attribute.
	pub attributes: BTreeMap<String, Option<String>>,
	pub properties: BTreeMap<Property, String>,
	/// Child nodes removed as part of this change. Always emitted in the delete pass.
	pub removed_children: Vec<String>,
}

impl DomChange {
	fn with_kind(target: String, kind: ChangeKind) -> Self {
		Self {
			target,
			kind,
			attributes: BTreeMap::new(),
			properties: BTreeMap::new(),
			removed_children: Vec::new(),
		}
	}

	#[must_use]
	pub fn create(parent: impl Into<String>, position: Option<usize>, element: DomElement) -> Self {
		Self::with_kind(
			element.id.clone(),
			ChangeKind::Create {
				parent: parent.into(),
				position,
				element,
			},
		)
	}

	#[must_use]
	pub fn update(target: impl Into<String>) -> Self {
		Self::with_kind(target.into(), ChangeKind::Update)
	}

	#[must_use]
	pub fn replace(element: DomElement) -> Self {
		Self::with_kind(element.id.clone(), ChangeKind::Replace { element })
	}

	#[must_use]
	pub fn delete(target: impl Into<String>) -> Self {
		Self::with_kind(target.into(), ChangeKind::Delete)
	}

	#[must_use]
	pub fn move_to(target: impl Into<String>, parent: impl Into<String>, position: Option<usize>) -> Self {
		Self::with_kind(
			target.into(),
			ChangeKind::Move {
				parent: parent.into(),
				position,
			},
		)
	}

	#[must_use]
	pub fn set_property(mut self, property: Property, value: impl Into<String>) -> Self {
		self.properties.insert(property, value.into());
		self
	}

	#[must_use]
	pub fn set_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.insert(name.into(), Some(value.into()));
		self
	}

	#[must_use]
	pub fn remove_attribute(mut self, name: impl Into<String>) -> Self {
		self.attributes.insert(name.into(), None);
		self
	}

	#[must_use]
	pub fn remove_child(mut self, child_id: impl Into<String>) -> Self {
		self.removed_children.push(child_id.into());
		self
	}

	#[must_use]
	pub fn priority(&self) -> Priority {
		match self.kind {
			ChangeKind::Delete => Priority::Delete,
			_ => Priority::Update,
		}
	}

	/// An in-place update that changes nothing.
	#[must_use]
	pub fn is_noop(&self) -> bool {
		matches!(self.kind, ChangeKind::Update) && self.attributes.is_empty() && self.properties.is_empty() && self.removed_children.is_empty()
	}
}
