#![allow(dead_code)]

use dom_session::{
	dom::{DomChange, DomElement, Property},
	escape, Application, CollectionError, RenderContext, SlotType, StatelessSlot, Widget, WidgetId,
};
use std::{
	any::Any,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

pub fn enable_logger() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Counts calls across threads. Widgets must be [`Send`].
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
	pub fn bump(&self) {
		self.0.fetch_add(1, Ordering::SeqCst);
	}

	pub fn get(&self) -> usize {
		self.0.load(Ordering::SeqCst)
	}
}

fn display(hidden: bool) -> &'static str {
	if hidden {
		"none"
	} else {
		""
	}
}

/// A `<span>` with text content.
#[derive(Debug, Default)]
pub struct Text {
	pub text: String,
	pub hidden: bool,
	/// Fails every diff.
	pub fail: bool,
	/// Its updates can't be replayed client-side.
	pub server_only: bool,
	pub diffs: Counter,
	synced: Option<(String, bool)>,
}

impl Text {
	pub fn new(text: &str) -> Self {
		Self {
			text: text.to_owned(),
			..Self::default()
		}
	}
}

impl Widget for Text {
	fn is_hidden(&self) -> bool {
		self.hidden
	}

	fn create_element(&mut self, cx: &mut RenderContext<'_>) -> Result<DomElement, CollectionError> {
		self.synced = Some((self.text.clone(), self.hidden));
		let mut element = DomElement::new("span", cx.dom_id()).property(Property::InnerHtml, escape::escape_text(&self.text));
		if self.hidden {
			element = element.property(Property::StyleDisplay, "none");
		}
		Ok(element)
	}

	fn compute_dom_changes(&mut self, cx: &mut RenderContext<'_>, changes: &mut Vec<DomChange>) -> Result<(), CollectionError> {
		self.diffs.bump();
		if self.fail {
			return Err(CollectionError::new(cx.dom_id(), "scripted failure"));
		}
		if self.server_only && cx.is_pre_learning() {
			cx.learning_incomplete();
		}

		let (text, hidden) = self.synced.clone().unwrap_or_default();
		let mut change = DomChange::update(cx.dom_id());
		if text != self.text {
			change = change.set_property(Property::InnerHtml, escape::escape_text(&self.text));
		}
		if hidden != self.hidden {
			change = change.set_property(Property::StyleDisplay, display(self.hidden));
		}
		changes.push(change);
		self.synced = Some((self.text.clone(), self.hidden));
		Ok(())
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

/// A `<div>` that renders its children.
#[derive(Debug, Default)]
pub struct Container {
	pub hidden: bool,
	/// Marks all children dirty whenever it is updated.
	pub cascade: bool,
	pub diffs: Counter,
	synced_hidden: bool,
}

impl Container {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn hidden() -> Self {
		Self {
			hidden: true,
			..Self::default()
		}
	}

	pub fn cascading() -> Self {
		Self {
			cascade: true,
			..Self::default()
		}
	}
}

impl Widget for Container {
	fn is_hidden(&self) -> bool {
		self.hidden
	}

	fn is_container(&self) -> bool {
		true
	}

	fn create_element(&mut self, cx: &mut RenderContext<'_>) -> Result<DomElement, CollectionError> {
		self.synced_hidden = self.hidden;
		let mut element = DomElement::new("div", cx.dom_id());
		if self.hidden {
			element = element.property(Property::StyleDisplay, "none");
		}
		for child in cx.children() {
			element = element.child(cx.create_child_element(child)?);
		}
		Ok(element)
	}

	fn compute_dom_changes(&mut self, cx: &mut RenderContext<'_>, changes: &mut Vec<DomChange>) -> Result<(), CollectionError> {
		self.diffs.bump();
		if self.cascade {
			for child in cx.children() {
				cx.mark_dirty(child, false);
			}
		}
		if self.synced_hidden != self.hidden {
			changes.push(DomChange::update(cx.dom_id()).set_property(Property::StyleDisplay, display(self.hidden)));
			self.synced_hidden = self.hidden;
		}
		Ok(())
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

/// An `<input>` whose value is posted back by the client.
#[derive(Debug, Default)]
pub struct Input {
	pub value: String,
}

impl Widget for Input {
	fn is_form_object(&self) -> bool {
		true
	}

	fn set_form_data(&mut self, value: &str) {
		self.value = value.to_owned();
	}

	fn create_element(&mut self, cx: &mut RenderContext<'_>) -> Result<DomElement, CollectionError> {
		Ok(DomElement::new("input", cx.dom_id()).property(Property::Value, self.value.clone()))
	}

	fn compute_dom_changes(&mut self, cx: &mut RenderContext<'_>, changes: &mut Vec<DomChange>) -> Result<(), CollectionError> {
		changes.push(DomChange::update(cx.dom_id()).set_property(Property::Value, self.value.clone()));
		Ok(())
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

/// Shows or hides a [`Text`].
pub struct ToggleHidden {
	pub target: WidgetId,
	pub slot_type: SlotType,
	pub triggered: Counter,
}

impl ToggleHidden {
	pub fn new(target: WidgetId, slot_type: SlotType) -> Self {
		Self {
			target,
			slot_type,
			triggered: Counter::default(),
		}
	}

	fn toggle(&self, app: &mut Application) {
		app.tree.update::<Text, _>(self.target, |text| text.hidden = !text.hidden);
	}
}

impl StatelessSlot for ToggleHidden {
	fn slot_type(&self) -> SlotType {
		self.slot_type
	}

	fn trigger(&mut self, app: &mut Application) {
		self.triggered.bump();
		self.toggle(app);
	}

	fn undo_trigger(&mut self, app: &mut Application) {
		self.toggle(app);
	}
}

/// `root` (a [`Container`]) with one [`Text`] child per entry of `texts`.
pub fn app_with_texts(texts: &[&str]) -> (Application, Vec<WidgetId>) {
	let mut app = Application::new(Container::new());
	let root = app.root();
	let ids = texts.iter().map(|text| app.tree.insert(Some(root), Text::new(text))).collect();
	(app, ids)
}
