//! Serialisation of [`DomChange`]s into HTML (first paint) or JavaScript (incremental patches).

use crate::{
	dom::{ChangeKind, DomChange, DomElement, Priority, Property, TimeoutEvent},
	escape,
};
use core::fmt::Write as _;
use tracing::{error, instrument, trace_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
	/// Static markup. Only [`ChangeKind::Create`] is valid: there is nothing to patch yet.
	InitialHtml,
	/// Statements against the client runtime, deletions first.
	Incremental,
}

const VOID_ELEMENTS: &[&str] = &["area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr"];

/// Writes markup and patch scripts addressed to the client runtime object named `runtime`.
#[derive(Debug, Clone)]
pub struct ScriptEmitter {
	runtime: String,
}

impl ScriptEmitter {
	#[must_use]
	pub fn new(runtime: impl Into<String>) -> Self {
		Self { runtime: runtime.into() }
	}

	#[must_use]
	pub fn runtime(&self) -> &str {
		&self.runtime
	}

	#[must_use]
	pub fn emit(&self, changes: &[DomChange], mode: EmitMode) -> String {
		let mut out = String::new();
		self.emit_into(&mut out, changes, mode);
		out
	}

	#[instrument(skip(self, out, changes), fields(changes = changes.len()))]
	pub fn emit_into(&self, out: &mut String, changes: &[DomChange], mode: EmitMode) {
		match mode {
			EmitMode::InitialHtml => {
				for change in changes {
					match &change.kind {
						ChangeKind::Create { element, .. } => Self::element_html(out, element),
						_ => {
							if cfg!(debug_assertions) {
								panic!("Tried to emit {:?} of {} as initial HTML", change.kind, change.target);
							} else {
								error!("Skipping {:?} of {}: there is no DOM to patch yet.", change.kind, change.target);
							}
						}
					}
				}
			}
			EmitMode::Incremental => {
				for change in changes {
					self.change_js(out, change, Priority::Delete);
				}
				for change in changes {
					self.change_js(out, change, Priority::Update);
				}
			}
		}
	}

	/// The part of `change` that belongs to the `priority` pass.
	pub fn change_js(&self, out: &mut String, change: &DomChange, priority: Priority) {
		let span = trace_span!("Emitting change", target = change.target.as_str(), ?priority);
		let _enter = span.enter();
		let rt = &self.runtime;

		if priority == Priority::Delete {
			for removed in &change.removed_children {
				let _ = writeln!(out, "{}.remove({});", rt, escape::js_string_literal(removed));
			}
			if change.priority() == Priority::Delete {
				let _ = writeln!(out, "{}.remove({});", rt, escape::js_string_literal(&change.target));
			}
			return;
		}

		let target = escape::js_string_literal(&change.target);
		match &change.kind {
			ChangeKind::Delete => return,
			ChangeKind::Update => (),
			ChangeKind::Create { parent, position, element } => {
				let _ = writeln!(
					out,
					"{}.insertAt({},{},{});",
					rt,
					escape::js_string_literal(parent),
					Self::html_literal(element),
					position.map_or(-1, |position| position as i64)
				);
				self.timeouts_js(out, element);
			}
			ChangeKind::Replace { element } => {
				let _ = writeln!(out, "{}.replaceWith({},{});", rt, target, Self::html_literal(element));
				self.timeouts_js(out, element);
			}
			ChangeKind::Move { parent, position } => {
				let _ = writeln!(
					out,
					"{}.move({},{},{});",
					rt,
					target,
					escape::js_string_literal(parent),
					position.map_or(-1, |position| position as i64)
				);
			}
		}

		if change.attributes.is_empty() && change.properties.is_empty() {
			return;
		}

		let _ = write!(out, "{{var e={}.getElement({});", rt, target);
		for (property, value) in &change.properties {
			out.push_str("e.");
			out.push_str(property.js_name());
			out.push('=');
			Self::property_js_value(out, *property, value);
			out.push(';');
		}
		for (name, value) in &change.attributes {
			match value {
				Some(value) => {
					let _ = write!(
						out,
						"e.setAttribute({},{});",
						escape::js_string_literal(name),
						escape::js_string_literal(value)
					);
				}
				None => {
					let _ = write!(out, "e.removeAttribute({});", escape::js_string_literal(name));
				}
			}
		}
		out.push_str("}\n");
	}

	fn property_js_value(out: &mut String, property: Property, value: &str) {
		if property.is_boolean() {
			out.push_str(if value == "true" { "true" } else { "false" });
		} else {
			escape::js_string_literal_into(out, value, '\'');
		}
	}

	/// `element` as a JavaScript string literal of its markup.
	#[must_use]
	pub fn html_literal(element: &DomElement) -> String {
		let mut html = String::new();
		Self::element_html(&mut html, element);
		escape::js_string_literal(&html)
	}

	/// Client timers for every element of the subtree that carries a [`TimeoutEvent`].
	pub fn timeouts_js(&self, out: &mut String, element: &DomElement) {
		let mut timeouts = Vec::new();
		element.collect_timeouts(&mut timeouts);
		self.timers_js(out, &timeouts);
	}

	pub fn timers_js(&self, out: &mut String, timeouts: &[(String, TimeoutEvent)]) {
		for (id, TimeoutEvent { msec, repeat }) in timeouts {
			let _ = writeln!(out, "{}.addTimerEvent({},{},{});", self.runtime, escape::js_string_literal(id), msec, repeat);
		}
	}

	/// Static markup of a whole subtree.
	pub fn element_html(out: &mut String, element: &DomElement) {
		let _ = write!(out, "<{} id=\"", element.tag);
		escape::html_attribute(out, &element.id);
		out.push('"');

		let mut style = String::new();
		for (property, value) in &element.properties {
			if let Some(css) = property.style_name() {
				let _ = write!(style, "{}:{};", css, value);
			} else if let Some(attribute) = property.attribute_name() {
				if property.is_boolean() {
					if value == "true" {
						let _ = write!(out, " {}=\"{}\"", attribute, attribute);
					}
				} else {
					let _ = write!(out, " {}=\"", attribute);
					escape::html_attribute(out, value);
					out.push('"');
				}
			}
		}

		for (name, value) in &element.attributes {
			if name == "style" {
				style.push_str(value);
				continue;
			}
			let _ = write!(out, " {}=\"", name);
			escape::html_attribute(out, value);
			out.push('"');
		}
		if !style.is_empty() {
			out.push_str(" style=\"");
			escape::html_attribute(out, &style);
			out.push('"');
		}

		for (event, js) in &element.events {
			let _ = write!(out, " on{}=\"", event);
			escape::html_attribute(out, js);
			out.push('"');
		}

		if VOID_ELEMENTS.contains(&element.tag.to_ascii_lowercase().as_str()) {
			out.push_str(" />");
			return;
		}
		out.push('>');

		if let Some(inner_html) = element.properties.get(&Property::InnerHtml) {
			out.push_str(inner_html);
		}
		for child in &element.children {
			Self::element_html(out, child);
		}
		let _ = write!(out, "</{}>", element.tag);
	}
}
