//! Application-level state the renderer synchronises besides widgets.

use crate::{
	learn::{SlotId, SlotRegistry, StatelessSlot},
	widget::{Widget, WidgetId, WidgetTree},
};
use hashbrown::HashMap;
use tracing::{trace, warn};

/// A JavaScript library the client must load before dependent code runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLibrary {
	pub uri: String,
	/// A global defined by the library, used by the client to detect it is already loaded.
	pub symbol: String,
	pub before_load_js: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSheet {
	pub url: String,
	pub media: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutDirection {
	LeftToRight,
	RightToLeft,
}

/// Show or hide code of the loading indicator, re-sent only when changed.
#[derive(Debug, Clone, Default)]
pub struct IndicatorScript {
	js: String,
	changed: bool,
}

impl IndicatorScript {
	pub fn set(&mut self, js: impl Into<String>) {
		self.js = js.into();
		self.changed = true;
	}

	#[must_use]
	pub fn javascript(&self) -> &str {
		&self.js
	}

	#[must_use]
	pub fn needs_update(&self, all: bool) -> bool {
		self.changed || (all && !self.js.is_empty())
	}

	pub fn update_ok(&mut self) {
		self.changed = false;
	}
}

pub type EventHandler = Box<dyn FnMut(&mut Application) + Send>;

/// One running application: its widget tree plus page-level state.
pub struct Application {
	pub tree: WidgetTree,
	root: WidgetId,
	pub(crate) slots: SlotRegistry,
	handlers: HashMap<(WidgetId, String), Vec<Option<EventHandler>>>,

	title: String,
	pub(crate) title_changed: bool,
	close_message: String,
	pub(crate) close_message_changed: bool,

	internal_path: String,
	pub(crate) internal_path_changed: bool,
	pub(crate) internal_paths_enabled: bool,

	pub(crate) style_sheets: Vec<StyleSheet>,
	pub(crate) style_sheets_added: usize,
	pub(crate) inline_css: String,
	pub(crate) script_libraries: Vec<ScriptLibrary>,
	pub(crate) script_libraries_added: usize,

	before_load_js: String,
	new_before_load_js: usize,
	after_load_js: String,
	pub(crate) auto_js: String,
	pub(crate) auto_js_changed: bool,

	pub(crate) show_loading_indicator: IndicatorScript,
	pub(crate) hide_loading_indicator: IndicatorScript,

	updates_enabled: bool,
	pub(crate) server_push_changed: bool,

	pub(crate) html_class: String,
	pub(crate) body_class: String,
	pub(crate) layout_direction: LayoutDirection,
	pub(crate) body_html_class_changed: bool,

	quit: bool,
	redirect: Option<String>,
}

impl core::fmt::Debug for Application {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Application")
			.field("root", &self.root)
			.field("tree", &self.tree)
			.field("title", &self.title)
			.field("internal_path", &self.internal_path)
			.field("quit", &self.quit)
			.finish()
	}
}

impl Application {
	/// Creates an application whose DOM root is `root`.
	pub fn new(root: impl Widget) -> Self {
		let mut tree = WidgetTree::new();
		let root = tree.insert(None, root);
		Self {
			tree,
			root,
			slots: SlotRegistry::new(),
			handlers: HashMap::new(),
			title: String::new(),
			title_changed: false,
			close_message: String::new(),
			close_message_changed: false,
			internal_path: String::new(),
			internal_path_changed: false,
			internal_paths_enabled: false,
			style_sheets: Vec::new(),
			style_sheets_added: 0,
			inline_css: String::new(),
			script_libraries: Vec::new(),
			script_libraries_added: 0,
			before_load_js: String::new(),
			new_before_load_js: 0,
			after_load_js: String::new(),
			auto_js: String::new(),
			auto_js_changed: false,
			show_loading_indicator: IndicatorScript::default(),
			hide_loading_indicator: IndicatorScript::default(),
			updates_enabled: false,
			server_push_changed: false,
			html_class: String::new(),
			body_class: String::new(),
			layout_direction: LayoutDirection::LeftToRight,
			body_html_class_changed: false,
			quit: false,
			redirect: None,
		}
	}

	#[must_use]
	pub fn root(&self) -> WidgetId {
		self.root
	}

	#[must_use]
	pub fn title(&self) -> &str {
		&self.title
	}

	pub fn set_title(&mut self, title: impl Into<String>) {
		let title = title.into();
		if title != self.title {
			self.title = title;
			self.title_changed = true;
		}
	}

	#[must_use]
	pub fn close_message(&self) -> &str {
		&self.close_message
	}

	/// Text of the browser's confirmation dialog when the user navigates away.
	pub fn set_close_message(&mut self, message: impl Into<String>) {
		let message = message.into();
		if message != self.close_message {
			self.close_message = message;
			self.close_message_changed = true;
		}
	}

	#[must_use]
	pub fn internal_path(&self) -> &str {
		&self.internal_path
	}

	pub fn set_internal_path(&mut self, path: impl Into<String>) {
		let path = path.into();
		self.internal_paths_enabled = true;
		if path != self.internal_path {
			self.internal_path = path;
			self.internal_path_changed = true;
		}
	}

	pub fn use_style_sheet(&mut self, url: impl Into<String>, media: impl Into<String>) {
		let sheet = StyleSheet { url: url.into(), media: media.into() };
		if !self.style_sheets.contains(&sheet) {
			self.style_sheets.push(sheet);
			self.style_sheets_added += 1;
		}
	}

	#[must_use]
	pub fn style_sheets(&self) -> &[StyleSheet] {
		&self.style_sheets
	}

	/// CSS inlined into the page (with [`Configuration::inline_css`](`crate::config::Configuration::inline_css`)).
	pub fn set_inline_css(&mut self, css: impl Into<String>) {
		self.inline_css = css.into();
	}

	/// Loads `uri` once. Returns `false` if it was already required.
	pub fn require_javascript_library(&mut self, uri: impl Into<String>, symbol: impl Into<String>, before_load_js: impl Into<String>) -> bool {
		let uri = uri.into();
		if self.script_libraries.iter().any(|library| library.uri == uri) {
			return false;
		}
		self.script_libraries.push(ScriptLibrary {
			uri,
			symbol: symbol.into(),
			before_load_js: before_load_js.into(),
		});
		self.script_libraries_added += 1;
		true
	}

	#[must_use]
	pub fn script_libraries(&self) -> &[ScriptLibrary] {
		&self.script_libraries
	}

	/// Queues JavaScript to run after the next update has been applied.
	pub fn do_javascript(&mut self, js: &str) {
		self.after_load_js.push_str(js);
		if !js.ends_with(';') && !js.ends_with('\n') {
			self.after_load_js.push(';');
		}
	}

	/// Queues JavaScript that runs before any DOM update, and again after every full reload.
	pub fn do_javascript_before_load(&mut self, js: &str) {
		self.before_load_js.push_str(js);
		if !js.ends_with(';') && !js.ends_with('\n') {
			self.before_load_js.push(';');
		}
	}

	/// JavaScript re-run after every update (e.g. layout fixups).
	pub fn set_auto_javascript(&mut self, js: impl Into<String>) {
		self.auto_js = js.into();
		self.auto_js_changed = true;
	}

	pub fn set_loading_indicator(&mut self, show_js: impl Into<String>, hide_js: impl Into<String>) {
		self.show_loading_indicator.set(show_js);
		self.hide_loading_indicator.set(hide_js);
	}

	/// Enables or disables server push.
	pub fn enable_updates(&mut self, enabled: bool) {
		if enabled != self.updates_enabled {
			self.updates_enabled = enabled;
			self.server_push_changed = true;
		}
	}

	#[must_use]
	pub fn updates_enabled(&self) -> bool {
		self.updates_enabled
	}

	pub fn set_html_class(&mut self, class: impl Into<String>) {
		self.html_class = class.into();
		self.body_html_class_changed = true;
	}

	pub fn set_body_class(&mut self, class: impl Into<String>) {
		self.body_class = class.into();
		self.body_html_class_changed = true;
	}

	pub fn set_layout_direction(&mut self, direction: LayoutDirection) {
		if direction != self.layout_direction {
			self.layout_direction = direction;
			self.body_html_class_changed = true;
		}
	}

	#[must_use]
	pub fn layout_direction(&self) -> LayoutDirection {
		self.layout_direction
	}

	/// The body class including the direction marker.
	#[must_use]
	pub fn body_class_rtl(&self) -> String {
		let mut class = self.body_class.clone();
		if !class.is_empty() {
			class.push(' ');
		}
		class.push_str(match self.layout_direction {
			LayoutDirection::LeftToRight => "Wt-ltr",
			LayoutDirection::RightToLeft => "Wt-rtl",
		});
		class
	}

	/// Ends the application. The next response tells the client to stop.
	pub fn quit(&mut self) {
		self.quit = true;
	}

	#[must_use]
	pub fn is_quited(&self) -> bool {
		self.quit
	}

	pub fn redirect(&mut self, url: impl Into<String>) {
		self.redirect = Some(url.into());
	}

	#[must_use]
	pub fn pending_redirect(&self) -> Option<&str> {
		self.redirect.as_deref()
	}

	pub(crate) fn take_redirect(&mut self) -> Option<String> {
		self.redirect.take()
	}

	/// Appends before-load JavaScript: everything if `all`, otherwise only what wasn't streamed yet.
	pub(crate) fn stream_before_load_javascript(&mut self, out: &mut String, all: bool) {
		let from = if all { 0 } else { self.new_before_load_js };
		out.push_str(&self.before_load_js[from..]);
		self.new_before_load_js = self.before_load_js.len();
	}

	pub(crate) fn stream_after_load_javascript(&mut self, out: &mut String) {
		out.push_str(&self.after_load_js);
		self.after_load_js.clear();
	}

	pub(crate) fn discard_after_load_javascript(&mut self) {
		self.after_load_js.clear();
	}

	#[must_use]
	pub fn has_after_load_javascript(&self) -> bool {
		!self.after_load_js.is_empty()
	}

	/// DOM ids of rendered widgets that post their value back, sorted.
	#[must_use]
	pub fn form_objects(&self) -> Vec<String> {
		let mut ids = Vec::new();
		let mut stack = vec![self.root];
		while let Some(id) = stack.pop() {
			if !self.tree.is_rendered(id) {
				continue;
			}
			if self.tree.widget(id).map_or(false, |widget| widget.is_form_object()) {
				if let Some(dom_id) = self.tree.dom_id(id) {
					ids.push(dom_id.to_owned());
				}
			}
			stack.extend(self.tree.children(id).iter().copied());
		}
		ids.sort();
		ids
	}

	/// Connects a server-side handler to `signal` of `widget`.
	pub fn connect(&mut self, widget: WidgetId, signal: impl Into<String>, handler: impl FnMut(&mut Application) + Send + 'static) {
		self.handlers.entry((widget, signal.into())).or_default().push(Some(Box::new(handler)));
	}

	/// Exposes a stateless slot for `signal` of `sender`, or of the application itself.
	pub fn expose_stateless(&mut self, sender: Option<WidgetId>, signal: &str, slot: impl StatelessSlot + 'static) -> Option<SlotId> {
		let dom_id = match sender {
			Some(sender) => self.tree.dom_id(sender)?.to_owned(),
			None => "app".to_owned(),
		};
		let id = SlotId::new(&dom_id, signal);
		self.slots.expose(id.clone(), sender, Box::new(slot));
		Some(id)
	}

	pub fn unexpose_stateless(&mut self, id: &SlotId) {
		self.slots.unexpose(id);
	}

	#[must_use]
	pub fn stateless_slots(&self) -> &SlotRegistry {
		&self.slots
	}

	/// Runs the server-side handlers of `signal` fired by the widget with DOM id `dom_id`.
	///
	/// Returns `false` if nothing is connected.
	pub fn handle_event(&mut self, dom_id: &str, signal: &str) -> bool {
		let widget = match self.tree.find_by_dom_id(dom_id) {
			Some(widget) => widget,
			None => {
				warn!("Event {} for unknown widget {}. Ignoring.", signal, dom_id);
				return false;
			}
		};

		let key = (widget, signal.to_owned());
		let count = self.handlers.get(&key).map_or(0, Vec::len);
		if count == 0 {
			trace!("No handlers for {}.{}", dom_id, signal);
			return false;
		}

		for i in 0..count {
			let handler = self.handlers.get_mut(&key).and_then(|handlers| handlers.get_mut(i)).and_then(Option::take);
			if let Some(mut handler) = handler {
				handler(self);
				if let Some(slot) = self.handlers.get_mut(&key).and_then(|handlers| handlers.get_mut(i)) {
					*slot = Some(handler);
				}
			}
		}
		true
	}

	/// Removes a widget with its subtree, including its handlers and what was learned about its slots.
	pub fn remove_widget(&mut self, id: WidgetId) {
		for removed in self.tree.remove(id) {
			self.slots.invalidate_sender(removed);
			self.handlers.retain(|(widget, _), _| *widget != removed);
		}
	}
}
