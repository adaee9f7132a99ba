//! Response coordination: which kind of response to build, and how to fill it.
//!
//! JavaScript for the client accumulates in three buffers:
//! - `collected_js1`: the primary update, applied immediately,
//! - `collected_js2`: code that must run after script libraries loaded by this response,
//! - `invisible_js`: changes to currently invisible widgets, withheld when they exceed the two-phase threshold.
//!
//! The first two are kept until the client acknowledges the response that carried them,
//! so that a retried request re-delivers them.

use crate::{
	app::{Application, StyleSheet},
	collect::{ChangeCollector, CollectMode, DirtySet},
	config::{Configuration, ErrorReporting},
	dom::{DomChange, DomElement},
	emit::{EmitMode, ScriptEmitter},
	error::{CollectionError, Error, ProtocolError},
	escape,
	learn::{LearnState, SlotId, SlotOutcome, SlotType},
	request::{Environment, Request, Response, ResponseType},
	template::{self, Template},
	widget::{RenderFlags, WidgetId, WidgetTree},
	Result,
};
use core::fmt::Write as _;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, level_filters::STATIC_MAX_LEVEL, trace, warn, Level};

/// Whether `solution` occurs in `answer` as an ordered, not necessarily contiguous, subsequence
/// that ends with the last id of `answer`.
///
/// An empty solution is contained in every answer.
#[must_use]
pub fn verify_puzzle<S: AsRef<str>, A: AsRef<str>>(solution: &[S], answer: &[A]) -> bool {
	let mut remaining = answer.iter();
	solution.iter().all(|expected| remaining.any(|given| given.as_ref() == expected.as_ref()))
		&& (solution.is_empty() || remaining.next().is_none())
}

/// The `REFRESH` interval (seconds) of a page served to a client without JavaScript.
///
/// The client must come back before the session times out, and before the earliest timer fires.
#[must_use]
pub fn refresh_interval(session_timeout: Option<u32>, quit: bool, timer_msecs: impl IntoIterator<Item = u32>) -> u32 {
	match session_timeout {
		Some(timeout) if !quit => timer_msecs.into_iter().fold(timeout / 3, |refresh, msec| refresh.min(1 + msec / 1000)),
		_ => 1_000_000,
	}
}

/// `value` as a JavaScript string literal that can't close an enclosing `<script>` element.
fn safe_js_string_literal(value: &str) -> String {
	escape::js_string_literal(value).replace('<', "<'+'")
}

fn close_special(out: &mut String, xhtml: bool) {
	out.push_str(if xhtml { "/>\n" } else { ">\n" });
}

/// Turns the state of one session's [`Application`] into responses.
pub struct Renderer {
	config: Arc<Configuration>,
	env: Environment,
	session_id: String,
	emitter: ScriptEmitter,
	collector: ChangeCollector,
	dirty: DirtySet,
	flags: RenderFlags,
	rng: StdRng,

	visible_only: bool,
	rendered: bool,
	initial_style_rendered: bool,
	two_phase_threshold: usize,

	page_id: u32,
	expected_ack_id: u32,
	script_id: u32,
	solution: Vec<String>,

	collected_js1: String,
	collected_js2: String,
	invisible_js: String,
	stateless_js: String,
	before_load_js: String,

	current_form_objects: String,
	form_objects_changed: bool,
}

impl core::fmt::Debug for Renderer {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Renderer")
			.field("session_id", &self.session_id)
			.field("rendered", &self.rendered)
			.field("visible_only", &self.visible_only)
			.field("page_id", &self.page_id)
			.field("expected_ack_id", &self.expected_ack_id)
			.field("script_id", &self.script_id)
			.field("dirty", &self.dirty.len())
			.finish()
	}
}

impl Renderer {
	#[must_use]
	pub fn new(config: Arc<Configuration>, env: Environment, session_id: impl Into<String>) -> Self {
		Self {
			emitter: ScriptEmitter::new(config.javascript_class.clone()),
			two_phase_threshold: config.two_phase_threshold,
			config,
			env,
			session_id: session_id.into(),
			collector: ChangeCollector::new(),
			dirty: DirtySet::new(),
			flags: RenderFlags::default(),
			rng: StdRng::from_entropy(),
			visible_only: true,
			rendered: false,
			initial_style_rendered: false,
			page_id: 0,
			expected_ack_id: 0,
			script_id: 0,
			solution: Vec::new(),
			collected_js1: String::new(),
			collected_js2: String::new(),
			invisible_js: String::new(),
			stateless_js: String::new(),
			before_load_js: String::new(),
			current_form_objects: String::new(),
			form_objects_changed: true,
		}
	}

	/// Replaces the source of response ids and puzzle choices, e.g. for reproducible tests.
	pub fn seed_rng(&mut self, seed: u64) {
		self.rng = StdRng::seed_from_u64(seed);
	}

	#[must_use]
	pub fn config(&self) -> &Configuration {
		&self.config
	}

	#[must_use]
	pub fn environment(&self) -> &Environment {
		&self.env
	}

	/// Serves plain HTML from now on, e.g. after the client reported that it can't run JavaScript.
	pub fn disable_ajax(&mut self) {
		self.env.has_ajax = false;
	}

	#[must_use]
	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn set_two_phase_threshold(&mut self, bytes: usize) {
		self.two_phase_threshold = bytes;
	}

	#[must_use]
	pub fn two_phase_threshold(&self) -> usize {
		self.two_phase_threshold
	}

	#[must_use]
	pub fn is_visible_only(&self) -> bool {
		self.visible_only
	}

	pub fn set_visible_only(&mut self, how: bool) {
		self.visible_only = how;
	}

	/// Whether the client holds a rendered page that can be patched.
	#[must_use]
	pub fn is_rendered(&self) -> bool {
		self.rendered
	}

	pub fn set_rendered(&mut self, how: bool) {
		self.rendered = how;
	}

	#[must_use]
	pub fn page_id(&self) -> u32 {
		self.page_id
	}

	#[must_use]
	pub fn script_id(&self) -> u32 {
		self.script_id
	}

	#[must_use]
	pub fn expected_ack_id(&self) -> u32 {
		self.expected_ack_id
	}

	/// The ancestor chain the next request must echo, nearest ancestor first.
	#[must_use]
	pub fn puzzle_solution(&self) -> &[String] {
		&self.solution
	}

	#[must_use]
	pub fn is_pre_learning(&self) -> bool {
		self.flags.pre_learning
	}

	/// Signals that the slot being learned can't be replayed client-side.
	pub fn learning_incomplete(&mut self) {
		self.flags.learning_incomplete = true;
	}

	pub fn need_update(&mut self, id: WidgetId, later_only: bool) {
		self.dirty.need_update(id, later_only);
	}

	pub fn done_update(&mut self, id: WidgetId) {
		self.dirty.done_update(id);
	}

	/// The set of form widgets may have changed.
	pub fn update_form_objects(&mut self) {
		self.form_objects_changed = true;
	}

	#[must_use]
	pub fn dirty(&self) -> &DirtySet {
		&self.dirty
	}

	/// Whether there is anything to send to the client, including responses it hasn't acknowledged yet.
	pub fn is_dirty(&mut self, app: &mut Application) -> bool {
		self.has_changes(app) || !self.collected_js1.is_empty() || !self.collected_js2.is_empty() || !self.invisible_js.is_empty()
	}

	/// Whether the application changed since the last response.
	pub fn has_changes(&mut self, app: &mut Application) -> bool {
		self.dirty.absorb(&mut app.tree);
		!self.dirty.is_empty()
			|| self.form_objects_changed
			|| app.is_quited()
			|| app.has_after_load_javascript()
			|| app.server_push_changed
			|| app.title_changed
			|| app.close_message_changed
			|| app.internal_path_changed
			|| app.style_sheets_added != 0
			|| app.script_libraries_added != 0
	}

	/// Checks the acknowledgement id of an incoming request.
	///
	/// An exact match moves on to the next id and drops the script buffers the client has now applied.
	/// Ids slightly behind are retries and tolerated. Anything else means the client is out of sync.
	pub fn ack_update(&mut self, update_id: u32) -> bool {
		if !self.accepts_ack(update_id) {
			warn!("Rejecting acknowledgement {} (expected {}).", update_id, self.expected_ack_id);
			return false;
		}

		if update_id == self.expected_ack_id {
			self.set_js_synced(false);
			self.expected_ack_id = self.expected_ack_id.wrapping_add(1);
		} else {
			trace!("Tolerating acknowledgement {} ({} behind).", update_id, self.expected_ack_id.wrapping_sub(update_id));
		}
		true
	}

	/// Whether [`Renderer::ack_update`] would accept `update_id`, without acknowledging anything.
	#[must_use]
	pub fn accepts_ack(&self, update_id: u32) -> bool {
		let behind = self.expected_ack_id.wrapping_sub(update_id);
		behind == 0 || behind < self.config.ack_tolerance
	}

	/// Verifies the puzzle answer of `request` against the pending solution, which is consumed.
	///
	/// # Errors
	///
	/// [`ProtocolError::PuzzleFailure`] iff a puzzle is pending and the answer is missing or doesn't contain its solution.
	pub fn check_response_puzzle(&mut self, request: &Request) -> core::result::Result<(), ProtocolError> {
		if self.solution.is_empty() {
			return Ok(());
		}
		let solution = core::mem::take(&mut self.solution);

		let answer = match request.ack_puzzle() {
			Some(answer) => answer,
			None => {
				warn!(target: "secure", "{}: solution missing", ProtocolError::PuzzleFailure);
				return Err(ProtocolError::PuzzleFailure);
			}
		};

		let answer: Vec<&str> = answer.split(',').collect();
		if verify_puzzle(&solution, &answer) {
			Ok(())
		} else {
			warn!(target: "secure", "{}: '{}' vs '{}'", ProtocolError::PuzzleFailure, answer.join(","), solution.join(","));
			Err(ProtocolError::PuzzleFailure)
		}
	}

	fn set_js_synced(&mut self, invisible_too: bool) {
		self.collected_js1.clear();
		self.collected_js2.clear();
		if !invisible_too {
			self.collected_js1.push_str(&self.invisible_js);
		}
		self.invisible_js.clear();
	}

	/// Writes the response to `request`.
	///
	/// `app` is `None` until the session's application has been created, which yields the bootstrap page.
	///
	/// # Errors
	///
	/// Iff a widget failed to render. Nothing is written to `response` in that case.
	#[instrument(skip(self, request, response, app), fields(response_type = ?response.response_type()))]
	pub fn serve_response(&mut self, request: &Request, response: &mut Response, app: Option<&mut Application>) -> Result<()> {
		match (response.response_type(), app) {
			(ResponseType::Update, Some(app)) => self.serve_javascript_update(response, app),
			(ResponseType::Page, Some(app)) => {
				self.initial_style_rendered = false;
				self.serve_main_page(response, app)
			}
			(ResponseType::Page, None) => {
				self.initial_style_rendered = false;
				self.serve_bootstrap(response)
			}
			(ResponseType::Script, Some(app)) => self.serve_main_script(request, response, app),
			(response_type, None) => {
				warn!("{:?} requested before the application exists. Reloading.", response_type);
				self.let_reload_js(response, false);
				Ok(())
			}
		}
	}

	/// The error page, or for script requests a script that replaces the page with it.
	pub fn serve_error(&mut self, status: u16, response: &mut Response, message: &str, app: Option<&Application>) {
		let js = response.response_type() != ResponseType::Page;
		if js && app.is_some() {
			let out = response.out();
			let _ = write!(
				out,
				"{}._p_.quit();document.title = 'Error occurred.';document.body.innerHTML='<h2>Error occurred.</h2>' +{};",
				self.config.application_class,
				escape::js_string_literal(message)
			);
		} else {
			response.set_status(status);
			response.set_content_type("text/html");
			let out = response.out();
			out.push_str("<title>Error occurred.</title><h2>Error occurred.</h2>");
			escape::html_text(out, message);
			out.push('\n');
		}
	}

	/// The application's own style rules, for the boot style request.
	pub fn serve_linked_css(&mut self, response: &mut Response, app: &mut Application) {
		response.set_content_type("text/css");
		if !self.initial_style_rendered {
			response.out().push_str(&app.inline_css);
			self.initial_style_rendered = true;
		}
	}

	/// Tells the client to stop and reload the page.
	pub fn let_reload_js(&mut self, response: &mut Response, embedded: bool) {
		if !embedded {
			response.set_caching(false);
			response.set_content_type("text/javascript; charset=UTF-8");
		}
		let app_class = &self.config.application_class;
		let _ = write!(response.out(), "if (window.{0}) window.{0}._p_.quit(); window.location.reload(true);", app_class);
	}

	pub fn let_reload_html(&mut self, response: &mut Response) {
		response.set_caching(false);
		response.set_content_type("text/html; charset=UTF-8");
		response.out().push_str("<html><script type=\"text/javascript\">");
		self.let_reload_js(response, true);
		response.out().push_str("</script><body></body></html>");
	}

	/// Navigates the client to `redirect`, syncing the internal path first.
	pub fn stream_redirect_js(&self, out: &mut String, app: Option<&mut Application>, redirect: &str) {
		if let Some(app) = app {
			if app.internal_path_changed {
				let _ = writeln!(
					out,
					"if (window.{0}) {0}._p_.setHash({1}, false);",
					self.config.application_class,
					escape::js_string_literal(app.internal_path())
				);
				app.internal_path_changed = false;
			}
		}
		let redirect = escape::js_string_literal(redirect);
		let _ = writeln!(out, "if (window.location.replace) window.location.replace({0});else window.location.href={0};", redirect);
	}

	fn session_url(&self) -> String {
		format!("{}?wtd={}", self.env.deployment_path, self.session_id)
	}

	fn bootstrap_url(&self) -> String {
		self.session_url()
	}

	fn set_headers(response: &mut Response, mime_type: &str) {
		response.set_content_type(mime_type);
	}

	#[instrument(skip(self, response, app))]
	fn serve_javascript_update(&mut self, response: &mut Response, app: &mut Application) -> Result<()> {
		let mut out = String::new();
		if self.rendered {
			info!("Serving incremental update.");
			self.collect_javascript(app)?;
			self.add_response_ack_puzzle(&mut out, app);
			self.render_set_server_push(&mut out, app);
			self.log_js(&self.collected_js1, &self.collected_js2);
			out.push_str(&self.collected_js1);
			out.push_str(&self.collected_js2);
		} else {
			info!("Serving first paint as an update.");
			self.serve_main_ajax(&mut out, app)?;
		}

		response.set_caching(false);
		Self::set_headers(response, "text/javascript; charset=UTF-8");
		response.out().push_str(&out);
		Ok(())
	}

	/// Writes a server-initiated update containing only what changed since the last response.
	///
	/// Responses the client hasn't acknowledged yet are not repeated, but stay buffered for a retried request.
	///
	/// # Errors
	///
	/// Iff a widget failed to render. Nothing is written to `response` in that case.
	#[instrument(skip(self, response, app))]
	pub fn serve_push(&mut self, response: &mut Response, app: &mut Application) -> Result<()> {
		let served_js1 = core::mem::take(&mut self.collected_js1);
		let served_js2 = core::mem::take(&mut self.collected_js2);
		let result = self.serve_javascript_update(response, app);
		self.collected_js1.insert_str(0, &served_js1);
		self.collected_js2.insert_str(0, &served_js2);
		result
	}

	fn log_js(&self, js1: &str, js2: &str) {
		if STATIC_MAX_LEVEL >= Level::DEBUG && cfg!(feature = "dangerous-logging") {
			debug!("js: {}{}", js1, js2);
		}
	}

	#[instrument(skip(self, request, response, app))]
	fn serve_main_script(&mut self, request: &Request, response: &mut Response, app: &mut Application) -> Result<()> {
		let split = self.config.split_script;
		let serve_skeletons = !split || request.is_skeleton();
		let serve_rest = !split || !serve_skeletons;
		info!(serve_skeletons, serve_rest, "Serving main script.");

		let mut out = String::new();
		if let Some(redirect) = app.take_redirect() {
			self.stream_redirect_js(&mut out, Some(app), &redirect);
			response.set_caching(false);
			Self::set_headers(response, "text/javascript; charset=UTF-8");
			response.out().push_str(&out);
			return Ok(());
		}

		if serve_skeletons {
			let config = &self.config;
			let mut script = Template::new(template::WT_JS);
			script
				.set_condition("CATCH_ERROR", config.error_reporting != ErrorReporting::NoErrors)
				.set_condition("SHOW_STACK", config.error_reporting == ErrorReporting::ErrorMessageWithStack)
				.set_condition("UGLY_INTERNAL_PATHS", self.env.hash_internal_paths)
				.set_condition("DYNAMIC_JS", false)
				.set_condition("STRICTLY_SERIALIZED_EVENTS", config.serialized_events)
				.set_condition("WEB_SOCKETS", config.web_sockets)
				.set_var("WT_CLASS", &config.javascript_class)
				.set_var("APP_CLASS", &config.application_class)
				.set_var("INNER_HTML", !self.env.xhtml)
				.set_var("ACK_UPDATE_ID", self.expected_ack_id)
				.set_var("SESSION_URL", escape::js_string_literal(&self.session_url()))
				.set_var("DEPLOY_PATH", escape::js_string_literal(&self.env.deployment_path))
				.set_var("KEEP_ALIVE", config.keep_alive())
				.set_var("INDICATOR_TIMEOUT", config.indicator_timeout)
				.set_var("SERVER_PUSH_TIMEOUT", u64::from(config.server_push_timeout) * 1000)
				.set_var("CLOSE_CONNECTION", false)
				.set_var("PARAMS", "");
			script.stream(&mut out)?;
		}

		if serve_rest {
			let app_class = self.config.application_class.clone();
			let _ = write!(out, "{}._p_.setPage({});", app_class, self.page_id);
			self.form_objects_changed = true;
			app.auto_js_changed = true;

			if self.rendered {
				// Upgrades a page that was served as HTML.
				out.push_str(&self.before_load_js);
				self.before_load_js.clear();
				app.stream_before_load_javascript(&mut out, true);
				let _ = writeln!(out, "window.{}LoadWidgetTree = function(){{", app_class);
				self.visible_only = false;
				self.form_objects_changed = true;
				self.current_form_objects.clear();
				self.collect_javascript(app)?;
				let mut js1 = core::mem::take(&mut self.collected_js1);
				self.update_load_indicator(&mut js1, app, true);
				self.collected_js1 = js1;
				if app.internal_paths_enabled {
					let _ = writeln!(out, "{}._p_.enableInternalPaths({});", app_class, escape::js_string_literal(app.internal_path()));
				}
				self.log_js(&self.collected_js1, &self.collected_js2);
				out.push_str(&self.collected_js1);
				self.add_response_ack_puzzle(&mut out, app);
				let _ = writeln!(out, "{}._p_.setHash({}, false);", app_class, escape::js_string_literal(app.internal_path()));
				let _ = write!(out, "{}._p_.update(null, 'load', null, false);{}}};", app_class, self.collected_js2);
				app.server_push_changed = true;
				self.render_set_server_push(&mut out, app);
				let _ = writeln!(out, "$(document).ready(function() {{ {}._p_.load(true);}});", app_class);
			} else {
				self.serve_main_ajax(&mut out, app)?;
			}
		}

		response.set_caching(split && serve_skeletons);
		Self::set_headers(response, "text/javascript; charset=UTF-8");
		response.out().push_str(&out);
		Ok(())
	}

	fn set_page_vars(&self, page: &mut Template, app: Option<&mut Application>) {
		let xhtml = self.env.xhtml;
		page.set_var(
			"DOCTYPE",
			if xhtml {
				"<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Strict//EN\" \"http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd\">"
			} else {
				"<!DOCTYPE html>"
			},
		);

		let mut html_attributes = if xhtml {
			"xmlns=\"http://www.w3.org/1999/xhtml\"".to_owned()
		} else {
			"lang=\"en\" dir=\"ltr\"".to_owned()
		};
		let mut body_attributes = String::new();
		if let Some(app) = app {
			if !app.html_class.is_empty() {
				let _ = write!(html_attributes, " class=\"{}\"", escape::html_attribute_value(&app.html_class));
			}
			let _ = write!(body_attributes, " class=\"{}\"", escape::html_attribute_value(&app.body_class_rtl()));
			if app.layout_direction() == crate::app::LayoutDirection::RightToLeft {
				body_attributes.push_str(" dir=\"RTL\"");
			}
			app.body_html_class_changed = false;
		}

		page.set_var("HTMLATTRIBUTES", html_attributes)
			.set_var("METACLOSE", if xhtml { "/>" } else { ">" })
			.set_var("BODYATTRIBUTES", body_attributes)
			.set_var("HEADDECLARATIONS", "")
			.set_condition("FORM", !self.env.agent_is_spider_bot && !self.env.has_ajax)
			.set_condition("BOOT_STYLE", !xhtml);
	}

	/// Streams `boot` up to its `BOOT_JS` marker, followed by the bootstrap script.
	fn stream_boot_content(&mut self, out: &mut String, boot: &mut Template, hybrid: bool, internal_path: &str) -> Result<()> {
		self.script_id = self.rng.gen();
		self.expected_ack_id = self.script_id;

		let mut boot_js = Template::new(template::BOOT_JS);
		boot_js
			.set_var("SELF_URL", safe_js_string_literal(&self.bootstrap_url()))
			.set_var("SESSION_ID", &self.session_id)
			.set_var("SCRIPT_ID", self.script_id)
			.set_var("RANDOMSEED", self.rng.gen::<u32>())
			.set_var("RELOAD_IS_NEWSESSION", self.config.reload_is_new_session)
			.set_var("APP_CLASS", &self.config.application_class)
			.set_var("INTERNAL_PATH", safe_js_string_literal(internal_path))
			.set_condition("SPLIT_SCRIPT", self.config.split_script)
			.set_condition("HYBRID", hybrid)
			.set_condition("PROGRESS", hybrid && !self.env.has_ajax)
			.set_condition("DEFER_SCRIPT", true);

		boot.stream_until(out, "BOOT_JS")?;
		boot_js.stream(out)?;
		Ok(())
	}

	#[instrument(skip(self, response))]
	fn serve_bootstrap(&mut self, response: &mut Response) -> Result<()> {
		info!("Serving bootstrap page.");
		let xhtml = self.env.xhtml;
		let mut boot = Template::new(template::BOOT_HTML);
		self.set_page_vars(&mut boot, None);

		let no_js_redirect_url = escape::html_attribute_value(&format!("{}&js=no", self.bootstrap_url()));
		boot.set_var(
			"AUTO_REDIRECT",
			if xhtml {
				String::new()
			} else {
				format!("<noscript><meta http-equiv=\"refresh\" content=\"0; url={}\"></noscript>", no_js_redirect_url)
			},
		)
		.set_var("REDIRECT_URL", no_js_redirect_url)
		.set_var("NOSCRIPT_TEXT", escape::escape_text(&self.config.redirect_message))
		.set_var("BOOT_STYLE_URL", escape::html_attribute_value(&format!("{}&request=style", self.bootstrap_url())));

		let mut out = String::new();
		let internal_path = self.env.internal_path.clone();
		self.stream_boot_content(&mut out, &mut boot, false, &internal_path)?;
		boot.stream(&mut out)?;
		self.rendered = false;

		response.set_caching(false);
		Self::set_headers(response, self.env.content_type());
		response.out().push_str(&out);
		Ok(())
	}

	fn render_style_sheet(out: &mut String, sheet: &StyleSheet, xhtml: bool) {
		out.push_str("<link href=\"");
		escape::html_attribute(out, &sheet.url);
		out.push_str("\" rel=\"stylesheet\" type=\"text/css\"");
		if !sheet.media.is_empty() && sheet.media != "all" {
			out.push_str(" media=\"");
			escape::html_attribute(out, &sheet.media);
			out.push('"');
		}
		close_special(out, xhtml);
	}

	/// Renders the whole widget tree as HTML from scratch.
	fn render_root(&mut self, app: &mut Application) -> core::result::Result<DomElement, CollectionError> {
		let root = app.root();
		self.visible_only = true;
		app.tree.reset_rendered(root);
		let element = app.tree.create_element(root, &mut self.flags);
		self.dirty.absorb(&mut app.tree);
		if element.is_ok() {
			self.dirty.clear();
		}
		element
	}

	#[instrument(skip(self, response, app))]
	fn serve_main_page(&mut self, response: &mut Response, app: &mut Application) -> Result<()> {
		self.expected_ack_id = self.expected_ack_id.wrapping_add(1);
		self.page_id = self.page_id.wrapping_add(1);
		info!(page_id = self.page_id, "Serving main page.");

		if let Some(redirect) = app.take_redirect() {
			response.send_redirect(redirect);
			return Ok(());
		}

		let main_element = self.render_root(app)?;
		self.rendered = true;
		self.set_js_synced(true);

		let xhtml = self.env.xhtml;
		let mut style_sheets = String::new();
		for sheet in &app.style_sheets {
			Self::render_style_sheet(&mut style_sheets, sheet, xhtml);
		}
		app.style_sheets_added = 0;
		self.initial_style_rendered = true;

		self.before_load_js.clear();
		for library in &app.script_libraries {
			style_sheets.push_str("<script src=\"");
			escape::html_attribute(&mut style_sheets, &library.uri);
			style_sheets.push_str("\"></script>\n");
			self.before_load_js.push_str(&library.before_load_js);
		}
		app.script_libraries_added = 0;
		let mut discarded = String::new();
		app.stream_before_load_javascript(&mut discarded, false);

		let hybrid = self.env.has_ajax;
		let mut page = Template::new(template::PAGE_HTML);
		self.set_page_vars(&mut page, Some(&mut *app));
		let relative_url = if app.internal_path().is_empty() {
			self.session_url()
		} else {
			format!("{}&_={}", self.session_url(), app.internal_path())
		};
		page.set_var("SESSION_ID", &self.session_id)
			.set_var("RELATIVE_URL", relative_url.replace('&', "&amp;"))
			.set_var("STYLESHEET", if self.config.inline_css { app.inline_css.as_str() } else { "" })
			.set_var("STYLESHEETS", style_sheets)
			.set_var("TITLE", escape::escape_text(app.title()))
			.set_condition("INLINE_CSS", self.config.inline_css)
			.set_condition("HYBRID", hybrid);
		app.title_changed = false;

		self.current_form_objects = self.create_form_objects_list(app);

		let mut out = String::new();
		if hybrid {
			let internal_path = app.internal_path().to_owned();
			self.stream_boot_content(&mut out, &mut page, true, &internal_path)?;
		}
		page.stream_until(&mut out, "HTML")?;

		ScriptEmitter::element_html(&mut out, &main_element);
		let mut timeouts = Vec::new();
		main_element.collect_timeouts(&mut timeouts);

		let refresh = if self.env.has_ajax {
			let mut timers = String::new();
			self.emitter.timers_js(&mut timers, &timeouts);
			if !timers.is_empty() {
				app.do_javascript(&timers);
			}
			1_000_000
		} else {
			refresh_interval(self.config.session_timeout, app.is_quited(), timeouts.iter().map(|(_, timeout)| timeout.msec))
		};
		page.set_var("REFRESH", refresh);
		page.stream(&mut out)?;
		app.internal_path_changed = false;

		response.set_caching(false);
		response.add_header("X-Frame-Options", "SAMEORIGIN");
		Self::set_headers(response, self.env.content_type());
		response.out().push_str(&out);
		Ok(())
	}

	/// The first paint through JavaScript.
	#[instrument(skip(self, out, app))]
	fn serve_main_ajax(&mut self, out: &mut String, app: &mut Application) -> Result<()> {
		let app_class = self.config.application_class.clone();
		let main_element = self.render_root(app)?;

		app.script_libraries_added = app.script_libraries.len();
		let libraries_loaded = self.load_script_libraries(out, app, None);

		let _ = writeln!(out, "{}._p_.autoJavaScript=function(){{{}}};", app_class, app.auto_js);
		app.auto_js_changed = false;

		self.current_form_objects = self.create_form_objects_list(app);
		let _ = writeln!(out, "{}._p_.setFormObjects([{}]);", app_class, self.current_form_objects);

		app.stream_before_load_javascript(out, true);
		let _ = writeln!(out, "window.{}LoadWidgetTree = function(){{", app_class);

		if !self.initial_style_rendered {
			app.style_sheets_added = app.style_sheets.len();
			self.load_style_sheets(out, app);
			self.initial_style_rendered = true;
		}
		if app.body_html_class_changed {
			self.update_body_class(out, app);
		}

		let mut s = String::new();
		self.emitter.emit_into(&mut s, &[DomChange::create("document.body", None, main_element)], EmitMode::Incremental);
		self.add_response_ack_puzzle(&mut s, app);
		if app.is_quited() {
			let _ = write!(s, "{}._p_.quit();", app_class);
		}
		self.log_js(&s, "");
		out.push_str(&s);

		self.set_js_synced(true);
		let mut js1 = core::mem::take(&mut self.collected_js1);
		let learned = self.pre_learn_stateless(app, &mut js1);
		self.log_js(&js1, "");
		out.push_str(&js1);
		learned?;

		self.update_load_indicator(out, app, true);
		app.stream_after_load_javascript(out);
		let _ = write!(out, "{{var o=null,e=null;{}}}", app.hide_loading_indicator.javascript());

		if !app.is_quited() {
			let _ = writeln!(out, "{}._p_.update(null, 'load', null, false);", app_class);
		}
		out.push_str("};\n");
		self.render_set_server_push(out, app);
		let _ = writeln!(out, "$(document).ready(function() {{ {}._p_.load(true);}});", app_class);
		self.load_script_libraries(out, app, Some(libraries_loaded));

		self.rendered = true;
		Ok(())
	}

	fn update_body_class(&self, out: &mut String, app: &mut Application) {
		let _ = write!(
			out,
			"document.body.parentNode.className={};document.body.className={};document.body.setAttribute('dir', '{}');",
			escape::js_string_literal(&app.html_class),
			escape::js_string_literal(&app.body_class_rtl()),
			match app.layout_direction() {
				crate::app::LayoutDirection::LeftToRight => "LTR",
				crate::app::LayoutDirection::RightToLeft => "RTL",
			}
		);
		app.body_html_class_changed = false;
	}

	/// Fills the primary buffers for an incremental update, splitting off invisible changes if they're large.
	///
	/// On failure, the buffers are restored to their previous content.
	#[instrument(skip(self, app))]
	fn collect_javascript(&mut self, app: &mut Application) -> core::result::Result<(), CollectionError> {
		let saved = (self.collected_js1.clone(), self.collected_js2.clone(), self.invisible_js.clone());
		let mut js1 = core::mem::take(&mut self.collected_js1);
		let mut js2 = core::mem::take(&mut self.collected_js2);

		let result = self.collect_javascript_into(app, &mut js1, &mut js2);
		self.visible_only = true;
		match result {
			Ok(()) => {
				self.collected_js1 = js1;
				self.collected_js2 = js2;
				Ok(())
			}
			Err(error) => {
				let (js1, js2, invisible) = saved;
				self.collected_js1 = js1;
				self.collected_js2 = js2;
				self.invisible_js = invisible;
				Err(error)
			}
		}
	}

	fn collect_javascript_into(&mut self, app: &mut Application, js1: &mut String, js2: &mut String) -> core::result::Result<(), CollectionError> {
		js1.push_str(&self.invisible_js);
		self.invisible_js.clear();

		self.load_style_sheets(js1, app);
		if app.body_html_class_changed {
			self.update_body_class(js1, app);
		}
		let libraries_loaded = self.load_script_libraries(js1, app, None);
		self.load_script_libraries(js2, app, Some(libraries_loaded));
		app.stream_before_load_javascript(js1, false);

		self.collect_javascript_update(js1, app)?;

		if self.visible_only {
			let mut need_fetch_invisible = false;
			self.dirty.absorb(&mut app.tree);
			if !self.dirty.is_empty() {
				need_fetch_invisible = true;
				if self.two_phase_threshold > 0 {
					self.visible_only = false;
					let mut invisible = String::new();
					let result = self.collect_javascript_update(&mut invisible, app);
					self.visible_only = true;
					result?;

					if invisible.len() < self.two_phase_threshold {
						trace!("Inlining {} bytes of invisible changes.", invisible.len());
						js1.push_str(&invisible);
						need_fetch_invisible = false;
					} else {
						trace!("Deferring {} bytes of invisible changes.", invisible.len());
						self.invisible_js = invisible;
					}
				}
			}
			if need_fetch_invisible {
				let _ = write!(js1, "{}._p_.update(null, 'none', null, false);", self.config.application_class);
			}
		}

		if app.auto_js_changed {
			let _ = write!(js1, "{}._p_.autoJavaScript=function(){{{}}};", self.config.application_class, app.auto_js);
			app.auto_js_changed = false;
		}

		if let Some(redirect) = app.take_redirect() {
			self.stream_redirect_js(js1, Some(app), &redirect);
		}
		Ok(())
	}

	/// One `{…}` block: widget changes, learned slots, form objects, after-load JavaScript and housekeeping.
	fn collect_javascript_update(&mut self, out: &mut String, app: &mut Application) -> core::result::Result<(), CollectionError> {
		out.push('{');
		self.collect_js(app, Some(out))?;
		self.pre_learn_stateless(app, out)?;

		if self.form_objects_changed {
			let form_objects = self.create_form_objects_list(app);
			if form_objects != self.current_form_objects {
				let _ = write!(out, "{}._p_.setFormObjects([{}]);", self.config.application_class, form_objects);
				self.current_form_objects = form_objects;
			}
		}

		app.stream_after_load_javascript(out);
		if app.is_quited() {
			let _ = write!(out, "{}._p_.quit();", self.config.application_class);
		}
		self.update_load_indicator(out, app, false);
		out.push('}');
		Ok(())
	}

	/// Collects the dirty widgets' changes in the current mode.
	///
	/// # Errors
	///
	/// Propagates the first widget failure.
	pub fn collect_changes(&mut self, app: &mut Application) -> core::result::Result<Vec<DomChange>, CollectionError> {
		let mode = if self.flags.pre_learning {
			CollectMode::Learning
		} else {
			CollectMode::Full { visible_only: self.visible_only }
		};
		let root = app.root();
		let changes = self.collector.collect(&mut self.dirty, &mut app.tree, &[root], mode, &mut self.flags)?;
		if !changes.is_empty() && !self.flags.pre_learning {
			self.form_objects_changed = true;
		}
		Ok(changes)
	}

	/// Collects pending changes and appends them to `js`, or discards them if `js` is `None`.
	///
	/// # Errors
	///
	/// Propagates the first widget failure.
	pub fn collect_js(&mut self, app: &mut Application, js: Option<&mut String>) -> core::result::Result<(), CollectionError> {
		let changes = self.collect_changes(app)?;
		let app_class = &self.config.application_class;

		match js {
			Some(js) => {
				if !self.flags.pre_learning {
					app.stream_before_load_javascript(js, false);
				}
				self.emitter.emit_into(js, &changes, EmitMode::Incremental);

				if app.title_changed {
					let _ = writeln!(js, "{}._p_.setTitle({});", app_class, escape::js_string_literal(app.title()));
				}
				if app.close_message_changed {
					let _ = writeln!(js, "{}._p_.setCloseMessage({});", app_class, escape::js_string_literal(app.close_message()));
				}

				let libraries_loaded = self.load_script_libraries(js, app, None);
				app.stream_after_load_javascript(js);
				if app.internal_path_changed {
					let _ = writeln!(js, "{}._p_.setHash({}, false);", app_class, escape::js_string_literal(app.internal_path()));
				}
				self.load_script_libraries(js, app, Some(libraries_loaded));
			}
			None => {
				trace!("Discarding {} change(s).", changes.len());
				app.discard_after_load_javascript();
			}
		}

		app.title_changed = false;
		app.close_message_changed = false;
		app.internal_path_changed = false;
		Ok(())
	}

	/// Rehearses (pre-learn) or records (auto-learn) the stateless slot `id`.
	///
	/// Returns the learned script, or `None` if its effect couldn't be captured.
	///
	/// # Errors
	///
	/// Propagates widget failures. The slot stays unlearned.
	#[instrument(skip(self, app))]
	pub fn learn(&mut self, app: &mut Application, id: &SlotId) -> core::result::Result<Option<String>, CollectionError> {
		let mut handler = match app.slots.take_handler(id) {
			Some(handler) => handler,
			None => {
				warn!("Stateless slot {} is unavailable for learning.", id);
				return Ok(None);
			}
		};
		let pre_learn = handler.slot_type() == SlotType::PreLearnStateless;

		app.slots.set_state(id, LearnState::Learning);
		self.flags.pre_learning = pre_learn;
		self.flags.learning_incomplete = false;

		handler.trigger(app);
		let mut js = String::new();
		let mut result = self.collect_js(app, Some(&mut js));
		trace!("learned: {}", js);

		if pre_learn {
			handler.undo_trigger(app);
			let discarded = self.collect_js(app, None);
			result = result.and(discarded);
			self.flags.pre_learning = false;
		} else if result.is_ok() {
			self.stateless_js.push_str(&js);
		}
		app.slots.restore_handler(id, handler);

		if let Err(error) = result {
			app.slots.set_state(id, LearnState::Unlearned);
			return Err(error);
		}

		let learned = if self.flags.learning_incomplete {
			trace!("Learning of {} is incomplete. It stays server-side.", id);
			app.slots.set_state(id, LearnState::Incomplete);
			None
		} else {
			let _ = write!(
				self.stateless_js,
				"{}._p_.learned({},function(){{{}}});",
				self.config.application_class,
				escape::js_string_literal(id.as_str()),
				js
			);
			app.slots.set_state(id, LearnState::Learned(js.clone()));
			Some(js)
		};
		self.flags.learning_incomplete = false;

		let mut trailing = core::mem::take(&mut self.stateless_js);
		let flushed = self.collect_js(app, Some(&mut trailing));
		self.stateless_js = trailing;
		flushed?;

		Ok(learned)
	}

	/// Flushes pending changes, then learns every rendered, not yet learned pre-learn slot.
	fn pre_learn_stateless(&mut self, app: &mut Application, out: &mut String) -> core::result::Result<(), CollectionError> {
		if !self.env.has_ajax {
			return Ok(());
		}
		self.collect_js(app, Some(out))?;

		app.slots.purge();
		for id in app.slots.unlearned(SlotType::PreLearnStateless) {
			if let Some(sender) = app.slots.sender(&id) {
				if !app.tree.is_rendered(sender) {
					continue;
				}
			}
			self.learn(app, &id)?;
		}

		out.push_str(&self.stateless_js);
		self.stateless_js.clear();
		Ok(())
	}

	/// Handles a client trigger of the stateless slot `id`.
	///
	/// # Errors
	///
	/// Propagates widget failures during learning.
	#[instrument(skip(self, app))]
	pub fn trigger_stateless(&mut self, app: &mut Application, id: &SlotId) -> core::result::Result<SlotOutcome, CollectionError> {
		let (state, slot_type) = match (app.slots.state(id), app.slots.slot_type(id)) {
			(Some(state), Some(slot_type)) => (state.clone(), slot_type),
			_ => return Ok(SlotOutcome::Unknown),
		};

		match state {
			LearnState::Learned(js) => Ok(SlotOutcome::Cached(js)),
			LearnState::Unlearned if slot_type == SlotType::AutoLearnStateless => Ok(match self.learn(app, id)? {
				Some(js) => SlotOutcome::Learned(js),
				None => SlotOutcome::ServerSide,
			}),
			_ => {
				if let Some(mut handler) = app.slots.take_handler(id) {
					handler.trigger(app);
					app.slots.restore_handler(id, handler);
				}
				Ok(SlotOutcome::ServerSide)
			}
		}
	}

	fn create_form_objects_list(&mut self, app: &Application) -> String {
		self.form_objects_changed = false;
		app.form_objects().iter().map(|id| escape::js_string_literal(id)).collect::<Vec<_>>().join(",")
	}

	/// Attaches the acknowledgement id, and a puzzle while the client still runs its first script.
	fn add_response_ack_puzzle(&mut self, out: &mut String, app: &Application) {
		let mut puzzle = None;
		if self.config.ajax_puzzle && self.expected_ack_id == self.script_id {
			let mut containers = Vec::new();
			Self::add_container_widgets(&app.tree, app.root(), &mut containers);
			if !containers.is_empty() {
				let chosen = containers[self.rng.gen_range(0..containers.len())];
				puzzle = app.tree.dom_id(chosen).map(str::to_owned);

				self.solution.clear();
				let mut current = app.tree.parent(chosen);
				while let Some(ancestor) = current {
					if let Some(dom_id) = app.tree.dom_id(ancestor) {
						if !dom_id.is_empty() && self.solution.last().map(String::as_str) != Some(dom_id) {
							self.solution.push(dom_id.to_owned());
						}
					}
					current = app.tree.parent(ancestor);
				}
				trace!("Puzzle {:?} with solution {:?}.", puzzle, self.solution);
			}
		}

		let _ = write!(out, "{}._p_.response({}", self.config.application_class, self.expected_ack_id);
		if let Some(puzzle) = puzzle {
			let _ = write!(out, ",\"{}\"", puzzle);
		}
		out.push_str(");");
	}

	fn add_container_widgets(tree: &WidgetTree, id: WidgetId, result: &mut Vec<WidgetId>) {
		for &child in tree.children(id) {
			if !tree.is_rendered(child) {
				return;
			}
			if !tree.is_hidden(child) {
				Self::add_container_widgets(tree, child, result);
			}
			if tree.widget(child).map_or(false, |widget| widget.is_container()) {
				result.push(child);
			}
		}
	}

	fn load_style_sheets(&self, out: &mut String, app: &mut Application) {
		let first = app.style_sheets.len() - app.style_sheets_added.min(app.style_sheets.len());
		for sheet in &app.style_sheets[first..] {
			let _ = writeln!(
				out,
				"{}.addStyleSheet({}, {});",
				self.config.javascript_class,
				escape::js_string_literal(&sheet.url),
				escape::js_string_literal(&sheet.media)
			);
		}
		app.style_sheets_added = 0;
	}

	/// With `count` `None`, opens an `onJsLoad` callback per newly added library and returns how many.
	/// With `Some(count)`, closes that many callbacks.
	fn load_script_libraries(&self, out: &mut String, app: &mut Application, count: Option<usize>) -> usize {
		let app_class = &self.config.application_class;
		match count {
			None => {
				let added = app.script_libraries_added.min(app.script_libraries.len());
				let first = app.script_libraries.len() - added;
				for library in &app.script_libraries[first..] {
					out.push_str(&library.before_load_js);
					let _ = writeln!(
						out,
						"{}._p_.loadScript({},{});",
						app_class,
						escape::js_string_literal(&library.uri),
						escape::js_string_literal(&library.symbol)
					);
					let mut uri = String::new();
					escape::js_string_literal_into(&mut uri, &library.uri, '"');
					let _ = writeln!(out, "{}._p_.onJsLoad({},function() {{", app_class, uri);
				}
				app.script_libraries_added = 0;
				added
			}
			Some(count) => {
				if count != 0 {
					let _ = write!(out, "{}._p_.doAutoJavaScript();", app_class);
					for _ in 0..count {
						out.push_str("});");
					}
				}
				0
			}
		}
	}

	fn update_load_indicator(&self, out: &mut String, app: &mut Application, all: bool) {
		if app.show_loading_indicator.needs_update(all) {
			let _ = writeln!(out, "showLoadingIndicator = function() {{var o=null,e=null;\n{}}};", app.show_loading_indicator.javascript());
			app.show_loading_indicator.update_ok();
		}
		if app.hide_loading_indicator.needs_update(all) {
			let _ = writeln!(out, "hideLoadingIndicator = function() {{var o=null,e=null;\n{}}};", app.hide_loading_indicator.javascript());
			app.hide_loading_indicator.update_ok();
		}
	}

	fn render_set_server_push(&self, out: &mut String, app: &mut Application) {
		if app.server_push_changed {
			let _ = write!(out, "{}._p_.setServerPush({});", self.config.application_class, app.updates_enabled());
			app.server_push_changed = false;
		}
	}

	/// Maps a failed response to the error page or script.
	pub(crate) fn serve_failure(&mut self, response: &mut Response, error: &Error, app: Option<&Application>) {
		error!("{}", error);
		let message = match self.config.error_reporting {
			ErrorReporting::NoErrors => String::new(),
			_ => error.to_string(),
		};
		self.serve_error(500, response, &message, app);
	}
}
