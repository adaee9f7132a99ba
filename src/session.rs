//! One user's session: the serialisation point for all requests and server-push updates.

use crate::{
	app::Application,
	config::Configuration,
	error::{Error, ProtocolError},
	learn::{SlotId, SlotOutcome},
	renderer::Renderer,
	request::{Environment, Request, Response, ResponseType},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, trace, trace_span, warn};

/// Signals the client runtime sends on its own, without a sender widget.
const CLIENT_SIGNALS: &[&str] = &["load", "none", "poll", "keepAlive", "hash"];

pub type EntryPoint = Box<dyn Fn(&Environment) -> Application + Send>;

type PushUpdate = Box<dyn FnOnce(&mut Application) + Send>;

/// Queues application updates from other threads.
///
/// Updates are applied by the session before it collects changes, never concurrently with a collection.
#[derive(Clone, Default)]
pub struct PushHandle(Arc<Mutex<Vec<PushUpdate>>>);

impl core::fmt::Debug for PushHandle {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_tuple("PushHandle").field(&self.0.lock().len()).finish()
	}
}

impl PushHandle {
	pub fn push(&self, update: impl FnOnce(&mut Application) + Send + 'static) {
		self.0.lock().push(Box::new(update));
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.lock().is_empty()
	}

	fn drain(&self) -> Vec<PushUpdate> {
		core::mem::take(&mut *self.0.lock())
	}
}

pub struct Session {
	id: String,
	renderer: Renderer,
	app: Option<Application>,
	entry: EntryPoint,
	push: PushHandle,
	quit: bool,
}

impl core::fmt::Debug for Session {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("renderer", &self.renderer)
			.field("app", &self.app)
			.field("quit", &self.quit)
			.finish()
	}
}

impl Session {
	/// Creates a session. `entry` creates the application once the client's capabilities are known.
	pub fn new(
		id: impl Into<String>,
		config: Arc<Configuration>,
		env: Environment,
		entry: impl Fn(&Environment) -> Application + Send + 'static,
	) -> Self {
		let id = id.into();
		Self {
			renderer: Renderer::new(config, env, id.clone()),
			id,
			app: None,
			entry: Box::new(entry),
			push: PushHandle::default(),
			quit: false,
		}
	}

	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	#[must_use]
	pub fn renderer(&self) -> &Renderer {
		&self.renderer
	}

	pub fn renderer_mut(&mut self) -> &mut Renderer {
		&mut self.renderer
	}

	#[must_use]
	pub fn app(&self) -> Option<&Application> {
		self.app.as_ref()
	}

	pub fn app_mut(&mut self) -> Option<&mut Application> {
		self.app.as_mut()
	}

	/// A handle for updating the application from other threads.
	#[must_use]
	pub fn push_handle(&self) -> PushHandle {
		self.push.clone()
	}

	/// Whether the application has quit and its final response was served.
	#[must_use]
	pub fn is_quited(&self) -> bool {
		self.quit
	}

	fn start_application(&mut self, has_ajax: bool) {
		if self.app.is_none() {
			if !has_ajax {
				self.renderer.disable_ajax();
			}
			info!(session = self.id.as_str(), has_ajax, "Starting application.");
			self.app = Some((self.entry)(self.renderer.environment()));
		}
	}

	/// Answers `request`. Failures are turned into error or reload responses.
	pub fn handle_request(&mut self, request: &Request) -> Response {
		let span = trace_span!("Handling request", session = self.id.as_str(), response_type = ?request.response_type());
		let _enter = span.enter();

		let mut response = Response::new(request.response_type());
		if self.quit {
			self.serve_quit(&mut response);
			return response;
		}

		if request.parameter("request") == Some("style") {
			if let Some(app) = self.app.as_mut() {
				self.renderer.serve_linked_css(&mut response, app);
			} else {
				response.set_content_type("text/css");
			}
			return response;
		}

		match request.response_type() {
			ResponseType::Page => {
				if self.app.is_none() && (request.no_javascript() || !self.renderer.environment().has_ajax || self.renderer.environment().agent_is_spider_bot) {
					self.start_application(false);
				}
			}
			ResponseType::Script => self.start_application(true),
			ResponseType::Update => {
				if self.app.is_none() {
					warn!("Update request before the application was started. Reloading.");
					self.renderer.let_reload_js(&mut response, false);
					return response;
				}

				let ack_id = match request.ack_id() {
					Ok(ack_id) => ack_id,
					Err(error) => {
						warn!("{}. Letting the client reload.", error);
						self.renderer.let_reload_js(&mut response, false);
						return response;
					}
				};
				if let Some(ack_id) = ack_id {
					if !self.renderer.accepts_ack(ack_id) {
						let error = ProtocolError::AckMismatch {
							expected: self.renderer.expected_ack_id(),
							received: ack_id,
						};
						warn!("{}. Letting the client reload.", error);
						self.renderer.let_reload_js(&mut response, false);
						return response;
					}
				}

				// A rejected request must leave the acknowledgement state alone.
				if self.renderer.check_response_puzzle(request).is_err() {
					response.set_status(403);
					return response;
				}
				if let Some(ack_id) = ack_id {
					self.renderer.ack_update(ack_id);
				}

				if let Err(error) = self.process_request(request) {
					self.renderer.serve_failure(&mut response, &error, self.app.as_ref());
					return response;
				}
			}
		}

		if let Err(error) = self.renderer.serve_response(request, &mut response, self.app.as_mut()) {
			response = Response::new(request.response_type());
			self.renderer.serve_failure(&mut response, &error, self.app.as_ref());
		}

		if self.app.as_ref().map_or(false, Application::is_quited) {
			info!(session = self.id.as_str(), "Application quit.");
			self.quit = true;
		}
		response
	}

	/// Applies queued push updates and form values, then dispatches the request's event.
	fn process_request(&mut self, request: &Request) -> Result<(), Error> {
		let app = match self.app.as_mut() {
			Some(app) => app,
			None => return Ok(()),
		};

		for update in self.push.drain() {
			update(app);
		}

		for dom_id in app.form_objects() {
			if let Some(value) = request.parameter(&dom_id) {
				if let Some(widget) = app.tree.find_by_dom_id(&dom_id) {
					if let Some(widget) = app.tree.widget_mut(widget) {
						widget.set_form_data(value);
					}
				}
			}
		}

		let (sender, signal) = match request.event() {
			Some(event) => event,
			None => return Ok(()),
		};

		let slot = SlotId::new(sender, signal);
		match self.renderer.trigger_stateless(app, &slot)? {
			SlotOutcome::Cached(js) => {
				// The client only asks if it didn't have the script yet.
				trace!("Replaying learned slot {}.", slot);
				app.do_javascript(&js);
			}
			SlotOutcome::Learned(_) | SlotOutcome::ServerSide => (),
			SlotOutcome::Unknown => {
				if request.parameter("id").is_none() && CLIENT_SIGNALS.contains(&signal) {
					trace!("Client signal {}.", signal);
					if signal == "none" || signal == "load" {
						// The client asks for what was held back.
						self.renderer.set_visible_only(false);
					}
				} else {
					app.handle_event(sender, signal);
				}
			}
		}
		Ok(())
	}

	/// Applies queued push updates and returns an update response if anything changed.
	///
	/// Returns `None` before the first paint, after quitting, and if there is nothing new to send.
	/// Responses the client hasn't acknowledged yet are not sent again.
	pub fn poll_push(&mut self) -> Option<Response> {
		if self.quit || !self.renderer.is_rendered() {
			return None;
		}
		let app = self.app.as_mut()?;
		for update in self.push.drain() {
			update(app);
		}
		if !self.renderer.has_changes(app) {
			return None;
		}

		let mut response = Response::new(ResponseType::Update);
		if let Err(error) = self.renderer.serve_push(&mut response, app) {
			response = Response::new(ResponseType::Update);
			self.renderer.serve_failure(&mut response, &error, self.app.as_ref());
		}
		if self.app.as_ref().map_or(false, Application::is_quited) {
			self.quit = true;
		}
		Some(response)
	}

	fn serve_quit(&mut self, response: &mut Response) {
		let error = Error::from(ProtocolError::SessionQuit);
		trace!("{}", error);
		match response.response_type() {
			ResponseType::Page => self.renderer.serve_error(410, response, &error.to_string(), None),
			ResponseType::Script | ResponseType::Update => {
				response.set_caching(false);
				response.set_content_type("text/javascript; charset=UTF-8");
				let app_class = self.renderer.config().application_class.clone();
				response.out().push_str(&format!("{}._p_.quit();", app_class));
			}
		}
	}
}
