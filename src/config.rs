//! Process-wide renderer configuration.
//!
//! Values are layered, lowest priority first:
//! 1. built-in defaults,
//! 2. an optional TOML file,
//! 3. `DOM_SESSION__*` environment variables (e.g. `DOM_SESSION__TWO_PHASE_THRESHOLD=8000`).
//!
//! A loaded [`Configuration`] is read-only and shared between sessions through an [`Arc`](`std::sync::Arc`).

use crate::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// How much detail the client-side error handler reveals.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReporting {
	NoErrors,
	ErrorMessage,
	ErrorMessageWithStack,
}

impl Default for ErrorReporting {
	fn default() -> Self {
		Self::ErrorMessage
	}
}

#[derive(Debug, Deserialize, Clone)]
pub struct Configuration {
	/// Size in bytes below which changes to invisible widgets are inlined into the current response.
	///
	/// `0` disables the second phase entirely: invisible widgets are always fetched by a follow-up request.
	#[serde(default = "default_two_phase_threshold")]
	pub two_phase_threshold: usize,

	/// How many already-acknowledged response ids are still accepted (retried requests).
	#[serde(default = "default_ack_tolerance")]
	pub ack_tolerance: u32,

	/// Attach an ancestor-chain puzzle to the first script response.
	#[serde(default)]
	pub ajax_puzzle: bool,

	/// Session idle timeout in seconds. `None` means sessions never expire.
	#[serde(default = "default_session_timeout")]
	pub session_timeout: Option<u32>,

	/// Delay before the client shows its loading indicator (milliseconds).
	#[serde(default = "default_indicator_timeout")]
	pub indicator_timeout: u32,

	/// Long-poll timeout for server push (seconds).
	#[serde(default = "default_server_push_timeout")]
	pub server_push_timeout: u32,

	/// Serve the framework skeleton separately (cacheable) from the session-specific script.
	#[serde(default)]
	pub split_script: bool,

	/// Inline the application style sheet into the page instead of linking it.
	#[serde(default)]
	pub inline_css: bool,

	#[serde(default)]
	pub error_reporting: ErrorReporting,

	#[serde(default)]
	pub serialized_events: bool,

	#[serde(default)]
	pub web_sockets: bool,

	#[serde(default)]
	pub reload_is_new_session: bool,

	/// Shown to clients without JavaScript support.
	#[serde(default = "default_redirect_message")]
	pub redirect_message: String,

	/// Name of the framework's client-side runtime object.
	#[serde(default = "default_javascript_class")]
	pub javascript_class: String,

	/// Name of the application's client-side object, which exposes `_p_`.
	#[serde(default = "default_application_class")]
	pub application_class: String,
}

impl Default for Configuration {
	fn default() -> Self {
		Self {
			two_phase_threshold: default_two_phase_threshold(),
			ack_tolerance: default_ack_tolerance(),
			ajax_puzzle: false,
			session_timeout: default_session_timeout(),
			indicator_timeout: default_indicator_timeout(),
			server_push_timeout: default_server_push_timeout(),
			split_script: false,
			inline_css: false,
			error_reporting: ErrorReporting::default(),
			serialized_events: false,
			web_sockets: false,
			reload_is_new_session: false,
			redirect_message: default_redirect_message(),
			javascript_class: default_javascript_class(),
			application_class: default_application_class(),
		}
	}
}

impl Configuration {
	/// Loads the configuration from `path` (if any) and the environment.
	///
	/// # Errors
	///
	/// Iff the file is unreadable or a value has the wrong type.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let mut builder = Config::builder();
		if let Some(path) = path {
			builder = builder.add_source(File::from(path).required(true));
		}
		builder = builder.add_source(
			Environment::with_prefix("DOM_SESSION")
				.prefix_separator("__")
				.separator("__")
				.ignore_empty(true)
				.try_parsing(true),
		);

		Ok(builder.build()?.try_deserialize()?)
	}

	/// Half the session timeout in seconds, or effectively never.
	#[must_use]
	pub fn keep_alive(&self) -> u32 {
		self.session_timeout.map_or(1_000_000, |timeout| timeout / 2)
	}
}

fn default_two_phase_threshold() -> usize {
	5000
}
fn default_ack_tolerance() -> u32 {
	5
}
fn default_session_timeout() -> Option<u32> {
	Some(600)
}
fn default_indicator_timeout() -> u32 {
	500
}
fn default_server_push_timeout() -> u32 {
	50
}
fn default_redirect_message() -> String {
	"Load basic HTML".to_owned()
}
fn default_javascript_class() -> String {
	"Wt".to_owned()
}
fn default_application_class() -> String {
	"Wt".to_owned()
}
