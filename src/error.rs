//! Error types of the session renderer.
//!
//! Only [`CollectionError`]s abort a response. Protocol anomalies are expected at runtime and are
//! answered with reload or rejection responses instead, see [`Session`](`crate::session::Session`).

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// A widget failed to compute its DOM changes.
	#[error(transparent)]
	Collection(#[from] CollectionError),

	/// Configuration could not be loaded or deserialised.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// A script or page template could not be expanded.
	#[error(transparent)]
	Template(#[from] TemplateError),

	/// The client is out of sync with the session.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
}

/// Raised by [`Widget::compute_dom_changes`](`crate::widget::Widget::compute_dom_changes`).
///
/// Never retried: the renderer stops processing further widgets for the current request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Widget {widget} failed to compute its DOM changes: {message}")]
pub struct CollectionError {
	pub widget: String,
	pub message: String,
}

impl CollectionError {
	#[must_use]
	pub fn new(widget: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			widget: widget.into(),
			message: message.into(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
	#[error("Unexpected acknowledgement {received} (expected {expected})")]
	AckMismatch { expected: u32, received: u32 },

	#[error("Malformed acknowledgement {0:?}")]
	MalformedAck(String),

	#[error("Ajax puzzle fail")]
	PuzzleFailure,

	#[error("The session has quit")]
	SessionQuit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
	#[error("No value set for template variable `{0}`")]
	UnknownVariable(String),

	#[error("Unbalanced `#if`/`#endif` in template (line {line})")]
	UnbalancedCondition { line: usize },

	#[error("Template marker `{0}` not found")]
	MissingMarker(String),

	#[error("No value set for template condition `{0}`")]
	UnknownCondition(String),
}
