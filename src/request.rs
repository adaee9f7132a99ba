//! The HTTP-facing surface, reduced to what response building needs.

use crate::error::ProtocolError;
use std::collections::BTreeMap;

/// What the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
	/// An HTML page: the bootstrap page or the main page.
	Page,
	/// The framework script and the application's first paint.
	Script,
	/// An incremental JavaScript update.
	Update,
}

/// Client capabilities and deployment details, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
	pub has_ajax: bool,
	pub agent_is_spider_bot: bool,
	pub xhtml: bool,
	pub deployment_path: String,
	/// The internal path of the first request.
	pub internal_path: String,
	/// Whether internal paths are kept in the URL fragment rather than the path.
	pub hash_internal_paths: bool,
}

impl Default for Environment {
	fn default() -> Self {
		Self {
			has_ajax: true,
			agent_is_spider_bot: false,
			xhtml: false,
			deployment_path: "/".to_owned(),
			internal_path: String::new(),
			hash_internal_paths: false,
		}
	}
}

impl Environment {
	#[must_use]
	pub fn plain() -> Self {
		Self {
			has_ajax: false,
			..Self::default()
		}
	}

	#[must_use]
	pub fn content_type(&self) -> &'static str {
		if self.xhtml {
			"application/xhtml+xml; charset=UTF-8"
		} else {
			"text/html; charset=UTF-8"
		}
	}
}

#[derive(Debug, Clone)]
pub struct Request {
	response_type: ResponseType,
	parameters: BTreeMap<String, String>,
}

impl Request {
	#[must_use]
	pub fn new(response_type: ResponseType) -> Self {
		Self {
			response_type,
			parameters: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.parameters.insert(name.into(), value.into());
		self
	}

	#[must_use]
	pub fn response_type(&self) -> ResponseType {
		self.response_type
	}

	#[must_use]
	pub fn parameter(&self, name: &str) -> Option<&str> {
		self.parameters.get(name).map(String::as_str)
	}

	/// The acknowledged response id, if the request carries one.
	///
	/// # Errors
	///
	/// [`ProtocolError::MalformedAck`] iff the parameter is present but not a response id.
	pub fn ack_id(&self) -> Result<Option<u32>, ProtocolError> {
		match self.parameter("ackId") {
			None => Ok(None),
			Some(ack_id) => ack_id.parse().map(Some).map_err(|_| ProtocolError::MalformedAck(ack_id.to_owned())),
		}
	}

	/// The comma-separated ancestor chain answering the last puzzle.
	#[must_use]
	pub fn ack_puzzle(&self) -> Option<&str> {
		self.parameter("ackPuzzle")
	}

	/// `(sender DOM id, signal name)` of the event this request carries, if any.
	#[must_use]
	pub fn event(&self) -> Option<(&str, &str)> {
		let signal = self.parameter("signal")?;
		Some((self.parameter("id").unwrap_or("app"), signal))
	}

	/// Whether only the cacheable framework skeleton is requested.
	#[must_use]
	pub fn is_skeleton(&self) -> bool {
		self.parameter("skeleton").is_some()
	}

	/// Whether the client reported that it can't run JavaScript.
	#[must_use]
	pub fn no_javascript(&self) -> bool {
		self.parameter("js") == Some("no")
	}
}

#[derive(Debug, Clone)]
pub struct Response {
	response_type: ResponseType,
	status: u16,
	headers: Vec<(String, String)>,
	content_type: String,
	body: String,
}

impl Response {
	#[must_use]
	pub fn new(response_type: ResponseType) -> Self {
		Self {
			response_type,
			status: 200,
			headers: Vec::new(),
			content_type: String::new(),
			body: String::new(),
		}
	}

	#[must_use]
	pub fn response_type(&self) -> ResponseType {
		self.response_type
	}

	#[must_use]
	pub fn status(&self) -> u16 {
		self.status
	}

	pub fn set_status(&mut self, status: u16) {
		self.status = status;
	}

	#[must_use]
	pub fn content_type(&self) -> &str {
		&self.content_type
	}

	pub fn set_content_type(&mut self, content_type: impl Into<String>) {
		self.content_type = content_type.into();
	}

	pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.headers.push((name.into(), value.into()));
	}

	/// The first value of header `name` (case-insensitive).
	#[must_use]
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
	}

	#[must_use]
	pub fn headers(&self) -> &[(String, String)] {
		&self.headers
	}

	pub fn out(&mut self) -> &mut String {
		&mut self.body
	}

	#[must_use]
	pub fn body(&self) -> &str {
		&self.body
	}

	pub fn send_redirect(&mut self, url: impl Into<String>) {
		self.status = 302;
		self.add_header("Location", url);
	}

	/// Cacheable for a month (private), or not at all.
	pub fn set_caching(&mut self, allow_cache: bool) {
		if allow_cache {
			self.add_header("Cache-Control", "max-age=2592000,private");
		} else {
			self.add_header("Cache-Control", "no-cache, no-store, must-revalidate");
			self.add_header("Pragma", "no-cache");
			self.add_header("Expires", "0");
		}
	}
}
