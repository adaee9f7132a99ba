//! Minimal text templates for the bootstrap page, the main page and the framework script.
//!
//! - `${NAME}` is replaced by the value set through [`Template::set_var`].
//! - A line `#if NAME` or `#if !NAME` opens a conditional block, `#else` flips it and `#endif` closes it.
//!   Directive lines themselves are never written. Blocks nest.
//!
//! A template can be streamed in several parts ([`Template::stream_until`]), so that variables
//! further down may be set only after the first part has been written.

use crate::error::TemplateError;
use core::fmt::Display;
use hashbrown::HashMap;
use std::borrow::Cow;

pub const BOOT_HTML: &str = include_str!("templates/boot.html");
pub const BOOT_JS: &str = include_str!("templates/boot.js");
pub const PAGE_HTML: &str = include_str!("templates/page.html");
pub const WT_JS: &str = include_str!("templates/wt.js");

#[derive(Debug, Clone)]
pub struct Template {
	source: Cow<'static, str>,
	vars: HashMap<String, String>,
	conditions: HashMap<String, bool>,
	position: usize,
	/// One entry per open `#if`: whether its current branch is taken.
	active: Vec<bool>,
	/// Set after [`Template::stream_until`] stopped inside a line, where no directive can start.
	mid_line: bool,
}

impl Template {
	#[must_use]
	pub fn new(source: impl Into<Cow<'static, str>>) -> Self {
		Self {
			source: source.into(),
			vars: HashMap::new(),
			conditions: HashMap::new(),
			position: 0,
			active: Vec::new(),
			mid_line: false,
		}
	}

	pub fn set_var(&mut self, name: &str, value: impl Display) -> &mut Self {
		self.vars.insert(name.to_owned(), value.to_string());
		self
	}

	pub fn set_condition(&mut self, name: &str, value: bool) -> &mut Self {
		self.conditions.insert(name.to_owned(), value);
		self
	}

	/// Writes the rest of the template.
	///
	/// # Errors
	///
	/// Iff a variable or condition has no value, or `#if`/`#endif` don't balance.
	pub fn stream(&mut self, out: &mut String) -> Result<(), TemplateError> {
		self.stream_inner(out, None).map(|_| ())
	}

	/// Writes the template up to (excluding) the variable `${marker}`, which is consumed.
	///
	/// # Errors
	///
	/// [`TemplateError::MissingMarker`] iff the marker doesn't occur in an active part of the rest of the template,
	/// in addition to the errors of [`Template::stream`].
	pub fn stream_until(&mut self, out: &mut String, marker: &str) -> Result<(), TemplateError> {
		if self.stream_inner(out, Some(marker))? {
			Ok(())
		} else {
			Err(TemplateError::MissingMarker(marker.to_owned()))
		}
	}

	fn is_active(&self) -> bool {
		self.active.iter().all(|&active| active)
	}

	fn line_number(&self) -> usize {
		self.source[..self.position].matches('\n').count() + 1
	}

	fn condition(&self, name: &str) -> Result<bool, TemplateError> {
		let (name, negated) = match name.strip_prefix('!') {
			Some(name) => (name.trim(), true),
			None => (name, false),
		};
		self.conditions
			.get(name)
			.map(|&value| value != negated)
			.ok_or_else(|| TemplateError::UnknownCondition(name.to_owned()))
	}

	/// Returns whether `until` was found.
	fn stream_inner(&mut self, out: &mut String, until: Option<&str>) -> Result<bool, TemplateError> {
		let source = self.source.clone();
		while self.position < source.len() {
			let line_end = source[self.position..].find('\n').map_or(source.len(), |i| self.position + i + 1);
			let line = &source[self.position..line_end];

			if !self.mid_line {
				let directive = line.trim_end();
				if let Some(condition) = directive.strip_prefix("#if ") {
					let value = self.condition(condition.trim())?;
					self.active.push(value);
					self.position = line_end;
					continue;
				} else if directive == "#else" {
					match self.active.last_mut() {
						Some(active) => *active = !*active,
						None => return Err(TemplateError::UnbalancedCondition { line: self.line_number() }),
					}
					self.position = line_end;
					continue;
				} else if directive == "#endif" {
					if self.active.pop().is_none() {
						return Err(TemplateError::UnbalancedCondition { line: self.line_number() });
					}
					self.position = line_end;
					continue;
				}
			}
			self.mid_line = false;

			if !self.is_active() {
				self.position = line_end;
				continue;
			}

			let mut rest = line;
			while let Some(start) = rest.find("${") {
				let end = match rest[start..].find('}') {
					Some(end) => start + end,
					None => break,
				};
				out.push_str(&rest[..start]);
				let name = &rest[start + 2..end];
				let consumed = line.len() - rest.len() + end + 1;
				if Some(name) == until {
					self.position += consumed;
					self.mid_line = self.position < line_end;
					return Ok(true);
				}
				match self.vars.get(name) {
					Some(value) => out.push_str(value),
					None => return Err(TemplateError::UnknownVariable(name.to_owned())),
				}
				rest = &rest[end + 1..];
			}
			out.push_str(rest);
			self.position = line_end;
		}

		if self.active.is_empty() {
			Ok(false)
		} else {
			Err(TemplateError::UnbalancedCondition { line: self.line_number() })
		}
	}
}
