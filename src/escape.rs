//! Context-specific escaping.
//!
//! HTML attribute values, HTML text and JavaScript string literals each get their own function:
//! quotes and apostrophes are hazardous in different contexts.

use core::fmt::Write as _;

/// Escapes `text` for use as HTML character data.
pub fn html_text(out: &mut String, text: &str) {
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			c => out.push(c),
		}
	}
}

/// Escapes `value` for use inside a double-quoted HTML attribute.
pub fn html_attribute(out: &mut String, value: &str) {
	for c in value.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'"' => out.push_str("&#34;"),
			c => out.push(c),
		}
	}
}

/// Appends `value` as a quoted JavaScript string literal, using `delimiter` (`'` or `"`).
///
/// `</` is broken up so that the literal can't terminate an enclosing `<script>` element.
pub fn js_string_literal_into(out: &mut String, value: &str, delimiter: char) {
	debug_assert!(delimiter == '\'' || delimiter == '"');
	out.push(delimiter);
	let mut previous = '\0';
	for c in value.chars() {
		match c {
			'\\' => out.push_str("\\\\"),
			'\n' => out.push_str("\\n"),
			'\r' => out.push_str("\\r"),
			'\t' => out.push_str("\\t"),
			'\u{2028}' => out.push_str("\\u2028"),
			'\u{2029}' => out.push_str("\\u2029"),
			'/' if previous == '<' => out.push_str("\\/"),
			c if c == delimiter => {
				out.push('\\');
				out.push(c);
			}
			c if (c as u32) < 0x20 => {
				let _ = write!(out, "\\x{:02x}", c as u32);
			}
			c => out.push(c),
		}
		previous = c;
	}
	out.push(delimiter);
}

/// `'`-delimited JavaScript string literal.
#[must_use]
pub fn js_string_literal(value: &str) -> String {
	let mut out = String::with_capacity(value.len() + 2);
	js_string_literal_into(&mut out, value, '\'');
	out
}

#[must_use]
pub fn html_attribute_value(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	html_attribute(&mut out, value);
	out
}

#[must_use]
pub fn escape_text(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	html_text(&mut out, text);
	out
}
