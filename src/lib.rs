#![doc(html_root_url = "https://docs.rs/dom-session/0.0.1")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Server-side widget trees, synchronised to a browser through incremental JavaScript.
//!
//! A [`Session`] owns one [`Application`] and its [`Renderer`].
//! Widgets report changes by marking themselves dirty, and each response carries the DOM changes
//! collected since the last one, as a script the client runtime executes.
//!
//! Handlers exposed as [stateless slots](`learn`) can be learned once and are then replayed by the client
//! without a round trip.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod app;
pub mod collect;
pub mod config;
pub mod dom;
pub mod emit;
mod error;
pub mod escape;
pub mod learn;
pub(crate) mod rc_hash_map;
pub mod renderer;
pub mod request;
pub mod session;
pub mod template;
pub mod widget;

pub use app::Application;
pub use config::Configuration;
pub use dom::{DomChange, DomElement};
pub use error::{CollectionError, Error, ProtocolError, Result, TemplateError};
pub use learn::{SlotId, SlotType, StatelessSlot};
pub use renderer::Renderer;
pub use request::{Environment, Request, Response, ResponseType};
pub use session::{PushHandle, Session};
pub use widget::{RenderContext, Widget, WidgetId, WidgetTree};
