//! In-memory host document for the rivulet runtime.
//!
//! [`Document`] implements [`rivulet_core::Host`] without any platform: nodes live in an arena,
//! events are dispatched synchronously with bubbling, and timers run on a virtual clock that
//! only moves when [`Document::advance`] is called. It backs the runtime's own tests and is
//! handy for server-side rendering through [`Document::to_html`].

mod clock;
mod document;

pub use document::Document;
