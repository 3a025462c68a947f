//! Chat stream event protocol: type + payload.
//!
//! One crate so the chat service, the HTTP layer, and clients agree on the
//! wire shape of streamed events without depending on the core library.

mod event;

pub use event::ChatEvent;
