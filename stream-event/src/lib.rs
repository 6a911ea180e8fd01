//! Stream event protocol: the wire shape of one Run event.
//!
//! This crate defines `EventPayload` (the `type` + fields) and `Envelope`
//! (`eventId`, `runId`, `ts` wrapped around a payload). It has no dependency
//! on the runtime crate so it can be shared by the runtime, `serve`, and any
//! other consumer of the event stream.

pub mod envelope;
pub mod event;

pub use envelope::{Envelope, EnvelopeState};
pub use event::EventPayload;
