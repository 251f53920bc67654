//! Core types for the host runtime
//!
//! The fundamental types passed between the event bus, the service registry
//! and components: Event, Context and ServiceCall.

mod context;
mod event;
mod service_call;

pub use context::Context;
pub use event::{Event, EventData, EventOrigin, EventType};
pub use service_call::{ServiceCall, SupportsResponse};

/// Standard event types fired by the host
pub mod events {
    /// Fired once all config entries have been set up
    pub const HOMEASSISTANT_START: &str = "homeassistant_start";

    /// Fired when shutdown begins
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";
}
