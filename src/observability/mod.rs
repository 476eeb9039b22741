//! Observability for the bridge
//!
//! Structured logging with `tracing`; stdout only.

pub mod logging;

pub use logging::{init_default_logging, init_from_config, init_logging, LogFormat, LogSettings};

// Span macros for structured logging
pub use logging::{message_span, mqtt_span};
