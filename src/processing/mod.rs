//! Uplink transformation
//!
//! Path resolution, value coercion and timestamp normalization are pure
//! helpers; [`Processor`] composes them with the decoder to turn one raw LNS
//! uplink into flat sensor outputs and an optional historian write payload.

pub mod coercion;
pub mod path;
pub mod processor;
pub mod timestamp;
pub mod write_payload;

pub use coercion::as_bool;
pub use path::PathResolver;
pub use processor::{ProcessedMessage, Processor, PropertyMapping};
pub use timestamp::normalize_timestamp;
pub use write_payload::build_write_payload;
