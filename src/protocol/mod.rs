//! Message types and topic handling for the LNS uplink bridge
//!
//! This module holds the inbound uplink envelope, the two outbound message
//! shapes, and MQTT topic utilities shared by the transport and the bridge.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
