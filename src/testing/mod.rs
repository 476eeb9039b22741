//! Testing utilities and mock implementations
//!
//! Doubles for the transport, the broker subscribe path and the decode API,
//! so the bridge can be exercised without a broker or network access.

pub mod mocks;

pub use mocks::*;
