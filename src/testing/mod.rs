//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for testing the supervisor and
//! router without requiring an MQTT broker.

pub mod mocks;

pub use mocks::*;
