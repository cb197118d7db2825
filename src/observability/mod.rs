//! Observability: structured logging setup and per-supervisor statistics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{StatsSnapshot, SupervisorStats};

// Span macros for structured logging
pub use crate::{router_span, supervisor_span};
