//! Structured logging setup and span macros
//!
//! Library code only emits `tracing` records inside the span injected into each
//! component; installing a global subscriber is left to the binary through
//! [`init_logging`] or [`init_default_logging`].
//!
//! ## Log Format Options
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON format for production and log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation for development
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! # Production JSON logging
//! LOG_FORMAT=json LOG_LEVEL=INFO resilient-mqtt run
//!
//! # Watch reconnect decisions while developing
//! LOG_FORMAT=pretty RUST_LOG=resilient_mqtt=debug resilient-mqtt run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string, defaulting to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a level name, defaulting to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn span_events(include_spans: bool) -> fmt::format::FmtSpan {
    if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    }
}

/// Install the global subscriber
///
/// A second call keeps the first subscriber and reports the conflict on stderr.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    // rumqttc logs every reconnect of its own at info; keep it quiet by default
    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => EnvFilter::new(format!("{level},rumqttc=warn,tokio=warn")),
    };

    let spans = span_events(include_spans);
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => fmt::layer().json().with_span_events(spans).boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(true)
            .with_span_events(spans)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(true)
            .with_target(false)
            .with_span_events(spans)
            .boxed(),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
    {
        eprintln!("Logging already initialized: {e}");
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    let include_spans = env::var("LOG_SPANS")
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false);

    init_logging(level, format, include_spans);
}

/// Create the span a connection supervisor logs under
#[macro_export]
macro_rules! supervisor_span {
    ($($field:tt)*) => {
        tracing::info_span!("connection_supervisor", $($field)*)
    };
}

/// Create the span a topic router logs under
#[macro_export]
macro_rules! router_span {
    ($($field:tt)*) => {
        tracing::info_span!("topic_router", $($field)*)
    };
}
