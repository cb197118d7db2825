//! Error types for the resilient MQTT client
//!
//! Initial connection failures propagate to the caller. Everything that can go
//! wrong in steady state (reconnects, resubscription, decoding, handlers) is
//! contained inside the supervisor and router and only logged; the types for
//! those failures still exist so they can be logged and counted consistently.

use thiserror::Error;

/// Boxed transport error carried as a `#[source]`
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Initial (or externally requested) connection failed
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Connection to broker failed")]
    Transport(#[source] BoxError),
    #[error("Supervisor has been shut down")]
    ShutDown,
}

/// Subscribe request failed; the topic is still recorded for replay
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Subscription to '{topic}' failed")]
    Transport {
        topic: String,
        #[source]
        source: BoxError,
    },
    #[error("Not connected, '{topic}' will be subscribed on the next connect")]
    NotConnected { topic: String },
    #[error("Supervisor has been shut down, '{topic}' not subscribed")]
    ShutDown { topic: String },
}

impl SubscribeError {
    /// Topic the failed request was for
    pub fn topic(&self) -> &str {
        match self {
            SubscribeError::Transport { topic, .. } => topic,
            SubscribeError::NotConnected { topic } => topic,
            SubscribeError::ShutDown { topic } => topic,
        }
    }
}

/// Publish request failed
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publishing to '{topic}' failed")]
    Transport {
        topic: String,
        #[source]
        source: BoxError,
    },
    #[error("Supervisor has been shut down")]
    ShutDown,
}

/// Payload could not be converted to the payload kind of a route
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON payload for {type_name}: {source}")]
    Json {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A message handler failed
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {message}")]
    Failed { message: String },
    #[error("Handler panicked: {message}")]
    Panicked { message: String },
}

impl HandlerError {
    /// Create a handler failure from anything printable
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Build a panic error from the payload caught by `catch_unwind`
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }
}

/// Route registration errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Topic pattern '{pattern}' failed to compile")]
    Compile {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Top-level error for wiring and the command line
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::mqtt::MqttError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Result alias for wiring code
pub type ClientResult<T> = Result<T, ClientError>;
