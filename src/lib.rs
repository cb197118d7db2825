//! Resilient MQTT client
//!
//! A client layer that keeps an MQTT session alive across broker outages and
//! routes incoming messages to typed handlers.
//!
//! # Overview
//!
//! - [`supervisor::ConnectionSupervisor`] owns the session, reconnects with
//!   exponential backoff after a loss and replays every recorded subscription
//! - [`router::TopicRouter`] maps MQTT topic filters (`+`, `#`) to decoders and
//!   handlers and fans each message out to every matching route
//! - [`transport::MqttTransport`] is the production transport over rumqttc
//! - [`factory`] wires all of it from a [`ClientConfig`]
//!
//! # Quick Start
//!
//! ```rust
//! use resilient_mqtt::router::{handler_fn, TextDecoder, TopicRouter};
//! use resilient_mqtt::HandlerError;
//! use rumqttc::v5::mqttbytes::QoS;
//!
//! let router = TopicRouter::new();
//! router
//!     .register(
//!         "sensors/+/temp",
//!         TextDecoder,
//!         handler_fn(|topic: String, reading: String| async move {
//!             println!("{topic}: {reading}");
//!             Ok::<(), HandlerError>(())
//!         }),
//!         QoS::AtLeastOnce,
//!     )
//!     .unwrap();
//!
//! assert_eq!(router.list_registered_patterns(), vec!["sensors/+/temp"]);
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod observability;
pub mod router;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use error::{
    ClientError, ClientResult, ConnectError, DecodeError, HandlerError, PublishError, RouterError,
    SubscribeError,
};
pub use router::{DispatchReport, TopicRouter};
pub use supervisor::{
    ConnectionObserver, ConnectionSupervisor, ReconnectPolicy, SupervisorBuilder, SupervisorState,
};
pub use transport::mqtt::MqttTransport;
pub use transport::{Transport, TransportCallback};
