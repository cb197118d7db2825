//! MQTT v5 transport over rumqttc
//!
//! This module provides a decomposed MQTT client implementation that
//! separates pure functions from I/O operations for better testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, broker URL parsing and option building
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`client`] - Impure I/O: the event-loop pump and the [`Transport`](crate::transport::Transport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use resilient_mqtt::config::ClientConfig;
//! use resilient_mqtt::transport::mqtt::{MqttConnectOptions, MqttTransport};
//! use resilient_mqtt::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig::default();
//! let transport = MqttTransport::new(MqttConnectOptions::from_config(&config))?;
//! transport.connect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{
    configure_mqtt_options, parse_broker_url, qos_from_u8, BrokerAddress, ConnectionState,
    MqttConnectOptions, MqttError,
};
pub use message_handler::{EventRoute, MessageHandler};
