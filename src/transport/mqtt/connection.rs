//! Pure connection state management for the MQTT transport
//!
//! This module contains pure functions for connection state, broker URL
//! parsing and rumqttc option construction.

use crate::config::ClientConfig;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state of one transport session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Never connected, or a new session is being opened
    Connecting,
    /// ConnAck received, ready for operations
    Connected,
    /// Session ended, with reason
    Disconnected(String),
    /// Transport released by `close`
    Closed,
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("ConnAck timeout after {0:?} - no connection confirmation received")]
    ConnectTimeout(Duration),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Everything needed to open a session
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConnectOptions {
    pub broker_url: String,
    /// Client id as configured; the transport adds a per-instance suffix
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl MqttConnectOptions {
    /// Collect options from the client configuration, resolving credentials
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            broker_url: config.mqtt.broker_url.clone(),
            client_id: config.effective_client_id(),
            username: config.mqtt_username(),
            password: config.mqtt_password(),
            clean_session: config.mqtt.clean_session,
            keep_alive: config.keep_alive(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Host, port and TLS flag extracted from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `tcp://`, `mqtt://`, `ssl://` or `mqtts://` broker URLs
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, MqttError> {
    let url = Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "tcp" | "mqtt" => false,
        "ssl" | "mqtts" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Build rumqttc options for one session
pub fn configure_mqtt_options(
    options: &MqttConnectOptions,
    client_id: &str,
) -> Result<MqttOptions, MqttError> {
    let address = parse_broker_url(&options.broker_url)?;
    let mut mqtt_options = MqttOptions::new(client_id, address.host, address.port);

    if address.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &options.username {
        let password = options.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_clean_start(options.clean_session);
    mqtt_options.set_keep_alive(options.keep_alive);

    Ok(mqtt_options)
}

/// Map a numeric QoS level
pub fn qos_from_u8(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}
