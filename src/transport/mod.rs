//! Transport layer for the resilient client
//!
//! The supervisor never talks to a broker library directly. It drives a
//! [`Transport`] and receives asynchronous events through a
//! [`TransportCallback`], which keeps the reconnect logic testable against
//! a scripted transport and lets the production client live in [`mqtt`].

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;

pub mod mqtt;

/// Asynchronous events raised by a transport
///
/// Implementations are invoked from the transport's own event-loop task, so
/// they should hand long-running work off instead of blocking it.
#[async_trait]
pub trait TransportCallback: Send + Sync {
    /// The established session was lost without a local disconnect request
    async fn connection_lost(&self, cause: String);

    /// A message arrived on a subscribed topic
    async fn message_arrived(&self, topic: String, payload: Bytes);

    /// An outgoing QoS 1/2 publish was acknowledged by the broker
    async fn delivery_complete(&self, _packet_id: u16) {}
}

/// Raw publish/subscribe connection owned by the supervisor
///
/// This trait provides an abstraction over the MQTT client library to enable
/// dependency injection and testing. All methods take `&self`; implementations
/// use interior mutability so the supervisor can share one instance between
/// its caller-facing API and its reconnect scheduler.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a session and wait until the broker accepted it
    async fn connect(&self) -> Result<(), Self::Error>;

    /// Gracefully disconnect from the broker
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Release all resources; `force` skips waiting for in-flight work
    async fn close(&self, force: bool) -> Result<(), Self::Error>;

    /// Issue a subscribe request for a topic filter
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Publish a message
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retained: bool,
    ) -> Result<(), Self::Error>;

    /// Check if the transport currently holds an established session
    fn is_connected(&self) -> bool;

    /// Install the receiver of connection-lost, message and delivery events
    fn set_callback(&self, callback: Arc<dyn TransportCallback>);
}

pub use mqtt::MqttTransport;
