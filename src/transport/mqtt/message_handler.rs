//! Pure routing of rumqttc events
//!
//! The event-loop pump in [`client`](super::client) turns every polled event
//! into an [`EventRoute`] here and then acts on the route. Keeping the mapping
//! pure means the packet handling can be tested without a broker.

use super::connection::ConnectionState;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::Event;

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(format!("{code:?}")),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::PubAck(puback) => EventRoute::DeliveryComplete {
                    packet_id: puback.pkid,
                },
                Packet::PubComp(pubcomp) => EventRoute::DeliveryComplete {
                    packet_id: pubcomp.pkid,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    packet_id: suback.pkid,
                    failures: Self::subscription_failures(&suback.return_codes),
                },
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                }
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Reason codes of a SubAck that are not a granted QoS (pure function)
    pub fn subscription_failures(return_codes: &[SubscribeReasonCode]) -> Vec<String> {
        return_codes
            .iter()
            .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
            .map(|code| format!("{code:?}"))
            .collect()
    }

    /// Next connection state for a route, or `None` when the route does not
    /// change it (pure function)
    pub fn next_state(route: &EventRoute) -> Option<ConnectionState> {
        match route {
            EventRoute::ConnectionAcknowledged => Some(ConnectionState::Connected),
            EventRoute::ConnectionRefused(reason) => Some(ConnectionState::Disconnected(
                format!("Connection refused: {reason}"),
            )),
            EventRoute::Disconnected(reason) => Some(ConnectionState::Disconnected(format!(
                "Broker disconnected: {reason}"
            ))),
            _ => None,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Broker answered the connect with a failure code
    ConnectionRefused(String),
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// QoS 1 PubAck or QoS 2 PubComp for an outgoing publish
    DeliveryComplete { packet_id: u16 },
    /// SubAck, with the reason codes of any rejected filters
    SubscriptionAcknowledged {
        packet_id: u16,
        failures: Vec<String>,
    },
    /// MQTT broker disconnected
    Disconnected(String),
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
