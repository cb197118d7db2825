//! Topics the client was asked to subscribe to
//!
//! The set only grows. It is replayed in insertion order after every
//! successful (re)connect.

use rumqttc::v5::mqttbytes::QoS;
use std::sync::{PoisonError, RwLock};

/// QoS used by `subscribe` when the caller does not pick one
pub const DEFAULT_QOS: QoS = QoS::AtLeastOnce;

/// Insertion-ordered set of topic filters, each with its requested QoS
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    topics: RwLock<Vec<(String, QoS)>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a topic. Returns true if it was not recorded before; a repeated
    /// topic keeps its position and takes the new QoS.
    pub fn insert(&self, topic: &str, qos: QoS) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        match topics.iter_mut().find(|(existing, _)| existing == topic) {
            Some((_, existing_qos)) => {
                *existing_qos = qos;
                false
            }
            None => {
                topics.push((topic.to_string(), qos));
                true
            }
        }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(existing, _)| existing == topic)
    }

    /// Copy of all recorded topics with their QoS
    pub fn snapshot(&self) -> Vec<(String, QoS)> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded topic filters
    pub fn topics(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|(topic, _)| topic).collect()
    }

    pub fn len(&self) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
