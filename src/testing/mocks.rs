//! Mock implementations for testing
//!
//! Provides a scripted [`Transport`] and a recording [`ConnectionObserver`] so
//! the supervisor can be exercised without a broker.

use crate::supervisor::ConnectionObserver;
use crate::transport::{Transport, TransportCallback};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MockError {
    #[error("Connection refused by mock broker (call {0})")]
    ConnectRefused(usize),
    #[error("Subscription to '{0}' rejected by mock broker")]
    SubscribeRejected(String),
    #[error("Mock transport is not connected")]
    NotConnected,
}

/// A publish recorded by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retained: bool,
}

#[derive(Default)]
struct MockState {
    connected: AtomicBool,
    fail_next_connects: AtomicU32,
    drop_next_sessions: AtomicU32,
    always_fail_connect: AtomicBool,
    connect_delay: Mutex<Duration>,
    connect_times: Mutex<Vec<Instant>>,
    failing_topics: Mutex<HashSet<String>>,
    subscribe_calls: Mutex<Vec<(String, QoS)>>,
    published: Mutex<Vec<PublishedMessage>>,
    disconnects: AtomicUsize,
    closes: AtomicUsize,
    callback: RwLock<Option<Arc<dyn TransportCallback>>>,
}

/// Mock transport for testing
///
/// Clones share state, so a test can keep a handle after moving one into a
/// supervisor.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("connected", &self.is_connected())
            .field("connect_count", &self.connect_count())
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` connect calls fail
    pub fn fail_next_connects(&self, count: u32) {
        self.state.fail_next_connects.store(count, Ordering::SeqCst);
    }

    /// The next `count` successful connects drop the session again before
    /// returning, reporting the loss first
    pub fn drop_next_sessions(&self, count: u32) {
        self.state.drop_next_sessions.store(count, Ordering::SeqCst);
    }

    /// Every connect call fails until switched off again
    pub fn set_connect_failing(&self, failing: bool) {
        self.state.always_fail_connect.store(failing, Ordering::SeqCst);
    }

    /// Each connect call takes `delay` before it resolves
    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.state.connect_delay) = delay;
    }

    /// Subscribe requests for `topic` fail
    pub fn fail_subscribe(&self, topic: &str) {
        lock(&self.state.failing_topics).insert(topic.to_string());
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.state.connect_times).len()
    }

    /// When each connect call started
    pub fn connect_times(&self) -> Vec<Instant> {
        lock(&self.state.connect_times).clone()
    }

    /// Every subscribe call, successful or not
    pub fn subscribe_calls(&self) -> Vec<(String, QoS)> {
        lock(&self.state.subscribe_calls).clone()
    }

    /// Topics of successful subscribe calls, in call order
    pub fn subscribed_topics(&self) -> Vec<String> {
        let failing = lock(&self.state.failing_topics).clone();
        self.subscribe_calls()
            .into_iter()
            .map(|(topic, _)| topic)
            .filter(|topic| !failing.contains(topic))
            .collect()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state.published).clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    fn callback(&self) -> Option<Arc<dyn TransportCallback>> {
        self.state.callback.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drop the session and report the loss like a broker outage would
    pub async fn simulate_connection_lost(&self, cause: &str) {
        self.state.connected.store(false, Ordering::SeqCst);
        if let Some(callback) = self.callback() {
            callback.connection_lost(cause.to_string()).await;
        }
    }

    /// Deliver a message as if it arrived from the broker
    pub async fn deliver(&self, topic: &str, payload: impl Into<Bytes>) {
        if let Some(callback) = self.callback() {
            callback
                .message_arrived(topic.to_string(), payload.into())
                .await;
        }
    }

    /// Acknowledge an outgoing publish
    pub async fn complete_delivery(&self, packet_id: u16) {
        if let Some(callback) = self.callback() {
            callback.delivery_complete(packet_id).await;
        }
    }

    fn should_fail_connect(&self) -> bool {
        if self.state.always_fail_connect.load(Ordering::SeqCst) {
            return true;
        }
        self.state
            .fail_next_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockError;

    async fn connect(&self) -> Result<(), Self::Error> {
        let call = {
            let mut times = lock(&self.state.connect_times);
            times.push(Instant::now());
            times.len()
        };

        let delay = *lock(&self.state.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail_connect() {
            return Err(MockError::ConnectRefused(call));
        }
        self.state.connected.store(true, Ordering::SeqCst);

        let drop_session = self
            .state
            .drop_next_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if drop_session {
            self.simulate_connection_lost("Session dropped after ConnAck")
                .await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, _force: bool) -> Result<(), Self::Error> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockError::NotConnected);
        }
        lock(&self.state.subscribe_calls).push((topic.to_string(), qos));

        if lock(&self.state.failing_topics).contains(topic) {
            return Err(MockError::SubscribeRejected(topic.to_string()));
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retained: bool,
    ) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockError::NotConnected);
        }
        lock(&self.state.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retained,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn set_callback(&self, callback: Arc<dyn TransportCallback>) {
        *self.state.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}

/// Observer that records every notification
#[derive(Debug, Default)]
pub struct RecordingObserver {
    losses: Mutex<Vec<String>>,
    losses_notified_at: Mutex<Vec<Instant>>,
    messages: Mutex<Vec<(String, Bytes)>>,
    deliveries: Mutex<Vec<u16>>,
    reconnects: AtomicUsize,
    exhausted: Mutex<Vec<u32>>,
    loss_delay: Duration,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each connection-lost notification takes `delay` to complete
    pub fn with_loss_delay(delay: Duration) -> Self {
        Self {
            loss_delay: delay,
            ..Default::default()
        }
    }

    pub fn connection_losses(&self) -> Vec<String> {
        lock(&self.losses).clone()
    }

    /// When each connection-lost notification finished
    pub fn losses_notified_at(&self) -> Vec<Instant> {
        lock(&self.losses_notified_at).clone()
    }

    pub fn messages(&self) -> Vec<(String, Bytes)> {
        lock(&self.messages).clone()
    }

    pub fn deliveries(&self) -> Vec<u16> {
        lock(&self.deliveries).clone()
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn exhausted(&self) -> Vec<u32> {
        lock(&self.exhausted).clone()
    }
}

#[async_trait]
impl ConnectionObserver for RecordingObserver {
    async fn connection_lost(&self, cause: &str) {
        if !self.loss_delay.is_zero() {
            tokio::time::sleep(self.loss_delay).await;
        }
        lock(&self.losses).push(cause.to_string());
        lock(&self.losses_notified_at).push(Instant::now());
    }

    async fn message_arrived(&self, topic: &str, payload: &Bytes) {
        lock(&self.messages).push((topic.to_string(), payload.clone()));
    }

    async fn delivery_complete(&self, packet_id: u16) {
        lock(&self.deliveries).push(packet_id);
    }

    async fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn reconnect_exhausted(&self, attempts: u32) {
        lock(&self.exhausted).push(attempts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2);

        assert_eq!(transport.connect().await, Err(MockError::ConnectRefused(1)));
        assert_eq!(transport.connect().await, Err(MockError::ConnectRefused(2)));
        assert_eq!(transport.connect().await, Ok(()));
        assert!(transport.is_connected());
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_failures_are_recorded() {
        let transport = MockTransport::new();
        transport.fail_subscribe("bad");
        transport.connect().await.unwrap();

        assert!(transport.subscribe("good", QoS::AtLeastOnce).await.is_ok());
        assert!(transport.subscribe("bad", QoS::AtLeastOnce).await.is_err());

        assert_eq!(transport.subscribe_calls().len(), 2);
        assert_eq!(transport.subscribed_topics(), vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_session_reports_loss() {
        let transport = MockTransport::new();
        transport.drop_next_sessions(1);

        assert_eq!(transport.connect().await, Ok(()));
        assert!(!transport.is_connected());

        assert_eq!(transport.connect().await, Ok(()));
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_operations_need_connection() {
        let transport = MockTransport::new();
        assert_eq!(
            transport.publish("a", Bytes::new(), QoS::AtMostOnce, false).await,
            Err(MockError::NotConnected)
        );
        assert_eq!(
            transport.subscribe("a", QoS::AtMostOnce).await,
            Err(MockError::NotConnected)
        );
    }
}
