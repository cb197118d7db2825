//! Connection supervisor
//!
//! Owns the broker session through a [`Transport`], detects connection loss and
//! drives an exponential-backoff reconnect loop. After every successful
//! (re)connect all recorded subscriptions are replayed. Incoming messages are
//! forwarded to an optional [`TopicRouter`].
//!
//! # Example
//!
//! ```no_run
//! use resilient_mqtt::supervisor::{ConnectionSupervisor, ReconnectPolicy};
//! use resilient_mqtt::transport::mqtt::{MqttConnectOptions, MqttTransport};
//! use resilient_mqtt::ClientConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default();
//! let transport = MqttTransport::new(MqttConnectOptions::from_config(&config))?;
//! let supervisor = ConnectionSupervisor::builder(transport)
//!     .policy(ReconnectPolicy::default())
//!     .build();
//!
//! supervisor.connect().await?;
//! supervisor.subscribe("sensors/+/temp").await?;
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod observer;
mod scheduler;
mod state;
mod subscriptions;
mod worker_pool;

pub use observer::{ConnectionObserver, NoopObserver};
pub use scheduler::{ReconnectScheduler, SHUTDOWN_GRACE};
pub use state::{
    ReconnectDecision, ReconnectPolicy, ReconnectState, SupervisorState, DEFAULT_BACKOFF_FACTOR,
    DEFAULT_INITIAL_DELAY, MAX_BACKOFF_DELAY,
};
pub use subscriptions::{SubscriptionSet, DEFAULT_QOS};
pub use worker_pool::WorkerPool;

use crate::error::{ConnectError, PublishError, SubscribeError};
use crate::observability::{StatsSnapshot, SupervisorStats};
use crate::router::TopicRouter;
use crate::transport::{Transport, TransportCallback};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use rumqttc::v5::mqttbytes::QoS;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Builder for [`ConnectionSupervisor`]
pub struct SupervisorBuilder<T: Transport> {
    transport: T,
    policy: ReconnectPolicy,
    router: Option<Arc<TopicRouter>>,
    observer: Arc<dyn ConnectionObserver>,
    worker_pool: Option<WorkerPool>,
    span: Option<Span>,
}

impl<T: Transport> SupervisorBuilder<T> {
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Router that receives every incoming message
    pub fn router(mut self, router: Arc<TopicRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run observer and router callbacks on a bounded pool instead of the
    /// transport's event loop
    pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    /// Log everything the supervisor emits inside `span`
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Wire the supervisor to its transport. Must be called within a Tokio
    /// runtime because it spawns the reconnect scheduler.
    pub fn build(self) -> ConnectionSupervisor<T> {
        let span = self.span.unwrap_or_else(|| crate::supervisor_span!());
        let (state_tx, _) = watch::channel(SupervisorState::Idle);

        let inner = Arc::new(SupervisorInner {
            transport: self.transport,
            policy: self.policy,
            router: self.router,
            observer: self.observer,
            worker_pool: self.worker_pool,
            subscriptions: SubscriptionSet::new(),
            reconnect: StdMutex::new(ReconnectState::default()),
            reconnect_lock: Mutex::new(()),
            state_tx,
            shutdown: AtomicBool::new(false),
            scheduler: ReconnectScheduler::new(span.clone()),
            stats: SupervisorStats::new(),
            span,
        });

        inner
            .transport
            .set_callback(Arc::new(SupervisorCallback {
                inner: Arc::downgrade(&inner),
            }));

        ConnectionSupervisor { inner }
    }
}

/// Resilient wrapper around one broker session
pub struct ConnectionSupervisor<T: Transport> {
    inner: Arc<SupervisorInner<T>>,
}

impl<T: Transport> std::fmt::Debug for ConnectionSupervisor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &self.state())
            .field("policy", &self.inner.policy)
            .field("subscriptions", &self.inner.subscriptions.len())
            .finish()
    }
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn builder(transport: T) -> SupervisorBuilder<T> {
        SupervisorBuilder {
            transport,
            policy: ReconnectPolicy::default(),
            router: None,
            observer: Arc::new(NoopObserver),
            worker_pool: None,
            span: None,
        }
    }

    /// Connect to the broker
    ///
    /// On failure, and if the policy allows it, an immediate reconnect attempt
    /// is scheduled before the error is returned; this call never waits for it.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let inner = self.inner.clone();
        async move { inner.connect().await }
            .instrument(self.inner.span.clone())
            .await
    }

    /// Subscribe with [`DEFAULT_QOS`]
    pub async fn subscribe(&self, topic: &str) -> Result<(), SubscribeError> {
        self.subscribe_with_qos(topic, DEFAULT_QOS).await
    }

    /// Record `topic` for replay, then subscribe to it
    ///
    /// The topic stays recorded even when the request fails, so it is
    /// subscribed again after the next successful reconnect.
    pub async fn subscribe_with_qos(&self, topic: &str, qos: QoS) -> Result<(), SubscribeError> {
        self.inner
            .subscribe(topic, qos)
            .instrument(self.inner.span.clone())
            .await
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retained: bool,
    ) -> Result<(), PublishError> {
        self.inner
            .publish(topic, payload.into(), qos, retained)
            .instrument(self.inner.span.clone())
            .await
    }

    /// Report a lost session; normally called by the transport
    pub async fn on_connection_lost(&self, cause: &str) {
        let inner = self.inner.clone();
        let cause = cause.to_string();
        async move { inner.on_connection_lost(&cause).await }
            .instrument(self.inner.span.clone())
            .await
    }

    /// Deliver an incoming message; normally called by the transport
    pub async fn on_message_arrived(&self, topic: &str, payload: Bytes) {
        self.inner
            .on_message_arrived(topic.to_string(), payload)
            .instrument(self.inner.span.clone())
            .await
    }

    /// Stop reconnecting and release the connection
    ///
    /// Pending reconnect attempts are cancelled; one that is already running
    /// gets at most [`SHUTDOWN_GRACE`] to finish and its outcome is ignored.
    /// Then the session is disconnected (if connected) and the transport is
    /// closed. Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        self.inner
            .shutdown()
            .instrument(self.inner.span.clone())
            .await
    }

    /// Whether the transport currently holds a session
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub fn state(&self) -> SupervisorState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver of every state transition
    pub fn state_changes(&self) -> watch::Receiver<SupervisorState> {
        self.inner.state_tx.subscribe()
    }

    /// Reconnect attempts since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.inner.attempts()
    }

    /// Recorded topics in subscription order
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.topics()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

impl<T: Transport> Drop for ConnectionSupervisor<T> {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.scheduler.stop();
    }
}

struct SupervisorInner<T: Transport> {
    transport: T,
    policy: ReconnectPolicy,
    router: Option<Arc<TopicRouter>>,
    observer: Arc<dyn ConnectionObserver>,
    worker_pool: Option<WorkerPool>,
    subscriptions: SubscriptionSet,
    reconnect: StdMutex<ReconnectState>,
    /// Serializes `connect()` with scheduled attempts
    reconnect_lock: Mutex<()>,
    state_tx: watch::Sender<SupervisorState>,
    shutdown: AtomicBool,
    scheduler: ReconnectScheduler,
    stats: SupervisorStats,
    span: Span,
}

impl<T: Transport> SupervisorInner<T> {
    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn reconnect_state(&self) -> MutexGuard<'_, ReconnectState> {
        self.reconnect.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attempts(&self) -> u32 {
        self.reconnect_state().attempts
    }

    fn current_state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    /// Move to `next` unless shutdown already started
    fn set_state(&self, next: SupervisorState) {
        self.state_tx.send_if_modified(|state| {
            if state.is_shutting_down() || *state == next {
                return false;
            }
            debug!(from = ?state, to = ?next, "Supervisor state changed");
            *state = next;
            true
        });
    }

    /// Run a callback inline, or on the worker pool if there is one
    async fn run_callback<F>(&self, task: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.worker_pool {
            Some(pool) => Some(pool.spawn(task.instrument(self.span.clone()))),
            None => {
                task.await;
                None
            }
        }
    }

    async fn connect(self: &Arc<Self>) -> Result<(), ConnectError> {
        if self.is_shut_down() {
            return Err(ConnectError::ShutDown);
        }

        let guard = self.reconnect_lock.lock().await;
        if self.transport.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        let reconnect = self.current_state() != SupervisorState::Idle;
        self.stats.connection_attempt();
        info!("Connecting to broker");

        match self.transport.connect().await {
            Ok(()) => {
                let established = self.on_connected(reconnect).await;
                drop(guard);
                if established && reconnect {
                    self.notify_reconnected().await;
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Connection to broker failed");
                let retry = {
                    let mut state = self.reconnect_state();
                    if matches!(self.current_state(), SupervisorState::Exhausted { .. }) {
                        state.attempts = 0;
                    }
                    self.set_state(SupervisorState::Disconnected {
                        attempts: state.attempts,
                    });

                    if state.pending {
                        debug!("Reconnect attempt already queued, not scheduling another");
                        None
                    } else if self.policy.auto_retry_initial_connect && !self.is_shut_down() {
                        Some(state.queue())
                    } else {
                        None
                    }
                };

                if let Some(generation) = retry {
                    info!("Scheduling immediate reconnect attempt");
                    self.scheduler.schedule(
                        Duration::ZERO,
                        Self::reconnect_job(Arc::downgrade(self), generation, None),
                    );
                }

                Err(ConnectError::Transport(Box::new(e)))
            }
        }
    }

    /// Called with `reconnect_lock` held after the transport connected.
    /// Returns false when the session dropped again before it could be marked
    /// established; the loss report drives the next attempt then.
    async fn on_connected(&self, reconnect: bool) -> bool {
        {
            let mut state = self.reconnect_state();
            if !self.transport.is_connected() {
                warn!("Session dropped right after connecting");
                return false;
            }
            state.reset();
            self.set_state(SupervisorState::Connected);
        }
        self.stats.connection_established(reconnect);
        info!(reconnect = reconnect, "Connected to broker");

        self.resubscribe_all().await;
        true
    }

    /// Must not be awaited with `reconnect_lock` held, observers may call
    /// back into the supervisor
    async fn notify_reconnected(&self) {
        let observer = self.observer.clone();
        self.run_callback(async move { observer.reconnected().await })
            .await;
    }

    /// Replay every recorded topic; a failure does not stop the others
    async fn resubscribe_all(&self) {
        let topics = self.subscriptions.snapshot();
        if topics.is_empty() {
            return;
        }

        let mut failed = 0usize;
        for (topic, qos) in &topics {
            match self.transport.subscribe(topic, *qos).await {
                Ok(()) => debug!(topic = %topic, "Resubscribed"),
                Err(e) => {
                    failed += 1;
                    self.stats.resubscribe_failed();
                    warn!(topic = %topic, error = %e, "Resubscription failed");
                }
            }
        }

        info!(
            total = topics.len(),
            failed = failed,
            "Subscriptions restored"
        );
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SubscribeError> {
        if self.is_shut_down() {
            return Err(SubscribeError::ShutDown {
                topic: topic.to_string(),
            });
        }

        if self.subscriptions.insert(topic, qos) {
            debug!(topic = %topic, qos = ?qos, "Recorded subscription");
        }

        if !self.transport.is_connected() {
            warn!(topic = %topic, "Not connected, subscription deferred to next connect");
            return Err(SubscribeError::NotConnected {
                topic: topic.to_string(),
            });
        }

        self.transport
            .subscribe(topic, qos)
            .await
            .map_err(|e| SubscribeError::Transport {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        info!(topic = %topic, qos = ?qos, "Subscribed");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retained: bool,
    ) -> Result<(), PublishError> {
        if self.is_shut_down() {
            return Err(PublishError::ShutDown);
        }

        match self.transport.publish(topic, payload, qos, retained).await {
            Ok(()) => {
                self.stats.message_published();
                debug!(topic = %topic, qos = ?qos, retained = retained, "Published");
                Ok(())
            }
            Err(e) => {
                self.stats.publish_failed();
                Err(PublishError::Transport {
                    topic: topic.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn on_connection_lost(self: &Arc<Self>, cause: &str) {
        if self.is_shut_down() {
            debug!(cause = %cause, "Connection lost after shutdown, ignoring");
            return;
        }

        warn!(cause = %cause, "Connection to broker lost");
        self.stats.connection_lost();

        let observer = self.observer.clone();
        let owned_cause = cause.to_string();
        let notified = self
            .run_callback(async move { observer.connection_lost(&owned_cause).await })
            .await;

        self.schedule_next_attempt(notified).await;
    }

    /// Apply the policy to the current attempt count and queue the next attempt.
    /// Must not be awaited with `reconnect_lock` held.
    async fn schedule_next_attempt(self: &Arc<Self>, notified: Option<JoinHandle<()>>) {
        let (decision, generation) = {
            let mut reconnect = self.reconnect_state();
            if self.transport.is_connected() {
                debug!("Connected again, not scheduling a reconnect attempt");
                return;
            }
            if reconnect.pending {
                debug!("Reconnect attempt already queued");
                return;
            }

            let decision = self
                .policy
                .should_attempt_reconnection(reconnect.attempts, self.is_shut_down());
            let mut generation = reconnect.generation;
            match decision {
                ReconnectDecision::Schedule { attempt, .. } => {
                    reconnect.attempts = attempt;
                    generation = reconnect.queue();
                    self.set_state(SupervisorState::Disconnected { attempts: attempt });
                }
                ReconnectDecision::GiveUp { attempts } => {
                    self.set_state(SupervisorState::Exhausted { attempts });
                }
                ReconnectDecision::Abort => {}
            }
            (decision, generation)
        };

        match decision {
            ReconnectDecision::Schedule { attempt, delay } => {
                info!(
                    attempt = attempt,
                    max_attempts = %self.policy.max_display(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect attempt {}/{} in {:?}",
                    attempt,
                    self.policy.max_display(),
                    delay
                );
                self.scheduler.schedule(
                    delay,
                    Self::reconnect_job(Arc::downgrade(self), generation, notified),
                );
            }
            ReconnectDecision::GiveUp { attempts } => {
                error!(
                    attempts = attempts,
                    "Giving up after {} reconnect attempts", attempts
                );
                self.stats.reconnect_exhausted();

                let observer = self.observer.clone();
                self.run_callback(async move { observer.reconnect_exhausted(attempts).await })
                    .await;
            }
            ReconnectDecision::Abort => {
                debug!("Shutdown requested, not scheduling reconnect");
            }
        }
    }

    /// Scheduled job for one reconnect attempt of `generation`
    fn reconnect_job(
        supervisor: Weak<Self>,
        generation: u64,
        notified: Option<JoinHandle<()>>,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Some(notified) = notified {
                if let Err(e) = notified.await {
                    warn!(error = %e, "Connection-lost callback failed");
                }
            }

            let Some(supervisor) = supervisor.upgrade() else {
                return;
            };
            supervisor.attempt_reconnect(generation).await;
        })
    }

    async fn attempt_reconnect(self: &Arc<Self>, generation: u64) {
        let guard = self.reconnect_lock.lock().await;

        if self.is_shut_down() {
            debug!("Skipping reconnect attempt, supervisor is shutting down");
            return;
        }
        if !self.reconnect_state().claim(generation) {
            debug!("Skipping stale reconnect attempt");
            return;
        }
        if self.transport.is_connected() {
            debug!("Skipping reconnect attempt, already connected");
            return;
        }

        let attempt = self.attempts();
        self.stats.connection_attempt();
        info!(
            attempt = attempt,
            "Reconnect attempt {}/{}",
            attempt,
            self.policy.max_display()
        );

        let result = self.transport.connect().await;
        if self.is_shut_down() {
            debug!("Discarding reconnect outcome, supervisor is shutting down");
            return;
        }

        match result {
            Ok(()) => {
                let established = self.on_connected(true).await;
                drop(guard);
                if established {
                    self.notify_reconnected().await;
                }
            }
            Err(e) => {
                warn!(attempt = attempt, error = %e, "Reconnect attempt failed");
                self.stats.reconnect_failed();
                drop(guard);
                self.schedule_next_attempt(None).await;
            }
        }
    }

    async fn on_message_arrived(&self, topic: String, payload: Bytes) {
        if self.is_shut_down() {
            return;
        }

        self.stats.message_received();
        debug!(topic = %topic, bytes = payload.len(), "Message arrived");

        let router = self.router.clone();
        let observer = self.observer.clone();
        self.run_callback(async move {
            if let Some(router) = router {
                router.dispatch(&topic, payload.clone()).await;
            }
            observer.message_arrived(&topic, &payload).await;
        })
        .await;
    }

    async fn on_delivery_complete(&self, packet_id: u16) {
        debug!(packet_id = packet_id, "Delivery complete");
        let observer = self.observer.clone();
        self.run_callback(async move { observer.delivery_complete(packet_id).await })
            .await;
    }

    async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already requested");
            return;
        }

        info!("Shutting down connection supervisor");
        self.state_tx.send_replace(SupervisorState::ShuttingDown);
        self.scheduler.shutdown().await;

        if self.transport.is_connected() {
            if let Err(e) = self.transport.disconnect().await {
                warn!(error = %e, "Graceful disconnect failed");
            }
        }
        if let Err(e) = self.transport.close(true).await {
            warn!(error = %e, "Closing transport failed");
        }

        info!("Connection supervisor stopped");
    }
}

/// Transport callback that forwards into a supervisor without keeping it alive
struct SupervisorCallback<T: Transport> {
    inner: Weak<SupervisorInner<T>>,
}

#[async_trait]
impl<T: Transport> TransportCallback for SupervisorCallback<T> {
    async fn connection_lost(&self, cause: String) {
        if let Some(inner) = self.inner.upgrade() {
            let span = inner.span.clone();
            inner.on_connection_lost(&cause).instrument(span).await;
        }
    }

    async fn message_arrived(&self, topic: String, payload: Bytes) {
        if let Some(inner) = self.inner.upgrade() {
            let span = inner.span.clone();
            inner.on_message_arrived(topic, payload).instrument(span).await;
        }
    }

    async fn delivery_complete(&self, packet_id: u16) {
        if let Some(inner) = self.inner.upgrade() {
            let span = inner.span.clone();
            inner.on_delivery_complete(packet_id).instrument(span).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, RecordingObserver};

    fn fast_policy(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            auto_retry_initial_connect: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_moves_to_connected() {
        let transport = MockTransport::new();
        let supervisor = ConnectionSupervisor::builder(transport.clone())
            .policy(fast_policy(Some(3)))
            .build();
        assert_eq!(supervisor.state(), SupervisorState::Idle);

        supervisor.connect().await.unwrap();

        assert!(supervisor.is_connected());
        assert_eq!(supervisor.state(), SupervisorState::Connected);
        assert_eq!(supervisor.attempts(), 0);
        assert_eq!(transport.connect_count(), 1);

        // A second connect is a no-op
        supervisor.connect().await.unwrap();
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_without_auto_retry_schedules_nothing() {
        let transport = MockTransport::new();
        transport.fail_next_connects(1);
        let supervisor = ConnectionSupervisor::builder(transport.clone())
            .policy(fast_policy(Some(3)))
            .build();

        let result = supervisor.connect().await;
        assert!(matches!(result, Err(ConnectError::Transport(_))));
        assert_eq!(supervisor.state(), SupervisorState::Disconnected { attempts: 0 });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_while_disconnected_records_topic() {
        let transport = MockTransport::new();
        let supervisor = ConnectionSupervisor::builder(transport.clone())
            .policy(fast_policy(Some(3)))
            .build();

        let err = supervisor.subscribe("a/b").await.unwrap_err();
        assert!(matches!(err, SubscribeError::NotConnected { .. }));
        assert_eq!(supervisor.subscriptions(), vec!["a/b".to_string()]);
        assert!(transport.subscribed_topics().is_empty());

        supervisor.connect().await.unwrap();
        assert_eq!(transport.subscribed_topics(), vec!["a/b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_subscribe_keeps_topic() {
        let transport = MockTransport::new();
        transport.fail_subscribe("bad/topic");
        let supervisor = ConnectionSupervisor::builder(transport.clone())
            .policy(fast_policy(Some(3)))
            .build();
        supervisor.connect().await.unwrap();

        let err = supervisor.subscribe("bad/topic").await.unwrap_err();
        assert_eq!(err.topic(), "bad/topic");
        assert!(matches!(err, SubscribeError::Transport { .. }));
        assert_eq!(supervisor.subscriptions(), vec!["bad/topic".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_schedules_backoff_and_reconnects() {
        let transport = MockTransport::new();
        let observer = Arc::new(RecordingObserver::new());
        let supervisor = ConnectionSupervisor::builder(transport.clone())
            .policy(fast_policy(Some(3)))
            .observer(observer.clone())
            .build();
        supervisor.connect().await.unwrap();
        supervisor.subscribe("a/+").await.unwrap();

        transport.fail_next_connects(1);
        transport.simulate_connection_lost("broker restart").await;
        assert_eq!(supervisor.state(), SupervisorState::Disconnected { attempts: 1 });
        assert_eq!(observer.connection_losses(), vec!["broker restart".to_string()]);

        // First attempt at 100ms fails, second at +200ms succeeds
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert_eq!(supervisor.state(), SupervisorState::Disconnected { attempts: 2 });
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(supervisor.state(), SupervisorState::Connected);
        assert_eq!(supervisor.attempts(), 0);
        assert_eq!(observer.reconnects(), 1);
        assert_eq!(
            transport.subscribed_topics(),
            vec!["a/+".to_string(), "a/+".to_string()]
        );

        let stats = supervisor.stats();
        assert_eq!(stats.connection_losses, 1);
        assert_eq!(stats.reconnect_failures, 1);
        assert_eq!(stats.reconnects_succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_terminal() {
        let transport = MockTransport::new();
        let supervisor = ConnectionSupervisor::builder(transport.clone())
            .policy(fast_policy(None))
            .build();
        supervisor.connect().await.unwrap();

        supervisor.shutdown().await;
        supervisor.shutdown().await;

        assert_eq!(supervisor.state(), SupervisorState::ShuttingDown);
        assert!(!supervisor.is_connected());
        assert_eq!(transport.disconnect_count(), 1);
        assert_eq!(transport.close_count(), 1);

        assert!(matches!(
            supervisor.connect().await,
            Err(ConnectError::ShutDown)
        ));
        assert!(matches!(
            supervisor.publish("a", "x", QoS::AtMostOnce, false).await,
            Err(PublishError::ShutDown)
        ));
        assert!(matches!(
            supervisor.subscribe("a").await,
            Err(SubscribeError::ShutDown { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_when_disconnected_only_closes() {
        let transport = MockTransport::new();
        let supervisor = ConnectionSupervisor::builder(transport.clone())
            .policy(fast_policy(None))
            .build();

        supervisor.shutdown().await;

        assert_eq!(transport.disconnect_count(), 0);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_forwards_and_counts() {
        let transport = MockTransport::new();
        let supervisor = ConnectionSupervisor::builder(transport.clone()).build();
        supervisor.connect().await.unwrap();

        supervisor
            .publish("out/topic", "hello", QoS::AtLeastOnce, true)
            .await
            .unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "out/topic");
        assert_eq!(published[0].payload, Bytes::from_static(b"hello"));
        assert!(published[0].retained);
        assert_eq!(supervisor.stats().messages_published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_are_observable() {
        let transport = MockTransport::new();
        let supervisor = ConnectionSupervisor::builder(transport.clone())
            .policy(fast_policy(Some(1)))
            .build();
        let mut changes = supervisor.state_changes();

        supervisor.connect().await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), SupervisorState::Connected);

        transport.fail_next_connects(1);
        transport.simulate_connection_lost("gone").await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            *changes.borrow_and_update(),
            SupervisorState::Exhausted { attempts: 1 }
        );
    }
}
