//! Impure I/O operations for the MQTT transport
//!
//! Every `connect` builds a fresh rumqttc `AsyncClient`/`EventLoop` pair and
//! spawns a pump task that polls the event loop until the session ends. The
//! pump never reconnects on its own: when an established session is lost it
//! reports `connection_lost` and exits, leaving the retry policy to the
//! supervisor.

use super::connection::{configure_mqtt_options, ConnectionState, MqttConnectOptions, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{Transport, TransportCallback};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument, Span};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long a graceful disconnect waits for the pump to flush
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type SharedCallback = Arc<RwLock<Option<Arc<dyn TransportCallback>>>>;

/// Production [`Transport`] over rumqttc v5
pub struct MqttTransport {
    options: MqttConnectOptions,
    client_id: String,
    client: StdMutex<Option<AsyncClient>>,
    event_loop_handle: StdMutex<Option<JoinHandle<()>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    callback: SharedCallback,
    /// Set while a locally requested disconnect or close is in progress
    closing: Arc<AtomicBool>,
    /// Incremented per session so a stale pump cannot touch the new one
    generation: Arc<AtomicU64>,
    span: Span,
}

impl MqttTransport {
    /// Create a transport; the effective client id gets a `_<unix-millis>`
    /// suffix so two processes with the same configured id do not take over
    /// each other's session.
    pub fn new(options: MqttConnectOptions) -> Result<Self, MqttError> {
        let client_id = format!(
            "{}_{}",
            options.client_id,
            chrono::Utc::now().timestamp_millis()
        );

        // Fail fast on a malformed broker URL instead of on first connect
        configure_mqtt_options(&options, &client_id)?;

        let (state_tx, _) =
            watch::channel(ConnectionState::Disconnected("Not connected yet".to_string()));

        Ok(Self {
            span: tracing::info_span!("mqtt_transport", client_id = %client_id),
            options,
            client_id,
            client: StdMutex::new(None),
            event_loop_handle: StdMutex::new(None),
            state_tx: Arc::new(state_tx),
            callback: Arc::new(RwLock::new(None)),
            closing: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Client id sent to the broker
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Clone of the current client handle, if a session was opened
    fn current_client(&self) -> Option<AsyncClient> {
        self.client.lock().ok().and_then(|guard| guard.clone())
    }

    fn take_event_loop_handle(&self) -> Option<JoinHandle<()>> {
        self.event_loop_handle
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<AsyncClient, MqttError> {
        let current_state = self.connection_state();
        if current_state != ConnectionState::Connected {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        self.current_client().ok_or(MqttError::NotConnected {
            state: current_state,
        })
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionRefused(reason.clone()));
                    }
                    ConnectionState::Closed => {
                        return Err(MqttError::ConnectionRefused(
                            "Transport closed while connecting".to_string(),
                        ));
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionRefused(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectTimeout(timeout)),
        }
    }

    /// Poll one session's event loop until it ends
    async fn run_event_loop(mut event_loop: EventLoop, pump: EventPump) {
        info!("Starting MQTT event loop");
        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    if !pump.process_event_route(route).await {
                        break;
                    }
                }
                Err(e) => {
                    pump.handle_event_loop_error(e).await;
                    break;
                }
            }
        }
        info!("MQTT event loop stopped");
    }
}

/// Per-session state shared with the pump task
struct EventPump {
    generation: u64,
    current_generation: Arc<AtomicU64>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    callback: SharedCallback,
    closing: Arc<AtomicBool>,
    established: AtomicBool,
}

impl EventPump {
    fn is_current(&self) -> bool {
        self.current_generation.load(Ordering::SeqCst) == self.generation
    }

    fn callback(&self) -> Option<Arc<dyn TransportCallback>> {
        self.callback.read().ok().and_then(|guard| guard.clone())
    }

    fn set_state(&self, state: ConnectionState) {
        if self.is_current() {
            self.state_tx.send_replace(state);
        }
    }

    /// Report loss of an established session unless it was requested locally
    async fn report_connection_lost(&self, cause: String) {
        let established = self.established.swap(false, Ordering::SeqCst);
        if !established || self.closing.load(Ordering::SeqCst) || !self.is_current() {
            tracing::debug!(target: "mqtt_transport", "Session ended: {}", cause);
            return;
        }

        warn!(cause = %cause, "MQTT connection lost");
        if let Some(callback) = self.callback() {
            callback.connection_lost(cause).await;
        }
    }

    /// Process routed MQTT event. Returns true to continue the loop, false to break
    async fn process_event_route(&self, route: EventRoute) -> bool {
        if let Some(state) = MessageHandler::next_state(&route) {
            self.set_state(state);
        }

        match route {
            EventRoute::ConnectionAcknowledged => {
                info!("MQTT client connected successfully");
                self.established.store(true, Ordering::SeqCst);
                true
            }
            EventRoute::ConnectionRefused(reason) => {
                error!(reason = %reason, "Broker refused the connection");
                false
            }
            EventRoute::MessageReceived { topic, payload, .. } => {
                tracing::debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                if let Some(callback) = self.callback() {
                    callback.message_arrived(topic, payload).await;
                }
                true
            }
            EventRoute::DeliveryComplete { packet_id } => {
                if let Some(callback) = self.callback() {
                    callback.delivery_complete(packet_id).await;
                }
                true
            }
            EventRoute::SubscriptionAcknowledged {
                packet_id,
                failures,
            } => {
                if failures.is_empty() {
                    tracing::debug!(target: "mqtt_transport", "Subscription confirmed: pkid {}", packet_id);
                } else {
                    warn!(
                        packet_id = packet_id,
                        reasons = ?failures,
                        "Broker rejected subscription"
                    );
                }
                true
            }
            EventRoute::Disconnected(reason) => {
                let cause = format!("Broker disconnected: {reason}");
                self.set_state(ConnectionState::Disconnected(cause.clone()));
                self.report_connection_lost(cause).await;
                false
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn handle_event_loop_error(&self, error: rumqttc::v5::ConnectionError) {
        let cause = error.to_string();
        self.set_state(ConnectionState::Disconnected(cause.clone()));
        self.report_connection_lost(cause).await;
    }
}

#[async_trait]
impl Transport for MqttTransport {
    type Error = MqttError;

    async fn connect(&self) -> Result<(), MqttError> {
        if self.is_connected() {
            return Ok(());
        }

        let mqtt_options = configure_mqtt_options(&self.options, &self.client_id)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        if let Some(previous) = self.take_event_loop_handle() {
            previous.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.closing.store(false, Ordering::SeqCst);
        self.state_tx.send_replace(ConnectionState::Connecting);
        let state_rx = self.state_tx.subscribe();

        if let Ok(mut guard) = self.client.lock() {
            *guard = Some(client);
        }

        let pump = EventPump {
            generation,
            current_generation: self.generation.clone(),
            state_tx: self.state_tx.clone(),
            callback: self.callback.clone(),
            closing: self.closing.clone(),
            established: AtomicBool::new(false),
        };
        let handle = tokio::spawn(
            Self::run_event_loop(event_loop, pump)
                .instrument(tracing::info_span!(parent: &self.span, "event_loop", generation)),
        );
        if let Ok(mut guard) = self.event_loop_handle.lock() {
            *guard = Some(handle);
        }

        let result =
            Self::wait_for_connection_confirmation(state_rx, self.options.connect_timeout).await;

        if let Err(e) = &result {
            warn!(parent: &self.span, broker = %self.options.broker_url, error = %e, "MQTT connect failed");
            if let Some(handle) = self.take_event_loop_handle() {
                handle.abort();
            }
            if self.connection_state() == ConnectionState::Connecting {
                self.state_tx
                    .send_replace(ConnectionState::Disconnected(e.to_string()));
            }
        }

        result
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.closing.store(true, Ordering::SeqCst);

        let client = self.current_client().ok_or(MqttError::NotConnected {
            state: self.connection_state(),
        })?;
        client
            .disconnect()
            .await
            .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))?;

        if let Some(mut handle) = self.take_event_loop_handle() {
            // Give the pump time to flush the DISCONNECT packet
            match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e)
                }
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, aborting it");
                    handle.abort();
                }
                _ => {}
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected(
            "Client disconnected".to_string(),
        ));
        info!("MQTT client disconnected");
        Ok(())
    }

    async fn close(&self, force: bool) -> Result<(), MqttError> {
        self.closing.store(true, Ordering::SeqCst);
        // Invalidate the running pump so it cannot publish state or callbacks
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(mut handle) = self.take_event_loop_handle() {
            if force {
                handle.abort();
            } else if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("Event loop task still running at close, aborting");
                handle.abort();
            }
        }

        if let Ok(mut guard) = self.client.lock() {
            guard.take();
        }
        self.state_tx.send_replace(ConnectionState::Closed);
        tracing::debug!(target: "mqtt_transport", "MQTT transport closed (force={})", force);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        let client = self.check_connection_state()?;
        client
            .subscribe(topic, qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        tracing::debug!(target: "mqtt_transport", "Subscribe request sent for {}", topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retained: bool,
    ) -> Result<(), MqttError> {
        let client = self.check_connection_state()?;
        client
            .publish(topic, qos, retained, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        tracing::debug!(target: "mqtt_transport", "Published to {} (qos={:?}, retain={})", topic, qos, retained);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Connected
    }

    fn set_callback(&self, callback: Arc<dyn TransportCallback>) {
        if let Ok(mut guard) = self.callback.write() {
            *guard = Some(callback);
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.take_event_loop_handle() {
            handle.abort();
        }
    }
}
