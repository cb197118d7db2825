//! Wiring from configuration to a running supervisor
//!
//! This is where all the coupling lives: the transport is created from the
//! `[mqtt]` section, the reconnect policy from `[reconnect]` and the optional
//! worker pool from `[callbacks]`. Business logic only sees the supervisor and
//! the router.

use crate::config::ClientConfig;
use crate::error::{ClientResult, ConnectError};
use crate::router::TopicRouter;
use crate::supervisor::{ConnectionObserver, ConnectionSupervisor, WorkerPool, DEFAULT_QOS};
use crate::transport::mqtt::{MqttConnectOptions, MqttTransport};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{info, warn};

/// Build a supervisor over the rumqttc transport described by `config`
///
/// Must be called within a Tokio runtime. Nothing connects yet; see
/// [`bootstrap`].
pub fn build(
    config: &ClientConfig,
    router: Arc<TopicRouter>,
    observer: Arc<dyn ConnectionObserver>,
) -> ClientResult<ConnectionSupervisor<MqttTransport>> {
    config.validate()?;

    let transport = MqttTransport::new(MqttConnectOptions::from_config(config))?;
    info!(
        client_id = %transport.client_id(),
        broker_url = %config.mqtt.broker_url,
        max_attempts = %config.reconnect_policy().max_display(),
        "Building connection supervisor"
    );

    Ok(with_transport(transport, config, router, observer))
}

/// Build a supervisor over any transport, configured from `config`
pub fn with_transport<T: Transport>(
    transport: T,
    config: &ClientConfig,
    router: Arc<TopicRouter>,
    observer: Arc<dyn ConnectionObserver>,
) -> ConnectionSupervisor<T> {
    let mut builder = ConnectionSupervisor::builder(transport)
        .policy(config.reconnect_policy())
        .router(router)
        .observer(observer);

    if let Some(max_concurrency) = config.callbacks.max_concurrency {
        builder = builder.worker_pool(WorkerPool::new(max_concurrency));
    }

    builder.build()
}

/// Connect, then subscribe to the configured topics and every router pattern
///
/// Subscriptions are recorded even if the connection failed, so they are
/// replayed once a scheduled reconnect succeeds. Only the connect outcome is
/// returned; individual subscribe failures are logged.
pub async fn bootstrap<T: Transport>(
    supervisor: &ConnectionSupervisor<T>,
    router: &TopicRouter,
    config: &ClientConfig,
) -> Result<(), ConnectError> {
    let connected = supervisor.connect().await;
    if let Err(e) = &connected {
        warn!(error = %e, "Initial connection failed, subscriptions will be replayed on reconnect");
    }

    let configured = config
        .mqtt
        .topics
        .iter()
        .map(|topic| (topic.clone(), DEFAULT_QOS));
    let routed = router.subscriptions();

    for (topic, qos) in configured.chain(routed) {
        if let Err(e) = supervisor.subscribe_with_qos(&topic, qos).await {
            warn!(topic = %topic, error = %e, "Startup subscription failed");
        }
    }

    connected
}
