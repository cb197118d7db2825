//! Hooks for code that wants to follow the connection lifecycle
//!
//! All methods default to no-ops, so an observer implements only what it
//! needs. Observers run inline on the transport's event loop (or on the
//! scheduler task for reconnect outcomes) unless the supervisor was built with
//! a [`WorkerPool`](super::WorkerPool).
//!
//! Hooks are never called with the supervisor's reconnect lock held, so an
//! observer may call `connect()` or `subscribe()` from any of them. Calling
//! `shutdown()` inline from `reconnected` or `reconnect_exhausted` stalls for
//! the scheduler's shutdown grace period, because those run on the reconnect
//! task that shutdown waits for; spawn it instead.

use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait ConnectionObserver: Send + Sync + 'static {
    /// An established session was lost. Fires once per outage, before the
    /// first reconnect attempt of that outage.
    async fn connection_lost(&self, _cause: &str) {}

    /// A message arrived, after it was dispatched to the router
    async fn message_arrived(&self, _topic: &str, _payload: &Bytes) {}

    /// An outgoing QoS 1/2 publish was acknowledged
    async fn delivery_complete(&self, _packet_id: u16) {}

    /// The session was re-established after a loss and subscriptions were
    /// replayed
    async fn reconnected(&self) {}

    /// The reconnect budget is used up; no further attempts will be made
    /// until `connect()` is called again
    async fn reconnect_exhausted(&self, _attempts: u32) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}
