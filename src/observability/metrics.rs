//! Per-supervisor connection statistics
//!
//! Atomic counters updated on the connection and message paths, read through
//! a serializable [`StatsSnapshot`]. Every supervisor owns its own instance so
//! several clients in one process never share counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Thread-safe statistics for one connection supervisor
#[derive(Debug, Default)]
pub struct SupervisorStats {
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    reconnects_succeeded: AtomicU64,
    reconnect_failures: AtomicU64,
    reconnects_exhausted: AtomicU64,
    connection_losses: AtomicU64,
    messages_received: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    resubscribe_failures: AtomicU64,
    last_connected_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`SupervisorStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub reconnects_succeeded: u64,
    pub reconnect_failures: u64,
    pub reconnects_exhausted: u64,
    pub connection_losses: u64,
    pub messages_received: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub resubscribe_failures: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl SupervisorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any connect, initial or scheduled
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self, reconnect: bool) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        if reconnect {
            self.reconnects_succeeded.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut last) = self.last_connected_at.lock() {
            *last = Some(Utc::now());
        }
    }

    pub fn reconnect_failed(&self) {
        self.reconnect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_exhausted(&self) {
        self.reconnects_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connection_losses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resubscribe_failed(&self) {
        self.resubscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            reconnects_succeeded: self.reconnects_succeeded.load(Ordering::Relaxed),
            reconnect_failures: self.reconnect_failures.load(Ordering::Relaxed),
            reconnects_exhausted: self.reconnects_exhausted.load(Ordering::Relaxed),
            connection_losses: self.connection_losses.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            resubscribe_failures: self.resubscribe_failures.load(Ordering::Relaxed),
            last_connected_at: self.last_connected_at.lock().ok().and_then(|last| *last),
        }
    }
}
