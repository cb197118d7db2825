//! Pure reconnect policy and supervisor state
//!
//! This module contains the pure reconnection decision logic: given how many
//! attempts were already scheduled since the last successful connection, it
//! decides whether to schedule another one and how long to wait.

use std::time::Duration;

/// Default delay before the first reconnect attempt
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(5000);

/// Default multiplier applied per attempt
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

/// Computed delays saturate here instead of overflowing
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Immutable reconnect policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum reconnect attempts per outage (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delay before the first attempt of an outage
    pub initial_delay: Duration,
    /// Multiplier applied to the delay for every further attempt
    pub backoff_factor: f64,
    /// Schedule an immediate retry when the initial `connect()` fails
    pub auto_retry_initial_connect: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            auto_retry_initial_connect: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the attempt that follows `attempts` earlier ones:
    /// `initial_delay * backoff_factor^attempts` (pure function)
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_factor.powf(attempts as f64);

        if !nanos.is_finite() || nanos >= MAX_BACKOFF_DELAY.as_nanos() as f64 {
            return MAX_BACKOFF_DELAY;
        }
        if nanos <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Determine if reconnection should be attempted (pure function)
    /// Supports unlimited retries when max_attempts is None
    pub fn should_attempt_reconnection(
        &self,
        current_attempts: u32,
        shutdown_requested: bool,
    ) -> ReconnectDecision {
        if shutdown_requested {
            return ReconnectDecision::Abort;
        }

        if let Some(max_attempts) = self.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectDecision::GiveUp {
                    attempts: current_attempts,
                };
            }
        }

        ReconnectDecision::Schedule {
            attempt: current_attempts.saturating_add(1),
            delay: self.delay_for(current_attempts),
        }
    }

    /// Maximum attempts for log messages
    pub fn max_display(&self) -> String {
        self.max_attempts
            .map_or("∞".to_string(), |max| max.to_string())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectDecision {
    /// Schedule attempt number `attempt` after `delay`
    Schedule { attempt: u32, delay: Duration },
    /// Budget used up after `attempts` attempts
    GiveUp { attempts: u32 },
    /// Supervisor is shutting down
    Abort,
}

/// Observable state of a connection supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Created, `connect()` not called yet
    Idle,
    /// Session established
    Connected,
    /// Session down; `attempts` reconnects scheduled so far in this outage
    Disconnected { attempts: u32 },
    /// Reconnect budget used up; only an external `connect()` leaves this state
    Exhausted { attempts: u32 },
    /// `shutdown()` was called; terminal
    ShuttingDown,
}

impl SupervisorState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SupervisorState::Connected)
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self, SupervisorState::ShuttingDown)
    }
}

/// Reconnect bookkeeping since the last successful connection
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempts: u32,
    /// A reconnect job of the current generation is queued
    pub pending: bool,
    /// Bumped by every established session; queued jobs of older generations
    /// are stale
    pub generation: u64,
}

impl ReconnectState {
    /// Mark a job as queued and return the generation it belongs to
    pub fn queue(&mut self) -> u64 {
        self.pending = true;
        self.generation
    }

    /// Take ownership of a queued job. Returns false for a stale job.
    pub fn claim(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.pending = false;
        true
    }

    /// A session was established: start over and invalidate queued jobs
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.pending = false;
        self.generation = self.generation.wrapping_add(1);
    }
}
