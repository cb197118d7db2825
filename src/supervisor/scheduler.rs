//! Single-task delayed job runner for reconnect attempts
//!
//! Jobs run one at a time, in scheduling order, each no earlier than the due
//! instant fixed when it was scheduled. Shutdown cancels every job that has
//! not started; a job that is already running is given [`SHUTDOWN_GRACE`] to
//! finish before the task is aborted.

use futures::future::BoxFuture;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument, Span};

/// Bounded wait for the in-flight job during shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Far-future fallback when `now + delay` overflows
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

struct ScheduledJob {
    due: Instant,
    job: BoxFuture<'static, ()>,
}

/// Delayed job queue drained by one tokio task
pub struct ReconnectScheduler {
    jobs_tx: mpsc::UnboundedSender<ScheduledJob>,
    shutdown_tx: watch::Sender<bool>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl ReconnectScheduler {
    /// Spawn the scheduler task; must be called within a Tokio runtime
    pub fn new(span: Span) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::run(jobs_rx, shutdown_rx).instrument(span));

        Self {
            jobs_tx,
            shutdown_tx,
            handle: StdMutex::new(Some(handle)),
        }
    }

    /// Queue `job` to run `delay` from now. Returns false once shut down.
    pub fn schedule(&self, delay: Duration, job: BoxFuture<'static, ()>) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.jobs_tx.send(ScheduledJob { due, job }).is_ok()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Signal the task to stop without waiting for it
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Cancel pending jobs and wait at most [`SHUTDOWN_GRACE`] for the running one
    pub async fn shutdown(&self) {
        self.stop();

        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => debug!("Reconnect scheduler stopped"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Reconnect scheduler task failed: {}", e),
            Err(_) => {
                warn!(
                    "Reconnect scheduler did not stop within {:?}, aborting",
                    SHUTDOWN_GRACE
                );
                handle.abort();
            }
            _ => {}
        }
    }

    async fn run(
        mut jobs_rx: mpsc::UnboundedReceiver<ScheduledJob>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let next = tokio::select! {
                _ = shutdown_rx.changed() => None,
                job = jobs_rx.recv() => job,
            };
            let Some(scheduled) = next else {
                break;
            };

            if !Self::interruptible_sleep_until(&mut shutdown_rx, scheduled.due).await {
                break;
            }

            scheduled.job.await;
        }

        let mut cancelled = 0usize;
        jobs_rx.close();
        while jobs_rx.try_recv().is_ok() {
            cancelled += 1;
        }
        info!(cancelled_jobs = cancelled, "Reconnect scheduler stopped");
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep_until(shutdown_rx: &mut watch::Receiver<bool>, due: Instant) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }

        tokio::select! {
            // Only `true` is ever sent, and a dropped sender means shutdown too
            _ = shutdown_rx.changed() => {
                debug!("Shutdown signal received during reconnection delay, stopping");
                false
            }
            _ = tokio::time::sleep_until(due) => true,
        }
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn recording_job(log: Arc<Mutex<Vec<(u32, Instant)>>>, id: u32) -> BoxFuture<'static, ()> {
        async move {
            log.lock().await.push((id, Instant::now()));
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_run_at_due_time_in_order() {
        // Arrange
        let scheduler = ReconnectScheduler::new(Span::none());
        let log = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        // Act
        assert!(scheduler.schedule(Duration::from_millis(100), recording_job(log.clone(), 1)));
        assert!(scheduler.schedule(Duration::from_millis(300), recording_job(log.clone(), 2)));
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Assert
        let log = log.lock().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, 1);
        assert_eq!(log[0].1 - start, Duration::from_millis(100));
        assert_eq!(log[1].0, 2);
        assert_eq!(log[1].1 - start, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_runs_immediately() {
        let scheduler = ReconnectScheduler::new(Span::none());
        let log = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        scheduler.schedule(Duration::ZERO, recording_job(log.clone(), 1));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let log = log.lock().await;
        assert_eq!(log.len(), 1);
        assert!(log[0].1 - start < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_jobs() {
        let scheduler = ReconnectScheduler::new(Span::none());
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.schedule(Duration::from_millis(100), recording_job(log.clone(), 1));
        scheduler.schedule(Duration::from_millis(200), recording_job(log.clone(), 2));
        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(log.lock().await.is_empty());
        assert!(scheduler.is_shut_down());
        assert!(!scheduler.schedule(Duration::ZERO, recording_job(log.clone(), 3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_running_job_finish() {
        let scheduler = ReconnectScheduler::new(Span::none());
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow_log = log.clone();
        scheduler.schedule(
            Duration::ZERO,
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                slow_log.lock().await.push((1, Instant::now()));
            }
            .boxed(),
        );
        // Let the job start
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.shutdown().await;

        assert_eq!(log.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_job_exceeding_grace() {
        let scheduler = ReconnectScheduler::new(Span::none());
        let log = Arc::new(Mutex::new(Vec::new()));

        let stuck_log = log.clone();
        scheduler.schedule(
            Duration::ZERO,
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                stuck_log.lock().await.push((1, Instant::now()));
            }
            .boxed(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let start = Instant::now();
        scheduler.shutdown().await;
        let waited = Instant::now() - start;
        assert!(waited >= SHUTDOWN_GRACE);
        assert!(waited < SHUTDOWN_GRACE + Duration::from_millis(10));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(log.lock().await.is_empty());
    }
}
