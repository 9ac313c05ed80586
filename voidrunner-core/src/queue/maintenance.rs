/// Queue maintenance loop
///
/// One background task owns the two sweeps the delivery semantics depend
/// on:
///
/// 1. **Visibility reclaimer**: leases whose deadline passed (crashed or
///    wedged consumers) are returned to the ready set, which is what makes
///    missed acks redeliver automatically.
/// 2. **Retry promoter**: parked messages whose `next_retry_at` elapsed
///    move back to the ready set.
///
/// Both sweeps run in bounded batches and are monotonic in wall-clock
/// time; the reclaimer additionally subtracts a clock-skew tolerance so a
/// fast clock cannot steal live leases.
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::queue::{maintenance::QueueMaintenance, task_queue::TaskQueue};
/// use std::time::Duration;
///
/// # async fn example(queue: TaskQueue) {
/// let maintenance = QueueMaintenance::new(queue, Duration::from_secs(1));
/// let shutdown = maintenance.shutdown_token();
///
/// let handle = tokio::spawn(async move { maintenance.run().await });
///
/// // ... later
/// shutdown.cancel();
/// let _ = handle.await;
/// # }
/// ```

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::task_queue::TaskQueue;

/// Background sweeper for lease expiry and retry promotion
pub struct QueueMaintenance {
    queue: TaskQueue,
    interval: Duration,
    shutdown: CancellationToken,
}

impl QueueMaintenance {
    /// Creates a maintenance loop sweeping at the given interval
    pub fn new(queue: TaskQueue, interval: Duration) -> Self {
        Self {
            queue,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs both sweeps until shutdown
    ///
    /// Sweep errors are logged and the loop continues; a briefly
    /// unavailable backend must not kill redelivery forever.
    pub async fn run(&self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Queue maintenance loop starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Queue maintenance loop stopped");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// One round of both sweeps; public so tests can drive it directly
    pub async fn sweep_once(&self) {
        if let Err(e) = self.queue.reclaim_expired().await {
            error!(error = %e, "Visibility reclaim sweep failed");
        }

        if let Err(e) = self.queue.promote_due_retries().await {
            error!(error = %e, "Retry promotion sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    // The sweeps themselves need Redis; behavior is covered in
    // tests/queue_tests.rs via QueueMaintenance::sweep_once.
}
