/// Submission orphan reconciler
///
/// `submit_for_execution` commits the store transaction before it
/// enqueues. If the process dies in that window, a task is left `pending`
/// with a `pending` execution and no queue entry — an orphan nothing will
/// ever run. This sweeper finds pending tasks whose latest execution is
/// pending, older than a threshold, and not present anywhere in the
/// queue, and re-enqueues them. Re-enqueue is idempotent because the
/// message id is the execution id.
///
/// The inverse orphan (a queue message whose task is already terminal) is
/// handled by the dispatcher, which drops such messages on dequeue.

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use sqlx::PgPool;
use voidrunner_core::models::task::Task;
use voidrunner_core::queue::message::TaskMessage;
use voidrunner_core::queue::task_queue::TaskQueue;
use voidrunner_core::queue::QueueError;

/// Reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to scan for orphans
    pub interval: Duration,

    /// A pending execution younger than this is assumed to still be on
    /// its way into the queue
    pub orphan_threshold: Duration,

    /// Maximum orphans re-enqueued per sweep
    pub batch: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            orphan_threshold: Duration::from_secs(120),
            batch: 100,
        }
    }
}

/// Periodic sweeper re-enqueueing submission orphans
pub struct Reconciler {
    db: PgPool,
    queue: TaskQueue,
    config: ReconcilerConfig,
    shutdown: CancellationToken,
}

impl Reconciler {
    /// Creates a reconciler over the store and queue
    pub fn new(db: PgPool, queue: TaskQueue, config: ReconcilerConfig) -> Self {
        Self {
            db,
            queue,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the sweep loop until shutdown
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            threshold_secs = self.config.orphan_threshold.as_secs(),
            "Reconciler starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Reconciler stopped");
                    break;
                }
                _ = sleep(self.config.interval) => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }
    }

    /// One reconciliation sweep; returns the number of re-enqueued orphans
    pub async fn sweep_once(&self) -> anyhow::Result<u64> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.orphan_threshold).unwrap_or_default();

        let candidates = Task::find_stale_pending(&self.db, cutoff, self.config.batch).await?;
        let mut requeued = 0;

        for candidate in candidates {
            // Still queued (ready, in flight, or parked for retry)?
            if self
                .queue
                .contains(&candidate.execution_id.to_string())
                .await?
            {
                continue;
            }

            let message = TaskMessage::for_execution(
                candidate.task_id,
                candidate.user_id,
                candidate.execution_id,
                candidate.priority,
                candidate.script_type,
            );

            match self.queue.enqueue(&message).await {
                Ok(()) => {
                    info!(
                        task_id = %candidate.task_id,
                        execution_id = %candidate.execution_id,
                        "Re-enqueued orphaned execution"
                    );
                    requeued += 1;
                }
                // Someone else re-enqueued it between the check and now
                Err(QueueError::Duplicate(_)) => {
                    debug!(execution_id = %candidate.execution_id, "Orphan already re-enqueued");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciler_config_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.orphan_threshold, Duration::from_secs(120));
        assert_eq!(config.batch, 100);
    }

    // Orphan detection and re-enqueue behavior (Postgres + Redis) is
    // covered in tests/dispatcher_tests.rs
}
