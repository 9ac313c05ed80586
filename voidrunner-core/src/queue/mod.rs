/// Priority queue subsystem
///
/// Three logical queues share one Redis backend:
///
/// - **Task queue**: ready messages in a sorted set scored so that the
///   priority class dominates and age breaks ties (no starvation within a
///   class).
/// - **Retry queue**: failed messages parked until `next_retry_at`, with
///   exponential backoff and jitter.
/// - **Dead-letter queue**: messages whose retries are exhausted or whose
///   failure is non-retryable, grouped by failure reason for operators.
///
/// Delivery is at-least-once: every dequeue hands out a receipt lease and
/// hides the message for the visibility timeout; unacked messages are
/// reclaimed by the maintenance sweeper.
///
/// # Modules
///
/// - [`message`]: wire format, priority classes, receipt grammar
/// - [`backoff`]: retry delay policy
/// - [`task_queue`]: the Redis-backed queue operations
/// - [`dead_letter`]: DLQ inspection and requeue operations
/// - [`maintenance`]: visibility reclaimer and retry promoter loops
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::queue::{QueueConfig, task_queue::TaskQueue};
/// use voidrunner_core::queue::message::TaskMessage;
/// use std::time::Duration;
/// use uuid::Uuid;
///
/// # async fn example() -> anyhow::Result<()> {
/// let queue = TaskQueue::connect(QueueConfig {
///     url: "redis://localhost:6379".to_string(),
///     ..Default::default()
/// }).await?;
///
/// let delivered = queue.dequeue(1, Duration::from_secs(10)).await?;
/// for d in delivered {
///     // process d.message ...
///     queue.delete(&d.receipt).await?;
/// }
/// # Ok(())
/// # }
/// ```

pub mod backoff;
pub mod dead_letter;
pub mod maintenance;
pub mod message;
pub mod task_queue;

use std::time::Duration;

use thiserror::Error;

use self::backoff::RetryPolicy;

/// Queue configuration
///
/// Key names are the logical queue names; derived keys (`:messages`,
/// `:inflight`, `:receipts`, `:index`) hang off them.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis connection URL
    pub url: String,

    /// Ready-message sorted set name
    pub task_queue_name: String,

    /// Retry sorted set name
    pub retry_queue_name: String,

    /// Dead-letter hash name
    pub dead_letter_queue_name: String,

    /// How long a dequeued message stays invisible before reclamation
    pub visibility_timeout: Duration,

    /// Maximum time a single `dequeue` call blocks waiting for messages
    pub long_poll_wait: Duration,

    /// Internal polling step inside a long-poll wait
    pub poll_interval: Duration,

    /// Retry backoff policy
    pub retry: RetryPolicy,

    /// Dead letters older than this are purged by `purge_old`
    pub dlq_max_age: Duration,

    /// Clock skew the visibility reclaimer tolerates before it considers
    /// a lease expired
    pub clock_skew_tolerance: Duration,

    /// Maximum entries per maintenance sweep
    pub sweep_batch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            task_queue_name: "voidrunner:tasks".to_string(),
            retry_queue_name: "voidrunner:tasks:retry".to_string(),
            dead_letter_queue_name: "voidrunner:tasks:dead".to_string(),
            visibility_timeout: Duration::from_secs(600),
            long_poll_wait: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            dlq_max_age: Duration::from_secs(7 * 24 * 3600),
            clock_skew_tolerance: Duration::from_secs(5),
            sweep_batch: 128,
        }
    }
}

/// Queue operation errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// A message with this id already exists (idempotent enqueue)
    #[error("duplicate message id: {0}")]
    Duplicate(String),

    /// No message with this id exists
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// The receipt is no longer the current lease for its message
    /// (visibility expired, or the message was already acked)
    #[error("receipt is not the current lease for message {0}")]
    ReceiptNotCurrent(String),

    /// The receipt string does not match the receipt grammar
    #[error("malformed receipt handle")]
    MalformedReceipt,

    /// Message body failed to (de)serialize
    #[error("queue message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis transport failure
    #[error("queue backend error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl QueueError {
    /// True if the error is worth retrying (backend transport failure)
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Redis(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.task_queue_name, "voidrunner:tasks");
        assert_eq!(config.visibility_timeout, Duration::from_secs(600));
        assert_eq!(config.long_poll_wait, Duration::from_secs(10));
        assert_eq!(config.sweep_batch, 128);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_transient_classification() {
        assert!(!QueueError::Duplicate("m".into()).is_transient());
        assert!(!QueueError::MalformedReceipt.is_transient());
    }
}
