/// Integration tests for the Redis-backed task queue
///
/// These tests require a running Redis instance. Run with:
/// `cargo test --test queue_tests -- --ignored --test-threads=1`
///
/// The Redis URL is taken from the REDIS_URL environment variable
/// (default: redis://localhost:6379). Each test uses its own queue name
/// so runs do not interfere.

use std::time::Duration;

use uuid::Uuid;
use voidrunner_core::models::task::ScriptType;
use voidrunner_core::queue::backoff::RetryPolicy;
use voidrunner_core::queue::maintenance::QueueMaintenance;
use voidrunner_core::queue::message::TaskMessage;
use voidrunner_core::queue::task_queue::{FailDisposition, TaskQueue};
use voidrunner_core::queue::{QueueConfig, QueueError};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn test_config(test_name: &str) -> QueueConfig {
    let ns = format!("vrtest:{}:{}", test_name, Uuid::new_v4());
    QueueConfig {
        url: redis_url(),
        task_queue_name: ns.clone(),
        retry_queue_name: format!("{}:retry", ns),
        dead_letter_queue_name: format!("{}:dead", ns),
        visibility_timeout: Duration::from_secs(2),
        long_poll_wait: Duration::from_millis(500),
        poll_interval: Duration::from_millis(50),
        retry: RetryPolicy {
            base: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(1),
            max_attempts: 5,
        },
        clock_skew_tolerance: Duration::from_secs(0),
        ..QueueConfig::default()
    }
}

fn message(priority: i32) -> TaskMessage {
    TaskMessage::for_execution(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        priority,
        ScriptType::Python,
    )
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_enqueue_dequeue_delete_roundtrip() {
    let queue = TaskQueue::connect(test_config("roundtrip")).await.unwrap();
    let msg = message(5);

    queue.enqueue(&msg).await.unwrap();

    let delivered = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].message.message_id, msg.message_id);
    assert_eq!(delivered[0].message.attempts, 1);

    queue.delete(&delivered[0].receipt).await.unwrap();

    // No visible trace
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.approx_depth, 0);
    assert_eq!(stats.in_flight, 0);
    assert!(!queue.contains(&msg.message_id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_duplicate_enqueue_rejected() {
    let queue = TaskQueue::connect(test_config("duplicate")).await.unwrap();
    let msg = message(5);

    queue.enqueue(&msg).await.unwrap();
    let result = queue.enqueue(&msg).await;
    assert!(matches!(result, Err(QueueError::Duplicate(_))));
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_missed_ack_redelivers_after_visibility_timeout() {
    let queue = TaskQueue::connect(test_config("redelivery")).await.unwrap();
    let msg = message(5);
    queue.enqueue(&msg).await.unwrap();

    let first = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    assert_eq!(first.len(), 1);

    // Invisible while leased
    let nothing = queue.dequeue(1, Duration::from_millis(200)).await.unwrap();
    assert!(nothing.is_empty());

    // Wait past the visibility timeout, then sweep
    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert_eq!(queue.reclaim_expired().await.unwrap(), 1);

    let second = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message.message_id, msg.message_id);
    assert_eq!(second[0].message.attempts, 2);

    // The stale receipt lost its lease
    let stale = queue.delete(&first[0].receipt).await;
    assert!(matches!(stale, Err(QueueError::ReceiptNotCurrent(_))));
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_priority_precedence() {
    let queue = TaskQueue::connect(test_config("priority")).await.unwrap();

    let normal = message(5);
    let high = message(9);
    queue.enqueue(&normal).await.unwrap();
    queue.enqueue(&high).await.unwrap();

    let first = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    assert_eq!(first[0].message.message_id, high.message_id);

    let second = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    assert_eq!(second[0].message.message_id, normal.message_id);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_fifo_within_class() {
    let queue = TaskQueue::connect(test_config("fifo")).await.unwrap();

    let older = TaskMessage {
        queued_at: chrono::Utc::now() - chrono::Duration::minutes(5),
        ..message(5)
    };
    let fresh = message(5);
    queue.enqueue(&fresh).await.unwrap();
    queue.enqueue(&older).await.unwrap();

    let first = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    assert_eq!(first[0].message.message_id, older.message_id);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_release_makes_message_visible_again() {
    let queue = TaskQueue::connect(test_config("release")).await.unwrap();
    let msg = message(5);
    queue.enqueue(&msg).await.unwrap();

    let delivered = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    queue.release(&delivered[0].receipt, None).await.unwrap();

    let again = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].message.message_id, msg.message_id);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_retry_then_dead_letter() {
    let config = test_config("retrydlq");
    let queue = TaskQueue::connect(config.clone()).await.unwrap();
    let maintenance = QueueMaintenance::new(queue.clone(), Duration::from_millis(50));

    let msg = message(5);
    queue.enqueue(&msg).await.unwrap();

    // Fail transiently until the policy dead-letters the message
    let mut dead = false;
    for attempt in 1..=config.retry.max_attempts {
        // Wait for the retry to come due, then promote it
        let mut delivered = Vec::new();
        for _ in 0..50 {
            maintenance.sweep_once().await;
            delivered = queue.dequeue(1, Duration::from_millis(100)).await.unwrap();
            if !delivered.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(delivered.len(), 1, "attempt {} not delivered", attempt);
        assert_eq!(delivered[0].message.attempts, attempt);

        match queue
            .fail(&delivered[0], "sandbox_transient", true)
            .await
            .unwrap()
        {
            FailDisposition::Retried => assert!(attempt < config.retry.max_attempts),
            FailDisposition::DeadLettered => {
                assert_eq!(attempt, config.retry.max_attempts);
                dead = true;
            }
        }
    }
    assert!(dead, "message never reached the dead-letter queue");

    // In the DLQ, and nowhere else
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.approx_depth, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.delayed, 0);
    assert_eq!(stats.dead, 1);

    let entries = queue.list_dead(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].failure_reason, "sandbox_transient");
    assert_eq!(entries[0].message.attempts, config.retry.max_attempts);

    let by_reason = queue.dead_letter_stats().await.unwrap();
    assert_eq!(by_reason.get("sandbox_transient"), Some(&1));
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_permanent_failure_skips_retry_queue() {
    let queue = TaskQueue::connect(test_config("permanent")).await.unwrap();
    let msg = message(5);
    queue.enqueue(&msg).await.unwrap();

    let delivered = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    let disposition = queue
        .fail(&delivered[0], "ownership_lost", false)
        .await
        .unwrap();
    assert_eq!(disposition, FailDisposition::DeadLettered);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.delayed, 0);
    assert_eq!(stats.dead, 1);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_requeue_dead_resets_attempts() {
    let queue = TaskQueue::connect(test_config("requeue")).await.unwrap();
    let msg = message(5);
    queue.enqueue(&msg).await.unwrap();

    let delivered = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    queue
        .fail(&delivered[0], "sandbox_permanent", false)
        .await
        .unwrap();

    queue.requeue_dead(&msg.message_id).await.unwrap();

    let redelivered = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    // attempts reset to 0 on requeue, stamped back to 1 at claim
    assert_eq!(redelivered[0].message.attempts, 1);
    assert!(!redelivered[0]
        .message
        .attributes
        .contains_key("failure_reason"));

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.dead, 0);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_purge_old_dead_letters() {
    let queue = TaskQueue::connect(test_config("purge")).await.unwrap();
    let msg = message(5);
    queue.enqueue(&msg).await.unwrap();

    let delivered = queue.dequeue(1, Duration::from_secs(1)).await.unwrap();
    queue.fail(&delivered[0], "bad", false).await.unwrap();

    // Everything is younger than an hour
    assert_eq!(queue.purge_old(Duration::from_secs(3600)).await.unwrap(), 0);
    // A zero retention purges it
    assert_eq!(queue.purge_old(Duration::from_secs(0)).await.unwrap(), 1);
    assert_eq!(queue.stats().await.unwrap().dead, 0);
}
