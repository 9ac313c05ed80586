/// Queue wire format: messages, priority classes, receipts
///
/// A [`TaskMessage`] is the unit of work flowing through the queue. Its
/// `message_id` is the execution id, which makes re-enqueue idempotent:
/// submitting the same execution twice is rejected by the enqueue guard.
///
/// The task-facing 0-10 priority scale is compressed into five scheduling
/// classes; the class dominates the sorted-set score and message age is
/// the tiebreaker so nothing starves inside a class.
///
/// # Receipt grammar
///
/// ```text
/// <message_id>:<issued_unix>:<hex-nonce>
/// ```
///
/// A receipt is a per-dequeue lease: only its current holder may ack or
/// release the message.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::QueueError;
use crate::models::task::ScriptType;

/// Attribute key: execution id the message belongs to
pub const ATTR_EXECUTION_ID: &str = "execution_id";

/// Attribute key: script type, for worker-side routing
pub const ATTR_SCRIPT_TYPE: &str = "script_type";

/// Attribute key: original 0-10 task priority
pub const ATTR_PRIORITY_NUMERIC: &str = "priority_numeric";

/// Attribute key: why the last delivery failed
pub const ATTR_FAILURE_REASON: &str = "failure_reason";

/// Attribute key: unix timestamp of the last failed delivery
pub const ATTR_LAST_ATTEMPT: &str = "last_attempt";

/// Attribute key: unix timestamp the retry becomes visible
pub const ATTR_NEXT_RETRY_AT: &str = "next_retry_at";

/// Weight multiplier that makes the priority class dominate message age
/// in the sorted-set score
pub const PRIORITY_SCORE_BASE: f64 = 1e10;

/// Scheduling class, highest dequeued first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl PriorityClass {
    /// Maps the 0-10 task priority onto the five classes
    ///
    /// 1-2 → lowest, 3-4 → low, 5-6 → normal, 7-8 → high, 9-10 → highest.
    /// Priority 0 (unset) maps to normal.
    pub fn from_task_priority(priority: i32) -> Self {
        match priority {
            1..=2 => PriorityClass::Lowest,
            3..=4 => PriorityClass::Low,
            5..=6 => PriorityClass::Normal,
            7..=8 => PriorityClass::High,
            9..=10 => PriorityClass::Highest,
            _ => PriorityClass::Normal,
        }
    }

    /// Score weight (1..=5)
    pub fn weight(&self) -> u8 {
        match self {
            PriorityClass::Lowest => 1,
            PriorityClass::Low => 2,
            PriorityClass::Normal => 3,
            PriorityClass::High => 4,
            PriorityClass::Highest => 5,
        }
    }

    /// Gets the class as string
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityClass::Lowest => "lowest",
            PriorityClass::Low => "low",
            PriorityClass::Normal => "normal",
            PriorityClass::High => "high",
            PriorityClass::Highest => "highest",
        }
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message flowing through the task queue
///
/// `queued_at` is serialized as unix seconds so the queue's Lua scripts
/// can recompute scores without parsing timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Task to execute
    pub task_id: Uuid,

    /// Owner at submission time, revalidated by the worker
    pub user_id: Uuid,

    /// Scheduling class
    pub priority: PriorityClass,

    /// When the message was first enqueued
    #[serde(with = "chrono::serde::ts_seconds")]
    pub queued_at: DateTime<Utc>,

    /// Delivery attempts so far (stamped at claim time)
    pub attempts: u32,

    /// Idempotency key; the execution id
    pub message_id: String,

    /// Free-form string attributes
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl TaskMessage {
    /// Builds the message for a freshly submitted execution
    pub fn for_execution(
        task_id: Uuid,
        user_id: Uuid,
        execution_id: Uuid,
        task_priority: i32,
        script_type: ScriptType,
    ) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_EXECUTION_ID.to_string(), execution_id.to_string());
        attributes.insert(ATTR_SCRIPT_TYPE.to_string(), script_type.as_str().to_string());
        attributes.insert(ATTR_PRIORITY_NUMERIC.to_string(), task_priority.to_string());

        Self {
            task_id,
            user_id,
            priority: PriorityClass::from_task_priority(task_priority),
            queued_at: Utc::now(),
            attempts: 0,
            message_id: execution_id.to_string(),
            attributes,
        }
    }

    /// Execution id carried in the attributes
    pub fn execution_id(&self) -> Option<Uuid> {
        self.attributes
            .get(ATTR_EXECUTION_ID)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Sorted-set score: priority class dominates, age breaks ties
    ///
    /// `score = weight * 10^10 + (now - queued_at)` in seconds; an older
    /// message in the same class scores higher and is dequeued first.
    pub fn score(&self, now: DateTime<Utc>) -> f64 {
        let age = (now - self.queued_at).num_seconds().max(0) as f64;
        f64::from(self.priority.weight()) * PRIORITY_SCORE_BASE + age
    }
}

/// Opaque per-dequeue lease over a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    /// Message the lease covers
    pub message_id: String,

    /// Unix timestamp the lease was issued
    pub issued_at: i64,

    /// Random lease discriminator
    pub nonce: String,
}

impl ReceiptHandle {
    /// Issues a fresh nonce for a new lease
    pub fn generate_nonce() -> String {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.message_id, self.issued_at, self.nonce)
    }
}

impl FromStr for ReceiptHandle {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(message_id), Some(issued), Some(nonce)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(QueueError::MalformedReceipt);
        };

        if message_id.is_empty() || nonce.is_empty() {
            return Err(QueueError::MalformedReceipt);
        }

        let issued_at: i64 = issued.parse().map_err(|_| QueueError::MalformedReceipt)?;

        Ok(ReceiptHandle {
            message_id: message_id.to_string(),
            issued_at,
            nonce: nonce.to_string(),
        })
    }
}

/// A dequeued message with its lease
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    /// The claimed message, attempts already incremented
    pub message: TaskMessage,

    /// Lease proving this consumer is the current processor
    pub receipt: ReceiptHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_mapping() {
        assert_eq!(PriorityClass::from_task_priority(0), PriorityClass::Normal);
        assert_eq!(PriorityClass::from_task_priority(1), PriorityClass::Lowest);
        assert_eq!(PriorityClass::from_task_priority(2), PriorityClass::Lowest);
        assert_eq!(PriorityClass::from_task_priority(3), PriorityClass::Low);
        assert_eq!(PriorityClass::from_task_priority(5), PriorityClass::Normal);
        assert_eq!(PriorityClass::from_task_priority(7), PriorityClass::High);
        assert_eq!(PriorityClass::from_task_priority(9), PriorityClass::Highest);
        assert_eq!(PriorityClass::from_task_priority(10), PriorityClass::Highest);
    }

    #[test]
    fn test_priority_dominates_age_in_score() {
        let now = Utc::now();
        let old_normal = TaskMessage {
            queued_at: now - chrono::Duration::days(30),
            ..TaskMessage::for_execution(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                5,
                ScriptType::Python,
            )
        };
        let fresh_high = TaskMessage::for_execution(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            8,
            ScriptType::Python,
        );

        assert!(fresh_high.score(now) > old_normal.score(now));
    }

    #[test]
    fn test_age_breaks_ties_within_class() {
        let now = Utc::now();
        let base = TaskMessage::for_execution(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            5,
            ScriptType::Bash,
        );
        let older = TaskMessage {
            queued_at: now - chrono::Duration::minutes(10),
            ..base.clone()
        };

        assert!(older.score(now) > base.score(now));
    }

    #[test]
    fn test_message_wire_roundtrip() {
        let msg = TaskMessage::for_execution(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            7,
            ScriptType::Go,
        );

        let json = serde_json::to_string(&msg).unwrap();
        // queued_at rides as unix seconds for the Lua scripts
        let raw: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(raw["queued_at"].is_i64());

        let decoded: TaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.message_id, msg.message_id);
        assert_eq!(decoded.priority, PriorityClass::High);
        assert_eq!(decoded.execution_id(), msg.execution_id());
    }

    #[test]
    fn test_receipt_roundtrip() {
        let receipt = ReceiptHandle {
            message_id: Uuid::new_v4().to_string(),
            issued_at: 1_700_000_000,
            nonce: ReceiptHandle::generate_nonce(),
        };

        let parsed: ReceiptHandle = receipt.to_string().parse().unwrap();
        assert_eq!(parsed, receipt);
    }

    #[test]
    fn test_malformed_receipts_rejected() {
        assert!("".parse::<ReceiptHandle>().is_err());
        assert!("justone".parse::<ReceiptHandle>().is_err());
        assert!("a:b".parse::<ReceiptHandle>().is_err());
        assert!("id:notanumber:nonce".parse::<ReceiptHandle>().is_err());
    }
}
