/// Cancel signaling between the API and running workers
///
/// When a user cancels an execution, the store is updated first (it is
/// the source of truth) and then a control message is published on Redis
/// Pub/Sub so a worker currently running the sandbox can tear it down.
/// The signal is idempotent and best-effort: a missed message only means
/// the sandbox runs to completion and its finalize attempt is rejected as
/// a conflict.
///
/// # Channel and format
///
/// Channel `ctrl:{execution_id}`, JSON payload:
///
/// ```json
/// {"command": "cancel", "reason": "user requested"}
/// ```

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::task_queue::TaskQueue;
use crate::queue::QueueError;

/// Control command types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    /// Cancel the running execution
    Cancel,
}

/// Control message payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Command to execute
    pub command: ControlCommand,

    /// Optional reason/metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ControlMessage {
    /// Creates a cancel message
    pub fn cancel(reason: Option<String>) -> Self {
        ControlMessage {
            command: ControlCommand::Cancel,
            reason,
        }
    }
}

/// Control channel name for an execution
pub fn control_channel(execution_id: Uuid) -> String {
    format!("ctrl:{}", execution_id)
}

/// Publisher half of the control channel
#[derive(Clone)]
pub struct CancelSignaler {
    conn: ConnectionManager,
}

impl CancelSignaler {
    /// Connects a standalone signaler
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Signaler sharing the queue's connection
    pub fn from_queue(queue: &TaskQueue) -> Self {
        Self {
            conn: queue.conn.clone(),
        }
    }

    /// Publishes a cancel for the execution
    ///
    /// Returns the number of subscribers that saw it (zero when no worker
    /// is currently running the execution, which is fine).
    pub async fn send_cancel(
        &self,
        execution_id: Uuid,
        reason: Option<String>,
    ) -> Result<u32, QueueError> {
        let payload = serde_json::to_string(&ControlMessage::cancel(reason))?;

        let mut conn = self.conn.clone();
        let receivers: u32 = conn.publish(control_channel(execution_id), payload).await?;

        tracing::debug!(
            execution_id = %execution_id,
            receivers,
            "Published cancel control message"
        );
        Ok(receivers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            control_channel(id),
            "ctrl:550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_message_wire_format() {
        let msg = ControlMessage::cancel(Some("user requested".to_string()));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"command\":\"cancel\""));
        assert!(json.contains("user requested"));

        let bare = ControlMessage::cancel(None);
        let json = serde_json::to_string(&bare).unwrap();
        assert!(!json.contains("reason"));
    }
}
