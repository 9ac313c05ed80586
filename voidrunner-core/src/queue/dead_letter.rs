/// Dead-letter queue operations
///
/// Messages land here when their retries are exhausted or their failure
/// was classified non-retryable. Each entry keeps the full original
/// message plus `{failure_reason, failed_at}` so operators can inspect,
/// group, requeue, or purge them.

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use super::message::TaskMessage;
use super::task_queue::TaskQueue;
use super::QueueError;

/// Requeue a dead letter: restore the message with attempts reset and
/// failure attributes cleared, then index it as ready.
///
/// KEYS[1] = dead, KEYS[2] = dead index, KEYS[3] = messages,
/// KEYS[4] = ready.
/// ARGV[1] = message_id, ARGV[2] = now.
/// Returns: 1 requeued, 0 not found.
const LUA_REQUEUE_DEAD: &str = r#"
local entry = redis.call('HGET', KEYS[1], ARGV[1])
if not entry then
    return 0
end
local msg = cjson.decode(entry)['message']
msg['attempts'] = 0
if type(msg['attributes']) == 'table' then
    msg['attributes']['failure_reason'] = nil
    msg['attributes']['last_attempt'] = nil
    msg['attributes']['next_retry_at'] = nil
end
local weights = {lowest=1, low=2, normal=3, high=4, highest=5}
local w = weights[msg['priority']] or 3
local now = tonumber(ARGV[2])
local score = w * 1e10 + (now - (msg['queued_at'] or now))
redis.call('HSET', KEYS[3], ARGV[1], cjson.encode(msg))
redis.call('ZADD', KEYS[4], score, ARGV[1])
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return 1
"#;

/// Purge dead letters older than the cutoff.
///
/// KEYS[1] = dead, KEYS[2] = dead index.
/// ARGV[1] = failed_at cutoff.
/// Returns: number of purged entries.
const LUA_PURGE_OLD: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', tonumber(ARGV[1]))
for _, id in ipairs(ids) do
    redis.call('HDEL', KEYS[1], id)
end
redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', tonumber(ARGV[1]))
return #ids
"#;

/// A message that exhausted its retries or failed permanently
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The message as it looked at its final failure
    pub message: TaskMessage,

    /// Why the final delivery failed
    pub failure_reason: String,

    /// When the message was dead-lettered
    #[serde(with = "chrono::serde::ts_seconds")]
    pub failed_at: DateTime<Utc>,
}

impl TaskQueue {
    /// Moves a dead-lettered message back to the task queue
    ///
    /// The message restarts with `attempts = 0` and its failure
    /// attributes cleared.
    pub async fn requeue_dead(&self, message_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let requeued: i64 = Script::new(LUA_REQUEUE_DEAD)
            .key(&self.keys.dead)
            .key(&self.keys.dead_index)
            .key(&self.keys.messages)
            .key(&self.keys.ready)
            .arg(message_id)
            .arg(Utc::now().timestamp())
            .invoke_async(&mut conn)
            .await?;

        if requeued == 0 {
            return Err(QueueError::MessageNotFound(message_id.to_string()));
        }

        info!(message_id, "Requeued dead-lettered message");
        Ok(())
    }

    /// Removes dead letters older than `max_age`
    pub async fn purge_old(&self, max_age: Duration) -> Result<u64, QueueError> {
        let cutoff = Utc::now().timestamp() - max_age.as_secs() as i64;

        let mut conn = self.conn.clone();
        let purged: u64 = Script::new(LUA_PURGE_OLD)
            .key(&self.keys.dead)
            .key(&self.keys.dead_index)
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;

        if purged > 0 {
            info!(purged, "Purged old dead letters");
        }
        Ok(purged)
    }

    /// Lists the most recently dead-lettered messages
    pub async fn list_dead(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrevrange(&self.keys.dead_index, 0, limit as isize - 1)
            .await?;

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<String> = conn.hget(&self.keys.dead, &id).await?;
            match raw {
                Some(raw) => match serde_json::from_str::<DeadLetter>(&raw) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!(message_id = %id, error = %e, "Skipping unreadable dead letter")
                    }
                },
                None => {}
            }
        }

        Ok(entries)
    }

    /// Dead-letter counts grouped by failure reason
    pub async fn dead_letter_stats(&self) -> Result<HashMap<String, u64>, QueueError> {
        let mut conn = self.conn.clone();
        let raw_entries: Vec<String> = conn.hvals(&self.keys.dead).await?;

        let mut by_reason: HashMap<String, u64> = HashMap::new();
        for raw in raw_entries {
            match serde_json::from_str::<DeadLetter>(&raw) {
                Ok(entry) => *by_reason.entry(entry.failure_reason).or_insert(0) += 1,
                Err(_) => *by_reason.entry("unparseable".to_string()).or_insert(0) += 1,
            }
        }

        Ok(by_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::ScriptType;
    use uuid::Uuid;

    #[test]
    fn test_dead_letter_wire_roundtrip() {
        let entry = DeadLetter {
            message: TaskMessage::for_execution(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                5,
                ScriptType::Python,
            ),
            failure_reason: "sandbox unavailable".to_string(),
            failed_at: Utc::now(),
        };

        let json = serde_json::to_string(&entry).unwrap();
        let decoded: DeadLetter = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.failure_reason, "sandbox unavailable");
        assert_eq!(decoded.message.message_id, entry.message.message_id);
    }

    // Redis-backed requeue/purge behavior is covered in tests/queue_tests.rs
}
