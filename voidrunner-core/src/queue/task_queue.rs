/// Redis-backed priority task queue
///
/// [`TaskQueue`] implements the task/retry/dead-letter trio on Redis
/// sorted sets and hashes. Every multi-key mutation goes through a Lua
/// script (`redis::Script`) so claim, ack, release, and fail are each a
/// single atomic round trip.
///
/// # Key Schema
///
/// | Key | Type | Purpose |
/// |-----|------|---------|
/// | `{q}` | Sorted set | Ready messages, score = priority-dominant |
/// | `{q}:messages` | Hash | message_id → TaskMessage JSON |
/// | `{q}:inflight` | Sorted set | Claimed ids, score = visibility deadline |
/// | `{q}:receipts` | Hash | message_id → current receipt handle |
/// | `{retry}` | Sorted set | Parked ids, score = next_retry_at |
/// | `{dead}` | Hash | message_id → dead-letter JSON |
/// | `{dead}:index` | Sorted set | Dead ids, score = failed_at |
///
/// # Delivery semantics
///
/// At-least-once. A successful dequeue leases the message to the caller
/// via a receipt; the message is invisible until the caller deletes or
/// releases it, or the visibility timeout expires and the maintenance
/// sweeper returns it to the ready set.

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::message::{DeliveredMessage, ReceiptHandle, TaskMessage};
use super::{QueueConfig, QueueError};

// ---------------------------------------------------------------------------
// Lua script constants
// ---------------------------------------------------------------------------

/// Idempotent enqueue: register the body, then index it as ready.
///
/// KEYS[1] = messages hash, KEYS[2] = ready zset.
/// ARGV[1] = message_id, ARGV[2] = body JSON, ARGV[3] = score.
/// Returns: 1 on success, 0 if the id already exists.
const LUA_ENQUEUE: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[2], tonumber(ARGV[3]), ARGV[1])
return 1
"#;

/// Atomic claim: pop the highest-score ready ids, bump attempts, lease.
///
/// KEYS[1] = ready, KEYS[2] = messages, KEYS[3] = inflight, KEYS[4] = receipts.
/// ARGV[1] = batch, ARGV[2] = now, ARGV[3] = visibility deadline,
/// ARGV[4..] = one nonce per batch slot.
/// Returns: flat array [body, receipt, body, receipt, ...].
const LUA_CLAIM: &str = r#"
local batch = tonumber(ARGV[1])
local ids = redis.call('ZREVRANGE', KEYS[1], 0, batch - 1)
local out = {}
for i, id in ipairs(ids) do
    redis.call('ZREM', KEYS[1], id)
    local body = redis.call('HGET', KEYS[2], id)
    if body then
        local msg = cjson.decode(body)
        msg['attempts'] = (msg['attempts'] or 0) + 1
        body = cjson.encode(msg)
        redis.call('HSET', KEYS[2], id, body)
        local receipt = id .. ':' .. ARGV[2] .. ':' .. ARGV[3 + i]
        redis.call('ZADD', KEYS[3], tonumber(ARGV[3]), id)
        redis.call('HSET', KEYS[4], id, receipt)
        table.insert(out, body)
        table.insert(out, receipt)
    end
end
return out
"#;

/// Ack: verify the lease, then remove every trace of the message.
///
/// KEYS[1] = inflight, KEYS[2] = receipts, KEYS[3] = messages.
/// ARGV[1] = message_id, ARGV[2] = receipt.
/// Returns: 1 acked, 0 stale receipt.
const LUA_ACK: &str = r#"
local current = redis.call('HGET', KEYS[2], ARGV[1])
if not current or current ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
return 1
"#;

/// Release: verify the lease, return the message for redelivery, either
/// immediately (ready, score recomputed) or delayed (retry zset).
///
/// KEYS[1] = inflight, KEYS[2] = receipts, KEYS[3] = messages,
/// KEYS[4] = ready, KEYS[5] = retry.
/// ARGV[1] = message_id, ARGV[2] = receipt, ARGV[3] = now,
/// ARGV[4] = visible_at (0 = immediately).
/// Returns: 1 released, 0 stale receipt, -1 body missing.
const LUA_RELEASE: &str = r#"
local current = redis.call('HGET', KEYS[2], ARGV[1])
if not current or current ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
local body = redis.call('HGET', KEYS[3], ARGV[1])
if not body then
    return -1
end
local visible_at = tonumber(ARGV[4])
if visible_at > 0 then
    redis.call('ZADD', KEYS[5], visible_at, ARGV[1])
else
    local msg = cjson.decode(body)
    local weights = {lowest=1, low=2, normal=3, high=4, highest=5}
    local w = weights[msg['priority']] or 3
    local now = tonumber(ARGV[3])
    local score = w * 1e10 + (now - (msg['queued_at'] or now))
    redis.call('ZADD', KEYS[4], score, ARGV[1])
end
return 1
"#;

/// Fail: verify the lease, then park the message for retry or move it to
/// the dead-letter queue, recording the failure reason either way.
///
/// KEYS[1] = inflight, KEYS[2] = receipts, KEYS[3] = messages,
/// KEYS[4] = retry, KEYS[5] = dead, KEYS[6] = dead index.
/// ARGV[1] = message_id, ARGV[2] = receipt, ARGV[3] = now,
/// ARGV[4] = failure reason, ARGV[5] = 'retry' | 'dead',
/// ARGV[6] = next_retry_at (retry only).
/// Returns: 1 parked for retry, 2 dead-lettered, 0 stale receipt,
/// -1 body missing.
const LUA_FAIL: &str = r#"
local current = redis.call('HGET', KEYS[2], ARGV[1])
if not current or current ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
local body = redis.call('HGET', KEYS[3], ARGV[1])
if not body then
    return -1
end
local msg = cjson.decode(body)
if type(msg['attributes']) ~= 'table' then
    msg['attributes'] = {}
end
msg['attributes']['failure_reason'] = ARGV[4]
msg['attributes']['last_attempt'] = ARGV[3]
if ARGV[5] == 'dead' then
    local entry = cjson.encode({
        message = msg,
        failure_reason = ARGV[4],
        failed_at = tonumber(ARGV[3]),
    })
    redis.call('HSET', KEYS[5], ARGV[1], entry)
    redis.call('ZADD', KEYS[6], tonumber(ARGV[3]), ARGV[1])
    redis.call('HDEL', KEYS[3], ARGV[1])
    return 2
end
msg['attributes']['next_retry_at'] = ARGV[6]
redis.call('HSET', KEYS[3], ARGV[1], cjson.encode(msg))
redis.call('ZADD', KEYS[4], tonumber(ARGV[6]), ARGV[1])
return 1
"#;

/// Visibility reclaimer: move expired leases back to the ready set.
///
/// KEYS[1] = inflight, KEYS[2] = receipts, KEYS[3] = messages,
/// KEYS[4] = ready.
/// ARGV[1] = deadline cutoff (now - skew tolerance), ARGV[2] = now,
/// ARGV[3] = batch.
/// Returns: number of reclaimed messages.
const LUA_RECLAIM: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', tonumber(ARGV[1]), 'LIMIT', 0, tonumber(ARGV[3]))
local count = 0
for _, id in ipairs(ids) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('HDEL', KEYS[2], id)
    local body = redis.call('HGET', KEYS[3], id)
    if body then
        local msg = cjson.decode(body)
        local weights = {lowest=1, low=2, normal=3, high=4, highest=5}
        local w = weights[msg['priority']] or 3
        local now = tonumber(ARGV[2])
        local score = w * 1e10 + (now - (msg['queued_at'] or now))
        redis.call('ZADD', KEYS[4], score, id)
        count = count + 1
    end
end
return count
"#;

/// Retry promoter: move due retries back to the ready set.
///
/// KEYS[1] = retry, KEYS[2] = messages, KEYS[3] = ready.
/// ARGV[1] = now, ARGV[2] = batch.
/// Returns: number of promoted messages.
const LUA_PROMOTE: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', tonumber(ARGV[1]), 'LIMIT', 0, tonumber(ARGV[2]))
local count = 0
for _, id in ipairs(ids) do
    redis.call('ZREM', KEYS[1], id)
    local body = redis.call('HGET', KEYS[2], id)
    if body then
        local msg = cjson.decode(body)
        local weights = {lowest=1, low=2, normal=3, high=4, highest=5}
        local w = weights[msg['priority']] or 3
        local now = tonumber(ARGV[1])
        local score = w * 1e10 + (now - (msg['queued_at'] or now))
        redis.call('ZADD', KEYS[3], score, id)
        count = count + 1
    end
end
return count
"#;

/// Oldest ready message: minimum queued_at among a bounded sample.
///
/// KEYS[1] = ready, KEYS[2] = messages.
/// ARGV[1] = sample size.
/// Returns: the minimum queued_at, or -1 when empty.
const LUA_OLDEST: &str = r#"
local ids = redis.call('ZRANGE', KEYS[1], 0, tonumber(ARGV[1]) - 1)
local oldest = -1
for _, id in ipairs(ids) do
    local body = redis.call('HGET', KEYS[2], id)
    if body then
        local msg = cjson.decode(body)
        local q = msg['queued_at']
        if q and (oldest < 0 or q < oldest) then
            oldest = q
        end
    end
end
return oldest
"#;

// ---------------------------------------------------------------------------
// Queue types
// ---------------------------------------------------------------------------

/// Where a failed delivery went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Parked for a later redelivery
    Retried,

    /// Moved to the dead-letter queue
    DeadLettered,
}

/// Approximate queue depth statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Ready messages awaiting dispatch
    pub approx_depth: u64,

    /// Messages currently leased to consumers
    pub in_flight: u64,

    /// Messages parked in the retry queue
    pub delayed: u64,

    /// Dead-lettered messages
    pub dead: u64,

    /// Age of the oldest ready message (bounded sample)
    pub oldest_age: Option<Duration>,
}

/// Derived Redis key names for one queue configuration
#[derive(Debug, Clone)]
pub(crate) struct QueueKeys {
    pub ready: String,
    pub messages: String,
    pub inflight: String,
    pub receipts: String,
    pub retry: String,
    pub dead: String,
    pub dead_index: String,
}

impl QueueKeys {
    fn new(config: &QueueConfig) -> Self {
        Self {
            ready: config.task_queue_name.clone(),
            messages: format!("{}:messages", config.task_queue_name),
            inflight: format!("{}:inflight", config.task_queue_name),
            receipts: format!("{}:receipts", config.task_queue_name),
            retry: config.retry_queue_name.clone(),
            dead: config.dead_letter_queue_name.clone(),
            dead_index: format!("{}:index", config.dead_letter_queue_name),
        }
    }
}

/// Redis-backed priority queue with retry and dead-letter semantics
#[derive(Clone)]
pub struct TaskQueue {
    pub(crate) conn: ConnectionManager,
    pub(crate) config: QueueConfig,
    pub(crate) keys: QueueKeys,
}

impl TaskQueue {
    /// Connects to the queue backend and verifies it with a PING
    pub async fn connect(config: QueueConfig) -> Result<Self, QueueError> {
        info!(url = %config.url, queue = %config.task_queue_name, "Connecting to queue backend");

        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        let keys = QueueKeys::new(&config);

        let queue = Self { conn, config, keys };
        queue.ping().await?;

        Ok(queue)
    }

    /// Health probe (`PING`)
    pub async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::ResponseError,
                "unexpected PING reply",
            ))))
        }
    }

    /// Retry policy in effect for this queue
    pub fn retry_policy(&self) -> &super::backoff::RetryPolicy {
        &self.config.retry
    }

    /// Enqueues a message
    ///
    /// Enqueue is idempotent by message id: a duplicate id yields
    /// `QueueError::Duplicate` and leaves the existing message untouched.
    pub async fn enqueue(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let body = serde_json::to_string(message)?;
        let score = message.score(Utc::now());

        let mut conn = self.conn.clone();
        let added: i64 = Script::new(LUA_ENQUEUE)
            .key(&self.keys.messages)
            .key(&self.keys.ready)
            .arg(&message.message_id)
            .arg(body)
            .arg(score)
            .invoke_async(&mut conn)
            .await?;

        if added == 0 {
            return Err(QueueError::Duplicate(message.message_id.clone()));
        }

        debug!(
            message_id = %message.message_id,
            task_id = %message.task_id,
            priority = %message.priority,
            "Enqueued task message"
        );
        Ok(())
    }

    /// Dequeues up to `max_batch` messages, long-polling up to `wait`
    ///
    /// Returns highest-priority-class first; within a class, oldest first.
    /// Each returned message is leased for the visibility timeout.
    pub async fn dequeue(
        &self,
        max_batch: usize,
        wait: Duration,
    ) -> Result<Vec<DeliveredMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let claimed = self.claim(max_batch).await?;
            if !claimed.is_empty() {
                return Ok(claimed);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn claim(&self, max_batch: usize) -> Result<Vec<DeliveredMessage>, QueueError> {
        let batch = max_batch.max(1);
        let now = Utc::now().timestamp();
        let visibility_deadline = now + self.config.visibility_timeout.as_secs() as i64;

        let script = Script::new(LUA_CLAIM);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(&self.keys.ready)
            .key(&self.keys.messages)
            .key(&self.keys.inflight)
            .key(&self.keys.receipts)
            .arg(batch)
            .arg(now)
            .arg(visibility_deadline);
        for _ in 0..batch {
            invocation.arg(ReceiptHandle::generate_nonce());
        }

        let mut conn = self.conn.clone();
        let flat: Vec<String> = invocation.invoke_async(&mut conn).await?;

        let mut delivered = Vec::with_capacity(flat.len() / 2);
        for pair in flat.chunks_exact(2) {
            let message: TaskMessage = serde_json::from_str(&pair[0])?;
            let receipt: ReceiptHandle = pair[1].parse()?;
            delivered.push(DeliveredMessage { message, receipt });
        }

        Ok(delivered)
    }

    /// Confirms processing of a leased message, removing every trace
    pub async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let acked: i64 = Script::new(LUA_ACK)
            .key(&self.keys.inflight)
            .key(&self.keys.receipts)
            .key(&self.keys.messages)
            .arg(&receipt.message_id)
            .arg(receipt.to_string())
            .invoke_async(&mut conn)
            .await?;

        if acked == 0 {
            return Err(QueueError::ReceiptNotCurrent(receipt.message_id.clone()));
        }

        debug!(message_id = %receipt.message_id, "Acked queue message");
        Ok(())
    }

    /// Returns a leased message for redelivery
    ///
    /// With `make_visible_after`, the message is parked until the delay
    /// elapses; otherwise it is immediately visible again.
    pub async fn release(
        &self,
        receipt: &ReceiptHandle,
        make_visible_after: Option<Duration>,
    ) -> Result<(), QueueError> {
        let now = Utc::now().timestamp();
        let visible_at = make_visible_after
            .map(|d| now + d.as_secs() as i64)
            .unwrap_or(0);

        let mut conn = self.conn.clone();
        let released: i64 = Script::new(LUA_RELEASE)
            .key(&self.keys.inflight)
            .key(&self.keys.receipts)
            .key(&self.keys.messages)
            .key(&self.keys.ready)
            .key(&self.keys.retry)
            .arg(&receipt.message_id)
            .arg(receipt.to_string())
            .arg(now)
            .arg(visible_at)
            .invoke_async(&mut conn)
            .await?;

        match released {
            1 => {
                debug!(message_id = %receipt.message_id, "Released queue message");
                Ok(())
            }
            -1 => Err(QueueError::MessageNotFound(receipt.message_id.clone())),
            _ => Err(QueueError::ReceiptNotCurrent(receipt.message_id.clone())),
        }
    }

    /// Records a failed delivery and routes the message
    ///
    /// Retryable failures park the message with the policy's jittered
    /// exponential delay until the delivery count is exhausted; permanent
    /// failures and exhausted messages go to the dead-letter queue with
    /// the failure reason recorded.
    pub async fn fail(
        &self,
        delivered: &DeliveredMessage,
        reason: &str,
        retryable: bool,
    ) -> Result<FailDisposition, QueueError> {
        let attempts = delivered.message.attempts;
        let policy = &self.config.retry;
        let now = Utc::now().timestamp();

        let to_dead = !retryable || policy.is_exhausted(attempts);
        let (disposition, retry_at) = if to_dead {
            ("dead", 0)
        } else {
            let delay = policy.jittered_delay(attempts);
            ("retry", now + delay.as_secs() as i64)
        };

        let receipt = &delivered.receipt;
        let mut conn = self.conn.clone();
        let routed: i64 = Script::new(LUA_FAIL)
            .key(&self.keys.inflight)
            .key(&self.keys.receipts)
            .key(&self.keys.messages)
            .key(&self.keys.retry)
            .key(&self.keys.dead)
            .key(&self.keys.dead_index)
            .arg(&receipt.message_id)
            .arg(receipt.to_string())
            .arg(now)
            .arg(reason)
            .arg(disposition)
            .arg(retry_at)
            .invoke_async(&mut conn)
            .await?;

        match routed {
            1 => {
                info!(
                    message_id = %receipt.message_id,
                    attempts,
                    reason,
                    retry_at,
                    "Parked failed message for retry"
                );
                Ok(FailDisposition::Retried)
            }
            2 => {
                warn!(
                    message_id = %receipt.message_id,
                    attempts,
                    reason,
                    "Dead-lettered message"
                );
                Ok(FailDisposition::DeadLettered)
            }
            -1 => Err(QueueError::MessageNotFound(receipt.message_id.clone())),
            _ => Err(QueueError::ReceiptNotCurrent(receipt.message_id.clone())),
        }
    }

    /// Moves expired leases back to the ready set (bounded batch)
    ///
    /// The cutoff subtracts the configured clock-skew tolerance so a
    /// slightly fast sweeper cannot steal a live lease.
    pub async fn reclaim_expired(&self) -> Result<u64, QueueError> {
        let now = Utc::now().timestamp();
        let cutoff = now - self.config.clock_skew_tolerance.as_secs() as i64;

        let mut conn = self.conn.clone();
        let count: u64 = Script::new(LUA_RECLAIM)
            .key(&self.keys.inflight)
            .key(&self.keys.receipts)
            .key(&self.keys.messages)
            .key(&self.keys.ready)
            .arg(cutoff)
            .arg(now)
            .arg(self.config.sweep_batch)
            .invoke_async(&mut conn)
            .await?;

        if count > 0 {
            info!(count, "Reclaimed expired message leases");
        }
        Ok(count)
    }

    /// Moves due retries back to the ready set (bounded batch)
    pub async fn promote_due_retries(&self) -> Result<u64, QueueError> {
        let now = Utc::now().timestamp();

        let mut conn = self.conn.clone();
        let count: u64 = Script::new(LUA_PROMOTE)
            .key(&self.keys.retry)
            .key(&self.keys.messages)
            .key(&self.keys.ready)
            .arg(now)
            .arg(self.config.sweep_batch)
            .invoke_async(&mut conn)
            .await?;

        if count > 0 {
            debug!(count, "Promoted due retries");
        }
        Ok(count)
    }

    /// Checks whether a message id is currently anywhere in the queue
    /// (ready, in flight, or parked for retry)
    pub async fn contains(&self, message_id: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.hexists(&self.keys.messages, message_id).await?;
        Ok(exists)
    }

    /// Approximate queue statistics
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn.clone();

        let approx_depth: u64 = conn.zcard(&self.keys.ready).await?;
        let in_flight: u64 = conn.zcard(&self.keys.inflight).await?;
        let delayed: u64 = conn.zcard(&self.keys.retry).await?;
        let dead: u64 = conn.hlen(&self.keys.dead).await?;

        let oldest: i64 = Script::new(LUA_OLDEST)
            .key(&self.keys.ready)
            .key(&self.keys.messages)
            .arg(self.config.sweep_batch)
            .invoke_async(&mut conn)
            .await?;

        let oldest_age = (oldest >= 0)
            .then(|| (Utc::now().timestamp() - oldest).max(0))
            .map(|secs| Duration::from_secs(secs as u64));

        Ok(QueueStats {
            approx_depth,
            in_flight,
            delayed,
            dead,
            oldest_age,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation() {
        let config = QueueConfig::default();
        let keys = QueueKeys::new(&config);

        assert_eq!(keys.ready, "voidrunner:tasks");
        assert_eq!(keys.messages, "voidrunner:tasks:messages");
        assert_eq!(keys.inflight, "voidrunner:tasks:inflight");
        assert_eq!(keys.receipts, "voidrunner:tasks:receipts");
        assert_eq!(keys.retry, "voidrunner:tasks:retry");
        assert_eq!(keys.dead, "voidrunner:tasks:dead");
        assert_eq!(keys.dead_index, "voidrunner:tasks:dead:index");
    }

    // Redis-backed behavior (round-trip, visibility expiry, priority
    // precedence, retry-then-DLQ) is covered in tests/queue_tests.rs
}
