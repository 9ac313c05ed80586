/// Control stream listener
///
/// Subscribes to the per-execution cancel channel while a sandbox run is
/// in flight and fires the execution's cancellation token when a cancel
/// command arrives. The durable cancellation lives in the store; this
/// path only exists to tear the sandbox down promptly.
///
/// # Example
///
/// ```no_run
/// use voidrunner_worker::control::ControlListener;
/// use tokio_util::sync::CancellationToken;
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = ControlListener::new("redis://localhost:6379")?;
/// let execution_id = Uuid::new_v4();
/// let cancel_token = CancellationToken::new();
///
/// let handle = listener.listen(execution_id, cancel_token.clone());
///
/// // sandbox runs ...
///
/// // stop listening once the run finishes
/// handle.abort();
/// # Ok(())
/// # }
/// ```

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use voidrunner_core::control::{control_channel, ControlCommand, ControlMessage};

/// Control listener error
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Redis connection error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Message parsing error
    #[error("failed to parse control message: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Subscriber half of the control channel
#[derive(Clone)]
pub struct ControlListener {
    client: redis::Client,
}

impl ControlListener {
    /// Creates a listener for the given Redis URL
    ///
    /// Pub/Sub needs a dedicated connection per subscription, so the
    /// listener keeps the client and connects lazily in `listen`.
    pub fn new(url: &str) -> Result<Self, ControlError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    /// Starts listening for cancel commands for one execution
    ///
    /// Spawns a background task that cancels `cancel_token` when a cancel
    /// command arrives. Abort the returned handle once the run completes.
    pub fn listen(&self, execution_id: Uuid, cancel_token: CancellationToken) -> JoinHandle<()> {
        let client = self.client.clone();

        tokio::spawn(async move {
            if let Err(e) = listen_loop(client, execution_id, cancel_token).await {
                tracing::error!(
                    execution_id = %execution_id,
                    error = %e,
                    "Control listener error"
                );
            }
        })
    }
}

async fn listen_loop(
    client: redis::Client,
    execution_id: Uuid,
    cancel_token: CancellationToken,
) -> Result<(), ControlError> {
    let channel = control_channel(execution_id);

    let conn = client.get_async_connection().await?;
    let mut pubsub = conn.into_pubsub();
    pubsub.subscribe(&channel).await?;

    tracing::debug!(
        execution_id = %execution_id,
        channel = %channel,
        "Listening for control messages"
    );

    let mut stream = pubsub.on_message();

    // The token doubles as the shutdown signal for this subscription:
    // awaiting it directly yields None the moment the run is cancelled
    // elsewhere (user cancel, worker shutdown), no polling involved.
    while let Some(msg) = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => None,
        msg = stream.next() => msg,
    } {
        let payload = match msg.get_payload::<String>() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read control payload");
                continue;
            }
        };

        match serde_json::from_str::<ControlMessage>(&payload) {
            Ok(ControlMessage {
                command: ControlCommand::Cancel,
                reason,
            }) => {
                tracing::info!(
                    execution_id = %execution_id,
                    reason = ?reason,
                    "Received cancel command"
                );
                cancel_token.cancel();
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, payload = %payload, "Failed to parse control message");
            }
        }
    }

    tracing::debug!(execution_id = %execution_id, "Control subscription closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_construction() {
        assert!(ControlListener::new("redis://localhost:6379").is_ok());
        assert!(ControlListener::new("not a url").is_err());
    }

    // End-to-end publish/subscribe behavior needs Redis and is covered in
    // tests/dispatcher_tests.rs
}
