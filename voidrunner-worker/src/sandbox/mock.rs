/// Mock sandbox for tests and local development
///
/// Plays back a scripted sequence of behaviors, one per `run` call; the
/// last behavior repeats once the script is exhausted. Respects both the
/// wall-clock timeout and the cancellation token the way a real backend
/// must, so dispatcher tests exercise the same code paths.
///
/// # Example
///
/// ```no_run
/// use voidrunner_worker::sandbox::mock::{MockBehavior, MockSandbox};
/// use std::time::Duration;
///
/// // Fail twice with a transient error, then complete
/// let sandbox = MockSandbox::scripted(vec![
///     MockBehavior::TransientFailure("sandbox unavailable".to_string()),
///     MockBehavior::TransientFailure("sandbox unavailable".to_string()),
///     MockBehavior::Complete {
///         return_code: 0,
///         stdout: Some("1\n".to_string()),
///         stderr: None,
///         duration: Duration::from_millis(5),
///     },
/// ]);
/// ```

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use voidrunner_core::models::execution::{ExecutionResult, ExecutionStatus};

use super::{ExecutionSpec, Sandbox, SandboxError};

/// One scripted outcome
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Run for `duration`, then complete with the given streams
    Complete {
        return_code: i32,
        stdout: Option<String>,
        stderr: Option<String>,
        duration: Duration,
    },

    /// Run for `duration`, then exit non-zero
    FailScript {
        return_code: i32,
        stderr: Option<String>,
        duration: Duration,
    },

    /// Refuse to run with a transient infrastructure error
    TransientFailure(String),

    /// Refuse to run with a permanent infrastructure error
    PermanentFailure(String),

    /// Run forever (until the timeout or cancellation fires)
    Hang,
}

/// Scripted sandbox double
pub struct MockSandbox {
    script: Vec<MockBehavior>,
    next: AtomicUsize,
}

impl MockSandbox {
    /// Sandbox that plays the given behaviors in order, repeating the last
    pub fn scripted(script: Vec<MockBehavior>) -> Arc<Self> {
        assert!(!script.is_empty(), "mock sandbox needs at least one behavior");
        Arc::new(Self {
            script,
            next: AtomicUsize::new(0),
        })
    }

    /// Sandbox that always completes instantly with exit code 0
    pub fn completing() -> Arc<Self> {
        Self::scripted(vec![MockBehavior::Complete {
            return_code: 0,
            stdout: Some(String::new()),
            stderr: None,
            duration: Duration::from_millis(1),
        }])
    }

    /// Sandbox that always fails with a transient error
    pub fn always_transient(reason: &str) -> Arc<Self> {
        Self::scripted(vec![MockBehavior::TransientFailure(reason.to_string())])
    }

    /// Sandbox that always hangs until timeout or cancellation
    pub fn hanging() -> Arc<Self> {
        Self::scripted(vec![MockBehavior::Hang])
    }

    /// Number of `run` calls observed so far
    pub fn runs(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }

    fn behavior(&self) -> MockBehavior {
        let idx = self.next.fetch_add(1, Ordering::SeqCst);
        self.script[idx.min(self.script.len() - 1)].clone()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(
        &self,
        spec: ExecutionSpec,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let behavior = self.behavior();
        let started_at = Utc::now();
        let timeout = spec.limits.timeout;

        let (outcome_delay, terminal) = match behavior {
            MockBehavior::TransientFailure(reason) => {
                return Err(SandboxError::Transient(reason));
            }
            MockBehavior::PermanentFailure(reason) => {
                return Err(SandboxError::Permanent(reason));
            }
            MockBehavior::Complete {
                return_code,
                stdout,
                stderr,
                duration,
            } => (
                duration,
                (ExecutionStatus::Completed, Some(return_code), stdout, stderr),
            ),
            MockBehavior::FailScript {
                return_code,
                stderr,
                duration,
            } => (
                duration,
                (ExecutionStatus::Failed, Some(return_code), None, stderr),
            ),
            MockBehavior::Hang => (
                // effectively forever; the timeout arm below fires first
                Duration::from_secs(365 * 24 * 3600),
                (ExecutionStatus::Completed, Some(0), None, None),
            ),
        };

        let (status, return_code, stdout, stderr) = tokio::select! {
            _ = cancel.cancelled() => (ExecutionStatus::Cancelled, None, None, None),
            _ = sleep(timeout), if timeout < outcome_delay => {
                (ExecutionStatus::Timeout, None, None, Some("wall clock timeout exceeded".to_string()))
            }
            _ = sleep(outcome_delay) => terminal,
        };

        let completed_at = Utc::now();
        Ok(ExecutionResult {
            status,
            return_code,
            stdout,
            stderr,
            execution_time_ms: Some((completed_at - started_at).num_milliseconds().max(0)),
            memory_usage_bytes: Some(0),
            started_at: Some(started_at),
            completed_at: Some(completed_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use voidrunner_core::models::task::ScriptType;

    use crate::sandbox::ResourceLimits;

    fn spec(timeout: Duration) -> ExecutionSpec {
        ExecutionSpec {
            task_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            script_type: ScriptType::Python,
            script_content: "print(1)".to_string(),
            limits: ResourceLimits {
                timeout,
                ..ResourceLimits::default()
            },
        }
    }

    #[tokio::test]
    async fn test_completes() {
        let sandbox = MockSandbox::completing();
        let result = sandbox
            .run(spec(Duration::from_secs(5)), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.return_code, Some(0));
        assert!(result.started_at.is_some());
        assert!(result.completed_at.unwrap() >= result.started_at.unwrap());
    }

    #[tokio::test]
    async fn test_times_out() {
        let sandbox = MockSandbox::hanging();
        let result = sandbox
            .run(spec(Duration::from_millis(20)), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.execution_time_ms.unwrap() >= 20);
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let sandbox = MockSandbox::hanging();
        let cancel = CancellationToken::new();
        let handle = {
            let sandbox = sandbox.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                sandbox.run(spec(Duration::from_secs(60)), cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_scripted_sequence_then_repeats_last() {
        let sandbox = MockSandbox::scripted(vec![
            MockBehavior::TransientFailure("boom".to_string()),
            MockBehavior::Complete {
                return_code: 0,
                stdout: None,
                stderr: None,
                duration: Duration::from_millis(1),
            },
        ]);

        let err = sandbox
            .run(spec(Duration::from_secs(1)), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());

        for _ in 0..2 {
            let result = sandbox
                .run(spec(Duration::from_secs(1)), CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(result.status, ExecutionStatus::Completed);
        }
        assert_eq!(sandbox.runs(), 3);
    }
}
