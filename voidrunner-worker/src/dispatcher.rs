/// Executor dispatcher
///
/// A pool of `N` independent workers, each looping: dequeue one message
/// with a long poll, revalidate ownership, mark the execution running,
/// invoke the sandbox under its resource limits, and report the outcome
/// back through the coordinator. Workers need no mutual synchronization;
/// exclusivity comes from the queue's receipt leases and the store's
/// row-level transactions.
///
/// # Failure routing
///
/// - Transient sandbox or store failures park the message in the retry
///   queue with backoff; exhaustion dead-letters it.
/// - Permanent failures (ownership lost, malformed message, sandbox
///   rejection) skip the retry queue and go straight to the DLQ, and the
///   execution is finalized as failed so the store converges.
/// - Messages for terminal or deleted tasks are dropped on dequeue.
///
/// # Shutdown
///
/// Cancelling the shutdown token stops new dequeues; in-flight sandbox
/// runs observe cancellation through their child tokens and their
/// messages are released (not acked) so another instance redelivers them.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sqlx::PgPool;
use voidrunner_core::coordinator::{CoordinatorError, ExecutionCoordinator};
use voidrunner_core::models::execution::{ExecutionResult, ExecutionStatus};
use voidrunner_core::models::task::Task;
use voidrunner_core::queue::message::DeliveredMessage;
use voidrunner_core::queue::task_queue::{FailDisposition, TaskQueue};

use crate::cleanup::CleanupManager;
use crate::control::ControlListener;
use crate::sandbox::{ExecutionSpec, Sandbox, SandboxError};

/// Failure reason recorded when a message has no usable execution id
const REASON_MALFORMED: &str = "malformed_message";

/// Failure reason recorded when the task vanished or changed owner
const REASON_OWNERSHIP_LOST: &str = "ownership_lost";

/// Failure reason for transient sandbox failures
const REASON_SANDBOX_TRANSIENT: &str = "sandbox_transient";

/// Failure reason for permanent sandbox failures
const REASON_SANDBOX_PERMANENT: &str = "sandbox_permanent";

/// Failure reason when the store rejects the finalize
const REASON_FINALIZE_FAILED: &str = "finalize_failed";

/// Failure reason when the store is unreachable
const REASON_STORE_UNAVAILABLE: &str = "store_unavailable";

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// Long-poll wait per dequeue call
    pub long_poll_wait: Duration,

    /// Default per-execution resource limits (message attributes and the
    /// task's timeout override them)
    pub default_limits: crate::sandbox::ResourceLimits,

    /// Extra wall-clock slack granted to the sandbox beyond the script
    /// timeout before the dispatcher force-cancels the run
    pub timeout_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            long_poll_wait: Duration::from_secs(10),
            default_limits: crate::sandbox::ResourceLimits::default(),
            timeout_grace: Duration::from_secs(30),
        }
    }
}

/// Worker pool consuming the task queue
pub struct Dispatcher {
    db: PgPool,
    coordinator: ExecutionCoordinator,
    queue: TaskQueue,
    sandbox: Arc<dyn Sandbox>,
    cleanup: Arc<CleanupManager>,
    control: ControlListener,
    config: DispatcherConfig,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Creates a dispatcher over the given collaborators
    pub fn new(
        db: PgPool,
        coordinator: ExecutionCoordinator,
        queue: TaskQueue,
        sandbox: Arc<dyn Sandbox>,
        cleanup: Arc<CleanupManager>,
        control: ControlListener,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            coordinator,
            queue,
            sandbox,
            cleanup,
            control,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that drains the pool when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the worker pool until shutdown
    ///
    /// Returns once every worker has finished its in-flight message.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let worker_count = self.config.workers.max(1);
        info!(workers = worker_count, sandbox = self.sandbox.name(), "Dispatcher starting");

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let this = self.clone();
            workers.spawn(async move { this.worker_loop(worker_id).await });
        }

        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "Worker task aborted");
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "Worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let delivered = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.queue.dequeue(1, self.config.long_poll_wait) => match result {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(worker_id, error = %e, "Dequeue failed");
                        sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            for message in delivered {
                self.process_message(worker_id, message).await;
            }
        }

        debug!(worker_id, "Worker stopped");
    }

    async fn process_message(&self, worker_id: usize, delivered: DeliveredMessage) {
        let msg = &delivered.message;
        let receipt = &delivered.receipt;

        info!(
            worker_id,
            message_id = %msg.message_id,
            task_id = %msg.task_id,
            attempts = msg.attempts,
            "Processing queue message"
        );

        let Some(execution_id) = msg.execution_id() else {
            warn!(message_id = %msg.message_id, "Message carries no execution id");
            self.fail_quietly(&delivered, REASON_MALFORMED, false).await;
            return;
        };

        // Revalidate ownership against the store; submission-time claims
        // are not trusted at execution time
        let task = match Task::find_by_id(&self.db, msg.task_id).await {
            Ok(task) => task,
            Err(e) => {
                error!(task_id = %msg.task_id, error = %e, "Failed to load task");
                self.fail_quietly(&delivered, REASON_STORE_UNAVAILABLE, true).await;
                return;
            }
        };

        let task = match task {
            Some(task) if task.user_id == msg.user_id => task,
            _ => {
                warn!(
                    task_id = %msg.task_id,
                    user_id = %msg.user_id,
                    "Task missing or ownership lost, dead-lettering"
                );
                self.fail_quietly(&delivered, REASON_OWNERSHIP_LOST, false).await;
                return;
            }
        };

        // Inverse orphan: the task finished through another path while
        // this message sat in the queue
        if task.status.is_terminal() {
            debug!(task_id = %task.id, status = %task.status, "Dropping message for terminal task");
            if let Err(e) = self.queue.delete(receipt).await {
                warn!(message_id = %msg.message_id, error = %e, "Failed to ack stale message");
            }
            return;
        }

        // Best-effort; a redelivery or cancel race may have moved the
        // state on already
        if let Err(e) = self.coordinator.mark_running(execution_id).await {
            warn!(execution_id = %execution_id, error = %e, "Mark-running failed, continuing");
        }

        let cancel_token = self.shutdown.child_token();
        let control_handle = self.control.listen(execution_id, cancel_token.clone());

        let mut limits = self.config.default_limits.clone();
        limits.apply_attributes(&msg.attributes);
        limits.timeout = Duration::from_secs(task.timeout_seconds.max(1) as u64);

        let spec = ExecutionSpec {
            task_id: task.id,
            execution_id,
            script_type: task.script_type,
            script_content: task.script_content.clone(),
            limits,
        };

        self.cleanup
            .register(execution_id, self.sandbox.prepare_handle(&spec))
            .await;

        let backstop = spec.limits.timeout + self.config.timeout_grace;
        let run_result =
            match tokio::time::timeout(backstop, self.sandbox.run(spec, cancel_token.clone())).await
            {
                Ok(result) => result,
                Err(_) => {
                    // The sandbox ignored its own timeout; force-cancel
                    // and record the timeout ourselves
                    warn!(execution_id = %execution_id, "Sandbox exceeded backstop timeout");
                    cancel_token.cancel();
                    Ok(ExecutionResult {
                        status: ExecutionStatus::Timeout,
                        return_code: None,
                        stdout: None,
                        stderr: Some("wall clock timeout exceeded".to_string()),
                        execution_time_ms: Some(backstop.as_millis() as i64),
                        memory_usage_bytes: None,
                        started_at: None,
                        completed_at: Some(chrono::Utc::now()),
                    })
                }
            };

        control_handle.abort();

        match run_result {
            Ok(result) if result.status == ExecutionStatus::Cancelled => {
                if self.shutdown.is_cancelled() {
                    // Shutting down: hand the message to another instance
                    info!(execution_id = %execution_id, "Releasing in-flight message for shutdown");
                    if let Err(e) = self.queue.release(receipt, None).await {
                        warn!(message_id = %msg.message_id, error = %e, "Release failed during shutdown");
                    }
                } else {
                    // User cancel: the store was already updated by the
                    // coordinator; just retire the message
                    debug!(execution_id = %execution_id, "Sandbox torn down after cancel");
                    if let Err(e) = self.queue.delete(receipt).await {
                        warn!(message_id = %msg.message_id, error = %e, "Failed to ack cancelled message");
                    }
                }
            }
            Ok(result) => {
                self.finalize_and_ack(&delivered, execution_id, task.user_id, &result)
                    .await;
            }
            Err(sandbox_err) => {
                self.route_sandbox_failure(&delivered, execution_id, task.user_id, sandbox_err)
                    .await;
            }
        }

        self.cleanup.cleanup_execution(execution_id).await;
    }

    async fn finalize_and_ack(
        &self,
        delivered: &DeliveredMessage,
        execution_id: Uuid,
        user_id: Uuid,
        result: &ExecutionResult,
    ) {
        let receipt = &delivered.receipt;

        match self
            .coordinator
            .finalize_execution(execution_id, result, user_id)
            .await
        {
            Ok(_) => {
                if let Err(e) = self.queue.delete(receipt).await {
                    warn!(message_id = %receipt.message_id, error = %e, "Failed to ack finalized message");
                }
            }
            Err(CoordinatorError::Conflict(reason)) => {
                // Finalized through another path (cancel, redelivery);
                // the message is done either way
                debug!(execution_id = %execution_id, reason, "Finalize conflict, retiring message");
                if let Err(e) = self.queue.delete(receipt).await {
                    warn!(message_id = %receipt.message_id, error = %e, "Failed to ack conflicted message");
                }
            }
            Err(e) if e.is_transient() => {
                warn!(execution_id = %execution_id, error = %e, "Finalize failed transiently, retrying message");
                self.fail_quietly(delivered, REASON_FINALIZE_FAILED, true).await;
            }
            Err(e) => {
                error!(execution_id = %execution_id, error = %e, "Finalize failed permanently");
                self.fail_quietly(delivered, REASON_FINALIZE_FAILED, false).await;
            }
        }
    }

    async fn route_sandbox_failure(
        &self,
        delivered: &DeliveredMessage,
        execution_id: Uuid,
        user_id: Uuid,
        sandbox_err: SandboxError,
    ) {
        let retryable = sandbox_err.is_transient();
        let reason = if retryable {
            REASON_SANDBOX_TRANSIENT
        } else {
            REASON_SANDBOX_PERMANENT
        };

        warn!(
            execution_id = %execution_id,
            attempts = delivered.message.attempts,
            error = %sandbox_err,
            retryable,
            "Sandbox failure"
        );

        match self.queue.fail(delivered, reason, retryable).await {
            Ok(FailDisposition::Retried) => {}
            Ok(FailDisposition::DeadLettered) => {
                // The message will never run again; converge the store
                let result = ExecutionResult {
                    status: ExecutionStatus::Failed,
                    return_code: None,
                    stdout: None,
                    stderr: Some(sandbox_err.to_string()),
                    execution_time_ms: None,
                    memory_usage_bytes: None,
                    started_at: None,
                    completed_at: Some(chrono::Utc::now()),
                };
                if let Err(e) = self
                    .coordinator
                    .finalize_execution(execution_id, &result, user_id)
                    .await
                {
                    if !matches!(e, CoordinatorError::Conflict(_)) {
                        error!(
                            execution_id = %execution_id,
                            error = %e,
                            "Failed to finalize dead-lettered execution"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    message_id = %delivered.receipt.message_id,
                    error = %e,
                    "Failed to route sandbox failure; visibility expiry will redeliver"
                );
            }
        }
    }

    /// Routes a failure and logs rather than propagates routing errors;
    /// an unrouted message is redelivered by the visibility reclaimer
    async fn fail_quietly(&self, delivered: &DeliveredMessage, reason: &str, retryable: bool) {
        if let Err(e) = self.queue.fail(delivered, reason, retryable).await {
            warn!(
                message_id = %delivered.receipt.message_id,
                reason,
                error = %e,
                "Failed to route message failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.long_poll_wait, Duration::from_secs(10));
        assert_eq!(config.timeout_grace, Duration::from_secs(30));
        assert_eq!(config.default_limits.memory_bytes, 128 * 1024 * 1024);
    }

    // End-to-end dispatch behavior (Postgres + Redis + mock sandbox) is
    // covered in tests/dispatcher_tests.rs
}
