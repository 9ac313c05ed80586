/// Sandbox capability contract
///
/// The dispatcher treats script isolation as an opaque capability: it
/// hands a [`Sandbox`] the execution spec plus resource limits and gets a
/// terminal [`ExecutionResult`] back. Whether the backend is a Linux
/// container, a VM, or a process group with cgroups is not this crate's
/// concern; the contract is the typed result and the cancellation
/// semantics.
///
/// # Sandbox Contract
///
/// Implementations must:
/// 1. Enforce the resource limits in the spec
/// 2. Respect the wall-clock timeout independently of the caller
/// 3. Observe the cancellation token and kill the script when it fires
/// 4. Return a terminal result (`completed`/`failed`/`timeout`/`cancelled`)
/// 5. Classify infrastructure failures as transient or permanent via
///    [`SandboxError`]
///
/// # Example
///
/// ```no_run
/// use voidrunner_worker::sandbox::{ExecutionSpec, ResourceLimits, Sandbox};
/// use voidrunner_worker::sandbox::mock::MockSandbox;
/// use tokio_util::sync::CancellationToken;
/// use uuid::Uuid;
/// use voidrunner_core::models::task::ScriptType;
///
/// # async fn example() -> anyhow::Result<()> {
/// let sandbox = MockSandbox::completing();
/// let spec = ExecutionSpec {
///     task_id: Uuid::new_v4(),
///     execution_id: Uuid::new_v4(),
///     script_type: ScriptType::Python,
///     script_content: "print(1)".to_string(),
///     limits: ResourceLimits::default(),
/// };
///
/// let result = sandbox.run(spec, CancellationToken::new()).await?;
/// println!("finished: {}", result.status);
/// # Ok(())
/// # }
/// ```

pub mod mock;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use voidrunner_core::models::execution::ExecutionResult;
use voidrunner_core::models::task::ScriptType;

/// Attribute key overriding the memory limit (bytes)
pub const ATTR_LIMIT_MEMORY_BYTES: &str = "limit_memory_bytes";

/// Attribute key overriding the CPU quota (microseconds per period)
pub const ATTR_LIMIT_CPU_QUOTA: &str = "limit_cpu_quota";

/// Attribute key overriding the pid limit
pub const ATTR_LIMIT_PIDS: &str = "limit_pids";

/// Sandbox error types
///
/// The split drives retry routing: transient failures go back through the
/// retry queue, permanent ones are dead-lettered.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The sandbox could not run right now (network, scheduling, image
    /// pull); retrying may succeed
    #[error("transient sandbox failure: {0}")]
    Transient(String),

    /// The execution can never succeed (unsupported script type, invalid
    /// spec, misconfiguration)
    #[error("permanent sandbox failure: {0}")]
    Permanent(String),
}

impl SandboxError {
    /// True if the failure is worth redelivering
    pub fn is_transient(&self) -> bool {
        matches!(self, SandboxError::Transient(_))
    }
}

/// Per-execution resource limits
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Memory cap in bytes
    pub memory_bytes: u64,

    /// CFS quota in microseconds per period (`cpu_period_us`)
    pub cpu_quota_us: u64,

    /// CFS period in microseconds
    pub cpu_period_us: u64,

    /// Maximum process/thread count
    pub pids: u32,

    /// Wall-clock timeout
    pub timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 128 * 1024 * 1024,
            cpu_quota_us: 50_000,
            cpu_period_us: 100_000,
            pids: 128,
            timeout: Duration::from_secs(300),
        }
    }
}

impl ResourceLimits {
    /// Applies per-message attribute overrides; unparseable values keep
    /// the defaults
    pub fn apply_attributes(&mut self, attributes: &HashMap<String, String>) {
        if let Some(v) = attributes.get(ATTR_LIMIT_MEMORY_BYTES).and_then(|s| s.parse().ok()) {
            self.memory_bytes = v;
        }
        if let Some(v) = attributes.get(ATTR_LIMIT_CPU_QUOTA).and_then(|s| s.parse().ok()) {
            self.cpu_quota_us = v;
        }
        if let Some(v) = attributes.get(ATTR_LIMIT_PIDS).and_then(|s| s.parse().ok()) {
            self.pids = v;
        }
    }
}

/// Everything a sandbox needs to run one execution
#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    /// Task being executed
    pub task_id: Uuid,

    /// Execution row this run reports into
    pub execution_id: Uuid,

    /// Script language
    pub script_type: ScriptType,

    /// Script source
    pub script_content: String,

    /// Resource limits for this run
    pub limits: ResourceLimits,
}

/// Isolated script runtime capability
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Backend name, for logs and registry lookups
    fn name(&self) -> &str;

    /// Runs the script to a terminal result
    ///
    /// Must respect `cancel` and the spec's wall-clock timeout
    /// independently; a cancelled run returns a `cancelled` result rather
    /// than an error.
    async fn run(
        &self,
        spec: ExecutionSpec,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, SandboxError>;

    /// Cleanup handle registered for the run before it starts
    ///
    /// Backends with residual state (containers, scratch dirs) return a
    /// handle that knows how to release it; the default has nothing to
    /// release.
    fn prepare_handle(&self, _spec: &ExecutionSpec) -> std::sync::Arc<dyn crate::cleanup::SandboxHandle> {
        std::sync::Arc::new(crate::cleanup::NullHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.memory_bytes, 128 * 1024 * 1024);
        assert_eq!(limits.cpu_quota_us, 50_000);
        assert_eq!(limits.cpu_period_us, 100_000);
        assert_eq!(limits.pids, 128);
    }

    #[test]
    fn test_attribute_overrides() {
        let mut limits = ResourceLimits::default();
        let mut attrs = HashMap::new();
        attrs.insert(ATTR_LIMIT_MEMORY_BYTES.to_string(), "268435456".to_string());
        attrs.insert(ATTR_LIMIT_PIDS.to_string(), "64".to_string());
        attrs.insert(ATTR_LIMIT_CPU_QUOTA.to_string(), "not-a-number".to_string());

        limits.apply_attributes(&attrs);
        assert_eq!(limits.memory_bytes, 256 * 1024 * 1024);
        assert_eq!(limits.pids, 64);
        // unparseable override is ignored
        assert_eq!(limits.cpu_quota_us, 50_000);
    }

    #[test]
    fn test_error_classification() {
        assert!(SandboxError::Transient("net".into()).is_transient());
        assert!(!SandboxError::Permanent("bad".into()).is_transient());
    }
}
