/// Sandbox cleanup manager
///
/// Tracks the live sandbox handle for each execution and guarantees the
/// backing resources are released exactly once, whether the run completed,
/// failed, was cancelled, or the worker is shutting down. A periodic
/// sweeper releases handles whose owner never came back for them.
///
/// Each entry has a single owner (the worker that registered it); the map
/// itself is protected by a mutex.
///
/// # Example
///
/// ```no_run
/// use voidrunner_worker::cleanup::{CleanupManager, SandboxHandle};
/// use std::time::Duration;
/// use uuid::Uuid;
///
/// # async fn example(manager: CleanupManager, handle: std::sync::Arc<dyn SandboxHandle>) {
/// let execution_id = Uuid::new_v4();
/// manager.register(execution_id, handle).await;
///
/// // ... run finishes
/// manager.cleanup_execution(execution_id).await;
/// # }
/// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Releasable sandbox resources (container, scratch dir, cgroup)
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Releases the resources; must be idempotent
    async fn release(&self) -> anyhow::Result<()>;
}

/// No-op handle for sandbox backends without residual state
pub struct NullHandle;

#[async_trait]
impl SandboxHandle for NullHandle {
    async fn release(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct CleanupEntry {
    handle: Arc<dyn SandboxHandle>,
    registered_at: Instant,
}

/// Tracks sandbox handles per execution and releases them
pub struct CleanupManager {
    entries: Mutex<HashMap<Uuid, CleanupEntry>>,
    max_age: Duration,
}

impl CleanupManager {
    /// Creates a manager; entries older than `max_age` are released by
    /// the sweeper even without an explicit cleanup call
    pub fn new(max_age: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            max_age,
        })
    }

    /// Registers the live handle for an execution
    ///
    /// A second registration for the same execution releases the previous
    /// handle first.
    pub async fn register(&self, execution_id: Uuid, handle: Arc<dyn SandboxHandle>) {
        let previous = {
            let mut entries = self.entries.lock().await;
            entries.insert(
                execution_id,
                CleanupEntry {
                    handle,
                    registered_at: Instant::now(),
                },
            )
        };

        if let Some(previous) = previous {
            warn!(execution_id = %execution_id, "Replacing already-registered sandbox handle");
            if let Err(e) = previous.handle.release().await {
                warn!(execution_id = %execution_id, error = %e, "Failed to release replaced handle");
            }
        }
    }

    /// Releases and forgets the handle for an execution
    ///
    /// Returns false when nothing was registered (already cleaned, or the
    /// backend had no residual state).
    pub async fn cleanup_execution(&self, execution_id: Uuid) -> bool {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries.remove(&execution_id)
        };

        match entry {
            Some(entry) => {
                if let Err(e) = entry.handle.release().await {
                    warn!(execution_id = %execution_id, error = %e, "Sandbox release failed");
                } else {
                    debug!(execution_id = %execution_id, "Sandbox resources released");
                }
                true
            }
            None => false,
        }
    }

    /// Releases entries older than the configured max age
    pub async fn sweep_stale(&self) -> usize {
        let stale: Vec<Uuid> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, e)| e.registered_at.elapsed() > self.max_age)
                .map(|(id, _)| *id)
                .collect()
        };

        for execution_id in &stale {
            warn!(execution_id = %execution_id, "Releasing stale sandbox handle");
            self.cleanup_execution(*execution_id).await;
        }

        stale.len()
    }

    /// Releases everything; called on shutdown
    pub async fn drain(&self) {
        let all: Vec<Uuid> = {
            let entries = self.entries.lock().await;
            entries.keys().copied().collect()
        };

        info!(count = all.len(), "Draining cleanup manager");
        for execution_id in all {
            self.cleanup_execution(execution_id).await;
        }
    }

    /// Number of currently tracked handles
    pub async fn tracked(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Periodic sweeper loop, runs until the token is cancelled
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.drain().await;
                    break;
                }
                _ = sleep(interval) => {
                    self.sweep_stale().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandle {
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SandboxHandle for CountingHandle {
        async fn release(&self) -> anyhow::Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_handle() -> (Arc<CountingHandle>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(CountingHandle {
                releases: releases.clone(),
            }),
            releases,
        )
    }

    #[tokio::test]
    async fn test_register_and_cleanup() {
        let manager = CleanupManager::new(Duration::from_secs(60));
        let (handle, releases) = counting_handle();
        let execution_id = Uuid::new_v4();

        manager.register(execution_id, handle).await;
        assert_eq!(manager.tracked().await, 1);

        assert!(manager.cleanup_execution(execution_id).await);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(manager.tracked().await, 0);

        // second cleanup is a no-op
        assert!(!manager.cleanup_execution(execution_id).await);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweep_releases_stale_entries() {
        let manager = CleanupManager::new(Duration::from_millis(10));
        let (handle, releases) = counting_handle();

        manager.register(Uuid::new_v4(), handle).await;
        sleep(Duration::from_millis(30)).await;

        assert_eq!(manager.sweep_stale().await, 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(manager.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_drain_releases_everything() {
        let manager = CleanupManager::new(Duration::from_secs(60));
        let (h1, r1) = counting_handle();
        let (h2, r2) = counting_handle();

        manager.register(Uuid::new_v4(), h1).await;
        manager.register(Uuid::new_v4(), h2).await;

        manager.drain().await;
        assert_eq!(r1.load(Ordering::SeqCst), 1);
        assert_eq!(r2.load(Ordering::SeqCst), 1);
        assert_eq!(manager.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_reregistration_releases_previous() {
        let manager = CleanupManager::new(Duration::from_secs(60));
        let (h1, r1) = counting_handle();
        let (h2, r2) = counting_handle();
        let execution_id = Uuid::new_v4();

        manager.register(execution_id, h1).await;
        manager.register(execution_id, h2).await;

        assert_eq!(r1.load(Ordering::SeqCst), 1);
        assert_eq!(r2.load(Ordering::SeqCst), 0);
        assert_eq!(manager.tracked().await, 1);
    }
}
