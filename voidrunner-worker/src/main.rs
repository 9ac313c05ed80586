//! # VoidRunner Worker
//!
//! The executor dispatcher binary: consumes the task queue, runs scripts
//! in sandboxes, and finalizes execution state through the coordinator.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://... REDIS_URL=redis://... cargo run -p voidrunner-worker
//! ```

use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voidrunner_core::coordinator::ExecutionCoordinator;
use voidrunner_core::db::pool::create_pool;
use voidrunner_core::queue::maintenance::QueueMaintenance;
use voidrunner_core::queue::task_queue::TaskQueue;
use voidrunner_worker::cleanup::CleanupManager;
use voidrunner_worker::config::WorkerConfig;
use voidrunner_worker::control::ControlListener;
use voidrunner_worker::dispatcher::Dispatcher;
use voidrunner_worker::reconciler::Reconciler;
use voidrunner_worker::sandbox::mock::MockSandbox;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voidrunner_worker=debug,voidrunner_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("VoidRunner worker v{} starting", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;

    let pool = create_pool(config.database.clone()).await?;
    let queue = TaskQueue::connect(config.queue.clone()).await?;
    let coordinator = ExecutionCoordinator::new(pool.clone(), queue.clone());

    let cleanup = CleanupManager::new(config.cleanup_max_age);
    let control = ControlListener::new(&config.queue.url)?;

    // The mock backend ships in-tree; real isolation backends implement
    // the Sandbox trait out of tree and get wired here
    let sandbox = MockSandbox::completing();

    let maintenance = QueueMaintenance::new(queue.clone(), config.maintenance_interval);
    let maintenance_shutdown = maintenance.shutdown_token();
    let maintenance_handle = tokio::spawn(async move { maintenance.run().await });

    let reconciler = Reconciler::new(pool.clone(), queue.clone(), config.reconciler.clone());
    let reconciler_shutdown = reconciler.shutdown_token();
    let reconciler_handle = tokio::spawn(async move { reconciler.run().await });

    let sweeper_shutdown = tokio_util::sync::CancellationToken::new();
    let sweeper_handle = tokio::spawn(
        cleanup
            .clone()
            .run_sweeper(Duration::from_secs(60), sweeper_shutdown.clone()),
    );

    let dispatcher = Dispatcher::new(
        pool.clone(),
        coordinator,
        queue,
        sandbox,
        cleanup,
        control,
        config.dispatcher.clone(),
    );
    let dispatcher_shutdown = dispatcher.shutdown_token();
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    tracing::info!("Worker ready and listening for tasks");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, draining");

    dispatcher_shutdown.cancel();
    // In-flight messages are released by the workers; bounded wait
    if tokio::time::timeout(Duration::from_secs(60), dispatcher_handle)
        .await
        .is_err()
    {
        tracing::warn!("Dispatcher did not drain in time, forcing shutdown");
    }

    reconciler_shutdown.cancel();
    maintenance_shutdown.cancel();
    sweeper_shutdown.cancel();
    let _ = reconciler_handle.await;
    let _ = maintenance_handle.await;
    let _ = sweeper_handle.await;

    tracing::info!("Worker shut down");
    Ok(())
}
