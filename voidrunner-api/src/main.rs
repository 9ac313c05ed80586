//! # VoidRunner API Server
//!
//! The HTTP entry point for the task execution pipeline: registration and
//! login, task CRUD, execution submit/get/cancel, and operator queue
//! endpoints.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://... REDIS_URL=redis://... JWT_SECRET=... \
//!     cargo run -p voidrunner-api
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voidrunner_api::{
    app::{build_router, AppState},
    config::Config,
};
use voidrunner_core::db::{migrations, pool};
use voidrunner_core::queue::task_queue::TaskQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voidrunner_api=info,tower_http=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("VoidRunner API server v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let db = pool::create_pool(config.database.clone()).await?;
    migrations::run_migrations(&db).await?;

    let queue = TaskQueue::connect(config.queue.clone()).await?;

    let bind_address = config.bind_address();
    let state = AppState::new(db, queue, config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    tracing::info!("API server shut down");
    Ok(())
}
