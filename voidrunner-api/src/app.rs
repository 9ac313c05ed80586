/// Application state and router builder
///
/// Defines the shared application state and assembles the Axum router
/// with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use voidrunner_api::{app::{build_router, AppState}, config::Config};
/// use voidrunner_core::queue::task_queue::TaskQueue;
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let queue = TaskQueue::connect(config.queue.clone()).await?;
/// let state = AppState::new(pool, queue, config);
/// let app = build_router(state);
/// # Ok(())
/// # }
/// ```

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use voidrunner_core::auth::middleware::jwt_auth_middleware;
use voidrunner_core::control::CancelSignaler;
use voidrunner_core::coordinator::ExecutionCoordinator;
use voidrunner_core::queue::task_queue::TaskQueue;

use crate::{config::Config, routes};

/// Shared application state
///
/// Cloned per request via Axum's `State` extractor; heavyweight members
/// are internally reference-counted.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Priority task queue
    pub queue: TaskQueue,

    /// Submit/finalize/cancel coordinator
    pub coordinator: ExecutionCoordinator,

    /// Cancel signal publisher
    pub signaler: CancelSignaler,

    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Creates new application state
    pub fn new(db: PgPool, queue: TaskQueue, config: Config) -> Self {
        let coordinator = ExecutionCoordinator::new(db.clone(), queue.clone());
        let signaler = CancelSignaler::from_queue(&queue);

        Self {
            db,
            queue,
            coordinator,
            signaler,
            config: Arc::new(config),
        }
    }
}

/// Builds the application router
///
/// Public routes: health and auth. Everything else requires a valid
/// bearer access token.
pub fn build_router(state: AppState) -> Router {
    let jwt_config = state.config.jwt.clone();

    let protected = Router::new()
        .route("/tasks", post(routes::tasks::create_task))
        .route("/tasks", get(routes::tasks::list_tasks))
        .route("/tasks/:id", get(routes::tasks::get_task))
        .route("/tasks/:id", put(routes::tasks::update_task))
        .route("/tasks/:id", delete(routes::tasks::delete_task))
        .route(
            "/tasks/:id/executions",
            post(routes::executions::submit_execution),
        )
        .route(
            "/tasks/:id/executions",
            get(routes::executions::list_executions),
        )
        .route("/executions/:id", get(routes::executions::get_execution))
        .route(
            "/executions/:id/cancel",
            post(routes::executions::cancel_execution),
        )
        .route("/queues/stats", get(routes::queues::queue_stats))
        .route("/queues/dead", get(routes::queues::list_dead_letters))
        .route("/queues/dead", delete(routes::queues::purge_dead_letters))
        .route(
            "/queues/dead/:message_id/requeue",
            post(routes::queues::requeue_dead_letter),
        )
        .layer(middleware::from_fn(move |req, next| {
            jwt_auth_middleware(jwt_config.clone(), req, next)
        }));

    let public = Router::new()
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/refresh", post(routes::auth::refresh));

    Router::new()
        .route("/healthz", get(routes::health::health))
        .nest("/api/v1", public.merge(protected))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
