/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Authentication endpoints (register, login, refresh)
/// - `tasks`: Task CRUD and listings
/// - `executions`: Execution submit/get/cancel
/// - `queues`: Operator queue and dead-letter endpoints

pub mod auth;
pub mod executions;
pub mod health;
pub mod queues;
pub mod tasks;
