//! Axum HTTP API server.
//!
//! This crate provides:
//! - Single-image person counting (`POST /detect`)
//! - Asynchronous video crowd analysis (`POST /detect-video`, `GET /video-status/:task_id`)
//! - Health and Prometheus metrics endpoints
//! - CORS, request id, request logging and security header middleware

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
