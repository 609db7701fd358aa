// ARCHITECTURE: API Module - Security Boundary Surface
//
// The thin HTTP surface this core exposes to the surrounding application:
// 1. TOKENS (tokens.rs): refresh rotation and logout-with-revocation,
//    emitting the auth cookies.
// 2. STATS (stats.rs): operational security snapshot, permission-gated.
// 3. HEALTH (health.rs): service health indicator.
// Business CRUD routes belong to the surrounding application and mount
// behind the same pipeline.

pub mod health;
pub mod stats;
pub mod tokens;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::AppState;
use crate::security::middleware::security_pipeline;

/// Build the router with every route behind the security pipeline.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/auth/refresh", post(tokens::refresh))
        .route("/api/v1/auth/logout", post(tokens::logout))
        .route("/api/v1/security/stats", get(stats::security_stats))
        .layer(middleware::from_fn_with_state(state.clone(), security_pipeline))
        .with_state(state)
}
