//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, ledger, worker and token validator wiring
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and extraction helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use closet_infra::config::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, StartupError, build_services};

/// Build the full HTTP router from configuration.
pub async fn build_app(config: &AppConfig) -> Result<Router, StartupError> {
    let services = Arc::new(build_services(config).await?);
    Ok(router(services))
}

/// Router over already-wired services.
pub fn router(services: Arc<AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        jwt: services.jwt.clone(),
    };
    let worker_state = middleware::WorkerAuthState {
        jwt: services.jwt.clone(),
        service_token: services.worker_service_token.clone(),
    };

    // Owner-scoped routes: require a user JWT.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    // Worker trigger: service token or ai_worker role.
    let worker = routes::worker_router().layer(axum::middleware::from_fn_with_state(
        worker_state,
        middleware::worker_auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(worker)
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::trace_requests))
                .layer(Extension(services)),
        )
}
