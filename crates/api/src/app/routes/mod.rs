use axum::{Router, routing::{get, post}};

pub mod aijobs;
pub mod items;
pub mod quota;
pub mod system;

/// Router for all authenticated (owner-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/api/quota", get(quota::get_quota))
        .nest("/api/aijobs", aijobs::router())
        .nest("/api/items", items::router())
}

/// Router for the worker trigger, guarded separately from user routes.
pub fn worker_router() -> Router {
    Router::new().route("/api/aijobs/process", post(aijobs::process_jobs))
}
