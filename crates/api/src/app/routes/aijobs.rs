use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{
        Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use tracing::error;

use closet_core::JobId;
use closet_infra::ledger::{Pagination, SubmitOutcome};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/:id", get(get_job))
        .route("/:id/apply", post(apply_job))
        .route("/:id/audit", get(audit_trail))
}

/// A reused job may belong to another user: its id then reads as 403 on GET
/// and apply, which `ownedByCaller` signals up front.
pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<dto::SubmitJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match dto::json_body(body).and_then(|b| b.into_submit(user.user_id())) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.submit(request, Utc::now()).await {
        Ok(SubmitOutcome::Created(job)) => (
            StatusCode::CREATED,
            Json(json!({
                "jobId": job.id,
                "status": job.status,
                "inputHash": job.input_hash,
                "message": "Job queued for processing",
            })),
        )
            .into_response(),
        Ok(SubmitOutcome::Reused(job)) => (
            StatusCode::OK,
            Json(json!({
                "jobId": job.id,
                "status": job.status,
                "result": job.result,
                "reused": true,
                "ownedByCaller": job.owner == user.user_id(),
                "message": "Returning result of an identical completed job",
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    query: Result<Query<dto::ListJobsQuery>, QueryRejection>,
) -> axum::response::Response {
    let query = match dto::query(query) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = match query.filter() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let pagination = Pagination::new(query.limit, query.offset);

    match services.ledger.list(user.user_id(), &filter, pagination).await {
        Ok(page) => Json(dto::JobListResponse::from(page)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match dto::parse_path_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.get(user.user_id(), job_id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn apply_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let job_id: JobId = match dto::parse_path_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body: dto::ApplyJobRequest = match dto::optional_json_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .ledger
        .apply(user.user_id(), job_id, body.reason, Utc::now())
        .await
    {
        Ok(outcome) => Json(json!({
            "message": "AI result applied",
            "jobId": outcome.job_id,
            "itemId": outcome.item_id,
            "applied": outcome.applied,
        }))
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn audit_trail(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match dto::parse_path_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.audit_trail(user.user_id(), job_id).await {
        Ok(entries) => Json(json!({ "entries": entries })).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Claim and run a batch of ready jobs (default one).
pub async fn process_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let body: dto::ProcessJobsRequest = match dto::optional_json_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.worker.run_once(Utc::now(), body.batch_size()).await {
        Ok(results) => {
            let message = if results.is_empty() {
                "No jobs to process".to_string()
            } else {
                format!("Processed {} job(s)", results.len())
            };
            Json(json!({
                "message": message,
                "processed": results.len(),
                "results": results,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "on-demand worker run failed");
            errors::internal_error()
        }
    }
}
