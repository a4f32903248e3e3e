use std::sync::Arc;

use axum::{Extension, Json, response::IntoResponse};
use chrono::Utc;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub async fn get_quota(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.ledger.quota(user.user_id(), Utc::now()).await {
        Ok(quota) => Json(dto::QuotaResponse::new(&quota)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
