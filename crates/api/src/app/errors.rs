use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value as JsonValue, json};
use tracing::error;

use closet_infra::ledger::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::Validation(msg) => validation_error(msg, JsonValue::Null),
        LedgerError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        LedgerError::Forbidden => json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "you do not have access to this resource",
        ),
        LedgerError::QuotaExceeded(q) => (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(json!({
                "error": "quota_exceeded",
                "message": q.to_string(),
                "tokensUsedToday": q.tokens_used_today,
                "dailyTokenBudget": q.daily_token_budget,
            })),
        )
            .into_response(),
        LedgerError::InvalidState(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_state", msg),
        LedgerError::Store(e) => {
            error!(error = %e, "store failure");
            internal_error()
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 400 with a `details` field; `details` is omitted from the body when null.
pub fn validation_error(message: impl Into<String>, details: JsonValue) -> axum::response::Response {
    let mut body = json!({
        "error": "validation_error",
        "message": message.into(),
    });
    if !details.is_null() {
        body["details"] = details;
    }
    (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
}

/// Generic 500. The cause is logged by the caller, never returned.
pub fn internal_error() -> axum::response::Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal server error",
    )
}
