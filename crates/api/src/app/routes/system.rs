use axum::{Extension, Json, http::StatusCode, response::IntoResponse};

use crate::context::UserContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(user): Extension<UserContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "userId": user.user_id().to_string(),
        "roles": user.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
    }))
}
