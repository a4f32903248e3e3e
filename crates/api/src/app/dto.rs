use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::{Json, extract::Query};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use closet_ai::{AiJob, JobKind, JobStatus, UserQuota};
use closet_core::{ItemId, UserId};
use closet_infra::ledger::{JobFilter, JobPage, SubmitRequest};

use crate::app::errors;

/// Largest batch a single `/process` call may claim.
pub const MAX_PROCESS_BATCH: u32 = 50;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub item_id: Option<String>,
    pub job_type: String,
    pub input_payload: JsonValue,
    pub prompt_version: Option<String>,
}

impl SubmitJobRequest {
    pub fn into_submit(self, owner: UserId) -> Result<SubmitRequest, axum::response::Response> {
        let kind: JobKind = self
            .job_type
            .parse()
            .map_err(|e: closet_core::DomainError| field_error("jobType", e.to_string()))?;

        let JsonValue::Object(input_payload) = self.input_payload else {
            return Err(field_error("inputPayload", "inputPayload must be a JSON object"));
        };

        let target_item_id = self.item_id.as_deref().map(parse_item_id).transpose()?;

        Ok(SubmitRequest {
            owner,
            kind,
            input_payload,
            prompt_version: self.prompt_version,
            target_item_id,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsQuery {
    pub item_id: Option<String>,
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListJobsQuery {
    pub fn filter(&self) -> Result<JobFilter, axum::response::Response> {
        Ok(JobFilter {
            item_id: self.item_id.as_deref().map(parse_item_id).transpose()?,
            status: self
                .status
                .as_deref()
                .map(|s| s.parse::<JobStatus>().map_err(|e| field_error("status", e.to_string())))
                .transpose()?,
            kind: self
                .job_type
                .as_deref()
                .map(|s| s.parse::<JobKind>().map_err(|e| field_error("jobType", e.to_string())))
                .transpose()?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ApplyJobRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessJobsRequest {
    pub batch_size: Option<u32>,
}

impl ProcessJobsRequest {
    /// Defaults to one job per call.
    pub fn batch_size(&self) -> u32 {
        self.batch_size.unwrap_or(1).clamp(1, MAX_PROCESS_BATCH)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub jobs: Vec<AiJob>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

impl From<JobPage> for JobListResponse {
    fn from(page: JobPage) -> Self {
        Self {
            jobs: page.jobs,
            total: page.total,
            limit: page.pagination.limit,
            offset: page.pagination.offset,
            has_more: page.has_more,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub user_id: UserId,
    pub daily_token_budget: u64,
    pub tokens_used_today: u64,
    pub remaining: u64,
    pub usage_day: NaiveDate,
}

impl QuotaResponse {
    pub fn new(quota: &UserQuota) -> Self {
        Self {
            user_id: quota.user_id,
            daily_token_budget: quota.daily_token_budget,
            tokens_used_today: quota.tokens_used_today,
            remaining: quota.remaining(quota.usage_day),
            usage_day: quota.usage_day,
        }
    }
}

// -------------------------
// Extraction helpers
// -------------------------

pub fn field_error(field: &str, message: impl Into<String>) -> axum::response::Response {
    errors::validation_error(message, json!({ "field": field }))
}

pub fn parse_item_id(s: &str) -> Result<ItemId, axum::response::Response> {
    s.parse().map_err(|_| field_error("itemId", "invalid item id"))
}

pub fn parse_path_id<T: std::str::FromStr>(s: &str) -> Result<T, axum::response::Response> {
    s.parse().map_err(|_| errors::validation_error("invalid id", json!({ "field": "id" })))
}

pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    body.map(|Json(v)| v)
        .map_err(|e| errors::validation_error("invalid request body", json!({ "reason": e.body_text() })))
}

pub fn query<T>(q: Result<Query<T>, QueryRejection>) -> Result<T, axum::response::Response> {
    q.map(|Query(v)| v)
        .map_err(|e| errors::validation_error("invalid query string", json!({ "reason": e.body_text() })))
}

/// Parse a JSON body that may be omitted entirely.
pub fn optional_json_body<T: DeserializeOwned + Default>(
    bytes: &Bytes,
) -> Result<T, axum::response::Response> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| errors::validation_error("invalid request body", json!({ "reason": e.to_string() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(body: JsonValue) -> Result<SubmitRequest, axum::response::Response> {
        serde_json::from_value::<SubmitJobRequest>(body)
            .unwrap()
            .into_submit(UserId::new())
    }

    #[test]
    fn submit_requires_object_payload() {
        let err = submit(json!({"jobType": "NORMALIZE", "inputPayload": [1, 2]})).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn submit_rejects_unknown_kind() {
        let err = submit(json!({"jobType": "SUMMON", "inputPayload": {}})).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn submit_parses_item_id() {
        let item = ItemId::new();
        let req = submit(json!({
            "itemId": item.to_string(),
            "jobType": "PRICE_SUGGESTION",
            "inputPayload": {"title": "Coat"},
            "promptVersion": "v2"
        }))
        .unwrap();
        assert_eq!(req.target_item_id, Some(item));
        assert_eq!(req.kind, JobKind::PriceSuggestion);
        assert_eq!(req.prompt_version.as_deref(), Some("v2"));
    }

    #[test]
    fn list_query_parses_filters() {
        let q = ListJobsQuery {
            status: Some("NEEDS_REVIEW".into()),
            job_type: Some("CONDITION_GRADE".into()),
            ..Default::default()
        };
        let f = q.filter().unwrap();
        assert_eq!(f.status, Some(JobStatus::NeedsReview));
        assert_eq!(f.kind, Some(JobKind::ConditionGrade));

        let bad = ListJobsQuery {
            status: Some("DONE".into()),
            ..Default::default()
        };
        assert!(bad.filter().is_err());
    }

    #[test]
    fn process_batch_is_clamped() {
        assert_eq!(ProcessJobsRequest::default().batch_size(), 1);
        assert_eq!(ProcessJobsRequest { batch_size: Some(0) }.batch_size(), 1);
        assert_eq!(ProcessJobsRequest { batch_size: Some(500) }.batch_size(), MAX_PROCESS_BATCH);
    }

    #[test]
    fn empty_optional_body_is_default() {
        let req: ApplyJobRequest = optional_json_body(&Bytes::from_static(b"  ")).unwrap();
        assert!(req.reason.is_none());
        let req: ApplyJobRequest = optional_json_body(&Bytes::from_static(br#"{"reason":"ok"}"#)).unwrap();
        assert_eq!(req.reason.as_deref(), Some("ok"));
        assert!(optional_json_body::<ApplyJobRequest>(&Bytes::from_static(b"{nope")).is_err());
    }
}
