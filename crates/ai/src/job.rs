use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use closet_core::{DomainError, ItemId, JobId, UserId};

use crate::hash::{DEFAULT_PROMPT_VERSION, input_hash};
use crate::kind::JobKind;
use crate::status::{JobStatus, TransitionError};

/// Structured job input: string keys to arbitrary JSON values.
pub type JsonObject = serde_json::Map<String, JsonValue>;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const MAX_PROMPT_VERSION_LEN: usize = 64;

/// A submission before it becomes a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub owner: UserId,
    pub target_item_id: Option<ItemId>,
    pub kind: JobKind,
    pub input_payload: JsonObject,
    pub prompt_version: Option<String>,
}

impl NewJob {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(v) = &self.prompt_version {
            if v.trim().is_empty() {
                return Err(DomainError::validation("promptVersion must not be empty"));
            }
            if v.len() > MAX_PROMPT_VERSION_LEN {
                return Err(DomainError::validation(format!(
                    "promptVersion must be at most {MAX_PROMPT_VERSION_LEN} bytes"
                )));
            }
        }
        Ok(())
    }

    pub fn prompt_version(&self) -> &str {
        self.prompt_version.as_deref().unwrap_or(DEFAULT_PROMPT_VERSION)
    }

    pub fn input_hash(&self) -> String {
        input_hash(self.kind, &self.input_payload, self.prompt_version())
    }
}

/// A unit of requested AI work and its lifecycle bookkeeping.
///
/// All status changes go through the methods below, which enforce the
/// [`JobStatus`] state machine and keep `result` null outside
/// SUCCEEDED / NEEDS_REVIEW / APPLIED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiJob {
    pub id: JobId,
    #[serde(rename = "userId")]
    pub owner: UserId,
    #[serde(rename = "itemId")]
    pub target_item_id: Option<ItemId>,
    #[serde(rename = "jobType")]
    pub kind: JobKind,
    pub input_payload: JsonObject,
    pub input_hash: String,
    pub prompt_version: String,
    pub status: JobStatus,
    pub result: Option<JsonValue>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub available_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub tokens_used: Option<u64>,
    pub cost_estimate_usd: Option<f64>,
    pub applied_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AiJob {
    /// A fresh PENDING job, immediately available to workers.
    pub fn pending(new: NewJob, input_hash: String, now: DateTime<Utc>) -> Self {
        let prompt_version = new.prompt_version().to_string();
        Self {
            id: JobId::new(),
            owner: new.owner,
            target_item_id: new.target_item_id,
            kind: new.kind,
            input_payload: new.input_payload,
            input_hash,
            prompt_version,
            status: JobStatus::Pending,
            result: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            available_at: now,
            error_message: None,
            tokens_used: None,
            cost_estimate_usd: None,
            applied_at: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Whether a worker may pick this job up at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.available_at <= now
    }

    /// PENDING -> RUNNING, consuming one attempt.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.attempts >= self.max_attempts {
            return Err(TransitionError::AttemptsExhausted {
                attempts: self.attempts,
                max_attempts: self.max_attempts,
            });
        }
        self.transition(JobStatus::Running, now)?;
        self.attempts += 1;
        Ok(())
    }

    /// RUNNING -> SUCCEEDED or NEEDS_REVIEW with the model's result.
    pub fn complete(
        &mut self,
        result: JsonValue,
        needs_review: bool,
        tokens_used: u64,
        cost_estimate_usd: f64,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let next = if needs_review {
            JobStatus::NeedsReview
        } else {
            JobStatus::Succeeded
        };
        self.transition(next, now)?;
        self.result = Some(result);
        self.error_message = None;
        self.tokens_used = Some(tokens_used);
        self.cost_estimate_usd = Some(cost_estimate_usd);
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// With attempts left the job goes back to PENDING, available again at
    /// `retry_at`; otherwise it becomes FAILED. Returns the new status.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, TransitionError> {
        if self.attempts < self.max_attempts {
            self.transition(JobStatus::Pending, now)?;
            self.available_at = retry_at;
        } else {
            self.transition(JobStatus::Failed, now)?;
        }
        self.error_message = Some(error.into());
        Ok(self.status)
    }

    /// RUNNING -> FAILED regardless of remaining attempts.
    pub fn fail_permanently(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed, now)?;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// SUCCEEDED / NEEDS_REVIEW -> APPLIED.
    pub fn mark_applied(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(JobStatus::Applied) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: JobStatus::Applied,
            });
        }
        if self.result.is_none() {
            return Err(TransitionError::MissingResult);
        }
        self.transition(JobStatus::Applied, now)?;
        self.applied_at = Some(now);
        self.reviewed_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn new_job() -> NewJob {
        let mut payload = JsonObject::new();
        payload.insert("title".into(), json!("Nike Hoodie"));
        NewJob {
            owner: UserId::new(),
            target_item_id: None,
            kind: JobKind::Normalize,
            input_payload: payload,
            prompt_version: None,
        }
    }

    fn pending() -> AiJob {
        let new = new_job();
        let hash = new.input_hash();
        AiJob::pending(new, hash, Utc::now())
    }

    #[test]
    fn pending_job_defaults() {
        let job = pending();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.prompt_version, "v1");
        assert_eq!(job.available_at, job.created_at);
        assert!(job.result.is_none());
    }

    #[test]
    fn prompt_version_validation() {
        let mut new = new_job();
        new.prompt_version = Some("  ".into());
        assert!(new.validate().is_err());
        new.prompt_version = Some("x".repeat(65));
        assert!(new.validate().is_err());
        new.prompt_version = Some("v2".into());
        assert!(new.validate().is_ok());
    }

    #[test]
    fn happy_path_to_applied() {
        let now = Utc::now();
        let mut job = pending();

        job.claim(now).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);

        job.complete(json!({"category": "Tops"}), false, 120, 0.0001, now).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.tokens_used, Some(120));

        job.mark_applied(now).unwrap();
        assert_eq!(job.status, JobStatus::Applied);
        assert_eq!(job.applied_at, Some(now));
        assert_eq!(job.reviewed_at, Some(now));
    }

    #[test]
    fn low_confidence_completion_needs_review() {
        let now = Utc::now();
        let mut job = pending();
        job.claim(now).unwrap();
        job.complete(json!({}), true, 1, 0.0, now).unwrap();
        assert_eq!(job.status, JobStatus::NeedsReview);
        assert!(job.status.is_applicable());
    }

    #[test]
    fn failures_retry_until_attempts_exhausted() {
        let now = Utc::now();
        let retry_at = now + Duration::seconds(2);
        let mut job = pending();

        for attempt in 1..=2 {
            job.claim(now).unwrap();
            let status = job.record_failure("model timeout", retry_at, now).unwrap();
            assert_eq!(status, JobStatus::Pending, "attempt {attempt}");
            assert_eq!(job.available_at, retry_at);
            assert!(!job.is_ready(now));
            assert!(job.is_ready(retry_at));
        }

        job.claim(now).unwrap();
        assert_eq!(job.attempts, 3);
        let status = job.record_failure("model timeout", retry_at, now).unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("model timeout"));
        assert!(job.claim(now).is_err());
    }

    #[test]
    fn cannot_apply_outside_applicable_states() {
        let now = Utc::now();

        let mut job = pending();
        assert!(matches!(
            job.mark_applied(now),
            Err(TransitionError::Illegal { from: JobStatus::Pending, .. })
        ));

        job.claim(now).unwrap();
        assert!(job.mark_applied(now).is_err());

        job.fail_permanently("unsupported", now).unwrap();
        assert!(job.mark_applied(now).is_err());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn applied_is_final() {
        let now = Utc::now();
        let mut job = pending();
        job.claim(now).unwrap();
        job.complete(json!({"x": 1}), false, 0, 0.0, now).unwrap();
        job.mark_applied(now).unwrap();

        assert!(job.mark_applied(now).is_err());
        assert!(job.claim(now).is_err());
        assert_eq!(job.status, JobStatus::Applied);
    }

    #[test]
    fn missing_result_blocks_apply() {
        let now = Utc::now();
        let mut job = pending();
        job.status = JobStatus::Succeeded;
        assert_eq!(job.mark_applied(now), Err(TransitionError::MissingResult));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let job = pending();
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["jobType"], "NORMALIZE");
        assert_eq!(v["status"], "PENDING");
        assert!(v.get("userId").is_some());
        assert!(v.get("itemId").is_some());
        assert!(v.get("inputHash").is_some());
    }
}
