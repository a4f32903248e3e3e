//! Storage seam for the ledger.
//!
//! Every multi-row write the ledger needs (worker completion, apply) is a
//! single trait method so each backend can make it atomic: one transaction in
//! Postgres, one write-lock section in memory.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use closet_ai::{AiJob, JobKind, JobStatus, UserQuota};
use closet_core::{ItemId, JobId, UserId};
use closet_inventory::{ClosetItem, ItemPatch};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    /// A compare-and-set lost or a uniqueness constraint fired.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Optional narrowing for job listings. The owner is always required
/// separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub item_id: Option<ItemId>,
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
}

impl JobFilter {
    pub fn matches(&self, job: &AiJob) -> bool {
        self.item_id.is_none_or(|id| job.target_item_id == Some(id))
            && self.status.is_none_or(|s| job.status == s)
            && self.kind.is_none_or(|k| job.kind == k)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
    pub jobs: Vec<AiJob>,
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl JobPage {
    pub fn new(jobs: Vec<AiJob>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            jobs,
            total,
            pagination,
            has_more,
        }
    }
}

/// One model call, recorded when a job completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLogEntry {
    pub id: Uuid,
    pub job_id: JobId,
    pub model: String,
    pub prompt_chars: u64,
    pub response_bytes: u64,
    pub tokens_used: u64,
    pub cost_estimate_usd: f64,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

pub const APPLY_TO_ITEM: &str = "APPLY_TO_ITEM";

/// Error recorded on a job whose worker never reported back.
pub const LEASE_EXPIRED: &str = "worker lease expired";

/// Record of a result being applied, written in the same transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub job_id: JobId,
    pub actor_id: UserId,
    pub action: String,
    pub reason: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Everything the apply write needs, computed up front by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyWrite {
    pub job_id: JobId,
    pub owner: UserId,
    /// Status read during the precondition checks; the write fails with
    /// [`StoreError::Conflict`] if the job has moved on since.
    pub expected_status: JobStatus,
    pub item_id: Option<ItemId>,
    pub patch: ItemPatch,
    pub audit: AuditEntry,
    pub applied_at: DateTime<Utc>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    async fn get_quota(&self, user_id: UserId) -> Result<Option<UserQuota>, StoreError>;

    async fn upsert_quota(&self, quota: &UserQuota) -> Result<(), StoreError>;

    /// A SUCCEEDED job for `input_hash`: the canonical one while it is still
    /// SUCCEEDED, else the oldest other SUCCEEDED job with that hash.
    async fn find_reusable(&self, input_hash: &str) -> Result<Option<AiJob>, StoreError>;

    async fn insert_job(&self, job: &AiJob) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<AiJob>, StoreError>;

    /// Owner-scoped listing, newest first.
    async fn list_jobs(
        &self,
        owner: UserId,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> Result<JobPage, StoreError>;

    /// Move up to `limit` ready PENDING jobs (oldest first) to RUNNING,
    /// consuming one attempt each. A job is handed to at most one caller.
    async fn claim_ready(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<AiJob>, StoreError>;

    /// Hand back RUNNING jobs not touched since `stale_before`, as a failed
    /// attempt: PENDING (available at `now`) with attempts left, FAILED
    /// otherwise. Returns the jobs as they now stand.
    async fn release_expired(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<AiJob>, StoreError>;

    /// Persist a RUNNING job's completion.
    ///
    /// In one atomic write: store the job's new status/result/usage, make it
    /// canonical for its hash when SUCCEEDED (unless the current canonical job
    /// is itself still SUCCEEDED), charge the owner's quota for `usage_day`
    /// and append the usage log entry.
    async fn complete_job(
        &self,
        job: &AiJob,
        usage: &UsageLogEntry,
        usage_day: NaiveDate,
    ) -> Result<(), StoreError>;

    /// Persist a RUNNING job's failed attempt (rescheduled PENDING or FAILED).
    async fn record_failure(&self, job: &AiJob) -> Result<(), StoreError>;

    /// Atomically patch the item, mark the job APPLIED and write the audit
    /// entry. A missing or foreign item yields `NotFound("item")` and nothing
    /// is written.
    async fn apply_job(&self, write: &ApplyWrite) -> Result<(), StoreError>;

    async fn audit_trail(&self, job_id: JobId) -> Result<Vec<AuditEntry>, StoreError>;

    async fn usage_log(&self, job_id: JobId) -> Result<Vec<UsageLogEntry>, StoreError>;

    async fn insert_item(&self, item: &ClosetItem) -> Result<(), StoreError>;

    async fn get_item(&self, item_id: ItemId) -> Result<Option<ClosetItem>, StoreError>;

    /// Delete `item_id` if `owner` owns it. Returns whether a row went away.
    async fn delete_item(&self, owner: UserId, item_id: ItemId) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_limit() {
        assert_eq!(Pagination::new(None, None), Pagination { limit: 50, offset: 0 });
        assert_eq!(Pagination::new(Some(0), Some(5)).limit, 1);
        assert_eq!(Pagination::new(Some(10_000), None).limit, 200);
    }

    #[test]
    fn has_more_uses_offset_plus_limit() {
        let p = Pagination { limit: 2, offset: 0 };
        assert!(JobPage::new(vec![], 3, p).has_more);
        assert!(!JobPage::new(vec![], 2, p).has_more);
        let p = Pagination { limit: 2, offset: 2 };
        assert!(!JobPage::new(vec![], 3, p).has_more);
    }
}
