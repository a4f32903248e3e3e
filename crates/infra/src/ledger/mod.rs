//! The AI job ledger service: admission, idempotent reuse, queries and
//! result application, on top of a [`LedgerStore`].

pub mod in_memory;
pub mod postgres;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use closet_ai::{AiJob, JobKind, JobStatus, JsonObject, NewJob, QuotaExceeded, UserQuota, derive_patch};
use closet_core::{DomainError, ItemId, JobId, UserId};
use closet_inventory::{ClosetItem, ItemPatch, NewItem};

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use store::{
    APPLY_TO_ITEM, ApplyWrite, AuditEntry, JobFilter, JobPage, LEASE_EXPIRED, LedgerStore,
    Pagination, StoreError, UsageLogEntry,
};

pub const DEFAULT_APPLY_REASON: &str = "Applied via API";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden")]
    Forbidden,

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Store(StoreError),
}

impl LedgerError {
    fn not_found(what: &str) -> Self {
        Self::NotFound(what.to_string())
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(msg) => Self::InvalidState(msg),
            other => Self::Store(other),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::NotFound => Self::not_found("resource"),
            DomainError::Conflict(msg) | DomainError::InvariantViolation(msg) => {
                Self::InvalidState(msg)
            }
        }
    }
}

/// A job submission as received from a client.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub owner: UserId,
    pub kind: JobKind,
    pub input_payload: JsonObject,
    pub prompt_version: Option<String>,
    pub target_item_id: Option<ItemId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A new PENDING job was queued.
    Created(AiJob),
    /// An earlier SUCCEEDED job with the same input hash answers this request.
    Reused(AiJob),
}

impl SubmitOutcome {
    pub fn job(&self) -> &AiJob {
        match self {
            SubmitOutcome::Created(job) | SubmitOutcome::Reused(job) => job,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, SubmitOutcome::Reused(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub job_id: JobId,
    pub item_id: Option<ItemId>,
    pub applied: ItemPatch,
}

/// Ledger service. Cheap to clone; all state lives in the store.
#[derive(Clone)]
pub struct AiJobLedger {
    store: Arc<dyn LedgerStore>,
    default_daily_token_budget: u64,
}

impl AiJobLedger {
    pub fn new(store: Arc<dyn LedgerStore>, default_daily_token_budget: u64) -> Self {
        Self {
            store,
            default_daily_token_budget,
        }
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        self.store.clone()
    }

    /// Admit a job request, reuse a finished identical one, or queue a new one.
    #[instrument(skip(self, request), fields(owner = %request.owner, kind = %request.kind), err)]
    pub async fn submit(
        &self,
        request: SubmitRequest,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, LedgerError> {
        let new = NewJob {
            owner: request.owner,
            target_item_id: request.target_item_id,
            kind: request.kind,
            input_payload: request.input_payload,
            prompt_version: request.prompt_version,
        };
        new.validate()?;

        let quota = self
            .store
            .get_quota(new.owner)
            .await?
            .ok_or_else(|| LedgerError::not_found("user"))?;
        quota.admit(now.date_naive())?;

        let input_hash = new.input_hash();

        if let Some(existing) = self.store.find_reusable(&input_hash).await? {
            info!(job_id = %existing.id, input_hash = %input_hash, "reusing succeeded job");
            return Ok(SubmitOutcome::Reused(existing));
        }

        if let Some(item_id) = new.target_item_id {
            match self.store.get_item(item_id).await? {
                Some(item) if item.owner == new.owner => {}
                _ => return Err(LedgerError::not_found("item")),
            }
        }

        let job = AiJob::pending(new, input_hash, now);
        self.store.insert_job(&job).await?;
        info!(job_id = %job.id, input_hash = %job.input_hash, "job queued");
        Ok(SubmitOutcome::Created(job))
    }

    pub async fn list(
        &self,
        owner: UserId,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> Result<JobPage, LedgerError> {
        Ok(self.store.list_jobs(owner, filter, pagination).await?)
    }

    pub async fn get(&self, owner: UserId, job_id: JobId) -> Result<AiJob, LedgerError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("job"))?;
        if job.owner != owner {
            return Err(LedgerError::Forbidden);
        }
        Ok(job)
    }

    /// Write a finished job's result onto its target item and mark it APPLIED.
    #[instrument(skip(self, reason), fields(owner = %owner, job_id = %job_id), err)]
    pub async fn apply(
        &self,
        owner: UserId,
        job_id: JobId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, LedgerError> {
        let job = self.get(owner, job_id).await?;

        if !job.status.is_applicable() {
            return Err(LedgerError::InvalidState(format!(
                "job status is {}; only {} or {} jobs can be applied",
                job.status,
                JobStatus::Succeeded,
                JobStatus::NeedsReview
            )));
        }
        let result = job
            .result
            .as_ref()
            .ok_or_else(|| LedgerError::InvalidState("job has no result".to_string()))?;

        let patch = derive_patch(job.kind, result);
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_APPLY_REASON.to_string());

        let write = ApplyWrite {
            job_id,
            owner,
            expected_status: job.status,
            item_id: job.target_item_id,
            audit: AuditEntry {
                id: Uuid::now_v7(),
                job_id,
                actor_id: owner,
                action: APPLY_TO_ITEM.to_string(),
                reason,
                payload: json!({
                    "jobType": job.kind,
                    "itemId": job.target_item_id,
                    "updates": patch.to_json(),
                }),
                created_at: now,
            },
            patch,
            applied_at: now,
        };
        self.store.apply_job(&write).await?;

        info!(item_id = ?write.item_id, "job result applied");
        Ok(ApplyOutcome {
            job_id,
            item_id: write.item_id,
            applied: write.patch,
        })
    }

    pub async fn audit_trail(&self, owner: UserId, job_id: JobId) -> Result<Vec<AuditEntry>, LedgerError> {
        self.get(owner, job_id).await?;
        Ok(self.store.audit_trail(job_id).await?)
    }

    /// The owner's quota as it reads today.
    pub async fn quota(&self, owner: UserId, now: DateTime<Utc>) -> Result<UserQuota, LedgerError> {
        let quota = self
            .store
            .get_quota(owner)
            .await?
            .ok_or_else(|| LedgerError::not_found("user"))?;
        Ok(quota.as_of(now.date_naive()))
    }

    /// Give `owner` the default daily budget unless a quota already exists.
    pub async fn provision_quota(&self, owner: UserId, now: DateTime<Utc>) -> Result<UserQuota, LedgerError> {
        if let Some(existing) = self.store.get_quota(owner).await? {
            return Ok(existing);
        }
        let quota = UserQuota::new(owner, self.default_daily_token_budget, now.date_naive());
        self.store.upsert_quota(&quota).await?;
        info!(owner = %owner, budget = quota.daily_token_budget, "quota provisioned");
        Ok(quota)
    }

    /// Create an item. The owner's quota is provisioned on first use.
    pub async fn create_item(
        &self,
        owner: UserId,
        new: NewItem,
        now: DateTime<Utc>,
    ) -> Result<ClosetItem, LedgerError> {
        let item = ClosetItem::create(owner, new, now)?;
        self.provision_quota(owner, now).await?;
        self.store.insert_item(&item).await?;
        Ok(item)
    }

    /// Foreign items read as missing.
    pub async fn get_item(&self, owner: UserId, item_id: ItemId) -> Result<ClosetItem, LedgerError> {
        match self.store.get_item(item_id).await? {
            Some(item) if item.owner == owner => Ok(item),
            _ => Err(LedgerError::not_found("item")),
        }
    }

    pub async fn delete_item(&self, owner: UserId, item_id: ItemId) -> Result<(), LedgerError> {
        if self.store.delete_item(owner, item_id).await? {
            Ok(())
        } else {
            Err(LedgerError::not_found("item"))
        }
    }
}
