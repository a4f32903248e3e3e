use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use closet_ai::{AiJob, JobStatus, UserQuota};
use closet_core::{ItemId, JobId, UserId};
use closet_inventory::ClosetItem;

use super::store::{
    ApplyWrite, AuditEntry, JobFilter, JobPage, LEASE_EXPIRED, LedgerStore, Pagination, StoreError,
    UsageLogEntry,
};

#[derive(Debug, Default)]
struct State {
    quotas: HashMap<UserId, UserQuota>,
    jobs: HashMap<JobId, AiJob>,
    /// input hash -> canonical SUCCEEDED job
    canonical: HashMap<String, JobId>,
    items: HashMap<ItemId, ClosetItem>,
    audit: Vec<AuditEntry>,
    usage: Vec<UsageLogEntry>,
}

/// In-memory ledger store for tests/dev.
///
/// All maps sit behind one lock so multi-row writes are atomic. The lock is
/// never held across an await point.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("ledger lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Storage("ledger lock poisoned".to_string()))
    }
}

fn running<'a>(state: &'a mut State, job: &AiJob) -> Result<&'a mut AiJob, StoreError> {
    match state.jobs.get_mut(&job.id) {
        Some(stored) if stored.status == JobStatus::Running => Ok(stored),
        Some(stored) => Err(StoreError::Conflict(format!(
            "job {} is {}, not RUNNING",
            job.id, stored.status
        ))),
        None => Err(StoreError::NotFound("job".to_string())),
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_quota(&self, user_id: UserId) -> Result<Option<UserQuota>, StoreError> {
        Ok(self.read()?.quotas.get(&user_id).cloned())
    }

    async fn upsert_quota(&self, quota: &UserQuota) -> Result<(), StoreError> {
        self.write()?.quotas.insert(quota.user_id, quota.clone());
        Ok(())
    }

    async fn find_reusable(&self, input_hash: &str) -> Result<Option<AiJob>, StoreError> {
        let state = self.read()?;
        let canonical = state
            .canonical
            .get(input_hash)
            .and_then(|id| state.jobs.get(id))
            .filter(|job| job.status == JobStatus::Succeeded);
        let job = canonical.or_else(|| {
            state
                .jobs
                .values()
                .filter(|j| j.input_hash == input_hash && j.status == JobStatus::Succeeded)
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
        });
        Ok(job.cloned())
    }

    async fn insert_job(&self, job: &AiJob) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<AiJob>, StoreError> {
        Ok(self.read()?.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(
        &self,
        owner: UserId,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> Result<JobPage, StoreError> {
        let state = self.read()?;
        let mut jobs: Vec<&AiJob> = state
            .jobs
            .values()
            .filter(|j| j.owner == owner && filter.matches(j))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = jobs.len() as u64;
        let page = jobs
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        Ok(JobPage::new(page, total, pagination))
    }

    async fn claim_ready(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<AiJob>, StoreError> {
        let mut state = self.write()?;

        let mut ready: Vec<(DateTime<Utc>, JobId)> = state
            .jobs
            .values()
            .filter(|j| j.is_ready(now))
            .map(|j| (j.created_at, j.id))
            .collect();
        ready.sort();

        let mut claimed = Vec::new();
        for (_, id) in ready.into_iter().take(limit as usize) {
            if let Some(job) = state.jobs.get_mut(&id) {
                if job.claim(now).is_ok() {
                    claimed.push(job.clone());
                }
            }
        }
        Ok(claimed)
    }

    async fn release_expired(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<AiJob>, StoreError> {
        let mut state = self.write()?;
        let mut released = Vec::new();
        for job in state.jobs.values_mut() {
            if job.status != JobStatus::Running || job.updated_at >= stale_before {
                continue;
            }
            job.record_failure(LEASE_EXPIRED, now, now)
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
            released.push(job.clone());
        }
        released.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(released)
    }

    async fn complete_job(
        &self,
        job: &AiJob,
        usage: &UsageLogEntry,
        usage_day: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        *running(&mut state, job)? = job.clone();

        if job.status == JobStatus::Succeeded {
            let current_holds = state
                .canonical
                .get(&job.input_hash)
                .and_then(|id| state.jobs.get(id))
                .is_some_and(|c| c.id != job.id && c.status == JobStatus::Succeeded);
            if !current_holds {
                state.canonical.insert(job.input_hash.clone(), job.id);
            }
        }
        if let Some(quota) = state.quotas.get_mut(&job.owner) {
            quota.charge(usage.tokens_used, usage_day);
        }
        state.usage.push(usage.clone());
        Ok(())
    }

    async fn record_failure(&self, job: &AiJob) -> Result<(), StoreError> {
        let mut state = self.write()?;
        *running(&mut state, job)? = job.clone();
        Ok(())
    }

    async fn apply_job(&self, write: &ApplyWrite) -> Result<(), StoreError> {
        let mut state = self.write()?;

        match state.jobs.get(&write.job_id) {
            Some(job) if job.owner == write.owner && job.status == write.expected_status => {}
            Some(job) => {
                return Err(StoreError::Conflict(format!(
                    "job {} is {}, expected {}",
                    job.id, job.status, write.expected_status
                )));
            }
            None => return Err(StoreError::NotFound("job".to_string())),
        }

        // Validate everything before the first mutation.
        if let Some(item_id) = write.item_id {
            match state.items.get(&item_id) {
                Some(item) if item.owner == write.owner => {}
                _ => return Err(StoreError::NotFound("item".to_string())),
            }
        }
        let mut job = state
            .jobs
            .get(&write.job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("job".to_string()))?;
        job.mark_applied(write.applied_at)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        if let Some(item) = write.item_id.and_then(|id| state.items.get_mut(&id)) {
            item.apply_patch(&write.patch, write.applied_at);
        }
        state.jobs.insert(job.id, job);
        state.audit.push(write.audit.clone());
        Ok(())
    }

    async fn audit_trail(&self, job_id: JobId) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn usage_log(&self, job_id: JobId) -> Result<Vec<UsageLogEntry>, StoreError> {
        Ok(self
            .read()?
            .usage
            .iter()
            .filter(|u| u.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn insert_item(&self, item: &ClosetItem) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.items.contains_key(&item.id) {
            return Err(StoreError::Conflict(format!("item {} already exists", item.id)));
        }
        state.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_item(&self, item_id: ItemId) -> Result<Option<ClosetItem>, StoreError> {
        Ok(self.read()?.items.get(&item_id).cloned())
    }

    async fn delete_item(&self, owner: UserId, item_id: ItemId) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        match state.items.get(&item_id) {
            Some(item) if item.owner == owner => {
                state.items.remove(&item_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
