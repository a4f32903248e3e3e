//! AI worker: claims ready jobs, runs them against the model and records the
//! outcome.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use closet_ai::{
    AiError, AiJob, CompletionModel, CompletionOptions, JobStatus, SYSTEM_PROMPT, build_prompt,
    needs_review, validate_result,
};
use closet_core::JobId;

use super::retry::RetryPolicy;
use crate::ledger::{LedgerStore, StoreError, UsageLogEntry};

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_estimate_usd: Option<f64>,
    /// Set when the job was rescheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_needs_review: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &WorkerOutcome) {
        self.jobs_processed += 1;
        match outcome.status {
            JobStatus::Succeeded => self.jobs_succeeded += 1,
            JobStatus::NeedsReview => self.jobs_needs_review += 1,
            JobStatus::Pending => self.jobs_retried += 1,
            JobStatus::Failed => self.jobs_failed += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerLoopConfig {
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2_000),
            batch_size: 5,
            name: "ai-worker".to_string(),
        }
    }
}

/// Handle to control a running background worker.
#[derive(Debug)]
pub struct AiWorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl AiWorkerHandle {
    /// Request graceful shutdown and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.join.await {
            error!(error = %e, "ai worker task ended abnormally");
        }
    }

    pub fn stats(&self) -> WorkerStats {
        read_stats(&self.stats)
    }
}

fn read_stats(stats: &Mutex<WorkerStats>) -> WorkerStats {
    stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// How long a claimed job may stay RUNNING before another run releases it.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(10 * 60);

/// Executes AI jobs. Clones share the store, model and statistics, so the
/// background loop and on-demand runs report into the same counters.
#[derive(Clone)]
pub struct AiWorker {
    store: Arc<dyn LedgerStore>,
    model: Arc<dyn CompletionModel>,
    retry: RetryPolicy,
    lease: Duration,
    options: CompletionOptions,
    stats: Arc<Mutex<WorkerStats>>,
}

impl AiWorker {
    pub fn new(store: Arc<dyn LedgerStore>, model: Arc<dyn CompletionModel>) -> Self {
        Self {
            store,
            model,
            retry: RetryPolicy::default(),
            lease: DEFAULT_LEASE,
            options: CompletionOptions {
                system_prompt: Some(SYSTEM_PROMPT.to_string()),
                ..CompletionOptions::default()
            },
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn stats(&self) -> WorkerStats {
        read_stats(&self.stats)
    }

    /// Release expired leases, then claim up to `batch_size` ready jobs and
    /// process them in order.
    ///
    /// A job whose outcome cannot be stored is logged and left RUNNING; a
    /// later run releases it once its lease expires.
    pub async fn run_once(
        &self,
        now: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<Vec<WorkerOutcome>, StoreError> {
        self.release_expired(now).await?;

        let claimed = self.store.claim_ready(now, batch_size).await?;
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed jobs");
        }

        let mut outcomes = Vec::with_capacity(claimed.len());
        for job in claimed {
            let job_id = job.id;
            match self.process(job, now).await {
                Ok(outcome) => {
                    self.stats
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .record(&outcome);
                    outcomes.push(outcome);
                }
                Err(e) => error!(job_id = %job_id, error = %e, "failed to record job outcome"),
            }
        }
        Ok(outcomes)
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let lease = chrono::Duration::from_std(self.lease).unwrap_or_else(|_| chrono::Duration::days(1));
        let stale_before = now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC);
        for job in self.store.release_expired(stale_before, now).await? {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                status = %job.status,
                "job lease expired; released"
            );
        }
        Ok(())
    }

    async fn process(&self, mut job: AiJob, now: DateTime<Utc>) -> Result<WorkerOutcome, StoreError> {
        match self.execute(&mut job, now).await {
            Ok(usage) => {
                self.store.complete_job(&job, &usage, now.date_naive()).await?;
                info!(
                    job_id = %job.id,
                    kind = %job.kind,
                    status = %job.status,
                    tokens = usage.tokens_used,
                    latency_ms = usage.latency_ms,
                    "job completed"
                );
                Ok(WorkerOutcome {
                    job_id: job.id,
                    status: job.status,
                    attempts: job.attempts,
                    tokens_used: job.tokens_used,
                    cost_estimate_usd: job.cost_estimate_usd,
                    available_at: None,
                    error: None,
                })
            }
            Err(err) => {
                let message = err.to_string();
                let transition = if err.is_retriable() {
                    let retry_at = self.retry.retry_at(job.id, job.attempts, now);
                    job.record_failure(message.clone(), retry_at, now).map(|_| ())
                } else {
                    job.fail_permanently(message.clone(), now)
                };
                if let Err(e) = transition {
                    return Err(StoreError::Conflict(e.to_string()));
                }
                self.store.record_failure(&job).await?;

                if job.status == JobStatus::Pending {
                    warn!(
                        job_id = %job.id,
                        attempts = job.attempts,
                        max_attempts = job.max_attempts,
                        available_at = %job.available_at,
                        error = %message,
                        "job attempt failed; retry scheduled"
                    );
                } else {
                    warn!(job_id = %job.id, attempts = job.attempts, error = %message, "job failed");
                }

                Ok(WorkerOutcome {
                    job_id: job.id,
                    status: job.status,
                    attempts: job.attempts,
                    tokens_used: None,
                    cost_estimate_usd: None,
                    available_at: (job.status == JobStatus::Pending).then_some(job.available_at),
                    error: Some(message),
                })
            }
        }
    }

    /// Run the model and move `job` to its finished status in memory.
    async fn execute(&self, job: &mut AiJob, now: DateTime<Utc>) -> Result<UsageLogEntry, AiError> {
        let prompt = build_prompt(job)?;
        let completion = self.model.complete_json(&prompt, &self.options).await?;
        validate_result(job.kind, &completion.data)?;

        let review = needs_review(job.kind, &completion.data);
        let tokens = completion.usage.total_tokens;
        job.complete(
            completion.data,
            review,
            tokens,
            completion.cost_estimate_usd,
            now,
        )
        .map_err(|e| AiError::Internal(e.to_string()))?;

        Ok(UsageLogEntry {
            id: Uuid::now_v7(),
            job_id: job.id,
            model: completion.model,
            prompt_chars: prompt.chars().count() as u64,
            response_bytes: completion.raw.len() as u64,
            tokens_used: tokens,
            cost_estimate_usd: completion.cost_estimate_usd,
            latency_ms: completion.latency_ms,
            created_at: now,
        })
    }

    /// Poll for ready jobs on a background task until shut down.
    pub fn spawn(&self, config: WorkerLoopConfig) -> AiWorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let worker = self.clone();
        let stats = self.stats.clone();

        let join = tokio::spawn(async move {
            info!(worker = %config.name, batch_size = config.batch_size, "ai worker started");
            let started = Instant::now();

            loop {
                match worker.run_once(Utc::now(), config.batch_size).await {
                    Ok(outcomes) if !outcomes.is_empty() => {
                        debug!(worker = %config.name, processed = outcomes.len(), "batch done");
                        if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                            break;
                        }
                        // More work may be waiting; poll again right away.
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => error!(worker = %config.name, error = %e, "worker batch failed"),
                }

                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }

            info!(
                worker = %config.name,
                uptime_secs = started.elapsed().as_secs(),
                "ai worker stopped"
            );
        });

        AiWorkerHandle {
            shutdown: Some(shutdown_tx),
            join,
            stats,
        }
    }
}
