//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |
//!
//! Multi-row writes (`complete_job`, `apply_job`) run in one transaction;
//! `claim_ready` uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
//! claim the same job.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use closet_ai::{AiJob, JobKind, JobStatus, JsonObject, UserQuota};
use closet_core::{ItemId, JobId, UserId};
use closet_inventory::ClosetItem;

use super::store::{
    ApplyWrite, AuditEntry, JobFilter, JobPage, LEASE_EXPIRED, LedgerStore, Pagination, StoreError,
    UsageLogEntry,
};

const SCHEMA: &str = include_str!("../../migrations/0001_ai_ledger.sql");

const JOB_COLUMNS: &str = r#"
    id, owner_id, item_id, job_type, input_payload, input_hash, prompt_version,
    status, result, attempts, max_attempts, available_at, error_message,
    tokens_used, cost_estimate_usd, applied_at, reviewed_at, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn rollback(tx: Transaction<'_, Postgres>, err: StoreError) -> StoreError {
    match tx.rollback().await {
        Ok(()) => err,
        Err(e) => map_sqlx_error("rollback", e),
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn get_quota(&self, user_id: UserId) -> Result<Option<UserQuota>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, daily_token_budget, tokens_used_today, usage_day
            FROM ai_quotas
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_quota", e))?;

        row.map(|r| QuotaRow::from_row(&r).map(Into::into))
            .transpose()
            .map_err(|e| StoreError::Storage(format!("failed to decode quota row: {e}")))
    }

    #[instrument(skip(self, quota), fields(user_id = %quota.user_id), err)]
    async fn upsert_quota(&self, quota: &UserQuota) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_quotas (user_id, daily_token_budget, tokens_used_today, usage_day)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                daily_token_budget = EXCLUDED.daily_token_budget,
                tokens_used_today = EXCLUDED.tokens_used_today,
                usage_day = EXCLUDED.usage_day
            "#,
        )
        .bind(quota.user_id.as_uuid())
        .bind(to_i64(quota.daily_token_budget))
        .bind(to_i64(quota.tokens_used_today))
        .bind(quota.usage_day)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_quota", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn find_reusable(&self, input_hash: &str) -> Result<Option<AiJob>, StoreError> {
        let sql = format!(
            r#"
            SELECT {cols}
            FROM ai_jobs j
            LEFT JOIN ai_result_cache c ON c.input_hash = j.input_hash AND c.job_id = j.id
            WHERE j.input_hash = $1 AND j.status = 'SUCCEEDED'
            ORDER BY (c.job_id IS NULL), j.created_at ASC, j.id ASC
            LIMIT 1
            "#,
            cols = prefixed_job_columns("j")
        );
        let row = sqlx::query(&sql)
            .bind(input_hash)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_reusable", e))?;
        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn insert_job(&self, job: &AiJob) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO ai_jobs ({JOB_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#
        ))
        .bind(job.id.as_uuid())
        .bind(job.owner.as_uuid())
        .bind(job.target_item_id.map(|id| *id.as_uuid()))
        .bind(job.kind.as_str())
        .bind(JsonValue::Object(job.input_payload.clone()))
        .bind(&job.input_hash)
        .bind(&job.prompt_version)
        .bind(job.status.as_str())
        .bind(&job.result)
        .bind(job.attempts as i32)
        .bind(job.max_attempts as i32)
        .bind(job.available_at)
        .bind(&job.error_message)
        .bind(job.tokens_used.map(to_i64))
        .bind(job.cost_estimate_usd)
        .bind(job.applied_at)
        .bind(job.reviewed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_job(&self, job_id: JobId) -> Result<Option<AiJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM ai_jobs WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;
        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip(self, filter), fields(owner = %owner, job_count = tracing::field::Empty), err)]
    async fn list_jobs(
        &self,
        owner: UserId,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> Result<JobPage, StoreError> {
        let item_param = filter.item_id.map(|id| *id.as_uuid());
        let status_param = filter.status.map(|s| s.as_str());
        let kind_param = filter.kind.map(|k| k.as_str());

        let where_clause = r#"
            WHERE owner_id = $1
                AND ($2::uuid IS NULL OR item_id = $2)
                AND ($3::text IS NULL OR status = $3)
                AND ($4::text IS NULL OR job_type = $4)
        "#;

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM ai_jobs {where_clause}"))
            .bind(owner.as_uuid())
            .bind(item_param)
            .bind(status_param)
            .bind(kind_param)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_jobs", e))?
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_jobs", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ai_jobs {where_clause} \
             ORDER BY created_at DESC, id DESC LIMIT $5 OFFSET $6"
        ))
        .bind(owner.as_uuid())
        .bind(item_param)
        .bind(status_param)
        .bind(kind_param)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        let jobs = rows.iter().map(decode_job).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("job_count", jobs.len());
        Ok(JobPage::new(jobs, total.max(0) as u64, pagination))
    }

    #[instrument(skip(self), err)]
    async fn claim_ready(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<AiJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE ai_jobs
            SET status = 'RUNNING', attempts = attempts + 1, updated_at = $1
            WHERE id IN (
                SELECT id FROM ai_jobs
                WHERE status = 'PENDING'
                    AND available_at <= $1
                    AND attempts < max_attempts
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_ready", e))?;

        let mut jobs = rows.iter().map(decode_job).collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    #[instrument(skip(self), err)]
    async fn release_expired(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<AiJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE ai_jobs
            SET status = CASE WHEN attempts < max_attempts THEN 'PENDING' ELSE 'FAILED' END,
                available_at = CASE WHEN attempts < max_attempts THEN $2 ELSE available_at END,
                error_message = $3,
                updated_at = $2
            WHERE id IN (
                SELECT id FROM ai_jobs
                WHERE status = 'RUNNING' AND updated_at < $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(stale_before)
        .bind(now)
        .bind(LEASE_EXPIRED)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_expired", e))?;

        let mut jobs = rows.iter().map(decode_job).collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    #[instrument(skip(self, job, usage), fields(job_id = %job.id, status = %job.status), err)]
    async fn complete_job(
        &self,
        job: &AiJob,
        usage: &UsageLogEntry,
        usage_day: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE ai_jobs
            SET status = $2, result = $3, error_message = NULL,
                tokens_used = $4, cost_estimate_usd = $5, updated_at = $6
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(&job.result)
        .bind(job.tokens_used.map(to_i64))
        .bind(job.cost_estimate_usd)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("complete_job", e))?;

        if updated.rows_affected() == 0 {
            return Err(rollback(tx, StoreError::Conflict(format!("job {} is not RUNNING", job.id))).await);
        }

        if job.status == JobStatus::Succeeded {
            sqlx::query(
                r#"
                INSERT INTO ai_result_cache (input_hash, job_id)
                VALUES ($1, $2)
                ON CONFLICT (input_hash) DO UPDATE SET job_id = EXCLUDED.job_id
                WHERE NOT EXISTS (
                    SELECT 1 FROM ai_jobs j
                    WHERE j.id = ai_result_cache.job_id AND j.status = 'SUCCEEDED'
                )
                "#,
            )
            .bind(&job.input_hash)
            .bind(job.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("register_canonical", e))?;
        }

        sqlx::query(
            r#"
            UPDATE ai_quotas
            SET tokens_used_today = CASE WHEN usage_day = $2
                                         THEN tokens_used_today + $3
                                         ELSE $3 END,
                usage_day = $2
            WHERE user_id = $1
            "#,
        )
        .bind(job.owner.as_uuid())
        .bind(usage_day)
        .bind(to_i64(usage.tokens_used))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("charge_quota", e))?;

        sqlx::query(
            r#"
            INSERT INTO ai_usage_log (
                id, job_id, model, prompt_chars, response_bytes,
                tokens_used, cost_estimate_usd, latency_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(usage.id)
        .bind(usage.job_id.as_uuid())
        .bind(&usage.model)
        .bind(to_i64(usage.prompt_chars))
        .bind(to_i64(usage.response_bytes))
        .bind(to_i64(usage.tokens_used))
        .bind(usage.cost_estimate_usd)
        .bind(to_i64(usage.latency_ms))
        .bind(usage.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_usage_log", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn record_failure(&self, job: &AiJob) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE ai_jobs
            SET status = $2, error_message = $3, available_at = $4, updated_at = $5
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(&job.error_message)
        .bind(job.available_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_failure", e))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("job {} is not RUNNING", job.id)));
        }
        Ok(())
    }

    #[instrument(skip(self, write), fields(job_id = %write.job_id, item_id = ?write.item_id), err)]
    async fn apply_job(&self, write: &ApplyWrite) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE ai_jobs
            SET status = 'APPLIED', applied_at = $3, reviewed_at = $3, updated_at = $3
            WHERE id = $1 AND owner_id = $2 AND status = $4 AND result IS NOT NULL
            "#,
        )
        .bind(write.job_id.as_uuid())
        .bind(write.owner.as_uuid())
        .bind(write.applied_at)
        .bind(write.expected_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_applied", e))?;

        if updated.rows_affected() == 0 {
            let err = StoreError::Conflict(format!(
                "job {} is no longer {}",
                write.job_id, write.expected_status
            ));
            return Err(rollback(tx, err).await);
        }

        if let Some(item_id) = write.item_id {
            let p = &write.patch;
            let patched = sqlx::query(
                r#"
                UPDATE closet_items SET
                    brand = COALESCE($3, brand),
                    color = COALESCE($4, color),
                    tags = COALESCE($5, tags),
                    category = COALESCE($6, category),
                    subcategory = COALESCE($7, subcategory),
                    material = COALESCE($8, material),
                    style = COALESCE($9, style),
                    suggested_price = COALESCE($10, suggested_price),
                    condition_suggestion = COALESCE($11, condition_suggestion),
                    last_ai_run_at = $12,
                    updated_at = $12
                WHERE id = $1 AND owner_id = $2
                "#,
            )
            .bind(item_id.as_uuid())
            .bind(write.owner.as_uuid())
            .bind(&p.brand)
            .bind(&p.color)
            .bind(p.tags.as_ref().map(Json))
            .bind(&p.category)
            .bind(&p.subcategory)
            .bind(&p.material)
            .bind(&p.style)
            .bind(&p.suggested_price)
            .bind(&p.condition_suggestion)
            .bind(write.applied_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("patch_item", e))?;

            if patched.rows_affected() == 0 {
                return Err(rollback(tx, StoreError::NotFound("item".to_string())).await);
            }
        }

        let a = &write.audit;
        sqlx::query(
            r#"
            INSERT INTO ai_job_audit (id, job_id, actor_id, action, reason, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(a.id)
        .bind(a.job_id.as_uuid())
        .bind(a.actor_id.as_uuid())
        .bind(&a.action)
        .bind(&a.reason)
        .bind(&a.payload)
        .bind(a.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_audit", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn audit_trail(&self, job_id: JobId) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, actor_id, action, reason, payload, created_at
            FROM ai_job_audit
            WHERE job_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("audit_trail", e))?;

        rows.iter()
            .map(|r| {
                AuditRow::from_row(r)
                    .map(Into::into)
                    .map_err(|e| StoreError::Storage(format!("failed to decode audit row: {e}")))
            })
            .collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn usage_log(&self, job_id: JobId) -> Result<Vec<UsageLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, model, prompt_chars, response_bytes,
                   tokens_used, cost_estimate_usd, latency_ms, created_at
            FROM ai_usage_log
            WHERE job_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("usage_log", e))?;

        rows.iter()
            .map(|r| {
                UsageRow::from_row(r)
                    .map(Into::into)
                    .map_err(|e| StoreError::Storage(format!("failed to decode usage row: {e}")))
            })
            .collect()
    }

    #[instrument(skip(self, item), fields(item_id = %item.id), err)]
    async fn insert_item(&self, item: &ClosetItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO closet_items (
                id, owner_id, title, brand, color, tags, category, subcategory,
                material, style, suggested_price, condition_suggestion,
                last_ai_run_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.owner.as_uuid())
        .bind(&item.title)
        .bind(&item.brand)
        .bind(&item.color)
        .bind(Json(&item.tags))
        .bind(&item.category)
        .bind(&item.subcategory)
        .bind(&item.material)
        .bind(&item.style)
        .bind(&item.suggested_price)
        .bind(&item.condition_suggestion)
        .bind(item.last_ai_run_at)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(item_id = %item_id), err)]
    async fn get_item(&self, item_id: ItemId) -> Result<Option<ClosetItem>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, title, brand, color, tags, category, subcategory,
                   material, style, suggested_price, condition_suggestion,
                   last_ai_run_at, created_at, updated_at
            FROM closet_items
            WHERE id = $1
            "#,
        )
        .bind(item_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_item", e))?;

        row.map(|r| ItemRow::from_row(&r).map(Into::into))
            .transpose()
            .map_err(|e| StoreError::Storage(format!("failed to decode item row: {e}")))
    }

    #[instrument(skip(self), fields(owner = %owner, item_id = %item_id), err)]
    async fn delete_item(&self, owner: UserId, item_id: ItemId) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM closet_items WHERE id = $1 AND owner_id = $2")
            .bind(item_id.as_uuid())
            .bind(owner.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_item", e))?;
        Ok(deleted.rows_affected() > 0)
    }
}

fn prefixed_job_columns(alias: &str) -> String {
    JOB_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn decode_job(row: &PgRow) -> Result<AiJob, StoreError> {
    JobRow::from_row(row)
        .map_err(|e| StoreError::Storage(format!("failed to decode job row: {e}")))?
        .try_into()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct QuotaRow {
    user_id: uuid::Uuid,
    daily_token_budget: i64,
    tokens_used_today: i64,
    usage_day: NaiveDate,
}

impl<'r> FromRow<'r, PgRow> for QuotaRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(QuotaRow {
            user_id: row.try_get("user_id")?,
            daily_token_budget: row.try_get("daily_token_budget")?,
            tokens_used_today: row.try_get("tokens_used_today")?,
            usage_day: row.try_get("usage_day")?,
        })
    }
}

impl From<QuotaRow> for UserQuota {
    fn from(row: QuotaRow) -> Self {
        UserQuota {
            user_id: UserId::from_uuid(row.user_id),
            daily_token_budget: row.daily_token_budget.max(0) as u64,
            tokens_used_today: row.tokens_used_today.max(0) as u64,
            usage_day: row.usage_day,
        }
    }
}

#[derive(Debug)]
struct JobRow {
    id: uuid::Uuid,
    owner_id: uuid::Uuid,
    item_id: Option<uuid::Uuid>,
    job_type: String,
    input_payload: JsonValue,
    input_hash: String,
    prompt_version: String,
    status: String,
    result: Option<JsonValue>,
    attempts: i32,
    max_attempts: i32,
    available_at: DateTime<Utc>,
    error_message: Option<String>,
    tokens_used: Option<i64>,
    cost_estimate_usd: Option<f64>,
    applied_at: Option<DateTime<Utc>>,
    reviewed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            item_id: row.try_get("item_id")?,
            job_type: row.try_get("job_type")?,
            input_payload: row.try_get("input_payload")?,
            input_hash: row.try_get("input_hash")?,
            prompt_version: row.try_get("prompt_version")?,
            status: row.try_get("status")?,
            result: row.try_get("result")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            available_at: row.try_get("available_at")?,
            error_message: row.try_get("error_message")?,
            tokens_used: row.try_get("tokens_used")?,
            cost_estimate_usd: row.try_get("cost_estimate_usd")?,
            applied_at: row.try_get("applied_at")?,
            reviewed_at: row.try_get("reviewed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<JobRow> for AiJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, e: closet_core::DomainError| {
            StoreError::Storage(format!("stored job {} has bad {what}: {e}", row.id))
        };
        let kind = JobKind::from_str(&row.job_type).map_err(|e| corrupt("job_type", e))?;
        let status = JobStatus::from_str(&row.status).map_err(|e| corrupt("status", e))?;
        let input_payload: JsonObject = match row.input_payload {
            JsonValue::Object(map) => map,
            _ => {
                return Err(StoreError::Storage(format!(
                    "stored job {} has non-object input_payload",
                    row.id
                )));
            }
        };

        Ok(AiJob {
            id: JobId::from_uuid(row.id),
            owner: UserId::from_uuid(row.owner_id),
            target_item_id: row.item_id.map(ItemId::from_uuid),
            kind,
            input_payload,
            input_hash: row.input_hash,
            prompt_version: row.prompt_version,
            status,
            result: row.result,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            available_at: row.available_at,
            error_message: row.error_message,
            tokens_used: row.tokens_used.map(|t| t.max(0) as u64),
            cost_estimate_usd: row.cost_estimate_usd,
            applied_at: row.applied_at,
            reviewed_at: row.reviewed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct ItemRow {
    id: uuid::Uuid,
    owner_id: uuid::Uuid,
    title: String,
    brand: Option<String>,
    color: Option<String>,
    tags: Json<Vec<String>>,
    category: Option<String>,
    subcategory: Option<String>,
    material: Option<String>,
    style: Option<String>,
    suggested_price: Option<JsonValue>,
    condition_suggestion: Option<JsonValue>,
    last_ai_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            brand: row.try_get("brand")?,
            color: row.try_get("color")?,
            tags: row.try_get("tags")?,
            category: row.try_get("category")?,
            subcategory: row.try_get("subcategory")?,
            material: row.try_get("material")?,
            style: row.try_get("style")?,
            suggested_price: row.try_get("suggested_price")?,
            condition_suggestion: row.try_get("condition_suggestion")?,
            last_ai_run_at: row.try_get("last_ai_run_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<ItemRow> for ClosetItem {
    fn from(row: ItemRow) -> Self {
        ClosetItem {
            id: ItemId::from_uuid(row.id),
            owner: UserId::from_uuid(row.owner_id),
            title: row.title,
            brand: row.brand,
            color: row.color,
            tags: row.tags.0,
            category: row.category,
            subcategory: row.subcategory,
            material: row.material,
            style: row.style,
            suggested_price: row.suggested_price,
            condition_suggestion: row.condition_suggestion,
            last_ai_run_at: row.last_ai_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug)]
struct AuditRow {
    id: uuid::Uuid,
    job_id: uuid::Uuid,
    actor_id: uuid::Uuid,
    action: String,
    reason: String,
    payload: JsonValue,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AuditRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AuditRow {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            actor_id: row.try_get("actor_id")?,
            action: row.try_get("action")?,
            reason: row.try_get("reason")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        AuditEntry {
            id: row.id,
            job_id: JobId::from_uuid(row.job_id),
            actor_id: UserId::from_uuid(row.actor_id),
            action: row.action,
            reason: row.reason,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug)]
struct UsageRow {
    id: uuid::Uuid,
    job_id: uuid::Uuid,
    model: String,
    prompt_chars: i64,
    response_bytes: i64,
    tokens_used: i64,
    cost_estimate_usd: f64,
    latency_ms: i64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for UsageRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UsageRow {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            model: row.try_get("model")?,
            prompt_chars: row.try_get("prompt_chars")?,
            response_bytes: row.try_get("response_bytes")?,
            tokens_used: row.try_get("tokens_used")?,
            cost_estimate_usd: row.try_get("cost_estimate_usd")?,
            latency_ms: row.try_get("latency_ms")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<UsageRow> for UsageLogEntry {
    fn from(row: UsageRow) -> Self {
        UsageLogEntry {
            id: row.id,
            job_id: JobId::from_uuid(row.job_id),
            model: row.model,
            prompt_chars: row.prompt_chars.max(0) as u64,
            response_bytes: row.response_bytes.max(0) as u64,
            tokens_used: row.tokens_used.max(0) as u64,
            cost_estimate_usd: row.cost_estimate_usd,
            latency_ms: row.latency_ms.max(0) as u64,
            created_at: row.created_at,
        }
    }
}
