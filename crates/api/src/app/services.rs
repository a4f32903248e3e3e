//! Service wiring: ledger store, ledger, worker, and token validation.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use closet_ai::CompletionModel;
use closet_auth::{Hs256JwtValidator, JwtValidator};
use closet_infra::config::AppConfig;
use closet_infra::external::{ModelError, OpenAiClient};
use closet_infra::jobs::{AiWorker, AiWorkerHandle, WorkerLoopConfig};
use closet_infra::ledger::{AiJobLedger, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ledger store: {0}")]
    Store(#[from] StoreError),

    #[error("model client: {0}")]
    Model(#[from] ModelError),
}

/// Everything the HTTP handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub ledger: AiJobLedger,
    pub worker: AiWorker,
    pub jwt: Arc<dyn JwtValidator>,
    pub worker_service_token: Option<Arc<str>>,
    worker_loop: WorkerLoopConfig,
    worker_enabled: bool,
}

impl AppServices {
    /// Wire services over an explicit store and model.
    pub fn new(config: &AppConfig, store: Arc<dyn LedgerStore>, model: Arc<dyn CompletionModel>) -> Self {
        let ledger = AiJobLedger::new(store.clone(), config.default_daily_token_budget);
        let worker = AiWorker::new(store, model).with_lease(config.worker.lease);

        Self {
            ledger,
            worker,
            jwt: Arc::new(Hs256JwtValidator::new(config.jwt_secret.clone().into_bytes())),
            worker_service_token: config.worker_service_token.as_deref().map(Arc::from),
            worker_loop: WorkerLoopConfig {
                poll_interval: config.worker.poll_interval,
                batch_size: config.worker.batch_size,
                ..WorkerLoopConfig::default()
            },
            worker_enabled: config.worker.enabled,
        }
    }

    /// Start the background worker when `WORKER_ENABLED` is set.
    pub fn spawn_worker(&self) -> Option<AiWorkerHandle> {
        if !self.worker_enabled {
            info!("background ai worker disabled; jobs run via POST /api/aijobs/process");
            return None;
        }
        Some(self.worker.spawn(self.worker_loop.clone()))
    }
}

/// Build services from configuration: Postgres or in-memory store, OpenAI model client.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    let store: Arc<dyn LedgerStore> = match (config.use_persistent_stores, config.database_url.as_deref()) {
        (true, Some(url)) => {
            let store = PostgresLedgerStore::connect(url).await?;
            store.ensure_schema().await?;
            info!("using postgres ledger store");
            Arc::new(store)
        }
        _ => {
            info!("using in-memory ledger store");
            InMemoryLedgerStore::arc()
        }
    };

    let model = OpenAiClient::new(&config.openai)?;
    if !model.is_configured() {
        warn!("OPENAI_API_KEY not set; ai jobs will fail until it is configured");
    }
    if config.worker_service_token.is_none() {
        warn!("AI_WORKER_SERVICE_TOKEN not set; /api/aijobs/process accepts only ai_worker tokens");
    }

    Ok(AppServices::new(config, store, Arc::new(model)))
}
