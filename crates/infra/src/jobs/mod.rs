//! Background processing of AI jobs.
//!
//! ## Design
//!
//! - The worker claims ready PENDING jobs from the ledger store in creation order
//! - Each job runs prompt building, the model call, output validation and the review gate
//! - Transient failures go back to PENDING with a backoff delay until attempts run out
//! - Permanent failures (bad input, unsupported kind) go straight to FAILED
//! - A job left RUNNING past its lease counts as a failed attempt on the next run
//!
//! ## Components
//!
//! - `RetryPolicy`: backoff between attempts
//! - `AiWorker`: one batch at a time via `run_once`, or a background loop via `spawn`
//! - `AiWorkerHandle`: stops the loop and exposes counters

pub mod retry;
pub mod worker;

pub use retry::{BackoffStrategy, RetryPolicy};
pub use worker::{
    AiWorker, AiWorkerHandle, DEFAULT_LEASE, WorkerLoopConfig, WorkerOutcome, WorkerStats,
};
