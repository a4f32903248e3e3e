//! `closet-ai`
//!
//! **Responsibility:** the AI job ledger's domain rules, free of IO.
//!
//! - Job kinds, statuses and the legal status transitions.
//! - The content hash used as the idempotency key.
//! - Daily token admission policy.
//! - Result schemas, the review policy and prompts the worker needs.
//! - The table mapping a job result to a partial item update.
//!
//! Persistence, HTTP and the model transport live in `closet-infra`.

pub mod apply;
pub mod hash;
pub mod job;
pub mod kind;
pub mod model;
pub mod prompt;
pub mod quota;
pub mod result;
pub mod review;
pub mod schema;
pub mod status;

pub use apply::derive_patch;
pub use hash::{DEFAULT_PROMPT_VERSION, canonicalize, input_hash};
pub use job::{AiJob, JsonObject, NewJob, DEFAULT_MAX_ATTEMPTS};
pub use kind::JobKind;
pub use model::{Completion, CompletionModel, CompletionOptions, TokenUsage, estimate_cost_usd};
pub use prompt::{SYSTEM_PROMPT, build_prompt};
pub use quota::{QuotaExceeded, UserQuota};
pub use result::AiError;
pub use review::{REVIEW_CONFIDENCE_THRESHOLD, needs_review};
pub use schema::{SchemaError, validate_result};
pub use status::{JobStatus, TransitionError};
