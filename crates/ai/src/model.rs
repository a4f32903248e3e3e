use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::result::AiError;

/// Token counts reported by the model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: 0.0,
            max_tokens: 2000,
        }
    }
}

/// One parsed JSON completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub data: JsonValue,
    pub raw: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_estimate_usd: f64,
    pub latency_ms: u64,
}

/// A chat model that answers in JSON.
///
/// Implementations must return [`AiError::InferenceFailed`] for transport or
/// provider errors and for replies that are not JSON.
#[async_trait]
pub trait CompletionModel: Send + Sync + 'static {
    async fn complete_json(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, AiError>;
}

/// USD per one million tokens, (input, output).
const PRICE_PER_MILLION: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
];

/// Estimated spend for `usage` on `model`. Unknown models are priced as
/// the first table entry.
pub fn estimate_cost_usd(model: &str, usage: &TokenUsage) -> f64 {
    let (_, input, output) = PRICE_PER_MILLION
        .iter()
        .find(|(name, _, _)| *name == model)
        .copied()
        .unwrap_or(PRICE_PER_MILLION[0]);
    (usage.prompt_tokens as f64 * input + usage.completion_tokens as f64 * output) / 1_000_000.0
}
