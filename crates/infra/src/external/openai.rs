//! OpenAI-compatible chat completion client in JSON mode.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, instrument};

use closet_ai::{AiError, Completion, CompletionModel, CompletionOptions, TokenUsage, estimate_cost_usd};

use crate::config::OpenAiConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no API key configured")]
    NotConfigured,
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<ModelError> for AiError {
    fn from(err: ModelError) -> Self {
        AiError::InferenceFailed(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    chat_model: String,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(&self, prompt: &str, options: &CompletionOptions) -> Result<ChatResponse, ModelError> {
        let api_key = self.api_key.as_deref().ok_or(ModelError::NotConfigured)?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = options.system_prompt.as_deref() {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: prompt });

        let body = ChatRequest {
            model: &self.chat_model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ModelError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(ModelError::Api(status.as_u16(), truncate(&text, 500)));
        }

        serde_json::from_str(&text).map_err(|e| ModelError::Parse(e.to_string()))
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Turn a chat response into a [`Completion`], parsing the first choice as JSON.
fn into_completion(
    response: ChatResponse,
    requested_model: &str,
    latency_ms: u64,
) -> Result<Completion, ModelError> {
    let raw = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ModelError::Parse("response has no message content".to_string()))?;

    let data: JsonValue = serde_json::from_str(&raw).map_err(|e| {
        ModelError::Parse(format!("reply is not JSON: {e}: {}", truncate(&raw, 200)))
    })?;

    let usage = response.usage.unwrap_or_default();
    let usage = TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        },
    };
    let model = response.model.unwrap_or_else(|| requested_model.to_string());

    Ok(Completion {
        cost_estimate_usd: estimate_cost_usd(requested_model, &usage),
        data,
        raw,
        model,
        usage,
        latency_ms,
    })
}

#[async_trait]
impl CompletionModel for OpenAiClient {
    #[instrument(skip(self, prompt, options), fields(model = %self.chat_model, prompt_chars = prompt.len()), err)]
    async fn complete_json(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, AiError> {
        let started = Instant::now();
        let response = self.chat(prompt, options).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let completion = into_completion(response, &self.chat_model, latency_ms)?;
        debug!(
            tokens = completion.usage.total_tokens,
            cost_usd = completion.cost_estimate_usd,
            latency_ms,
            "completion received"
        );
        Ok(completion)
    }
}
