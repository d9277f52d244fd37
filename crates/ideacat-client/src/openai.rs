//! OpenAI-compatible chat-completions client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ideacat_core::{Batch, ChatMessage, RequestMetrics, UsageMetrics};
use ideacat_tokens::ModelPrice;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::classifier::{ClassifyAttempt, Classifier, Completion};
use crate::{ClientError, prompt};

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub price: ModelPrice,
}

impl OpenAiSettings {
    /// Read the API key from `var`
    pub fn api_key_from_env(var: &str) -> Result<String, ClientError> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ClientError::Configuration(format!(
                "environment variable {} is not set",
                var
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    settings: OpenAiSettings,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent("ideacat/0.2 (batch categorizer)")
            .timeout(settings.timeout)
            .build()
            .map_err(|e| {
                ClientError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        let endpoint = format!("{}/chat/completions", settings.api_base.trim_end_matches('/'));

        Ok(Self {
            http,
            endpoint,
            settings,
        })
    }

    async fn send(&self, body: Vec<u8>) -> Result<Completion, ClientError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.settings.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Provider(format!("request timed out: {}", e))
                } else {
                    ClientError::Provider(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|s| format!(" (retry after {}s)", s))
                .unwrap_or_default();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::RateLimited(format!("{}{}", body, retry_after)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Provider(format!(
                "HTTP error {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Provider(format!("Failed to read response: {}", e)))?;

        let raw_text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ClientError::Provider("response contained no message".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| UsageMetrics {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(Completion { raw_text, usage })
    }
}

#[async_trait]
impl Classifier for OpenAiClient {
    async fn classify(&self, batch: &Batch, categories: &[String]) -> ClassifyAttempt {
        let messages = prompt::build_messages(categories, &batch.items);
        let request = ChatRequest {
            model: &self.settings.model,
            messages: &messages,
            temperature: self.settings.temperature,
        };

        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(e) => {
                let err = ClientError::Provider(format!("Failed to encode request: {}", e));
                return ClassifyAttempt {
                    metrics: RequestMetrics::failure(batch.number, 0.0, 0, batch.len(), err.to_string()),
                    outcome: Err(err),
                };
            }
        };
        let payload_bytes = body.len();

        info!("Batch {} in progress ({} ideas)", batch.number, batch.len());
        let started = Instant::now();
        let outcome = self.send(body).await;
        let elapsed = started.elapsed().as_secs_f64();

        let metrics = match &outcome {
            Ok(completion) => {
                let usage = completion.usage;
                let metrics = RequestMetrics::success(
                    batch.number,
                    usage,
                    elapsed,
                    payload_bytes,
                    self.settings
                        .price
                        .cost(usage.prompt_tokens, usage.completion_tokens),
                    batch.len(),
                );
                info!(
                    "Batch {} completed in {:.2}s - {} tokens ({:.2} tokens/s) - Payload: {:.2} KB",
                    batch.number,
                    elapsed,
                    usage.total_tokens,
                    metrics.tokens_per_second(),
                    payload_bytes as f64 / 1024.0
                );
                metrics
            }
            Err(e) => {
                error!("Batch {} request error: {}", batch.number, e);
                RequestMetrics::failure(batch.number, elapsed, payload_bytes, batch.len(), e.to_string())
            }
        };

        ClassifyAttempt { outcome, metrics }
    }

    fn name(&self) -> &str {
        "openai"
    }
}
