//! Uniform completion and embedding client over external providers.
//!
//! Providers are selected by model-name prefix through [`ProviderRegistry`]
//! so the orchestrator never knows which vendor it is talking to. All
//! registered providers speak the OpenAI wire shape; Anthropic models are
//! routed through an OpenAI-compatible endpoint the same way the rest of
//! the platform proxies them.

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::LlmConfig;
use crate::shared::utils::estimate_token_count;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);
const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest embedding request batch; callers split above this.
pub const MAX_EMBED_BATCH: usize = 128;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider rejected credentials")]
    Auth,
    #[error("provider rate limit exceeded")]
    RateLimited,
    #[error("unknown or unsupported model: {0}")]
    InvalidModel(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl From<LlmError> for crate::error::AppError {
    fn from(err: LlmError) -> Self {
        crate::error::AppError::upstream(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionParams {
    pub temperature: f64,
    pub max_tokens: i32,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

/// Items produced by `complete_stream`. The final element carries usage;
/// when the provider omits usage it is estimated from text length.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    Content(String),
    Done {
        prompt_tokens: i32,
        completion_tokens: i32,
    },
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn embed(
        &self,
        model: &str,
        texts: &[String],
        api_key: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, LlmError>;

    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &CompletionParams,
        api_key: Option<&str>,
    ) -> Result<Completion, LlmError>;

    /// Stream deltas into `tx`. Dropping the receiver aborts the provider
    /// stream; the sender side treats a closed channel as cancellation.
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &CompletionParams,
        api_key: Option<&str>,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<(), LlmError>;
}

/// Client for OpenAI-compatible chat/embeddings endpoints.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    default_api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, default_api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            default_api_key: default_api_key.to_string(),
        }
    }

    fn key<'a>(&'a self, override_key: Option<&'a str>) -> &'a str {
        override_key.unwrap_or(&self.default_api_key)
    }

    fn classify_status(status: reqwest::StatusCode, model: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::Auth,
            429 => LlmError::RateLimited,
            400 | 404 => LlmError::InvalidModel(model.to_string()),
            code => LlmError::Unavailable(format!("HTTP {}", code)),
        }
    }

    fn completion_body(
        model: &str,
        messages: &[ChatMessage],
        params: &CompletionParams,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }
}

#[async_trait]
impl LLMProvider for OpenAiClient {
    async fn embed(
        &self,
        model: &str,
        texts: &[String],
        api_key: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .timeout(EMBEDDING_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.key(api_key)))
            .json(&json!({ "model": model, "input": texts }))
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, model));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        let data = result["data"]
            .as_array()
            .ok_or_else(|| LlmError::Unavailable("malformed embedding response".into()))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let vector = item["embedding"]
                .as_array()
                .ok_or_else(|| LlmError::Unavailable("malformed embedding response".into()))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            vectors.push(vector);
        }
        if vectors.len() != texts.len() {
            return Err(LlmError::Unavailable(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &CompletionParams,
        api_key: Option<&str>,
    ) -> Result<Completion, LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .timeout(COMPLETION_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.key(api_key)))
            .json(&Self::completion_body(model, messages, params, false))
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, model));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let prompt_tokens = result["usage"]["prompt_tokens"].as_i64().unwrap_or(0) as i32;
        let completion_tokens = result["usage"]["completion_tokens"].as_i64().unwrap_or(0) as i32;

        Ok(Completion {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &CompletionParams,
        api_key: Option<&str>,
        tx: mpsc::Sender<StreamDelta>,
    ) -> Result<(), LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .timeout(COMPLETION_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.key(api_key)))
            .json(&Self::completion_body(model, messages, params, true))
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, model));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut emitted = String::new();
        let mut usage: Option<(i32, i32)> = None;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Unavailable(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Frames are newline-delimited; keep any partial tail in the buffer.
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    break 'outer;
                }
                let Ok(parsed) = serde_json::from_str::<Value>(data) else {
                    debug!("skipping unparseable stream frame");
                    continue;
                };
                if let Some(u) = parsed.get("usage").filter(|u| !u.is_null()) {
                    usage = Some((
                        u["prompt_tokens"].as_i64().unwrap_or(0) as i32,
                        u["completion_tokens"].as_i64().unwrap_or(0) as i32,
                    ));
                }
                if let Some(content) = parsed["choices"][0]["delta"]["content"].as_str() {
                    if content.is_empty() {
                        continue;
                    }
                    emitted.push_str(content);
                    if tx
                        .send(StreamDelta::Content(content.to_string()))
                        .await
                        .is_err()
                    {
                        // Consumer went away; stop reading from the provider.
                        debug!("stream consumer closed, aborting provider stream");
                        return Ok(());
                    }
                }
            }
        }

        let (prompt_tokens, completion_tokens) = usage.unwrap_or_else(|| {
            warn!("provider stream carried no usage, estimating from text");
            let prompt_chars: String = messages.iter().map(|m| m.content.clone()).collect();
            (
                estimate_token_count(&prompt_chars) as i32,
                estimate_token_count(&emitted) as i32,
            )
        });
        let _ = tx
            .send(StreamDelta::Done {
                prompt_tokens,
                completion_tokens,
            })
            .await;
        Ok(())
    }
}

/// Selects a provider by model-name prefix. Construction happens once at
/// startup from [`LlmConfig`].
pub struct ProviderRegistry {
    routes: Vec<(&'static str, Arc<dyn LLMProvider>)>,
    default_provider: Arc<dyn LLMProvider>,
    pub default_model: String,
    pub default_embedding_model: String,
}

impl ProviderRegistry {
    pub fn from_config(config: &LlmConfig) -> Self {
        let openai: Arc<dyn LLMProvider> = Arc::new(OpenAiClient::new(
            &config.openai_base_url,
            &config.openai_api_key,
        ));
        let anthropic: Arc<dyn LLMProvider> = Arc::new(OpenAiClient::new(
            &config.anthropic_base_url,
            &config.anthropic_api_key,
        ));
        Self {
            routes: vec![("claude-", anthropic)],
            default_provider: openai,
            default_model: config.default_model.clone(),
            default_embedding_model: config.default_embedding_model.clone(),
        }
    }

    pub fn provider_for(&self, model: &str) -> Arc<dyn LLMProvider> {
        for (prefix, provider) in &self.routes {
            if model.starts_with(prefix) {
                return Arc::clone(provider);
            }
        }
        Arc::clone(&self.default_provider)
    }
}

/// Vector width produced by each known embedding model.
pub fn embedding_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" => 1536,
        _ => 1536,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_dimensions() {
        assert_eq!(embedding_dimensions("text-embedding-3-small"), 1536);
        assert_eq!(embedding_dimensions("text-embedding-3-large"), 3072);
        assert_eq!(embedding_dimensions("unknown-model"), 1536);
    }

    #[test]
    fn test_completion_body_stream_flag() {
        let messages = vec![ChatMessage::new("user", "hi")];
        let params = CompletionParams {
            temperature: 0.7,
            max_tokens: 256,
        };
        let body = OpenAiClient::completion_body("gpt-4o-mini", &messages, &params, true);
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["stream_options"]["include_usage"], json!(true));

        let body = OpenAiClient::completion_body("gpt-4o-mini", &messages, &params, false);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            OpenAiClient::classify_status(reqwest::StatusCode::UNAUTHORIZED, "m"),
            LlmError::Auth
        ));
        assert!(matches!(
            OpenAiClient::classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "m"),
            LlmError::RateLimited
        ));
        assert!(matches!(
            OpenAiClient::classify_status(reqwest::StatusCode::NOT_FOUND, "m"),
            LlmError::InvalidModel(_)
        ));
        assert!(matches!(
            OpenAiClient::classify_status(reqwest::StatusCode::BAD_GATEWAY, "m"),
            LlmError::Unavailable(_)
        ));
    }

    #[test]
    fn test_provider_registry_prefix_routing() {
        let config = LlmConfig {
            default_model: "gpt-4o-mini".into(),
            default_embedding_model: "text-embedding-3-small".into(),
            openai_base_url: "https://api.openai.com".into(),
            openai_api_key: String::new(),
            anthropic_base_url: "https://api.anthropic.com".into(),
            anthropic_api_key: String::new(),
        };
        let registry = ProviderRegistry::from_config(&config);
        // Routing is by prefix; both arms return a usable provider.
        let _ = registry.provider_for("claude-sonnet-4-5");
        let _ = registry.provider_for("gpt-4o-mini");
        assert_eq!(registry.default_model, "gpt-4o-mini");
    }
}
