use crate::config;
use crate::error::{ChatError, ChatResult};
use crate::models::{ApiConfig, ModelInfo, WireMessage};
use crate::stream;
use async_trait::async_trait;
use futures::Stream;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

// Alias for the stream type we'll return
pub type DeltaStream = Pin<Box<dyn Stream<Item = ChatResult<String>> + Send>>;

// Trait defining the interface for LLM API providers
#[async_trait]
pub trait LLMApiProvider: Send + Sync {
    // Returns a stream of content deltas. Resolves once response headers arrive.
    async fn send_chat_stream_request(
        &self,
        config: &ApiConfig,
        messages: &[WireMessage],
    ) -> ChatResult<DeltaStream>;

    // Lists the models the endpoint offers.
    async fn list_models(&self, config: &ApiConfig) -> ChatResult<Vec<ModelInfo>>;
}

// --- OpenAI Compatible Provider Implementation ---

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ErrorDetail {
    message: String,
}

pub struct OpenAICompatibleProvider {
    client: Client,
}

impl OpenAICompatibleProvider {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for OpenAICompatibleProvider {
    fn default() -> Self {
        Self::new()
    }
}

pub fn endpoint(config: &ApiConfig, path: &str) -> String {
    format!("{}/{}", config.base_url.trim_end_matches('/'), path)
}

/// Turns a non-2xx response into a transport error, preferring the
/// provider's `{error: {message}}` body over the bare status.
async fn failure_from_response(response: Response) -> ChatError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    log::error!("API request failed with status {}: {}", status, body);
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) if !envelope.error.message.trim().is_empty() => {
            ChatError::Transport(envelope.error.message)
        }
        _ => ChatError::Transport(format!(
            "request failed with status {}",
            status.as_u16()
        )),
    }
}

fn parse_model_entry(entry: &Value) -> Option<ModelInfo> {
    match entry {
        Value::String(id) => Some(ModelInfo {
            id: id.clone(),
            name: id.clone(),
        }),
        Value::Object(obj) => {
            let id = obj.get("id")?.as_str()?.to_string();
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| id.clone());
            Some(ModelInfo { id, name })
        }
        _ => None,
    }
}

/// Reads `{data: [...]}` (OpenAI, Groq) or `{models: [...]}` listings.
pub fn parse_model_listing(body: &Value) -> Vec<ModelInfo> {
    let entries = body
        .get("data")
        .and_then(Value::as_array)
        .or_else(|| body.get("models").and_then(Value::as_array));
    entries
        .map(|list| list.iter().filter_map(parse_model_entry).collect())
        .unwrap_or_default()
}

#[async_trait]
impl LLMApiProvider for OpenAICompatibleProvider {
    async fn send_chat_stream_request(
        &self,
        config: &ApiConfig,
        messages: &[WireMessage],
    ) -> ChatResult<DeltaStream> {
        let api_key = config::resolve_api_key(config)?;
        log::info!(
            "Sending STREAM request to OpenAI compatible API: {} using model: {}",
            config.base_url,
            config.model
        );

        let request_body = ChatCompletionRequest {
            model: &config.model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(endpoint(config, "chat/completions"))
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to send stream request: {}", e);
                ChatError::Transport(format!("request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(failure_from_response(response).await);
        }

        Ok(Box::pin(stream::decode(response.bytes_stream())))
    }

    async fn list_models(&self, config: &ApiConfig) -> ChatResult<Vec<ModelInfo>> {
        let api_key = config::resolve_api_key(config)?;
        log::debug!("Fetching model list from {}", config.base_url);

        let response = self
            .client
            .get(endpoint(config, "models"))
            .bearer_auth(api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            log::warn!("Model listing failed with status {}", status);
            return Err(ChatError::Transport(format!(
                "failed to fetch models: {}",
                status
            )));
        }

        let body: Value = response.json().await?;
        let models = parse_model_listing(&body);
        log::info!("Fetched {} models", models.len());
        Ok(models)
    }
}
