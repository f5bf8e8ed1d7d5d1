//! HTTP model-gateway client.
//!
//! The gateway is a small aggregation service that fronts one or more model
//! providers behind a uniform API:
//!
//! - `POST /v1/chat`: `{provider, model, messages, stream, temperature?}`
//!   returning `{message: {role, content}}`
//! - `POST /v1/embed`: `{provider, model, input}` returning `{embedding}`
//! - `GET /v1/providers`: `{providers: [{provider, models}]}`
//! - `GET /health`
//!
//! Document-processing calls carry no client-side timeout at this boundary;
//! provider listing and health probes are wrapped explicitly.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use docflow_core::{
    defaults, ChatMessage, ChatOptions, EmbeddingScope, Error, LanguageModelService,
    ProviderModels, Result,
};

/// Timeout for health probes (seconds).
const HEALTH_TIMEOUT_SECS: u64 = 5;

/// Chat completions that take longer than this get a slow-operation warning.
const SLOW_CHAT_MS: u64 = 30_000;

/// Embeddings that take longer than this get a slow-operation warning.
const SLOW_EMBED_MS: u64 = 5_000;

/// Production `LanguageModelService` backed by the model gateway.
pub struct HttpModelGateway {
    client: Client,
    base_url: String,
}

impl HttpModelGateway {
    /// Create a gateway client against an explicit base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        info!("Initializing model gateway client: url={}", base_url);
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Create from environment variables.
    ///
    /// Reads `DOCFLOW_GATEWAY_URL`, falling back to the default local gateway.
    pub fn from_env() -> Self {
        let base_url = std::env::var(defaults::ENV_GATEWAY_URL)
            .unwrap_or_else(|_| defaults::GATEWAY_URL.to_string());
        Self::new(base_url)
    }

    /// Base URL this client targets.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct ChatRequest {
    provider: String,
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Serialize)]
struct EmbedRequest {
    provider: String,
    model: String,
    input: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ProvidersResponse {
    providers: Vec<ProviderModels>,
}

#[async_trait]
impl LanguageModelService for HttpModelGateway {
    #[instrument(skip(self, messages), fields(subsystem = "inference", component = "gateway", op = "chat_complete", provider = %opts.provider, model = %opts.model, prompt_len = messages.iter().map(|m| m.content.len()).sum::<usize>()))]
    async fn chat_complete(
        &self,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<String> {
        let start = Instant::now();

        let request = ChatRequest {
            provider: opts.provider.clone(),
            model: opts.model.clone(),
            messages: messages.to_vec(),
            stream: false,
            temperature: opts.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Gateway returned {}: {}",
                status, body
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content = result.message.content;
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = content.len(),
            duration_ms = elapsed,
            "Chat completion done"
        );
        if elapsed > SLOW_CHAT_MS {
            warn!(duration_ms = elapsed, slow = true, "Slow chat completion");
        }
        Ok(content)
    }

    #[instrument(skip(self, text), fields(subsystem = "inference", component = "gateway", op = "embed", embed_provider = %scope.provider, embed_model = %scope.model, prompt_len = text.len()))]
    async fn embed(&self, text: &str, scope: &EmbeddingScope) -> Result<Vec<f32>> {
        let start = Instant::now();

        let request = EmbedRequest {
            provider: scope.provider.clone(),
            model: scope.model.clone(),
            input: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/v1/embed", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "Gateway returned {}: {}",
                status, body
            )));
        }

        let result: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        if result.embedding.is_empty() {
            return Err(Error::Embedding("Gateway returned empty vector".to_string()));
        }

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(duration_ms = elapsed, "Embedding done");
        if elapsed > SLOW_EMBED_MS {
            warn!(duration_ms = elapsed, slow = true, "Slow embedding operation");
        }
        Ok(result.embedding)
    }

    #[instrument(skip(self), fields(subsystem = "inference", component = "gateway", op = "list_chat_providers"))]
    async fn list_chat_providers(&self) -> Result<Vec<ProviderModels>> {
        let fetch = async {
            let response = self
                .client
                .get(format!("{}/v1/providers", self.base_url))
                .send()
                .await
                .map_err(|e| Error::Request(format!("Request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Request(format!(
                    "Gateway returned {}: {}",
                    status, body
                )));
            }

            let result: ProvidersResponse = response
                .json()
                .await
                .map_err(|e| Error::Request(format!("Failed to parse response: {}", e)))?;
            Ok(result.providers)
        };

        match tokio::time::timeout(
            Duration::from_secs(defaults::PROVIDER_LIST_TIMEOUT_SECS),
            fetch,
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Request(format!(
                "Provider listing timed out after {}s",
                defaults::PROVIDER_LIST_TIMEOUT_SECS
            ))),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("Gateway health check passed");
                    Ok(true)
                } else {
                    warn!("Gateway health check failed: {}", resp.status());
                    Ok(false)
                }
            }
            Err(e) => {
                warn!("Gateway health check error: {}", e);
                Ok(false)
            }
        }
    }
}
