//! Mock model service for deterministic testing.
//!
//! Implements `LanguageModelService` with scripted replies, scripted
//! failures, a call log for assertions, and deterministic embeddings.
//!
//! ## Usage
//!
//! ```rust
//! use docflow_inference::mock::MockModelService;
//!
//! let service = MockModelService::new()
//!     .with_chat_reply(r#"{"result": true, "confidence": 0.9}"#)
//!     .with_dimension(384);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docflow_core::{
    ChatMessage, ChatOptions, EmbeddingScope, Error, LanguageModelService, ProviderModels, Result,
};

/// Mock `LanguageModelService` for tests.
#[derive(Clone)]
pub struct MockModelService {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    default_reply: String,
    /// Needle-to-reply pairs matched against the joined prompt, in order.
    reply_needles: Vec<(String, String)>,
    /// Exact prompt-to-reply map, checked before needle matching.
    reply_map: HashMap<String, String>,
    chat_failure: Option<String>,
    embed_failure: Option<String>,
    providers: Vec<ProviderModels>,
    healthy: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            default_reply: "Mock reply".to_string(),
            reply_needles: Vec::new(),
            reply_map: HashMap::new(),
            chat_failure: None,
            embed_failure: None,
            providers: vec![ProviderModels {
                provider: "mock".to_string(),
                models: vec!["mock-model".to_string()],
            }],
            healthy: true,
        }
    }
}

/// One logged call for assertions.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub input: String,
}

impl MockModelService {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Set the default chat reply.
    pub fn with_chat_reply(mut self, reply: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_reply = reply.into();
        self
    }

    /// Reply with `reply` whenever the joined prompt contains `needle`.
    /// Needles are checked in registration order.
    pub fn with_reply_containing(
        mut self,
        needle: impl Into<String>,
        reply: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .reply_needles
            .push((needle.into(), reply.into()));
        self
    }

    /// Reply with `reply` for an exact prompt match.
    pub fn with_reply_for(mut self, prompt: impl Into<String>, reply: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .reply_map
            .insert(prompt.into(), reply.into());
        self
    }

    /// Make every chat call fail with `Error::Inference(message)`.
    pub fn with_chat_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).chat_failure = Some(message.into());
        self
    }

    /// Make every embed call fail with `Error::Embedding(message)`.
    pub fn with_embed_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).embed_failure = Some(message.into());
        self
    }

    /// Set the provider catalog returned by `list_chat_providers`.
    pub fn with_providers(mut self, providers: Vec<ProviderModels>) -> Self {
        Arc::make_mut(&mut self.config).providers = providers;
        self
    }

    /// Set the health probe result.
    pub fn with_health(mut self, healthy: bool) -> Self {
        Arc::make_mut(&mut self.config).healthy = healthy;
        self
    }

    /// All logged calls, for assertions.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }

    /// Number of chat calls so far.
    pub fn chat_call_count(&self) -> usize {
        self.count_calls("chat_complete")
    }

    /// Number of embed calls so far.
    pub fn embed_call_count(&self) -> usize {
        self.count_calls("embed")
    }

    fn count_calls(&self, operation: &str) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn log_call(&self, operation: &str, input: &str) {
        self.call_log.lock().unwrap().push(MockCall {
            operation: operation.to_string(),
            input: input.to_string(),
        });
    }
}

impl Default for MockModelService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModelService for MockModelService {
    async fn chat_complete(&self, messages: &[ChatMessage], _opts: &ChatOptions) -> Result<String> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.log_call("chat_complete", &prompt);

        if let Some(msg) = &self.config.chat_failure {
            return Err(Error::Inference(msg.clone()));
        }
        if let Some(reply) = self.config.reply_map.get(&prompt) {
            return Ok(reply.clone());
        }
        for (needle, reply) in &self.config.reply_needles {
            if prompt.contains(needle) {
                return Ok(reply.clone());
            }
        }
        Ok(self.config.default_reply.clone())
    }

    async fn embed(&self, text: &str, _scope: &EmbeddingScope) -> Result<Vec<f32>> {
        self.log_call("embed", text);
        if let Some(msg) = &self.config.embed_failure {
            return Err(Error::Embedding(msg.clone()));
        }
        Ok(MockEmbeddingGenerator::generate(text, self.config.dimension))
    }

    async fn list_chat_providers(&self) -> Result<Vec<ProviderModels>> {
        self.log_call("list_chat_providers", "");
        Ok(self.config.providers.clone())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.config.healthy)
    }
}

/// Deterministic embedding generator.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic unit vector from text.
    ///
    /// Character-based hashing: the same text always produces the same
    /// embedding, and different texts almost always differ.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }
        Self::normalize(&mut vec);
        vec
    }

    /// Generate a deterministic unit vector from a numeric seed.
    pub fn generate_with_seed(seed: u64, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        let mut state = seed;
        // LCG; deterministic pseudo-random values
        for item in vec.iter_mut() {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            *item = ((state % 1000) as f32) / 1000.0 - 0.5;
        }
        Self::normalize(&mut vec);
        vec
    }

    /// Cosine similarity between two vectors of equal length.
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }

    fn normalize(vec: &mut [f32]) {
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for item in vec.iter_mut() {
                *item /= norm;
            }
        }
    }
}
