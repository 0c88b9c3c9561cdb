//! LLM backends for the AI heat classifier
//!
//! The classifier sends one system prompt plus one user prompt and reads back
//! the text reply, so a backend only has to implement [`LlmProvider::complete`].
//! Anthropic and OpenAI chat completions are built in; OpenAI-compatible
//! servers (Ollama, Groq, LM Studio) reuse [`OpenAiProvider`] under their own
//! name. [`ModelRouter`] walks several backends in failover order.

pub mod anthropic;
pub mod openai;
pub mod router;

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use router::ModelRouter;

/// Transport timeout; the classifier's own deadline is normally much shorter
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Text reply of one completion call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub output_tokens: Option<u32>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Name used in logs and in `failover_order`
    fn provider_name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion>;
}

/// Where and how to reach one backend
#[derive(Clone)]
pub struct Endpoint {
    pub api_key: String,
    pub model: String,
    /// Root URL without the `/v1` suffix
    pub base_url: String,
    pub max_tokens: u32,
}

impl Endpoint {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Decode a provider reply, turning non-2xx statuses into errors that carry
/// the response body
pub(crate) async fn decode_reply<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("{} returned {}: {}", provider, status, body.trim()));
    }
    response
        .json()
        .await
        .with_context(|| format!("{} sent a reply that is not valid JSON", provider))
}
