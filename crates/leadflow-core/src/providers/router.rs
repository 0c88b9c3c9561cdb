//! Failover across configured providers

use anyhow::{Result, anyhow, bail};
use tracing::{debug, info, warn};

use super::{Completion, LlmProvider};

/// Tries providers in order (index 0 is the primary) until one answers.
///
/// Each provider gets a single attempt. The heat classifier's deadline is
/// far shorter than any useful backoff, so a failure moves straight on.
pub struct ModelRouter {
    providers: Vec<Box<dyn LlmProvider>>,
}

impl ModelRouter {
    pub fn single(provider: Box<dyn LlmProvider>) -> Self {
        Self {
            providers: vec![provider],
        }
    }

    pub fn with_failover(providers: Vec<Box<dyn LlmProvider>>) -> Result<Self> {
        if providers.is_empty() {
            bail!("at least one LLM provider is required");
        }
        Ok(Self { providers })
    }

    pub async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
        let mut failures = Vec::new();
        for (position, provider) in self.providers.iter().enumerate() {
            debug!("Asking {} ({})", provider.provider_name(), provider.model());
            match provider.complete(system, prompt).await {
                Ok(completion) => {
                    if position > 0 {
                        info!("Classifier answered by fallback provider {}", provider.provider_name());
                    }
                    return Ok(completion);
                }
                Err(e) => {
                    warn!("Provider {} failed: {:#}", provider.provider_name(), e);
                    failures.push(format!("{}: {:#}", provider.provider_name(), e));
                }
            }
        }
        Err(anyhow!("all providers failed ({})", failures.join("; ")))
    }

    pub fn model(&self) -> &str {
        self.providers.first().map_or("unknown", |p| p.model())
    }

    pub fn provider_name(&self) -> &str {
        self.providers.first().map_or("unknown", |p| p.provider_name())
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}
