//! OpenAI chat completions backend, also used for OpenAI-compatible servers

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completion, Endpoint, LlmProvider, decode_reply, http_client};

#[derive(Debug)]
pub struct OpenAiProvider {
    client: Client,
    endpoint: Endpoint,
    name: String,
}

impl OpenAiProvider {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint,
            name: "openai".to_string(),
        })
    }

    /// Report under another name, e.g. `ollama` for a local server
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [RoleText<'a>; 2],
}

#[derive(Serialize)]
struct RoleText<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionReply {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ReplyUsage {
    completion_tokens: u32,
}

impl CompletionReply {
    fn into_completion(self, provider: &str) -> Result<Completion> {
        let output_tokens = self.usage.map(|u| u.completion_tokens);
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("{} reply had no choices", provider))?;
        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            output_tokens,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
        let request = CompletionRequest {
            model: &self.endpoint.model,
            max_tokens: self.endpoint.max_tokens,
            messages: [
                RoleText {
                    role: "system",
                    content: system,
                },
                RoleText {
                    role: "user",
                    content: prompt,
                },
            ],
        };
        debug!("{} classify call on {}", self.name, self.endpoint.model);

        let mut builder = self
            .client
            .post(self.endpoint.url("/v1/chat/completions"))
            .json(&request);
        // local compatible servers usually run without a key
        if !self.endpoint.api_key.is_empty() {
            builder = builder.bearer_auth(&self.endpoint.api_key);
        }
        let reply: CompletionReply = decode_reply(&self.name, builder.send().await?).await?;
        reply.into_completion(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> Endpoint {
        Endpoint::new("", "llama3", "http://localhost:11434", 256)
    }

    #[test]
    fn test_system_prompt_goes_first() {
        let request = CompletionRequest {
            model: "gpt-4o-mini",
            max_tokens: 256,
            messages: [
                RoleText {
                    role: "system",
                    content: "Classify leads.",
                },
                RoleText {
                    role: "user",
                    content: "hello",
                },
            ],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_reply_text_and_usage() {
        let reply: CompletionReply = serde_json::from_value(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "{\"heat\":\"WARM\"}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }))
        .unwrap();
        let completion = reply.into_completion("openai").unwrap();
        assert_eq!(completion.text, "{\"heat\":\"WARM\"}");
        assert_eq!(completion.output_tokens, Some(5));
    }

    #[test]
    fn test_reply_without_choices_is_an_error() {
        let reply: CompletionReply = serde_json::from_value(json!({"choices": []})).unwrap();
        let err = reply.into_completion("groq").unwrap_err();
        assert!(err.to_string().contains("groq"));
    }

    #[test]
    fn test_default_and_custom_names() {
        let provider = OpenAiProvider::new(endpoint()).unwrap();
        assert_eq!(provider.provider_name(), "openai");

        let provider = OpenAiProvider::new(endpoint()).unwrap().with_name("ollama");
        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model(), "llama3");
    }
}
