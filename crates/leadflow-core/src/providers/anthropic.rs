//! Anthropic Messages API backend

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completion, Endpoint, LlmProvider, decode_reply, http_client};

const API_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicProvider {
    client: Client,
    endpoint: Endpoint,
}

impl AnthropicProvider {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint,
        })
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserTurn<'a>; 1],
}

#[derive(Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

/// Only text blocks carry the verdict; thinking or tool blocks are skipped
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ReplyUsage {
    output_tokens: u32,
}

impl MessagesReply {
    fn into_completion(self) -> Completion {
        let text = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        Completion {
            text,
            output_tokens: self.usage.map(|u| u.output_tokens),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
        let request = MessagesRequest {
            model: &self.endpoint.model,
            max_tokens: self.endpoint.max_tokens,
            system,
            messages: [UserTurn {
                role: "user",
                content: prompt,
            }],
        };
        debug!("Anthropic classify call on {}", self.endpoint.model);

        let response = self
            .client
            .post(self.endpoint.url("/v1/messages"))
            .header("x-api-key", &self.endpoint.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;
        let reply: MessagesReply = decode_reply(self.provider_name(), response).await?;
        Ok(reply.into_completion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let request = MessagesRequest {
            model: "claude-sonnet-4-5",
            max_tokens: 256,
            system: "classify",
            messages: [UserTurn {
                role: "user",
                content: "need it today",
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["system"], "classify");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "need it today");
    }

    #[test]
    fn test_reply_keeps_only_text_blocks() {
        let reply: MessagesReply = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "{\"heat\":"},
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "\"HOT\"}"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();
        let completion = reply.into_completion();
        assert_eq!(completion.text, "{\"heat\":\n\"HOT\"}");
        assert_eq!(completion.output_tokens, Some(5));
    }

    #[test]
    fn test_provider_reports_model() {
        let provider = AnthropicProvider::new(Endpoint::new(
            "sk-secret",
            "claude-sonnet-4-5",
            "https://api.anthropic.com/",
            512,
        ))
        .unwrap();
        assert_eq!(provider.provider_name(), "anthropic");
        assert_eq!(provider.model(), "claude-sonnet-4-5");
        assert!(!format!("{:?}", provider).contains("sk-secret"));
    }
}
