//! OpenAI-compatible provider
//!
//! Talks to any `/chat/completions` endpoint (OpenAI, OpenRouter, vLLM, ...).

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::core::{Config, Message, Result, SightlineError};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.oracle_timeout())
            .build()
            .map_err(|e| SightlineError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.oracle.base_url.trim_end_matches('/').to_string(),
            api_key: config.oracle.api_key.clone(),
        })
    }

    fn build_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| {
                if msg.images.is_empty() {
                    return serde_json::json!({
                        "role": msg.role,
                        "content": msg.content
                    });
                }

                let mut parts = vec![serde_json::json!({
                    "type": "text",
                    "text": msg.content
                })];
                for img in &msg.images {
                    parts.push(serde_json::json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:image/png;base64,{}", img)
                        }
                    }));
                }

                serde_json::json!({
                    "role": msg.role,
                    "content": parts
                })
            })
            .collect()
    }
}

/// Read a `chat/completions` body. A body without message content is a
/// protocol error, not something a retry fixes.
fn parse_completion(text: &str, model: &str) -> Result<LLMResponse> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| SightlineError::protocol(format!("Unreadable completion body: {}", e)))?;
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| SightlineError::protocol("Response has no message content"))?
        .to_string();

    let usage = json.get("usage").map(|u| TokenUsage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
    });

    Ok(LLMResponse {
        content,
        usage,
        model: json["model"].as_str().unwrap_or(model).to_string(),
    })
}

#[async_trait]
impl LLMProvider for OpenAiCompatibleProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        let options = options.unwrap_or_default();
        let mut body = serde_json::json!({
            "model": model,
            "messages": Self::build_messages(messages),
            "max_tokens": options.max_tokens.unwrap_or(4096),
            "temperature": options.temperature.unwrap_or(0.1),
        });
        if options.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        debug!(model, messages = messages.len(), "chat/completions request");

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SightlineError::OracleStatus { status, body });
        }

        let text = response.text().await?;
        parse_completion(&text, model)
    }

    fn name(&self) -> &str {
        "openai_compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_simple() {
        let built = OpenAiCompatibleProvider::build_messages(&[Message::user("Hello")]);
        assert_eq!(built.len(), 1);
        assert_eq!(built[0]["role"], "user");
        assert_eq!(built[0]["content"], "Hello");
    }

    #[test]
    fn test_build_messages_with_images() {
        let msg = Message::user("What's on screen?").with_image("base64imagedata");
        let built = OpenAiCompatibleProvider::build_messages(&[msg]);

        let content = built[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_completion_without_content_is_not_retried() {
        let err = parse_completion(r#"{"choices":[{"message":{"role":"assistant"}}]}"#, "gpt-4o")
            .unwrap_err();
        assert!(matches!(err, SightlineError::Protocol(_)));
        assert!(!err.is_retryable());
        assert!(!parse_completion("not json", "gpt-4o").unwrap_err().is_retryable());
    }

    #[test]
    fn test_completion_usage_and_model_fallback() {
        let response = parse_completion(
            r#"{"choices":[{"message":{"content":"{}"}}],"usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12}}"#,
            "gpt-4o",
        )
        .unwrap();
        assert_eq!(response.content, "{}");
        assert_eq!(response.model, "gpt-4o");
        assert_eq!(response.usage.unwrap().total_tokens, 12);
    }
}
