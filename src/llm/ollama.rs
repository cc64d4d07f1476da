//! Ollama backend for the oracle
//!
//! Talks to `/api/chat` without streaming. Screenshots ride along in each
//! message's `images` list and JSON mode maps onto Ollama's `format` field.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{Config, Message, Result, SightlineError};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Sampling::is_unset")]
    options: Sampling,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "no_images")]
    images: &'a [String],
}

fn no_images(images: &&[String]) -> bool {
    images.is_empty()
}

#[derive(Debug, Default, Serialize)]
struct Sampling {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl Sampling {
    fn is_unset(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    model: String,
    message: ReplyMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

impl ChatReply {
    fn into_response(self) -> LLMResponse {
        let usage = self
            .prompt_eval_count
            .zip(self.eval_count)
            .map(|(prompt, completion)| TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            });
        LLMResponse {
            content: self.message.content,
            usage,
            model: self.model,
        }
    }
}

fn parse_reply(text: &str) -> Result<LLMResponse> {
    let reply: ChatReply = serde_json::from_str(text)
        .map_err(|e| SightlineError::protocol(format!("Unreadable Ollama reply: {}", e)))?;
    Ok(reply.into_response())
}

fn body<'a>(model: &'a str, messages: &'a [Message], options: &GenerateOptions) -> ChatBody<'a> {
    ChatBody {
        model,
        messages: messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
                images: &m.images,
            })
            .collect(),
        stream: false,
        format: options.json_mode.then_some("json"),
        options: Sampling {
            temperature: options.temperature,
            num_predict: options.max_tokens,
        },
    }
}

impl OllamaClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.oracle.base_url, config.oracle_timeout())
    }

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SightlineError::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn unreachable(&self, err: reqwest::Error) -> SightlineError {
        if err.is_connect() {
            SightlineError::oracle(format!(
                "Cannot reach Ollama at {}; start it with `ollama serve`",
                self.base_url
            ))
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        let options = options.unwrap_or_default();
        let images: usize = messages.iter().map(|m| m.images.len()).sum();
        debug!(model, messages = messages.len(), images, "ollama request");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body(model, messages, &options))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        let status = response.status();
        let text = response.text().await?;
        if status == StatusCode::NOT_FOUND && text.contains("not found") {
            return Err(SightlineError::ModelNotFound(model.to_string()));
        }
        if !status.is_success() {
            return Err(SightlineError::OracleStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_reply(&text)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_is_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_body_carries_screenshots_and_json_format() {
        let messages = vec![
            Message::system("rules"),
            Message::user("what now?").with_image("iVBOR"),
        ];
        let options = GenerateOptions {
            json_mode: true,
            ..Default::default()
        };
        let value = serde_json::to_value(body("llava", &messages, &options)).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
        assert!(value.get("options").is_none());
        assert!(value["messages"][0].get("images").is_none());
        assert_eq!(value["messages"][1]["images"], json!(["iVBOR"]));
    }

    #[test]
    fn test_reply_usage() {
        let reply: ChatReply = serde_json::from_value(json!({
            "model": "llava",
            "message": { "role": "assistant", "content": "{\"stepCompleted\":true}" },
            "prompt_eval_count": 900,
            "eval_count": 12
        }))
        .unwrap();
        let response = reply.into_response();
        assert_eq!(response.usage.unwrap().total_tokens, 912);
        assert_eq!(response.content, "{\"stepCompleted\":true}");
    }

    #[test]
    fn test_garbled_reply_is_not_retried() {
        let err = parse_reply("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, SightlineError::Protocol(_)));
        assert!(!err.is_retryable());

        let response = parse_reply(r#"{"model":"llava","message":{"content":"{}"}}"#).unwrap();
        assert_eq!(response.content, "{}");
        assert!(response.usage.is_none());
    }
}
