//! Oracle call envelope
//!
//! Wraps an [`LLMProvider`] with the per-call timeout, the bounded
//! exponential-backoff retry and the extraction of a single JSON object from
//! the model's free text.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{Config, Message, Result, SightlineError};
use crate::llm::traits::{GenerateOptions, LLMProvider};

/// Bounded exponential backoff for retryable oracle failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub attempts: u32,
    /// Delay before the first retry; doubled for every further retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// The decision oracle: prompt and screenshots in, one JSON object out
#[derive(Clone)]
pub struct Oracle {
    provider: Arc<dyn LLMProvider>,
    model: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Oracle {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }

    /// Build an oracle using the timeout and retry settings from configuration
    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &Config) -> Self {
        Self {
            provider,
            model: config.oracle.model.clone(),
            timeout: config.oracle_timeout(),
            retry: RetryPolicy {
                attempts: config.oracle.retry_attempts.max(1),
                base_delay: Duration::from_millis(config.oracle.retry_base_delay_ms),
            },
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the oracle and return the JSON object it answered with
    pub async fn ask(&self, system: &str, user: &str, images: Vec<String>) -> Result<Value> {
        let mut user_message = Message::user(user);
        user_message.images = images;
        let messages = vec![Message::system(system), user_message];
        let options = GenerateOptions {
            temperature: Some(0.1),
            max_tokens: Some(4096),
            json_mode: true,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let call = self
                .provider
                .chat(&self.model, &messages, Some(options.clone()));
            let outcome = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(SightlineError::Timeout(format!(
                    "oracle call exceeded {}s",
                    self.timeout.as_secs()
                ))),
            };

            match outcome {
                Ok(response) => {
                    debug!(
                        provider = self.provider.name(),
                        attempt,
                        chars = response.content.len(),
                        "oracle replied"
                    );
                    return extract_json_object(&response.content);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "oracle call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Pull the single JSON object out of a model reply.
///
/// Code fences and prose around the object are tolerated; anything that is
/// not an object is a protocol error.
pub fn extract_json_object(content: &str) -> Result<Value> {
    let trimmed = content.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let (start, end) = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(SightlineError::protocol(format!(
                "oracle reply contains no JSON object: {}",
                preview(trimmed)
            )))
        }
    };

    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(SightlineError::protocol("oracle reply is not a JSON object")),
        Err(e) => Err(SightlineError::protocol(format!(
            "malformed JSON in oracle reply ({}): {}",
            e,
            preview(trimmed)
        ))),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
