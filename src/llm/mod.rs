//! LLM module - decision oracle integrations
//!
//! Provides the provider abstraction, the Ollama and OpenAI-compatible
//! backends, and the retrying [`Oracle`] envelope the orchestrator talks to.

pub mod ollama;
pub mod oracle;
pub mod provider;
pub mod traits;

pub use ollama::OllamaClient;
pub use oracle::{extract_json_object, Oracle, RetryPolicy};
pub use provider::create_provider;
pub use traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};
