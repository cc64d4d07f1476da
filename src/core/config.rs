//! Configuration management for Sightline
//!
//! Supports environment variables, config files, and runtime overrides.
//!
//! Config file location: ~/.config/sightline/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::{Result, SightlineError};

/// Main configuration for Sightline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Decision oracle configuration
    pub oracle: OracleConfig,
    /// Browser configuration
    pub browser: BrowserConfig,
    /// Agent behavior configuration
    pub agent: AgentConfig,
}

/// Which oracle backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Local Ollama server
    Ollama,
    /// Any `/chat/completions` endpoint (OpenAI, OpenRouter, vLLM, ...)
    OpenAiCompatible,
}

/// Decision oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Provider backend
    pub provider: ProviderType,
    /// Base URL of the provider API
    pub base_url: String,
    /// API key (not needed for Ollama)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Vision-capable model name
    pub model: String,
    /// Overall timeout for one oracle call in seconds
    pub timeout_secs: u64,
    /// Attempts in the retry envelope (including the first)
    pub retry_attempts: u32,
    /// First backoff delay in milliseconds, doubled on every retry
    pub retry_base_delay_ms: u64,
}

/// Browser automation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Session name for agent-browser
    pub session_name: String,
    /// Whether to run in headed mode (visible browser)
    pub headed: bool,
    /// Default timeout for a single DOM action in ms
    pub action_timeout_ms: u64,
    /// Default timeout for navigation actions in ms
    pub navigation_timeout_ms: u64,
}

/// Agent behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Whether to show debug output
    pub debug: bool,
    /// Bound shared by the wait counter and the pre-action retry counter
    pub max_wait_retries: u32,
    /// Minimum oracle confidence for verify() to pass
    pub confidence_threshold: u8,
    /// Extra time requested from the host test before long objectives, in seconds
    pub host_timeout_extension_secs: u64,
    /// Draw a transient dot where coordinate commands land
    pub debug_markers: bool,
    /// Mark elements below the fold
    pub include_offscreen: bool,
    /// Mark disabled elements
    pub include_disabled: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let provider = match env::var("SIGHTLINE_PROVIDER").as_deref() {
            Ok("openai") | Ok("openai_compatible") | Ok("openrouter") => {
                ProviderType::OpenAiCompatible
            }
            _ => ProviderType::Ollama,
        };
        let default_url = match provider {
            ProviderType::Ollama => {
                let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
                let port = env::var("OLLAMA_PORT").unwrap_or_else(|_| "11434".to_string());
                format!("http://{}:{}", host, port)
            }
            ProviderType::OpenAiCompatible => "https://api.openai.com/v1".to_string(),
        };
        Self {
            provider,
            base_url: env::var("SIGHTLINE_ORACLE_URL").unwrap_or(default_url),
            api_key: env::var("SIGHTLINE_API_KEY").ok(),
            model: env::var("SIGHTLINE_MODEL").unwrap_or_else(|_| "qwen2.5vl:7b".to_string()),
            timeout_secs: env_number("SIGHTLINE_ORACLE_TIMEOUT_SECS").unwrap_or(120),
            retry_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            session_name: env::var("SIGHTLINE_BROWSER_SESSION")
                .unwrap_or_else(|_| "sightline".to_string()),
            headed: env_flag("SIGHTLINE_BROWSER_HEADED").unwrap_or(false),
            action_timeout_ms: env_number("SIGHTLINE_ACTION_TIMEOUT_MS").unwrap_or(4_000),
            navigation_timeout_ms: env_number("SIGHTLINE_NAVIGATION_TIMEOUT_MS").unwrap_or(15_000),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            debug: env_flag("SIGHTLINE_DEBUG").unwrap_or(false),
            max_wait_retries: env_number("SIGHTLINE_MAX_WAIT_RETRIES").unwrap_or(5),
            confidence_threshold: 70,
            host_timeout_extension_secs: env_number("SIGHTLINE_HOST_TIMEOUT_SECS").unwrap_or(120),
            debug_markers: false,
            include_offscreen: false,
            include_disabled: false,
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| v == "true" || v == "1")
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sightline")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > config file > env vars > defaults
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        if let Ok(config) = Self::load_from_file() {
            return config;
        }

        Self::default()
    }

    /// Load configuration from file only
    pub fn load_from_file() -> Result<Self> {
        let config_path = Self::config_file();

        if !config_path.exists() {
            return Err(SightlineError::config("Config file not found"));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| SightlineError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SightlineError::config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_file();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| {
                SightlineError::config(format!("Failed to create config dir: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SightlineError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, content)
            .map_err(|e| SightlineError::config(format!("Failed to write config: {}", e)))?;

        Ok(config_path)
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }

    /// Oracle call timeout
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle.timeout_secs)
    }

    /// Default per-action timeout
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.browser.action_timeout_ms)
    }

    /// Default navigation timeout
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.browser.navigation_timeout_ms)
    }

    /// Desired host timeout extension
    pub fn host_timeout_extension(&self) -> Duration {
        Duration::from_secs(self.agent.host_timeout_extension_secs)
    }
}
