//! Sightline - AI-directed browser test steps
//!
//! Lets a browser test describe a step in natural language. Each round the
//! page's interactive elements are marked with numbered labels, a vision
//! model (the oracle) picks commands against those markers, and the commands
//! run through a cascade of selectors with recovery heuristics and a
//! coordinate fallback.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **LLM**: Oracle providers, retry envelope and JSON extraction
//! - **Browser**: Page driver seam and the agent-browser driver
//! - **SoM**: Annotation, selector synthesis, reconciliation, execution and verification
//! - **Agent**: The act/verify/extract state machine
//! - **CLI**: Subcommand handlers
//!
//! # Usage
//!
//! ```rust,no_run
//! use sightline::agent::{Agent, RecordingHost, TestContext};
//! use sightline::browser::AgentBrowserDriver;
//! use sightline::Config;
//!
//! #[tokio::main]
//! async fn main() -> sightline::Result<()> {
//!     let config = Config::load();
//!     let driver = AgentBrowserDriver::from_config(&config);
//!     let host = RecordingHost::new();
//!     let agent = Agent::from_config(config)?;
//!
//!     let ctx = TestContext::new(&driver, &host);
//!     agent.act("add the first product to the cart", &ctx).await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod browser;
pub mod cli;
pub mod core;
pub mod llm;
pub mod som;

// Re-export commonly used items
pub use agent::Agent;
pub use core::{Config, Result, SightlineError};
