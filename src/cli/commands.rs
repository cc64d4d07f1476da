//! CLI subcommands
//!
//! Each handler wires the agent-browser driver, the configured oracle and a
//! [`RecordingHost`] together, runs one agent operation and prints the result.

use std::time::Duration;

use clap::Subcommand;
use url::Url;

use crate::agent::{
    Agent, ExtractOptions, Extracted, RecordingHost, ReturnType, TestContext, VerifyOptions,
};
use crate::browser::{AgentBrowserDriver, Navigation, PageDriver};
use crate::core::{Config, Result, SightlineError};

/// Subcommands of the `sightline` binary
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Carry out a natural-language objective on the current page
    Act {
        objective: String,
    },
    /// Check a requirement against the current page
    Verify {
        requirement: String,
        /// Minimum oracle confidence (0-100)
        #[arg(long)]
        threshold: Option<u8>,
    },
    /// Pull data off the current page
    Extract {
        requirement: String,
        #[arg(long, value_enum, default_value_t = ReturnType::String)]
        return_type: ReturnType,
    },
    /// Mark the interactive elements and print the marker list
    Annotate,
    /// Show or write the configuration file
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Navigate the session to `url` before running a command
async fn open(driver: &dyn PageDriver, url: &str, config: &Config) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|e| SightlineError::config(format!("invalid url '{}': {}", url, e)))?;
    driver
        .navigate(&Navigation::Goto(parsed.to_string()), config.navigation_timeout())
        .await?;
    Ok(())
}

fn print_failed_assertions(host: &RecordingHost) -> bool {
    let failures = host.failures();
    for failure in &failures {
        eprintln!("✗ {}", failure.message);
    }
    failures.is_empty()
}

/// Run a subcommand. Returns whether it succeeded.
pub async fn run(command: Command, config: Config, url: Option<String>) -> Result<bool> {
    if let Command::Config { save } = command {
        return show_config(&config, save);
    }

    if !AgentBrowserDriver::is_available().await {
        return Err(SightlineError::AgentBrowserNotFound);
    }
    let driver = AgentBrowserDriver::from_config(&config);
    if let Some(url) = url.as_deref() {
        open(&driver, url, &config).await?;
    }

    let host = RecordingHost::new();
    let ctx = TestContext::new(&driver, &host);
    let agent = Agent::from_config(config)?;

    match command {
        Command::Act { objective } => {
            let result = agent.act(&objective, &ctx).await?;
            for (i, step) in result.results.iter().enumerate() {
                let winning = step
                    .winning()
                    .map(|a| a.selector.as_str())
                    .unwrap_or("-");
                println!("{:>2}. {:?} via {}", i + 1, step.command.action, winning);
            }
            println!(
                "✓ {} ({} commands, {} rounds)",
                result.objective,
                result.results.len(),
                result.rounds
            );
            Ok(true)
        }
        Command::Verify {
            requirement,
            threshold,
        } => {
            let result = agent
                .verify(&requirement, &ctx, VerifyOptions { threshold })
                .await?;
            println!(
                "{} {} (confidence {})",
                if result.success { "✓" } else { "✗" },
                requirement,
                result.confidence
            );
            if let Some(reason) = &result.reason {
                println!("  {}", reason);
            }
            Ok(print_failed_assertions(&host) && result.success)
        }
        Command::Extract {
            requirement,
            return_type,
        } => {
            let extracted = agent
                .extract(&requirement, &ctx, ExtractOptions { return_type })
                .await?;
            match extracted {
                Extracted::Text(text) => println!("{}", text),
                other => println!("{}", serde_json::to_string(&other)?),
            }
            Ok(true)
        }
        Command::Annotate => {
            let markers = agent.annotate(&ctx).await?;
            println!("{}", markers.format_for_prompt());
            println!("\n{} elements marked", markers.len());
            Ok(true)
        }
        Command::Config { .. } => Ok(true),
    }
}

fn show_config(config: &Config, save: bool) -> Result<bool> {
    if save {
        let path = config.save()?;
        println!("Configuration written to {}", path.display());
    } else {
        println!("# {}", Config::config_file().display());
        println!(
            "{}",
            toml::to_string_pretty(config)
                .map_err(|e| SightlineError::config(format!("Failed to serialize config: {}", e)))?
        );
    }
    Ok(true)
}

/// Timeout applied to a whole CLI invocation, generous enough for long objectives
pub fn invocation_timeout(config: &Config) -> Duration {
    config.host_timeout_extension() + config.oracle_timeout() * 2
}
