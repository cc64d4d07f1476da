//! Sightline - AI-directed browser test steps
//!
//! Main entry point for the CLI application.

use clap::Parser;
use sightline::cli::{self, Command};
use sightline::Config;
use tracing::Level;

/// Sightline - AI-directed browser test steps
#[derive(Parser, Debug)]
#[command(name = "sightline")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Oracle model
    #[arg(long, short = 'm', global = true)]
    model: Option<String>,

    /// Navigate to this URL before running the command
    #[arg(long, short = 'u', global = true)]
    url: Option<String>,

    /// agent-browser session name
    #[arg(long, global = true)]
    session: Option<String>,

    /// Enable debug output
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Run in headed browser mode (visible window)
    #[arg(long, global = true)]
    headed: bool,

    /// Draw a dot where coordinate commands land
    #[arg(long, global = true)]
    debug_markers: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Build configuration
    let mut config = Config::load();

    // Apply CLI overrides
    if let Some(ref model) = args.model {
        config.oracle.model = model.clone();
    }

    if let Some(ref session) = args.session {
        config.browser.session_name = session.clone();
    }

    if args.debug {
        config.agent.debug = true;
    }

    if args.headed {
        config.browser.headed = true;
    }

    if args.debug_markers {
        config.agent.debug_markers = true;
    }

    tracing_subscriber::fmt()
        .with_max_level(if config.agent.debug {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let limit = cli::commands::invocation_timeout(&config);
    let succeeded = tokio::time::timeout(limit, cli::run(args.command, config, args.url))
        .await
        .map_err(|_| anyhow::anyhow!("gave up after {}s", limit.as_secs()))??;

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
