mod agent;
mod agent_paths;
mod backend;
mod config;
mod identity;
mod logging;
mod protocol;
mod rpc;
mod session;

use agent::shutdown::{install_signal_handlers, ShutdownFlag};
use agent::ExitReason;
use anyhow::{Context, Result};
use backend::BackendClient;
use clap::Parser;
use config::AgentConfig;
use identity::Identity;
use std::path::PathBuf;

pub const BUILD_SHA: &str = env!("NETCONF_AGENT_GIT_SHA");

#[derive(Parser)]
#[command(name = "netconf-agent")]
#[command(about = "Per-connection management protocol agent, started by the transport server")]
#[command(version)]
struct Cli {
    /// YAML configuration file (defaults to ~/.netconf-agent/config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(reason) => {
            tracing::info!(?reason, "Agent exiting");
            0
        }
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Agent failed");
            eprintln!("[netconf-agent] Error: {:#}", e);
            1
        }
    };

    // Stdin is read on a blocking thread that cannot be cancelled, and a
    // detached notification task may still hold the session.
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<ExitReason> {
    let config = AgentConfig::load(cli.config.as_deref())?;
    let log_path = logging::init(&config.log_level);

    let session_id = std::process::id();
    tracing::info!(
        build = BUILD_SHA,
        session_id,
        log = ?log_path,
        "Agent starting"
    );

    let shutdown = ShutdownFlag::new();
    install_signal_handlers(shutdown.clone()).context("Failed to install signal handlers")?;

    let identity = Identity::from_env(&config.identity_env)?;

    let backend = BackendClient::connect(&config, session_id).await?;

    agent::run(
        &config,
        &identity,
        session_id,
        backend,
        tokio::io::stdin(),
        tokio::io::stdout(),
        shutdown,
    )
    .await
}
