use std::path::PathBuf;
use std::process::ExitCode;

use provisioner_core::config::AgentConfig;
use provisioner_core::control_plane::{self, Agent};
use provisioner_core::model::AgentIdentity;

/// Runs the long-lived control-plane loop (§4.5). Returns 0 on a clean
/// shutdown (SIGINT/SIGTERM), 1 if the agent could not start.
pub async fn run(api_url: Option<String>, api_key: Option<String>, config_path: Option<PathBuf>) -> ExitCode {
    let mut config = match AgentConfig::load(config_path.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load agent configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(v) = api_url {
        config.api_url = v;
    }
    if let Some(v) = api_key {
        config.api_key = v;
    }

    let identity = AgentIdentity::new(&hostname(), std::process::id());
    tracing::info!(agent_id = %identity.id, api_url = %config.api_url, "starting agent");

    let agent = match Agent::new(&config, identity) {
        Ok(agent) => agent,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize agent");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = control_plane::install_shutdown_signal_handler();
    agent.run(shutdown).await;
    ExitCode::SUCCESS
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}
