//! CLI surface (§6): one subcommand per verb, flags named to match.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "provisioner-agent", version, about = "Shelly fleet Wi-Fi provisioning agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the long-lived control-plane loop: register, poll, dispatch, report.
    Agent {
        #[arg(long, env = "SHELLY_API_URL")]
        api_url: Option<String>,
        #[arg(long, env = "SHELLY_API_KEY")]
        api_key: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Scan for unprovisioned devices in AP mode and print what was found.
    ScanAp,
    /// Discover and provision every unprovisioned device onto one target network.
    Provision {
        ssid: String,
        passphrase: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        enable_auth: bool,
        #[arg(long)]
        auth_user: Option<String>,
        #[arg(long)]
        auth_password: Option<String>,
        #[arg(long)]
        enable_cloud: bool,
        #[arg(long)]
        enable_mqtt: bool,
        #[arg(long)]
        mqtt_server: Option<String>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print agent configuration diagnostics.
    Status,
}
