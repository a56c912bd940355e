mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Agent { api_url, api_key, config } => commands::agent::run(api_url, api_key, config).await,
        Command::ScanAp => commands::scan_ap::run().await,
        Command::Provision {
            ssid,
            passphrase,
            name,
            enable_auth,
            auth_user,
            auth_password,
            enable_cloud,
            enable_mqtt,
            mqtt_server,
            timeout,
        } => {
            commands::provision::run(
                ssid,
                passphrase,
                name,
                enable_auth,
                auth_user,
                auth_password,
                enable_cloud,
                enable_mqtt,
                mqtt_server,
                timeout,
            )
            .await
        }
        Command::Status => commands::status::run().await,
    }
}
