use std::process::ExitCode;

use provisioner_core::config::AgentConfig;

/// Prints configuration diagnostics. Always exits 0 (§6).
pub async fn run() -> ExitCode {
    let config = AgentConfig::load(None).await.unwrap_or_default();
    println!("network_interface : {:?}", config.network_interface);
    println!("tick_interval_secs: {}", config.tick_interval_secs);
    println!("ssid_patterns     : {:?}", config.ssid_patterns);
    println!(
        "manager api_url   : {}",
        if config.api_url.is_empty() { "<unset>" } else { &config.api_url }
    );
    println!(
        "device_call_timeout_secs: {}  manager_call_timeout_secs: {}",
        config.device_call_timeout_secs, config.manager_call_timeout_secs
    );
    ExitCode::SUCCESS
}
