use std::process::ExitCode;
use std::time::Duration;

use provisioner_core::config::AgentConfig;
use provisioner_core::discovery::DiscoveryEngine;
use provisioner_core::network;
use provisioner_core::radio_lock::RadioLock;

/// Scans for unprovisioned devices once and prints what was found.
/// Zero devices is still a success (§6); only a radio/scan failure
/// exits non-zero.
pub async fn run() -> ExitCode {
    let config = AgentConfig::load(None).await.unwrap_or_default();
    let iface = network::build(&config);
    let engine = DiscoveryEngine::new(
        iface,
        RadioLock::new(),
        config.ssid_patterns.clone(),
        Duration::from_secs(config.device_call_timeout_secs),
    );

    match engine.discover().await {
        Ok(devices) if devices.is_empty() => {
            println!("no unprovisioned devices found");
            ExitCode::SUCCESS
        }
        Ok(devices) => {
            for device in &devices {
                println!(
                    "{}  {}  gen{}  {}  signal={}%",
                    device.mac, device.ssid, device.generation, device.ap_ip, device.signal
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("scan failed: {e}");
            ExitCode::FAILURE
        }
    }
}
