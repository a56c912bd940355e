use std::process::ExitCode;
use std::time::Duration;

use provisioner_core::config::AgentConfig;
use provisioner_core::discovery::DiscoveryEngine;
use provisioner_core::model::{ProvisioningRequest, ProvisioningResult};
use provisioner_core::network;
use provisioner_core::provisioning::ProvisioningEngine;
use provisioner_core::radio_lock::RadioLock;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    ssid: String,
    passphrase: Option<String>,
    name: Option<String>,
    enable_auth: bool,
    auth_user: Option<String>,
    auth_password: Option<String>,
    enable_cloud: bool,
    enable_mqtt: bool,
    mqtt_server: Option<String>,
    timeout: Option<u64>,
) -> ExitCode {
    let config = AgentConfig::load(None).await.unwrap_or_default();
    let iface = network::build(&config);
    let radio_lock = RadioLock::new();

    let discovery = DiscoveryEngine::new(
        iface.clone(),
        radio_lock.clone(),
        config.ssid_patterns.clone(),
        Duration::from_secs(config.device_call_timeout_secs),
    );
    let provisioning = ProvisioningEngine::new(
        iface,
        radio_lock,
        Duration::from_secs(config.device_call_timeout_secs),
        Duration::from_secs(config.association_timeout_secs),
        Duration::from_secs(config.disassociation_wait_secs),
    );

    let devices = match discovery.discover().await {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("discovery failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if devices.is_empty() {
        println!("no unprovisioned devices found");
        return ExitCode::SUCCESS;
    }

    let request = ProvisioningRequest {
        ssid,
        password: passphrase.unwrap_or_default(),
        device_name: name.unwrap_or_default(),
        enable_auth,
        auth_user: auth_user.unwrap_or_default(),
        auth_password: auth_password.unwrap_or_default(),
        enable_cloud,
        enable_mqtt,
        mqtt_server: mqtt_server.unwrap_or_default(),
        timeout_secs: timeout.unwrap_or(0),
    };

    let mut failures: u8 = 0;
    for device in &devices {
        let result = provisioning.run(device, &request).await;
        print_result(&result);
        if !result.success {
            failures = failures.saturating_add(1);
        }
    }
    ExitCode::from(failures)
}

fn print_result(result: &ProvisioningResult) {
    println!(
        "{} ({}): success={} duration_ms={}",
        result.mac, result.device_name, result.success, result.duration_ms
    );
    for step in &result.steps {
        println!("  {:?} {:?} — {}", step.name, step.status, step.detail);
    }
    if let Some(err) = &result.error {
        println!("  error: {err}");
    }
}
