//! Provisioning Engine (§4.4): the per-device state machine that
//! drives a Shelly from factory AP to the target Wi-Fi network, with a
//! finally-stage host network restoration that runs on every exit path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::device::{self, DeviceAuth, DeviceClient};
use crate::error::{DeviceError, NetworkError};
use crate::model::{
    synthesize_device_name, HostNetworkContext, ProvisioningRequest, ProvisioningResult,
    ProvisioningStep, StepName, StepStatus, UnprovisionedDevice,
};
use crate::network::NetworkInterface;
use crate::radio_lock::RadioLock;

/// Pluggable post-restore verification pathway (§4.4 state 11, an Open
/// Question in the design: no lookup pathway is specified in the
/// source, so this defaults to always skipping).
#[async_trait]
pub trait DeviceLookup: Send + Sync {
    async fn lookup(&self, mac: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct NoLookup;

#[async_trait]
impl DeviceLookup for NoLookup {
    async fn lookup(&self, _mac: &str) -> Option<String> {
        None
    }
}

pub struct ProvisioningEngine {
    network: Arc<dyn NetworkInterface>,
    radio_lock: RadioLock,
    device_call_timeout: Duration,
    association_timeout: Duration,
    disassociation_wait: Duration,
    lookup: Arc<dyn DeviceLookup>,
}

impl ProvisioningEngine {
    pub fn new(
        network: Arc<dyn NetworkInterface>,
        radio_lock: RadioLock,
        device_call_timeout: Duration,
        association_timeout: Duration,
        disassociation_wait: Duration,
    ) -> Self {
        Self {
            network,
            radio_lock,
            device_call_timeout,
            association_timeout,
            disassociation_wait,
            lookup: Arc::new(NoLookup),
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn DeviceLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Runs the full 11-state machine for one device. The radio lock is
    /// taken here and released only when the returned guard drops,
    /// after `restore_host_network` has run (§5).
    pub async fn run(
        &self,
        device: &UnprovisionedDevice,
        request: &ProvisioningRequest,
    ) -> ProvisioningResult {
        let attempt_started = std::time::Instant::now();
        let mut steps = Vec::new();

        let radio_guard = match self.radio_lock.try_acquire() {
            Ok(guard) => guard,
            Err(_) => {
                return ProvisioningResult {
                    mac: device.mac.clone(),
                    device_name: String::new(),
                    device_ip: String::new(),
                    steps,
                    duration_ms: attempt_started.elapsed().as_millis() as u64,
                    success: false,
                    error: Some("radio lock busy".to_string()),
                };
            }
        };

        let host_ctx = self.capture_host_network(&mut steps).await;

        let deadline = request.effective_timeout();
        let forward = tokio::time::timeout(deadline, self.run_forward(device, request, &mut steps)).await;

        let (device_name, mut device_ip, forward_error) = match forward {
            Ok(outcome) => outcome,
            Err(_elapsed) => (
                default_device_name(device, request),
                String::new(),
                Some("attempt timed out".to_string()),
            ),
        };

        self.restore_host_network(&mut steps, host_ctx.as_ref()).await;

        if let Some(ip) = self.verify_on_target_network(&mut steps, &device.mac).await {
            device_ip = ip;
        }

        drop(radio_guard);

        ProvisioningResult {
            mac: device.mac.clone(),
            device_name,
            device_ip,
            steps,
            duration_ms: attempt_started.elapsed().as_millis() as u64,
            success: forward_error.is_none(),
            error: forward_error,
        }
    }

    async fn capture_host_network(
        &self,
        steps: &mut Vec<ProvisioningStep>,
    ) -> Option<HostNetworkContext> {
        let start = Utc::now();
        match self.network.current_network().await {
            Ok(ssid) => {
                push_step(
                    steps,
                    StepName::CaptureHostNetwork,
                    StepStatus::Success,
                    start,
                    format!("host network is {ssid:?}"),
                    None,
                );
                Some(HostNetworkContext { original_ssid: ssid })
            }
            Err(e) => {
                push_step(
                    steps,
                    StepName::CaptureHostNetwork,
                    StepStatus::Failed,
                    start,
                    "could not determine current host network".to_string(),
                    Some(e.to_string()),
                );
                None
            }
        }
    }

    /// Runs states 2 through 9. Returns the resolved device name, the
    /// device's reported IP if learned along the way, and the terminal
    /// error if forward progress was aborted.
    async fn run_forward(
        &self,
        device: &UnprovisionedDevice,
        request: &ProvisioningRequest,
        steps: &mut Vec<ProvisioningStep>,
    ) -> (String, String, Option<String>) {
        let mut aborted: Option<String> = None;
        let mut client: Option<Arc<dyn DeviceClient>> = None;
        let mut device_name = default_device_name(device, request);
        let device_ip = String::new();

        // 2. connect_to_device_ap
        step_or_skip(steps, &mut aborted, StepName::ConnectToDeviceAp, async {
            self.network
                .connect(&device.ssid, "", self.association_timeout)
                .await
                .map(|()| format!("joined {}", device.ssid))
        })
        .await;

        // 3. probe_device
        if aborted.is_none() {
            let start = Utc::now();
            match self.probe_device(device).await {
                Ok((probed_client, generation)) => {
                    client = Some(probed_client);
                    push_step(
                        steps,
                        StepName::ProbeDevice,
                        StepStatus::Success,
                        start,
                        format!("confirmed generation {generation} at {}", device.ap_ip),
                        None,
                    );
                }
                Err(e) => {
                    push_step(
                        steps,
                        StepName::ProbeDevice,
                        StepStatus::Failed,
                        start,
                        "device did not respond on AP link".to_string(),
                        Some(e.to_string()),
                    );
                    aborted = Some(e.to_string());
                }
            }
        } else {
            push_skipped(steps, StepName::ProbeDevice);
        }

        // 4. configure_identity
        if aborted.is_none() {
            let start = Utc::now();
            let name = if request.device_name.is_empty() {
                synthesize_device_name(&device.mac)
            } else {
                request.device_name.clone()
            };
            let result = self
                .call_with_auth_fallback(
                    &mut client,
                    device,
                    request,
                    |c: Arc<dyn DeviceClient>, name: String| {
                        Box::pin(async move { c.set_name(&name).await })
                            as std::pin::Pin<Box<dyn std::future::Future<Output = crate::Result<()>> + Send>>
                    },
                    name.clone(),
                )
                .await;
            match result {
                Ok(()) => {
                    device_name = name.clone();
                    push_step(
                        steps,
                        StepName::ConfigureIdentity,
                        StepStatus::Success,
                        start,
                        format!("set device name to {name}"),
                        None,
                    );
                }
                Err(e) => {
                    push_step(
                        steps,
                        StepName::ConfigureIdentity,
                        StepStatus::Failed,
                        start,
                        "failed to set device name".to_string(),
                        Some(e.to_string()),
                    );
                    aborted = Some(e.to_string());
                }
            }
        } else {
            push_skipped(steps, StepName::ConfigureIdentity);
        }

        // 5. configure_auth
        if aborted.is_none() {
            if request.enable_auth {
                let start = Utc::now();
                let auth = DeviceAuth {
                    username: request.auth_user.clone(),
                    password: request.auth_password.clone(),
                };
                let result = match &client {
                    Some(c) => c.set_auth(&auth).await,
                    None => Err(DeviceError::DeviceUnreachable("no device client".into()).into()),
                };
                match result {
                    Ok(()) => {
                        push_step(
                            steps,
                            StepName::ConfigureAuth,
                            StepStatus::Success,
                            start,
                            "enabled device authentication".to_string(),
                            None,
                        );
                    }
                    Err(e) => {
                        push_step(
                            steps,
                            StepName::ConfigureAuth,
                            StepStatus::Failed,
                            start,
                            "failed to enable device authentication".to_string(),
                            Some(e.to_string()),
                        );
                        aborted = Some(e.to_string());
                    }
                }
            } else {
                push_skipped(steps, StepName::ConfigureAuth);
            }
        } else {
            push_skipped(steps, StepName::ConfigureAuth);
        }

        // 6. configure_cloud — always runs, even when disabling, to
        // reach a known state.
        if aborted.is_none() {
            let start = Utc::now();
            let enable = request.enable_cloud;
            let result = self
                .call_with_auth_fallback(
                    &mut client,
                    device,
                    request,
                    |c: Arc<dyn DeviceClient>, enable: bool| {
                        Box::pin(async move { c.set_cloud(enable).await })
                            as std::pin::Pin<Box<dyn std::future::Future<Output = crate::Result<()>> + Send>>
                    },
                    enable,
                )
                .await;
            match result {
                Ok(()) => push_step(
                    steps,
                    StepName::ConfigureCloud,
                    StepStatus::Success,
                    start,
                    format!("cloud enabled={enable}"),
                    None,
                ),
                Err(e) => {
                    push_step(
                        steps,
                        StepName::ConfigureCloud,
                        StepStatus::Failed,
                        start,
                        "failed to configure cloud".to_string(),
                        Some(e.to_string()),
                    );
                    aborted = Some(e.to_string());
                }
            }
        } else {
            push_skipped(steps, StepName::ConfigureCloud);
        }

        // 7. configure_mqtt — always runs, even when disabling.
        if aborted.is_none() {
            let start = Utc::now();
            let server = if request.enable_mqtt {
                request.mqtt_server.clone()
            } else {
                String::new()
            };
            let result = self
                .call_with_auth_fallback(
                    &mut client,
                    device,
                    request,
                    |c: Arc<dyn DeviceClient>, server: String| {
                        Box::pin(async move { c.set_mqtt(&server).await })
                            as std::pin::Pin<Box<dyn std::future::Future<Output = crate::Result<()>> + Send>>
                    },
                    server.clone(),
                )
                .await;
            match result {
                Ok(()) => push_step(
                    steps,
                    StepName::ConfigureMqtt,
                    StepStatus::Success,
                    start,
                    format!("mqtt enabled={}", request.enable_mqtt),
                    None,
                ),
                Err(e) => {
                    push_step(
                        steps,
                        StepName::ConfigureMqtt,
                        StepStatus::Failed,
                        start,
                        "failed to configure mqtt".to_string(),
                        Some(e.to_string()),
                    );
                    aborted = Some(e.to_string());
                }
            }
        } else {
            push_skipped(steps, StepName::ConfigureMqtt);
        }

        // 8. apply_wifi — the critical transition.
        let mut apply_wifi_succeeded = false;
        if aborted.is_none() {
            let start = Utc::now();
            let config = device::WifiConfig {
                ssid: request.ssid.clone(),
                password: request.password.clone(),
                static_ip: None,
            };
            let result = self
                .call_with_auth_fallback(
                    &mut client,
                    device,
                    request,
                    |c: Arc<dyn DeviceClient>, config: device::WifiConfig| {
                        Box::pin(async move { c.set_wifi(&config).await })
                            as std::pin::Pin<Box<dyn std::future::Future<Output = crate::Result<()>> + Send>>
                    },
                    config,
                )
                .await;
            match result {
                Ok(()) => {
                    apply_wifi_succeeded = true;
                    push_step(
                        steps,
                        StepName::ApplyWifi,
                        StepStatus::Success,
                        start,
                        format!("instructed device to join {}", request.ssid),
                        None,
                    );
                }
                Err(e) => {
                    push_step(
                        steps,
                        StepName::ApplyWifi,
                        StepStatus::Failed,
                        start,
                        "failed to apply target Wi-Fi credentials".to_string(),
                        Some(e.to_string()),
                    );
                    aborted = Some(e.to_string());
                }
            }
        } else {
            push_skipped(steps, StepName::ApplyWifi);
        }

        // 9. wait_for_disassociation — a failure here is a warning, not
        // a forward-progress-aborting failure (§4.4 failure semantics).
        if aborted.is_none() && apply_wifi_succeeded {
            let start = Utc::now();
            match self.wait_for_ap_to_disappear(&device.ssid).await {
                Ok(()) => push_step(
                    steps,
                    StepName::WaitForDisassociation,
                    StepStatus::Success,
                    start,
                    "device AP is no longer visible".to_string(),
                    None,
                ),
                Err(_) => push_step(
                    steps,
                    StepName::WaitForDisassociation,
                    StepStatus::Failed,
                    start,
                    "AP still visible after wait; device may already be off-AP (non-fatal)".to_string(),
                    Some("disassociation wait timed out".to_string()),
                ),
            }
        } else {
            push_skipped(steps, StepName::WaitForDisassociation);
        }

        (device_name, device_ip, aborted)
    }

    /// Confirms the AP-side IP responds and, when the SSID was
    /// ambiguous (`generation == 0`), tries both dialects to
    /// re-identify the device.
    async fn probe_device(
        &self,
        device: &UnprovisionedDevice,
    ) -> crate::Result<(Arc<dyn DeviceClient>, u8)> {
        if device.generation != 0 {
            let client = device::build(
                device.generation,
                &device.ap_ip,
                None,
                self.device_call_timeout,
                true,
            )?;
            client.get_info().await?;
            return Ok((client, device.generation));
        }

        for generation in [2u8, 1u8] {
            if let Ok(client) =
                device::build(generation, &device.ap_ip, None, self.device_call_timeout, true)
            {
                if client.get_info().await.is_ok() {
                    return Ok((client, generation));
                }
            }
        }
        Err(DeviceError::DeviceUnreachable(device.ap_ip.clone()).into())
    }

    /// Invokes `op` against the current device client; on `AuthRequired`
    /// with request credentials available, rebuilds the client with
    /// auth and retries once (§7 propagation policy).
    async fn call_with_auth_fallback<T, Arg, F>(
        &self,
        client: &mut Option<Arc<dyn DeviceClient>>,
        device: &UnprovisionedDevice,
        request: &ProvisioningRequest,
        op: F,
        arg: Arg,
    ) -> crate::Result<T>
    where
        Arg: Clone,
        F: Fn(Arc<dyn DeviceClient>, Arg) -> std::pin::Pin<Box<dyn std::future::Future<Output = crate::Result<T>> + Send>>,
    {
        let current = client
            .clone()
            .ok_or_else(|| crate::Error::from(DeviceError::DeviceUnreachable("no device client".into())))?;

        match op(current, arg.clone()).await {
            Err(crate::Error::Device(DeviceError::AuthRequired)) if !request.auth_user.is_empty() => {
                let generation = device.generation.max(1);
                let authed = device::build(
                    generation,
                    &device.ap_ip,
                    Some(DeviceAuth {
                        username: request.auth_user.clone(),
                        password: request.auth_password.clone(),
                    }),
                    self.device_call_timeout,
                    true,
                )?;
                *client = Some(authed.clone());
                op(authed, arg).await
            }
            other => other,
        }
    }

    async fn wait_for_ap_to_disappear(&self, ssid: &str) -> crate::Result<()> {
        let deadline = tokio::time::Instant::now() + self.disassociation_wait;
        loop {
            let networks = self.network.scan().await.unwrap_or_default();
            if !networks.iter().any(|n| n.ssid == ssid) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(NetworkError::CommandFailed("AP still present".into()).into());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// State 10: always executed. Reconnects the host to the captured
    /// original network, even if earlier steps failed fatally (§3, §5).
    async fn restore_host_network(
        &self,
        steps: &mut Vec<ProvisioningStep>,
        host_ctx: Option<&HostNetworkContext>,
    ) {
        let start = Utc::now();
        let Some(ctx) = host_ctx else {
            push_step(
                steps,
                StepName::RestoreHostNetwork,
                StepStatus::Skipped,
                start,
                "no host network was captured to restore".to_string(),
                None,
            );
            return;
        };

        if ctx.original_ssid.is_empty() {
            push_step(
                steps,
                StepName::RestoreHostNetwork,
                StepStatus::Skipped,
                start,
                "host had no prior network association".to_string(),
                None,
            );
            return;
        }

        match self
            .network
            .connect(&ctx.original_ssid, "", self.association_timeout)
            .await
        {
            Ok(()) => push_step(
                steps,
                StepName::RestoreHostNetwork,
                StepStatus::Success,
                start,
                format!("restored host to {}", ctx.original_ssid),
                None,
            ),
            Err(e) => push_step(
                steps,
                StepName::RestoreHostNetwork,
                StepStatus::Failed,
                start,
                format!("failed to restore host to {}", ctx.original_ssid),
                Some(e.to_string()),
            ),
        }
    }

    /// State 11: pluggable, defaults to skipped (§4.4, §9 Open Question).
    async fn verify_on_target_network(
        &self,
        steps: &mut Vec<ProvisioningStep>,
        mac: &str,
    ) -> Option<String> {
        let start = Utc::now();
        match self.lookup.lookup(mac).await {
            Some(ip) => {
                push_step(
                    steps,
                    StepName::VerifyOnTargetNetwork,
                    StepStatus::Success,
                    start,
                    format!("resolved device at {ip}"),
                    None,
                );
                Some(ip)
            }
            None => {
                push_step(
                    steps,
                    StepName::VerifyOnTargetNetwork,
                    StepStatus::Skipped,
                    start,
                    "no device lookup pathway configured".to_string(),
                    None,
                );
                None
            }
        }
    }
}

fn default_device_name(device: &UnprovisionedDevice, request: &ProvisioningRequest) -> String {
    if request.device_name.is_empty() {
        synthesize_device_name(&device.mac)
    } else {
        request.device_name.clone()
    }
}

fn push_step(
    steps: &mut Vec<ProvisioningStep>,
    name: StepName,
    status: StepStatus,
    start: DateTime<Utc>,
    detail: String,
    error: Option<String>,
) {
    steps.push(ProvisioningStep {
        name,
        status,
        start,
        end: Utc::now(),
        detail,
        error,
    });
}

fn push_skipped(steps: &mut Vec<ProvisioningStep>, name: StepName) {
    let now = Utc::now();
    steps.push(ProvisioningStep {
        name,
        status: StepStatus::Skipped,
        start: now,
        end: now,
        detail: "skipped after an earlier step aborted forward progress".to_string(),
        error: None,
    });
}

/// Executes one forward step, recording success/failure and setting
/// `aborted` on failure; if already aborted, records a `Skipped` step
/// instead of running `fut`.
async fn step_or_skip<Fut>(
    steps: &mut Vec<ProvisioningStep>,
    aborted: &mut Option<String>,
    name: StepName,
    fut: Fut,
) where
    Fut: std::future::Future<Output = crate::Result<String>>,
{
    if aborted.is_some() {
        push_skipped(steps, name);
        return;
    }
    let start = Utc::now();
    match fut.await {
        Ok(detail) => push_step(steps, name, StepStatus::Success, start, detail, None),
        Err(e) => {
            push_step(
                steps,
                name,
                StepStatus::Failed,
                start,
                "step failed".to_string(),
                Some(e.to_string()),
            );
            *aborted = Some(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::MockNetworkInterface;

    fn base_request(ssid: &str) -> ProvisioningRequest {
        ProvisioningRequest {
            ssid: ssid.to_string(),
            password: String::new(),
            device_name: String::new(),
            enable_auth: false,
            auth_user: String::new(),
            auth_password: String::new(),
            enable_cloud: false,
            enable_mqtt: false,
            mqtt_server: String::new(),
            timeout_secs: 5,
        }
    }

    fn device(ssid: &str) -> UnprovisionedDevice {
        UnprovisionedDevice {
            mac: "aabbccddeeff".into(),
            ssid: ssid.to_string(),
            model: "shelly1".into(),
            generation: 1,
            ap_ip: "192.168.33.1".into(),
            signal: 90,
            discovered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn association_failure_skips_to_restore() {
        let network = Arc::new(MockNetworkInterface::new());
        network.set_current("HomeWiFi").await;
        let engine = ProvisioningEngine::new(
            network.clone(),
            RadioLock::new(),
            Duration::from_secs(1),
            Duration::from_millis(200),
            Duration::from_millis(200),
        );

        let dev = device("shelly1-NOTFOUND");
        let result = engine.run(&dev, &base_request("HomeWiFi")).await;

        assert!(!result.success);
        let restore = result
            .steps
            .iter()
            .find(|s| s.name == StepName::RestoreHostNetwork)
            .expect("restore step present");
        assert_eq!(restore.status, StepStatus::Success);

        let probe = result
            .steps
            .iter()
            .find(|s| s.name == StepName::ProbeDevice)
            .expect("probe step present");
        assert_eq!(probe.status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn radio_busy_fails_fast_without_touching_network() {
        let network = Arc::new(MockNetworkInterface::new());
        let radio_lock = RadioLock::new();
        let held = radio_lock.try_acquire().unwrap();

        let engine = ProvisioningEngine::new(
            network,
            radio_lock,
            Duration::from_secs(1),
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        let dev = device("shelly1-DDEEFF");
        let result = engine.run(&dev, &base_request("HomeWiFi")).await;

        assert!(!result.success);
        assert!(result.steps.is_empty());
        assert_eq!(result.error.as_deref(), Some("radio lock busy"));
        drop(held);
    }
}
