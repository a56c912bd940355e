//! Control Plane (§4.5): the agent's outer loop. Ticks on an interval,
//! registers with the manager, polls for tasks, and serially dispatches
//! each one to the Discovery or Provisioning Engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::discovery::DiscoveryEngine;
use crate::manager_client::{ManagerClient, StatusUpdateRequest};
use crate::model::{AgentIdentity, DiscoveredDevice, ProvisioningResult, ProvisioningTask, TaskStatus, TaskType, UnprovisionedDevice};
use crate::network;
use crate::provisioning::ProvisioningEngine;
use crate::radio_lock::RadioLock;

pub struct Agent {
    manager: ManagerClient,
    discovery: DiscoveryEngine,
    provisioning: ProvisioningEngine,
    identity: AgentIdentity,
    tick_interval: Duration,
    registered: AtomicBool,
    /// Guards a tick's end-to-end work; `try_lock` failing means the
    /// previous tick is still running, so the new one is dropped rather
    /// than queued (§4.5 reentrancy rule).
    busy: tokio::sync::Mutex<()>,
    /// Devices seen by the most recent discovery pass, keyed by MAC, so
    /// a later `provision_device` task can resolve AP-side connection
    /// details without re-scanning.
    known_devices: tokio::sync::Mutex<HashMap<String, UnprovisionedDevice>>,
}

impl Agent {
    pub fn new(config: &AgentConfig, identity: AgentIdentity) -> crate::Result<Self> {
        let network = network::build(config);
        let radio_lock = RadioLock::new();

        let discovery = DiscoveryEngine::new(
            network.clone(),
            radio_lock.clone(),
            config.ssid_patterns.clone(),
            Duration::from_secs(config.device_call_timeout_secs),
        );
        let provisioning = ProvisioningEngine::new(
            network,
            radio_lock,
            Duration::from_secs(config.device_call_timeout_secs),
            Duration::from_secs(config.association_timeout_secs),
            Duration::from_secs(config.disassociation_wait_secs),
        );
        let manager = ManagerClient::new(
            &config.api_url,
            &config.api_key,
            Duration::from_secs(config.manager_call_timeout_secs),
        )?;

        Ok(Self {
            manager,
            discovery,
            provisioning,
            identity,
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            registered: AtomicBool::new(false),
            busy: tokio::sync::Mutex::new(()),
            known_devices: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Runs the ticker loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("shutdown requested, exiting control loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        let _guard = match self.busy.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("previous tick still in flight, skipping this one");
                return;
            }
        };

        if let Err(e) = self.ensure_registered().await {
            tracing::warn!(error = %e, "registration failed, will retry next tick");
            return;
        }

        let tasks = match self.manager.fetch_tasks(&self.identity.id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch tasks from manager");
                return;
            }
        };

        for task in tasks {
            self.dispatch(task).await;
        }
    }

    async fn ensure_registered(&self) -> crate::Result<()> {
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }
        self.manager.register(&self.identity).await?;
        self.registered.store(true, Ordering::Release);
        tracing::info!(agent_id = %self.identity.id, "registered with manager");
        Ok(())
    }

    /// Dispatches one task. Runs to completion before the caller moves
    /// to the next: both engines serialize on the same radio lock, so
    /// concurrent dispatch would only contend for it, not help.
    async fn dispatch(&self, task: ProvisioningTask) {
        match task.task_type {
            TaskType::DiscoverDevices => self.run_discovery_task(&task).await,
            TaskType::ProvisionDevice => self.run_provision_task(&task).await,
        }
    }

    async fn run_discovery_task(&self, task: &ProvisioningTask) {
        match self.discovery.discover().await {
            Ok(devices) => {
                {
                    let mut cache = self.known_devices.lock().await;
                    for device in &devices {
                        cache.insert(device.mac.clone(), device.clone());
                    }
                }

                let reported: Vec<DiscoveredDevice> = devices.iter().map(DiscoveredDevice::from).collect();
                if let Err(e) = self
                    .manager
                    .report_discovered_devices(&task.id, &reported)
                    .await
                {
                    tracing::warn!(error = %e, task_id = %task.id, "failed to report discovered devices");
                }

                self.report_status(&task.id, TaskStatus::Completed, None, None).await;
            }
            Err(e) => {
                self.report_status(&task.id, TaskStatus::Failed, None, Some(e.to_string()))
                    .await;
            }
        }
    }

    async fn run_provision_task(&self, task: &ProvisioningTask) {
        let Some(mac) = task.device_mac.clone() else {
            self.report_status(
                &task.id,
                TaskStatus::Failed,
                None,
                Some("provision_device task is missing device_mac".to_string()),
            )
            .await;
            return;
        };

        let device = { self.known_devices.lock().await.get(&mac).cloned() };
        let Some(device) = device else {
            self.report_status(
                &task.id,
                TaskStatus::Failed,
                None,
                Some("device not known to this agent; run discovery first".to_string()),
            )
            .await;
            return;
        };

        let request = match task.to_provisioning_request() {
            Ok(request) => request,
            Err(e) => {
                self.report_status(&task.id, TaskStatus::Failed, None, Some(e.to_string()))
                    .await;
                return;
            }
        };

        let result = self.provisioning.run(&device, &request).await;
        let status = if result.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let error = result.error.clone();
        self.report_status(&task.id, status, Some(result), error).await;
    }

    async fn report_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<ProvisioningResult>,
        error: Option<String>,
    ) {
        let update = StatusUpdateRequest { status, result, error };
        if let Err(e) = self.manager.update_task_status(task_id, &update).await {
            tracing::warn!(error = %e, task_id, "failed to report task status to manager");
        }
    }
}

/// Builds a [`CancellationToken`] that fires when the process receives
/// SIGINT or (on Unix) SIGTERM, for cooperative shutdown of [`Agent::run`].
pub fn install_shutdown_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT"),
            _ = terminate => tracing::info!("received SIGTERM"),
        }
        handler_token.cancel();
    });

    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskType;
    use std::collections::HashMap as Map;

    fn test_config(api_url: &str) -> AgentConfig {
        AgentConfig {
            api_url: api_url.to_string(),
            api_key: String::new(),
            tick_interval_secs: 1,
            network_interface: crate::config::NetworkInterfaceKind::Mock,
            ssid_patterns: crate::config::default_ssid_patterns(),
            device_call_timeout_secs: 1,
            manager_call_timeout_secs: 1,
            association_timeout_secs: 1,
            disassociation_wait_secs: 1,
        }
    }

    #[tokio::test]
    async fn provision_task_without_known_device_fails_fast() {
        let config = test_config("http://127.0.0.1:1");
        let identity = AgentIdentity::new("host", 1);
        let agent = Agent::new(&config, identity).unwrap();

        let task = ProvisioningTask {
            id: "t-1".into(),
            task_type: TaskType::ProvisionDevice,
            device_mac: Some("aabbccddeeff".into()),
            target_ssid: Some("HomeWiFi".into()),
            config: Map::new(),
        };

        // No panics, no known device: the report call will fail against
        // the unreachable manager, which is fine — this only exercises
        // the not-known-device short-circuit path.
        agent.run_provision_task(&task).await;
        assert!(!agent.registered.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn shutdown_signal_handler_returns_uncancelled_token() {
        let token = install_shutdown_signal_handler();
        assert!(!token.is_cancelled());
    }

    /// Regression test: a discovered device must be cached under the
    /// same lower-case, colon-delimited MAC form a `provision_device`
    /// task's `device_mac` arrives in from the manager (§3, §6), or the
    /// cache lookup in `run_provision_task` never hits.
    #[tokio::test]
    async fn discovered_device_is_cached_under_colon_delimited_mac_for_later_provision_lookup() {
        let mock = std::sync::Arc::new(crate::network::mock::MockNetworkInterface::new());
        mock.set_networks(vec![crate::network::Network {
            ssid: "shelly1-AABBCC".to_string(),
            bssid: "11:22:33:44:55:66".to_string(),
            signal: 80,
            security: "Open".to_string(),
        }])
        .await;
        let network: std::sync::Arc<dyn crate::network::NetworkInterface> = mock;
        let radio_lock = RadioLock::new();

        let discovery = DiscoveryEngine::new(
            network.clone(),
            radio_lock.clone(),
            crate::config::default_ssid_patterns(),
            Duration::from_millis(50),
        );
        let provisioning = ProvisioningEngine::new(
            network,
            radio_lock,
            Duration::from_millis(50),
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        let agent = Agent {
            manager: ManagerClient::new("http://127.0.0.1:1", "", Duration::from_millis(50)).unwrap(),
            discovery,
            provisioning,
            identity: AgentIdentity::new("host", 1),
            tick_interval: Duration::from_secs(1),
            registered: AtomicBool::new(false),
            busy: tokio::sync::Mutex::new(()),
            known_devices: tokio::sync::Mutex::new(HashMap::new()),
        };

        let discover_task = ProvisioningTask {
            id: "t-discover".into(),
            task_type: TaskType::DiscoverDevices,
            device_mac: None,
            target_ssid: None,
            config: Map::new(),
        };
        agent.run_discovery_task(&discover_task).await;

        let cached_mac = agent.known_devices.lock().await.keys().next().cloned();
        assert_eq!(cached_mac.as_deref(), Some("aa:bb:cc"));

        // The exact MAC a manager would send over the wire for this
        // device (§6 example payloads use colon-delimited MACs).
        let device = agent.known_devices.lock().await.get("aa:bb:cc").cloned();
        let device = device.expect("provision_device lookup by colon-delimited MAC must hit the cache");

        let request = crate::model::ProvisioningRequest {
            ssid: "HomeWiFi".into(),
            password: String::new(),
            device_name: String::new(),
            enable_auth: false,
            auth_user: String::new(),
            auth_password: String::new(),
            enable_cloud: false,
            enable_mqtt: false,
            mqtt_server: String::new(),
            timeout_secs: 1,
        };
        // Running the engine at all (rather than short-circuiting with
        // "device not known to this agent") proves the lookup worked —
        // the not-known path never reaches `ProvisioningEngine::run`.
        let result = agent.provisioning.run(&device, &request).await;
        assert!(!result.steps.is_empty());
    }
}
