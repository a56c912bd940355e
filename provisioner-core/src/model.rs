//! Core data model (§3).
//!
//! Types here are plain data: constructed by the components that own
//! them, read by whatever logically follows, never mutated in place
//! once built (`ProvisioningStep`/`ProvisioningResult` are the
//! exception — they are appended to and finalized during one attempt).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A device observed in AP mode, materialized by the Discovery Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnprovisionedDevice {
    /// Lower-case, colon-delimited MAC address.
    pub mac: String,
    pub ssid: String,
    pub model: String,
    /// 1 or 2; 0 means enrichment failed and the generation is unknown.
    pub generation: u8,
    pub ap_ip: String,
    /// Normalized 0-100 percent.
    pub signal: u8,
    pub discovered_at: DateTime<Utc>,
}

/// Wire shape of a discovered device reported to the manager (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub mac: String,
    pub ssid: String,
    pub model: String,
    pub generation: u8,
    pub ip: String,
    pub signal: i32,
    pub discovered: DateTime<Utc>,
}

impl From<&UnprovisionedDevice> for DiscoveredDevice {
    fn from(d: &UnprovisionedDevice) -> Self {
        DiscoveredDevice {
            mac: d.mac.clone(),
            ssid: d.ssid.clone(),
            model: d.model.clone(),
            generation: d.generation,
            ip: d.ap_ip.clone(),
            signal: d.signal as i32,
            discovered: d.discovered_at,
        }
    }
}

/// User/task-supplied intent for one provisioning attempt. Immutable
/// for the lifetime of that attempt.
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub ssid: String,
    /// Empty means an open network.
    pub password: String,
    /// If empty, derived as `Shelly-<last6-of-MAC>` during `configure_identity`.
    pub device_name: String,
    pub enable_auth: bool,
    pub auth_user: String,
    pub auth_password: String,
    pub enable_cloud: bool,
    pub enable_mqtt: bool,
    pub mqtt_server: String,
    /// Overall wall-clock deadline. `0` means "use default".
    pub timeout_secs: u64,
}

impl ProvisioningRequest {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Resolves the "0 means use default" boundary rule (§8).
    pub fn effective_timeout(&self) -> std::time::Duration {
        let secs = if self.timeout_secs == 0 {
            Self::DEFAULT_TIMEOUT_SECS
        } else {
            self.timeout_secs
        };
        std::time::Duration::from_secs(secs)
    }
}

/// Stable per-step identifier; serializes to the `snake_case` names
/// used in the design (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    CaptureHostNetwork,
    ConnectToDeviceAp,
    ProbeDevice,
    ConfigureIdentity,
    ConfigureAuth,
    ConfigureCloud,
    ConfigureMqtt,
    ApplyWifi,
    WaitForDisassociation,
    RestoreHostNetwork,
    VerifyOnTargetNetwork,
}

impl StepName {
    /// The fixed forward order of the state machine (§4.4), excluding
    /// the always-run finally stage which the engine schedules itself.
    pub const FORWARD_ORDER: &'static [StepName] = &[
        StepName::CaptureHostNetwork,
        StepName::ConnectToDeviceAp,
        StepName::ProbeDevice,
        StepName::ConfigureIdentity,
        StepName::ConfigureAuth,
        StepName::ConfigureCloud,
        StepName::ConfigureMqtt,
        StepName::ApplyWifi,
        StepName::WaitForDisassociation,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// One logical stage of the provisioning state machine. Append-only
/// within a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningStep {
    pub name: StepName,
    pub status: StepStatus,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub detail: String,
    pub error: Option<String>,
}

impl ProvisioningStep {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Outcome of one provisioning attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub mac: String,
    pub device_name: String,
    /// May be empty if verification was skipped.
    pub device_ip: String,
    pub steps: Vec<ProvisioningStep>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ProvisionDevice,
    DiscoverDevices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

/// A unit of work pulled from the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningTask {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default, rename = "device_mac")]
    pub device_mac: Option<String>,
    #[serde(default, rename = "target_ssid")]
    pub target_ssid: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

impl ProvisioningTask {
    fn config_str(&self, key: &str) -> Option<String> {
        self.config.get(key).and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    fn config_bool(&self, key: &str) -> bool {
        self.config
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Builds a `ProvisioningRequest` from a task's free-form
    /// `config` map, validating the required `target_ssid` (§7,
    /// `ValidationError`).
    pub fn to_provisioning_request(&self) -> crate::Result<ProvisioningRequest> {
        let ssid = self
            .target_ssid
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                crate::Error::ValidationError("target_ssid is required for provision_device".into())
            })?;

        let timeout_secs = self
            .config
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok(ProvisioningRequest {
            ssid,
            password: self.config_str("password").unwrap_or_default(),
            device_name: self.config_str("device_name").unwrap_or_default(),
            enable_auth: self.config_bool("enable_auth"),
            auth_user: self.config_str("auth_user").unwrap_or_default(),
            auth_password: self.config_str("auth_password").unwrap_or_default(),
            enable_cloud: self.config_bool("enable_cloud"),
            enable_mqtt: self.config_bool("enable_mqtt"),
            mqtt_server: self.config_str("mqtt_server").unwrap_or_default(),
            timeout_secs,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ProvisionGen1,
    ProvisionGen2,
    Discover,
}

/// Deterministic agent identity, constructed once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    pub capabilities: Vec<Capability>,
    pub version: String,
    pub platform: String,
}

impl AgentIdentity {
    pub fn new(hostname: &str, pid: u32) -> Self {
        AgentIdentity {
            id: format!("provisioner-{hostname}-{pid}"),
            capabilities: vec![
                Capability::ProvisionGen1,
                Capability::ProvisionGen2,
                Capability::Discover,
            ],
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// The Wi-Fi network the host was connected to before any
/// provisioning began. Captured once at attempt start; restoration is
/// attempted on every exit path (§3 invariants).
#[derive(Debug, Clone)]
pub struct HostNetworkContext {
    pub original_ssid: String,
}

/// Derives `Shelly-<last6-of-MAC>` when a request leaves the device
/// name unset (§4.4 `configure_identity`).
pub fn synthesize_device_name(mac: &str) -> String {
    let hex: String = mac.chars().filter(|c| *c != ':').collect();
    let suffix = if hex.len() >= 6 {
        &hex[hex.len() - 6..]
    } else {
        &hex[..]
    };
    format!("Shelly-{}", suffix.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_device_name_from_mac() {
        assert_eq!(
            synthesize_device_name("aa:bb:cc:dd:ee:ff"),
            "Shelly-DDEEFF"
        );
    }

    #[test]
    fn effective_timeout_falls_back_to_default_when_zero() {
        let req = ProvisioningRequest {
            ssid: "x".into(),
            password: String::new(),
            device_name: String::new(),
            enable_auth: false,
            auth_user: String::new(),
            auth_password: String::new(),
            enable_cloud: false,
            enable_mqtt: false,
            mqtt_server: String::new(),
            timeout_secs: 0,
        };
        assert_eq!(
            req.effective_timeout(),
            std::time::Duration::from_secs(ProvisioningRequest::DEFAULT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn task_without_target_ssid_fails_validation() {
        let task = ProvisioningTask {
            id: "t-1".into(),
            task_type: TaskType::ProvisionDevice,
            device_mac: None,
            target_ssid: None,
            config: HashMap::new(),
        };
        let err = task.to_provisioning_request().unwrap_err();
        assert!(matches!(err, crate::Error::ValidationError(_)));
    }
}
