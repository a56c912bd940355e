//! Device Client (§4.2): HTTP client capability set shared by the
//! Gen1 (form-encoded) and Gen2 (JSON-RPC) device dialects. Two
//! concrete implementations of one trait, selected by
//! `UnprovisionedDevice.generation`, rather than a class hierarchy (§9).

pub mod gen1;
pub mod gen2;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::DeviceError;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Static-IP options for `SetWiFi`. `None` means DHCP.
#[derive(Debug, Clone, Default)]
pub struct StaticIpConfig {
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
}

#[derive(Debug, Clone, Default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    pub static_ip: Option<StaticIpConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceInfo {
    pub mac: String,
    pub model: String,
    pub firmware: String,
    pub auth_required: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceStatus {
    pub wifi_connected: bool,
    pub wifi_ssid: Option<String>,
    pub wifi_ip: Option<String>,
    pub uptime_secs: u64,
}

/// Credentials to present to a device that requires auth.
#[derive(Debug, Clone, Default)]
pub struct DeviceAuth {
    pub username: String,
    pub password: String,
}

/// Shared capability set for Gen1 and Gen2 devices (§4.2).
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn get_info(&self) -> crate::Result<DeviceInfo>;
    async fn get_status(&self) -> crate::Result<DeviceStatus>;
    async fn set_wifi(&self, config: &WifiConfig) -> crate::Result<()>;
    async fn set_name(&self, name: &str) -> crate::Result<()>;
    async fn set_auth(&self, auth: &DeviceAuth) -> crate::Result<()>;
    async fn set_cloud(&self, enable: bool) -> crate::Result<()>;
    async fn set_mqtt(&self, server: &str) -> crate::Result<()>;
    async fn reboot(&self) -> crate::Result<()>;
}

/// Builds a Device Client for `ap_ip` matching the device's
/// generation. Generation `0` (enrichment failed) defaults to Gen1,
/// the more permissive dialect, since Gen1 devices tolerate unexpected
/// fields more readily than Gen2's strict JSON-RPC.
pub fn build(
    generation: u8,
    ap_ip: &str,
    auth: Option<DeviceAuth>,
    timeout: Duration,
    accept_invalid_certs: bool,
) -> crate::Result<Arc<dyn DeviceClient>> {
    match generation {
        2 => Ok(Arc::new(gen2::Gen2DeviceClient::new(
            ap_ip,
            auth,
            timeout,
            accept_invalid_certs,
        )?)),
        _ => Ok(Arc::new(gen1::Gen1DeviceClient::new(
            ap_ip,
            auth,
            timeout,
            accept_invalid_certs,
        )?)),
    }
}

/// Maps an HTTP status code to the stable error kinds from §7.
pub(crate) fn status_to_error(status: reqwest::StatusCode) -> crate::Error {
    if status.as_u16() == 401 {
        DeviceError::AuthRequired.into()
    } else {
        DeviceError::DeviceRequestFailed(status.as_u16()).into()
    }
}

/// Runs `attempt` up to `DEFAULT_RETRY_ATTEMPTS` times with a fixed
/// delay between tries, surfacing the error only after the retries are
/// exhausted (§4.2 transport rules, §7 propagation policy).
pub(crate) async fn with_retries<F, Fut, T>(mut attempt: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut last_err = None;
    for _ in 0..DEFAULT_RETRY_ATTEMPTS {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(crate::Error::Device(DeviceError::AuthRequired)) => {
                return Err(DeviceError::AuthRequired.into());
            }
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(RETRY_DELAY).await;
    }
    Err(last_err.unwrap_or_else(|| DeviceError::DeviceUnreachable("no attempts made".into()).into()))
}
