//! Network Interface (§4.1): scan, connect, disconnect, and query the
//! host's Wi-Fi radio. Platform capability variants live in sibling
//! modules and are selected at startup by [`crate::config::NetworkInterfaceKind`].

pub mod mock;
pub mod nmcli;
pub mod wpa_cli;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AgentConfig, NetworkInterfaceKind};

/// A single Wi-Fi network found during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct Network {
    pub ssid: String,
    pub bssid: String,
    /// Normalized 0-100 percent.
    pub signal: u8,
    pub security: String,
}

/// Default association timeout (§4.1).
pub const DEFAULT_ASSOCIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Platform capability abstraction over the host's Wi-Fi radio.
///
/// Implementations must serialize their own calls; the engine relies
/// on the process-wide radio lock (§5) to respect this, so a single
/// implementation instance never needs to take its own mutex to be
/// correct under the engine's usage pattern. Implementations still use
/// an internal mutex where they track OS-process state (see
/// [`wpa_cli::WpaCliNetworkInterface`]) since tests may call them
/// directly without the lock.
#[async_trait]
pub trait NetworkInterface: Send + Sync {
    /// Returns the currently observable networks. No mutation.
    async fn scan(&self) -> crate::Result<Vec<Network>>;

    /// Associates with `ssid`, blocking until association completes
    /// or `timeout` elapses.
    async fn connect(&self, ssid: &str, passphrase: &str, timeout: Duration) -> crate::Result<()>;

    /// Drops the current association. Idempotent (R1).
    async fn disconnect(&self) -> crate::Result<()>;

    /// The SSID the host is presently joined to, or empty if none.
    async fn current_network(&self) -> crate::Result<String>;
}

/// Builds the configured [`NetworkInterface`] implementation.
pub fn build(config: &AgentConfig) -> Arc<dyn NetworkInterface> {
    match config.network_interface {
        NetworkInterfaceKind::WpaCli => Arc::new(wpa_cli::WpaCliNetworkInterface::new()),
        NetworkInterfaceKind::Nmcli => Arc::new(nmcli::NmcliNetworkInterface::new()),
        NetworkInterfaceKind::Mock => Arc::new(mock::MockNetworkInterface::new()),
    }
}
