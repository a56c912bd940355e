//! In-memory Network Interface for tests and CI, and for developer
//! workstations that refuse real radio control (§9). Deterministic,
//! with an injectable scan table so discovery/provisioning tests don't
//! depend on real hardware.

use super::{Network, NetworkInterface};
use crate::error::NetworkError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct MockNetworkInterface {
    state: Mutex<MockState>,
}

#[derive(Debug)]
struct MockState {
    networks: Vec<Network>,
    current: String,
    /// SSIDs that should fail connection with `AuthenticationFailed`.
    reject: Vec<String>,
}

impl MockNetworkInterface {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                networks: default_networks(),
                current: "HomeWiFi".to_string(),
                reject: Vec::new(),
            }),
        }
    }

    /// Test/dev hook: replace the scan table.
    pub async fn set_networks(&self, networks: Vec<Network>) {
        self.state.lock().await.networks = networks;
    }

    /// Test hook: mark an SSID as always rejecting authentication.
    pub async fn reject_ssid(&self, ssid: &str) {
        self.state.lock().await.reject.push(ssid.to_string());
    }

    /// Test hook: directly set the currently-joined SSID.
    pub async fn set_current(&self, ssid: &str) {
        self.state.lock().await.current = ssid.to_string();
    }
}

impl Default for MockNetworkInterface {
    fn default() -> Self {
        Self::new()
    }
}

fn default_networks() -> Vec<Network> {
    vec![
        Network {
            ssid: "HomeWiFi".to_string(),
            bssid: "aa:aa:aa:aa:aa:aa".to_string(),
            signal: 95,
            security: "WPA2".to_string(),
        },
        Network {
            ssid: "CafeGuest".to_string(),
            bssid: "bb:bb:bb:bb:bb:bb".to_string(),
            signal: 60,
            security: "Open".to_string(),
        },
    ]
}

#[async_trait]
impl NetworkInterface for MockNetworkInterface {
    async fn scan(&self) -> crate::Result<Vec<Network>> {
        Ok(self.state.lock().await.networks.clone())
    }

    async fn connect(&self, ssid: &str, _passphrase: &str, _timeout: Duration) -> crate::Result<()> {
        let mut state = self.state.lock().await;
        if state.reject.contains(&ssid.to_string()) {
            return Err(NetworkError::AuthenticationFailed.into());
        }
        if !state.networks.iter().any(|n| n.ssid == ssid) {
            return Err(NetworkError::NetworkNotFound(ssid.to_string()).into());
        }
        state.current = ssid.to_string();
        Ok(())
    }

    async fn disconnect(&self) -> crate::Result<()> {
        // R1: repeated disconnect is a no-op, succeeds unconditionally.
        self.state.lock().await.current.clear();
        Ok(())
    }

    async fn current_network(&self) -> crate::Result<String> {
        Ok(self.state.lock().await.current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_known_network_updates_current() {
        let iface = MockNetworkInterface::new();
        iface
            .connect("CafeGuest", "", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(iface.current_network().await.unwrap(), "CafeGuest");
    }

    #[tokio::test]
    async fn connect_to_unknown_network_fails() {
        let iface = MockNetworkInterface::new();
        let err = iface
            .connect("DoesNotExist", "", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Network(NetworkError::NetworkNotFound(_))
        ));
    }

    #[tokio::test]
    async fn repeated_disconnect_is_a_no_op() {
        let iface = MockNetworkInterface::new();
        iface.disconnect().await.unwrap();
        iface.disconnect().await.unwrap();
        assert_eq!(iface.current_network().await.unwrap(), "");
    }

    #[tokio::test]
    async fn rejected_ssid_fails_authentication() {
        let iface = MockNetworkInterface::new();
        iface.reject_ssid("HomeWiFi").await;
        let err = iface
            .connect("HomeWiFi", "x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Network(NetworkError::AuthenticationFailed)
        ));
    }
}
