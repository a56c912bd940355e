//! `wpa_cli`-driven Network Interface, in the style of the project's
//! original `wpa_cli_TDM` backend: shell out to `wpa_cli` for scan and
//! connect, poll `status` for `wpa_state=COMPLETED`.

use super::{Network, NetworkInterface};
use crate::error::NetworkError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

const IFACE_NAME: &str = "wlan0";

#[derive(Debug)]
pub struct WpaCliNetworkInterface {
    /// Serializes connect attempts against this process's own state
    /// (e.g. in-flight `add_network`/`enable_network` sequences) even
    /// though the engine's radio lock already prevents concurrent
    /// callers in practice.
    state: Mutex<()>,
}

impl WpaCliNetworkInterface {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(()),
        }
    }

    fn parse_scan_results(output: &str) -> Vec<Network> {
        let mut networks = Vec::new();
        for line in output.lines().skip(1) {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 5 {
                continue;
            }
            let bssid = parts[0].to_string();
            let signal_level: i16 = parts[2].parse().unwrap_or(0);
            let flags = parts[3];
            let ssid = parts[4].to_string();

            if ssid.is_empty() || ssid == "\\x00" {
                continue;
            }

            let security = if flags.contains("WPA2") {
                "WPA2"
            } else if flags.contains("WPA") {
                "WPA"
            } else if flags.contains("WEP") {
                "WEP"
            } else {
                "Open"
            }
            .to_string();

            let signal = ((signal_level.clamp(-100, -50) + 100) * 2) as u8;

            networks.push(Network {
                ssid,
                bssid,
                signal,
                security,
            });
        }
        networks
    }

    async fn wpa_cli(args: &[&str]) -> crate::Result<String> {
        let output = Command::new("wpa_cli")
            .arg("-i")
            .arg(IFACE_NAME)
            .args(args)
            .output()
            .await
            .map_err(NetworkError::Io)?;
        if !output.status.success() {
            return Err(NetworkError::CommandFailed(format!(
                "wpa_cli {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            ))
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for WpaCliNetworkInterface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkInterface for WpaCliNetworkInterface {
    async fn scan(&self) -> crate::Result<Vec<Network>> {
        Self::wpa_cli(&["scan"]).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        let stdout = Self::wpa_cli(&["scan_results"]).await?;
        Ok(Self::parse_scan_results(&stdout))
    }

    async fn connect(&self, ssid: &str, passphrase: &str, timeout: Duration) -> crate::Result<()> {
        let _guard = self.state.lock().await;

        let id_output = Self::wpa_cli(&["add_network"]).await?;
        let network_id: u32 = id_output.trim().parse().map_err(|_| {
            NetworkError::CommandFailed(format!("could not parse network id from {id_output:?}"))
        })?;
        let id_str = network_id.to_string();

        let ssid_arg = format!("\"{ssid}\"");
        Self::wpa_cli(&["set_network", &id_str, "ssid", &ssid_arg]).await?;

        if passphrase.is_empty() {
            Self::wpa_cli(&["set_network", &id_str, "key_mgmt", "NONE"]).await?;
        } else {
            let psk_arg = format!("\"{passphrase}\"");
            Self::wpa_cli(&["set_network", &id_str, "psk", &psk_arg]).await?;
        }

        Self::wpa_cli(&["enable_network", &id_str]).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = Self::wpa_cli(&["status"]).await?;
            if status.contains("wpa_state=COMPLETED") {
                let _ = Self::wpa_cli(&["save_config"]).await;
                return Ok(());
            }
            if status.contains("reason=WRONG_KEY") {
                let _ = Self::wpa_cli(&["remove_network", &id_str]).await;
                return Err(NetworkError::AuthenticationFailed.into());
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = Self::wpa_cli(&["remove_network", &id_str]).await;
                return Err(NetworkError::AssociationTimeout.into());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn disconnect(&self) -> crate::Result<()> {
        let _ = Self::wpa_cli(&["disconnect"]).await;
        Ok(())
    }

    async fn current_network(&self) -> crate::Result<String> {
        let status = Self::wpa_cli(&["status"]).await?;
        for line in status.lines() {
            if let Some(ssid) = line.strip_prefix("ssid=") {
                return Ok(ssid.to_string());
            }
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scan_results_and_clamps_signal() {
        let output = "bssid / frequency / signal level / flags / ssid\n\
                       aa:bb:cc:dd:ee:ff\t2412\t-50\t[WPA2-PSK-CCMP][ESS]\tHomeWiFi\n\
                       11:22:33:44:55:66\t2412\t-90\t[ESS]\tOpenNet\n";
        let networks = WpaCliNetworkInterface::parse_scan_results(output);
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0].ssid, "HomeWiFi");
        assert_eq!(networks[0].security, "WPA2");
        assert_eq!(networks[0].signal, 100);
        assert_eq!(networks[1].security, "Open");
        assert_eq!(networks[1].signal, 20);
    }

    #[test]
    fn skips_hidden_ssids() {
        let output = "header\naa:bb:cc:dd:ee:ff\t2412\t-60\t[ESS]\t\\x00\n";
        let networks = WpaCliNetworkInterface::parse_scan_results(output);
        assert!(networks.is_empty());
    }
}
