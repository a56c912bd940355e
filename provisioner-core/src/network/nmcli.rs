//! `nmcli`-driven Network Interface, in the style of the project's
//! original `nmcli_TDM` backend.

use super::{Network, NetworkInterface};
use crate::error::NetworkError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

const IFACE_NAME: &str = "wlan0";

#[derive(Debug, Default)]
pub struct NmcliNetworkInterface;

impl NmcliNetworkInterface {
    pub fn new() -> Self {
        Self
    }

    fn parse_nmcli_list(output: &str) -> Vec<Network> {
        let mut networks = Vec::new();
        for line in output.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split(':').collect();
            let ssid = parts.first().map(|s| s.to_string()).unwrap_or_default();
            if ssid.is_empty() || ssid == "\\x00" {
                continue;
            }
            let signal: i16 = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            let security = parts
                .get(2)
                .map(|s| s.to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Unknown".to_string());
            let signal_percent = ((signal.clamp(-100, -50) + 100) * 2) as u8;
            networks.push(Network {
                ssid,
                // `nmcli -t -f ...,BSSID` escapes colons inside the BSSID
                // itself, which would require unescaping to split safely;
                // BSSID is not needed downstream so it is left unset.
                bssid: String::new(),
                signal: signal_percent,
                security,
            });
        }
        networks
    }
}

#[async_trait]
impl NetworkInterface for NmcliNetworkInterface {
    async fn scan(&self) -> crate::Result<Vec<Network>> {
        let _ = Command::new("nmcli")
            .args(["device", "wifi", "rescan"])
            .output()
            .await;

        let output = Command::new("nmcli")
            .args(["-t", "-f", "SSID,SIGNAL,SECURITY", "device", "wifi", "list"])
            .output()
            .await
            .map_err(NetworkError::Io)?;

        if !output.status.success() {
            return Err(NetworkError::ScanUnavailable.into());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Self::parse_nmcli_list(&stdout))
    }

    async fn connect(&self, ssid: &str, passphrase: &str, timeout: Duration) -> crate::Result<()> {
        let mut cmd = Command::new("nmcli");
        cmd.args(["device", "wifi", "connect", ssid, "ifname", IFACE_NAME]);
        if !passphrase.is_empty() {
            cmd.args(["password", passphrase]);
        }

        let result = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| NetworkError::AssociationTimeout)?
            .map_err(NetworkError::Io)?;

        if result.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&result.stderr);
        if stderr.contains("No network with SSID") {
            Err(NetworkError::NetworkNotFound(ssid.to_string()).into())
        } else if stderr.contains("Secrets were required") || stderr.contains("802-11-wireless-security") {
            Err(NetworkError::AuthenticationFailed.into())
        } else {
            Err(NetworkError::CommandFailed(stderr.into_owned()).into())
        }
    }

    async fn disconnect(&self) -> crate::Result<()> {
        let _ = Command::new("nmcli")
            .args(["device", "disconnect", IFACE_NAME])
            .output()
            .await;
        Ok(())
    }

    async fn current_network(&self) -> crate::Result<String> {
        let output = Command::new("nmcli")
            .args(["-t", "-f", "active,ssid", "device", "wifi"])
            .output()
            .await
            .map_err(NetworkError::Io)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("yes:") {
                return Ok(rest.to_string());
            }
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nmcli_colon_separated_list() {
        let output = "HomeWiFi:85:WPA2:AA:BB:CC:DD:EE:FF\nCafeGuest:40::11:22:33:44:55:66\n";
        let networks = NmcliNetworkInterface::parse_nmcli_list(output);
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0].ssid, "HomeWiFi");
        assert_eq!(networks[1].security, "Unknown");
    }
}
