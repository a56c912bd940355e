//! Agent configuration: a TOML file overridden by `SHELLY_`-prefixed
//! environment variables (§6 Environment), with `_FILE`-indirected
//! secrets for sensitive keys.

use serde::Deserialize;

const ENV_PREFIX: &str = "SHELLY_";

/// Which [`crate::network::NetworkInterface`] implementation to
/// construct at startup (§9 platform capability variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkInterfaceKind {
    WpaCli,
    Nmcli,
    Mock,
}

impl Default for NetworkInterfaceKind {
    fn default() -> Self {
        NetworkInterfaceKind::Mock
    }
}

impl std::str::FromStr for NetworkInterfaceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wpa_cli" => Ok(NetworkInterfaceKind::WpaCli),
            "nmcli" => Ok(NetworkInterfaceKind::Nmcli),
            "mock" => Ok(NetworkInterfaceKind::Mock),
            other => Err(crate::Error::Config(format!(
                "unknown network_interface kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub api_url: String,
    pub api_key: String,
    pub tick_interval_secs: u64,
    pub network_interface: NetworkInterfaceKind,
    pub ssid_patterns: Vec<String>,
    pub device_call_timeout_secs: u64,
    pub manager_call_timeout_secs: u64,
    pub association_timeout_secs: u64,
    pub disassociation_wait_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            api_url: String::new(),
            api_key: String::new(),
            tick_interval_secs: 30,
            network_interface: NetworkInterfaceKind::Mock,
            ssid_patterns: default_ssid_patterns(),
            device_call_timeout_secs: 10,
            manager_call_timeout_secs: 30,
            association_timeout_secs: 30,
            disassociation_wait_secs: 10,
        }
    }
}

/// Default unprovisioned-SSID prefix set (§4.3; the exact Gen2 list is
/// an Open Question, so this stays configurable).
pub fn default_ssid_patterns() -> Vec<String> {
    vec![
        "shelly*-*".to_string(),
        "ShellyPlus*".to_string(),
        "ShellyPro*".to_string(),
        "ShellyPlusPM*".to_string(),
    ]
}

impl AgentConfig {
    /// Loads configuration from an optional TOML file, then applies
    /// environment overrides on top.
    pub async fn load(config_path: Option<&std::path::Path>) -> crate::Result<Self> {
        let mut config = if let Some(path) = config_path {
            let contents = tokio::fs::read_to_string(path).await?;
            toml::from_str(&contents)
                .map_err(|e| crate::Error::Config(format!("invalid config TOML: {e}")))?
        } else {
            AgentConfig::default()
        };
        config.apply_env_overrides().await?;
        Ok(config)
    }

    /// Applies `SHELLY_*` environment overrides, with dot-to-underscore
    /// key mapping and `_FILE` indirection for `API_KEY` (§6).
    async fn apply_env_overrides(&mut self) -> crate::Result<()> {
        if let Some(v) = env_string("API_URL") {
            self.api_url = v;
        }
        if let Some(v) = env_secret("API_KEY").await? {
            self.api_key = v;
        }
        if let Some(v) = env_string("TICK_INTERVAL_SECS") {
            self.tick_interval_secs = v.parse().map_err(|_| {
                crate::Error::Config("SHELLY_TICK_INTERVAL_SECS must be an integer".into())
            })?;
        }
        if let Some(v) = env_string("NETWORK_INTERFACE") {
            self.network_interface = v.parse()?;
        }
        if let Some(v) = env_string("DEVICE_CALL_TIMEOUT_SECS") {
            self.device_call_timeout_secs = v.parse().map_err(|_| {
                crate::Error::Config("SHELLY_DEVICE_CALL_TIMEOUT_SECS must be an integer".into())
            })?;
        }
        if let Some(v) = env_string("MANAGER_CALL_TIMEOUT_SECS") {
            self.manager_call_timeout_secs = v.parse().map_err(|_| {
                crate::Error::Config("SHELLY_MANAGER_CALL_TIMEOUT_SECS must be an integer".into())
            })?;
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok()
}

/// Resolves a sensitive config key, preferring `<KEY>_FILE` (path to a
/// secret, trailing newline trimmed) over the plain `<KEY>` value.
async fn env_secret(key: &str) -> crate::Result<Option<String>> {
    if let Ok(path) = std::env::var(format!("{ENV_PREFIX}{key}_FILE")) {
        let contents = tokio::fs::read_to_string(&path).await?;
        return Ok(Some(contents.trim_end_matches('\n').to_string()));
    }
    Ok(env_string(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_mock_network_interface() {
        let config = AgentConfig::default();
        assert_eq!(config.network_interface, NetworkInterfaceKind::Mock);
        assert_eq!(config.tick_interval_secs, 30);
    }

    #[test]
    fn parses_network_interface_kind_from_str() {
        assert_eq!(
            "wpa_cli".parse::<NetworkInterfaceKind>().unwrap(),
            NetworkInterfaceKind::WpaCli
        );
        assert!("bogus".parse::<NetworkInterfaceKind>().is_err());
    }
}
