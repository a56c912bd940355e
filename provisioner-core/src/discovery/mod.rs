//! Discovery Engine (§4.3): turns scan results into
//! [`UnprovisionedDevice`] records, with best-effort enrichment over
//! the AP-side device probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::device::{self, DeviceAuth};
use crate::model::UnprovisionedDevice;
use crate::network::{Network, NetworkInterface};
use crate::radio_lock::RadioLock;

const AP_SIDE_IP: &str = "192.168.33.1";

pub struct DiscoveryEngine {
    network: Arc<dyn NetworkInterface>,
    radio_lock: RadioLock,
    patterns: Vec<String>,
    device_call_timeout: Duration,
}

impl DiscoveryEngine {
    pub fn new(
        network: Arc<dyn NetworkInterface>,
        radio_lock: RadioLock,
        patterns: Vec<String>,
        device_call_timeout: Duration,
    ) -> Self {
        Self {
            network,
            radio_lock,
            patterns,
            device_call_timeout,
        }
    }

    /// Runs the full discovery algorithm of §4.3: scan, filter, parse,
    /// tie-break by signal, then enrich each candidate.
    pub async fn discover(&self) -> crate::Result<Vec<UnprovisionedDevice>> {
        let networks = self.network.scan().await?;
        let candidates = self.filter_and_parse(&networks);
        let deduped = tie_break_by_signal(candidates);

        let mut devices = Vec::with_capacity(deduped.len());
        for mut device in deduped {
            self.enrich(&mut device).await;
            devices.push(device);
        }
        Ok(devices)
    }

    fn filter_and_parse(&self, networks: &[Network]) -> Vec<UnprovisionedDevice> {
        networks
            .iter()
            .filter(|n| self.matches_any_pattern(&n.ssid))
            .filter_map(|n| parse_ssid(&n.ssid).map(|(model, mac_suffix, generation)| {
                UnprovisionedDevice {
                    mac: colonize_mac(&mac_suffix),
                    ssid: n.ssid.clone(),
                    model,
                    generation,
                    ap_ip: AP_SIDE_IP.to_string(),
                    signal: n.signal,
                    discovered_at: Utc::now(),
                }
            }))
            .collect()
    }

    fn matches_any_pattern(&self, ssid: &str) -> bool {
        self.patterns.iter().any(|pattern| glob_match(pattern, ssid))
    }

    /// Joins the AP (behind the radio lock) and calls `GetInfo` to
    /// enrich with full MAC and firmware, then disconnects. Best
    /// effort: enrichment failure leaves the record as-is with
    /// whatever generation was inferred from the SSID (or `0` if the
    /// SSID itself was ambiguous).
    async fn enrich(&self, device: &mut UnprovisionedDevice) {
        let Ok(_guard) = self.radio_lock.try_acquire() else {
            return;
        };

        if self
            .network
            .connect(&device.ssid, "", Duration::from_secs(30))
            .await
            .is_err()
        {
            return;
        }

        let client = match device::build(
            device.generation,
            &device.ap_ip,
            None::<DeviceAuth>,
            self.device_call_timeout,
            true,
        ) {
            Ok(c) => c,
            Err(_) => {
                let _ = self.network.disconnect().await;
                return;
            }
        };

        match client.get_info().await {
            Ok(info) => {
                if !info.mac.is_empty() {
                    device.mac = normalize_mac(&info.mac);
                }
                if !info.model.is_empty() {
                    device.model = info.model;
                }
            }
            Err(_) => {
                // best-effort: keep the SSID-derived metadata but mark
                // generation unknown since it was never confirmed (§4.3)
                device.generation = 0;
            }
        }

        let _ = self.network.disconnect().await;
    }
}

/// Keeps the strongest-signal record when multiple SSIDs resolve to
/// the same MAC suffix (radio multipath / repeated beacons).
fn tie_break_by_signal(candidates: Vec<UnprovisionedDevice>) -> Vec<UnprovisionedDevice> {
    let mut best: HashMap<String, UnprovisionedDevice> = HashMap::new();
    for candidate in candidates {
        match best.get(&candidate.mac) {
            Some(existing) if existing.signal >= candidate.signal => {}
            _ => {
                best.insert(candidate.mac.clone(), candidate);
            }
        }
    }
    let mut devices: Vec<_> = best.into_values().collect();
    devices.sort_by(|a, b| a.mac.cmp(&b.mac));
    devices
}

fn normalize_mac(mac: &str) -> String {
    let hex: String = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    colonize_mac(&hex.to_lowercase())
}

/// Reinserts `:` every two hex chars so a MAC matches the
/// lower-case, colon-delimited form the data model requires (§3) —
/// the same form tasks arrive with from the manager over the wire.
fn colonize_mac(hex: &str) -> String {
    hex.as_bytes()
        .chunks(2)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parses an SSID into `(model, mac_suffix, generation)` per §4.3.
/// Generation is `1` for SSIDs starting with lower-case `shelly`, `2`
/// for `Shelly<Family>*` Gen2 factory APs, `0` if neither pattern
/// matches cleanly (I5: Gen1 suffixes are non-empty and of even
/// length; Gen2 SSIDs always yield `Generation = 2`).
pub fn parse_ssid(ssid: &str) -> Option<(String, String, u8)> {
    if let Some(rest) = ssid.strip_prefix("shelly") {
        // Gen1 factory AP form: shelly<model>-<macsuffix>
        let (model, suffix) = rest.rsplit_once('-')?;
        let suffix = suffix.to_lowercase();
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        if suffix.len() % 2 != 0 {
            return None;
        }
        return Some((format!("shelly{model}"), suffix, 1));
    }

    if ssid.starts_with("Shelly") {
        // Gen2 factory AP form: Shelly<Family><N>-<macsuffix> (or no
        // explicit suffix separator on some families)
        let (model, suffix) = ssid.rsplit_once('-').unwrap_or((ssid, ""));
        let suffix = suffix.to_lowercase();
        let mac_suffix = if suffix.chars().all(|c| c.is_ascii_hexdigit()) && !suffix.is_empty() {
            suffix
        } else {
            String::new()
        };
        return Some((model.to_string(), mac_suffix, 2));
    }

    None
}

/// Minimal `*`-wildcard glob matcher; sufficient for the SSID prefix
/// patterns in §4.3 (`shelly*-*`, `ShellyPlus*`, ...) without pulling
/// in a dedicated globbing crate.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.is_empty() {
        return text.is_empty();
    }

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else if i == parts.len() - 1 {
            if !text[pos..].ends_with(part) {
                return false;
            }
        } else {
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gen1_ssid() {
        let (model, mac, gen) = parse_ssid("shelly1-DDEEFF").unwrap();
        assert_eq!(model, "shelly1");
        assert_eq!(mac, "ddeeff");
        assert_eq!(gen, 1);
    }

    #[test]
    fn parses_gen2_ssid() {
        let (model, mac, gen) = parse_ssid("ShellyPlus1PM-AABBCC").unwrap();
        assert_eq!(model, "ShellyPlus1PM");
        assert_eq!(mac, "aabbcc");
        assert_eq!(gen, 2);
    }

    #[test]
    fn rejects_unrelated_ssid() {
        assert!(parse_ssid("HomeWiFi").is_none());
    }

    #[test]
    fn gen1_suffix_must_be_even_length_hex() {
        assert!(parse_ssid("shellyplug-s-abc").is_none());
    }

    #[test]
    fn glob_matches_prefix_wildcard() {
        assert!(glob_match("ShellyPlus*", "ShellyPlus1PM-AABBCC"));
        assert!(glob_match("shelly*-*", "shelly1-DDEEFF"));
        assert!(!glob_match("ShellyPro*", "ShellyPlus1-AABBCC"));
    }

    #[test]
    fn tie_break_keeps_strongest_signal() {
        let candidates = vec![
            UnprovisionedDevice {
                mac: "ddeeff".into(),
                ssid: "shelly1-DDEEFF".into(),
                model: "shelly1".into(),
                generation: 1,
                ap_ip: AP_SIDE_IP.into(),
                signal: 40,
                discovered_at: Utc::now(),
            },
            UnprovisionedDevice {
                mac: "ddeeff".into(),
                ssid: "shelly1-DDEEFF".into(),
                model: "shelly1".into(),
                generation: 1,
                ap_ip: AP_SIDE_IP.into(),
                signal: 90,
                discovered_at: Utc::now(),
            },
        ];
        let result = tie_break_by_signal(candidates);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].signal, 90);
    }
}
