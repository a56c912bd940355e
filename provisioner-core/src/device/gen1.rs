//! Gen1 Device Client: HTTP GET/POST with query-string / form-encoded
//! parameters against the documented `/settings*` endpoints (§4.2).
//! Response shapes are discovered field-by-field and parsed
//! defensively — every field is `Option<T>` unless the device is known
//! to always send it.

use super::{status_to_error, with_retries, DeviceAuth, DeviceClient, DeviceInfo, DeviceStatus, WifiConfig};
use crate::error::DeviceError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug)]
pub struct Gen1DeviceClient {
    client: Client,
    base_url: String,
    auth: Option<DeviceAuth>,
}

#[derive(Debug, Deserialize)]
struct Gen1Settings {
    device: Option<Gen1DeviceSection>,
    login: Option<Gen1LoginSection>,
}

#[derive(Debug, Deserialize)]
struct Gen1DeviceSection {
    mac: Option<String>,
    #[serde(rename = "type")]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Gen1LoginSection {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Gen1Status {
    wifi_sta: Option<Gen1WifiSta>,
    uptime: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Gen1WifiSta {
    connected: Option<bool>,
    ssid: Option<String>,
    ip: Option<String>,
}

impl Gen1DeviceClient {
    pub fn new(
        ap_ip: &str,
        auth: Option<DeviceAuth>,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(DeviceError::Http)?;
        Ok(Self {
            client,
            base_url: format!("http://{ap_ip}"),
            auth,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.client.get(url);
        if let Some(auth) = &self.auth {
            req = req.basic_auth(&auth.username, Some(&auth.password));
        }
        req
    }

    fn request_with_query(&self, path: &str, query: &[(&str, &str)]) -> reqwest::RequestBuilder {
        self.request(path).query(query)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> crate::Result<T> {
        with_retries(|| async {
            let response = self
                .request(path)
                .send()
                .await
                .map_err(|e| DeviceError::DeviceUnreachable(e.to_string()))?;
            if !response.status().is_success() {
                return Err(status_to_error(response.status()));
            }
            response
                .json::<T>()
                .await
                .map_err(|e| DeviceError::MalformedResponse(e.to_string()).into())
        })
        .await
    }

    async fn get_ok(&self, path: &str) -> crate::Result<()> {
        self.get_ok_with_query(path, &[]).await
    }

    async fn get_ok_with_query(&self, path: &str, query: &[(&str, &str)]) -> crate::Result<()> {
        with_retries(|| async {
            let response = self
                .request_with_query(path, query)
                .send()
                .await
                .map_err(|e| DeviceError::DeviceUnreachable(e.to_string()))?;
            if !response.status().is_success() {
                return Err(status_to_error(response.status()));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl DeviceClient for Gen1DeviceClient {
    async fn get_info(&self) -> crate::Result<DeviceInfo> {
        let settings: Gen1Settings = self.get_json("/settings").await?;
        let device = settings.device.unwrap_or(Gen1DeviceSection {
            mac: None,
            model: None,
        });
        let auth_required = settings
            .login
            .and_then(|l| l.enabled)
            .unwrap_or(false);
        Ok(DeviceInfo {
            mac: device.mac.unwrap_or_default(),
            model: device.model.unwrap_or_else(|| "unknown".to_string()),
            firmware: String::new(),
            auth_required,
        })
    }

    async fn get_status(&self) -> crate::Result<DeviceStatus> {
        let status: Gen1Status = self.get_json("/status").await?;
        let wifi = status.wifi_sta.unwrap_or(Gen1WifiSta {
            connected: None,
            ssid: None,
            ip: None,
        });
        Ok(DeviceStatus {
            wifi_connected: wifi.connected.unwrap_or(false),
            wifi_ssid: wifi.ssid,
            wifi_ip: wifi.ip,
            uptime_secs: status.uptime.unwrap_or(0),
        })
    }

    async fn set_wifi(&self, config: &WifiConfig) -> crate::Result<()> {
        self.get_ok_with_query(
            "/settings/sta",
            &[
                ("ssid", config.ssid.as_str()),
                ("key", config.password.as_str()),
                ("enabled", "1"),
            ],
        )
        .await
    }

    async fn set_name(&self, name: &str) -> crate::Result<()> {
        self.get_ok_with_query("/settings", &[("name", name)]).await
    }

    async fn set_auth(&self, auth: &DeviceAuth) -> crate::Result<()> {
        self.get_ok_with_query(
            "/settings/login",
            &[
                ("enabled", "1"),
                ("username", auth.username.as_str()),
                ("password", auth.password.as_str()),
            ],
        )
        .await
    }

    async fn set_cloud(&self, enable: bool) -> crate::Result<()> {
        self.get_ok_with_query("/settings/cloud", &[("enabled", if enable { "1" } else { "0" })])
            .await
    }

    async fn set_mqtt(&self, server: &str) -> crate::Result<()> {
        if server.is_empty() {
            self.get_ok_with_query("/settings/mqtt", &[("enable", "0")])
                .await
        } else {
            self.get_ok_with_query("/settings/mqtt", &[("enable", "1"), ("server", server)])
                .await
        }
    }

    async fn reboot(&self) -> crate::Result<()> {
        self.get_ok("/reboot").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_info_parses_defensively_when_login_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"device":{"mac":"AABBCCDDEEFF","type":"SHSW-1"}}"#,
            ))
            .mount(&server)
            .await;

        let client = Gen1DeviceClient::new(&server_host(&server), None, Duration::from_secs(1), false).unwrap();
        let info = client.get_info().await.unwrap();
        assert_eq!(info.mac, "AABBCCDDEEFF");
        assert_eq!(info.model, "SHSW-1");
        assert!(!info.auth_required);
    }

    #[tokio::test]
    async fn non_2xx_maps_to_device_request_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Gen1DeviceClient::new(&server_host(&server), None, Duration::from_secs(1), false).unwrap();
        let err = client.get_info().await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Device(DeviceError::DeviceRequestFailed(500))
        ));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_required() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = Gen1DeviceClient::new(&server_host(&server), None, Duration::from_secs(1), false).unwrap();
        let err = client.get_info().await.unwrap_err();
        assert!(matches!(err, crate::Error::Device(DeviceError::AuthRequired)));
    }

    fn server_host(server: &MockServer) -> String {
        server.uri().trim_start_matches("http://").to_string()
    }
}
