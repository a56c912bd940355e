//! Gen2 Device Client: JSON-RPC 2.0 over HTTP POST at `/rpc` (§4.2).
//! Auth is HTTP digest when the device has it enabled; `reqwest` has no
//! built-in digest support, so the `digest_auth` crate drives the
//! challenge/response round trip.

use super::{status_to_error, with_retries, DeviceAuth, DeviceClient, DeviceInfo, DeviceStatus, WifiConfig};
use crate::error::DeviceError;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

const RPC_PATH: &str = "/rpc";

#[derive(Debug)]
pub struct Gen2DeviceClient {
    client: Client,
    base_url: String,
    auth: Option<DeviceAuth>,
    next_id: AtomicI32,
}

#[derive(Debug, Serialize)]
struct RpcRequest {
    id: i32,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    #[allow(dead_code)]
    id: i32,
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Gen2DeviceInfo {
    mac: String,
    model: String,
    #[serde(default)]
    fw_id: String,
    #[serde(default)]
    auth_en: bool,
}

#[derive(Debug, Deserialize, Default)]
struct Gen2Status {
    #[serde(default)]
    wifi: Option<Gen2WifiStatus>,
    #[serde(default)]
    sys: Option<Gen2SysStatus>,
}

#[derive(Debug, Deserialize)]
struct Gen2WifiStatus {
    sta_ip: Option<String>,
    ssid: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Gen2SysStatus {
    uptime: Option<u64>,
}

impl Gen2DeviceClient {
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
            next_id: AtomicI32::new(1),
        })
    }

    fn next_request_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Issues one JSON-RPC call, retrying with a digest challenge
    /// response if the first attempt comes back `401` and credentials
    /// are configured.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> crate::Result<T> {
        with_retries(|| self.call_once(method, params.clone())).await
    }

    async fn call_once<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> crate::Result<T> {
        let url = format!("{}{RPC_PATH}", self.base_url);
        let body = RpcRequest {
            id: self.next_request_id(),
            method: method.to_string(),
            params,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeviceError::DeviceUnreachable(e.to_string()))?;

        let response = if response.status().as_u16() == 401 {
            self.retry_with_digest(&url, &body, &response).await?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(status_to_error(response.status()));
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| DeviceError::MalformedResponse(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(DeviceError::MalformedResponse(format!(
                "RPC error {}: {}",
                err.code, err.message
            ))
            .into());
        }

        parsed
            .result
            .ok_or_else(|| DeviceError::MalformedResponse("RPC response missing result".into()).into())
    }

    async fn retry_with_digest(
        &self,
        url: &str,
        body: &RpcRequest,
        challenge: &Response,
    ) -> crate::Result<Response> {
        let auth = self.auth.as_ref().ok_or(DeviceError::AuthRequired)?;

        let www_authenticate = challenge
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok())
            .ok_or(DeviceError::AuthRequired)?;

        let mut prompt = digest_auth::parse(www_authenticate)
            .map_err(|e| DeviceError::MalformedResponse(format!("digest challenge: {e}")))?;
        let context = digest_auth::AuthContext::new_post(
            &auth.username,
            &auth.password,
            RPC_PATH,
            Some(serde_json::to_vec(body).unwrap_or_default().as_slice()),
        );
        let answer = prompt
            .respond(&context)
            .map_err(|e| DeviceError::MalformedResponse(format!("digest response: {e}")))?;

        self.client
            .post(url)
            .header("Authorization", answer.to_header_string())
            .json(body)
            .send()
            .await
            .map_err(|e| DeviceError::DeviceUnreachable(e.to_string()).into())
    }
}

#[async_trait]
impl DeviceClient for Gen2DeviceClient {
    async fn get_info(&self) -> crate::Result<DeviceInfo> {
        let info: Gen2DeviceInfo = self.call("Shelly.GetDeviceInfo", None).await?;
        Ok(DeviceInfo {
            mac: info.mac,
            model: info.model,
            firmware: info.fw_id,
            auth_required: info.auth_en,
        })
    }

    async fn get_status(&self) -> crate::Result<DeviceStatus> {
        let status: Gen2Status = self.call("Shelly.GetStatus", None).await?;
        let wifi = status.wifi.unwrap_or(Gen2WifiStatus {
            sta_ip: None,
            ssid: None,
            status: None,
        });
        Ok(DeviceStatus {
            wifi_connected: wifi.status.as_deref() == Some("got ip"),
            wifi_ssid: wifi.ssid,
            wifi_ip: wifi.sta_ip,
            uptime_secs: status.sys.and_then(|s| s.uptime).unwrap_or(0),
        })
    }

    async fn set_wifi(&self, config: &WifiConfig) -> crate::Result<()> {
        let params = json!({
            "config": {
                "sta": {
                    "ssid": config.ssid,
                    "pass": config.password,
                    "enable": true,
                }
            }
        });
        let _: serde_json::Value = self.call("WiFi.SetConfig", Some(params)).await?;
        Ok(())
    }

    async fn set_name(&self, name: &str) -> crate::Result<()> {
        let params = json!({"config": {"device": {"name": name}}});
        let _: serde_json::Value = self.call("Sys.SetConfig", Some(params)).await?;
        Ok(())
    }

    async fn set_auth(&self, auth: &DeviceAuth) -> crate::Result<()> {
        const REALM: &str = "shelly";
        let ha1 = format!(
            "{:x}",
            md5::compute(format!("{}:{REALM}:{}", auth.username, auth.password))
        );
        let params = json!({
            "user": auth.username,
            "realm": REALM,
            "ha1": ha1,
        });
        let _: serde_json::Value = self.call("Shelly.SetAuth", Some(params)).await?;
        Ok(())
    }

    async fn set_cloud(&self, enable: bool) -> crate::Result<()> {
        let params = json!({"config": {"enable": enable}});
        let _: serde_json::Value = self.call("Cloud.SetConfig", Some(params)).await?;
        Ok(())
    }

    async fn set_mqtt(&self, server: &str) -> crate::Result<()> {
        let params = json!({
            "config": {
                "enable": !server.is_empty(),
                "server": server,
            }
        });
        let _: serde_json::Value = self.call("MQTT.SetConfig", Some(params)).await?;
        Ok(())
    }

    async fn reboot(&self) -> crate::Result<()> {
        let _: serde_json::Value = self.call("Shelly.Reboot", None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_info_parses_rpc_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"id":1,"result":{"mac":"AABBCCDDEEFF","model":"SNSW-001X16EU","gen":2,"fw_id":"1.0","auth_en":false}}"#,
            ))
            .mount(&server)
            .await;

        let client = Gen2DeviceClient::new(&server_host(&server), None, Duration::from_secs(1), false).unwrap();
        let info = client.get_info().await.unwrap();
        assert_eq!(info.mac, "AABBCCDDEEFF");
        assert_eq!(info.model, "SNSW-001X16EU");
        assert!(!info.auth_required);
    }

    #[tokio::test]
    async fn rpc_error_surfaces_as_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"id":1,"result":null,"error":{"code":-103,"message":"invalid argument"}}"#,
            ))
            .mount(&server)
            .await;

        let client = Gen2DeviceClient::new(&server_host(&server), None, Duration::from_secs(1), false).unwrap();
        let err = client.get_info().await.unwrap_err();
        assert!(matches!(err, crate::Error::Device(DeviceError::MalformedResponse(_))));
    }

    fn server_host(server: &MockServer) -> String {
        server.uri().trim_start_matches("http://").to_string()
    }
}
