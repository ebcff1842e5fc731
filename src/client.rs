//! HTTP client for a remote exctl server.
//!
//! [`ControlClient`] wraps `reqwest::Client` and provides one typed method
//! per server endpoint. Non-2xx responses are parsed for the `error` field
//! in the JSON body; if parsing fails, the raw body is used as the error
//! message.

use std::time::Duration;

use crate::registry::Device;
use crate::routes::devices::DeviceListResponse;

/// Failures talking to a remote server.
#[derive(Debug)]
pub enum ClientError {
    /// Connection or protocol-level failure.
    Http(String),
    /// The server answered with an error status.
    Api { status: u16, message: String },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Http(e) => write!(f, "Request failed: {e}"),
            ClientError::Api { status, message } => write!(f, "Server error ({status}): {message}"),
        }
    }
}

/// HTTP client for a single exctl server.
pub struct ControlClient {
    http: reqwest::Client,
    base_url: String,
}

impl ControlClient {
    /// Create a client for the server at the given URL.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client cannot be constructed, which
    /// only happens on broken TLS backends.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `GET /api/devices` — list known devices.
    pub async fn list_devices(&self) -> Result<Vec<Device>, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/devices", self.base_url))
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        let response = check_status(response).await?;
        let listing: DeviceListResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Http(format!("malformed device list: {e}")))?;
        Ok(listing.devices)
    }

    /// `POST /api/select` — route an input on a named device.
    pub async fn select_input(&self, name: &str, input: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/api/select", self.base_url))
            .json(&serde_json::json!({"name": name, "input": input}))
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }

    /// `POST /api/rescan` — force a rescan on the server.
    pub async fn rescan(&self) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/api/rescan", self.base_url))
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }

    /// `POST /api/stop` — halt the server.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/api/stop", self.base_url))
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }
}

/// Turn a non-2xx response into [`ClientError::Api`], extracting the
/// `error` field from the body when present.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(ToString::to_string))
        .unwrap_or(body);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
