//! Device control endpoints.
//!
//! - `GET /api/devices` — list known devices
//! - `POST /api/select` — route an input on a named device
//! - `POST /api/rescan` — re-enumerate attached devices
//!
//! Listing reads the registry snapshot and always succeeds. Select copies
//! the device descriptor out of the registry, releases the lock, and only
//! then performs the serial exchange on the blocking pool, so slow device
//! I/O never stalls unrelated calls.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::driver::DriverError;
use crate::registry::Device;
use crate::state::AppState;

/// Response body for `GET /api/devices`.
#[derive(Serialize, Deserialize)]
pub struct DeviceListResponse {
    /// All known devices, sorted by name. Empty when none were found.
    pub devices: Vec<Device>,
}

/// Request body for `POST /api/select`.
#[derive(Deserialize)]
pub struct SelectRequest {
    /// Device name as reported by `GET /api/devices`.
    pub name: String,
    /// Input to route, e.g. `2` or `HDMI2`.
    pub input: String,
}

/// `GET /api/devices` — list known devices.
pub async fn list(State(state): State<AppState>) -> Json<DeviceListResponse> {
    Json(DeviceListResponse {
        devices: state.registry.list().await,
    })
}

/// `POST /api/select` — route an input on a named device.
///
/// Empty response on success.
///
/// # Errors
///
/// - `404 Not Found` `{"code":"NOT_FOUND"}` — unknown device name; the
///   device is never contacted
/// - `400 Bad Request` `{"code":"INVALID_INPUT"}` — device rejected the input
/// - `502 Bad Gateway` `{"code":"DEVICE_UNREACHABLE"}` — device unreachable
///   or did not acknowledge
/// - `503 Service Unavailable` `{"code":"SHUTTING_DOWN"}` — shutdown in
///   progress
pub async fn select(
    State(state): State<AppState>,
    Json(payload): Json<SelectRequest>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    if state.shutdown.is_requested() {
        return Err(shutting_down());
    }

    let Some(device) = state.registry.lookup(&payload.name).await else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("Device {} not found", payload.name),
                "code": "NOT_FOUND"
            })),
        ));
    };

    let driver = state.driver.clone();
    let input = payload.input.clone();
    let result = tokio::task::spawn_blocking(move || driver.switch_input(&device.path, &input))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Switch task failed: {e}"), "code": "INTERNAL"})),
            )
        })?;

    match result {
        Ok(()) => {
            info!("Routed input {} on {}", payload.input, payload.name);
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e @ DriverError::InvalidInput(_)) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string(), "code": "INVALID_INPUT"})),
        )),
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e.to_string(), "code": "DEVICE_UNREACHABLE"})),
        )),
    }
}

/// `POST /api/rescan` — re-enumerate attached devices.
///
/// Replaces the full device set on success; empty response. A failed
/// discovery leaves the previous set unchanged.
///
/// # Errors
///
/// - `502 Bad Gateway` `{"code":"DISCOVERY_FAILED"}` — enumeration failed
/// - `503 Service Unavailable` `{"code":"SHUTTING_DOWN"}` — shutdown in
///   progress
pub async fn rescan(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    if state.shutdown.is_requested() {
        return Err(shutting_down());
    }

    match state.registry.rescan(state.driver.clone()).await {
        Ok(count) => {
            info!("Rescan complete, {count} device(s)");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e.to_string(), "code": "DISCOVERY_FAILED"})),
        )),
    }
}

fn shutting_down() -> (StatusCode, Json<Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "Server is shutting down", "code": "SHUTTING_DOWN"})),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::config::Config;
    use crate::driver::mock::MockDriver;
    use crate::registry::DeviceRegistry;
    use crate::state::ShutdownHandle;

    fn state_with(driver: Arc<MockDriver>) -> AppState {
        AppState {
            config: Arc::new(Config {
                server: Default::default(),
                driver: Default::default(),
                logging: Default::default(),
            }),
            start_time: Instant::now(),
            registry: DeviceRegistry::new(),
            driver,
            shutdown: ShutdownHandle::new(),
        }
    }

    fn select_req(name: &str, input: &str) -> SelectRequest {
        SelectRequest {
            name: name.to_string(),
            input: input.to_string(),
        }
    }

    fn error_code(body: &Value) -> &str {
        body["code"].as_str().unwrap()
    }

    #[tokio::test]
    async fn test_list_select_rescan_scenario() {
        let driver = Arc::new(MockDriver::new(vec![Device {
            name: "Matrix1".to_string(),
            path: "/dev/ext0".to_string(),
        }]));
        driver.accept_only(&["HDMI2"]);
        let state = state_with(driver);

        // Registry starts empty.
        let listing = list(State(state.clone())).await;
        assert!(listing.0.devices.is_empty());

        // Rescan picks up Matrix1.
        let status = rescan(State(state.clone())).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let listing = list(State(state.clone())).await;
        assert_eq!(listing.0.devices.len(), 1);
        assert_eq!(listing.0.devices[0].name, "Matrix1");
        assert_eq!(listing.0.devices[0].path, "/dev/ext0");

        // Known device, accepted input.
        let status = select(State(state.clone()), Json(select_req("Matrix1", "HDMI2")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        // Unknown device.
        let (status, body) = select(State(state), Json(select_req("Matrix2", "HDMI2")))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body.0), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_select_unknown_device_never_contacts_hardware() {
        let driver = Arc::new(MockDriver::new(vec![]));
        let state = state_with(driver.clone());

        let (status, _) = select(State(state), Json(select_req("Matrix1", "2")))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(driver.switch_attempts(), 0);
    }

    #[tokio::test]
    async fn test_select_rejected_input() {
        let driver = Arc::new(MockDriver::new(vec![Device {
            name: "Matrix1".to_string(),
            path: "/dev/ext0".to_string(),
        }]));
        driver.accept_only(&["1", "2"]);
        let state = state_with(driver);
        state.registry.rescan(state.driver.clone()).await.unwrap();

        let (status, body) = select(State(state), Json(select_req("Matrix1", "7")))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body.0), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_select_unreachable_device() {
        let driver = Arc::new(MockDriver::new(vec![Device {
            name: "Matrix1".to_string(),
            path: "/dev/ext0".to_string(),
        }]));
        let state = state_with(driver.clone());
        state.registry.rescan(state.driver.clone()).await.unwrap();

        driver.set_unreachable(true);
        let (status, body) = select(State(state), Json(select_req("Matrix1", "2")))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(error_code(&body.0), "DEVICE_UNREACHABLE");
    }

    #[tokio::test]
    async fn test_failed_rescan_reports_error_and_keeps_listing() {
        let driver = Arc::new(MockDriver::new(vec![Device {
            name: "Matrix1".to_string(),
            path: "/dev/ext0".to_string(),
        }]));
        let state = state_with(driver.clone());
        rescan(State(state.clone())).await.unwrap();

        driver.fail_discovery("no serial ports");
        let (status, body) = rescan(State(state.clone())).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(error_code(&body.0), "DISCOVERY_FAILED");

        let listing = list(State(state)).await;
        assert_eq!(listing.0.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_calls_during_shutdown_are_rejected() {
        let driver = Arc::new(MockDriver::new(vec![Device {
            name: "Matrix1".to_string(),
            path: "/dev/ext0".to_string(),
        }]));
        let state = state_with(driver.clone());
        state.registry.rescan(state.driver.clone()).await.unwrap();
        state.shutdown.trigger();

        let (status, body) = select(State(state.clone()), Json(select_req("Matrix1", "2")))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_code(&body.0), "SHUTTING_DOWN");
        assert_eq!(driver.switch_attempts(), 0);

        let (status, _) = rescan(State(state)).await.unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
