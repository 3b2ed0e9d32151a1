// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device session routes under `/whatsapp` and the public health route.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use wacast_core::types::{DeviceInfo, DeviceStatus, HealthStatus, PairingChallenge};
use wacast_core::{OutboundMessage, SendError};
use wacast_session::ConnectOutcome;

use crate::error::ApiError;
use crate::server::GatewayState;

const MAX_DEVICE_ID_LEN: usize = 64;

/// Device ids name rows and WebSocket paths, so they are restricted to
/// `[A-Za-z0-9_-]{1,64}`.
pub fn validate_device_id(device_id: &str) -> Result<(), ApiError> {
    let valid = !device_id.is_empty()
        && device_id.len() <= MAX_DEVICE_ID_LEN
        && device_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("invalid deviceId: {device_id:?}")))
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub device_id: String,
    pub status: DeviceStatus,
    pub connection_name: Option<String>,
}

impl From<DeviceInfo> for DeviceView {
    fn from(info: DeviceInfo) -> Self {
        Self {
            device_id: info.device_id,
            status: info.status,
            connection_name: info.connection_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub connection_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    #[serde(flatten)]
    pub device: DeviceView,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
}

/// POST /whatsapp/connect
pub async fn post_connect(
    State(state): State<GatewayState>,
    Json(body): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let device_id = required("deviceId", body.device_id)?;
    validate_device_id(&device_id)?;

    let outcome = state
        .supervisor
        .connect(&device_id, body.connection_name)
        .await?;
    let message = match &outcome {
        ConnectOutcome::AlreadyActive(info) if info.status == DeviceStatus::Connected => {
            "already connected"
        }
        ConnectOutcome::AlreadyActive(_) => "connection already in progress",
        ConnectOutcome::Started(_) => "connection started",
    };
    let info = outcome.info().clone();
    let (qr, pairing_code) = match &info.pairing_challenge {
        Some(PairingChallenge::Qr(qr)) => (Some(qr.clone()), None),
        Some(PairingChallenge::Code(code)) => (None, Some(code.clone())),
        None => (None, None),
    };
    Ok(Json(ConnectResponse {
        device: info.into(),
        message,
        qr,
        pairing_code,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
}

/// GET /whatsapp/qr/{device_id}
pub async fn get_qr(
    State(state): State<GatewayState>,
    Path(device_id): Path<String>,
) -> Result<Json<QrResponse>, ApiError> {
    match state.supervisor.pairing_challenge(&device_id) {
        Some(PairingChallenge::Qr(qr)) => Ok(Json(QrResponse {
            qr: Some(qr),
            pairing_code: None,
        })),
        Some(PairingChallenge::Code(code)) => Ok(Json(QrResponse {
            qr: None,
            pairing_code: Some(code),
        })),
        None => Err(ApiError::NotFound(format!(
            "no pairing pending for device {device_id}"
        ))),
    }
}

/// GET /whatsapp/status/{device_id}
pub async fn get_status(
    State(state): State<GatewayState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceView>, ApiError> {
    state
        .supervisor
        .status(&device_id)
        .map(|info| Json(info.into()))
        .ok_or_else(|| ApiError::NotFound(format!("device not found: {device_id}")))
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceView>,
}

/// GET /whatsapp/devices
pub async fn get_devices(State(state): State<GatewayState>) -> Json<DeviceListResponse> {
    Json(DeviceListResponse {
        devices: state
            .supervisor
            .list_devices()
            .into_iter()
            .map(DeviceView::from)
            .collect(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeResponse {
    pub device_id: String,
    pub message: &'static str,
}

/// DELETE /whatsapp/devices/{device_id}/auth
pub async fn delete_device_auth(
    State(state): State<GatewayState>,
    Path(device_id): Path<String>,
) -> Result<Json<WipeResponse>, ApiError> {
    validate_device_id(&device_id)?;
    state.supervisor.disconnect_and_wipe(&device_id).await?;
    info!(device_id = %device_id, "device auth wiped via gateway");
    Ok(Json(WipeResponse {
        device_id,
        message: "session and auth state removed",
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub jid: String,
    pub message_id: Option<String>,
}

/// POST /whatsapp/send
///
/// Every send failure, including guard rejections, is a 500 carrying the
/// error detail.
pub async fn post_send(
    State(state): State<GatewayState>,
    Json(body): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let device_id = required("deviceId", body.device_id)?;
    let number = required("number", body.number)?;
    let message = OutboundMessage {
        text: body.message.unwrap_or_default(),
        image_url: body.image_url.filter(|u| !u.trim().is_empty()),
    };
    if message.text.trim().is_empty() && message.image_url.is_none() {
        return Err(ApiError::BadRequest("message is required".into()));
    }

    match state.supervisor.send(&device_id, &number, &message).await {
        Ok(receipt) => Ok(Json(SendResponse {
            success: true,
            jid: receipt.jid,
            message_id: receipt.message_id,
        })),
        Err(e) => {
            if !matches!(e, SendError::TooFrequent { .. }) {
                warn!(device_id = %device_id, error = %e, "gateway send failed");
            }
            Err(ApiError::Internal(e.to_string()))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdapterHealth {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub devices: usize,
    pub adapters: Vec<AdapterHealth>,
}

fn describe(health: Result<HealthStatus, wacast_core::WacastError>) -> String {
    match health {
        Ok(HealthStatus::Healthy) => "healthy".to_string(),
        Ok(HealthStatus::Degraded(reason)) => format!("degraded: {reason}"),
        Ok(HealthStatus::Unhealthy(reason)) => format!("unhealthy: {reason}"),
        Err(e) => format!("unhealthy: {e}"),
    }
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let mut adapters = Vec::with_capacity(state.adapters.len());
    for adapter in &state.adapters {
        adapters.push(AdapterHealth {
            name: adapter.name().to_string(),
            status: describe(adapter.health_check().await),
        });
    }
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        devices: state.supervisor.list_devices().len(),
        adapters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_are_restricted() {
        assert!(validate_device_id("shop-1_main").is_ok());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("../etc").is_err());
        assert!(validate_device_id("has space").is_err());
        assert!(validate_device_id(&"a".repeat(65)).is_err());
        assert!(validate_device_id(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn connect_response_flattens_device() {
        let body = ConnectResponse {
            device: DeviceView {
                device_id: "d1".into(),
                status: DeviceStatus::PendingPairing,
                connection_name: None,
            },
            message: "connection started",
            qr: Some("2@abc".into()),
            pairing_code: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["deviceId"], "d1");
        assert_eq!(json["status"], "pending_pairing");
        assert_eq!(json["qr"], "2@abc");
        assert!(json.get("pairingCode").is_none());
    }
}
