// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::info;

use wacast_config::model::BridgeConfig;
use wacast_core::traits::TransportSession;
use wacast_core::types::{AdapterType, HealthStatus};
use wacast_core::{AuthBlob, KeyStore, PluginAdapter, WaTransport, WacastError};

use crate::connection;

/// Opens one sidecar WebSocket per device at `{url}/devices/{device_id}`.
pub struct BridgeTransport {
    config: BridgeConfig,
}

impl BridgeTransport {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    fn device_url(&self, device_id: &str) -> String {
        format!(
            "{}/devices/{}",
            self.config.url.trim_end_matches('/'),
            device_id
        )
    }
}

fn transport_err(message: &str, e: impl std::error::Error + Send + Sync + 'static) -> WacastError {
    WacastError::Transport {
        message: format!("{message}: {e}"),
        status: None,
        source: Some(Box::new(e)),
    }
}

#[async_trait]
impl PluginAdapter for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Transport
    }

    async fn health_check(&self) -> Result<HealthStatus, WacastError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), WacastError> {
        Ok(())
    }
}

#[async_trait]
impl WaTransport for BridgeTransport {
    async fn open(
        &self,
        device_id: &str,
        creds: Option<AuthBlob>,
        keys: Arc<dyn KeyStore>,
    ) -> Result<TransportSession, WacastError> {
        let url = self.device_url(device_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| transport_err("invalid bridge url", e))?;
        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| transport_err("invalid bridge api key", e))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let (ws, _) = tokio::time::timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| WacastError::Timeout {
                duration: connect_timeout,
            })?
            .map_err(|e| transport_err("bridge connect failed", e))?;

        let (client, events) = connection::spawn(
            device_id,
            ws,
            keys,
            Duration::from_secs(self.config.request_timeout_secs),
        );
        client.start(creds).await?;
        info!(device_id, %url, "bridge connection opened");

        Ok(TransportSession {
            client: Arc::new(client),
            events,
        })
    }
}
