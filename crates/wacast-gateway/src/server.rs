// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use wacast_config::model::GatewayConfig;
use wacast_core::{CampaignStore, PluginAdapter, WacastError};
use wacast_session::SessionSupervisor;

use crate::auth::{AuthConfig, auth_middleware};
use crate::{campaigns, handlers};

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub supervisor: SessionSupervisor,
    pub campaigns: Arc<dyn CampaignStore>,
    /// Adapters reported by `/health`.
    pub adapters: Vec<Arc<dyn PluginAdapter>>,
    pub auth: AuthConfig,
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(
        supervisor: SessionSupervisor,
        campaigns: Arc<dyn CampaignStore>,
        auth: AuthConfig,
    ) -> Self {
        Self {
            supervisor,
            campaigns,
            adapters: Vec::new(),
            auth,
            start_time: Instant::now(),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn PluginAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }
}

/// Builds the full router. `/health` is public; every other route goes
/// through the bearer check.
pub fn build_router(state: GatewayState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/whatsapp/connect", post(handlers::post_connect))
        .route("/whatsapp/qr/{device_id}", get(handlers::get_qr))
        .route("/whatsapp/status/{device_id}", get(handlers::get_status))
        .route("/whatsapp/devices", get(handlers::get_devices))
        .route(
            "/whatsapp/devices/{device_id}/auth",
            delete(handlers::delete_device_auth),
        )
        .route("/whatsapp/send", post(handlers::post_send))
        .route("/campaigns/{id}", get(campaigns::get_campaign))
        .route("/campaigns/{id}/pause", post(campaigns::pause_campaign))
        .route("/campaigns/{id}/resume", post(campaigns::resume_campaign))
        .route_layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serves the gateway until `cancel` fires, then drains in-flight requests.
pub async fn start_server(
    config: &GatewayConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), WacastError> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WacastError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| WacastError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway stopped");
    Ok(())
}
