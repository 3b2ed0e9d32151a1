// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign inspection and operator pause/resume.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use tracing::info;

use wacast_core::{Campaign, CampaignStatus, SendJob};

use crate::error::ApiError;
use crate::server::GatewayState;

#[derive(Debug, Serialize)]
pub struct CampaignDetail {
    pub campaign: Campaign,
    pub jobs: Vec<SendJob>,
}

#[derive(Debug, Serialize)]
pub struct CampaignStatusResponse {
    pub id: String,
    pub status: CampaignStatus,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Pause,
    Resume,
}

fn not_found(id: &str) -> ApiError {
    ApiError::NotFound(format!("campaign not found: {id}"))
}

/// GET /campaigns/{id}
pub async fn get_campaign(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<CampaignDetail>, ApiError> {
    let campaign = state
        .campaigns
        .get_campaign(&id)
        .await?
        .ok_or_else(|| not_found(&id))?;
    let jobs = state.campaigns.list_jobs(&id).await?;
    Ok(Json(CampaignDetail { campaign, jobs }))
}

/// POST /campaigns/{id}/pause
pub async fn pause_campaign(
    state: State<GatewayState>,
    id: Path<String>,
) -> Result<Json<CampaignStatusResponse>, ApiError> {
    transition(state, id, Action::Pause).await
}

/// POST /campaigns/{id}/resume
pub async fn resume_campaign(
    state: State<GatewayState>,
    id: Path<String>,
) -> Result<Json<CampaignStatusResponse>, ApiError> {
    transition(state, id, Action::Resume).await
}

async fn transition(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    action: Action,
) -> Result<Json<CampaignStatusResponse>, ApiError> {
    let changed = match action {
        Action::Pause => state.campaigns.pause_campaign(&id).await?,
        Action::Resume => state.campaigns.resume_campaign(&id).await?,
    };
    let campaign = state
        .campaigns
        .get_campaign(&id)
        .await?
        .ok_or_else(|| not_found(&id))?;
    if !changed {
        return Err(ApiError::Conflict(format!(
            "cannot {} campaign {id} in status {}",
            match action {
                Action::Pause => "pause",
                Action::Resume => "resume",
            },
            campaign.status
        )));
    }
    info!(campaign_id = %id, status = %campaign.status, ?action, "campaign status changed by operator");
    Ok(Json(CampaignStatusResponse {
        id,
        status: campaign.status,
    }))
}
