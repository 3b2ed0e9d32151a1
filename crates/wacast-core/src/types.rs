// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the supervisor, dispatcher, storage and gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`crate::PluginAdapter`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    /// SQLite-backed persistence.
    Storage,
    /// Protocol bridge to WhatsApp.
    Transport,
}

// --- Device sessions ---

/// Lifecycle state of one device session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceStatus {
    /// A client is being opened.
    Connecting,
    /// Waiting for the user to scan a QR code or enter a pairing code.
    PendingPairing,
    /// Linked and able to send.
    Connected,
    /// The connection dropped; the governor will retry.
    Reconnecting,
    /// Unlinked; auth state is wiped or about to be.
    LoggedOut,
}

impl DeviceStatus {
    /// States in which a connect request must not start another client.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            DeviceStatus::Connecting | DeviceStatus::PendingPairing | DeviceStatus::Connected
        )
    }
}

/// Artifact a user scans or types to link a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PairingChallenge {
    /// Payload to render as a QR code.
    Qr(String),
    /// Code the user types on the phone.
    Code(String),
}

impl PairingChallenge {
    /// The raw QR payload or pairing code.
    pub fn payload(&self) -> &str {
        match self {
            PairingChallenge::Qr(s) | PairingChallenge::Code(s) => s,
        }
    }
}

/// Snapshot of a device as seen by callers of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub status: DeviceStatus,
    /// Display name given when the device was connected.
    pub connection_name: Option<String>,
    /// Current challenge while `status` is `PendingPairing`.
    pub pairing_challenge: Option<PairingChallenge>,
}

/// How the supervisor must react to a transport close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseSeverity {
    /// Reconnect with backoff.
    Recoverable,
    /// Reconnect only if the stored credentials still look valid.
    CheckCredentials,
    /// The device is gone; wipe and re-pair.
    Unrecoverable,
}

/// Reason a protocol connection closed, decoded from the protocol status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    TimedOut,
    LoggedOut,
    Forbidden,
    BadSession,
    MultideviceMismatch,
    RestartRequired,
    ServiceUnavailable,
    Unknown(u16),
}

impl DisconnectReason {
    /// Decodes a close status; `None` means the socket dropped without one.
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(428) => DisconnectReason::ConnectionClosed,
            Some(408) => DisconnectReason::TimedOut,
            Some(440) => DisconnectReason::ConnectionReplaced,
            Some(401) => DisconnectReason::LoggedOut,
            Some(403) => DisconnectReason::Forbidden,
            Some(500) => DisconnectReason::BadSession,
            Some(411) => DisconnectReason::MultideviceMismatch,
            Some(515) => DisconnectReason::RestartRequired,
            Some(503) => DisconnectReason::ServiceUnavailable,
            Some(code) => DisconnectReason::Unknown(code),
            None => DisconnectReason::ConnectionLost,
        }
    }

    pub fn severity(self) -> CloseSeverity {
        match self {
            DisconnectReason::LoggedOut | DisconnectReason::Forbidden => {
                CloseSeverity::Unrecoverable
            }
            DisconnectReason::BadSession | DisconnectReason::MultideviceMismatch => {
                CloseSeverity::CheckCredentials
            }
            _ => CloseSeverity::Recoverable,
        }
    }
}

// --- Messages ---

/// Body of one outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    /// When set, the message is an image with `text` as caption.
    pub image_url: Option<String>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_url: None,
        }
    }
}

/// Result of a successful guarded send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    /// Address the message was delivered to.
    pub jid: String,
    pub message_id: Option<String>,
}

/// Message received by a device, reported for logging only.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Sender jid.
    pub from: String,
    /// Protocol message id.
    pub id: String,
    /// Text body, if the message carried one.
    pub text: Option<String>,
}

// --- Campaigns ---

/// Campaign lifecycle status as stored in the `campaigns` table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum CampaignStatus {
    /// Created but not submitted; the dispatcher ignores it.
    Draft,
    /// Waiting for `scheduled_at`.
    Scheduled,
    /// Claimed by a dispatcher and sending.
    InProgress,
    /// Stopped by the user; remaining jobs stay scheduled.
    Paused,
    /// Every job succeeded.
    Completed,
    /// Some jobs succeeded and some failed.
    PartiallyCompleted,
    /// No job succeeded, or the recipient list was missing.
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::PartiallyCompleted | CampaignStatus::Failed
        )
    }

    /// Folds job outcome counts into the terminal campaign status.
    pub fn from_outcomes(successes: usize, errors: usize) -> Self {
        if errors == 0 {
            CampaignStatus::Completed
        } else if successes == 0 {
            CampaignStatus::Failed
        } else {
            CampaignStatus::PartiallyCompleted
        }
    }
}

/// A message campaign addressed to one recipient list through one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    /// Device the campaign sends through.
    pub device_id: String,
    pub name: String,
    /// Message body, or image caption when `image_url` is set.
    pub text: String,
    pub image_url: Option<String>,
    pub recipient_list_id: String,
    /// Raw configured pause between sends; see [`Campaign::effective_delay_secs`].
    pub delay_seconds: i64,
    /// Earliest time the dispatcher may start it.
    pub scheduled_at: DateTime<Utc>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the campaign reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Pause between sends, with invalid or zero values replaced by `default_secs`.
    pub fn effective_delay_secs(&self, default_secs: u64) -> u64 {
        if self.delay_seconds >= 1 {
            self.delay_seconds as u64
        } else {
            default_secs.max(1)
        }
    }

    pub fn message(&self) -> OutboundMessage {
        OutboundMessage {
            text: self.text.clone(),
            image_url: self.image_url.clone(),
        }
    }
}

/// Input for creating a campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub device_id: String,
    pub name: String,
    pub text: String,
    pub image_url: Option<String>,
    pub recipient_list_id: String,
    pub delay_seconds: i64,
    pub scheduled_at: DateTime<Utc>,
    pub status: CampaignStatus,
}

/// One raw contact entry; `phone` is free-form local format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
}

/// Named set of contacts a campaign sends to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientList {
    pub id: String,
    pub name: String,
    pub contacts: Vec<Contact>,
}

// --- Send jobs ---

/// State of one send job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum JobStatus {
    /// Not yet attempted.
    Scheduled,
    /// Delivered to the protocol.
    #[strum(serialize = "success")]
    #[serde(rename = "success")]
    Success,
    /// Failed for good; `error_detail` says why.
    #[strum(serialize = "error")]
    #[serde(rename = "error")]
    Error,
}

/// One recipient's pending or resolved send within a campaign.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendJob {
    pub id: i64,
    pub campaign_id: String,
    /// Order within the recipient list.
    pub position: i64,
    pub recipient_name: Option<String>,
    /// Normalized phone number.
    pub recipient_phone: String,
    pub status: JobStatus,
    /// Failure reason for `Error` jobs.
    pub error_detail: Option<String>,
    /// Protocol message id for `Success` jobs.
    pub message_id: Option<String>,
    /// Send attempts made, retries included.
    pub attempts: u32,
    /// When the job resolved, success or error.
    pub sent_at: Option<DateTime<Utc>>,
}

/// A job to create: one per normalized-unique recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSendJob {
    pub position: i64,
    pub recipient_name: Option<String>,
    pub recipient_phone: String,
}

/// Terminal result recorded on a job row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The message was accepted.
    Success {
        /// Id assigned by the protocol, if it returned one.
        message_id: Option<String>,
        /// Attempts it took.
        attempts: u32,
    },
    /// The job failed permanently or ran out of attempts.
    Error {
        /// Last error, stored as the job's `error_detail`.
        detail: String,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Success { .. } => JobStatus::Success,
            JobOutcome::Error { .. } => JobStatus::Error,
        }
    }
}
