// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for wacast.
//!
//! Holds the error types, domain types, phone normalization and the adapter
//! traits that storage and protocol transports implement.

pub mod auth;
pub mod error;
pub mod phone;
pub mod traits;
pub mod types;

pub use auth::{AuthBlob, AuthCategory};
pub use error::{SendError, WacastError};
pub use phone::PhoneRules;
pub use types::{
    AdapterType, Campaign, CampaignStatus, DeviceInfo, DeviceStatus, HealthStatus, JobOutcome,
    JobStatus, OutboundMessage, PairingChallenge, SendJob, SendReceipt,
};

pub use traits::{
    AuthStateStore, CampaignStore, KeyStore, OutboundSender, PluginAdapter, StorageAdapter, WaClient,
    WaTransport,
};
