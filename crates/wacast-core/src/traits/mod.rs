// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions.
//!
//! Storage and transport adapters extend the [`PluginAdapter`] base trait and
//! use `#[async_trait]` for dynamic dispatch.

pub mod adapter;
pub mod auth;
pub mod campaign;
pub mod sender;
pub mod storage;
pub mod transport;

pub use adapter::PluginAdapter;
pub use auth::{AuthStateStore, KeyWrite, RememberedDevice};
pub use campaign::CampaignStore;
pub use sender::OutboundSender;
pub use storage::StorageAdapter;
pub use transport::{
    ConnectionUpdate, KeyStore, TransportEvent, TransportSession, WaClient, WaTransport,
};
