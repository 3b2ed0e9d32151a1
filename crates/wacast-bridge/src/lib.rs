// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp transport backed by a protocol sidecar.
//!
//! The sidecar runs the actual WhatsApp client. wacast talks to it over one
//! WebSocket per device using the JSON frames in [`protocol`]; credentials
//! and signal keys stay in the wacast auth store and are served to the
//! sidecar on demand.

pub mod connection;
pub mod protocol;
pub mod transport;

pub use connection::BridgeClient;
pub use transport::BridgeTransport;
