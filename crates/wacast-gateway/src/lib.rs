// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway for wacast.
//!
//! Exposes device pairing, status, wipe and ad-hoc sends under
//! `/whatsapp`, campaign inspection and pause/resume under `/campaigns`,
//! and an unauthenticated `/health`. JSON bodies use camelCase keys.

pub mod auth;
pub mod campaigns;
pub mod error;
pub mod handlers;
pub mod server;

pub use auth::AuthConfig;
pub use error::{ApiError, ErrorResponse};
pub use server::{GatewayState, build_router, start_server};
