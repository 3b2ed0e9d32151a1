// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam between campaign dispatch and device sessions.

use async_trait::async_trait;

use crate::error::SendError;
use crate::types::{OutboundMessage, SendReceipt};

/// Sends one message through a device's live session.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Fails fast with [`SendError::DeviceNotConnected`] when the device has
    /// no connected session.
    async fn send(
        &self,
        device_id: &str,
        recipient: &str,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError>;
}
