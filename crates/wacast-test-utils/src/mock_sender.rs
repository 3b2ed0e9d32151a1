// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted outbound sender for dispatcher tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use wacast_core::{OutboundMessage, OutboundSender, SendError, SendReceipt};

/// One recorded call to [`MockSender::send`].
#[derive(Debug, Clone)]
pub struct SentCall {
    pub device_id: String,
    pub recipient: String,
    pub message: OutboundMessage,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    scripted: HashMap<String, VecDeque<SendError>>,
    connected: HashSet<String>,
    latency: Duration,
    calls: Vec<SentCall>,
}

/// Answers sends from a script: queued errors per recipient first, then
/// success. Devices must be marked connected or every send fails with
/// [`SendError::DeviceNotConnected`].
#[derive(Default)]
pub struct MockSender {
    state: Mutex<State>,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self, device_id: &str) {
        self.lock().connected.insert(device_id.to_string());
    }

    pub fn disconnect(&self, device_id: &str) {
        self.lock().connected.remove(device_id);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Queues `error` for the next send to `recipient`.
    pub fn fail(&self, recipient: &str, error: SendError) {
        self.lock()
            .scripted
            .entry(recipient.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<SentCall> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, recipient: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.recipient == recipient)
            .count()
    }
}

#[async_trait]
impl OutboundSender for MockSender {
    async fn send(
        &self,
        device_id: &str,
        recipient: &str,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(SentCall {
                device_id: device_id.to_string(),
                recipient: recipient.to_string(),
                message: message.clone(),
                at: Instant::now(),
            });
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if !state.connected.contains(device_id) {
            return Err(SendError::DeviceNotConnected);
        }
        if let Some(err) = state
            .scripted
            .get_mut(recipient)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        let n = state.calls.len();
        Ok(SendReceipt {
            jid: format!("{recipient}@s.whatsapp.net"),
            message_id: Some(format!("MSG-{n}")),
        })
    }
}
