// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seam between the session supervisor and the protocol client.
//!
//! A transport opens one client per device. The client reports what happens
//! on the connection as a stream of [`TransportEvent`]s, which the supervisor
//! consumes from a single task per session.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::auth::{AuthBlob, AuthCategory};
use crate::error::WacastError;
use crate::traits::adapter::PluginAdapter;
use crate::traits::auth::KeyWrite;
use crate::types::{InboundMessage, OutboundMessage, PairingChallenge};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionUpdate {
    Open,
    /// `status` is the protocol close code, if any.
    Close { status: Option<u16> },
}

#[derive(Debug)]
pub enum TransportEvent {
    Pairing(PairingChallenge),
    Connection(ConnectionUpdate),
    /// New credentials. The transport must not treat them as committed until
    /// `ack` resolves `Ok`.
    CredsUpdated {
        creds: AuthBlob,
        ack: oneshot::Sender<Result<(), String>>,
    },
    MessageReceived(InboundMessage),
}

/// Key material access handed to the protocol layer.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Values for the requested ids; missing ids are absent from the map.
    async fn get(&self, category: AuthCategory, ids: &[String]) -> HashMap<String, AuthBlob>;

    async fn set(&self, writes: Vec<KeyWrite>) -> Result<(), WacastError>;
}

/// A freshly opened client plus its event stream.
pub struct TransportSession {
    pub client: Arc<dyn WaClient>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for protocol clients.
#[async_trait]
pub trait WaTransport: PluginAdapter {
    /// Starts a client for `device_id`, resuming from `creds` when present.
    async fn open(
        &self,
        device_id: &str,
        creds: Option<AuthBlob>,
        keys: Arc<dyn KeyStore>,
    ) -> Result<TransportSession, WacastError>;
}

/// One live protocol connection, exclusively owned by its device session.
#[async_trait]
pub trait WaClient: Send + Sync {
    /// Sends a message and returns the transport message id, if reported.
    async fn send_message(
        &self,
        jid: &str,
        message: &OutboundMessage,
    ) -> Result<Option<String>, WacastError>;

    /// Resolves whether `jid` has an account. `Some` carries the address to
    /// deliver to, which may differ from the input.
    async fn lookup(&self, jid: &str) -> Result<Option<String>, WacastError>;

    /// Unlinks the device on the remote side.
    async fn logout(&self) -> Result<(), WacastError>;

    /// Closes the connection without unlinking.
    async fn close(&self);
}
