// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock protocol transport for deterministic session tests.
//!
//! `MockTransport` hands out a [`MockClient`] and an event channel per
//! `open`. By default a session opened with linked credentials reports
//! `Open` immediately and one opened without them issues a QR challenge.
//! Tests drive everything else through [`MockTransport::emit`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use wacast_core::auth::creds_are_valid;
use wacast_core::traits::{ConnectionUpdate, TransportEvent, TransportSession};
use wacast_core::{
    AdapterType, AuthBlob, HealthStatus, KeyStore, OutboundMessage, PairingChallenge,
    PluginAdapter, WaClient, WaTransport, WacastError,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ClientState {
    latency: Duration,
    missing: HashSet<String>,
    resolved: HashMap<String, String>,
    failures: VecDeque<Option<u16>>,
    sent: Vec<String>,
    fail_logout: bool,
    logout_latency: Duration,
}

/// A mock protocol client that records sends.
#[derive(Default)]
pub struct MockClient {
    pub sends: AtomicUsize,
    pub lookups: AtomicUsize,
    pub logouts: AtomicUsize,
    closed: AtomicBool,
    state: Mutex<ClientState>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every send.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// Makes `lookup(jid)` report that no account exists.
    pub fn mark_missing(&self, jid: &str) {
        lock(&self.state).missing.insert(jid.to_string());
    }

    /// Makes `lookup(jid)` answer with a different canonical address.
    pub fn resolve_as(&self, jid: &str, resolved: &str) {
        lock(&self.state)
            .resolved
            .insert(jid.to_string(), resolved.to_string());
    }

    /// The next `count` sends fail with a transport error carrying `status`.
    pub fn fail_next_sends(&self, count: usize, status: Option<u16>) {
        let mut state = lock(&self.state);
        state.failures.extend(std::iter::repeat_n(status, count));
    }

    pub fn fail_logout(&self, fail: bool) {
        lock(&self.state).fail_logout = fail;
    }

    /// Delay applied to `logout`.
    pub fn set_logout_latency(&self, latency: Duration) {
        lock(&self.state).logout_latency = latency;
    }

    /// Addresses successfully sent to, in order.
    pub fn sent_to(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WaClient for MockClient {
    async fn send_message(
        &self,
        jid: &str,
        _message: &OutboundMessage,
    ) -> Result<Option<String>, WacastError> {
        let latency = lock(&self.state).latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.is_closed() {
            return Err(WacastError::transport("client closed"));
        }
        let mut state = lock(&self.state);
        if let Some(status) = state.failures.pop_front() {
            return Err(WacastError::Transport {
                message: "mock send failure".into(),
                status,
                source: None,
            });
        }
        state.sent.push(jid.to_string());
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("MSG-{n}")))
    }

    async fn lookup(&self, jid: &str) -> Result<Option<String>, WacastError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let state = lock(&self.state);
        if state.missing.contains(jid) {
            return Ok(None);
        }
        Ok(Some(
            state
                .resolved
                .get(jid)
                .cloned()
                .unwrap_or_else(|| jid.to_string()),
        ))
    }

    async fn logout(&self) -> Result<(), WacastError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        let latency = lock(&self.state).logout_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if lock(&self.state).fail_logout {
            return Err(WacastError::transport("mock logout failure"));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct OpenedSession {
    client: Arc<MockClient>,
    events: mpsc::Sender<TransportEvent>,
    keys: Arc<dyn KeyStore>,
    creds: Option<AuthBlob>,
}

#[derive(Default)]
struct TransportState {
    sessions: HashMap<String, OpenedSession>,
    opens: HashMap<String, usize>,
    failing_opens: usize,
}

/// A mock transport adapter.
pub struct MockTransport {
    auto_events: bool,
    state: Mutex<TransportState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            auto_events: true,
            state: Mutex::new(TransportState::default()),
        }
    }

    /// A transport that emits nothing on its own.
    pub fn silent() -> Self {
        Self {
            auto_events: false,
            ..Self::new()
        }
    }

    /// The next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.state).failing_opens += count;
    }

    /// Number of successful and failed `open` calls for a device.
    pub fn opens(&self, device_id: &str) -> usize {
        lock(&self.state)
            .opens
            .get(device_id)
            .copied()
            .unwrap_or_default()
    }

    /// Client of the most recent session for a device.
    pub fn client(&self, device_id: &str) -> Option<Arc<MockClient>> {
        lock(&self.state)
            .sessions
            .get(device_id)
            .map(|s| s.client.clone())
    }

    pub fn keys(&self, device_id: &str) -> Option<Arc<dyn KeyStore>> {
        lock(&self.state)
            .sessions
            .get(device_id)
            .map(|s| s.keys.clone())
    }

    /// Credentials passed to the most recent `open` for a device.
    pub fn opened_with(&self, device_id: &str) -> Option<AuthBlob> {
        lock(&self.state)
            .sessions
            .get(device_id)
            .and_then(|s| s.creds.clone())
    }

    /// Pushes an event into the device's most recent session.
    ///
    /// Returns `false` when the session's receiver is gone.
    pub async fn emit(&self, device_id: &str, event: TransportEvent) -> bool {
        let sender = lock(&self.state)
            .sessions
            .get(device_id)
            .map(|s| s.events.clone());
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn close(&self, device_id: &str, status: Option<u16>) -> bool {
        self.emit(
            device_id,
            TransportEvent::Connection(ConnectionUpdate::Close { status }),
        )
        .await
    }

    /// Completes pairing: persists linked credentials through the
    /// supervisor, then reports the connection open.
    pub async fn pair(&self, device_id: &str, account: &str) -> Result<(), String> {
        let (ack, done) = oneshot::channel();
        let creds = AuthBlob(json!({
            "me": {"id": format!("{account}:1@s.whatsapp.net")},
            "registered": true,
        }));
        if !self
            .emit(device_id, TransportEvent::CredsUpdated { creds, ack })
            .await
        {
            return Err("session closed".into());
        }
        done.await.map_err(|_| "ack dropped".to_string())??;
        self.emit(device_id, TransportEvent::Connection(ConnectionUpdate::Open))
            .await;
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockTransport {
    fn name(&self) -> &str {
        "mock-transport"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Transport
    }

    async fn health_check(&self) -> Result<HealthStatus, WacastError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), WacastError> {
        Ok(())
    }
}

#[async_trait]
impl WaTransport for MockTransport {
    async fn open(
        &self,
        device_id: &str,
        creds: Option<AuthBlob>,
        keys: Arc<dyn KeyStore>,
    ) -> Result<TransportSession, WacastError> {
        let mut state = lock(&self.state);
        let n = {
            let count = state.opens.entry(device_id.to_string()).or_default();
            *count += 1;
            *count
        };
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(WacastError::transport("mock open failure"));
        }

        let (tx, rx) = mpsc::channel(64);
        if self.auto_events {
            let first = if creds_are_valid(creds.as_ref()) {
                TransportEvent::Connection(ConnectionUpdate::Open)
            } else {
                TransportEvent::Pairing(PairingChallenge::Qr(format!("qr-{device_id}-{n}")))
            };
            // Fresh channel with capacity; cannot be full.
            let _ = tx.try_send(first);
        }

        let client = Arc::new(MockClient::new());
        state.sessions.insert(
            device_id.to_string(),
            OpenedSession {
                client: client.clone(),
                events: tx,
                keys,
                creds,
            },
        );
        Ok(TransportSession {
            client,
            events: rx,
        })
    }
}
