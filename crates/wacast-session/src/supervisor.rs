// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session supervisor: one protocol client per device.
//!
//! The registry maps device ids to session records. Every registry
//! transition happens under the map's per-key lock, and every record carries
//! a generation number. Background work (the event pump of a client, a
//! pending reconnect timer) only mutates the record while its generation is
//! still current, so a client replaced by a newer connect can never write
//! into its successor's state.
//!
//! ```text
//! none -> connecting -> pending_pairing -> connected
//!            ^                                 |
//!            |         (recoverable close)     v
//!            +--------- backoff ---------- reconnecting
//!
//! connected --(unrecoverable close)--> logged_out --(auth wiped)--> none
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wacast_core::traits::{ConnectionUpdate, TransportEvent, TransportSession};
use wacast_core::types::{CloseSeverity, DisconnectReason};
use wacast_core::{
    AuthStateStore, DeviceInfo, DeviceStatus, OutboundMessage, OutboundSender, PairingChallenge,
    SendError, SendReceipt, WaClient, WaTransport, WacastError,
};

use crate::auth::AuthState;
use crate::governor::{GovernorPolicy, ReconnectGovernor};
use crate::guard::SendGuard;

/// Result of a connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new client was started.
    Started(DeviceInfo),
    /// A live session already existed; nothing was started.
    AlreadyActive(DeviceInfo),
}

impl ConnectOutcome {
    pub fn info(&self) -> &DeviceInfo {
        match self {
            ConnectOutcome::Started(info) | ConnectOutcome::AlreadyActive(info) => info,
        }
    }

    pub fn already_active(&self) -> bool {
        matches!(self, ConnectOutcome::AlreadyActive(_))
    }
}

#[derive(Default)]
struct SessionTasks {
    pump: Option<AbortHandle>,
    timer: Option<AbortHandle>,
}

impl SessionTasks {
    fn abort(self) {
        for handle in [self.pump, self.timer].into_iter().flatten() {
            handle.abort();
        }
    }
}

struct DeviceSession {
    status: DeviceStatus,
    connection_name: Option<String>,
    pairing: Option<PairingChallenge>,
    client: Option<Arc<dyn WaClient>>,
    governor: ReconnectGovernor,
    generation: u64,
    tasks: SessionTasks,
    /// Set while auth state is being deleted. The record stays registered
    /// until the wipe finishes so no connect can load the old credentials.
    wiping: bool,
}

/// Client and tasks of a replaced or removed session, released outside the
/// registry lock.
struct Detached {
    client: Option<Arc<dyn WaClient>>,
    tasks: SessionTasks,
}

impl Detached {
    async fn release(self) {
        self.tasks.abort();
        if let Some(client) = self.client {
            client.close().await;
        }
    }
}

impl DeviceSession {
    fn new(generation: u64, connection_name: Option<String>, policy: GovernorPolicy) -> Self {
        Self {
            status: DeviceStatus::Connecting,
            connection_name,
            pairing: None,
            client: None,
            governor: ReconnectGovernor::new(policy),
            generation,
            tasks: SessionTasks::default(),
            wiping: false,
        }
    }

    fn tombstone(generation: u64, policy: GovernorPolicy) -> Self {
        let mut session = Self::new(generation, None, policy);
        session.status = DeviceStatus::LoggedOut;
        session.wiping = true;
        session
    }

    /// Marks the record as being wiped under a new generation.
    fn begin_wipe(&mut self, generation: u64) -> Detached {
        self.status = DeviceStatus::LoggedOut;
        self.pairing = None;
        self.generation = generation;
        self.wiping = true;
        self.detach()
    }

    fn info(&self, device_id: &str) -> DeviceInfo {
        DeviceInfo {
            device_id: device_id.to_string(),
            status: self.status,
            connection_name: self.connection_name.clone(),
            pairing_challenge: self.pairing.clone(),
        }
    }

    fn detach(&mut self) -> Detached {
        Detached {
            client: self.client.take(),
            tasks: std::mem::take(&mut self.tasks),
        }
    }

    /// Moves a dead record back to `connecting` under a new generation.
    fn restart(&mut self, generation: u64, connection_name: Option<String>) -> Detached {
        self.status = DeviceStatus::Connecting;
        self.pairing = None;
        self.generation = generation;
        if connection_name.is_some() {
            self.connection_name = connection_name;
        }
        self.detach()
    }
}

struct Inner {
    sessions: DashMap<String, DeviceSession>,
    transport: Arc<dyn WaTransport>,
    auth: AuthState,
    guard: SendGuard,
    policy: GovernorPolicy,
    generations: AtomicU64,
    cancel: CancellationToken,
}

/// Owns every device session. Cheap to clone.
#[derive(Clone)]
pub struct SessionSupervisor {
    inner: Arc<Inner>,
}

impl SessionSupervisor {
    pub fn new(
        transport: Arc<dyn WaTransport>,
        store: Arc<dyn AuthStateStore>,
        guard: SendGuard,
        policy: GovernorPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                transport,
                auth: AuthState::new(store),
                guard,
                policy,
                generations: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn auth(&self) -> &AuthState {
        &self.inner.auth
    }

    pub fn guard(&self) -> &SendGuard {
        &self.inner.guard
    }

    /// Starts a session for `device_id` unless a live one exists.
    ///
    /// Concurrent calls for one device start at most one client. A dead
    /// record (reconnecting or logged out) is replaced; its old client is
    /// closed before the new one opens. Fails with
    /// [`WacastError::InvalidTransition`] while the device's auth state is
    /// being wiped.
    pub async fn connect(
        &self,
        device_id: &str,
        connection_name: Option<String>,
    ) -> Result<ConnectOutcome, WacastError> {
        if self.inner.cancel.is_cancelled() {
            return Err(WacastError::Internal("session supervisor is shut down".into()));
        }
        let generation = self.inner.next_generation();

        let (info, stale) = match self.inner.sessions.entry(device_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                if session.wiping {
                    return Err(wipe_in_progress(device_id));
                }
                if session.status.is_live() {
                    debug!(device_id, status = %session.status, "session already active");
                    return Ok(ConnectOutcome::AlreadyActive(session.info(device_id)));
                }
                let stale = session.restart(generation, connection_name);
                (session.info(device_id), Some(stale))
            }
            Entry::Vacant(entry) => {
                let session =
                    DeviceSession::new(generation, connection_name, self.inner.policy.clone());
                let info = session.info(device_id);
                entry.insert(session);
                (info, None)
            }
        };

        if let Some(stale) = stale {
            stale.release().await;
        }
        info!(device_id, generation, "starting device session");
        self.inner.start(device_id, generation).await?;
        Ok(ConnectOutcome::Started(self.status(device_id).unwrap_or(info)))
    }

    pub fn status(&self, device_id: &str) -> Option<DeviceInfo> {
        self.inner
            .sessions
            .get(device_id)
            .map(|s| s.info(device_id))
    }

    pub fn pairing_challenge(&self, device_id: &str) -> Option<PairingChallenge> {
        self.inner
            .sessions
            .get(device_id)
            .and_then(|s| s.pairing.clone())
    }

    /// Snapshot of every registered device, ordered by id.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().info(entry.key()))
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Logs the device out, closes its client and deletes its auth state.
    ///
    /// A failing logout is logged; local state is removed regardless. Safe
    /// to call for a device with no session. The device stays registered as
    /// `logged_out` until the wipe completes, and connects for it fail in
    /// the meantime.
    pub async fn disconnect_and_wipe(&self, device_id: &str) -> Result<(), WacastError> {
        let generation = self.inner.next_generation();
        let detached = match self.inner.sessions.entry(device_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                if session.wiping {
                    return Err(wipe_in_progress(device_id));
                }
                Some(session.begin_wipe(generation))
            }
            Entry::Vacant(entry) => {
                entry.insert(DeviceSession::tombstone(
                    generation,
                    self.inner.policy.clone(),
                ));
                None
            }
        };

        if let Some(Detached { client, tasks }) = detached {
            tasks.abort();
            if let Some(client) = client {
                if let Err(e) = client.logout().await {
                    warn!(device_id, error = %e, "logout failed, wiping local state anyway");
                }
                client.close().await;
            }
        }
        self.inner.guard.forget_device(device_id);
        let wiped = self.inner.auth.wipe(device_id).await;
        self.inner
            .sessions
            .remove_if(device_id, |_, s| s.generation == generation);
        wiped?;
        info!(device_id, "device disconnected and wiped");
        Ok(())
    }

    /// Guarded send through the device's connected client.
    pub async fn send(
        &self,
        device_id: &str,
        recipient: &str,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError> {
        let client = self
            .inner
            .sessions
            .get(device_id)
            .and_then(|s| match s.status {
                DeviceStatus::Connected => s.client.clone(),
                _ => None,
            })
            .ok_or(SendError::DeviceNotConnected)?;
        self.inner
            .guard
            .send(device_id, client, recipient, message)
            .await
    }

    /// Reconnects every remembered device whose credentials are linked.
    ///
    /// Returns how many sessions were started. Individual failures are
    /// logged; the governor keeps retrying them.
    pub async fn restore(&self) -> Result<usize, WacastError> {
        let mut started = 0;
        for device in self.inner.auth.store().remembered_devices().await? {
            if !self.inner.auth.creds_valid(&device.device_id).await {
                debug!(device_id = %device.device_id, "skipping restore, credentials not linked");
                continue;
            }
            match self.connect(&device.device_id, device.connection_name).await {
                Ok(_) => started += 1,
                Err(e) => {
                    warn!(device_id = %device.device_id, error = %e, "session restore failed")
                }
            }
        }
        info!(started, "device sessions restored");
        Ok(started)
    }

    /// Wipes auth state of devices that never finished pairing and have no
    /// session in this process.
    pub async fn prune_auth(&self, dry_run: bool) -> Result<Vec<String>, WacastError> {
        let live: HashSet<String> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        self.inner.auth.prune_invalid(&live, dry_run).await
    }

    /// Closes every client without logging out; credentials stay stored.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let ids: Vec<String> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            if let Some((_, mut session)) = self.inner.sessions.remove(&id) {
                session.detach().release().await;
            }
        }
        info!("session supervisor stopped");
    }
}

fn wipe_in_progress(device_id: &str) -> WacastError {
    WacastError::InvalidTransition {
        entity: "device",
        id: device_id.to_string(),
        detail: "auth state is being wiped".into(),
    }
}

#[async_trait]
impl OutboundSender for SessionSupervisor {
    async fn send(
        &self,
        device_id: &str,
        recipient: &str,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError> {
        SessionSupervisor::send(self, device_id, recipient, message).await
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Applies `f` to the record only if `generation` is still current.
    fn update_current<R>(
        &self,
        device_id: &str,
        generation: u64,
        f: impl FnOnce(&mut DeviceSession) -> R,
    ) -> Option<R> {
        let mut session = self.sessions.get_mut(device_id)?;
        (session.generation == generation).then(|| f(&mut session))
    }

    fn is_current(&self, device_id: &str, generation: u64) -> bool {
        self.sessions
            .get(device_id)
            .is_some_and(|s| s.generation == generation)
    }

    /// Opens a transport client for a record already in `connecting`.
    async fn start(self: &Arc<Self>, device_id: &str, generation: u64) -> Result<(), WacastError> {
        let name = self
            .sessions
            .get(device_id)
            .and_then(|s| s.connection_name.clone());
        if let Err(e) = self
            .auth
            .store()
            .remember_device(device_id, name.as_deref())
            .await
        {
            warn!(device_id, error = %e, "failed to record device for restore");
        }

        let creds = self.auth.load_creds(device_id).await;
        let keys = self.auth.keys_for(device_id);
        let TransportSession { client, events } =
            match self.transport.open(device_id, creds, keys).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(device_id, error = %e, "transport open failed");
                    self.schedule_reconnect(device_id, generation).await;
                    return Err(e);
                }
            };

        let installed = self
            .update_current(device_id, generation, |s| s.client = Some(client.clone()))
            .is_some();
        if !installed {
            debug!(device_id, generation, "session superseded during open");
            client.close().await;
            return Ok(());
        }

        let pump = tokio::spawn(Arc::clone(self).pump(device_id.to_string(), generation, events));
        let mut handle = Some(pump.abort_handle());
        self.update_current(device_id, generation, |s| s.tasks.pump = handle.take());
        if let Some(orphan) = handle {
            orphan.abort();
        }
        Ok(())
    }

    async fn pump(
        self: Arc<Self>,
        device_id: String,
        generation: u64,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.is_current(&device_id, generation) {
                return;
            }
            match event {
                TransportEvent::Pairing(challenge) => {
                    self.update_current(&device_id, generation, |s| {
                        s.status = DeviceStatus::PendingPairing;
                        s.pairing = Some(challenge);
                    });
                    info!(device_id = %device_id, "pairing challenge issued");
                }
                TransportEvent::Connection(ConnectionUpdate::Open) => {
                    self.update_current(&device_id, generation, |s| {
                        s.status = DeviceStatus::Connected;
                        s.pairing = None;
                        s.governor.on_connected();
                    });
                    info!(device_id = %device_id, "device connected");
                }
                TransportEvent::Connection(ConnectionUpdate::Close { status }) => {
                    let reason = DisconnectReason::from_status(status);
                    self.handle_close(&device_id, generation, reason).await;
                    return;
                }
                TransportEvent::CredsUpdated { creds, ack } => {
                    let result = self.auth.save_creds(&device_id, &creds).await.map_err(|e| {
                        error!(device_id = %device_id, error = %e, "failed to persist credentials");
                        e.to_string()
                    });
                    let _ = ack.send(result);
                }
                TransportEvent::MessageReceived(msg) => {
                    debug!(
                        device_id = %device_id,
                        from = %msg.from,
                        message_id = %msg.id,
                        has_text = msg.text.is_some(),
                        "inbound message"
                    );
                }
            }
        }

        if self.is_current(&device_id, generation) {
            self.handle_close(&device_id, generation, DisconnectReason::ConnectionLost)
                .await;
        }
    }

    /// Runs on the pump task of the closing client.
    async fn handle_close(
        self: &Arc<Self>,
        device_id: &str,
        generation: u64,
        reason: DisconnectReason,
    ) {
        // The pump is the running task; forget its handle rather than abort it.
        if self
            .update_current(device_id, generation, |s| s.tasks.pump = None)
            .is_none()
        {
            return;
        }

        let severity = match reason.severity() {
            CloseSeverity::CheckCredentials if self.auth.creds_valid(device_id).await => {
                CloseSeverity::Recoverable
            }
            CloseSeverity::CheckCredentials => CloseSeverity::Unrecoverable,
            other => other,
        };

        match severity {
            CloseSeverity::Recoverable => {
                info!(device_id, %reason, "connection closed");
                self.schedule_reconnect(device_id, generation).await;
            }
            _ => self.log_out(device_id, generation, reason).await,
        }
    }

    async fn log_out(&self, device_id: &str, generation: u64, reason: DisconnectReason) {
        let Some(client) = self.update_current(device_id, generation, |s| {
            s.status = DeviceStatus::LoggedOut;
            s.pairing = None;
            s.wiping = true;
            s.client.take()
        }) else {
            return;
        };
        if let Some(client) = client {
            client.close().await;
        }

        warn!(device_id, %reason, "device logged out, wiping auth state");
        if let Err(e) = self.auth.wipe(device_id).await {
            error!(device_id, error = %e, "auth wipe after logout failed");
        }
        self.guard.forget_device(device_id);
        self.sessions
            .remove_if(device_id, |_, s| s.generation == generation);
    }

    async fn schedule_reconnect(self: &Arc<Self>, device_id: &str, generation: u64) {
        let now = Instant::now();
        let Some((delay, client, attempts, parked)) =
            self.update_current(device_id, generation, |s| {
                s.status = DeviceStatus::Reconnecting;
                s.pairing = None;
                let delay = s.governor.on_disconnect(now);
                (delay, s.client.take(), s.governor.attempts(), s.governor.is_parked())
            })
        else {
            return;
        };
        if let Some(client) = client {
            client.close().await;
        }

        if parked {
            warn!(
                device_id,
                attempts,
                delay_secs = delay.as_secs(),
                "reconnect attempts exhausted, retrying on parked interval"
            );
        } else {
            info!(
                device_id,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
        }

        let mut timer = Some(self.spawn_reconnect(device_id, generation, delay));
        self.update_current(device_id, generation, |s| s.tasks.timer = timer.take());
        if let Some(orphan) = timer {
            orphan.abort();
        }
    }

    fn spawn_reconnect(
        self: &Arc<Self>,
        device_id: &str,
        generation: u64,
        delay: Duration,
    ) -> AbortHandle {
        let inner = Arc::clone(self);
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => inner.reconnect(device_id, generation).await,
                _ = inner.cancel.cancelled() => {}
            }
        })
        .abort_handle()
    }

    fn reconnect(self: Arc<Self>, device_id: String, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let next = self.next_generation();
            let resumed = self.update_current(&device_id, generation, |s| {
                // This timer is the running task.
                s.tasks.timer = None;
                s.status = DeviceStatus::Connecting;
                s.generation = next;
            });
            if resumed.is_none() {
                return;
            }
            debug!(device_id = %device_id, generation = next, "reconnecting");
            if let Err(e) = self.start(&device_id, next).await {
                debug!(device_id = %device_id, error = %e, "reconnect attempt failed");
            }
        })
    }
}
