// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One WebSocket connection to the sidecar, driven by a writer task and a
//! reader task.
//!
//! The writer drains an mpsc channel of outbound frames. The reader handles
//! inbound frames in arrival order: key and credential callbacks are served
//! inline, replies are routed to the waiting request, and everything else
//! becomes a [`TransportEvent`]. A socket that ends without a reported close
//! is surfaced as a recoverable close.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use wacast_core::traits::{ConnectionUpdate, KeyStore, KeyWrite, TransportEvent};
use wacast_core::types::InboundMessage;
use wacast_core::{AuthBlob, OutboundMessage, PairingChallenge, WaClient, WacastError};

use crate::protocol::{ConnectionState, FromSidecar, ToSidecar, category_from_wire};

const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 64;

/// Close status reported when the socket ends without the sidecar saying
/// why. Classified as recoverable.
const SOCKET_DROPPED_STATUS: u16 = 428;

type Pending = Arc<DashMap<String, oneshot::Sender<FromSidecar>>>;

/// Client half of a sidecar connection.
pub struct BridgeClient {
    device_id: String,
    outbound: mpsc::Sender<ToSidecar>,
    pending: Pending,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl BridgeClient {
    async fn request(
        &self,
        build: impl FnOnce(String) -> ToSidecar,
    ) -> Result<FromSidecar, WacastError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        if self.outbound.send(build(request_id.clone())).await.is_err() {
            self.pending.remove(&request_id);
            return Err(WacastError::transport("bridge connection closed"));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(WacastError::transport("bridge connection closed")),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(WacastError::Timeout {
                    duration: self.request_timeout,
                })
            }
        }
    }

    pub(crate) async fn start(&self, creds: Option<AuthBlob>) -> Result<(), WacastError> {
        self.outbound
            .send(ToSidecar::Start {
                creds: creds.map(|c| c.0),
            })
            .await
            .map_err(|_| WacastError::transport("bridge connection closed"))
    }
}

fn unexpected(reply: FromSidecar) -> WacastError {
    WacastError::Internal(format!("unexpected sidecar reply: {reply:?}"))
}

#[async_trait]
impl WaClient for BridgeClient {
    async fn send_message(
        &self,
        jid: &str,
        message: &OutboundMessage,
    ) -> Result<Option<String>, WacastError> {
        let reply = self
            .request(|request_id| ToSidecar::Send {
                request_id,
                jid: jid.to_string(),
                text: message.text.clone(),
                image_url: message.image_url.clone(),
            })
            .await?;
        match reply {
            FromSidecar::SendResult {
                error: Some(message),
                status_code,
                ..
            } => Err(WacastError::Transport {
                message,
                status: status_code,
                source: None,
            }),
            FromSidecar::SendResult { message_id, .. } => Ok(message_id),
            other => Err(unexpected(other)),
        }
    }

    async fn lookup(&self, jid: &str) -> Result<Option<String>, WacastError> {
        let reply = self
            .request(|request_id| ToSidecar::Lookup {
                request_id,
                jid: jid.to_string(),
            })
            .await?;
        match reply {
            FromSidecar::LookupResult { jid, .. } => Ok(jid),
            other => Err(unexpected(other)),
        }
    }

    async fn logout(&self) -> Result<(), WacastError> {
        match self
            .request(|request_id| ToSidecar::Logout { request_id })
            .await?
        {
            FromSidecar::LogoutResult { error: None, .. } => Ok(()),
            FromSidecar::LogoutResult {
                error: Some(message),
                ..
            } => Err(WacastError::transport(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn close(&self) {
        debug!(device_id = %self.device_id, "closing bridge connection");
        self.shutdown.cancel();
    }
}

/// Splits `ws` into its two tasks and returns the client plus the event
/// stream for the session.
pub(crate) fn spawn<S>(
    device_id: &str,
    ws: WebSocketStream<S>,
    keys: Arc<dyn KeyStore>,
    request_timeout: Duration,
) -> (BridgeClient, mpsc::Receiver<TransportEvent>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
    let pending: Pending = Arc::new(DashMap::new());
    let shutdown = CancellationToken::new();

    tokio::spawn(write_loop(
        device_id.to_string(),
        sink,
        outbound_rx,
        shutdown.clone(),
    ));

    let reader = Reader {
        device_id: device_id.to_string(),
        outbound: outbound_tx.clone(),
        events: event_tx,
        pending: Arc::clone(&pending),
        keys,
        ack_timeout: request_timeout,
    };
    tokio::spawn(reader.run(stream, shutdown.clone()));

    let client = BridgeClient {
        device_id: device_id.to_string(),
        outbound: outbound_tx,
        pending,
        request_timeout,
        shutdown,
    };
    (client, event_rx)
}

async fn write_loop<K>(
    device_id: String,
    mut sink: K,
    mut frames: mpsc::Receiver<ToSidecar>,
    shutdown: CancellationToken,
) where
    K: futures::Sink<Message> + Unpin,
    K::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(device_id = %device_id, error = %e, "bridge write failed");
                    shutdown.cancel();
                    break;
                }
            }
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

struct Reader {
    device_id: String,
    outbound: mpsc::Sender<ToSidecar>,
    events: mpsc::Sender<TransportEvent>,
    pending: Pending,
    keys: Arc<dyn KeyStore>,
    ack_timeout: Duration,
}

impl Reader {
    async fn run<R>(self, mut stream: R, shutdown: CancellationToken)
    where
        R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        // Set once the session has been told the connection ended, or when
        // nobody is listening any more.
        let mut reported = false;
        loop {
            let message = tokio::select! {
                message = stream.next() => message,
                _ = shutdown.cancelled() => {
                    reported = true;
                    break;
                }
            };
            match message {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<FromSidecar>(&text) {
                    Ok(frame) => {
                        if !self.handle(frame).await {
                            reported = true;
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(device_id = %self.device_id, error = %e, "unreadable sidecar frame")
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(device_id = %self.device_id, ?frame, "sidecar closed the socket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(device_id = %self.device_id, error = %e, "bridge read failed");
                    break;
                }
                None => break,
            }
        }

        // Dropping the senders fails every waiting request.
        self.pending.clear();
        shutdown.cancel();
        if !reported {
            let _ = self
                .events
                .send(TransportEvent::Connection(ConnectionUpdate::Close {
                    status: Some(SOCKET_DROPPED_STATUS),
                }))
                .await;
        }
    }

    /// Returns `false` once the connection is finished.
    async fn handle(&self, frame: FromSidecar) -> bool {
        match frame {
            FromSidecar::Qr { qr } => {
                self.emit(TransportEvent::Pairing(PairingChallenge::Qr(qr)))
                    .await
            }
            FromSidecar::PairingCode { code } => {
                self.emit(TransportEvent::Pairing(PairingChallenge::Code(code)))
                    .await
            }
            FromSidecar::Connection {
                state: ConnectionState::Connecting,
                ..
            } => true,
            FromSidecar::Connection {
                state: ConnectionState::Open,
                ..
            } => {
                self.emit(TransportEvent::Connection(ConnectionUpdate::Open))
                    .await
            }
            FromSidecar::Connection {
                state: ConnectionState::Close,
                status_code,
            } => {
                self.emit(TransportEvent::Connection(ConnectionUpdate::Close {
                    status: status_code,
                }))
                .await;
                false
            }
            FromSidecar::CredsUpdate { request_id, creds } => {
                self.persist_creds(request_id, AuthBlob(creds)).await
            }
            FromSidecar::KeysGet {
                request_id,
                category,
                ids,
            } => {
                self.keys_get(request_id, &category, ids).await;
                true
            }
            FromSidecar::KeysSet { request_id, data } => {
                self.keys_set(request_id, data).await;
                true
            }
            FromSidecar::Message { from, id, text } => {
                self.emit(TransportEvent::MessageReceived(InboundMessage { from, id, text }))
                    .await
            }
            reply @ (FromSidecar::SendResult { .. }
            | FromSidecar::LookupResult { .. }
            | FromSidecar::LogoutResult { .. }) => {
                self.route_reply(reply);
                true
            }
        }
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        if self.events.send(event).await.is_err() {
            debug!(device_id = %self.device_id, "session stopped listening");
            return false;
        }
        true
    }

    async fn reply(&self, frame: ToSidecar) {
        if self.outbound.send(frame).await.is_err() {
            debug!(device_id = %self.device_id, "writer gone, reply dropped");
        }
    }

    fn route_reply(&self, reply: FromSidecar) {
        let Some(request_id) = reply.reply_id().map(str::to_owned) else {
            return;
        };
        match self.pending.remove(&request_id) {
            Some((_, tx)) => {
                let _ = tx.send(reply);
            }
            None => debug!(device_id = %self.device_id, %request_id, "reply for unknown request"),
        }
    }

    /// Hands new credentials to the session and acknowledges once they are
    /// stored.
    async fn persist_creds(&self, request_id: String, creds: AuthBlob) -> bool {
        let (ack, ack_rx) = oneshot::channel();
        if !self
            .emit(TransportEvent::CredsUpdated { creds, ack })
            .await
        {
            return false;
        }
        let result = match tokio::time::timeout(self.ack_timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("session dropped the update".to_string()),
            Err(_) => Err("timed out persisting credentials".to_string()),
        };
        if let Err(e) = &result {
            warn!(device_id = %self.device_id, error = %e, "credentials not persisted");
        }
        self.reply(ToSidecar::Ack {
            request_id,
            ok: result.is_ok(),
            error: result.err(),
        })
        .await;
        true
    }

    async fn keys_get(&self, request_id: String, category: &str, ids: Vec<String>) {
        let values = match category_from_wire(category) {
            Some(category) => self
                .keys
                .get(category, &ids)
                .await
                .into_iter()
                .map(|(id, blob)| (id, blob.0))
                .collect(),
            None => {
                warn!(device_id = %self.device_id, category, "unknown key category requested");
                HashMap::new()
            }
        };
        self.reply(ToSidecar::KeysResult { request_id, values })
            .await;
    }

    async fn keys_set(
        &self,
        request_id: String,
        data: HashMap<String, HashMap<String, Option<serde_json::Value>>>,
    ) {
        let mut writes = Vec::new();
        for (name, items) in data {
            let Some(category) = category_from_wire(&name) else {
                warn!(device_id = %self.device_id, category = %name, "unknown key category, batch rejected");
                self.reply(ToSidecar::Ack {
                    request_id,
                    ok: false,
                    error: Some(format!("unknown key category: {name}")),
                })
                .await;
                return;
            };
            writes.extend(items.into_iter().map(|(item_id, value)| KeyWrite {
                category,
                item_id,
                value: value.map(AuthBlob),
            }));
        }

        let count = writes.len();
        let result = self.keys.set(writes).await;
        if let Err(e) = &result {
            warn!(device_id = %self.device_id, error = %e, "key batch not persisted");
        } else {
            debug!(device_id = %self.device_id, count, "key batch stored");
        }
        self.reply(ToSidecar::Ack {
            request_id,
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        })
        .await;
    }
}
