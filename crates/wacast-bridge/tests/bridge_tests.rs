// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bridge transport against an in-process fake sidecar.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use wacast_bridge::BridgeTransport;
use wacast_config::model::BridgeConfig;
use wacast_core::traits::{ConnectionUpdate, KeyWrite, TransportEvent, TransportSession};
use wacast_core::{
    AuthBlob, AuthCategory, KeyStore, OutboundMessage, PairingChallenge, WaTransport, WacastError,
};

#[derive(Default)]
struct TestKeys(Mutex<HashMap<(AuthCategory, String), AuthBlob>>);

#[async_trait]
impl KeyStore for TestKeys {
    async fn get(&self, category: AuthCategory, ids: &[String]) -> HashMap<String, AuthBlob> {
        let map = self.0.lock().unwrap();
        ids.iter()
            .filter_map(|id| {
                map.get(&(category, id.clone()))
                    .map(|blob| (id.clone(), blob.clone()))
            })
            .collect()
    }

    async fn set(&self, writes: Vec<KeyWrite>) -> Result<(), WacastError> {
        let mut map = self.0.lock().unwrap();
        for write in writes {
            let key = (write.category, write.item_id);
            match write.value {
                Some(blob) => {
                    map.insert(key, blob);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

struct Sidecar {
    ws: WebSocketStream<TcpStream>,
    path: String,
    authorization: Option<String>,
}

impl Sidecar {
    async fn recv(&mut self) -> Value {
        loop {
            match self.ws.next().await.expect("socket ended").expect("read") {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    async fn send(&mut self, frame: Value) {
        self.ws.send(Message::Text(frame.to_string().into())).await.unwrap();
    }
}

fn listen(listener: TcpListener) -> JoinHandle<Sidecar> {
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let seen = Arc::new(Mutex::new((String::new(), None)));
        let record = Arc::clone(&seen);
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let auth = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            *record.lock().unwrap() = (req.uri().path().to_string(), auth);
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        let (path, authorization) = seen.lock().unwrap().clone();
        Sidecar {
            ws,
            path,
            authorization,
        }
    })
}

async fn open_with(
    config: impl FnOnce(&mut BridgeConfig),
    creds: Option<AuthBlob>,
    keys: Arc<TestKeys>,
) -> (TransportSession, Sidecar) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = listen(listener);

    let mut bridge = BridgeConfig {
        url: format!("ws://{addr}"),
        ..BridgeConfig::default()
    };
    config(&mut bridge);
    let transport = BridgeTransport::new(bridge);
    let session = transport.open("dev1", creds, keys).await.unwrap();
    (session, accept.await.unwrap())
}

async fn open(keys: Arc<TestKeys>) -> (TransportSession, Sidecar) {
    open_with(|_| {}, None, keys).await
}

#[tokio::test]
async fn handshake_targets_device_and_starts_fresh() {
    let (_session, mut sidecar) = open_with(
        |c| c.api_key = Some("s3cret".into()),
        None,
        Arc::default(),
    )
    .await;
    assert_eq!(sidecar.path, "/devices/dev1");
    assert_eq!(sidecar.authorization.as_deref(), Some("Bearer s3cret"));
    assert_eq!(sidecar.recv().await, json!({"type": "start"}));
}

#[tokio::test]
async fn start_carries_stored_creds() {
    let creds = AuthBlob(json!({"me": {"id": "5511@s.whatsapp.net"}}));
    let (_session, mut sidecar) = open_with(|_| {}, Some(creds), Arc::default()).await;
    assert_eq!(sidecar.path, "/devices/dev1");
    assert!(sidecar.authorization.is_none());
    assert_eq!(
        sidecar.recv().await,
        json!({"type": "start", "creds": {"me": {"id": "5511@s.whatsapp.net"}}})
    );
}

#[tokio::test]
async fn connection_frames_become_events() {
    let (mut session, mut sidecar) = open(Arc::default()).await;
    sidecar.recv().await;

    sidecar.send(json!({"type": "qr", "qr": "2@abc"})).await;
    sidecar
        .send(json!({"type": "connection", "state": "connecting"}))
        .await;
    sidecar.send(json!({"type": "connection", "state": "open"})).await;
    sidecar
        .send(json!({"type": "message", "from": "5511@s.whatsapp.net", "id": "M1", "text": "oi"}))
        .await;
    sidecar
        .send(json!({"type": "connection", "state": "close", "status_code": 428}))
        .await;

    match session.events.recv().await.unwrap() {
        TransportEvent::Pairing(PairingChallenge::Qr(qr)) => assert_eq!(qr, "2@abc"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        session.events.recv().await.unwrap(),
        TransportEvent::Connection(ConnectionUpdate::Open)
    ));
    match session.events.recv().await.unwrap() {
        TransportEvent::MessageReceived(msg) => {
            assert_eq!(msg.id, "M1");
            assert_eq!(msg.text.as_deref(), Some("oi"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        session.events.recv().await.unwrap(),
        TransportEvent::Connection(ConnectionUpdate::Close { status: Some(428) })
    ));
    // A reported close ends the connection.
    assert!(session.events.recv().await.is_none());
}

#[tokio::test]
async fn creds_update_is_acked_after_session_confirms() {
    let (mut session, mut sidecar) = open(Arc::default()).await;
    sidecar.recv().await;

    sidecar
        .send(json!({"type": "creds_update", "request_id": "c1", "creds": {"me": {"id": "x"}}}))
        .await;
    let TransportEvent::CredsUpdated { creds, ack } = session.events.recv().await.unwrap() else {
        panic!("expected creds update");
    };
    assert_eq!(creds.0, json!({"me": {"id": "x"}}));
    ack.send(Ok(())).unwrap();
    assert_eq!(
        sidecar.recv().await,
        json!({"type": "ack", "request_id": "c1", "ok": true})
    );

    sidecar
        .send(json!({"type": "creds_update", "request_id": "c2", "creds": {}}))
        .await;
    let TransportEvent::CredsUpdated { ack, .. } = session.events.recv().await.unwrap() else {
        panic!("expected creds update");
    };
    ack.send(Err("disk full".into())).unwrap();
    assert_eq!(
        sidecar.recv().await,
        json!({"type": "ack", "request_id": "c2", "ok": false, "error": "disk full"})
    );
}

#[tokio::test]
async fn keys_are_served_from_the_key_store() {
    let keys = Arc::new(TestKeys::default());
    let (_session, mut sidecar) = open(Arc::clone(&keys)).await;
    sidecar.recv().await;

    sidecar
        .send(json!({
            "type": "keys_set",
            "request_id": "k1",
            "data": {
                "pre-key": {"1": {"public": "a"}, "2": {"public": "b"}},
                "session": {"5511.0": {"chain": 1}}
            }
        }))
        .await;
    assert_eq!(
        sidecar.recv().await,
        json!({"type": "ack", "request_id": "k1", "ok": true})
    );

    sidecar
        .send(json!({"type": "keys_set", "request_id": "k2", "data": {"pre-key": {"2": null}}}))
        .await;
    sidecar.recv().await;

    sidecar
        .send(json!({"type": "keys_get", "request_id": "g1", "category": "pre-key", "ids": ["1", "2", "3"]}))
        .await;
    assert_eq!(
        sidecar.recv().await,
        json!({"type": "keys_result", "request_id": "g1", "values": {"1": {"public": "a"}}})
    );

    let stored = keys.get(AuthCategory::Sessions, &["5511.0".into()]).await;
    assert_eq!(stored["5511.0"].0, json!({"chain": 1}));
}

#[tokio::test]
async fn unknown_key_category_rejects_the_batch() {
    let keys = Arc::new(TestKeys::default());
    let (_session, mut sidecar) = open(Arc::clone(&keys)).await;
    sidecar.recv().await;

    sidecar
        .send(json!({"type": "keys_set", "request_id": "k1", "data": {"mystery": {"1": {}}}}))
        .await;
    let ack = sidecar.recv().await;
    assert_eq!(ack["ok"], json!(false));
    assert!(keys.0.lock().unwrap().is_empty());

    sidecar
        .send(json!({"type": "keys_get", "request_id": "g1", "category": "mystery", "ids": ["1"]}))
        .await;
    assert_eq!(
        sidecar.recv().await,
        json!({"type": "keys_result", "request_id": "g1", "values": {}})
    );
}

#[tokio::test]
async fn send_lookup_and_logout_round_trip() {
    let (session, mut sidecar) = open(Arc::default()).await;
    sidecar.recv().await;
    let client = Arc::clone(&session.client);

    let call = tokio::spawn({
        let client = Arc::clone(&client);
        async move {
            client
                .send_message("5511@s.whatsapp.net", &OutboundMessage::text("hello"))
                .await
        }
    });
    let frame = sidecar.recv().await;
    assert_eq!(frame["type"], "send");
    assert_eq!(frame["jid"], "5511@s.whatsapp.net");
    assert_eq!(frame["text"], "hello");
    sidecar
        .send(json!({"type": "send_result", "request_id": frame["request_id"], "message_id": "ABC"}))
        .await;
    assert_eq!(call.await.unwrap().unwrap().as_deref(), Some("ABC"));

    let call = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.lookup("5599@s.whatsapp.net").await }
    });
    let frame = sidecar.recv().await;
    assert_eq!(frame["type"], "lookup");
    sidecar
        .send(json!({"type": "lookup_result", "request_id": frame["request_id"]}))
        .await;
    assert_eq!(call.await.unwrap().unwrap(), None);

    let call = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.logout().await }
    });
    let frame = sidecar.recv().await;
    assert_eq!(frame["type"], "logout");
    sidecar
        .send(json!({"type": "logout_result", "request_id": frame["request_id"], "error": "not linked"}))
        .await;
    assert!(call.await.unwrap().is_err());
}

#[tokio::test]
async fn send_error_keeps_status_code() {
    let (session, mut sidecar) = open(Arc::default()).await;
    sidecar.recv().await;
    let client = Arc::clone(&session.client);

    let call = tokio::spawn(async move {
        client
            .send_message("5511@s.whatsapp.net", &OutboundMessage::text("hello"))
            .await
    });
    let frame = sidecar.recv().await;
    sidecar
        .send(json!({
            "type": "send_result",
            "request_id": frame["request_id"],
            "error": "rate limited",
            "status_code": 429
        }))
        .await;
    match call.await.unwrap() {
        Err(WacastError::Transport {
            message, status, ..
        }) => {
            assert_eq!(message, "rate limited");
            assert_eq!(status, Some(429));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let (session, mut sidecar) = open_with(|c| c.request_timeout_secs = 1, None, Arc::default()).await;
    sidecar.recv().await;

    let call = tokio::spawn({
        let client = Arc::clone(&session.client);
        async move { client.lookup("5511@s.whatsapp.net").await }
    });
    sidecar.recv().await;
    assert!(matches!(
        call.await.unwrap(),
        Err(WacastError::Timeout { .. })
    ));
}

#[tokio::test]
async fn dropped_socket_fails_requests_and_ends_events() {
    let (mut session, mut sidecar) = open(Arc::default()).await;
    sidecar.recv().await;

    let call = tokio::spawn({
        let client = Arc::clone(&session.client);
        async move { client.lookup("5511@s.whatsapp.net").await }
    });
    sidecar.recv().await;
    drop(sidecar);

    assert!(matches!(
        session.events.recv().await.unwrap(),
        TransportEvent::Connection(ConnectionUpdate::Close { status: Some(428) })
    ));
    assert!(session.events.recv().await.is_none());
    assert!(matches!(
        call.await.unwrap(),
        Err(WacastError::Transport { .. })
    ));
}

#[tokio::test]
async fn close_sends_a_close_frame() {
    let (session, mut sidecar) = open(Arc::default()).await;
    sidecar.recv().await;

    session.client.close().await;
    match sidecar.ws.next().await {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected close, got {other:?}"),
    }
}
