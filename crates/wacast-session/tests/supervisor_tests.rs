// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle scenarios against the mock transport.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use wacast_core::traits::KeyWrite;
use wacast_core::{
    AuthBlob, AuthCategory, AuthStateStore, DeviceStatus, OutboundMessage, PairingChallenge,
    PhoneRules, SendError, WacastError,
};
use wacast_session::{GovernorPolicy, SendGuard, SessionSupervisor};
use wacast_test_utils::{MemoryStore, MockTransport};

fn policy() -> GovernorPolicy {
    GovernorPolicy {
        base: Duration::from_millis(100),
        max: Duration::from_secs(1),
        max_attempts: 3,
        parked_interval: Duration::from_secs(5),
        jitter_ratio: 0.0,
    }
}

fn harness() -> (SessionSupervisor, Arc<MockTransport>, Arc<MemoryStore>) {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MemoryStore::new());
    let guard = SendGuard::new(Duration::from_secs(5), PhoneRules::default());
    let supervisor = SessionSupervisor::new(transport.clone(), store.clone(), guard, policy());
    (supervisor, transport, store)
}

async fn seed_linked(store: &MemoryStore, device_id: &str) {
    store
        .write(
            device_id,
            AuthCategory::Creds,
            "creds",
            &AuthBlob(json!({"me": {"id": "5511999990000:2@s.whatsapp.net"}})),
        )
        .await
        .unwrap();
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn status_of(supervisor: &SessionSupervisor, device_id: &str) -> Option<DeviceStatus> {
    supervisor.status(device_id).map(|i| i.status)
}

#[tokio::test(start_paused = true)]
async fn unpaired_device_gets_a_pairing_challenge() {
    let (supervisor, _transport, _store) = harness();
    let outcome = supervisor.connect("dev1", Some("Sales".into())).await.unwrap();
    assert!(!outcome.already_active());

    wait_until("pending pairing", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::PendingPairing)
    })
    .await;
    assert_eq!(
        supervisor.pairing_challenge("dev1"),
        Some(PairingChallenge::Qr("qr-dev1-1".into()))
    );
    assert_eq!(
        supervisor.status("dev1").unwrap().connection_name.as_deref(),
        Some("Sales")
    );
}

#[tokio::test(start_paused = true)]
async fn pairing_persists_credentials_before_connecting() {
    let (supervisor, transport, store) = harness();
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("pending pairing", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::PendingPairing)
    })
    .await;

    transport.pair("dev1", "5511988887777").await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;

    assert!(supervisor.pairing_challenge("dev1").is_none());
    let creds = store
        .read("dev1", AuthCategory::Creds, "creds")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(creds.0["me"]["id"], "5511988887777:1@s.whatsapp.net");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connects_start_one_client() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.connect("dev1", None).await.unwrap() })
        })
        .collect();
    let mut started = 0;
    for handle in handles {
        if !handle.await.unwrap().already_active() {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert_eq!(transport.opens("dev1"), 1);
}

#[tokio::test(start_paused = true)]
async fn connected_device_is_not_restarted() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;

    let again = supervisor.connect("dev1", None).await.unwrap();
    assert!(again.already_active());
    assert_eq!(again.info().status, DeviceStatus::Connected);
    assert_eq!(transport.opens("dev1"), 1);
}

#[tokio::test(start_paused = true)]
async fn recoverable_close_reconnects_after_backoff() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    let first_client = transport.client("dev1").unwrap();

    transport.close("dev1", Some(428)).await;
    wait_until("reconnecting", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Reconnecting)
    })
    .await;
    assert!(first_client.is_closed());
    assert_eq!(transport.opens("dev1"), 1);

    wait_until("reconnected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    assert_eq!(transport.opens("dev1"), 2);
    assert!(store.auth_record_count("dev1") > 0);
}

#[tokio::test(start_paused = true)]
async fn logged_out_close_wipes_auth_state() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;

    transport.close("dev1", Some(401)).await;
    wait_until("session removed", || supervisor.status("dev1").is_none()).await;

    assert_eq!(store.auth_record_count("dev1"), 0);
    assert!(store.remembered_devices().await.unwrap().is_empty());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.opens("dev1"), 1);
}

#[tokio::test(start_paused = true)]
async fn bad_session_with_linked_credentials_reconnects() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;

    transport.close("dev1", Some(500)).await;
    wait_until("second open", || transport.opens("dev1") == 2).await;
    assert!(store.auth_record_count("dev1") > 0);
}

#[tokio::test(start_paused = true)]
async fn bad_session_without_linked_credentials_wipes() {
    let (supervisor, transport, store) = harness();
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("pending pairing", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::PendingPairing)
    })
    .await;
    transport
        .keys("dev1")
        .unwrap()
        .set(vec![KeyWrite {
            category: AuthCategory::PreKeys,
            item_id: "1".into(),
            value: Some(AuthBlob(json!({"public": "x"}))),
        }])
        .await
        .unwrap();
    assert_eq!(store.auth_record_count("dev1"), 1);

    transport.close("dev1", Some(500)).await;
    wait_until("session removed", || supervisor.status("dev1").is_none()).await;
    assert_eq!(store.auth_record_count("dev1"), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_and_wipe_then_connect_pairs_afresh() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    let client = transport.client("dev1").unwrap();

    supervisor.disconnect_and_wipe("dev1").await.unwrap();
    assert_eq!(client.logouts.load(Ordering::SeqCst), 1);
    assert!(client.is_closed());
    assert!(supervisor.status("dev1").is_none());
    assert_eq!(store.auth_record_count("dev1"), 0);

    supervisor.connect("dev1", None).await.unwrap();
    wait_until("pending pairing", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::PendingPairing)
    })
    .await;
    assert_eq!(
        supervisor.pairing_challenge("dev1"),
        Some(PairingChallenge::Qr("qr-dev1-2".into()))
    );
    assert!(transport.opened_with("dev1").is_none());
}

#[tokio::test(start_paused = true)]
async fn connect_during_wipe_is_rejected() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    transport
        .client("dev1")
        .unwrap()
        .set_logout_latency(Duration::from_secs(1));

    let wiping = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.disconnect_and_wipe("dev1").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(status_of(&supervisor, "dev1"), Some(DeviceStatus::LoggedOut));
    assert!(matches!(
        supervisor.connect("dev1", None).await,
        Err(WacastError::InvalidTransition { .. })
    ));
    assert!(matches!(
        supervisor.disconnect_and_wipe("dev1").await,
        Err(WacastError::InvalidTransition { .. })
    ));
    assert_eq!(transport.opens("dev1"), 1);

    wiping.await.unwrap().unwrap();
    assert!(supervisor.status("dev1").is_none());
    assert_eq!(store.auth_record_count("dev1"), 0);

    supervisor.connect("dev1", None).await.unwrap();
    wait_until("pending pairing", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::PendingPairing)
    })
    .await;
    assert!(transport.opened_with("dev1").is_none());
    assert_eq!(
        supervisor.pairing_challenge("dev1"),
        Some(PairingChallenge::Qr("qr-dev1-2".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn connect_during_logged_out_wipe_is_rejected() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    store.set_wipe_latency(Duration::from_secs(1));

    transport.close("dev1", Some(401)).await;
    wait_until("logged out", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::LoggedOut)
    })
    .await;
    assert!(matches!(
        supervisor.connect("dev1", None).await,
        Err(WacastError::InvalidTransition { .. })
    ));

    wait_until("session removed", || supervisor.status("dev1").is_none()).await;
    assert_eq!(store.auth_record_count("dev1"), 0);
    assert_eq!(transport.opens("dev1"), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_logout_still_wipes() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    transport.client("dev1").unwrap().fail_logout(true);

    supervisor.disconnect_and_wipe("dev1").await.unwrap();
    assert_eq!(store.auth_record_count("dev1"), 0);
}

#[tokio::test]
async fn wiping_an_unknown_device_is_a_no_op() {
    let (supervisor, _transport, _store) = harness();
    supervisor.disconnect_and_wipe("ghost").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn send_requires_a_connected_session() {
    let (supervisor, _transport, store) = harness();
    let msg = OutboundMessage::text("hello");
    assert_eq!(
        supervisor.send("dev1", "5511988887777", &msg).await,
        Err(SendError::DeviceNotConnected)
    );

    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    let receipt = supervisor.send("dev1", "5511988887777", &msg).await.unwrap();
    assert_eq!(receipt.jid, "551188887777@s.whatsapp.net");

    supervisor.disconnect_and_wipe("dev1").await.unwrap();
    assert_eq!(
        supervisor.send("dev1", "5511988886666", &msg).await,
        Err(SendError::DeviceNotConnected)
    );
}

#[tokio::test(start_paused = true)]
async fn open_failures_back_off_until_success() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    transport.fail_next_opens(2);

    assert!(supervisor.connect("dev1", None).await.is_err());
    assert_eq!(status_of(&supervisor, "dev1"), Some(DeviceStatus::Reconnecting));

    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    assert_eq!(transport.opens("dev1"), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_park_but_keep_retrying() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    transport.fail_next_opens(10);

    let _ = supervisor.connect("dev1", None).await;
    // Attempts at 0, 100, 300 and 700 ms; the next waits the parked interval.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.opens("dev1"), 4);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(transport.opens("dev1"), 4);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.opens("dev1"), 5);
    assert_eq!(status_of(&supervisor, "dev1"), Some(DeviceStatus::Reconnecting));
}

#[tokio::test(start_paused = true)]
async fn restore_reconnects_only_linked_devices() {
    let (supervisor, _transport, store) = harness();
    seed_linked(&store, "dev1").await;
    store.remember_device("dev1", Some("Main")).await.unwrap();
    store.remember_device("dev2", None).await.unwrap();

    assert_eq!(supervisor.restore().await.unwrap(), 1);
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    assert!(supervisor.status("dev2").is_none());
    assert_eq!(
        supervisor.status("dev1").unwrap().connection_name.as_deref(),
        Some("Main")
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_clients_and_keeps_credentials() {
    let (supervisor, transport, store) = harness();
    seed_linked(&store, "dev1").await;
    supervisor.connect("dev1", None).await.unwrap();
    wait_until("connected", || {
        status_of(&supervisor, "dev1") == Some(DeviceStatus::Connected)
    })
    .await;
    let client = transport.client("dev1").unwrap();

    supervisor.shutdown().await;
    assert!(client.is_closed());
    assert_eq!(client.logouts.load(Ordering::SeqCst), 0);
    assert!(supervisor.list_devices().is_empty());
    assert!(store.auth_record_count("dev1") > 0);
    assert!(supervisor.connect("dev1", None).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn list_devices_is_sorted() {
    let (supervisor, _transport, _store) = harness();
    for id in ["zeta", "alpha", "mid"] {
        supervisor.connect(id, None).await.unwrap();
    }
    let ids: Vec<String> = supervisor
        .list_devices()
        .into_iter()
        .map(|d| d.device_id)
        .collect();
    assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
}

#[tokio::test(start_paused = true)]
async fn prune_skips_devices_with_sessions() {
    let (supervisor, _transport, store) = harness();
    store
        .write("pairing", AuthCategory::Creds, "creds", &AuthBlob(json!({})))
        .await
        .unwrap();
    store
        .write("stale", AuthCategory::Creds, "creds", &AuthBlob(json!({})))
        .await
        .unwrap();
    supervisor.connect("pairing", None).await.unwrap();

    let pruned = supervisor.prune_auth(false).await.unwrap();
    assert_eq!(pruned, vec!["stale".to_string()]);
    assert_eq!(store.auth_record_count("pairing"), 1);
}
