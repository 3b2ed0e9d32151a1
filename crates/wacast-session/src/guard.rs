// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound send guard.
//!
//! Coalesces concurrent sends of the same message to the same
//! device/recipient pair into one protocol send, rejects repeats inside a
//! short window after a success, and checks that the recipient exists
//! before sending.
//!
//! A different message for a pair that already has a send in flight waits
//! for that send instead of joining it. It is then admitted like any later
//! caller, so after a success it is rejected until the window passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};
use wacast_core::{OutboundMessage, PhoneRules, SendError, SendReceipt, WaClient};

type SendResult = Result<SendReceipt, SendError>;
type GuardKey = (String, String);

enum Slot {
    InFlight {
        message: OutboundMessage,
        rx: watch::Receiver<Option<SendResult>>,
    },
    Recent(Instant),
}

pub struct SendGuard {
    window: Duration,
    phone: PhoneRules,
    slots: Mutex<HashMap<GuardKey, Slot>>,
}

enum Admission {
    Lead(watch::Sender<Option<SendResult>>),
    Join(watch::Receiver<Option<SendResult>>),
    /// Another message is in flight for the key.
    Queue(watch::Receiver<Option<SendResult>>),
    Reject(Duration),
}

impl SendGuard {
    pub fn new(window: Duration, phone: PhoneRules) -> Self {
        Self {
            window,
            phone,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn phone_rules(&self) -> &PhoneRules {
        &self.phone
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<GuardKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends `message` to `recipient` through `client`, at most once per
    /// in-flight window.
    ///
    /// A caller arriving while the same message is in flight receives that
    /// send's result. A caller arriving within the dedup window after a
    /// success is rejected with [`SendError::TooFrequent`], which carries
    /// the time left in the window.
    pub async fn send(
        &self,
        device_id: &str,
        client: Arc<dyn WaClient>,
        recipient: &str,
        message: &OutboundMessage,
    ) -> SendResult {
        let jid = self.phone.to_jid(recipient);
        let key = (device_id.to_string(), jid.clone());

        loop {
            let admission = {
                let mut slots = self.lock();
                match slots.get(&key) {
                    Some(Slot::InFlight { message: current, rx }) if current == message => {
                        Admission::Join(rx.clone())
                    }
                    Some(Slot::InFlight { rx, .. }) => Admission::Queue(rx.clone()),
                    Some(Slot::Recent(at)) if at.elapsed() < self.window => {
                        Admission::Reject(self.window.saturating_sub(at.elapsed()))
                    }
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(
                            key.clone(),
                            Slot::InFlight {
                                message: message.clone(),
                                rx,
                            },
                        );
                        Admission::Lead(tx)
                    }
                }
            };

            match admission {
                Admission::Reject(retry_after) => {
                    debug!(device_id, jid = %jid, "duplicate send rejected");
                    return Err(SendError::TooFrequent {
                        recipient: jid,
                        retry_after,
                    });
                }
                Admission::Join(rx) => {
                    debug!(device_id, jid = %jid, "joining in-flight send");
                    return wait_for_leader(rx).await;
                }
                Admission::Queue(rx) => {
                    debug!(device_id, jid = %jid, "other message in flight, waiting");
                    let _ = wait_for_leader(rx).await;
                }
                Admission::Lead(tx) => {
                    let mut flight = Flight {
                        guard: self,
                        key: Some(key),
                        tx,
                    };
                    let result = deliver(client.as_ref(), &jid, message).await;
                    flight.finish(&result);
                    return result;
                }
            }
        }
    }

    /// Drops dedup entries whose window has passed. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::InFlight { .. } => true,
            Slot::Recent(at) => at.elapsed() < self.window,
        });
        before - slots.len()
    }

    /// Forgets completed sends for a device whose session was removed.
    pub fn forget_device(&self, device_id: &str) {
        self.lock()
            .retain(|(device, _), slot| device != device_id || matches!(slot, Slot::InFlight { .. }));
    }

    pub fn tracked(&self) -> usize {
        self.lock().len()
    }
}

async fn deliver(client: &dyn WaClient, jid: &str, message: &OutboundMessage) -> SendResult {
    let resolved = client
        .lookup(jid)
        .await?
        .ok_or_else(|| SendError::InvalidRecipient {
            recipient: jid.to_string(),
        })?;
    let message_id = client.send_message(&resolved, message).await?;
    Ok(SendReceipt {
        jid: resolved,
        message_id,
    })
}

async fn wait_for_leader(mut rx: watch::Receiver<Option<SendResult>>) -> SendResult {
    match rx.wait_for(Option::is_some).await {
        Ok(value) => value.clone().unwrap_or(Err(SendError::Abandoned)),
        Err(_) => Err(SendError::Abandoned),
    }
}

/// Owns the in-flight marker of a leading send.
///
/// Dropping it unfinished clears the marker so joined callers see
/// [`SendError::Abandoned`] and later callers can send again.
struct Flight<'a> {
    guard: &'a SendGuard,
    key: Option<GuardKey>,
    tx: watch::Sender<Option<SendResult>>,
}

impl Flight<'_> {
    fn finish(&mut self, result: &SendResult) {
        let Some(key) = self.key.take() else {
            return;
        };
        {
            let mut slots = self.guard.lock();
            if result.is_ok() {
                slots.insert(key, Slot::Recent(Instant::now()));
            } else {
                slots.remove(&key);
            }
        }
        self.tx.send_replace(Some(result.clone()));
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            warn!(device_id = %key.0, jid = %key.1, "send dropped before completion");
            self.guard.lock().remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use wacast_test_utils::MockClient;

    fn guard(window_ms: u64) -> SendGuard {
        SendGuard::new(Duration::from_millis(window_ms), PhoneRules::default())
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_sends_coalesce() {
        let guard = guard(5_000);
        let client = Arc::new(MockClient::new());
        client.set_latency(Duration::from_millis(200));
        let msg = OutboundMessage::text("hi");

        let (a, b) = tokio::join!(
            guard.send("dev1", client.clone(), "11 98888-7777", &msg),
            guard.send("dev1", client.clone(), "5511988887777", &msg),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(client.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_messages_do_not_share_a_receipt() {
        let guard = guard(5_000);
        let client = Arc::new(MockClient::new());
        client.set_latency(Duration::from_millis(200));
        let first = OutboundMessage::text("campaign one");
        let second = OutboundMessage::text("campaign two");

        let (a, b) = tokio::join!(
            guard.send("dev1", client.clone(), "5511988887777", &first),
            guard.send("dev1", client.clone(), "5511988887777", &second),
        );
        assert_eq!(a.unwrap().message_id.as_deref(), Some("MSG-1"));
        assert!(matches!(
            b,
            Err(SendError::TooFrequent { retry_after, .. })
                if retry_after > Duration::from_millis(4_900)
        ));
        assert_eq!(client.sends.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(5_001)).await;
        let later = guard
            .send("dev1", client.clone(), "5511988887777", &second)
            .await
            .unwrap();
        assert_eq!(later.message_id.as_deref(), Some("MSG-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn different_message_leads_after_a_failed_send() {
        let guard = guard(5_000);
        let client = Arc::new(MockClient::new());
        client.set_latency(Duration::from_millis(200));
        client.fail_next_sends(1, Some(400));

        let one = OutboundMessage::text("one");
        let two = OutboundMessage::text("two");
        let (a, b) = tokio::join!(
            guard.send("dev1", client.clone(), "5511988887777", &one),
            guard.send("dev1", client.clone(), "5511988887777", &two),
        );
        assert!(a.is_err());
        assert_eq!(b.unwrap().message_id.as_deref(), Some("MSG-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_within_window_is_rejected_then_allowed() {
        let guard = guard(5_000);
        let client = Arc::new(MockClient::new());
        let msg = OutboundMessage::text("hi");

        guard.send("dev1", client.clone(), "5511988887777", &msg).await.unwrap();
        tokio::time::advance(Duration::from_millis(1_000)).await;
        let again = guard.send("dev1", client.clone(), "5511988887777", &msg).await;
        assert_eq!(
            again.unwrap_err().retry_after(),
            Some(Duration::from_millis(4_000))
        );

        tokio::time::advance(Duration::from_millis(4_001)).await;
        guard.send("dev1", client.clone(), "5511988887777", &msg).await.unwrap();
        assert_eq!(client.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn other_device_or_recipient_is_independent() {
        let guard = guard(5_000);
        let client = Arc::new(MockClient::new());
        let msg = OutboundMessage::text("hi");
        guard.send("dev1", client.clone(), "5511988887777", &msg).await.unwrap();
        guard.send("dev2", client.clone(), "5511988887777", &msg).await.unwrap();
        guard.send("dev1", client.clone(), "5511988886666", &msg).await.unwrap();
        assert_eq!(client.sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_sent() {
        let guard = guard(5_000);
        let client = Arc::new(MockClient::new());
        client.mark_missing("551100000000@s.whatsapp.net");
        let err = guard
            .send("dev1", client.clone(), "551100000000", &OutboundMessage::text("x"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SendError::InvalidRecipient {
                recipient: "551100000000@s.whatsapp.net".into()
            }
        );
        assert_eq!(client.sends.load(Ordering::SeqCst), 0);
        assert_eq!(guard.tracked(), 0);
    }

    #[tokio::test]
    async fn sends_to_the_resolved_address() {
        let guard = guard(5_000);
        let client = Arc::new(MockClient::new());
        client.resolve_as("551188887777@s.whatsapp.net", "5511988887777@s.whatsapp.net");
        let receipt = guard
            .send("dev1", client.clone(), "5511988887777", &OutboundMessage::text("x"))
            .await
            .unwrap();
        assert_eq!(receipt.jid, "5511988887777@s.whatsapp.net");
        assert_eq!(client.sent_to(), vec!["5511988887777@s.whatsapp.net".to_string()]);
    }

    #[tokio::test]
    async fn failures_do_not_block_a_retry() {
        let guard = guard(5_000);
        let client = Arc::new(MockClient::new());
        client.fail_next_sends(1, Some(503));
        let msg = OutboundMessage::text("x");
        let first = guard.send("dev1", client.clone(), "5511988887777", &msg).await;
        assert!(matches!(
            first,
            Err(SendError::Transport {
                status: Some(503),
                ..
            })
        ));
        guard.send("dev1", client.clone(), "5511988887777", &msg).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_leader_releases_joiners() {
        let guard = Arc::new(guard(5_000));
        let client = Arc::new(MockClient::new());
        client.set_latency(Duration::from_secs(10));
        let msg = OutboundMessage::text("x");

        let leader = {
            let guard = guard.clone();
            let client = client.clone();
            let msg = msg.clone();
            tokio::spawn(async move { guard.send("dev1", client, "5511988887777", &msg).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let joiner = {
            let guard = guard.clone();
            let client = client.clone();
            let msg = msg.clone();
            tokio::spawn(async move { guard.send("dev1", client, "5511988887777", &msg).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        assert_eq!(joiner.await.unwrap(), Err(SendError::Abandoned));
        assert_eq!(guard.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_only_expired() {
        let guard = guard(1_000);
        let client = Arc::new(MockClient::new());
        let msg = OutboundMessage::text("x");
        guard.send("dev1", client.clone(), "5511988887777", &msg).await.unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;
        guard.send("dev1", client.clone(), "5511988886666", &msg).await.unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;

        assert_eq!(guard.purge_expired(), 1);
        assert_eq!(guard.tracked(), 1);
        guard.forget_device("dev1");
        assert_eq!(guard.tracked(), 0);
    }
}
