// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device sessions for wacast.
//!
//! [`SessionSupervisor`] owns one protocol client per device, persists its
//! auth state through [`AuthState`], reconnects it under a
//! [`ReconnectGovernor`] and routes outbound sends through the
//! [`SendGuard`].

pub mod auth;
pub mod governor;
pub mod guard;
pub mod supervisor;

pub use auth::AuthState;
pub use governor::{GovernorPolicy, ReconnectGovernor};
pub use guard::SendGuard;
pub use supervisor::{ConnectOutcome, SessionSupervisor};

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Evicts expired dedup entries on an interval until cancelled.
pub async fn run_guard_sweeper(
    supervisor: SessionSupervisor,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = supervisor.guard().purge_expired();
                if purged > 0 {
                    debug!(purged, "send guard entries expired");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}
