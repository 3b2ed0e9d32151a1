// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconnection governor: exponential backoff with a parked fallback.
//!
//! Delays run on `tokio::time`, so tests drive them with a paused clock.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use wacast_config::model::SessionConfig;

#[derive(Debug, Clone)]
pub struct GovernorPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Attempts on the exponential curve before parking.
    pub max_attempts: u32,
    pub parked_interval: Duration,
    pub jitter_ratio: f64,
}

impl From<&SessionConfig> for GovernorPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            base: Duration::from_millis(config.reconnect_base_ms),
            max: Duration::from_millis(config.reconnect_max_ms),
            max_attempts: config.max_reconnect_attempts,
            parked_interval: Duration::from_secs(config.parked_interval_secs),
            jitter_ratio: config.jitter_ratio,
        }
    }
}

impl Default for GovernorPolicy {
    fn default() -> Self {
        (&SessionConfig::default()).into()
    }
}

/// Per-device reconnect state.
#[derive(Debug, Clone)]
pub struct ReconnectGovernor {
    policy: GovernorPolicy,
    attempts: u32,
    last_attempt_at: Option<Instant>,
    next_eligible_at: Option<Instant>,
}

impl ReconnectGovernor {
    pub fn new(policy: GovernorPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_attempt_at: None,
            next_eligible_at: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt_at(&self) -> Option<Instant> {
        self.last_attempt_at
    }

    pub fn next_eligible_at(&self) -> Option<Instant> {
        self.next_eligible_at
    }

    /// Past the exponential phase; retries continue on the parked interval.
    pub fn is_parked(&self) -> bool {
        self.attempts > self.policy.max_attempts
    }

    /// Delay for the current attempt count, without jitter.
    pub fn backoff(&self) -> Duration {
        if self.attempts == 0 {
            return Duration::ZERO;
        }
        if self.is_parked() {
            return self.policy.parked_interval;
        }
        let factor = 1u32 << (self.attempts - 1).min(20);
        self.policy.base.saturating_mul(factor).min(self.policy.max)
    }

    /// Records a recoverable disconnect and returns how long to wait.
    pub fn on_disconnect(&mut self, now: Instant) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let delay = self.backoff() + self.jitter(self.backoff());
        self.last_attempt_at = Some(now);
        self.next_eligible_at = Some(now + delay);
        delay
    }

    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.next_eligible_at = None;
    }

    fn jitter(&self, delay: Duration) -> Duration {
        let spread = (delay.as_millis() as f64 * self.policy.jitter_ratio) as u64;
        if spread == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}
