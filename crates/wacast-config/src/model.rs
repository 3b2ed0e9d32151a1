// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wacast_core::PhoneRules;

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WacastConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP surface consumed by the dashboard.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Device session lifecycle and reconnection governor.
    #[serde(default)]
    pub session: SessionConfig,

    /// Outbound send guard.
    #[serde(default)]
    pub guard: GuardConfig,

    /// Campaign dispatcher.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Phone numbering plan.
    #[serde(default)]
    pub phone: PhoneConfig,

    /// Protocol sidecar connection.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "wacast".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("wacast").join("wacast.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("wacast.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bearer token required on every route except `/health`. Unset = open.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_gateway_host(),
            port: default_gateway_port(),
            bearer_token: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    3001
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// First reconnect delay.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Ceiling of the exponential reconnect delay.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Attempts before the session is parked on the long interval.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay between attempts once parked.
    #[serde(default = "default_parked_interval_secs")]
    pub parked_interval_secs: u64,

    /// Random spread added to each delay, as a fraction of it.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    /// Reconnect remembered devices with valid credentials on startup.
    #[serde(default = "default_true")]
    pub restore_on_startup: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            parked_interval_secs: default_parked_interval_secs(),
            jitter_ratio: default_jitter_ratio(),
            restore_on_startup: true,
        }
    }
}

fn default_reconnect_base_ms() -> u64 {
    2_000
}

fn default_reconnect_max_ms() -> u64 {
    300_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_parked_interval_secs() -> u64 {
    900
}

fn default_jitter_ratio() -> f64 {
    0.2
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Trailing window after a successful send in which the same
    /// device/recipient pair is rejected.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    /// How often expired dedup entries are evicted.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl GuardConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

fn default_dedup_window_ms() -> u64 {
    5_000
}

fn default_sweep_interval_secs() -> u64 {
    1_800
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Transport attempts per job, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base unit of the retry delay (1x, 2x, 4x, ...).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Pause between sends used when a campaign's own delay is invalid.
    #[serde(default = "default_delay_secs")]
    pub default_delay_secs: u64,

    /// How long a claimed campaign stays leased without renewal.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Campaigns processed at once; each stays internally sequential.
    #[serde(default = "default_max_concurrent_campaigns")]
    pub max_concurrent_campaigns: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval_secs(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            default_delay_secs: default_delay_secs(),
            lease_secs: default_lease_secs(),
            max_concurrent_campaigns: default_max_concurrent_campaigns(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_delay_secs() -> u64 {
    5
}

fn default_lease_secs() -> u64 {
    300
}

fn default_max_concurrent_campaigns() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PhoneConfig {
    /// Country calling code prepended to local numbers.
    #[serde(default = "default_country_code")]
    pub country_code: String,

    #[serde(default = "default_area_code_len")]
    pub area_code_len: usize,

    /// Subscriber digits, not counting the mobile prefix.
    #[serde(default = "default_subscriber_len")]
    pub subscriber_len: usize,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            country_code: default_country_code(),
            area_code_len: default_area_code_len(),
            subscriber_len: default_subscriber_len(),
        }
    }
}

impl PhoneConfig {
    pub fn rules(&self) -> PhoneRules {
        PhoneRules {
            country_code: self.country_code.clone(),
            area_code_len: self.area_code_len,
            subscriber_len: self.subscriber_len,
        }
    }
}

fn default_country_code() -> String {
    "55".to_string()
}

fn default_area_code_len() -> usize {
    2
}

fn default_subscriber_len() -> usize {
    8
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// WebSocket base URL of the protocol sidecar.
    #[serde(default = "default_bridge_url")]
    pub url: String,

    /// Sent as a bearer token on the WebSocket handshake.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Timeout for send, lookup and logout round trips.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:8085".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_request_timeout_secs() -> u64 {
    30
}
