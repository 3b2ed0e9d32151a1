// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.

use crate::diagnostic::ConfigError;
use crate::model::WacastConfig;

/// Collects every violation instead of failing on the first one.
pub fn validate_config(config: &WacastConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    if config.gateway.enabled && config.gateway.port == 0 {
        fail("gateway.port must be non-zero".to_string());
    }
    let host = config.gateway.host.trim();
    let host_ok = host.parse::<std::net::IpAddr>().is_ok()
        || (!host.is_empty()
            && host
                .chars()
                .all(|c| c.is_alphanumeric() || c == '.' || c == '-'));
    if !host_ok {
        fail(format!(
            "gateway.host `{host}` is not a valid IP address or hostname"
        ));
    }

    let session = &config.session;
    if session.reconnect_base_ms == 0 {
        fail("session.reconnect_base_ms must be at least 1".to_string());
    }
    if session.reconnect_base_ms > session.reconnect_max_ms {
        fail(format!(
            "session.reconnect_base_ms ({}) must not exceed session.reconnect_max_ms ({})",
            session.reconnect_base_ms, session.reconnect_max_ms
        ));
    }
    if session.parked_interval_secs == 0 {
        fail("session.parked_interval_secs must be at least 1".to_string());
    }
    if !(0.0..=1.0).contains(&session.jitter_ratio) {
        fail(format!(
            "session.jitter_ratio must be between 0 and 1, got {}",
            session.jitter_ratio
        ));
    }

    let dispatcher = &config.dispatcher;
    if dispatcher.poll_interval_secs == 0 {
        fail("dispatcher.poll_interval_secs must be at least 1".to_string());
    }
    if dispatcher.max_attempts == 0 {
        fail("dispatcher.max_attempts must be at least 1".to_string());
    }
    if dispatcher.default_delay_secs == 0 {
        fail("dispatcher.default_delay_secs must be at least 1".to_string());
    }
    if dispatcher.lease_secs == 0 {
        fail("dispatcher.lease_secs must be at least 1".to_string());
    }
    if dispatcher.max_concurrent_campaigns == 0 {
        fail("dispatcher.max_concurrent_campaigns must be at least 1".to_string());
    }

    let code = &config.phone.country_code;
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        fail(format!(
            "phone.country_code must be a non-empty string of digits, got `{code}`"
        ));
    }

    let url = config.bridge.url.trim();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        fail(format!("bridge.url `{url}` must use the ws:// or wss:// scheme"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_error(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&WacastConfig::default()).is_ok());
    }

    #[test]
    fn inverted_backoff_bounds_fail() {
        let mut config = WacastConfig::default();
        config.session.reconnect_base_ms = 10_000;
        config.session.reconnect_max_ms = 1_000;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "reconnect_base_ms"));
    }

    #[test]
    fn zero_attempts_and_delay_fail_together() {
        let mut config = WacastConfig::default();
        config.dispatcher.max_attempts = 0;
        config.dispatcher.default_delay_secs = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(has_error(&errors, "max_attempts"));
        assert!(has_error(&errors, "default_delay_secs"));
    }

    #[test]
    fn country_code_must_be_digits() {
        let mut config = WacastConfig::default();
        config.phone.country_code = "+55".to_string();
        assert!(has_error(
            &validate_config(&config).unwrap_err(),
            "country_code"
        ));
    }

    #[test]
    fn bridge_url_requires_websocket_scheme() {
        let mut config = WacastConfig::default();
        config.bridge.url = "http://localhost:8085".to_string();
        assert!(has_error(&validate_config(&config).unwrap_err(), "bridge.url"));
    }

    #[test]
    fn jitter_ratio_out_of_range_fails() {
        let mut config = WacastConfig::default();
        config.session.jitter_ratio = 1.5;
        assert!(has_error(
            &validate_config(&config).unwrap_err(),
            "jitter_ratio"
        ));
    }
}
