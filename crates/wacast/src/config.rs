// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `wacast config check`: prints the effective configuration.

use wacast_config::WacastConfig;
use wacast_core::WacastError;

const REDACTED: &str = "[redacted]";

/// Effective configuration as TOML, with secrets masked.
pub fn render_effective(config: &WacastConfig) -> Result<String, WacastError> {
    let mut shown = config.clone();
    if shown.gateway.bearer_token.is_some() {
        shown.gateway.bearer_token = Some(REDACTED.to_string());
    }
    if shown.bridge.api_key.is_some() {
        shown.bridge.api_key = Some(REDACTED.to_string());
    }
    toml::to_string_pretty(&shown)
        .map_err(|e| WacastError::Config(format!("failed to render config: {e}")))
}

pub fn run_check(config: &WacastConfig) -> Result<(), WacastError> {
    let rendered = render_effective(config)?;
    println!("# configuration is valid");
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_defaults() {
        let rendered = render_effective(&WacastConfig::default()).unwrap();
        assert!(rendered.contains("[dispatcher]"));
        assert!(rendered.contains("poll_interval_secs = 60"));
        assert!(rendered.contains("country_code = \"55\""));
        assert!(!rendered.contains(REDACTED));
    }

    #[test]
    fn secrets_are_masked() {
        let config = wacast_config::load_and_validate_str(
            r#"
[gateway]
bearer_token = "dashboard-token"

[bridge]
api_key = "sidecar-key"
"#,
        )
        .unwrap();
        let rendered = render_effective(&config).unwrap();
        assert!(!rendered.contains("dashboard-token"));
        assert!(!rendered.contains("sidecar-key"));
        assert_eq!(rendered.matches(REDACTED).count(), 2);
    }
}
