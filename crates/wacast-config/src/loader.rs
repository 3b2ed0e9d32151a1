// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered config loading with Figment.
//!
//! `./wacast.toml` > `~/.config/wacast/wacast.toml` > `/etc/wacast/wacast.toml`,
//! with `WACAST_` environment overrides on top.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::WacastConfig;

/// Sections whose env keys are split after the section name.
const SECTIONS: &[&str] = &[
    "service",
    "storage",
    "gateway",
    "session",
    "guard",
    "dispatcher",
    "phone",
    "bridge",
];

/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/wacast/wacast.toml`
/// 3. `~/.config/wacast/wacast.toml`
/// 4. `./wacast.toml`
/// 5. `WACAST_*` environment variables
pub fn load_config() -> Result<WacastConfig, figment::Error> {
    build_figment().extract()
}

/// Defaults plus an inline TOML string, no files or env.
pub fn load_config_from_str(toml_content: &str) -> Result<WacastConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WacastConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Defaults, one explicit file, then env overrides.
pub fn load_config_from_path(path: &Path) -> Result<WacastConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WacastConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The full hierarchy before extraction.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new().merge(Serialized::defaults(WacastConfig::default()));
    for path in search_paths() {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(env_provider())
}

/// Config files consulted by [`load_config`], lowest precedence first.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/wacast/wacast.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("wacast/wacast.toml"));
    }
    paths.push(PathBuf::from("wacast.toml"));
    paths
}

/// `WACAST_GATEWAY_BEARER_TOKEN` maps to `gateway.bearer_token`.
///
/// Only the first underscore after a known section name becomes a dot, so
/// keys that contain underscores stay intact.
fn env_provider() -> Env {
    Env::prefixed("WACAST_").map(|key| {
        let key_str = key.as_str();
        for section in SECTIONS {
            if let Some(rest) = key_str
                .strip_prefix(section)
                .and_then(|r| r.strip_prefix('_'))
            {
                return format!("{section}.{rest}").into();
            }
        }
        key_str.to_string().into()
    })
}
