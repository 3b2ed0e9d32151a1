// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `wacast serve` command implementation.
//!
//! Opens storage, restores linked device sessions, then runs the guard
//! sweeper, the campaign dispatcher and the HTTP gateway until a shutdown
//! signal arrives. Shutdown closes transports without logging devices out,
//! so every linked device resumes on the next start.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use wacast_bridge::BridgeTransport;
use wacast_config::WacastConfig;
use wacast_core::{PluginAdapter, StorageAdapter, WacastError};
use wacast_dispatcher::Dispatcher;
use wacast_gateway::{AuthConfig, GatewayState, start_server};
use wacast_session::{GovernorPolicy, SendGuard, SessionSupervisor, run_guard_sweeper};
use wacast_storage::SqliteStorage;

use crate::shutdown;

/// How long background tasks get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub async fn run_serve(config: WacastConfig) -> Result<(), WacastError> {
    info!(name = %config.service.name, "starting wacast serve");

    let storage = Arc::new(SqliteStorage::new(config.storage.clone()));
    storage.initialize().await?;

    let transport = Arc::new(BridgeTransport::new(config.bridge.clone()));
    let phone = config.phone.rules();
    let guard = SendGuard::new(config.guard.dedup_window(), phone.clone());
    let supervisor = SessionSupervisor::new(
        transport.clone(),
        storage.clone(),
        guard,
        GovernorPolicy::from(&config.session),
    );

    let cancel = shutdown::install_signal_handler();

    if config.session.restore_on_startup {
        if let Err(e) = supervisor.restore().await {
            warn!(error = %e, "session restore failed");
        }
    }

    let mut tasks = JoinSet::new();
    tasks.spawn(run_guard_sweeper(
        supervisor.clone(),
        Duration::from_secs(config.guard.sweep_interval_secs.max(1)),
        cancel.clone(),
    ));

    if config.dispatcher.enabled {
        let dispatcher = Arc::new(Dispatcher::new(
            storage.clone(),
            Arc::new(supervisor.clone()),
            config.dispatcher.clone(),
            phone,
        ));
        tasks.spawn(dispatcher.run(cancel.clone()));
    } else {
        info!("campaign dispatcher disabled");
    }

    if config.gateway.enabled {
        let state = GatewayState::new(
            supervisor.clone(),
            storage.clone(),
            AuthConfig {
                bearer_token: config.gateway.bearer_token.clone(),
            },
        )
        .with_adapter(storage.clone())
        .with_adapter(transport.clone());
        let gateway_config = config.gateway.clone();
        let gateway_cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = start_server(&gateway_config, state, gateway_cancel.clone()).await {
                error!(error = %e, "gateway failed, shutting down");
                gateway_cancel.cancel();
            }
        });
    } else {
        info!("gateway disabled");
    }

    cancel.cancelled().await;
    info!("shutdown requested, draining background tasks");

    let drain = async { while tasks.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "background tasks did not stop in time, aborting"
        );
        tasks.abort_all();
    }

    supervisor.shutdown().await;
    if let Err(e) = transport.shutdown().await {
        warn!(error = %e, "transport shutdown failed");
    }
    storage.close().await?;
    info!("wacast stopped");
    Ok(())
}

/// Initializes the tracing subscriber with the given log level.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wacast={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
