// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! wacast - multi-tenant WhatsApp campaign sender.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod config;
mod prune;
mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// wacast - multi-tenant WhatsApp campaign sender.
#[derive(Parser, Debug)]
#[command(name = "wacast", version, about, long_about = None)]
struct Cli {
    /// Config file to load instead of the standard search path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run device sessions, the campaign dispatcher and the HTTP gateway.
    Serve,
    /// Remove auth state of devices whose pairing never completed.
    PruneAuth {
        /// List affected devices without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the configuration and print the effective values.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => wacast_config::load_and_validate_path(path),
        None => wacast_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            wacast_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => {
            serve::init_tracing(&config.service.log_level);
            serve::run_serve(config).await
        }
        Some(Commands::PruneAuth { dry_run }) => {
            serve::init_tracing(&config.service.log_level);
            prune::run_prune_auth(&config, dry_run)
                .await
                .map(|pruned| prune::report(&pruned, dry_run))
        }
        Some(Commands::Config {
            action: ConfigCommand::Check,
        }) => config::run_check(&config),
        None => {
            println!("wacast: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
