// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for wacast.
//!
//! WAL-mode SQLite with embedded migrations and a single writer thread via
//! `tokio-rusqlite`. Holds the auth records that let devices resume after a
//! restart, and the campaign and send job rows that record send progress.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use adapter::SqliteStorage;
pub use database::Database;
