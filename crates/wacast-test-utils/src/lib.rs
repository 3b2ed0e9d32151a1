// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for wacast integration tests.
//!
//! Provides in-memory and scriptable stand-ins for the storage, transport
//! and sender seams so session and dispatch logic run deterministically
//! without a database file or a protocol sidecar.
//!
//! # Components
//!
//! - [`MemoryStore`] - In-memory auth-state and campaign store
//! - [`MockTransport`] / [`MockClient`] - Scriptable protocol transport
//! - [`MockSender`] - Scripted outbound sender for dispatcher tests

pub mod memory_store;
pub mod mock_sender;
pub mod mock_transport;

pub use memory_store::MemoryStore;
pub use mock_sender::MockSender;
pub use mock_transport::{MockClient, MockTransport};
