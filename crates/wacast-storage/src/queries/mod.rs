// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query functions, one module per table group.

pub mod auth;
pub mod campaigns;
pub mod send_jobs;
