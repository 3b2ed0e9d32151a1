// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign dispatcher for wacast.
//!
//! On every poll the dispatcher claims due campaigns with a lease, expands
//! each recipient list into one send job per normalized phone, and sends
//! the remaining jobs one at a time with the campaign's delay between
//! sends. Every job result is written as soon as it is known, so a crashed
//! or interrupted run resumes from the first job still `Scheduled` once its
//! lease expires.

pub mod dispatcher;
pub mod plan;

pub use dispatcher::{CampaignRun, CycleReport, Dispatcher};
pub use plan::plan_jobs;
