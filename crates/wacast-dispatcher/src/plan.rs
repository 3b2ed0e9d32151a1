// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;

use tracing::warn;
use wacast_core::PhoneRules;
use wacast_core::types::{NewSendJob, RecipientList};

/// One job per distinct normalized phone, in list order.
///
/// Later duplicates of a number are dropped; contacts without any digits
/// are skipped.
pub fn plan_jobs(list: &RecipientList, rules: &PhoneRules) -> Vec<NewSendJob> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(list.contacts.len());
    for (position, contact) in list.contacts.iter().enumerate() {
        if !contact.phone.chars().any(|c| c.is_ascii_digit()) {
            warn!(list_id = %list.id, position, "contact has no phone digits, skipped");
            continue;
        }
        let phone = rules.normalize(&contact.phone);
        if !seen.insert(phone.clone()) {
            continue;
        }
        let name = contact.name.trim();
        jobs.push(NewSendJob {
            position: position as i64,
            recipient_name: (!name.is_empty()).then(|| name.to_string()),
            recipient_phone: phone,
        });
    }
    jobs
}
