// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Phone number normalization.
//!
//! Every place that compares, stores or addresses a phone number goes through
//! [`PhoneRules::normalize`]. Recipient dedup, job keys, guard keys and wire
//! addresses all depend on the same canonical form.

use serde::{Deserialize, Serialize};

/// Domain suffix of a user address on the wire.
pub const USER_JID_SUFFIX: &str = "@s.whatsapp.net";

/// Numbering plan used to canonicalize local phone input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneRules {
    /// Country calling code, digits only.
    pub country_code: String,
    pub area_code_len: usize,
    /// Subscriber digits without the mobile prefix.
    pub subscriber_len: usize,
}

impl Default for PhoneRules {
    fn default() -> Self {
        Self {
            country_code: "55".to_string(),
            area_code_len: 2,
            subscriber_len: 8,
        }
    }
}

impl PhoneRules {
    /// Canonical digits-only form of `input`.
    ///
    /// Strips non-digits, prepends the country code when absent, then drops
    /// the mobile prefix `9` from numbers exactly one digit longer than
    /// country code + area code + subscriber. Idempotent.
    pub fn normalize(&self, input: &str) -> String {
        let mut digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
        if !digits.starts_with(&self.country_code) {
            digits.insert_str(0, &self.country_code);
        }

        let expected = self.country_code.len() + self.area_code_len + self.subscriber_len;
        let prefix_at = self.country_code.len() + self.area_code_len;
        if digits.len() == expected + 1 && digits.as_bytes()[prefix_at] == b'9' {
            digits.remove(prefix_at);
        }
        digits
    }

    /// Wire address for `input`, which may be a raw phone or an address.
    pub fn to_jid(&self, input: &str) -> String {
        let user = input.split('@').next().unwrap_or_default();
        format!("{}{USER_JID_SUFFIX}", self.normalize(user))
    }
}
