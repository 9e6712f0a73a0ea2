/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Provider access token handling.
//!
//! The raw token is only reachable through [`Credential::expose`]; every
//! formatting path renders the masked form.

use serde::Deserialize;
use std::fmt;

/// Characters kept visible on each side of a masked token
pub const MASK_WINDOW: usize = 6;

/// API access token for the snapshot provider
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    /// Raw token, for handing to the provider process only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First and last few characters with the middle elided
    pub fn masked(&self) -> String {
        mask(&self.0)
    }

    /// Replace every occurrence of the token in `text` with its masked form
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        let masked = self.masked();
        let redacted = text.replace(&self.0, &masked);
        if redacted.contains(&self.0) {
            // Replacement stitched the token back together; drop the text.
            opaque(&self.0)
        } else {
            redacted
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Credential::new(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Credential::new(token)
    }
}

/// Mask a secret so at least half of it stays hidden.
///
/// Short secrets are shown with a smaller window, and secrets under four
/// characters are not shown at all.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let visible = MASK_WINDOW.min(chars.len() / 4);
    if visible == 0 {
        return opaque(secret);
    }

    let prefix: String = chars[..visible].iter().collect();
    let suffix: String = chars[chars.len() - visible..].iter().collect();
    let masked = format!("{prefix}...{suffix}");
    if masked.contains(secret) {
        opaque(secret)
    } else {
        masked
    }
}

/// Fixed filler that cannot contain `secret`
fn opaque(secret: &str) -> String {
    if !secret.is_empty() && secret.chars().all(|c| c == '*') {
        "###".to_string()
    } else {
        "***".to_string()
    }
}
