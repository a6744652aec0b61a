//! Invite token model and input normalization.
//!
//! # Invariants
//! - Tokens are 32 lowercase hex characters.
//! - `used_count <= max_uses` whenever `max_uses` is set.

use crate::model::tribe::TribeId;
use crate::model::UserId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{32}$").expect("valid invite token regex"));
static NON_DIGIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\D+").expect("valid non-digit regex"));

const MIN_PHONE_DIGITS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteToken {
    pub id: Uuid,
    pub tribe_id: TribeId,
    pub token: String,
    pub created_by: UserId,
    pub max_uses: Option<u32>,
    pub used_count: u32,
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

impl InviteToken {
    pub fn new(
        tribe_id: TribeId,
        created_by: impl Into<UserId>,
        max_uses: Option<u32>,
        expires_at: Option<i64>,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tribe_id,
            token: generate_token(),
            created_by: created_by.into(),
            max_uses,
            used_count: 0,
            expires_at,
            created_at,
        }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now_ms)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.used_count >= max)
    }

    pub fn remaining_uses(&self) -> Option<u32> {
        self.max_uses.map(|max| max.saturating_sub(self.used_count))
    }
}

/// What a prospective member sees before joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitePreview {
    pub tribe_id: TribeId,
    pub tribe_name: String,
    pub member_count: u32,
    pub expires_at: Option<i64>,
}

/// A single-use invite addressed to a phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsInvite {
    pub token: InviteToken,
    pub phone_digits: String,
}

/// Random 128-bit token rendered as lowercase hex.
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn is_well_formed_token(token: &str) -> bool {
    TOKEN_RE.is_match(token)
}

/// Strips formatting from a phone number. `None` when too short.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = NON_DIGIT_RE.replace_all(raw, "").into_owned();
    (digits.len() >= MIN_PHONE_DIGITS).then_some(digits)
}

#[cfg(test)]
mod tests {
    use super::{generate_token, is_well_formed_token, normalize_phone, InviteToken};
    use uuid::Uuid;

    #[test]
    fn generated_tokens_are_well_formed_and_distinct() {
        let first = generate_token();
        let second = generate_token();
        assert!(is_well_formed_token(&first));
        assert_ne!(first, second);
    }

    #[test]
    fn token_format_rejects_uppercase_and_dashes() {
        assert!(!is_well_formed_token("ABCDEF0123456789ABCDEF0123456789"));
        assert!(!is_well_formed_token(&Uuid::new_v4().to_string()));
        assert!(!is_well_formed_token(""));
    }

    #[test]
    fn phone_normalization_keeps_digits() {
        assert_eq!(
            normalize_phone("+1 (555) 010-9999").as_deref(),
            Some("15550109999")
        );
        assert_eq!(normalize_phone("555-01"), None);
    }

    #[test]
    fn expiry_and_exhaustion() {
        let mut token = InviteToken::new(Uuid::new_v4(), "owner", Some(1), Some(100), 0);
        assert!(!token.is_expired_at(99));
        assert!(token.is_expired_at(100));
        assert!(!token.is_exhausted());
        token.used_count = 1;
        assert!(token.is_exhausted());
        assert_eq!(token.remaining_uses(), Some(0));
    }
}
