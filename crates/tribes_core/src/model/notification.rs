//! Notification kinds and the per-day send log.

use crate::model::UserId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// One push per created proposal, to its recipient.
    TribeProposal,
    /// At most one batched summary per (user, tribe) per window.
    TribeDigest,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TribeProposal => "tribe_proposal",
            Self::TribeDigest => "tribe_digest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tribe_proposal" => Some(Self::TribeProposal),
            "tribe_digest" => Some(Self::TribeDigest),
            _ => None,
        }
    }
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `notification_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: NotificationKind,
    /// Tribe id for digests.
    pub reference_id: String,
    pub sent_at: i64,
    pub day_bucket: i64,
}

impl NotificationLogEntry {
    pub fn new(
        user_id: impl Into<UserId>,
        kind: NotificationKind,
        reference_id: impl Into<String>,
        sent_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            kind,
            reference_id: reference_id.into(),
            sent_at,
            day_bucket: crate::clock::day_bucket(sent_at),
        }
    }
}
