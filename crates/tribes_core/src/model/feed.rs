//! Tribe messages and the coordination activity feed.

use crate::model::tribe::TribeId;
use crate::model::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TribeMessage {
    pub id: Uuid,
    pub tribe_id: TribeId,
    pub user_id: UserId,
    pub body: String,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

impl TribeMessage {
    pub fn new(
        tribe_id: TribeId,
        user_id: impl Into<UserId>,
        body: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tribe_id,
            user_id: user_id.into(),
            body: body.into(),
            created_at,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    System,
    Admin,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Tribe-visible coordination event (joins, leaves, deletion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TribeActivity {
    pub id: Uuid,
    pub tribe_id: TribeId,
    pub kind: ActivityKind,
    pub message: String,
    pub created_by: Option<UserId>,
    pub created_at: i64,
}

impl TribeActivity {
    pub fn new(
        tribe_id: TribeId,
        kind: ActivityKind,
        message: impl Into<String>,
        created_by: Option<UserId>,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tribe_id,
            kind,
            message: message.into(),
            created_by,
            created_at,
        }
    }
}
