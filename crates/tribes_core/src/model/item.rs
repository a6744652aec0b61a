//! Shared tribe item model.
//!
//! # Invariants
//! - An item is immutable once created; there is no edit path.
//! - `data` is an opaque JSON object whose shape depends on `item_type`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ItemId = Uuid;

/// Kind of content a tribe member can propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Appointment,
    Task,
    Routine,
    Grocery,
}

impl ItemType {
    pub const ALL: [ItemType; 4] = [
        ItemType::Appointment,
        ItemType::Task,
        ItemType::Routine,
        ItemType::Grocery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::Task => "task",
            Self::Routine => "routine",
            Self::Grocery => "grocery",
        }
    }

    /// Plural noun used in user-facing messages.
    pub fn plural_noun(self) -> &'static str {
        match self {
            Self::Appointment => "appointments",
            Self::Task => "tasks",
            Self::Routine => "routines",
            Self::Grocery => "groceries",
        }
    }

    /// Parses the wire/storage spelling. Exact lowercase match only.
    pub fn parse(value: &str) -> Result<Self, ItemTypeError> {
        match value {
            "appointment" => Ok(Self::Appointment),
            "task" => Ok(Self::Task),
            "routine" => Ok(Self::Routine),
            "grocery" => Ok(Self::Grocery),
            other => Err(ItemTypeError(other.to_string())),
        }
    }
}

impl Display for ItemType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTypeError(pub String);

impl Display for ItemTypeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid item type `{}`; expected appointment|task|routine|grocery",
            self.0
        )
    }
}

impl Error for ItemTypeError {}

/// Content proposed to one or more tribe members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TribeItem {
    pub id: ItemId,
    pub tribe_id: Uuid,
    pub created_by: String,
    pub item_type: ItemType,
    pub data: serde_json::Value,
    pub created_at: i64,
}

impl TribeItem {
    pub fn new(
        tribe_id: Uuid,
        created_by: impl Into<String>,
        item_type: ItemType,
        data: serde_json::Value,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tribe_id,
            created_by: created_by.into(),
            item_type,
            data,
            created_at,
        }
    }
}
