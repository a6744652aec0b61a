//! Personal item model.
//!
//! # Responsibility
//! - Represent the user's own appointments, todos, routines and groceries.
//! - Map an accepted tribe item payload into the matching personal record.
//!
//! # Invariants
//! - A personal item is owned by exactly one user.
//! - Once materialized, a personal item has no lifecycle link back to the
//!   tribe beyond its `origin` provenance.

use crate::model::item::{ItemId, ItemType};
use crate::model::proposal::ProposalId;
use crate::model::tribe::TribeId;
use crate::model::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type PersonalItemId = Uuid;

/// Per-user table a personal item lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalItemKind {
    Appointment,
    Todo,
    Routine,
    Grocery,
}

impl PersonalItemKind {
    pub const ALL: [PersonalItemKind; 4] = [
        PersonalItemKind::Appointment,
        PersonalItemKind::Todo,
        PersonalItemKind::Routine,
        PersonalItemKind::Grocery,
    ];

    /// Target kind for an accepted tribe item.
    pub fn for_item_type(item_type: ItemType) -> Self {
        match item_type {
            ItemType::Appointment => Self::Appointment,
            ItemType::Task => Self::Todo,
            ItemType::Routine => Self::Routine,
            ItemType::Grocery => Self::Grocery,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::Todo => "todo",
            Self::Routine => "routine",
            Self::Grocery => "grocery",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "appointment" => Some(Self::Appointment),
            "todo" => Some(Self::Todo),
            "routine" => Some(Self::Routine),
            "grocery" => Some(Self::Grocery),
            _ => None,
        }
    }

    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Appointment => "appointments",
            Self::Todo => "todos",
            Self::Routine => "routines",
            Self::Grocery => "grocery_items",
        }
    }
}

impl Display for PersonalItemKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineFrequency {
    #[default]
    Daily,
    Weekly,
}

impl RoutineFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }
}

/// Provenance of a personal item copied from a tribe proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub item_id: ItemId,
    pub proposal_id: ProposalId,
    pub tribe_id: TribeId,
    pub tribe_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersonalItemContent {
    Appointment {
        title: String,
        with_whom: Option<String>,
        location: Option<String>,
        datetime: Option<i64>,
        duration_minutes: Option<i64>,
    },
    Todo {
        title: String,
        priority: Priority,
        due_date: Option<i64>,
    },
    Routine {
        title: String,
        frequency: RoutineFrequency,
        days_of_week: Vec<String>,
    },
    Grocery {
        content: String,
    },
}

impl PersonalItemContent {
    pub fn kind(&self) -> PersonalItemKind {
        match self {
            Self::Appointment { .. } => PersonalItemKind::Appointment,
            Self::Todo { .. } => PersonalItemKind::Todo,
            Self::Routine { .. } => PersonalItemKind::Routine,
            Self::Grocery { .. } => PersonalItemKind::Grocery,
        }
    }

    /// Builds personal content from a tribe item payload.
    ///
    /// Payload keys are camelCase (`withWhom`, `dueDate`, `daysOfWeek`, ...).
    /// Grocery payloads may name their text `content`, `name` or `title`.
    pub fn from_item_data(item_type: ItemType, data: &Value) -> Result<Self, PayloadError> {
        match item_type {
            ItemType::Appointment => Ok(Self::Appointment {
                title: required_text(data, &["title"])?,
                with_whom: optional_text(data, "withWhom"),
                location: optional_text(data, "location"),
                datetime: optional_i64(data, "datetime"),
                duration_minutes: optional_i64(data, "durationMinutes"),
            }),
            ItemType::Task => Ok(Self::Todo {
                title: required_text(data, &["title"])?,
                priority: optional_text(data, "priority")
                    .and_then(|value| Priority::parse(&value))
                    .unwrap_or_default(),
                due_date: optional_i64(data, "dueDate"),
            }),
            ItemType::Routine => Ok(Self::Routine {
                title: required_text(data, &["title"])?,
                frequency: optional_text(data, "frequency")
                    .and_then(|value| RoutineFrequency::parse(&value))
                    .unwrap_or_default(),
                days_of_week: data
                    .get("daysOfWeek")
                    .and_then(Value::as_array)
                    .map(|days| {
                        days.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            ItemType::Grocery => Ok(Self::Grocery {
                content: required_text(data, &["content", "name", "title"])?,
            }),
        }
    }
}

/// A user-owned item, optionally carrying tribe provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalItem {
    pub id: PersonalItemId,
    pub user_id: UserId,
    pub content: PersonalItemContent,
    pub origin: Option<Origin>,
    pub created_at: i64,
}

impl PersonalItem {
    pub fn new(
        user_id: impl Into<UserId>,
        content: PersonalItemContent,
        origin: Option<Origin>,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            content,
            origin,
            created_at,
        }
    }

    pub fn kind(&self) -> PersonalItemKind {
        self.content.kind()
    }
}

/// Marks a tribe item the user deleted from their personal lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub user_id: UserId,
    pub origin_item_id: ItemId,
    pub origin_tribe_id: Option<TribeId>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    MissingField(&'static str),
}

impl Display for PayloadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "item payload is missing `{field}`"),
        }
    }
}

impl Error for PayloadError {}

fn required_text(data: &Value, keys: &[&'static str]) -> Result<String, PayloadError> {
    keys.iter()
        .find_map(|key| optional_text(data, key))
        .ok_or(PayloadError::MissingField(keys[0]))
}

fn optional_text(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn optional_i64(data: &Value, key: &str) -> Option<i64> {
    data.get(key).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::{PayloadError, PersonalItemContent, PersonalItemKind, Priority, RoutineFrequency};
    use crate::model::item::ItemType;
    use serde_json::json;

    #[test]
    fn task_maps_to_todo_with_priority() {
        let content = PersonalItemContent::from_item_data(
            ItemType::Task,
            &json!({"title": "Call plumber", "priority": "HIGH", "dueDate": 1700}),
        )
        .expect("task payload");
        assert_eq!(
            content,
            PersonalItemContent::Todo {
                title: "Call plumber".to_string(),
                priority: Priority::High,
                due_date: Some(1700),
            }
        );
        assert_eq!(content.kind(), PersonalItemKind::Todo);
    }

    #[test]
    fn routine_defaults_frequency_and_days() {
        let content =
            PersonalItemContent::from_item_data(ItemType::Routine, &json!({"title": "Stretch"}))
                .expect("routine payload");
        assert_eq!(
            content,
            PersonalItemContent::Routine {
                title: "Stretch".to_string(),
                frequency: RoutineFrequency::Daily,
                days_of_week: Vec::new(),
            }
        );
    }

    #[test]
    fn grocery_falls_back_to_name() {
        let content =
            PersonalItemContent::from_item_data(ItemType::Grocery, &json!({"name": "Milk"}))
                .expect("grocery payload");
        assert_eq!(
            content,
            PersonalItemContent::Grocery {
                content: "Milk".to_string()
            }
        );
    }

    #[test]
    fn blank_title_is_missing() {
        let err =
            PersonalItemContent::from_item_data(ItemType::Appointment, &json!({"title": "  "}))
                .expect_err("blank title");
        assert_eq!(err, PayloadError::MissingField("title"));
    }

    #[test]
    fn every_item_type_has_a_kind() {
        for item_type in ItemType::ALL {
            let kind = PersonalItemKind::for_item_type(item_type);
            assert_eq!(PersonalItemKind::parse(kind.as_str()), Some(kind));
        }
    }
}
