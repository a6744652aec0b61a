//! Personal item and suppression persistence.
//!
//! # Responsibility
//! - CRUD over `appointments`, `todos`, `routines` and `grocery_items`.
//! - Delete a personal item and record its suppression in one transaction.
//! - Insert materialized copies only when the origin is not suppressed.
//!
//! # Invariants
//! - Every read and delete is scoped by `user_id`.
//! - At most one copy per `(user_id, origin_item_id)` per table.
//! - Deletion writes nothing outside the personal tables and
//!   `personal_item_suppressions`.

use crate::model::item::ItemId;
use crate::model::personal::{
    Origin, PersonalItem, PersonalItemContent, PersonalItemId, PersonalItemKind, Priority,
    RoutineFrequency, SuppressionEntry,
};
use crate::repo::{begin_immediate, parse_optional_uuid, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

/// Outcome of inserting a copy of a tribe item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeWrite {
    Inserted,
    Suppressed,
    AlreadyExists,
}

pub trait PersonalItemRepository {
    /// Inserts an item. Returns `false` if a copy of its origin already exists.
    fn insert_item(&self, item: &PersonalItem) -> RepoResult<bool>;
    /// Inserts a tribe-origin copy unless suppressed or already present.
    fn insert_materialized(&self, item: &PersonalItem) -> RepoResult<MaterializeWrite>;
    fn get_item(
        &self,
        user_id: &str,
        kind: PersonalItemKind,
        item_id: PersonalItemId,
    ) -> RepoResult<Option<PersonalItem>>;
    /// Items of one kind, newest first.
    fn list_items(&self, user_id: &str, kind: PersonalItemKind) -> RepoResult<Vec<PersonalItem>>;
    fn has_origin_copy(&self, user_id: &str, origin_item_id: ItemId) -> RepoResult<bool>;
    /// Deletes the user's item and suppresses its origin atomically.
    /// Returns the deleted item, or `None` if the user owns no such item.
    fn delete_and_suppress(
        &self,
        user_id: &str,
        kind: PersonalItemKind,
        item_id: PersonalItemId,
        now_ms: i64,
    ) -> RepoResult<Option<PersonalItem>>;
    fn is_suppressed(&self, user_id: &str, origin_item_id: ItemId) -> RepoResult<bool>;
    /// The subset of `origin_item_ids` suppressed for `user_id`.
    fn suppressed_among(
        &self,
        user_id: &str,
        origin_item_ids: &[ItemId],
    ) -> RepoResult<HashSet<ItemId>>;
    fn list_suppressions(&self, user_id: &str) -> RepoResult<Vec<SuppressionEntry>>;
}

pub struct SqlitePersonalItemRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePersonalItemRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl PersonalItemRepository for SqlitePersonalItemRepository<'_> {
    fn insert_item(&self, item: &PersonalItem) -> RepoResult<bool> {
        match insert_row(self.conn, item) {
            Ok(()) => Ok(true),
            Err(err) if item.origin.is_some() && err.is_unique_violation() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn insert_materialized(&self, item: &PersonalItem) -> RepoResult<MaterializeWrite> {
        let Some(origin) = item.origin.as_ref() else {
            return Err(RepoError::InvalidData(
                "materialized personal items must carry an origin".to_string(),
            ));
        };

        let tx = begin_immediate(self.conn)?;
        if suppression_exists(&tx, &item.user_id, origin.item_id)? {
            return Ok(MaterializeWrite::Suppressed);
        }
        if origin_copy_exists(&tx, &item.user_id, origin.item_id)? {
            return Ok(MaterializeWrite::AlreadyExists);
        }
        insert_row(&tx, item)?;
        tx.commit()?;
        Ok(MaterializeWrite::Inserted)
    }

    fn get_item(
        &self,
        user_id: &str,
        kind: PersonalItemKind,
        item_id: PersonalItemId,
    ) -> RepoResult<Option<PersonalItem>> {
        get_row(self.conn, user_id, kind, item_id)
    }

    fn list_items(&self, user_id: &str, kind: PersonalItemKind) -> RepoResult<Vec<PersonalItem>> {
        let sql = format!(
            "{} WHERE user_id = ?1 ORDER BY created_at DESC, id ASC;",
            select_sql(kind)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([user_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_row(kind, row)?);
        }
        Ok(items)
    }

    fn has_origin_copy(&self, user_id: &str, origin_item_id: ItemId) -> RepoResult<bool> {
        origin_copy_exists(self.conn, user_id, origin_item_id)
    }

    fn delete_and_suppress(
        &self,
        user_id: &str,
        kind: PersonalItemKind,
        item_id: PersonalItemId,
        now_ms: i64,
    ) -> RepoResult<Option<PersonalItem>> {
        let tx = begin_immediate(self.conn)?;
        let Some(item) = get_row(&tx, user_id, kind, item_id)? else {
            return Ok(None);
        };

        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1 AND user_id = ?2;", kind.table()),
            params![item_id.to_string(), user_id],
        )?;

        if let Some(origin) = item.origin.as_ref() {
            tx.execute(
                "INSERT INTO personal_item_suppressions (
                    user_id,
                    origin_item_id,
                    origin_tribe_id,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (user_id, origin_item_id) DO NOTHING;",
                params![
                    user_id,
                    origin.item_id.to_string(),
                    origin.tribe_id.to_string(),
                    now_ms
                ],
            )?;
        }

        tx.commit()?;
        Ok(Some(item))
    }

    fn is_suppressed(&self, user_id: &str, origin_item_id: ItemId) -> RepoResult<bool> {
        suppression_exists(self.conn, user_id, origin_item_id)
    }

    fn suppressed_among(
        &self,
        user_id: &str,
        origin_item_ids: &[ItemId],
    ) -> RepoResult<HashSet<ItemId>> {
        let mut stmt = self.conn.prepare(
            "SELECT 1
             FROM personal_item_suppressions
             WHERE user_id = ?1
               AND origin_item_id = ?2;",
        )?;
        let mut suppressed = HashSet::new();
        for origin_item_id in origin_item_ids {
            if stmt.exists(params![user_id, origin_item_id.to_string()])? {
                suppressed.insert(*origin_item_id);
            }
        }
        Ok(suppressed)
    }

    fn list_suppressions(&self, user_id: &str) -> RepoResult<Vec<SuppressionEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, origin_item_id, origin_tribe_id, created_at
             FROM personal_item_suppressions
             WHERE user_id = ?1
             ORDER BY created_at DESC, origin_item_id ASC;",
        )?;
        let mut rows = stmt.query([user_id])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let origin_text: String = row.get(1)?;
            entries.push(SuppressionEntry {
                user_id: row.get(0)?,
                origin_item_id: parse_uuid(
                    &origin_text,
                    "personal_item_suppressions.origin_item_id",
                )?,
                origin_tribe_id: parse_optional_uuid(
                    row.get(2)?,
                    "personal_item_suppressions.origin_tribe_id",
                )?,
                created_at: row.get(3)?,
            });
        }
        Ok(entries)
    }
}

fn suppression_exists(conn: &Connection, user_id: &str, origin_item_id: ItemId) -> RepoResult<bool> {
    let exists = conn
        .prepare_cached(
            "SELECT 1
             FROM personal_item_suppressions
             WHERE user_id = ?1
               AND origin_item_id = ?2;",
        )?
        .exists(params![user_id, origin_item_id.to_string()])?;
    Ok(exists)
}

fn origin_copy_exists(conn: &Connection, user_id: &str, origin_item_id: ItemId) -> RepoResult<bool> {
    let origin_text = origin_item_id.to_string();
    for kind in PersonalItemKind::ALL {
        let sql = format!(
            "SELECT 1 FROM {} WHERE user_id = ?1 AND origin_item_id = ?2;",
            kind.table()
        );
        if conn.prepare(&sql)?.exists(params![user_id, origin_text.as_str()])? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn content_columns(kind: PersonalItemKind) -> &'static str {
    match kind {
        PersonalItemKind::Appointment => "title, with_whom, location, datetime, duration_minutes",
        PersonalItemKind::Todo => "title, priority, due_date",
        PersonalItemKind::Routine => "title, frequency, days_of_week",
        PersonalItemKind::Grocery => "content",
    }
}

fn content_column_count(kind: PersonalItemKind) -> usize {
    match kind {
        PersonalItemKind::Appointment => 5,
        PersonalItemKind::Todo | PersonalItemKind::Routine => 3,
        PersonalItemKind::Grocery => 1,
    }
}

fn select_sql(kind: PersonalItemKind) -> String {
    format!(
        "SELECT id, user_id, {}, origin_item_id, origin_proposal_id, origin_tribe_id, origin_tribe_name, created_at
         FROM {}",
        content_columns(kind),
        kind.table()
    )
}

fn get_row(
    conn: &Connection,
    user_id: &str,
    kind: PersonalItemKind,
    item_id: PersonalItemId,
) -> RepoResult<Option<PersonalItem>> {
    let sql = format!("{} WHERE id = ?1 AND user_id = ?2;", select_sql(kind));
    conn.query_row(&sql, params![item_id.to_string(), user_id], |row| {
        Ok(parse_row(kind, row))
    })
    .optional()?
    .transpose()
}

fn insert_row(conn: &Connection, item: &PersonalItem) -> RepoResult<()> {
    let origin = item.origin.as_ref();
    let origin_item_id = origin.map(|origin| origin.item_id.to_string());
    let origin_proposal_id = origin.map(|origin| origin.proposal_id.to_string());
    let origin_tribe_id = origin.map(|origin| origin.tribe_id.to_string());
    let origin_tribe_name = origin.map(|origin| origin.tribe_name.as_str());
    let id = item.id.to_string();
    let user_id = item.user_id.as_str();

    match &item.content {
        PersonalItemContent::Appointment {
            title,
            with_whom,
            location,
            datetime,
            duration_minutes,
        } => conn.execute(
            "INSERT INTO appointments (
                id, user_id, title, with_whom, location, datetime, duration_minutes,
                origin_item_id, origin_proposal_id, origin_tribe_id, origin_tribe_name, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
            params![
                id,
                user_id,
                title,
                with_whom,
                location,
                datetime,
                duration_minutes,
                origin_item_id,
                origin_proposal_id,
                origin_tribe_id,
                origin_tribe_name,
                item.created_at,
            ],
        )?,
        PersonalItemContent::Todo {
            title,
            priority,
            due_date,
        } => conn.execute(
            "INSERT INTO todos (
                id, user_id, title, priority, due_date,
                origin_item_id, origin_proposal_id, origin_tribe_id, origin_tribe_name, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                id,
                user_id,
                title,
                priority.as_str(),
                due_date,
                origin_item_id,
                origin_proposal_id,
                origin_tribe_id,
                origin_tribe_name,
                item.created_at,
            ],
        )?,
        PersonalItemContent::Routine {
            title,
            frequency,
            days_of_week,
        } => {
            let days = serde_json::to_string(days_of_week).map_err(|err| {
                RepoError::InvalidData(format!("unserializable days_of_week: {err}"))
            })?;
            conn.execute(
                "INSERT INTO routines (
                    id, user_id, title, frequency, days_of_week,
                    origin_item_id, origin_proposal_id, origin_tribe_id, origin_tribe_name, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
                params![
                    id,
                    user_id,
                    title,
                    frequency.as_str(),
                    days,
                    origin_item_id,
                    origin_proposal_id,
                    origin_tribe_id,
                    origin_tribe_name,
                    item.created_at,
                ],
            )?
        }
        PersonalItemContent::Grocery { content } => conn.execute(
            "INSERT INTO grocery_items (
                id, user_id, content,
                origin_item_id, origin_proposal_id, origin_tribe_id, origin_tribe_name, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                id,
                user_id,
                content,
                origin_item_id,
                origin_proposal_id,
                origin_tribe_id,
                origin_tribe_name,
                item.created_at,
            ],
        )?,
    };
    Ok(())
}

fn parse_row(kind: PersonalItemKind, row: &Row<'_>) -> RepoResult<PersonalItem> {
    let id_text: String = row.get(0)?;
    let table = kind.table();
    let content = match kind {
        PersonalItemKind::Appointment => PersonalItemContent::Appointment {
            title: row.get(2)?,
            with_whom: row.get(3)?,
            location: row.get(4)?,
            datetime: row.get(5)?,
            duration_minutes: row.get(6)?,
        },
        PersonalItemKind::Todo => {
            let priority_text: String = row.get(3)?;
            PersonalItemContent::Todo {
                title: row.get(2)?,
                priority: Priority::parse(&priority_text).ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "invalid priority `{priority_text}` in todos.priority"
                    ))
                })?,
                due_date: row.get(4)?,
            }
        }
        PersonalItemKind::Routine => {
            let frequency_text: String = row.get(3)?;
            let days_text: String = row.get(4)?;
            PersonalItemContent::Routine {
                title: row.get(2)?,
                frequency: RoutineFrequency::parse(&frequency_text).ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "invalid frequency `{frequency_text}` in routines.frequency"
                    ))
                })?,
                days_of_week: serde_json::from_str(&days_text).map_err(|err| {
                    RepoError::InvalidData(format!("invalid json in routines.days_of_week: {err}"))
                })?,
            }
        }
        PersonalItemKind::Grocery => PersonalItemContent::Grocery {
            content: row.get(2)?,
        },
    };

    let base = 2 + content_column_count(kind);
    let origin_item: Option<String> = row.get(base)?;
    let origin = match origin_item {
        Some(origin_item_text) => {
            let proposal_text: Option<String> = row.get(base + 1)?;
            let tribe_text: Option<String> = row.get(base + 2)?;
            let tribe_name: Option<String> = row.get(base + 3)?;
            match (proposal_text, tribe_text) {
                (Some(proposal_text), Some(tribe_text)) => Some(Origin {
                    item_id: parse_uuid(&origin_item_text, &format!("{table}.origin_item_id"))?,
                    proposal_id: parse_uuid(
                        &proposal_text,
                        &format!("{table}.origin_proposal_id"),
                    )?,
                    tribe_id: parse_uuid(&tribe_text, &format!("{table}.origin_tribe_id"))?,
                    tribe_name: tribe_name.unwrap_or_default(),
                }),
                _ => {
                    return Err(RepoError::InvalidData(format!(
                        "partial origin in {table} row {id_text}"
                    )))
                }
            }
        }
        None => None,
    };

    Ok(PersonalItem {
        id: parse_uuid(&id_text, &format!("{table}.id"))?,
        user_id: row.get(1)?,
        content,
        origin,
        created_at: row.get(base + 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::{MaterializeWrite, PersonalItemRepository, SqlitePersonalItemRepository};
    use crate::db::open_db_in_memory;
    use crate::model::personal::{
        Origin, PersonalItem, PersonalItemContent, PersonalItemKind, RoutineFrequency,
    };
    use uuid::Uuid;

    fn routine_copy(user_id: &str, origin_item_id: Uuid) -> PersonalItem {
        PersonalItem::new(
            user_id,
            PersonalItemContent::Routine {
                title: "Walk dog".to_string(),
                frequency: RoutineFrequency::Weekly,
                days_of_week: vec!["mon".to_string(), "thu".to_string()],
            },
            Some(Origin {
                item_id: origin_item_id,
                proposal_id: Uuid::new_v4(),
                tribe_id: Uuid::new_v4(),
                tribe_name: "Family".to_string(),
            }),
            10,
        )
    }

    #[test]
    fn routine_round_trips_with_origin() {
        let conn = open_db_in_memory().expect("db");
        let repo = SqlitePersonalItemRepository::new(&conn);
        let item = routine_copy("alice", Uuid::new_v4());
        assert!(repo.insert_item(&item).expect("insert"));

        let loaded = repo
            .get_item("alice", PersonalItemKind::Routine, item.id)
            .expect("query")
            .expect("row");
        assert_eq!(loaded, item);
        assert!(repo
            .get_item("bob", PersonalItemKind::Routine, item.id)
            .expect("query")
            .is_none());
    }

    #[test]
    fn second_copy_of_same_origin_is_rejected() {
        let conn = open_db_in_memory().expect("db");
        let repo = SqlitePersonalItemRepository::new(&conn);
        let origin = Uuid::new_v4();
        assert_eq!(
            repo.insert_materialized(&routine_copy("alice", origin))
                .expect("first"),
            MaterializeWrite::Inserted
        );
        assert_eq!(
            repo.insert_materialized(&routine_copy("alice", origin))
                .expect("second"),
            MaterializeWrite::AlreadyExists
        );
        assert!(!repo
            .insert_item(&routine_copy("alice", origin))
            .expect("direct insert"));
    }

    #[test]
    fn delete_suppresses_origin_and_blocks_recopy() {
        let conn = open_db_in_memory().expect("db");
        let repo = SqlitePersonalItemRepository::new(&conn);
        let origin = Uuid::new_v4();
        let item = routine_copy("alice", origin);
        repo.insert_item(&item).expect("insert");

        let deleted = repo
            .delete_and_suppress("alice", PersonalItemKind::Routine, item.id, 20)
            .expect("delete");
        assert_eq!(deleted.map(|item| item.id), Some(item.id));
        assert!(repo.is_suppressed("alice", origin).expect("lookup"));
        assert!(!repo.is_suppressed("bob", origin).expect("lookup"));
        assert_eq!(
            repo.insert_materialized(&routine_copy("alice", origin))
                .expect("recopy"),
            MaterializeWrite::Suppressed
        );
    }
}
