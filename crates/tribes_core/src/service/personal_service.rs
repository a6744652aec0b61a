//! Personal items and silent deletion.
//!
//! # Responsibility
//! - Delete personal items without any tribe-visible trace.
//! - Remember deleted tribe-origin items so they are never re-added.
//! - Rebuild missing copies of accepted proposals on resync.
//!
//! # Invariants
//! - Only the owning user can read or delete a personal item.
//! - Deletion never writes to activities, messages or notifications.
//! - A suppressed origin is never materialized again for that user.

use crate::model::item::{ItemId, TribeItem};
use crate::model::personal::{
    Origin, PersonalItem, PersonalItemContent, PersonalItemId, PersonalItemKind,
};
use crate::model::proposal::ProposalId;
use crate::repo::{
    MaterializeWrite, PersonalItemRepository, ProposalRepository, SqlitePersonalItemRepository,
    SqliteProposalRepository,
};
use crate::service::context::ServiceContext;
use crate::service::error::{require_user, TribeError, TribeResult};
use log::{info, warn};
use rusqlite::Connection;
use std::collections::HashSet;

/// Outcome of copying an accepted tribe item into personal lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Created(PersonalItem),
    Suppressed,
    AlreadyExists,
}

/// Counts from one resync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub created: Vec<PersonalItem>,
    pub suppressed: u32,
    pub already_present: u32,
    pub failed: u32,
}

pub struct PersonalService<'a> {
    conn: &'a Connection,
    ctx: ServiceContext<'a>,
}

impl<'a> PersonalService<'a> {
    pub fn new(conn: &'a Connection, ctx: ServiceContext<'a>) -> Self {
        Self { conn, ctx }
    }

    fn items(&self) -> SqlitePersonalItemRepository<'a> {
        SqlitePersonalItemRepository::new(self.conn)
    }

    /// Deletes the caller's item and suppresses its tribe origin, if any.
    pub fn delete_personal_item_silently(
        &self,
        user_id: &str,
        item_id: PersonalItemId,
        kind: PersonalItemKind,
    ) -> TribeResult<()> {
        let user_id = require_user(user_id)?;
        let deleted = self
            .items()
            .delete_and_suppress(user_id, kind, item_id, self.ctx.now_ms())?
            .ok_or(TribeError::PersonalItemNotFound)?;

        info!(
            "event=personal_delete module=personal status=ok kind={} item_id={} suppressed={}",
            kind.as_str(),
            item_id,
            deleted.origin.is_some()
        );
        Ok(())
    }

    pub fn is_suppressed(&self, user_id: &str, origin_item_id: ItemId) -> TribeResult<bool> {
        let user_id = require_user(user_id)?;
        Ok(self.items().is_suppressed(user_id, origin_item_id)?)
    }

    /// Drops suppressed ids, keeping the input order of the rest.
    pub fn filter_suppressed(
        &self,
        user_id: &str,
        origin_item_ids: &[ItemId],
    ) -> TribeResult<Vec<ItemId>> {
        let user_id = require_user(user_id)?;
        let suppressed: HashSet<ItemId> =
            self.items().suppressed_among(user_id, origin_item_ids)?;
        Ok(origin_item_ids
            .iter()
            .filter(|item_id| !suppressed.contains(*item_id))
            .copied()
            .collect())
    }

    /// Recreates missing copies of accepted proposals in live tribes.
    pub fn resync_personal_items(&self, user_id: &str) -> TribeResult<ResyncReport> {
        let user_id = require_user(user_id)?;
        let accepted = SqliteProposalRepository::new(self.conn).list_accepted_for_user(user_id)?;
        let now = self.ctx.now_ms();

        let mut report = ResyncReport::default();
        for entry in accepted {
            match materialize_accepted(
                self.conn,
                user_id,
                &entry.item,
                entry.proposal.id,
                &entry.tribe_name,
                now,
            ) {
                Ok(Materialized::Created(item)) => report.created.push(item),
                Ok(Materialized::Suppressed) => report.suppressed += 1,
                Ok(Materialized::AlreadyExists) => report.already_present += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        "event=personal_resync module=personal status=error proposal_id={} code={}",
                        entry.proposal.id,
                        err.code()
                    );
                }
            }
        }

        info!(
            "event=personal_resync module=personal status=ok user_id={} created={} suppressed={} failed={}",
            user_id,
            report.created.len(),
            report.suppressed,
            report.failed
        );
        Ok(report)
    }

    pub fn list_personal_items(
        &self,
        user_id: &str,
        kind: PersonalItemKind,
    ) -> TribeResult<Vec<PersonalItem>> {
        let user_id = require_user(user_id)?;
        Ok(self.items().list_items(user_id, kind)?)
    }

    /// Creates an item with no tribe origin.
    pub fn create_personal_item(
        &self,
        user_id: &str,
        content: PersonalItemContent,
    ) -> TribeResult<PersonalItem> {
        let user_id = require_user(user_id)?;
        let text = match &content {
            PersonalItemContent::Appointment { title, .. }
            | PersonalItemContent::Todo { title, .. }
            | PersonalItemContent::Routine { title, .. } => title,
            PersonalItemContent::Grocery { content } => content,
        };
        if text.trim().is_empty() {
            return Err(TribeError::ItemDataInvalid(
                "personal items need a title".to_string(),
            ));
        }

        let item = PersonalItem::new(user_id, content, None, self.ctx.now_ms());
        self.items().insert_item(&item)?;
        info!(
            "event=personal_create module=personal status=ok kind={} item_id={}",
            item.kind().as_str(),
            item.id
        );
        Ok(item)
    }
}

/// Copies an accepted tribe item into `user_id`'s lists unless suppressed
/// or already present.
pub(crate) fn materialize_accepted(
    conn: &Connection,
    user_id: &str,
    item: &TribeItem,
    proposal_id: ProposalId,
    tribe_name: &str,
    now: i64,
) -> TribeResult<Materialized> {
    let content = PersonalItemContent::from_item_data(item.item_type, &item.data)
        .map_err(|err| TribeError::ItemDataInvalid(err.to_string()))?;
    let origin = Origin {
        item_id: item.id,
        proposal_id,
        tribe_id: item.tribe_id,
        tribe_name: tribe_name.to_string(),
    };
    let personal = PersonalItem::new(user_id, content, Some(origin), now);

    let outcome = match SqlitePersonalItemRepository::new(conn).insert_materialized(&personal)? {
        MaterializeWrite::Inserted => Materialized::Created(personal),
        MaterializeWrite::Suppressed => Materialized::Suppressed,
        MaterializeWrite::AlreadyExists => Materialized::AlreadyExists,
    };
    let status = match outcome {
        Materialized::Created(_) => "ok",
        _ => "skip",
    };
    info!(
        "event=personal_materialize module=personal status={} item_id={} proposal_id={}",
        status, item.id, proposal_id
    );
    Ok(outcome)
}
