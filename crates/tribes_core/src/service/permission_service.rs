//! Permission engine.
//!
//! # Responsibility
//! - Decide whether a caller may add or remove an item type in a tribe.
//! - Resolve recipient user ids to active memberships.
//!
//! # Invariants
//! - Only an active membership (accepted, not left) grants anything.
//! - A soft-deleted tribe denies every mutation, owner included.
//! - The owner bypasses the permission matrix.
//! - Flags are resolved through `PermissionFlag::resolve`, never by
//!   composing column names.

use crate::model::item::ItemType;
use crate::model::permission::PermissionAction;
use crate::model::tribe::{Membership, Tribe, TribeId};
use crate::repo::{RepoResult, SqliteTribeRepository, TribeRepository};
use crate::service::error::{TribeError, TribeResult};
use log::debug;
use rusqlite::Connection;
use std::collections::BTreeSet;

pub const NOT_A_MEMBER_REASON: &str = "Not a member of this Tribe";
pub const TRIBE_DELETED_REASON: &str = "Tribe has been deleted";

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allowed { tribe: Tribe, membership: Membership },
    Denied(String),
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

pub struct PermissionService<'a> {
    conn: &'a Connection,
}

impl<'a> PermissionService<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn tribes(&self) -> SqliteTribeRepository<'a> {
        SqliteTribeRepository::new(self.conn)
    }

    pub fn check_permission(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        action: PermissionAction,
        item_type: ItemType,
    ) -> RepoResult<PermissionDecision> {
        let Some((tribe, membership)) = self.active_membership(user_id, tribe_id)? else {
            return Ok(deny(tribe_id, user_id, NOT_A_MEMBER_REASON.to_string()));
        };
        if tribe.is_deleted() {
            return Ok(deny(tribe_id, user_id, TRIBE_DELETED_REASON.to_string()));
        }
        if tribe.is_owner(user_id) || membership.permissions.allows(action, item_type) {
            return Ok(PermissionDecision::Allowed { tribe, membership });
        }

        Ok(deny(
            tribe_id,
            user_id,
            format!(
                "You don't have permission to {} {} in this Tribe",
                action,
                item_type.plural_noun()
            ),
        ))
    }

    /// Same as `check_permission`, mapping a denial to its error kind.
    pub fn authorize(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        action: PermissionAction,
        item_type: ItemType,
    ) -> TribeResult<(Tribe, Membership)> {
        match self.check_permission(user_id, tribe_id, action, item_type)? {
            PermissionDecision::Allowed { tribe, membership } => Ok((tribe, membership)),
            PermissionDecision::Denied(reason) if reason == NOT_A_MEMBER_REASON => {
                Err(TribeError::NotAMember)
            }
            PermissionDecision::Denied(reason) if reason == TRIBE_DELETED_REASON => {
                Err(TribeError::TribeDeleted)
            }
            PermissionDecision::Denied(reason) => Err(TribeError::PermissionDenied(reason)),
        }
    }

    /// `true` only if every distinct id is an active member of the tribe.
    pub fn validate_recipients(
        &self,
        tribe_id: TribeId,
        recipient_user_ids: &[String],
    ) -> RepoResult<bool> {
        Ok(self
            .resolve_recipients(tribe_id, recipient_user_ids)?
            .is_some())
    }

    /// Active memberships for the distinct recipient ids, in first-seen
    /// order, or `None` if any id is not an active member.
    pub fn resolve_recipients(
        &self,
        tribe_id: TribeId,
        recipient_user_ids: &[String],
    ) -> RepoResult<Option<Vec<Membership>>> {
        let mut seen = BTreeSet::new();
        let distinct: Vec<String> = recipient_user_ids
            .iter()
            .filter(|user_id| seen.insert(user_id.as_str()))
            .cloned()
            .collect();
        if distinct.is_empty() {
            return Ok(None);
        }

        let mut active = self.tribes().active_memberships_for_users(tribe_id, &distinct)?;
        let mut resolved = Vec::with_capacity(distinct.len());
        for user_id in &distinct {
            match active.remove(user_id) {
                Some(membership) => resolved.push(membership),
                None => {
                    debug!(
                        "event=recipients_validate module=permission status=error tribe_id={} user_id={}",
                        tribe_id, user_id
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(resolved))
    }

    /// The caller's active membership in a live tribe.
    pub fn require_active_member(
        &self,
        user_id: &str,
        tribe_id: TribeId,
    ) -> TribeResult<(Tribe, Membership)> {
        let (tribe, membership) = self
            .active_membership(user_id, tribe_id)?
            .ok_or(TribeError::NotAMember)?;
        if tribe.is_deleted() {
            return Err(TribeError::TribeDeleted);
        }
        Ok((tribe, membership))
    }

    pub fn require_owner(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<(Tribe, Membership)> {
        let (tribe, membership) = self.require_active_member(user_id, tribe_id)?;
        if !tribe.is_owner(user_id) {
            return Err(TribeError::OwnerOnly);
        }
        Ok((tribe, membership))
    }

    fn active_membership(
        &self,
        user_id: &str,
        tribe_id: TribeId,
    ) -> RepoResult<Option<(Tribe, Membership)>> {
        let tribes = self.tribes();
        let Some(membership) = tribes
            .find_membership(tribe_id, user_id)?
            .filter(Membership::is_active)
        else {
            return Ok(None);
        };
        Ok(tribes.get_tribe(tribe_id)?.map(|tribe| (tribe, membership)))
    }
}

fn deny(tribe_id: TribeId, user_id: &str, reason: String) -> PermissionDecision {
    debug!(
        "event=permission_check module=permission status=skip tribe_id={} user_id={}",
        tribe_id, user_id
    );
    PermissionDecision::Denied(reason)
}

#[cfg(test)]
mod tests {
    use super::{PermissionDecision, PermissionService};
    use crate::db::open_db_in_memory;
    use crate::model::item::ItemType;
    use crate::model::permission::{PermissionAction, PermissionSet};
    use crate::model::tribe::{Membership, Tribe, TribeType};
    use crate::repo::{SqliteTribeRepository, TribeRepository};

    #[test]
    fn pending_invitee_is_not_a_member() {
        let conn = open_db_in_memory().expect("db");
        let repo = SqliteTribeRepository::new(&conn);
        let tribe = Tribe::new("Home", "owner", TribeType::Family, 1);
        repo.create_tribe(&tribe, &Membership::owner(tribe.id, "owner", 1))
            .expect("tribe");
        repo.insert_membership(&Membership::invited(
            tribe.id,
            "bob",
            "owner",
            PermissionSet::default(),
            2,
        ))
        .expect("invite");

        let service = PermissionService::new(&conn);
        let decision = service
            .check_permission("bob", tribe.id, PermissionAction::Add, ItemType::Task)
            .expect("check");
        assert_eq!(
            decision,
            PermissionDecision::Denied("Not a member of this Tribe".to_string())
        );
        assert!(!service
            .validate_recipients(tribe.id, &["owner".to_string(), "bob".to_string()])
            .expect("validate"));
        assert!(service
            .validate_recipients(tribe.id, &["owner".to_string(), "owner".to_string()])
            .expect("validate"));
    }
}
