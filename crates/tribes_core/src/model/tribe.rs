//! Tribe and membership model.
//!
//! # Responsibility
//! - Describe tribes, memberships and member requests as typed records.
//! - Derive membership lifecycle state from the timestamp columns.
//!
//! # Invariants
//! - A membership is *active* iff `accepted_at` is set and `left_at` is null.
//! - A membership is *invited* iff both `accepted_at` and `left_at` are null.
//! - A soft-deleted tribe (`deleted_at` set) accepts no new members, items or
//!   proposals.

use crate::model::permission::PermissionSet;
use crate::model::UserId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type TribeId = Uuid;
pub type MembershipId = Uuid;
pub type MemberRequestId = Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TribeType {
    #[default]
    Friend,
    Family,
}

impl TribeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Friend => "friend",
            Self::Family => "family",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "friend" => Some(Self::Friend),
            "family" => Some(Self::Family),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tribe {
    pub id: TribeId,
    pub name: String,
    pub owner_id: UserId,
    pub tribe_type: TribeType,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
}

impl Tribe {
    pub fn new(
        name: impl Into<String>,
        owner_id: impl Into<UserId>,
        tribe_type: TribeType,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner_id: owner_id.into(),
            tribe_type,
            deleted_at: None,
            created_at,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// Whether accepted proposals are also copied into personal items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagementScope {
    PersonalOnly,
    #[default]
    SharedAndPersonal,
}

impl ManagementScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersonalOnly => "personal_only",
            Self::SharedAndPersonal => "shared_and_personal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "personal_only" => Some(Self::PersonalOnly),
            "shared_and_personal" => Some(Self::SharedAndPersonal),
            _ => None,
        }
    }

    pub fn materializes_accepted_items(self) -> bool {
        matches!(self, Self::SharedAndPersonal)
    }
}

/// Lifecycle state derived from membership timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Invited,
    Active,
    Left,
}

impl MembershipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invited => "invited",
            Self::Active => "active",
            Self::Left => "left",
        }
    }
}

impl Display for MembershipStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub tribe_id: TribeId,
    pub user_id: UserId,
    pub invited_by: UserId,
    pub invited_at: i64,
    pub accepted_at: Option<i64>,
    pub left_at: Option<i64>,
    pub management_scope: ManagementScope,
    pub proposal_notifs: bool,
    pub digest_notifs: bool,
    pub last_read_messages_at: Option<i64>,
    pub permissions: PermissionSet,
}

impl Membership {
    /// A pending invitation with default settings.
    pub fn invited(
        tribe_id: TribeId,
        user_id: impl Into<UserId>,
        invited_by: impl Into<UserId>,
        permissions: PermissionSet,
        invited_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tribe_id,
            user_id: user_id.into(),
            invited_by: invited_by.into(),
            invited_at,
            accepted_at: None,
            left_at: None,
            management_scope: ManagementScope::default(),
            proposal_notifs: true,
            digest_notifs: true,
            last_read_messages_at: None,
            permissions,
        }
    }

    /// The creator's row: active from the start with every permission.
    pub fn owner(tribe_id: TribeId, owner_id: impl Into<UserId>, created_at: i64) -> Self {
        let owner_id = owner_id.into();
        let mut membership = Self::invited(
            tribe_id,
            owner_id.clone(),
            owner_id,
            PermissionSet::all_granted(),
            created_at,
        );
        membership.accepted_at = Some(created_at);
        membership
    }

    pub fn status(&self) -> MembershipStatus {
        match (self.accepted_at, self.left_at) {
            (_, Some(_)) => MembershipStatus::Left,
            (Some(_), None) => MembershipStatus::Active,
            (None, None) => MembershipStatus::Invited,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == MembershipStatus::Active
    }
}

/// Member-editable settings. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSettingsUpdate {
    pub management_scope: Option<ManagementScope>,
    pub proposal_notifs: Option<bool>,
    pub digest_notifs: Option<bool>,
    /// Owner-only when applied to another member.
    pub permissions: Option<PermissionSet>,
}

impl MemberSettingsUpdate {
    pub fn touches_own_settings(&self) -> bool {
        self.management_scope.is_some()
            || self.proposal_notifs.is_some()
            || self.digest_notifs.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_own_settings() && self.permissions.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRequestState {
    Pending,
    Approved,
    Denied,
}

impl MemberRequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// A non-owner's request to bring someone into the tribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRequest {
    pub id: MemberRequestId,
    pub tribe_id: TribeId,
    pub requested_by: UserId,
    pub requested_user_id: UserId,
    pub state: MemberRequestState,
    pub created_at: i64,
    pub reviewed_at: Option<i64>,
    pub reviewed_by: Option<UserId>,
}

impl MemberRequest {
    pub fn pending(
        tribe_id: TribeId,
        requested_by: impl Into<UserId>,
        requested_user_id: impl Into<UserId>,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tribe_id,
            requested_by: requested_by.into(),
            requested_user_id: requested_user_id.into(),
            state: MemberRequestState::Pending,
            created_at,
            reviewed_at: None,
            reviewed_by: None,
        }
    }
}

/// A tribe as seen by one member, with their pending proposal count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TribeSummary {
    pub tribe: Tribe,
    pub membership_id: MembershipId,
    pub member_count: u32,
    pub pending_proposals: u32,
}
