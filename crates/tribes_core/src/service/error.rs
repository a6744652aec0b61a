//! Service error taxonomy.
//!
//! # Invariants
//! - `Display` messages are safe to show to the caller: they never reveal
//!   whether an entity the caller cannot see exists.
//! - `code()` values are stable and used in log events.

use crate::model::proposal::ProposalState;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type TribeResult<T> = Result<T, TribeError>;

#[derive(Debug)]
pub enum TribeError {
    NotAuthenticated,
    NotAMember,
    TribeDeleted,
    TribeNotFound,
    PermissionDenied(String),
    InvalidTransition {
        from: ProposalState,
        to: ProposalState,
    },
    ProposalNotFound,
    RecipientInvalid,
    EmptyRecipients,
    ItemTypeInvalid(String),
    ItemDataInvalid(String),
    InviteNotFound,
    InviteExpired,
    InviteExhausted,
    AlreadyMember,
    OwnerCannotLeave,
    OwnerOnly,
    InvitationNotFound,
    DuplicateRequest,
    MemberRequestNotFound,
    MemberNotFound,
    PersonalItemNotFound,
    InvalidName,
    InvalidMessage(String),
    InvalidPhoneNumber,
    Repo(RepoError),
}

impl TribeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::NotAMember => "not_a_member",
            Self::TribeDeleted => "tribe_deleted",
            Self::TribeNotFound => "tribe_not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ProposalNotFound => "proposal_not_found",
            Self::RecipientInvalid => "recipient_invalid",
            Self::EmptyRecipients => "empty_recipients",
            Self::ItemTypeInvalid(_) => "item_type_invalid",
            Self::ItemDataInvalid(_) => "item_data_invalid",
            Self::InviteNotFound => "invite_not_found",
            Self::InviteExpired => "invite_expired",
            Self::InviteExhausted => "invite_exhausted",
            Self::AlreadyMember => "already_member",
            Self::OwnerCannotLeave => "owner_cannot_leave",
            Self::OwnerOnly => "owner_only",
            Self::InvitationNotFound => "invitation_not_found",
            Self::DuplicateRequest => "duplicate_request",
            Self::MemberRequestNotFound => "member_request_not_found",
            Self::MemberNotFound => "member_not_found",
            Self::PersonalItemNotFound => "personal_item_not_found",
            Self::InvalidName => "invalid_name",
            Self::InvalidMessage(_) => "invalid_message",
            Self::InvalidPhoneNumber => "invalid_phone_number",
            Self::Repo(_) => "storage_error",
        }
    }
}

impl Display for TribeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "Authentication required"),
            Self::NotAMember => write!(f, "Not a member of this Tribe"),
            Self::TribeDeleted => write!(f, "Tribe has been deleted"),
            Self::TribeNotFound => write!(f, "Tribe not found"),
            Self::PermissionDenied(reason) => write!(f, "{reason}"),
            Self::InvalidTransition { from, to } => {
                write!(f, "Cannot transition proposal from {from} to {to}")
            }
            Self::ProposalNotFound => write!(f, "Proposal not found"),
            Self::RecipientInvalid => {
                write!(f, "One or more recipients are not active members of this Tribe")
            }
            Self::EmptyRecipients => write!(f, "Must select at least one recipient"),
            Self::ItemTypeInvalid(value) => write!(f, "Invalid item type `{value}`"),
            Self::ItemDataInvalid(reason) => write!(f, "Invalid item data: {reason}"),
            Self::InviteNotFound => write!(f, "Invite not found"),
            Self::InviteExpired => write!(f, "Invite has expired"),
            Self::InviteExhausted => write!(f, "Invite has reached its maximum uses"),
            Self::AlreadyMember => write!(f, "Already a member of this Tribe"),
            Self::OwnerCannotLeave => write!(f, "The owner cannot leave their own Tribe"),
            Self::OwnerOnly => write!(f, "Only the Tribe owner can do this"),
            Self::InvitationNotFound => write!(f, "Invitation not found"),
            Self::DuplicateRequest => write!(f, "A request for this person is already pending"),
            Self::MemberRequestNotFound => write!(f, "Member request not found"),
            Self::MemberNotFound => write!(f, "Member not found"),
            Self::PersonalItemNotFound => write!(f, "Item not found"),
            Self::InvalidName => write!(f, "Tribe name must not be empty"),
            Self::InvalidMessage(reason) => write!(f, "Invalid message: {reason}"),
            Self::InvalidPhoneNumber => write!(f, "Invalid phone number"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TribeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for TribeError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Rejects missing or blank caller ids.
pub fn require_user(user_id: &str) -> TribeResult<&str> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(TribeError::NotAuthenticated);
    }
    Ok(trimmed)
}
