//! Per-recipient proposal state machine.
//!
//! # Invariants
//! - Proposals are created in `Proposed` only.
//! - Allowed transitions: `proposed -> {accepted, not_now, dismissed}` and
//!   `not_now -> {accepted, dismissed}`. `accepted` and `dismissed` are
//!   terminal. Self-transitions are rejected.

use crate::model::item::ItemId;
use crate::model::tribe::MembershipId;
use crate::model::UserId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ProposalId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Proposed,
    NotNow,
    Accepted,
    Dismissed,
}

impl ProposalState {
    pub const ALL: [ProposalState; 4] = [
        ProposalState::Proposed,
        ProposalState::NotNow,
        ProposalState::Accepted,
        ProposalState::Dismissed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::NotNow => "not_now",
            Self::Accepted => "accepted",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "proposed" => Some(Self::Proposed),
            "not_now" => Some(Self::NotNow),
            "accepted" => Some(Self::Accepted),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Dismissed)
    }

    /// States reachable from `self` in one step.
    pub fn allowed_targets(self) -> &'static [ProposalState] {
        match self {
            Self::Proposed => &[Self::Accepted, Self::NotNow, Self::Dismissed],
            Self::NotNow => &[Self::Accepted, Self::Dismissed],
            Self::Accepted | Self::Dismissed => &[],
        }
    }

    pub fn can_transition_to(self, target: ProposalState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Whether the recipient still has to decide.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Proposed | Self::NotNow)
    }
}

impl Display for ProposalState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub item_id: ItemId,
    pub recipient_id: MembershipId,
    pub state: ProposalState,
    pub created_at: i64,
    pub state_changed_at: i64,
}

impl Proposal {
    /// A fresh proposal. There is no constructor taking a state.
    pub fn new(item_id: ItemId, recipient_id: MembershipId, created_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            recipient_id,
            state: ProposalState::Proposed,
            created_at,
            state_changed_at: created_at,
        }
    }
}

/// One row of the command-dedup ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalAction {
    pub id: Uuid,
    pub user_id: UserId,
    pub proposal_id: ProposalId,
    pub idempotency_key: String,
    pub action: ProposalState,
    pub result_state: ProposalState,
    pub created_at: i64,
}
