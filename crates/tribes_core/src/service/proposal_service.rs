//! Proposal state machine.
//!
//! # Responsibility
//! - Create one tribe item plus one proposal per recipient.
//! - Apply recipient decisions with idempotency and compare-and-swap.
//! - Materialize accepted items into the recipient's personal lists.
//!
//! # Invariants
//! - Proposals are born `proposed`; only `proposed -> {accepted, not_now,
//!   dismissed}` and `not_now -> {accepted, dismissed}` are applied.
//! - The dedup ledger row and the state change commit together.
//! - A proposal a caller does not own is reported as not found.
//! - Materialization failure never undoes an acceptance.

use crate::model::item::{ItemId, ItemType, TribeItem};
use crate::model::notification::NotificationKind;
use crate::model::permission::PermissionAction;
use crate::model::personal::PersonalItem;
use crate::model::proposal::{Proposal, ProposalAction, ProposalId, ProposalState};
use crate::model::tribe::{Membership, Tribe, TribeId};
use crate::notify::{dispatch, OutboundNotification};
use crate::repo::{
    InboxEntry, ProposalRepository, SqliteProposalRepository, SqliteTribeRepository,
    TransitionWrite, TribeRepository,
};
use crate::service::context::ServiceContext;
use crate::service::error::{require_user, TribeError, TribeResult};
use crate::service::permission_service::PermissionService;
use crate::service::personal_service::{materialize_accepted, Materialized};
use log::{debug, info, warn};
use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

/// An item and the proposals created for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedItem {
    pub item: TribeItem,
    pub proposals: Vec<Proposal>,
}

/// Result of a recipient decision.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub proposal: Proposal,
    /// `true` when the request replayed an already-applied command.
    pub is_idempotent: bool,
    /// The personal copy created by this acceptance, if any.
    pub personal_item: Option<PersonalItem>,
}

pub struct ProposalService<'a> {
    conn: &'a Connection,
    ctx: ServiceContext<'a>,
}

impl<'a> ProposalService<'a> {
    pub fn new(conn: &'a Connection, ctx: ServiceContext<'a>) -> Self {
        Self { conn, ctx }
    }

    fn proposals(&self) -> SqliteProposalRepository<'a> {
        SqliteProposalRepository::new(self.conn)
    }

    fn permissions(&self) -> PermissionService<'a> {
        PermissionService::new(self.conn)
    }

    pub fn create_item_and_proposals(
        &self,
        tribe_id: TribeId,
        creator_id: &str,
        item_type: &str,
        data: Value,
        recipient_user_ids: &[String],
    ) -> TribeResult<CreatedItem> {
        let creator_id = require_user(creator_id)?;
        if recipient_user_ids.is_empty() {
            return Err(TribeError::EmptyRecipients);
        }
        let item_type =
            ItemType::parse(item_type).map_err(|err| TribeError::ItemTypeInvalid(err.0))?;
        if !data.is_object() {
            return Err(TribeError::ItemDataInvalid(
                "item data must be a JSON object".to_string(),
            ));
        }

        let permissions = self.permissions();
        let (tribe, _) =
            permissions.authorize(creator_id, tribe_id, PermissionAction::Add, item_type)?;
        if !self.ctx.config.allow_self_proposals
            && recipient_user_ids.iter().any(|user_id| user_id == creator_id)
        {
            return Err(TribeError::RecipientInvalid);
        }
        let recipients = permissions
            .resolve_recipients(tribe_id, recipient_user_ids)?
            .ok_or(TribeError::RecipientInvalid)?;

        let now = self.ctx.now_ms();
        let item = TribeItem::new(tribe_id, creator_id, item_type, data, now);
        let proposals: Vec<Proposal> = recipients
            .iter()
            .map(|membership| Proposal::new(item.id, membership.id, now))
            .collect();
        self.proposals().insert_item_with_proposals(&item, &proposals)?;

        info!(
            "event=proposals_create module=proposal status=ok tribe_id={} item_id={} item_type={} count={}",
            tribe_id,
            item.id,
            item_type,
            proposals.len()
        );
        self.fan_out(&tribe, &item, &proposals, &recipients);

        Ok(CreatedItem { item, proposals })
    }

    /// One immediate notification per created proposal, recipient opt-out respected.
    fn fan_out(
        &self,
        tribe: &Tribe,
        item: &TribeItem,
        proposals: &[Proposal],
        recipients: &[Membership],
    ) {
        for (proposal, membership) in proposals.iter().zip(recipients) {
            if !membership.proposal_notifs {
                debug!(
                    "event=notification_send module=proposal status=skip kind={} proposal_id={} reason=opted_out",
                    NotificationKind::TribeProposal,
                    proposal.id
                );
                continue;
            }
            let notification = OutboundNotification::proposal(
                membership.user_id.as_str(),
                tribe.id,
                &tribe.name,
                item.item_type,
                proposal.id,
                item.id,
            );
            dispatch(self.ctx.notifier, &notification);
        }
    }

    pub fn transition_proposal(
        &self,
        proposal_id: ProposalId,
        caller_user_id: &str,
        new_state: ProposalState,
        idempotency_key: Option<&str>,
    ) -> TribeResult<TransitionOutcome> {
        let caller = require_user(caller_user_id)?;
        let key = idempotency_key
            .map(str::trim)
            .filter(|key| !key.is_empty());
        let proposals = self.proposals();

        if let Some(key) = key {
            if let Some(outcome) = self.replay(caller, key)? {
                return Ok(outcome);
            }
        }

        let (proposal, membership) = proposals
            .find_proposal_for_user(proposal_id, caller)?
            .ok_or(TribeError::ProposalNotFound)?;
        let tribe = SqliteTribeRepository::new(self.conn)
            .get_tribe(membership.tribe_id)?
            .ok_or(TribeError::ProposalNotFound)?;
        if tribe.is_deleted() {
            return Err(TribeError::TribeDeleted);
        }
        if !proposal.state.can_transition_to(new_state) {
            // A same-key request may have committed since the first lookup.
            if let Some(key) = key {
                if let Some(outcome) = self.replay(caller, key)? {
                    return Ok(outcome);
                }
            }
            return Err(TribeError::InvalidTransition {
                from: proposal.state,
                to: new_state,
            });
        }

        let now = self.ctx.now_ms();
        let action = key.map(|key| ProposalAction {
            id: Uuid::new_v4(),
            user_id: caller.to_string(),
            proposal_id,
            idempotency_key: key.to_string(),
            action: new_state,
            result_state: new_state,
            created_at: now,
        });

        let updated = match proposals.commit_transition(
            proposal_id,
            proposal.state,
            new_state,
            now,
            action.as_ref(),
        )? {
            TransitionWrite::Applied(updated) => updated,
            TransitionWrite::StateChanged(current) => {
                info!(
                    "event=proposal_transition module=proposal status=skip proposal_id={} from={} to={} reason=concurrent_write",
                    proposal_id, current, new_state
                );
                return Err(TribeError::InvalidTransition {
                    from: current,
                    to: new_state,
                });
            }
            TransitionWrite::Replayed(proposal) => {
                debug!(
                    "event=proposal_transition module=proposal status=skip proposal_id={} reason=idempotent_replay",
                    proposal.id
                );
                return Ok(TransitionOutcome {
                    proposal,
                    is_idempotent: true,
                    personal_item: None,
                });
            }
            TransitionWrite::DuplicateKey => {
                let replayed = key.map(|key| self.replay(caller, key)).transpose()?.flatten();
                return replayed.ok_or(TribeError::ProposalNotFound);
            }
        };

        info!(
            "event=proposal_transition module=proposal status=ok proposal_id={} from={} to={}",
            proposal_id, proposal.state, new_state
        );

        let personal_item = if new_state == ProposalState::Accepted
            && membership.management_scope.materializes_accepted_items()
        {
            self.materialize(&updated, &membership, &tribe)
        } else {
            None
        };

        Ok(TransitionOutcome {
            proposal: updated,
            is_idempotent: false,
            personal_item,
        })
    }

    /// The stored proposal for a previously recorded `(caller, key)`.
    fn replay(&self, caller: &str, key: &str) -> TribeResult<Option<TransitionOutcome>> {
        let proposals = self.proposals();
        let Some(action) = proposals.find_action(caller, key)? else {
            return Ok(None);
        };
        let proposal = proposals
            .get_proposal(action.proposal_id)?
            .ok_or(TribeError::ProposalNotFound)?;
        debug!(
            "event=proposal_transition module=proposal status=skip proposal_id={} reason=idempotent_replay",
            proposal.id
        );
        Ok(Some(TransitionOutcome {
            proposal,
            is_idempotent: true,
            personal_item: None,
        }))
    }

    fn materialize(
        &self,
        proposal: &Proposal,
        membership: &Membership,
        tribe: &Tribe,
    ) -> Option<PersonalItem> {
        let item = match self.proposals().get_item(proposal.item_id) {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!(
                    "event=personal_materialize module=proposal status=error proposal_id={} reason=item_missing",
                    proposal.id
                );
                return None;
            }
            Err(err) => {
                warn!(
                    "event=personal_materialize module=proposal status=error proposal_id={} error={}",
                    proposal.id, err
                );
                return None;
            }
        };

        match materialize_accepted(
            self.conn,
            &membership.user_id,
            &item,
            proposal.id,
            &tribe.name,
            self.ctx.now_ms(),
        ) {
            Ok(Materialized::Created(personal)) => Some(personal),
            Ok(_) => None,
            Err(err) => {
                warn!(
                    "event=personal_materialize module=proposal status=error proposal_id={} item_id={} code={}",
                    proposal.id,
                    item.id,
                    err.code()
                );
                None
            }
        }
    }

    pub fn accept_proposal(
        &self,
        proposal_id: ProposalId,
        caller_user_id: &str,
        idempotency_key: Option<&str>,
    ) -> TribeResult<TransitionOutcome> {
        self.transition_proposal(
            proposal_id,
            caller_user_id,
            ProposalState::Accepted,
            idempotency_key,
        )
    }

    pub fn not_now_proposal(
        &self,
        proposal_id: ProposalId,
        caller_user_id: &str,
        idempotency_key: Option<&str>,
    ) -> TribeResult<TransitionOutcome> {
        self.transition_proposal(
            proposal_id,
            caller_user_id,
            ProposalState::NotNow,
            idempotency_key,
        )
    }

    pub fn dismiss_proposal(
        &self,
        proposal_id: ProposalId,
        caller_user_id: &str,
        idempotency_key: Option<&str>,
    ) -> TribeResult<TransitionOutcome> {
        self.transition_proposal(
            proposal_id,
            caller_user_id,
            ProposalState::Dismissed,
            idempotency_key,
        )
    }

    /// Open proposals for the caller in one tribe, newest first.
    pub fn list_inbox(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<Vec<InboxEntry>> {
        let user_id = require_user(user_id)?;
        let (_, membership) = self.permissions().require_active_member(user_id, tribe_id)?;
        Ok(self.proposals().list_inbox(membership.id, user_id)?)
    }

    /// Items the caller accepted in one tribe, most recently accepted first.
    pub fn list_shared_items(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<Vec<TribeItem>> {
        let user_id = require_user(user_id)?;
        let (_, membership) = self.permissions().require_active_member(user_id, tribe_id)?;
        Ok(self
            .proposals()
            .list_accepted(membership.id)?
            .into_iter()
            .map(|entry| entry.item)
            .collect())
    }

    /// Per-recipient states of an item, visible to its creator only.
    pub fn list_item_proposals(&self, user_id: &str, item_id: ItemId) -> TribeResult<Vec<Proposal>> {
        let user_id = require_user(user_id)?;
        let proposals = self.proposals();
        let item = proposals
            .get_item(item_id)?
            .filter(|item| item.created_by == user_id)
            .ok_or(TribeError::ProposalNotFound)?;
        Ok(proposals.list_proposals_for_item(item.id)?)
    }
}
