//! Membership lifecycle service.
//!
//! # Responsibility
//! - Create, rename and soft-delete tribes.
//! - Move memberships through invited -> active -> left and back.
//! - Issue and redeem invite links and SMS invites.
//! - Route non-owner invitations through owner-reviewed member requests.
//!
//! # Invariants
//! - One membership row per `(tribe, user)`; re-inviting or rejoining reuses it.
//! - The owner row is created active with every permission and can never leave.
//! - Every mutation against a soft-deleted tribe fails with `TribeDeleted`.
//! - Token redemption consumes at most one use and never for an active member.

use crate::clock::MILLIS_PER_DAY;
use crate::model::feed::{ActivityKind, TribeActivity};
use crate::model::invite::{
    is_well_formed_token, normalize_phone, InvitePreview, InviteToken, SmsInvite,
};
use crate::model::permission::PermissionSet;
use crate::model::tribe::{
    MemberRequest, MemberRequestId, MemberRequestState, MemberSettingsUpdate, Membership,
    MembershipId, MembershipStatus, Tribe, TribeId, TribeSummary, TribeType,
};
use crate::repo::{
    begin_immediate, InviteRepository, MessageRepository, ProposalRepository, RedeemOutcome,
    RepoError, SqliteInviteRepository, SqliteMessageRepository, SqliteProposalRepository,
    SqliteTribeRepository, TribeRepository,
};
use crate::service::context::ServiceContext;
use crate::service::error::{require_user, TribeError, TribeResult};
use crate::service::permission_service::PermissionService;
use log::{info, warn};
use rusqlite::Connection;

/// What `invite_member` did for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteOutcome {
    /// The owner invited directly.
    Invited(Membership),
    /// A non-owner filed a request for the owner to review.
    Requested(MemberRequest),
}

pub struct MembershipService<'a> {
    conn: &'a Connection,
    ctx: ServiceContext<'a>,
}

impl<'a> MembershipService<'a> {
    pub fn new(conn: &'a Connection, ctx: ServiceContext<'a>) -> Self {
        Self { conn, ctx }
    }

    fn tribes(&self) -> SqliteTribeRepository<'a> {
        SqliteTribeRepository::new(self.conn)
    }

    fn permissions(&self) -> PermissionService<'a> {
        PermissionService::new(self.conn)
    }

    pub fn create_tribe(
        &self,
        user_id: &str,
        name: &str,
        tribe_type: TribeType,
    ) -> TribeResult<Tribe> {
        let user_id = require_user(user_id)?;
        let name = normalize_name(name)?;
        let now = self.ctx.now_ms();

        let tribe = Tribe::new(name, user_id, tribe_type, now);
        let owner = Membership::owner(tribe.id, user_id, now);
        self.tribes().create_tribe(&tribe, &owner)?;

        info!(
            "event=tribe_create module=membership status=ok tribe_id={} user_id={}",
            tribe.id, user_id
        );
        Ok(tribe)
    }

    pub fn rename_tribe(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        name: &str,
    ) -> TribeResult<Tribe> {
        let user_id = require_user(user_id)?;
        let name = normalize_name(name)?;
        let (mut tribe, _) = self.permissions().require_owner(user_id, tribe_id)?;

        self.tribes().rename_tribe(tribe_id, name)?;
        tribe.name = name.to_string();
        info!(
            "event=tribe_rename module=membership status=ok tribe_id={} user_id={}",
            tribe_id, user_id
        );
        Ok(tribe)
    }

    /// Permanent soft delete. Owner only.
    pub fn delete_tribe(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<()> {
        let user_id = require_user(user_id)?;
        self.permissions().require_owner(user_id, tribe_id)?;

        let now = self.ctx.now_ms();
        let activity = TribeActivity::new(
            tribe_id,
            ActivityKind::System,
            "This Tribe was deleted by its owner",
            Some(user_id.to_string()),
            now,
        );
        if !self.tribes().soft_delete_tribe(tribe_id, now, &activity)? {
            return Err(TribeError::TribeDeleted);
        }

        info!(
            "event=tribe_delete module=membership status=ok tribe_id={} user_id={}",
            tribe_id, user_id
        );
        Ok(())
    }

    /// Owners invite directly; other members file a request for the owner.
    pub fn invite_member(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        invitee_user_id: &str,
        permissions: Option<PermissionSet>,
    ) -> TribeResult<InviteOutcome> {
        let user_id = require_user(user_id)?;
        let invitee = invitee_user_id.trim();
        if invitee.is_empty() {
            return Err(TribeError::MemberNotFound);
        }
        let (tribe, _) = self.permissions().require_active_member(user_id, tribe_id)?;
        let now = self.ctx.now_ms();

        if tribe.is_owner(user_id) {
            let membership = invite_into(
                &self.tribes(),
                tribe_id,
                user_id,
                invitee,
                permissions.unwrap_or_default(),
                now,
            )?;
            info!(
                "event=member_invite module=membership status=ok tribe_id={} membership_id={} invited_by={}",
                tribe_id, membership.id, user_id
            );
            return Ok(InviteOutcome::Invited(membership));
        }

        let tribes = self.tribes();
        if tribes
            .find_membership(tribe_id, invitee)?
            .is_some_and(|existing| existing.status() != MembershipStatus::Left)
        {
            return Err(TribeError::AlreadyMember);
        }
        let request = MemberRequest::pending(tribe_id, user_id, invitee, now);
        match tribes.insert_member_request(&request) {
            Ok(()) => {}
            Err(err) if err.is_unique_violation() => return Err(TribeError::DuplicateRequest),
            Err(err) => return Err(err.into()),
        }

        info!(
            "event=member_request_create module=membership status=ok tribe_id={} request_id={} user_id={}",
            tribe_id, request.id, user_id
        );
        Ok(InviteOutcome::Requested(request))
    }

    /// Owner view of requests waiting for review.
    pub fn list_member_requests(
        &self,
        user_id: &str,
        tribe_id: TribeId,
    ) -> TribeResult<Vec<MemberRequest>> {
        let user_id = require_user(user_id)?;
        self.permissions().require_owner(user_id, tribe_id)?;
        Ok(self.tribes().list_pending_requests(tribe_id)?)
    }

    /// Approves a pending request and invites the requested user.
    pub fn approve_member_request(
        &self,
        user_id: &str,
        request_id: MemberRequestId,
    ) -> TribeResult<Membership> {
        let user_id = require_user(user_id)?;
        let request = self.pending_request(user_id, request_id)?;
        let now = self.ctx.now_ms();

        let tx = begin_immediate(self.conn)?;
        let tribes = SqliteTribeRepository::new(&tx);
        if !tribes.review_member_request(request_id, MemberRequestState::Approved, user_id, now)? {
            return Err(TribeError::MemberRequestNotFound);
        }
        let membership = invite_into(
            &tribes,
            request.tribe_id,
            user_id,
            &request.requested_user_id,
            PermissionSet::default(),
            now,
        )?;
        tx.commit().map_err(RepoError::from)?;

        info!(
            "event=member_request_approve module=membership status=ok tribe_id={} request_id={} membership_id={}",
            request.tribe_id, request_id, membership.id
        );
        Ok(membership)
    }

    pub fn deny_member_request(
        &self,
        user_id: &str,
        request_id: MemberRequestId,
    ) -> TribeResult<MemberRequest> {
        let user_id = require_user(user_id)?;
        let mut request = self.pending_request(user_id, request_id)?;
        let now = self.ctx.now_ms();

        if !self
            .tribes()
            .review_member_request(request_id, MemberRequestState::Denied, user_id, now)?
        {
            return Err(TribeError::MemberRequestNotFound);
        }
        request.state = MemberRequestState::Denied;
        request.reviewed_at = Some(now);
        request.reviewed_by = Some(user_id.to_string());

        info!(
            "event=member_request_deny module=membership status=ok tribe_id={} request_id={}",
            request.tribe_id, request_id
        );
        Ok(request)
    }

    /// invited -> active.
    pub fn accept_invitation(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<Membership> {
        let user_id = require_user(user_id)?;
        let tribes = self.tribes();
        let mut membership = tribes
            .find_membership(tribe_id, user_id)?
            .filter(|membership| membership.status() == MembershipStatus::Invited)
            .ok_or(TribeError::InvitationNotFound)?;
        let tribe = tribes
            .get_tribe(tribe_id)?
            .ok_or(TribeError::InvitationNotFound)?;
        if tribe.is_deleted() {
            return Err(TribeError::TribeDeleted);
        }

        let now = self.ctx.now_ms();
        if !tribes.accept_membership(membership.id, now)? {
            return Err(TribeError::InvitationNotFound);
        }
        membership.accepted_at = Some(now);
        self.record_activity(tribe_id, format!("{user_id} joined the Tribe"), now);

        info!(
            "event=invitation_accept module=membership status=ok tribe_id={} membership_id={}",
            tribe_id, membership.id
        );
        Ok(membership)
    }

    /// Pending invitations of the caller in live tribes.
    pub fn list_invitations(&self, user_id: &str) -> TribeResult<Vec<(Tribe, Membership)>> {
        let user_id = require_user(user_id)?;
        Ok(self
            .tribes()
            .list_memberships_for_user(user_id)?
            .into_iter()
            .filter(|(tribe, membership)| {
                !tribe.is_deleted() && membership.status() == MembershipStatus::Invited
            })
            .collect())
    }

    /// Live tribes the caller is active in, with pending proposal counts.
    pub fn list_tribes(&self, user_id: &str) -> TribeResult<Vec<TribeSummary>> {
        let user_id = require_user(user_id)?;
        let tribes = self.tribes();
        let proposals = SqliteProposalRepository::new(self.conn);

        let mut summaries = Vec::new();
        for (tribe, membership) in tribes.list_memberships_for_user(user_id)? {
            if tribe.is_deleted() || !membership.is_active() {
                continue;
            }
            let member_count = tribes.count_active_members(tribe.id)?;
            let pending_proposals = proposals.count_pending(membership.id)?;
            summaries.push(TribeSummary {
                tribe,
                membership_id: membership.id,
                member_count,
                pending_proposals,
            });
        }
        Ok(summaries)
    }

    /// Invited and active members, visible to active members only.
    pub fn list_members(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<Vec<Membership>> {
        let user_id = require_user(user_id)?;
        self.permissions().require_active_member(user_id, tribe_id)?;
        Ok(self.tribes().list_current_members(tribe_id)?)
    }

    /// active|invited -> left. The owner cannot leave.
    pub fn leave_tribe(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<()> {
        let user_id = require_user(user_id)?;
        let tribes = self.tribes();
        let membership = tribes
            .find_membership(tribe_id, user_id)?
            .filter(|membership| membership.status() != MembershipStatus::Left)
            .ok_or(TribeError::NotAMember)?;
        let tribe = tribes.get_tribe(tribe_id)?.ok_or(TribeError::NotAMember)?;
        if tribe.is_deleted() {
            return Err(TribeError::TribeDeleted);
        }
        if tribe.is_owner(user_id) {
            return Err(TribeError::OwnerCannotLeave);
        }

        let now = self.ctx.now_ms();
        if !tribes.leave_membership(membership.id, now)? {
            return Err(TribeError::NotAMember);
        }
        if membership.is_active() {
            self.record_activity(tribe_id, format!("{user_id} left the Tribe"), now);
        }

        info!(
            "event=tribe_leave module=membership status=ok tribe_id={} membership_id={}",
            tribe_id, membership.id
        );
        Ok(())
    }

    /// Own scope and notification flags for self; permissions for the owner.
    pub fn update_member_settings(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        member_id: MembershipId,
        settings: &MemberSettingsUpdate,
    ) -> TribeResult<Membership> {
        let user_id = require_user(user_id)?;
        let (tribe, _) = self.permissions().require_active_member(user_id, tribe_id)?;
        let tribes = self.tribes();
        let mut target = tribes
            .get_membership(member_id)?
            .filter(|membership| {
                membership.tribe_id == tribe_id && membership.status() != MembershipStatus::Left
            })
            .ok_or(TribeError::MemberNotFound)?;

        let is_self = target.user_id == user_id;
        if settings.touches_own_settings() && !is_self {
            return Err(TribeError::PermissionDenied(
                "You can only change your own Tribe settings".to_string(),
            ));
        }
        if settings.permissions.is_some() && !tribe.is_owner(user_id) {
            return Err(TribeError::OwnerOnly);
        }
        if settings.is_empty() {
            return Ok(target);
        }

        if let Some(scope) = settings.management_scope {
            target.management_scope = scope;
        }
        if let Some(enabled) = settings.proposal_notifs {
            target.proposal_notifs = enabled;
        }
        if let Some(enabled) = settings.digest_notifs {
            target.digest_notifs = enabled;
        }
        if let Some(permissions) = settings.permissions {
            target.permissions = permissions;
        }
        tribes.update_membership_settings(&target)?;

        info!(
            "event=member_settings_update module=membership status=ok tribe_id={} membership_id={} user_id={}",
            tribe_id, target.id, user_id
        );
        Ok(target)
    }

    /// Shareable invite link. `max_uses` of zero means unlimited.
    pub fn create_invite_link(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        max_uses: Option<u32>,
        expires_in_days: Option<u32>,
    ) -> TribeResult<InviteToken> {
        let user_id = require_user(user_id)?;
        self.permissions().require_active_member(user_id, tribe_id)?;
        let now = self.ctx.now_ms();

        let expires_at = expires_in_days.map(|days| now + i64::from(days) * MILLIS_PER_DAY);
        let token = InviteToken::new(
            tribe_id,
            user_id,
            max_uses.filter(|uses| *uses > 0),
            expires_at,
            now,
        );
        SqliteInviteRepository::new(self.conn).insert_token(&token)?;

        info!(
            "event=invite_link_create module=membership status=ok tribe_id={} invite_id={} user_id={}",
            tribe_id, token.id, user_id
        );
        Ok(token)
    }

    /// Single-use token for delivery by SMS. Sending is the caller's job.
    pub fn create_sms_invite(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        phone_number: &str,
    ) -> TribeResult<SmsInvite> {
        let user_id = require_user(user_id)?;
        let phone_digits = normalize_phone(phone_number).ok_or(TribeError::InvalidPhoneNumber)?;
        self.permissions().require_active_member(user_id, tribe_id)?;
        let now = self.ctx.now_ms();

        let token = InviteToken::new(
            tribe_id,
            user_id,
            Some(1),
            Some(now + self.ctx.config.sms_invite_expiry_ms()),
            now,
        );
        SqliteInviteRepository::new(self.conn).insert_token(&token)?;

        info!(
            "event=sms_invite_create module=membership status=ok tribe_id={} invite_id={} user_id={}",
            tribe_id, token.id, user_id
        );
        Ok(SmsInvite {
            token,
            phone_digits,
        })
    }

    /// What a prospective member sees before joining.
    pub fn preview_invite(&self, token: &str) -> TribeResult<InvitePreview> {
        let token = token.trim();
        if !is_well_formed_token(token) {
            return Err(TribeError::InviteNotFound);
        }
        let invite = SqliteInviteRepository::new(self.conn)
            .find_token(token)?
            .ok_or(TribeError::InviteNotFound)?;
        let tribes = self.tribes();
        let tribe = tribes
            .get_tribe(invite.tribe_id)?
            .ok_or(TribeError::InviteNotFound)?;
        if tribe.is_deleted() {
            return Err(TribeError::TribeDeleted);
        }
        if invite.is_expired_at(self.ctx.now_ms()) {
            return Err(TribeError::InviteExpired);
        }
        if invite.is_exhausted() {
            return Err(TribeError::InviteExhausted);
        }

        Ok(InvitePreview {
            tribe_id: tribe.id,
            member_count: tribes.count_active_members(tribe.id)?,
            tribe_name: tribe.name,
            expires_at: invite.expires_at,
        })
    }

    /// Redeems one use of `token` and makes the caller an active member.
    pub fn join_via_token(&self, user_id: &str, token: &str) -> TribeResult<(Tribe, Membership)> {
        let user_id = require_user(user_id)?;
        let token = token.trim();
        if !is_well_formed_token(token) {
            return Err(TribeError::InviteNotFound);
        }
        let now = self.ctx.now_ms();

        let outcome = SqliteInviteRepository::new(self.conn).redeem_token(token, user_id, now)?;
        let (tribe, membership) = match outcome {
            RedeemOutcome::Joined { tribe, membership } => (tribe, membership),
            rejected => {
                let err = match rejected {
                    RedeemOutcome::TribeDeleted => TribeError::TribeDeleted,
                    RedeemOutcome::AlreadyMember => TribeError::AlreadyMember,
                    RedeemOutcome::Expired => TribeError::InviteExpired,
                    RedeemOutcome::Exhausted => TribeError::InviteExhausted,
                    _ => TribeError::InviteNotFound,
                };
                info!(
                    "event=invite_join module=membership status=skip user_id={} code={}",
                    user_id,
                    err.code()
                );
                return Err(err);
            }
        };
        self.record_activity(tribe.id, format!("{user_id} joined the Tribe"), now);

        info!(
            "event=invite_join module=membership status=ok tribe_id={} membership_id={}",
            tribe.id, membership.id
        );
        Ok((tribe, membership))
    }

    fn pending_request(
        &self,
        user_id: &str,
        request_id: MemberRequestId,
    ) -> TribeResult<MemberRequest> {
        let request = self
            .tribes()
            .get_member_request(request_id)?
            .filter(|request| request.state == MemberRequestState::Pending)
            .ok_or(TribeError::MemberRequestNotFound)?;
        self.permissions().require_owner(user_id, request.tribe_id)?;
        Ok(request)
    }

    /// Membership events are informational; a failed write is logged only.
    fn record_activity(&self, tribe_id: TribeId, message: String, now: i64) {
        let activity = TribeActivity::new(tribe_id, ActivityKind::System, message, None, now);
        if let Err(err) = SqliteMessageRepository::new(self.conn).insert_activity(&activity) {
            warn!(
                "event=activity_insert module=membership status=error tribe_id={} error={}",
                tribe_id, err
            );
        }
    }
}

fn normalize_name(name: &str) -> TribeResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TribeError::InvalidName);
    }
    Ok(name)
}

/// Creates or re-opens an invited membership for `invitee`.
fn invite_into(
    tribes: &SqliteTribeRepository<'_>,
    tribe_id: TribeId,
    invited_by: &str,
    invitee: &str,
    permissions: PermissionSet,
    now: i64,
) -> TribeResult<Membership> {
    match tribes.find_membership(tribe_id, invitee)? {
        Some(mut existing) if existing.status() == MembershipStatus::Left => {
            if !tribes.reinvite_membership(existing.id, invited_by, &permissions, now)? {
                return Err(TribeError::AlreadyMember);
            }
            existing.invited_by = invited_by.to_string();
            existing.invited_at = now;
            existing.accepted_at = None;
            existing.left_at = None;
            existing.permissions = permissions;
            Ok(existing)
        }
        Some(_) => Err(TribeError::AlreadyMember),
        None => {
            let membership = Membership::invited(tribe_id, invitee, invited_by, permissions, now);
            match tribes.insert_membership(&membership) {
                Ok(()) => Ok(membership),
                Err(err) if err.is_unique_violation() => Err(TribeError::AlreadyMember),
                Err(err) => Err(err.into()),
            }
        }
    }
}
