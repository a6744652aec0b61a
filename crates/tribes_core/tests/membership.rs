mod common;

use common::Harness;
use std::sync::{Arc, Barrier};
use std::thread;
use tribes_core::clock::MILLIS_PER_DAY;
use tribes_core::model::tribe::{MemberSettingsUpdate, MembershipStatus};
use tribes_core::repo::{InviteRepository, SqliteInviteRepository};
use tribes_core::service::{InviteOutcome, TribeError};
use tribes_core::{
    open_db, EngineConfig, ManagementScope, MembershipService, RecordingNotifier,
    ServiceContext, SystemClock, TribeType,
};

#[test]
fn create_tribe_rejects_blank_names_and_callers() {
    let h = Harness::new();
    assert!(matches!(
        h.membership().create_tribe("alice", "   ", TribeType::Friend),
        Err(TribeError::InvalidName)
    ));
    assert!(matches!(
        h.membership().create_tribe(" ", "Home", TribeType::Friend),
        Err(TribeError::NotAuthenticated)
    ));

    let tribe = h
        .membership()
        .create_tribe("alice", "  Home  ", TribeType::Family)
        .unwrap();
    assert_eq!(tribe.name, "Home");
    let owner = h.membership_of(tribe.id, "alice");
    assert!(owner.is_active());
    assert_eq!(owner.permissions, tribes_core::PermissionSet::all_granted());
}

#[test]
fn invitation_lifecycle_and_reinvite_reuse_one_row() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &[]);
    let service = h.membership();

    let invited = match service.invite_member("alice", tribe.id, "bob", None).unwrap() {
        InviteOutcome::Invited(membership) => membership,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(invited.status(), MembershipStatus::Invited);
    assert!(matches!(
        service.invite_member("alice", tribe.id, "bob", None),
        Err(TribeError::AlreadyMember)
    ));

    let invitations = service.list_invitations("bob").unwrap();
    assert_eq!(invitations.len(), 1);
    assert_eq!(invitations[0].0.id, tribe.id);
    assert!(service.list_tribes("bob").unwrap().is_empty());

    h.tick();
    let accepted = service.accept_invitation("bob", tribe.id).unwrap();
    assert!(accepted.is_active());
    assert!(matches!(
        service.accept_invitation("bob", tribe.id),
        Err(TribeError::InvitationNotFound)
    ));
    let summaries = service.list_tribes("bob").unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].member_count, 2);

    h.tick();
    service.leave_tribe("bob", tribe.id).unwrap();
    assert_eq!(
        h.membership_of(tribe.id, "bob").status(),
        MembershipStatus::Left
    );
    assert!(matches!(
        service.leave_tribe("bob", tribe.id),
        Err(TribeError::NotAMember)
    ));

    h.tick();
    let reinvited = match service.invite_member("alice", tribe.id, "bob", None).unwrap() {
        InviteOutcome::Invited(membership) => membership,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(reinvited.id, invited.id);
    let stored = h.membership_of(tribe.id, "bob");
    assert_eq!(stored.status(), MembershipStatus::Invited);
    assert_eq!(stored.accepted_at, None);
    assert_eq!(stored.left_at, None);
}

#[test]
fn owner_cannot_leave_and_members_can_decline_by_leaving() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &[]);
    assert!(matches!(
        h.membership().leave_tribe("alice", tribe.id),
        Err(TribeError::OwnerCannotLeave)
    ));

    h.membership()
        .invite_member("alice", tribe.id, "bob", None)
        .unwrap();
    h.membership().leave_tribe("bob", tribe.id).unwrap();
    assert!(h.membership().list_invitations("bob").unwrap().is_empty());
}

#[test]
fn non_owner_invites_become_owner_reviewed_requests() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    let service = h.membership();

    let request = match service.invite_member("bob", tribe.id, "carol", None).unwrap() {
        InviteOutcome::Requested(request) => request,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(matches!(
        service.invite_member("bob", tribe.id, "carol", None),
        Err(TribeError::DuplicateRequest)
    ));
    assert!(matches!(
        service.invite_member("bob", tribe.id, "alice", None),
        Err(TribeError::AlreadyMember)
    ));
    assert!(matches!(
        service.list_member_requests("bob", tribe.id),
        Err(TribeError::OwnerOnly)
    ));
    assert!(matches!(
        service.approve_member_request("bob", request.id),
        Err(TribeError::OwnerOnly)
    ));

    let membership = service.approve_member_request("alice", request.id).unwrap();
    assert_eq!(membership.user_id, "carol");
    assert_eq!(membership.invited_by, "alice");
    assert_eq!(membership.status(), MembershipStatus::Invited);
    assert!(service.list_member_requests("alice", tribe.id).unwrap().is_empty());
    assert!(matches!(
        service.approve_member_request("alice", request.id),
        Err(TribeError::MemberRequestNotFound)
    ));

    let second = match service.invite_member("bob", tribe.id, "dave", None).unwrap() {
        InviteOutcome::Requested(request) => request,
        other => panic!("unexpected outcome: {other:?}"),
    };
    let denied = service.deny_member_request("alice", second.id).unwrap();
    assert_eq!(denied.reviewed_by.as_deref(), Some("alice"));
    assert!(service.list_invitations("dave").unwrap().is_empty());
}

#[test]
fn settings_are_self_service_except_permissions() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    let alice = h.membership_of(tribe.id, "alice");
    let bob = h.membership_of(tribe.id, "bob");
    let service = h.membership();

    let own = MemberSettingsUpdate {
        management_scope: Some(ManagementScope::PersonalOnly),
        digest_notifs: Some(false),
        ..MemberSettingsUpdate::default()
    };
    let updated = service
        .update_member_settings("bob", tribe.id, bob.id, &own)
        .unwrap();
    assert_eq!(updated.management_scope, ManagementScope::PersonalOnly);
    assert!(!h.membership_of(tribe.id, "bob").digest_notifs);
    assert!(h.membership_of(tribe.id, "bob").proposal_notifs);

    assert!(matches!(
        service.update_member_settings("bob", tribe.id, alice.id, &own),
        Err(TribeError::PermissionDenied(_))
    ));
    assert!(matches!(
        service.update_member_settings("alice", tribe.id, bob.id, &own),
        Err(TribeError::PermissionDenied(_))
    ));
    let grant = MemberSettingsUpdate {
        permissions: Some(tribes_core::PermissionSet::all_granted()),
        ..MemberSettingsUpdate::default()
    };
    assert!(matches!(
        service.update_member_settings("bob", tribe.id, bob.id, &grant),
        Err(TribeError::OwnerOnly)
    ));
    assert!(matches!(
        service.update_member_settings("alice", tribe.id, uuid::Uuid::new_v4(), &grant),
        Err(TribeError::MemberNotFound)
    ));
}

#[test]
fn invite_link_joins_once_per_user_and_honours_max_uses() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    let service = h.membership();

    let link = service
        .create_invite_link("bob", tribe.id, Some(2), None)
        .unwrap();
    let preview = service.preview_invite(&link.token).unwrap();
    assert_eq!(preview.tribe_name, "Home");
    assert_eq!(preview.member_count, 2);

    let (joined_tribe, carol) = service.join_via_token("carol", &link.token).unwrap();
    assert_eq!(joined_tribe.id, tribe.id);
    assert!(carol.is_active());
    assert_eq!(carol.invited_by, "bob");

    assert!(matches!(
        service.join_via_token("carol", &link.token),
        Err(TribeError::AlreadyMember)
    ));
    let stored = SqliteInviteRepository::new(&h.conn)
        .find_token(&link.token)
        .unwrap()
        .unwrap();
    assert_eq!(stored.used_count, 1);

    service.join_via_token("dave", &link.token).unwrap();
    assert!(matches!(
        service.join_via_token("erin", &link.token),
        Err(TribeError::InviteExhausted)
    ));
    assert!(matches!(
        service.preview_invite(&link.token),
        Err(TribeError::InviteExhausted)
    ));
}

#[test]
fn expired_malformed_and_deleted_tokens_are_rejected() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &[]);
    let service = h.membership();

    let link = service
        .create_invite_link("alice", tribe.id, None, Some(1))
        .unwrap();
    assert_eq!(link.expires_at, Some(h.ctx().now_ms() + MILLIS_PER_DAY));

    assert!(matches!(
        service.join_via_token("bob", "not-a-token"),
        Err(TribeError::InviteNotFound)
    ));
    assert!(matches!(
        service.join_via_token("bob", &"f".repeat(32)),
        Err(TribeError::InviteNotFound)
    ));

    h.clock.advance_ms(MILLIS_PER_DAY);
    assert!(matches!(
        service.join_via_token("bob", &link.token),
        Err(TribeError::InviteExpired)
    ));

    let fresh = service
        .create_invite_link("alice", tribe.id, None, None)
        .unwrap();
    service.delete_tribe("alice", tribe.id).unwrap();
    assert!(matches!(
        service.join_via_token("bob", &fresh.token),
        Err(TribeError::TribeDeleted)
    ));
    assert!(matches!(
        service.invite_member("alice", tribe.id, "bob", None),
        Err(TribeError::TribeDeleted)
    ));
    assert!(service.list_tribes("alice").unwrap().is_empty());
}

#[test]
fn left_member_rejoins_through_a_link() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    let original = h.membership_of(tribe.id, "bob");
    h.membership().leave_tribe("bob", tribe.id).unwrap();
    h.tick();

    let link = h
        .membership()
        .create_invite_link("alice", tribe.id, None, None)
        .unwrap();
    let (_, rejoined) = h.membership().join_via_token("bob", &link.token).unwrap();
    assert_eq!(rejoined.id, original.id);
    let stored = h.membership_of(tribe.id, "bob");
    assert!(stored.is_active());
    assert_eq!(stored.accepted_at, Some(h.ctx().now_ms()));
}

#[test]
fn sms_invites_are_single_use_with_configured_expiry() {
    let config = EngineConfig {
        sms_invite_expiry_days: 3,
        ..EngineConfig::default()
    };
    let h = Harness::with_config(config);
    let tribe = h.tribe_with_members("alice", &[]);

    assert!(matches!(
        h.membership().create_sms_invite("alice", tribe.id, "12-34"),
        Err(TribeError::InvalidPhoneNumber)
    ));
    let invite = h
        .membership()
        .create_sms_invite("alice", tribe.id, "+1 (555) 123-4567")
        .unwrap();
    assert_eq!(invite.phone_digits, "15551234567");
    assert_eq!(invite.token.max_uses, Some(1));
    assert_eq!(
        invite.token.expires_at,
        Some(h.ctx().now_ms() + 3 * MILLIS_PER_DAY)
    );

    h.membership().join_via_token("bob", &invite.token.token).unwrap();
    assert!(matches!(
        h.membership().join_via_token("carol", &invite.token.token),
        Err(TribeError::InviteExhausted)
    ));
}

#[test]
fn concurrent_redemptions_of_a_single_use_token_admit_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tribes.db");
    let config = EngineConfig::default();
    let notifier = RecordingNotifier::new();
    let clock = SystemClock;

    let token = {
        let conn = open_db(&path).unwrap();
        let service = MembershipService::new(&conn, ServiceContext::new(&clock, &config, &notifier));
        let tribe = service.create_tribe("alice", "Home", TribeType::Friend).unwrap();
        service
            .create_invite_link("alice", tribe.id, Some(1), None)
            .unwrap()
            .token
    };

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["bob", "carol"]
        .into_iter()
        .map(|user| {
            let path = path.clone();
            let token = token.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let config = EngineConfig::default();
                let notifier = RecordingNotifier::new();
                let clock = SystemClock;
                let service =
                    MembershipService::new(&conn, ServiceContext::new(&clock, &config, &notifier));
                barrier.wait();
                service.join_via_token(user, &token).map(|_| ())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    let joined = results.iter().filter(|result| result.is_ok()).count();
    let exhausted = results
        .iter()
        .filter(|result| matches!(result, Err(TribeError::InviteExhausted)))
        .count();
    assert_eq!(joined, 1);
    assert_eq!(exhausted, 1);

    let conn = open_db(&path).unwrap();
    let stored = SqliteInviteRepository::new(&conn)
        .find_token(&token)
        .unwrap()
        .unwrap();
    assert_eq!(stored.used_count, 1);
}
