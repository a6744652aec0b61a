mod common;

use common::{users, Harness};
use serde_json::json;
use tribes_core::model::tribe::MemberSettingsUpdate;
use tribes_core::service::PermissionDecision;
use tribes_core::{ItemType, PermissionAction, PermissionFlag, PermissionSet, TribeError};

fn denied(reason: &str) -> PermissionDecision {
    PermissionDecision::Denied(reason.to_string())
}

#[test]
fn default_member_may_add_but_not_remove() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    let permissions = h.permissions();

    for item_type in ItemType::ALL {
        assert!(permissions
            .check_permission("bob", tribe.id, PermissionAction::Add, item_type)
            .unwrap()
            .is_allowed());
    }
    assert_eq!(
        permissions
            .check_permission("bob", tribe.id, PermissionAction::Remove, ItemType::Task)
            .unwrap(),
        denied("You don't have permission to remove tasks in this Tribe")
    );
}

#[test]
fn revoked_grocery_flag_uses_irregular_plural() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    let bob = h.membership_of(tribe.id, "bob");

    let update = MemberSettingsUpdate {
        permissions: Some(PermissionSet::default().with(PermissionFlag::AddGroceries, false)),
        ..MemberSettingsUpdate::default()
    };
    h.membership()
        .update_member_settings("alice", tribe.id, bob.id, &update)
        .unwrap();

    assert_eq!(
        h.permissions()
            .check_permission("bob", tribe.id, PermissionAction::Add, ItemType::Grocery)
            .unwrap(),
        denied("You don't have permission to add groceries in this Tribe")
    );

    let err = h
        .proposals()
        .create_item_and_proposals(
            tribe.id,
            "bob",
            "grocery",
            json!({ "content": "Milk" }),
            &users(&["alice"]),
        )
        .unwrap_err();
    match err {
        TribeError::PermissionDenied(reason) => {
            assert_eq!(reason, "You don't have permission to add groceries in this Tribe")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.count_rows("tribe_items"), 0);
    assert_eq!(h.count_rows("tribe_proposals"), 0);
}

#[test]
fn owner_bypasses_an_empty_permission_set() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    let alice = h.membership_of(tribe.id, "alice");

    let update = MemberSettingsUpdate {
        permissions: Some(PermissionSet::none_granted()),
        ..MemberSettingsUpdate::default()
    };
    h.membership()
        .update_member_settings("alice", tribe.id, alice.id, &update)
        .unwrap();
    assert_eq!(
        h.membership_of(tribe.id, "alice").permissions,
        PermissionSet::none_granted()
    );

    for item_type in ItemType::ALL {
        for action in [PermissionAction::Add, PermissionAction::Remove] {
            assert!(h
                .permissions()
                .check_permission("alice", tribe.id, action, item_type)
                .unwrap()
                .is_allowed());
        }
    }
}

#[test]
fn deleted_tribe_denies_even_the_owner() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    h.membership().delete_tribe("alice", tribe.id).unwrap();

    assert_eq!(
        h.permissions()
            .check_permission("alice", tribe.id, PermissionAction::Add, ItemType::Task)
            .unwrap(),
        denied("Tribe has been deleted")
    );
    let err = h
        .proposals()
        .create_item_and_proposals(
            tribe.id,
            "alice",
            "task",
            json!({ "title": "Call mum" }),
            &users(&["bob"]),
        )
        .unwrap_err();
    assert!(matches!(err, TribeError::TribeDeleted));
}

#[test]
fn outsiders_pending_and_left_members_are_not_members() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    h.membership()
        .invite_member("alice", tribe.id, "carol", None)
        .unwrap();
    h.membership().leave_tribe("bob", tribe.id).unwrap();

    for user in ["bob", "carol", "mallory"] {
        assert_eq!(
            h.permissions()
                .check_permission(user, tribe.id, PermissionAction::Add, ItemType::Routine)
                .unwrap(),
            denied("Not a member of this Tribe"),
            "user {user}"
        );
    }

    let err = h
        .proposals()
        .create_item_and_proposals(
            tribe.id,
            "mallory",
            "routine",
            json!({ "title": "Walk" }),
            &users(&["alice"]),
        )
        .unwrap_err();
    assert!(matches!(err, TribeError::NotAMember));
}

#[test]
fn recipients_must_all_be_active_members() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob", "carol"]);
    h.membership()
        .invite_member("alice", tribe.id, "dave", None)
        .unwrap();
    let permissions = h.permissions();

    assert!(permissions
        .validate_recipients(tribe.id, &users(&["bob", "carol", "bob"]))
        .unwrap());
    assert!(!permissions
        .validate_recipients(tribe.id, &users(&["bob", "dave"]))
        .unwrap());
    assert!(!permissions
        .validate_recipients(tribe.id, &users(&["bob", "stranger"]))
        .unwrap());
    assert!(!permissions.validate_recipients(tribe.id, &[]).unwrap());
}
