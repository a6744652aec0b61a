mod common;

use common::Harness;
use serde_json::json;
use tribes_core::clock::{MILLIS_PER_DAY, MILLIS_PER_HOUR};
use tribes_core::model::notification::NotificationKind;
use tribes_core::model::tribe::MemberSettingsUpdate;
use tribes_core::repo::{NotificationRepository, SqliteNotificationRepository};
use tribes_core::service::{DigestRun, DIGEST_JOB_NAME};
use tribes_core::TribeError;

fn run(h: &Harness) -> DigestRun {
    h.digest().run_digest().unwrap()
}

fn sent(count: u32, skipped: u32) -> DigestRun {
    DigestRun {
        sent: count,
        skipped,
        ..DigestRun::default()
    }
}

#[test]
fn unread_messages_produce_one_digest_per_member() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    h.messages().post_message("bob", tribe.id, "Dinner at 7?").unwrap();
    h.tick();
    h.messages().post_message("bob", tribe.id, "Bring dessert").unwrap();
    h.tick();

    assert_eq!(run(&h), sent(1, 1));
    let to_alice = h.notifier.sent_to("alice");
    assert_eq!(to_alice.len(), 1);
    assert_eq!(to_alice[0].title, "Home");
    assert_eq!(to_alice[0].body, "You have 2 new updates");
    assert_eq!(to_alice[0].payload.kind, NotificationKind::TribeDigest);
    assert_eq!(to_alice[0].payload.tribe_id, tribe.id);
    assert!(h.notifier.sent_to("bob").is_empty());
}

#[test]
fn digest_is_rate_limited_to_one_per_window() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    h.messages().post_message("bob", tribe.id, "One").unwrap();
    h.tick();
    assert_eq!(run(&h).sent, 1);

    h.tick();
    h.messages().post_message("bob", tribe.id, "Two").unwrap();
    h.tick();
    assert_eq!(run(&h), sent(0, 2));

    h.clock.advance_ms(MILLIS_PER_DAY + 1);
    h.messages().post_message("bob", tribe.id, "Three").unwrap();
    h.tick();
    assert_eq!(run(&h), sent(1, 1));
    let to_alice = h.notifier.sent_to("alice");
    assert_eq!(to_alice.len(), 2);
    assert_eq!(to_alice[1].body, "You have 2 new updates");
    assert_eq!(h.count_rows("notification_log"), 2);
}

#[test]
fn pending_proposals_count_and_opt_out_is_respected() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob", "carol"]);
    h.propose(tribe.id, "alice", "task", json!({ "title": "Rake leaves" }), &["bob", "carol"]);

    let carol = h.membership_of(tribe.id, "carol");
    let update = MemberSettingsUpdate {
        digest_notifs: Some(false),
        ..MemberSettingsUpdate::default()
    };
    h.membership()
        .update_member_settings("carol", tribe.id, carol.id, &update)
        .unwrap();
    h.notifier.clear();

    assert_eq!(run(&h), sent(1, 1));
    let to_bob = h.notifier.sent_to("bob");
    assert_eq!(to_bob.len(), 1);
    assert_eq!(to_bob[0].body, "You have 1 new update");
    assert!(h.notifier.sent_to("carol").is_empty());
}

#[test]
fn read_messages_are_not_digested() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    h.messages().post_message("bob", tribe.id, "Hello").unwrap();
    h.tick();
    assert_eq!(h.messages().unread_message_count("alice", tribe.id).unwrap(), 1);

    h.messages().mark_messages_read("alice", tribe.id).unwrap();
    h.tick();
    assert_eq!(h.messages().unread_message_count("alice", tribe.id).unwrap(), 0);
    assert_eq!(run(&h), sent(0, 2));
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn deleted_tribes_and_left_members_get_no_digest() {
    let h = Harness::new();
    let kept = h.tribe_with_members("alice", &["bob", "carol"]);
    h.messages().post_message("alice", kept.id, "Still here").unwrap();
    h.tick();
    h.membership().leave_tribe("carol", kept.id).unwrap();

    let gone = h.tribe_with_members("dave", &["bob"]);
    h.messages().post_message("dave", gone.id, "Bye").unwrap();
    h.tick();
    h.membership().delete_tribe("dave", gone.id).unwrap();
    h.tick();

    assert_eq!(run(&h), sent(1, 1));
    let to_bob = h.notifier.sent_to("bob");
    assert_eq!(to_bob.len(), 1);
    assert_eq!(to_bob[0].payload.tribe_id, kept.id);
}

#[test]
fn failed_delivery_is_counted_and_not_retried_in_the_window() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    h.messages().post_message("bob", tribe.id, "Ping").unwrap();
    h.tick();

    h.notifier.set_failing(true);
    let failed = run(&h);
    assert_eq!(failed.sent, 0);
    assert_eq!(failed.failed, 1);
    assert_eq!(h.count_rows("notification_log"), 1);

    h.notifier.set_failing(false);
    h.tick();
    assert_eq!(run(&h), sent(0, 2));
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn held_lock_skips_the_run_until_the_lease_expires() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    h.messages().post_message("bob", tribe.id, "Ping").unwrap();
    h.tick();

    let locks = SqliteNotificationRepository::new(&h.conn);
    assert!(locks
        .try_acquire_job_lock(
            DIGEST_JOB_NAME,
            "other-runner",
            h.ctx().now_ms(),
            h.config.digest_lock_lease_ms,
        )
        .unwrap());

    let skipped = run(&h);
    assert!(skipped.skipped_locked);
    assert_eq!(skipped.sent + skipped.skipped + skipped.failed, 0);
    assert!(h.notifier.sent().is_empty());

    h.clock.advance_ms(MILLIS_PER_HOUR - 1);
    assert!(run(&h).skipped_locked);

    h.clock.advance_ms(1);
    let taken_over = run(&h);
    assert!(!taken_over.skipped_locked);
    assert_eq!(taken_over.sent, 1);
    assert_eq!(h.count_rows("job_locks"), 0);
}

#[test]
fn completed_run_releases_the_lock() {
    let h = Harness::new();
    h.tribe_with_members("alice", &[]);
    assert_eq!(run(&h), sent(0, 1));
    assert_eq!(h.count_rows("job_locks"), 0);
    assert!(!run(&h).skipped_locked);
}

#[test]
fn message_bodies_are_validated() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob"]);
    let messages = h.messages();

    assert!(matches!(
        messages.post_message("bob", tribe.id, "   "),
        Err(TribeError::InvalidMessage(_))
    ));
    assert!(matches!(
        messages.post_message("bob", tribe.id, &"x".repeat(2001)),
        Err(TribeError::InvalidMessage(_))
    ));
    assert!(matches!(
        messages.post_message("mallory", tribe.id, "hi"),
        Err(TribeError::NotAMember)
    ));

    let posted = messages
        .post_message("bob", tribe.id, &format!("  {}  ", "é".repeat(2000)))
        .unwrap();
    assert_eq!(posted.body.chars().count(), 2000);
    let listed = messages.list_messages("alice", tribe.id, 10).unwrap();
    assert_eq!(listed, vec![posted]);
}

#[test]
fn membership_events_appear_in_the_activity_feed() {
    let h = Harness::new();
    let tribe = h.tribe_with_members("alice", &["bob", "carol"]);
    h.membership().leave_tribe("carol", tribe.id).unwrap();

    let activities = h.messages().list_activities("alice", tribe.id, 10).unwrap();
    let texts: Vec<&str> = activities
        .iter()
        .map(|activity| activity.message.as_str())
        .collect();
    assert!(texts.contains(&"bob joined the Tribe"));
    assert!(texts.contains(&"carol joined the Tribe"));
    assert!(texts.contains(&"carol left the Tribe"));
    assert_eq!(h.notifier.sent().len(), 0);
}
