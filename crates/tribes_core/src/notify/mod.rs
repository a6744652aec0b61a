//! Outbound notification contract.
//!
//! # Responsibility
//! - Define the push boundary (`Notifier`) the services call into.
//! - Build proposal and digest notifications from ids and counts.
//! - Dispatch fire-and-forget: failures are logged, never retried.
//!
//! # Invariants
//! - Payloads carry ids and kinds only.
//! - Log lines never include titles or bodies.

use crate::model::item::{ItemId, ItemType};
use crate::model::notification::NotificationKind;
use crate::model::proposal::ProposalId;
use crate::model::tribe::TribeId;
use crate::model::UserId;
use log::{info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Structured data delivered alongside the visible text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub kind: NotificationKind,
    pub tribe_id: TribeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<ProposalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundNotification {
    pub user_id: UserId,
    pub title: String,
    pub body: String,
    pub payload: NotificationPayload,
}

impl OutboundNotification {
    /// Immediate notice for one created proposal.
    pub fn proposal(
        recipient_user_id: impl Into<UserId>,
        tribe_id: TribeId,
        tribe_name: &str,
        item_type: ItemType,
        proposal_id: ProposalId,
        item_id: ItemId,
    ) -> Self {
        Self {
            user_id: recipient_user_id.into(),
            title: tribe_name.to_string(),
            body: format!("New {} proposal", item_type.as_str()),
            payload: NotificationPayload {
                kind: NotificationKind::TribeProposal,
                tribe_id,
                proposal_id: Some(proposal_id),
                item_id: Some(item_id),
            },
        }
    }

    /// Batched summary of `unread` updates in one tribe.
    pub fn digest(
        user_id: impl Into<UserId>,
        tribe_id: TribeId,
        tribe_name: &str,
        unread: u32,
    ) -> Self {
        let noun = if unread == 1 { "update" } else { "updates" };
        Self {
            user_id: user_id.into(),
            title: tribe_name.to_string(),
            body: format!("You have {unread} new {noun}"),
            payload: NotificationPayload {
                kind: NotificationKind::TribeDigest,
                tribe_id,
                proposal_id: None,
                item_id: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The transport refused or failed the delivery.
    Transport(String),
    /// The recipient has no registered device.
    NoDevice,
}

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "notification transport failed: {message}"),
            Self::NoDevice => write!(f, "recipient has no registered device"),
        }
    }
}

impl Error for NotifyError {}

/// Push transport boundary.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &OutboundNotification) -> Result<(), NotifyError>;
}

/// Sends and logs the outcome. Returns whether delivery succeeded.
pub fn dispatch(notifier: &dyn Notifier, notification: &OutboundNotification) -> bool {
    let kind = notification.payload.kind;
    match notifier.send(notification) {
        Ok(()) => {
            info!(
                "event=notification_send module=notify status=ok kind={} user_id={} tribe_id={}",
                kind, notification.user_id, notification.payload.tribe_id
            );
            true
        }
        Err(err) => {
            warn!(
                "event=notification_send module=notify status=error kind={} user_id={} tribe_id={} error={}",
                kind, notification.user_id, notification.payload.tribe_id, err
            );
            false
        }
    }
}

/// Notifier that only writes a log line. Used when no transport is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &OutboundNotification) -> Result<(), NotifyError> {
        info!(
            "event=notification_logged module=notify status=ok kind={} user_id={}",
            notification.payload.kind, notification.user_id
        );
        Ok(())
    }
}

/// In-memory notifier that records every delivery attempt.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OutboundNotification>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent sends fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn sent(&self) -> Vec<OutboundNotification> {
        lock(&self.sent).clone()
    }

    pub fn sent_to(&self, user_id: &str) -> Vec<OutboundNotification> {
        lock(&self.sent)
            .iter()
            .filter(|notification| notification.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn count_of(&self, kind: NotificationKind) -> usize {
        lock(&self.sent)
            .iter()
            .filter(|notification| notification.payload.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &OutboundNotification) -> Result<(), NotifyError> {
        if *lock(&self.failing) {
            return Err(NotifyError::Transport("recording notifier set to fail".to_string()));
        }
        lock(&self.sent).push(notification.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{dispatch, Notifier, OutboundNotification, RecordingNotifier};
    use crate::model::item::ItemType;
    use crate::model::notification::NotificationKind;
    use uuid::Uuid;

    #[test]
    fn digest_body_pluralizes() {
        let tribe_id = Uuid::new_v4();
        assert_eq!(
            OutboundNotification::digest("u", tribe_id, "Home", 1).body,
            "You have 1 new update"
        );
        assert_eq!(
            OutboundNotification::digest("u", tribe_id, "Home", 3).body,
            "You have 3 new updates"
        );
    }

    #[test]
    fn proposal_payload_serializes_ids_only() {
        let notification = OutboundNotification::proposal(
            "bob",
            Uuid::new_v4(),
            "Home",
            ItemType::Grocery,
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        let json = serde_json::to_value(&notification.payload).expect("payload json");
        assert_eq!(json["kind"], "tribe_proposal");
        assert!(json.get("proposal_id").is_some());
        assert_eq!(notification.title, "Home");
    }

    #[test]
    fn failed_dispatch_is_reported_not_raised() {
        let notifier = RecordingNotifier::new();
        let notification = OutboundNotification::digest("u", Uuid::new_v4(), "Home", 2);

        notifier.set_failing(true);
        assert!(!dispatch(&notifier, &notification));
        assert!(notifier.sent().is_empty());

        notifier.set_failing(false);
        assert!(dispatch(&notifier, &notification));
        assert!(notifier.send(&notification).is_ok());
        assert_eq!(notifier.count_of(NotificationKind::TribeDigest), 2);
    }
}
