//! Core domain logic for Tribes.
//! This crate is the single source of truth for the consent, permission and
//! notification invariants of shared tribe items.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig, LoggingConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::item::{ItemId, ItemType, TribeItem};
pub use model::permission::{PermissionAction, PermissionFlag, PermissionSet};
pub use model::personal::{PersonalItem, PersonalItemContent, PersonalItemKind};
pub use model::proposal::{Proposal, ProposalId, ProposalState};
pub use model::tribe::{ManagementScope, Membership, Tribe, TribeId, TribeType};
pub use notify::{LogNotifier, Notifier, NotifyError, OutboundNotification, RecordingNotifier};
pub use repo::{RepoError, RepoResult};
pub use service::{
    DigestService, MembershipService, MessageService, PermissionService, PersonalService,
    ProposalService, ServiceContext, TribeError, TribeResult,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
