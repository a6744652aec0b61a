//! Tribe use-case services.
//!
//! # Responsibility
//! - Turn authenticated caller requests into repository calls.
//! - Enforce membership, permission and lifecycle rules before any write.
//! - Trigger notifications after commits, never inside them.
//!
//! # Invariants
//! - Services borrow one connection and hold no cross-request state.
//! - Time, configuration and the push transport come from `ServiceContext`.

pub mod context;
pub mod digest_service;
pub mod error;
pub mod membership_service;
pub mod message_service;
pub mod permission_service;
pub mod personal_service;
pub mod proposal_service;

pub use context::ServiceContext;
pub use digest_service::{DigestRun, DigestService, DIGEST_JOB_NAME};
pub use error::{require_user, TribeError, TribeResult};
pub use membership_service::{InviteOutcome, MembershipService};
pub use message_service::MessageService;
pub use permission_service::{PermissionDecision, PermissionService};
pub use personal_service::{Materialized, PersonalService, ResyncReport};
pub use proposal_service::{CreatedItem, ProposalService, TransitionOutcome};
