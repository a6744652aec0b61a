//! Domain model for tribes, memberships, proposals and personal items.
//!
//! # Responsibility
//! - Define canonical records and closed enums used by core business logic.
//! - Own the pure rules that need no storage: the proposal transition table,
//!   the permission flag map, invite token validity.
//!
//! # Invariants
//! - Every record is identified by a stable UUID, except users, whose ids come
//!   from the external identity provider as opaque strings.
//! - Timestamps are Unix epoch milliseconds.

pub mod feed;
pub mod invite;
pub mod item;
pub mod notification;
pub mod permission;
pub mod personal;
pub mod proposal;
pub mod tribe;

/// Opaque, stable user identifier supplied by the identity provider.
pub type UserId = String;
