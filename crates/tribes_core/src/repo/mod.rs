//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts, one per aggregate.
//! - Isolate SQLite query details from service orchestration.
//! - Own every multi-statement write that must be atomic.
//!
//! # Invariants
//! - Repositories borrow a migrated connection and hold no other state.
//! - Multi-row writes run inside one `IMMEDIATE` transaction.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod invite_repo;
pub mod message_repo;
pub mod notification_repo;
pub mod personal_repo;
pub mod proposal_repo;
pub mod tribe_repo;

pub use invite_repo::{InviteRepository, RedeemOutcome, SqliteInviteRepository};
pub use message_repo::{MessageRepository, SqliteMessageRepository};
pub use notification_repo::{NotificationRepository, SqliteNotificationRepository};
pub use personal_repo::{MaterializeWrite, PersonalItemRepository, SqlitePersonalItemRepository};
pub use proposal_repo::{
    AcceptedProposal, InboxEntry, ProposalRepository, SqliteProposalRepository, TransitionWrite,
};
pub use tribe_repo::{DigestCandidate, SqliteTribeRepository, TribeRepository};

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound { entity: &'static str, id: String },
    InvalidData(String),
    UninitializedConnection { expected: u32, actual: u32 },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UninitializedConnection { expected, actual } => write!(
                f,
                "connection schema version {actual} does not match expected {expected}; open it with db::open_db"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl RepoError {
    /// True when the failure is a UNIQUE or PRIMARY KEY violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Db(DbError::Sqlite(err)) => is_unique_violation(err),
            _ => false,
        }
    }
}

/// Fails unless `conn` has every migration applied.
pub fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let actual = current_user_version(conn)?;
    let expected = latest_version();
    if actual != expected {
        return Err(RepoError::UninitializedConnection { expected, actual });
    }
    Ok(())
}

pub(crate) fn begin_immediate(conn: &Connection) -> RepoResult<Transaction<'_>> {
    Ok(Transaction::new_unchecked(
        conn,
        TransactionBehavior::Immediate,
    )?)
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == ErrorCode::ConstraintViolation
                && matches!(
                    inner.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
    )
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn parse_optional_uuid(value: Option<String>, column: &str) -> RepoResult<Option<Uuid>> {
    value.map(|text| parse_uuid(&text, column)).transpose()
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

pub(crate) fn to_u32(value: i64, column: &str) -> RepoResult<u32> {
    u32::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("out of range value `{value}` in {column}")))
}
