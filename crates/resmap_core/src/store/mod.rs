//! Storage engine boundary.
//!
//! # Responsibility
//! - Model backing tables and record values.
//! - Provide the unit-of-work `Session`: equality queries, staged
//!   insert/update/delete, native change tracking and a pre-commit hook point.
//! - Install backing tables for registered record types.
//!
//! # Invariants
//! - At most one record per (table, identity values) is staged or persisted.
//! - Staged changes reach SQLite only inside `Session::commit`, atomically.
//! - Store errors are surfaced unchanged by upper layers.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod catalog;
mod record;
mod session;

pub use catalog::install_record_type;
pub use record::{Record, RecordKey, RecordType};
pub use session::{
    ChangeSet, HookError, HookFailureMode, HookId, PreCommitHook, Session, SessionId,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer error.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// A record with the same identity is already staged or persisted.
    ConstraintViolation(RecordKey),
    UnknownColumn {
        record_type: String,
        column: String,
    },
    /// The session must be rolled back before it can be used again.
    TransactionInactive(SessionId),
    NestedCommit(SessionId),
    NotPersisted(RecordKey),
    StaleRecord(RecordKey),
    IdentityChanged(RecordKey),
    SchemaMismatch {
        table: String,
        detail: String,
    },
    Hook(HookError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::ConstraintViolation(key) => {
                write!(f, "unique identity constraint violated: {key}")
            }
            Self::UnknownColumn {
                record_type,
                column,
            } => write!(f, "unknown column `{column}` on `{record_type}`"),
            Self::TransactionInactive(id) => write!(
                f,
                "session {id} is inactive after a failed subtransaction; roll back first"
            ),
            Self::NestedCommit(id) => {
                write!(f, "session {id} cannot commit inside a subtransaction")
            }
            Self::NotPersisted(key) => write!(f, "record is not persisted: {key}"),
            Self::StaleRecord(key) => write!(f, "record is no longer tracked: {key}"),
            Self::IdentityChanged(key) => {
                write!(f, "identity values changed on attached record: {key}")
            }
            Self::SchemaMismatch { table, detail } => {
                write!(f, "backing table `{table}` does not match catalog: {detail}")
            }
            Self::Hook(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Hook(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<HookError> for StoreError {
    fn from(value: HookError) -> Self {
        Self::Hook(value)
    }
}
