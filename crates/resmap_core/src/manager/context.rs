//! Per-unit-of-work context passed to every manager operation.

use crate::store::{Session, StoreResult};
use rusqlite::Connection;

/// Carries the active transactional session; holds no other state.
///
/// Created by the caller per unit of work. The manager never keeps one.
pub struct ResourceContext<'conn> {
    db_session: Session<'conn>,
}

impl<'conn> ResourceContext<'conn> {
    pub fn new(db_session: Session<'conn>) -> Self {
        Self { db_session }
    }

    /// Opens a fresh session on `conn`.
    pub fn from_connection(conn: &'conn Connection) -> Self {
        Self::new(Session::new(conn))
    }

    pub fn db_session(&self) -> &Session<'conn> {
        &self.db_session
    }

    pub fn db_session_mut(&mut self) -> &mut Session<'conn> {
        &mut self.db_session
    }

    /// Commits the session, firing attached pre-commit hooks first.
    pub fn commit(&mut self) -> StoreResult<()> {
        self.db_session.commit()
    }

    pub fn rollback(&mut self) {
        self.db_session.rollback();
    }

    pub fn into_session(self) -> Session<'conn> {
        self.db_session
    }
}
