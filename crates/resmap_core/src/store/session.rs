//! Unit-of-work session over one SQLite connection.
//!
//! # Responsibility
//! - Answer equality queries against persisted rows merged with staged state.
//! - Stage inserts, updates and deletes and track them per record.
//! - Fire attached pre-commit hooks once per commit, then write all staged
//!   changes in one SQLite transaction.
//!
//! # Invariants
//! - Nothing is written to SQLite before `commit`.
//! - A failed subtransaction leaves the session rollback-only.
//! - Hooks see the full change set of the commit and run before any write.
//! - A record inserted and deleted in one session is reported as both new
//!   and deleted; a record inserted then updated is reported only as new.

use super::catalog::quote_ident;
use super::record::{Record, RecordKey, RecordOrigin, RecordType};
use super::{StoreError, StoreResult};
use crate::model::value::{AttrMap, AttrValue};
use log::{debug, error, info, warn};
use rusqlite::{params_from_iter, Connection};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

static NULL_VALUE: AttrValue = AttrValue::Null;

/// Stable identifier of one session, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier used to attach a hook to a session at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(Uuid);

impl HookId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HookId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for HookId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a failing hook does to the session's staged changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFailureMode {
    /// Discard every staged change.
    AbortTransaction,
    /// Fail this commit but keep staged changes for retry or rollback.
    RejectCommit,
}

/// Failure reported by a pre-commit hook.
#[derive(Debug)]
pub struct HookError {
    mode: HookFailureMode,
    message: String,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl HookError {
    pub fn new(mode: HookFailureMode, message: impl Into<String>) -> Self {
        Self {
            mode,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn mode(&self) -> HookFailureMode {
        self.mode
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "pre-commit hook failed: {}", self.message)
    }
}

impl Error for HookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn Error + 'static))
    }
}

/// Pending changes of one session, in first-touch order.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub new: Vec<Record>,
    pub dirty: Vec<Record>,
    pub deleted: Vec<Record>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.dirty.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.dirty.len() + self.deleted.len()
    }
}

/// Callback fired by `Session::commit` before staged changes are written.
pub trait PreCommitHook: Send + Sync {
    fn hook_id(&self) -> HookId;

    fn before_commit(&self, session: &Session<'_>, changes: &ChangeSet) -> Result<(), HookError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    RollbackOnly,
}

#[derive(Debug)]
struct Tracked {
    record_type: Arc<RecordType>,
    key: RecordKey,
    rowid: Option<i64>,
    values: AttrMap,
    present: bool,
    inserted: bool,
    modified: bool,
    deleted: bool,
}

impl Tracked {
    fn record(&self) -> Record {
        let origin = match self.rowid {
            Some(rowid) => RecordOrigin::Persisted {
                rowid,
                key: self.key.clone(),
            },
            None => RecordOrigin::Pending {
                key: self.key.clone(),
            },
        };
        Record::attached(self.record_type.clone(), self.values.clone(), origin)
    }
}

/// Transactional session bound to one connection.
///
/// Not safe for concurrent use; callers serialize access per session.
pub struct Session<'conn> {
    id: SessionId,
    conn: &'conn Connection,
    tracked: Vec<Tracked>,
    index: HashMap<RecordKey, usize>,
    hooks: Vec<Arc<dyn PreCommitHook>>,
    depth: u32,
    state: SessionState,
}

impl<'conn> Session<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            id: SessionId(Uuid::new_v4()),
            conn,
            tracked: Vec::new(),
            index: HashMap::new(),
            hooks: Vec::new(),
            depth: 0,
            state: SessionState::Active,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// Whether the session accepts new operations.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Current subtransaction nesting depth.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Runs `f` as a subtransaction of this session.
    ///
    /// An error from `f` marks the whole session rollback-only.
    pub fn subtransaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.ensure_active()?;
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;

        if result.is_err() {
            self.state = SessionState::RollbackOnly;
            warn!(
                "event=subtransaction module=store status=error session={} depth={}",
                self.id, self.depth
            );
        }
        result
    }

    /// Equality query over persisted rows and staged state.
    ///
    /// Persisted rows come first in row id order, then pending inserts in
    /// staging order. `Null` filter values match null columns.
    pub fn query(
        &self,
        record_type: &Arc<RecordType>,
        filter: &AttrMap,
    ) -> StoreResult<Vec<Record>> {
        self.ensure_active()?;
        ensure_columns(record_type, filter)?;

        let mut matched: Vec<((u8, i64), Record)> = Vec::new();
        for (rowid, values) in self.select_rows(record_type, filter)? {
            let key = record_type.key_for(&values);
            if self.index.contains_key(&key) {
                continue;
            }
            let origin = RecordOrigin::Persisted { rowid, key };
            matched.push((
                (0, rowid),
                Record::attached(record_type.clone(), values, origin),
            ));
        }

        for (position, entry) in self.tracked.iter().enumerate() {
            if entry.record_type.name() != record_type.name()
                || !entry.present
                || !matches_filter(&entry.values, filter)
            {
                continue;
            }
            let sort_key = match entry.rowid {
                Some(rowid) => (0, rowid),
                None => (1, position as i64),
            };
            matched.push((sort_key, entry.record()));
        }

        matched.sort_by_key(|(sort_key, _)| *sort_key);
        Ok(matched.into_iter().map(|(_, record)| record).collect())
    }

    /// Returns the first record matching `filter`, if any.
    pub fn query_first(
        &self,
        record_type: &Arc<RecordType>,
        filter: &AttrMap,
    ) -> StoreResult<Option<Record>> {
        Ok(self.query(record_type, filter)?.into_iter().next())
    }

    /// Stages a record.
    ///
    /// Transient records are staged for insertion and fail with
    /// `ConstraintViolation` when their identity already exists. Attached
    /// records are staged for update.
    pub fn add(&mut self, record: Record) -> StoreResult<()> {
        self.ensure_active()?;
        ensure_columns(record.record_type(), record.values())?;

        match record.origin().clone() {
            RecordOrigin::Transient => self.stage_insert(record),
            RecordOrigin::Persisted { rowid, key } => self.stage_update(record, key, Some(rowid)),
            RecordOrigin::Pending { key } => self.stage_update(record, key, None),
        }
    }

    /// Stages deletion of an attached record. Deleting twice is a no-op.
    pub fn delete(&mut self, record: &Record) -> StoreResult<()> {
        self.ensure_active()?;

        let (key, rowid) = match record.origin() {
            RecordOrigin::Transient => return Err(StoreError::NotPersisted(record.key())),
            RecordOrigin::Persisted { rowid, key } => (key.clone(), Some(*rowid)),
            RecordOrigin::Pending { key } => (key.clone(), None),
        };

        if let Some(&position) = self.index.get(&key) {
            let entry = &mut self.tracked[position];
            if entry.present {
                entry.present = false;
                entry.deleted = true;
                debug!(
                    "event=stage_delete module=store status=ok session={} record={}",
                    self.id, key
                );
            }
            return Ok(());
        }

        let Some(rowid) = rowid else {
            return Err(StoreError::StaleRecord(key));
        };
        debug!(
            "event=stage_delete module=store status=ok session={} record={}",
            self.id, key
        );
        self.track(Tracked {
            record_type: record.record_type().clone(),
            key,
            rowid: Some(rowid),
            values: record.values().clone(),
            present: false,
            inserted: false,
            modified: false,
            deleted: true,
        });
        Ok(())
    }

    /// Attaches a pre-commit hook. Attaching an already attached id is a no-op.
    pub fn listen(&mut self, hook: Arc<dyn PreCommitHook>) {
        if self.contains_hook(hook.hook_id()) {
            return;
        }
        debug!(
            "event=hook_attach module=store status=ok session={} hook={}",
            self.id,
            hook.hook_id()
        );
        self.hooks.push(hook);
    }

    pub fn contains_hook(&self, id: HookId) -> bool {
        self.hooks.iter().any(|hook| hook.hook_id() == id)
    }

    /// Detaches a hook; returns whether it was attached.
    pub fn remove_hook(&mut self, id: HookId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|hook| hook.hook_id() != id);
        self.hooks.len() != before
    }

    /// Native change sets: new, dirty and deleted records.
    pub fn pending_changes(&self) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for entry in &self.tracked {
            if entry.inserted {
                changes.new.push(entry.record());
            } else if entry.modified && !entry.deleted {
                changes.dirty.push(entry.record());
            }
            if entry.deleted {
                changes.deleted.push(entry.record());
            }
        }
        changes
    }

    /// Fires hooks once, then writes every staged change atomically.
    ///
    /// # Errors
    /// - `NestedCommit` when called inside a subtransaction.
    /// - `Hook` when a hook fails; staged changes are discarded or kept
    ///   according to the hook's failure mode.
    /// - `Db` when the write fails; the session becomes rollback-only.
    pub fn commit(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        if self.depth > 0 {
            return Err(StoreError::NestedCommit(self.id));
        }

        let started_at = Instant::now();
        let changes = self.pending_changes();
        if !changes.is_empty() {
            let hooks = self.hooks.clone();
            for hook in &hooks {
                if let Err(err) = hook.before_commit(self, &changes) {
                    warn!(
                        "event=session_commit module=store status=error session={} hook={} mode={:?} error={}",
                        self.id,
                        hook.hook_id(),
                        err.mode(),
                        err
                    );
                    if err.mode() == HookFailureMode::AbortTransaction {
                        self.clear_tracking();
                    }
                    return Err(StoreError::Hook(err));
                }
            }
        }

        if let Err(err) = self.flush() {
            self.state = SessionState::RollbackOnly;
            error!(
                "event=session_commit module=store status=error session={} duration_ms={} error={}",
                self.id,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        self.clear_tracking();
        info!(
            "event=session_commit module=store status=ok session={} records={} new={} dirty={} deleted={} duration_ms={}",
            self.id,
            changes.len(),
            changes.new.len(),
            changes.dirty.len(),
            changes.deleted.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Discards staged changes and reactivates the session.
    pub fn rollback(&mut self) {
        let discarded = self.tracked.len();
        self.clear_tracking();
        self.state = SessionState::Active;
        info!(
            "event=session_rollback module=store status=ok session={} discarded={}",
            self.id, discarded
        );
    }

    fn stage_insert(&mut self, record: Record) -> StoreResult<()> {
        let key = record.key();
        if let Some(&position) = self.index.get(&key) {
            let entry = &mut self.tracked[position];
            if entry.present {
                return Err(StoreError::ConstraintViolation(key));
            }
            entry.values = record.into_values();
            entry.present = true;
            entry.inserted = true;
            debug!(
                "event=stage_insert module=store status=ok session={} record={} replaces_delete=true",
                self.id, key
            );
            return Ok(());
        }

        let record_type = record.record_type().clone();
        let identity: AttrMap = record_type
            .identity_columns()
            .iter()
            .map(|column| {
                let value = record.get(column).cloned().unwrap_or_default();
                (column.clone(), value)
            })
            .collect();
        if !self.select_rows(&record_type, &identity)?.is_empty() {
            return Err(StoreError::ConstraintViolation(key));
        }

        debug!(
            "event=stage_insert module=store status=ok session={} record={}",
            self.id, key
        );
        self.track(Tracked {
            record_type,
            key,
            rowid: None,
            values: record.into_values(),
            present: true,
            inserted: true,
            modified: false,
            deleted: false,
        });
        Ok(())
    }

    fn stage_update(
        &mut self,
        record: Record,
        loaded_key: RecordKey,
        rowid: Option<i64>,
    ) -> StoreResult<()> {
        if record.key() != loaded_key {
            return Err(StoreError::IdentityChanged(loaded_key));
        }

        if let Some(&position) = self.index.get(&loaded_key) {
            let entry = &mut self.tracked[position];
            if !entry.present {
                return Err(StoreError::StaleRecord(loaded_key));
            }
            entry.values = record.into_values();
            if !entry.inserted {
                entry.modified = true;
            }
            debug!(
                "event=stage_update module=store status=ok session={} record={}",
                self.id, loaded_key
            );
            return Ok(());
        }

        let Some(rowid) = rowid else {
            return Err(StoreError::StaleRecord(loaded_key));
        };
        debug!(
            "event=stage_update module=store status=ok session={} record={}",
            self.id, loaded_key
        );
        self.track(Tracked {
            record_type: record.record_type().clone(),
            key: loaded_key,
            rowid: Some(rowid),
            values: record.into_values(),
            present: true,
            inserted: false,
            modified: true,
            deleted: false,
        });
        Ok(())
    }

    fn track(&mut self, entry: Tracked) {
        self.index.insert(entry.key.clone(), self.tracked.len());
        self.tracked.push(entry);
    }

    fn clear_tracking(&mut self) {
        self.tracked.clear();
        self.index.clear();
    }

    fn ensure_active(&self) -> StoreResult<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::RollbackOnly => Err(StoreError::TransactionInactive(self.id)),
        }
    }

    fn select_rows(
        &self,
        record_type: &RecordType,
        filter: &AttrMap,
    ) -> StoreResult<Vec<(i64, AttrMap)>> {
        let columns: Vec<&str> = record_type.columns().collect();
        let mut sql = format!(
            "SELECT rowid, {} FROM {}",
            columns
                .iter()
                .map(|column| quote_ident(column))
                .collect::<Vec<_>>()
                .join(", "),
            quote_ident(record_type.name())
        );
        if !filter.is_empty() {
            let predicates = filter
                .keys()
                .map(|column| format!("{} IS ?", quote_ident(column)))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(" WHERE ");
            sql.push_str(&predicates);
        }
        sql.push_str(" ORDER BY rowid;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(filter.values()))?;
        let mut loaded = Vec::new();
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            let mut values = AttrMap::new();
            for (offset, column) in columns.iter().enumerate() {
                values.insert(column.to_string(), row.get::<_, AttrValue>(offset + 1)?);
            }
            loaded.push((rowid, values));
        }
        Ok(loaded)
    }

    fn flush(&self) -> StoreResult<()> {
        if self.tracked.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        for entry in &self.tracked {
            let record_type = &entry.record_type;
            match (entry.rowid, entry.present) {
                (Some(rowid), true) if entry.modified || entry.inserted => {
                    let assignments = record_type
                        .columns()
                        .map(|column| format!("{} = ?", quote_ident(column)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let sql = format!(
                        "UPDATE {} SET {assignments} WHERE rowid = ?;",
                        quote_ident(record_type.name())
                    );
                    let rowid_value = AttrValue::Integer(rowid);
                    let mut params = column_values(record_type, &entry.values);
                    params.push(&rowid_value);
                    tx.execute(&sql, params_from_iter(params))?;
                }
                (Some(rowid), false) => {
                    let sql = format!(
                        "DELETE FROM {} WHERE rowid = ?1;",
                        quote_ident(record_type.name())
                    );
                    tx.execute(&sql, [rowid])?;
                }
                (None, true) => {
                    let columns: Vec<String> = record_type.columns().map(quote_ident).collect();
                    let placeholders = vec!["?"; columns.len()].join(", ");
                    let sql = format!(
                        "INSERT INTO {} ({}) VALUES ({placeholders});",
                        quote_ident(record_type.name()),
                        columns.join(", ")
                    );
                    tx.execute(
                        &sql,
                        params_from_iter(column_values(record_type, &entry.values)),
                    )?;
                }
                _ => {}
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn column_values<'a>(record_type: &'a RecordType, values: &'a AttrMap) -> Vec<&'a AttrValue> {
    record_type
        .columns()
        .map(|column| values.get(column).unwrap_or(&NULL_VALUE))
        .collect()
}

fn matches_filter(values: &AttrMap, filter: &AttrMap) -> bool {
    filter
        .iter()
        .all(|(column, expected)| {
            values
                .get(column)
                .unwrap_or(&NULL_VALUE)
                .same_as(expected)
        })
}

fn ensure_columns(record_type: &RecordType, values: &AttrMap) -> StoreResult<()> {
    match values.keys().find(|column| !record_type.has_column(column)) {
        Some(column) => Err(StoreError::UnknownColumn {
            record_type: record_type.name().to_string(),
            column: column.clone(),
        }),
        None => Ok(()),
    }
}
