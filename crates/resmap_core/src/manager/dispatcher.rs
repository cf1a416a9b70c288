//! Pre-commit dispatcher turning record change sets into resource
//! notifications.
//!
//! # Invariants
//! - Listeners run at most once per commit, in registration order.
//! - Records of types unknown to the registry are skipped.
//! - No listener runs when no recognized record changed.
//! - Listener errors are never swallowed.

use crate::manager::config::ListenerFailurePolicy;
use crate::manager::listeners::UpdateListenerRegistry;
use crate::mapping::compose;
use crate::model::resource::Resource;
use crate::registry::ResourceRegistry;
use crate::store::{ChangeSet, HookError, HookId, PreCommitHook, Record, Session};
use log::{debug, warn};
use std::sync::Arc;

/// Resource-level view of one change set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceChanges {
    pub added: Vec<Resource>,
    pub updated: Vec<Resource>,
    pub deleted: Vec<Resource>,
}

impl ResourceChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Hook attached to every session the manager stages changes in.
pub struct CommitDispatcher {
    id: HookId,
    registry: Arc<ResourceRegistry>,
    listeners: Arc<UpdateListenerRegistry>,
    failure_policy: ListenerFailurePolicy,
}

impl CommitDispatcher {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        listeners: Arc<UpdateListenerRegistry>,
        failure_policy: ListenerFailurePolicy,
    ) -> Self {
        Self {
            id: HookId::new(),
            registry,
            listeners,
            failure_policy,
        }
    }

    /// Translates recognized records into resources.
    pub fn translate(&self, changes: &ChangeSet) -> ResourceChanges {
        ResourceChanges {
            added: self.compose_all(&changes.new),
            updated: self.compose_all(&changes.dirty),
            deleted: self.compose_all(&changes.deleted),
        }
    }

    fn compose_all(&self, records: &[Record]) -> Vec<Resource> {
        records
            .iter()
            .filter_map(|record| {
                self.registry
                    .for_record_type(record.record_type().name())
                    .map(|registered| compose(registered.schema(), record.values()))
            })
            .collect()
    }
}

impl PreCommitHook for CommitDispatcher {
    fn hook_id(&self) -> HookId {
        self.id
    }

    fn before_commit(&self, session: &Session<'_>, changes: &ChangeSet) -> Result<(), HookError> {
        let resources = self.translate(changes);
        if resources.is_empty() {
            return Ok(());
        }

        for (listener_id, listener) in self.listeners.snapshot() {
            debug!(
                "event=pre_commit_hook module=dispatcher status=start session={} listener={} name={} added={} updated={} deleted={}",
                session.id(),
                listener_id,
                listener.name(),
                resources.added.len(),
                resources.updated.len(),
                resources.deleted.len()
            );
            if let Err(err) = listener.on_update(
                session,
                &resources.added,
                &resources.updated,
                &resources.deleted,
            ) {
                warn!(
                    "event=listener_failed module=dispatcher status=error session={} listener={} name={} policy={:?} error={}",
                    session.id(),
                    listener_id,
                    listener.name(),
                    self.failure_policy,
                    err
                );
                let message = format!("listener `{}` failed: {}", listener.name(), err);
                return Err(HookError::new(self.failure_policy.into(), message).with_source(err));
            }
        }
        Ok(())
    }
}
