//! Update listener registry.
//!
//! # Responsibility
//! - Hold update listeners in registration order.
//! - Hand out stable ids so closures can be unregistered.
//!
//! # Invariants
//! - Registration and removal are serialized by an `RwLock`.
//! - Dispatch works on a snapshot taken when it starts; a listener removed
//!   before that point is never called by it.

use crate::model::resource::Resource;
use crate::store::Session;
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Error returned by a listener; aborts the commit that triggered it.
#[derive(Debug)]
pub struct ListenerError {
    message: String,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ListenerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ListenerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn Error + 'static))
    }
}

/// Receives the aggregated resource changes of one committing session.
pub trait UpdateListener: Send + Sync {
    fn name(&self) -> &str {
        "anonymous"
    }

    fn on_update(
        &self,
        session: &Session<'_>,
        added: &[Resource],
        updated: &[Resource],
        deleted: &[Resource],
    ) -> Result<(), ListenerError>;
}

impl<L> UpdateListener for Arc<L>
where
    L: UpdateListener + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn on_update(
        &self,
        session: &Session<'_>,
        added: &[Resource],
        updated: &[Resource],
        deleted: &[Resource],
    ) -> Result<(), ListenerError> {
        (**self).on_update(session, added, updated, deleted)
    }
}

struct FnListener<F> {
    name: String,
    callback: F,
}

impl<F> UpdateListener for FnListener<F>
where
    F: Fn(&Session<'_>, &[Resource], &[Resource], &[Resource]) -> Result<(), ListenerError>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_update(
        &self,
        session: &Session<'_>,
        added: &[Resource],
        updated: &[Resource],
        deleted: &[Resource],
    ) -> Result<(), ListenerError> {
        (self.callback)(session, added, updated, deleted)
    }
}

/// Handle returned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl Display for ListenerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Registered listener with its id.
pub type ListenerEntry = (ListenerId, Arc<dyn UpdateListener>);

/// Process-wide listener list with explicit construction.
#[derive(Default)]
pub struct UpdateListenerRegistry {
    entries: RwLock<Vec<ListenerEntry>>,
    next_id: AtomicU64,
}

impl UpdateListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener; it runs after every listener registered before it.
    pub fn register<L>(&self, listener: L) -> ListenerId
    where
        L: UpdateListener + 'static,
    {
        self.register_arc(Arc::new(listener))
    }

    /// Appends a closure listener.
    pub fn register_fn<F>(&self, name: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&Session<'_>, &[Resource], &[Resource], &[Resource]) -> Result<(), ListenerError>
            + Send
            + Sync
            + 'static,
    {
        self.register(FnListener {
            name: name.into(),
            callback,
        })
    }

    pub fn register_arc(&self, listener: Arc<dyn UpdateListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(
            "event=listener_register module=listeners status=ok listener={} name={}",
            id,
            listener.name()
        );
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Removes a listener; returns whether it was registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(candidate, _)| *candidate != id);
        let removed = entries.len() != before;
        debug!(
            "event=listener_unregister module=listeners status={} listener={}",
            if removed { "ok" } else { "not_found" },
            id
        );
        removed
    }

    /// Listeners in registration order at this instant.
    pub fn snapshot(&self) -> Vec<ListenerEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
