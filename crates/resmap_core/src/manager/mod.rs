//! Resource manager: identity-keyed CRUD over backing records with
//! pre-commit change notification.
//!
//! # Responsibility
//! - Resolve resource types, translate attributes and stage records in the
//!   caller's session.
//! - Attach the commit dispatcher to every session it stages changes in.
//! - Expose listener registration.
//!
//! # Invariants
//! - Every operation fails fast with `UnknownResourceType` for unregistered
//!   types; store errors pass through unchanged.
//! - Mutations run inside a subtransaction of the caller's session.
//! - The dispatcher is attached at most once per session.
//! - An empty update never touches the session.

use crate::mapping::{apply, compose, extract, filter_declared, AttributeScope};
use crate::model::resource::{Resource, ResourceDecodeError, TypedResource};
use crate::model::value::AttrMap;
use crate::registry::{RegisteredType, ResourceRegistry, UnknownResourceType};
use crate::store::{PreCommitHook, Record, Session, StoreError, StoreResult};
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

mod config;
mod context;
mod dispatcher;
mod listeners;

pub use config::{ListenerFailurePolicy, ManagerConfig};
pub use context::ResourceContext;
pub use dispatcher::{CommitDispatcher, ResourceChanges};
pub use listeners::{
    ListenerEntry, ListenerError, ListenerId, UpdateListener, UpdateListenerRegistry,
};

pub type ManagerResult<T> = Result<T, ManagerError>;

/// Error surfaced by manager operations.
#[derive(Debug)]
pub enum ManagerError {
    UnknownResourceType(String),
    Store(StoreError),
    Decode(ResourceDecodeError),
}

impl Display for ManagerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownResourceType(resource_type) => {
                write!(f, "unknown resource type: {resource_type}")
            }
            Self::Store(err) => write!(f, "{err}"),
            Self::Decode(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ManagerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownResourceType(_) => None,
            Self::Store(err) => Some(err),
            Self::Decode(err) => Some(err),
        }
    }
}

impl From<UnknownResourceType> for ManagerError {
    fn from(value: UnknownResourceType) -> Self {
        Self::UnknownResourceType(value.0)
    }
}

impl From<StoreError> for ManagerError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ResourceDecodeError> for ManagerError {
    fn from(value: ResourceDecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Entry point for resource persistence.
///
/// ```no_run
/// use resmap_core::db::open_db_in_memory;
/// use resmap_core::{Resource, ResourceContext, ResourceManager, ResourceRegistry, ResourceSchema};
/// use std::sync::Arc;
///
/// let conn = open_db_in_memory()?;
/// let registry = ResourceRegistry::new([ResourceSchema::builder("tenant")
///     .identity("name")
///     .mutable("descr")
///     .build()])?;
/// registry.install(&conn)?;
/// let manager = ResourceManager::with_defaults(Arc::new(registry));
///
/// let mut ctx = ResourceContext::from_connection(&conn);
/// let tenant = Resource::of_type("tenant").with("name", "common");
/// manager.create(&mut ctx, &tenant, false)?;
/// ctx.commit()?;
/// assert!(manager.get(&ctx, &tenant)?.is_some());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ResourceManager {
    registry: Arc<ResourceRegistry>,
    listeners: Arc<UpdateListenerRegistry>,
    dispatcher: Arc<CommitDispatcher>,
    config: ManagerConfig,
}

impl ResourceManager {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        listeners: Arc<UpdateListenerRegistry>,
        config: ManagerConfig,
    ) -> Self {
        let dispatcher = Arc::new(CommitDispatcher::new(
            registry.clone(),
            listeners.clone(),
            config.listener_failure,
        ));
        Self {
            registry,
            listeners,
            dispatcher,
            config,
        }
    }

    /// Manager with its own listener registry and default config.
    pub fn with_defaults(registry: Arc<ResourceRegistry>) -> Self {
        Self::new(
            registry,
            Arc::new(UpdateListenerRegistry::new()),
            ManagerConfig::default(),
        )
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn listeners(&self) -> &Arc<UpdateListenerRegistry> {
        &self.listeners
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Persists `resource`.
    ///
    /// With `overwrite`, an existing record with the same identity gets its
    /// other attributes replaced. Without it, an existing identity fails with
    /// the store's `ConstraintViolation`.
    pub fn create(
        &self,
        context: &mut ResourceContext<'_>,
        resource: &Resource,
        overwrite: bool,
    ) -> ManagerResult<()> {
        let registered = self.registry.require_resource(resource)?;
        let schema = registered.schema();

        context
            .db_session_mut()
            .subtransaction(|session| -> ManagerResult<()> {
                let existing = if overwrite {
                    query_by_identity(session, registered, resource)?
                } else {
                    None
                };
                let overwritten = existing.is_some();
                let record = match existing {
                    Some(mut record) => {
                        apply(&mut record, &extract(schema, resource, AttributeScope::Other));
                        record
                    }
                    None => Record::new(
                        registered.record_type().clone(),
                        extract(schema, resource, AttributeScope::All),
                    ),
                };
                session.add(record)?;
                self.add_commit_hook(session);
                debug!(
                    "event=resource_create module=manager status=ok session={} resource_type={} overwrite={} overwritten={}",
                    session.id(),
                    schema.resource_type(),
                    overwrite,
                    overwritten
                );
                Ok(())
            })
    }

    /// Applies `changes` to the record identified by `resource`.
    ///
    /// Only other-attribute keys are applied; identity and unknown keys are
    /// ignored. Missing records are left alone.
    pub fn update(
        &self,
        context: &mut ResourceContext<'_>,
        resource: &Resource,
        changes: &AttrMap,
    ) -> ManagerResult<()> {
        let registered = self.registry.require_resource(resource)?;
        if changes.is_empty() {
            return Ok(());
        }
        let schema = registered.schema();

        context
            .db_session_mut()
            .subtransaction(|session| -> ManagerResult<()> {
                let Some(mut record) = query_by_identity(session, registered, resource)? else {
                    debug!(
                        "event=resource_update module=manager status=skipped reason=not_found session={} resource_type={}",
                        session.id(),
                        schema.resource_type()
                    );
                    return Ok(());
                };
                let filtered = filter_declared(schema, changes, AttributeScope::Other);
                if filtered.is_empty() {
                    return Ok(());
                }
                apply(&mut record, &filtered);
                session.add(record)?;
                self.add_commit_hook(session);
                debug!(
                    "event=resource_update module=manager status=ok session={} resource_type={} attributes={}",
                    session.id(),
                    schema.resource_type(),
                    filtered.len()
                );
                Ok(())
            })
    }

    /// Deletes the record identified by `resource`; missing records are a no-op.
    pub fn delete(
        &self,
        context: &mut ResourceContext<'_>,
        resource: &Resource,
    ) -> ManagerResult<()> {
        let registered = self.registry.require_resource(resource)?;
        let schema = registered.schema();

        context
            .db_session_mut()
            .subtransaction(|session| -> ManagerResult<()> {
                let Some(record) = query_by_identity(session, registered, resource)? else {
                    return Ok(());
                };
                session.delete(&record)?;
                self.add_commit_hook(session);
                debug!(
                    "event=resource_delete module=manager status=ok session={} resource_type={}",
                    session.id(),
                    schema.resource_type()
                );
                Ok(())
            })
    }

    /// Loads the stored state of the resource identified by `resource`.
    pub fn get(
        &self,
        context: &ResourceContext<'_>,
        resource: &Resource,
    ) -> ManagerResult<Option<Resource>> {
        let registered = self.registry.require_resource(resource)?;
        let record = query_by_identity(context.db_session(), registered, resource)?;
        Ok(record.map(|record| compose(registered.schema(), record.values())))
    }

    /// Finds resources of `resource_type` whose attributes equal `criteria`.
    ///
    /// Undeclared criteria keys are ignored. Empty criteria match everything.
    pub fn find(
        &self,
        context: &ResourceContext<'_>,
        resource_type: &str,
        criteria: &AttrMap,
    ) -> ManagerResult<Vec<Resource>> {
        let registered = self.registry.require(resource_type)?;
        let schema = registered.schema();
        let filter = filter_declared(schema, criteria, AttributeScope::All);
        let records = context
            .db_session()
            .query(registered.record_type(), &filter)?;
        Ok(records
            .iter()
            .map(|record| compose(schema, record.values()))
            .collect())
    }

    /// Typed variant of [`ResourceManager::get`].
    pub fn get_typed<T: TypedResource>(
        &self,
        context: &ResourceContext<'_>,
        resource: &T,
    ) -> ManagerResult<Option<T>> {
        match self.get(context, &resource.to_resource())? {
            Some(found) => Ok(Some(T::from_resource(&found)?)),
            None => Ok(None),
        }
    }

    /// Typed variant of [`ResourceManager::find`].
    pub fn find_typed<T: TypedResource>(
        &self,
        context: &ResourceContext<'_>,
        criteria: &AttrMap,
    ) -> ManagerResult<Vec<T>> {
        self.find(context, T::schema().resource_type(), criteria)?
            .iter()
            .map(|found| T::from_resource(found).map_err(ManagerError::from))
            .collect()
    }

    /// Registers a closure called before each commit with added, updated and
    /// deleted resources.
    pub fn register_update_listener<F>(&self, name: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&Session<'_>, &[Resource], &[Resource], &[Resource]) -> Result<(), ListenerError>
            + Send
            + Sync
            + 'static,
    {
        self.listeners.register_fn(name, callback)
    }

    pub fn register_listener<L>(&self, listener: L) -> ListenerId
    where
        L: UpdateListener + 'static,
    {
        self.listeners.register(listener)
    }

    /// Removes a listener; it receives no notification from any commit that
    /// fires after this returns.
    pub fn unregister_update_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    fn add_commit_hook(&self, session: &mut Session<'_>) {
        if !session.contains_hook(self.dispatcher.hook_id()) {
            session.listen(self.dispatcher.clone());
        }
    }
}

fn query_by_identity(
    session: &Session<'_>,
    registered: &RegisteredType,
    resource: &Resource,
) -> StoreResult<Option<Record>> {
    let identity = extract(registered.schema(), resource, AttributeScope::Identity);
    session.query_first(registered.record_type(), &identity)
}

#[cfg(test)]
mod tests {
    use super::{ManagerError, ResourceContext, ResourceManager};
    use crate::attrs;
    use crate::db::open_db_in_memory;
    use crate::model::resource::Resource;
    use crate::model::schema::ResourceSchema;
    use crate::registry::ResourceRegistry;
    use std::sync::Arc;

    fn manager() -> ResourceManager {
        let registry = ResourceRegistry::new([ResourceSchema::builder("tenant")
            .identity("name")
            .mutable("descr")
            .build()])
        .unwrap();
        ResourceManager::with_defaults(Arc::new(registry))
    }

    #[test]
    fn unknown_type_fails_before_touching_the_session() {
        let conn = open_db_in_memory().unwrap();
        let manager = manager();
        let mut ctx = ResourceContext::from_connection(&conn);
        let vrf = Resource::of_type("vrf").with("name", "v1");

        for result in [
            manager.create(&mut ctx, &vrf, false),
            manager.update(&mut ctx, &vrf, &attrs! { "descr" => "x" }),
            manager.delete(&mut ctx, &vrf),
        ] {
            assert!(matches!(result, Err(ManagerError::UnknownResourceType(ref name)) if name == "vrf"));
        }
        assert!(matches!(
            manager.get(&ctx, &vrf),
            Err(ManagerError::UnknownResourceType(_))
        ));
        assert!(matches!(
            manager.find(&ctx, "vrf", &attrs! {}),
            Err(ManagerError::UnknownResourceType(_))
        ));
        assert!(ctx.db_session().is_active());
    }

    #[test]
    fn empty_update_with_unknown_type_still_fails() {
        let conn = open_db_in_memory().unwrap();
        let manager = manager();
        let mut ctx = ResourceContext::from_connection(&conn);
        let result = manager.update(&mut ctx, &Resource::of_type("vrf"), &attrs! {});
        assert!(matches!(result, Err(ManagerError::UnknownResourceType(_))));
    }
}
