//! Identity-keyed resource persistence for resmap.
//! This crate maps typed resources onto SQLite-backed records and notifies
//! listeners of every change before it commits.

pub mod db;
pub mod logging;
pub mod manager;
pub mod mapping;
pub mod model;
pub mod registry;
pub mod store;

pub use logging::{
    default_log_level, init_logging, init_logging_with, logging_status, LoggingConfig, LoggingError,
};
pub use manager::{
    CommitDispatcher, ListenerError, ListenerFailurePolicy, ListenerId, ManagerConfig,
    ManagerError, ManagerResult, ResourceChanges, ResourceContext, ResourceManager,
    UpdateListener, UpdateListenerRegistry,
};
pub use mapping::AttributeScope;
pub use model::resource::{Resource, ResourceDecodeError, TypedResource};
pub use model::schema::{AttributeRole, AttributeSpec, ResourceSchema, SchemaError};
pub use model::value::{AttrMap, AttrValue};
pub use registry::{RegisteredType, ResourceRegistry, UnknownResourceType};
pub use store::{Session, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
