//! Resource type registry.
//!
//! # Responsibility
//! - Map resource types to backing record types and back.
//! - Validate every schema once, at construction.
//! - Install backing tables for all registered types.
//!
//! # Invariants
//! - The registry is immutable after construction.
//! - The inverse map is total over every record type the registry hands out.
//! - Resource type names and backing table names are unique.

use crate::model::resource::Resource;
use crate::model::schema::{ResourceSchema, SchemaError};
use crate::store::{install_record_type, RecordType, StoreResult};
use log::info;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Raised when a resource type was never registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownResourceType(pub String);

impl Display for UnknownResourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown resource type: {}", self.0)
    }
}

impl Error for UnknownResourceType {}

/// One registered resource type with its backing record type.
#[derive(Debug)]
pub struct RegisteredType {
    schema: ResourceSchema,
    record_type: Arc<RecordType>,
}

impl RegisteredType {
    fn new(schema: ResourceSchema) -> Self {
        let identity = schema.identity_attributes().map(str::to_string).collect();
        let payload = schema.other_attributes().map(str::to_string).collect();
        let record_type = Arc::new(RecordType::new(schema.table(), identity, payload));
        Self {
            schema,
            record_type,
        }
    }

    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.record_type
    }
}

/// Immutable mapping between resource types and backing record types.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    by_resource: BTreeMap<String, RegisteredType>,
    by_table: BTreeMap<String, String>,
}

impl ResourceRegistry {
    /// Validates and registers all schemas.
    ///
    /// # Errors
    /// - Any invalid schema, duplicate resource type or duplicate table.
    pub fn new(schemas: impl IntoIterator<Item = ResourceSchema>) -> Result<Self, SchemaError> {
        let mut registry = Self::default();
        for schema in schemas {
            schema.validate()?;
            let resource_type = schema.resource_type().to_string();
            let table = schema.table().to_string();
            if registry.by_resource.contains_key(&resource_type) {
                return Err(SchemaError::DuplicateResourceType(resource_type));
            }
            if registry.by_table.contains_key(&table) {
                return Err(SchemaError::DuplicateTable(table));
            }
            registry.by_table.insert(table, resource_type.clone());
            registry
                .by_resource
                .insert(resource_type, RegisteredType::new(schema));
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.by_resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_resource.is_empty()
    }

    /// Registered resource type names, sorted.
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.by_resource.keys().map(String::as_str)
    }

    pub fn get(&self, resource_type: &str) -> Option<&RegisteredType> {
        self.by_resource.get(resource_type)
    }

    /// Resolves a resource type name.
    pub fn require(&self, resource_type: &str) -> Result<&RegisteredType, UnknownResourceType> {
        self.get(resource_type)
            .ok_or_else(|| UnknownResourceType(resource_type.to_string()))
    }

    /// Resolves the type of a resource instance.
    pub fn require_resource(
        &self,
        resource: &Resource,
    ) -> Result<&RegisteredType, UnknownResourceType> {
        self.require(resource.resource_type())
    }

    /// Inverse lookup by backing record type name.
    pub fn for_record_type(&self, record_type: &str) -> Option<&RegisteredType> {
        self.by_table
            .get(record_type)
            .and_then(|resource_type| self.by_resource.get(resource_type))
    }

    /// Creates backing tables for every registered type.
    pub fn install(&self, conn: &Connection) -> StoreResult<()> {
        let started_at = Instant::now();
        for (resource_type, registered) in &self.by_resource {
            install_record_type(conn, resource_type, &registered.record_type)?;
        }
        info!(
            "event=registry_install module=registry status=ok types={} duration_ms={}",
            self.by_resource.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}
