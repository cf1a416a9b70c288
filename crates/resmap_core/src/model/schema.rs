//! Per-type schema descriptors.
//!
//! # Responsibility
//! - Declare which attributes a resource type has and which of them form its
//!   identity.
//! - Reject malformed declarations before any storage access happens.
//!
//! # Invariants
//! - Every valid schema has at least one identity attribute.
//! - Attribute, type and table names are lowercase SQL-safe identifiers.
//! - Attribute names are unique within one schema; `rowid` is reserved.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const RESERVED_COLUMN: &str = "rowid";

/// Role of one declared attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeRole {
    /// Part of the identity tuple; never changes after creation.
    Identity,
    /// Mutable payload ("other" attribute).
    Mutable,
}

/// One declared attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub role: AttributeRole,
}

/// Schema validation errors raised at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidName { context: String, value: String },
    ReservedAttribute { resource_type: String, name: String },
    DuplicateAttribute { resource_type: String, name: String },
    MissingIdentity(String),
    DuplicateResourceType(String),
    DuplicateTable(String),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName { context, value } => {
                write!(f, "invalid {context} name `{value}`")
            }
            Self::ReservedAttribute {
                resource_type,
                name,
            } => write!(f, "attribute `{name}` of `{resource_type}` is reserved"),
            Self::DuplicateAttribute {
                resource_type,
                name,
            } => write!(f, "attribute `{name}` declared twice on `{resource_type}`"),
            Self::MissingIdentity(resource_type) => {
                write!(f, "resource type `{resource_type}` declares no identity attribute")
            }
            Self::DuplicateResourceType(resource_type) => {
                write!(f, "resource type already registered: {resource_type}")
            }
            Self::DuplicateTable(table) => {
                write!(f, "backing table already registered: {table}")
            }
        }
    }
}

impl Error for SchemaError {}

/// Schema descriptor for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    resource_type: String,
    table: String,
    attributes: Vec<AttributeSpec>,
}

impl ResourceSchema {
    /// Starts a schema whose backing table defaults to the type name.
    pub fn builder(resource_type: impl Into<String>) -> ResourceSchemaBuilder {
        let resource_type = resource_type.into();
        ResourceSchemaBuilder {
            table: resource_type.clone(),
            resource_type,
            attributes: Vec::new(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    /// Identity attribute names in declaration order.
    pub fn identity_attributes(&self) -> impl Iterator<Item = &str> {
        self.names_with_role(AttributeRole::Identity)
    }

    /// Mutable ("other") attribute names in declaration order.
    pub fn other_attributes(&self) -> impl Iterator<Item = &str> {
        self.names_with_role(AttributeRole::Mutable)
    }

    pub fn role_of(&self, name: &str) -> Option<AttributeRole> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name == name)
            .map(|attribute| attribute.role)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.role_of(name).is_some()
    }

    /// Checks naming and identity rules.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !is_valid_identifier(&self.resource_type) {
            return Err(SchemaError::InvalidName {
                context: "resource type".to_string(),
                value: self.resource_type.clone(),
            });
        }
        if !is_valid_identifier(&self.table) {
            return Err(SchemaError::InvalidName {
                context: "table".to_string(),
                value: self.table.clone(),
            });
        }

        let mut seen = std::collections::BTreeSet::new();
        for attribute in &self.attributes {
            if !is_valid_identifier(&attribute.name) {
                return Err(SchemaError::InvalidName {
                    context: "attribute".to_string(),
                    value: attribute.name.clone(),
                });
            }
            if attribute.name == RESERVED_COLUMN {
                return Err(SchemaError::ReservedAttribute {
                    resource_type: self.resource_type.clone(),
                    name: attribute.name.clone(),
                });
            }
            if !seen.insert(attribute.name.as_str()) {
                return Err(SchemaError::DuplicateAttribute {
                    resource_type: self.resource_type.clone(),
                    name: attribute.name.clone(),
                });
            }
        }

        if self.identity_attributes().next().is_none() {
            return Err(SchemaError::MissingIdentity(self.resource_type.clone()));
        }

        Ok(())
    }

    fn names_with_role(&self, role: AttributeRole) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(move |attribute| attribute.role == role)
            .map(|attribute| attribute.name.as_str())
    }
}

/// Builder for [`ResourceSchema`].
#[derive(Debug, Clone)]
pub struct ResourceSchemaBuilder {
    resource_type: String,
    table: String,
    attributes: Vec<AttributeSpec>,
}

impl ResourceSchemaBuilder {
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn identity(self, name: impl Into<String>) -> Self {
        self.attribute(name, AttributeRole::Identity)
    }

    pub fn mutable(self, name: impl Into<String>) -> Self {
        self.attribute(name, AttributeRole::Mutable)
    }

    pub fn attribute(mut self, name: impl Into<String>, role: AttributeRole) -> Self {
        self.attributes.push(AttributeSpec {
            name: name.into(),
            role,
        });
        self
    }

    /// Finishes the builder. Validation runs at registration.
    pub fn build(self) -> ResourceSchema {
        ResourceSchema {
            resource_type: self.resource_type,
            table: self.table,
            attributes: self.attributes,
        }
    }
}

pub(crate) fn is_valid_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::{is_valid_identifier, AttributeRole, ResourceSchema, SchemaError};

    fn bridge_domain() -> ResourceSchema {
        ResourceSchema::builder("bridge_domain")
            .table("bridge_domains")
            .identity("tenant_name")
            .identity("name")
            .mutable("display_name")
            .mutable("vrf_name")
            .build()
    }

    #[test]
    fn builder_splits_identity_and_other_attributes() {
        let schema = bridge_domain();
        schema.validate().unwrap();
        assert_eq!(schema.table(), "bridge_domains");
        assert_eq!(
            schema.identity_attributes().collect::<Vec<_>>(),
            vec!["tenant_name", "name"]
        );
        assert_eq!(
            schema.other_attributes().collect::<Vec<_>>(),
            vec!["display_name", "vrf_name"]
        );
        assert_eq!(schema.role_of("vrf_name"), Some(AttributeRole::Mutable));
        assert!(!schema.is_declared("unknown"));
    }

    #[test]
    fn table_defaults_to_resource_type() {
        let schema = ResourceSchema::builder("tenant").identity("name").build();
        assert_eq!(schema.table(), "tenant");
    }

    #[test]
    fn schema_without_identity_is_rejected() {
        let schema = ResourceSchema::builder("tenant").mutable("descr").build();
        assert_eq!(
            schema.validate().unwrap_err(),
            SchemaError::MissingIdentity("tenant".to_string())
        );
    }

    #[test]
    fn duplicate_and_reserved_attributes_are_rejected() {
        let duplicate = ResourceSchema::builder("tenant")
            .identity("name")
            .mutable("name")
            .build();
        assert!(matches!(
            duplicate.validate().unwrap_err(),
            SchemaError::DuplicateAttribute { .. }
        ));

        let reserved = ResourceSchema::builder("tenant")
            .identity("name")
            .mutable("rowid")
            .build();
        assert!(matches!(
            reserved.validate().unwrap_err(),
            SchemaError::ReservedAttribute { .. }
        ));
    }

    #[test]
    fn identifier_rules() {
        assert!(is_valid_identifier("tenant_name"));
        assert!(is_valid_identifier("_private2"));
        assert!(!is_valid_identifier("2tenants"));
        assert!(!is_valid_identifier("Tenant"));
        assert!(!is_valid_identifier("name; DROP TABLE x"));
        assert!(!is_valid_identifier(""));
    }
}
