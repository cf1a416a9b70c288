//! Attribute translation between resources and backing records.
//!
//! # Responsibility
//! - Read declared attributes off a resource by scope.
//! - Write attribute values onto backing records.
//! - Compose resources from stored attribute sets.
//!
//! # Invariants
//! - Only declared attribute names are read or composed.
//! - Missing attributes read as `Null`; translation never fails.

use crate::model::resource::Resource;
use crate::model::schema::{AttributeRole, ResourceSchema};
use crate::model::value::AttrMap;
use crate::store::Record;

/// Which declared attributes to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeScope {
    Identity,
    Other,
    All,
}

impl AttributeScope {
    fn includes(self, role: AttributeRole) -> bool {
        match self {
            Self::Identity => role == AttributeRole::Identity,
            Self::Other => role == AttributeRole::Mutable,
            Self::All => true,
        }
    }
}

/// Reads the attributes declared for `scope` from `resource`.
pub fn extract(schema: &ResourceSchema, resource: &Resource, scope: AttributeScope) -> AttrMap {
    schema
        .attributes()
        .iter()
        .filter(|attribute| scope.includes(attribute.role))
        .map(|attribute| {
            (
                attribute.name.clone(),
                resource.value_or_null(&attribute.name),
            )
        })
        .collect()
}

/// Writes `attrs` onto `record` in place. Callers filter keys beforehand.
pub fn apply(record: &mut Record, attrs: &AttrMap) {
    for (name, value) in attrs {
        record.set(name.clone(), value.clone());
    }
}

/// Builds a resource from `attrs`, keeping declared names only.
pub fn compose(schema: &ResourceSchema, attrs: &AttrMap) -> Resource {
    let attributes = schema
        .attributes()
        .iter()
        .map(|attribute| {
            let value = attrs.get(&attribute.name).cloned().unwrap_or_default();
            (attribute.name.clone(), value)
        })
        .collect();
    Resource::new(schema.resource_type(), attributes)
}

/// Keeps only entries whose key is declared for `scope`.
pub fn filter_declared(schema: &ResourceSchema, attrs: &AttrMap, scope: AttributeScope) -> AttrMap {
    attrs
        .iter()
        .filter(|(name, _)| {
            schema
                .role_of(name)
                .is_some_and(|role| scope.includes(role))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
