//! Resource value objects.
//!
//! # Responsibility
//! - Carry a resource type name and its attribute values between callers,
//!   the manager and listeners.
//! - Bridge application structs to the dynamic shape via `TypedResource`.
//!
//! # Invariants
//! - A resource's type name never changes after construction.
//! - Two resources of one type with equal identity values denote the same
//!   logical entity.

use crate::model::schema::ResourceSchema;
use crate::model::value::{AttrMap, AttrValue};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Dynamic resource value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    resource_type: String,
    attributes: AttrMap,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, attributes: AttrMap) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes,
        }
    }

    /// Starts an empty resource of the given type.
    pub fn of_type(resource_type: impl Into<String>) -> Self {
        Self::new(resource_type, AttrMap::new())
    }

    /// Sets one attribute and returns `self` for chaining.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn attributes(&self) -> &AttrMap {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Returns the attribute value, reading missing attributes as `Null`.
    pub fn value_or_null(&self, name: &str) -> AttrValue {
        self.attributes.get(name).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn into_attributes(self) -> AttrMap {
        self.attributes
    }
}

/// Typed resource conversion failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDecodeError {
    WrongType { expected: String, actual: String },
    MissingAttribute(String),
    InvalidAttribute { name: String, message: String },
}

impl ResourceDecodeError {
    pub fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl Display for ResourceDecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongType { expected, actual } => {
                write!(f, "expected resource type `{expected}`, got `{actual}`")
            }
            Self::MissingAttribute(name) => write!(f, "missing attribute `{name}`"),
            Self::InvalidAttribute { name, message } => {
                write!(f, "invalid attribute `{name}`: {message}")
            }
        }
    }
}

impl Error for ResourceDecodeError {}

/// Application struct with a fixed resource schema.
///
/// Implementors usually keep the schema in a `once_cell::sync::Lazy` static.
pub trait TypedResource: Sized {
    fn schema() -> &'static ResourceSchema;

    fn to_resource(&self) -> Resource;

    fn from_resource(resource: &Resource) -> Result<Self, ResourceDecodeError>;

    /// Checks the resource type name before decoding.
    fn ensure_type(resource: &Resource) -> Result<(), ResourceDecodeError> {
        let expected = Self::schema().resource_type();
        if resource.resource_type() != expected {
            return Err(ResourceDecodeError::WrongType {
                expected: expected.to_string(),
                actual: resource.resource_type().to_string(),
            });
        }
        Ok(())
    }
}

/// Reads a required text attribute.
pub fn required_text(resource: &Resource, name: &str) -> Result<String, ResourceDecodeError> {
    match resource.get(name) {
        Some(AttrValue::Text(value)) => Ok(value.clone()),
        Some(AttrValue::Null) | None => Err(ResourceDecodeError::MissingAttribute(name.to_string())),
        Some(other) => Err(ResourceDecodeError::invalid(
            name,
            format!("expected text, got {other}"),
        )),
    }
}

/// Reads an optional text attribute; `Null` and absence both map to `None`.
pub fn optional_text(
    resource: &Resource,
    name: &str,
) -> Result<Option<String>, ResourceDecodeError> {
    match resource.get(name) {
        Some(AttrValue::Text(value)) => Ok(Some(value.clone())),
        Some(AttrValue::Null) | None => Ok(None),
        Some(other) => Err(ResourceDecodeError::invalid(
            name,
            format!("expected text, got {other}"),
        )),
    }
}

/// Reads an optional boolean stored as `0`/`1`.
pub fn optional_bool(
    resource: &Resource,
    name: &str,
) -> Result<Option<bool>, ResourceDecodeError> {
    match resource.get(name) {
        Some(AttrValue::Null) | None => Ok(None),
        Some(value) => value.as_bool().map(Some).ok_or_else(|| {
            ResourceDecodeError::invalid(name, format!("expected boolean, got {value}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{optional_bool, optional_text, required_text, Resource, ResourceDecodeError};
    use crate::model::value::AttrValue;

    #[test]
    fn with_and_value_or_null() {
        let resource = Resource::of_type("tenant").with("name", "common");
        assert_eq!(resource.resource_type(), "tenant");
        assert_eq!(resource.get("name"), Some(&AttrValue::from("common")));
        assert_eq!(resource.value_or_null("descr"), AttrValue::Null);
    }

    #[test]
    fn attribute_readers_distinguish_missing_and_invalid() {
        let resource = Resource::of_type("tenant")
            .with("name", "common")
            .with("flag", 3)
            .with("descr", AttrValue::Null);

        assert_eq!(required_text(&resource, "name").unwrap(), "common");
        assert_eq!(
            required_text(&resource, "descr").unwrap_err(),
            ResourceDecodeError::MissingAttribute("descr".to_string())
        );
        assert_eq!(optional_text(&resource, "descr").unwrap(), None);
        assert!(matches!(
            optional_bool(&resource, "flag").unwrap_err(),
            ResourceDecodeError::InvalidAttribute { .. }
        ));
    }
}
