//! Resource-level domain model.
//!
//! # Responsibility
//! - Define attribute values, schema descriptors and resource value objects.
//! - Keep the model free of storage details.
//!
//! # Invariants
//! - Every resource type is described by exactly one `ResourceSchema`.
//! - Identity attributes are declared, never inferred.

pub mod resource;
pub mod schema;
pub mod value;
