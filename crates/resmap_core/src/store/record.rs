//! Backing record types and record values.
//!
//! # Responsibility
//! - Describe one backing table: its name, identity columns and payload
//!   columns.
//! - Carry one row's values plus whether it came from storage.
//!
//! # Invariants
//! - A `RecordKey` is derived from identity column values only.
//! - Attached records remember the key they were loaded under.

use crate::model::value::{AttrMap, AttrValue, ValueKey};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Column layout of one backing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    name: String,
    identity_columns: Vec<String>,
    payload_columns: Vec<String>,
}

impl RecordType {
    pub fn new(
        name: impl Into<String>,
        identity_columns: Vec<String>,
        payload_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            identity_columns,
            payload_columns,
        }
    }

    /// Backing table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity_columns(&self) -> &[String] {
        &self.identity_columns
    }

    pub fn payload_columns(&self) -> &[String] {
        &self.payload_columns
    }

    /// Identity columns followed by payload columns.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.identity_columns
            .iter()
            .chain(self.payload_columns.iter())
            .map(String::as_str)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().any(|candidate| candidate == column)
    }

    /// Builds the identity key for a value set; missing columns read as null.
    pub fn key_for(&self, values: &AttrMap) -> RecordKey {
        let identity = self
            .identity_columns
            .iter()
            .map(|column| {
                let value = values.get(column).unwrap_or(&AttrValue::Null);
                (column.clone(), ValueKey::from(value))
            })
            .collect();
        RecordKey {
            record_type: self.name.clone(),
            identity,
        }
    }
}

/// Identity of one backing record within its table.
///
/// Two keys are equal when every identity value is equal under SQLite `IS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    record_type: String,
    identity: Vec<(String, ValueKey)>,
}

impl RecordKey {
    pub fn record_type(&self) -> &str {
        &self.record_type
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.record_type)?;
        for (position, (column, value)) in self.identity.iter().enumerate() {
            if position > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{column}=")?;
            match value {
                ValueKey::Null => write!(f, "null")?,
                ValueKey::Integer(value) => write!(f, "{value}")?,
                ValueKey::Real(bits) => write!(f, "{}", f64::from_bits(*bits))?,
                ValueKey::Text(value) => write!(f, "{value:?}")?,
                ValueKey::Blob(bytes) => {
                    write!(f, "x'")?;
                    for byte in bytes {
                        write!(f, "{byte:02x}")?;
                    }
                    write!(f, "'")?;
                }
            }
        }
        write!(f, ")")
    }
}

/// Where a record value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordOrigin {
    /// Built by the caller; not yet known to any session.
    Transient,
    /// Loaded from a persisted row.
    Persisted { rowid: i64, key: RecordKey },
    /// Staged for insertion in the session that returned it.
    Pending { key: RecordKey },
}

/// One backing record value.
#[derive(Debug, Clone)]
pub struct Record {
    record_type: Arc<RecordType>,
    values: AttrMap,
    origin: RecordOrigin,
}

impl Record {
    /// Builds a transient record; staging it with `Session::add` inserts it.
    pub fn new(record_type: Arc<RecordType>, values: AttrMap) -> Self {
        Self {
            record_type,
            values,
            origin: RecordOrigin::Transient,
        }
    }

    pub(crate) fn attached(
        record_type: Arc<RecordType>,
        values: AttrMap,
        origin: RecordOrigin,
    ) -> Self {
        Self {
            record_type,
            values,
            origin,
        }
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.record_type
    }

    pub fn values(&self) -> &AttrMap {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&AttrValue> {
        self.values.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: AttrValue) {
        self.values.insert(column.into(), value);
    }

    /// Whether this value was loaded from (or staged in) a session.
    pub fn is_attached(&self) -> bool {
        !matches!(self.origin, RecordOrigin::Transient)
    }

    /// Key computed from the current identity values.
    pub fn key(&self) -> RecordKey {
        self.record_type.key_for(&self.values)
    }

    pub(crate) fn origin(&self) -> &RecordOrigin {
        &self.origin
    }

    pub(crate) fn into_values(self) -> AttrMap {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, RecordType};
    use crate::attrs;
    use std::sync::Arc;

    fn tenant_type() -> Arc<RecordType> {
        Arc::new(RecordType::new(
            "tenants",
            vec!["name".to_string()],
            vec!["descr".to_string()],
        ))
    }

    #[test]
    fn key_ignores_payload_columns() {
        let record_type = tenant_type();
        let first = record_type.key_for(&attrs! { "name" => "t1", "descr" => "a" });
        let second = record_type.key_for(&attrs! { "name" => "t1", "descr" => "b" });
        assert_eq!(first, second);
        assert_eq!(first.to_string(), "tenants(name=\"t1\")");
    }

    #[test]
    fn missing_identity_reads_as_null() {
        let record_type = tenant_type();
        let key = record_type.key_for(&attrs! {});
        assert_eq!(key.to_string(), "tenants(name=null)");
    }

    #[test]
    fn blob_identities_of_equal_length_stay_distinct() {
        let record_type = Arc::new(RecordType::new(
            "blobbed",
            vec!["key".to_string()],
            Vec::new(),
        ));
        let first = record_type.key_for(&attrs! { "key" => vec![1u8, 2] });
        let second = record_type.key_for(&attrs! { "key" => vec![3u8, 4] });
        assert_ne!(first, second);
        assert_eq!(first.to_string(), "blobbed(key=x'0102')");
    }

    #[test]
    fn whole_reals_share_the_integer_key() {
        let record_type = Arc::new(RecordType::new(
            "ports",
            vec!["number".to_string()],
            Vec::new(),
        ));
        assert_eq!(
            record_type.key_for(&attrs! { "number" => 443 }),
            record_type.key_for(&attrs! { "number" => 443.0 })
        );
        assert_ne!(
            record_type.key_for(&attrs! { "number" => 443 }),
            record_type.key_for(&attrs! { "number" => "443" })
        );
    }

    #[test]
    fn new_records_are_transient() {
        let record = Record::new(tenant_type(), attrs! { "name" => "t1" });
        assert!(!record.is_attached());
        assert!(record.record_type().has_column("descr"));
        assert!(!record.record_type().has_column("rowid"));
    }
}
