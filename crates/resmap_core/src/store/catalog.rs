//! Backing table installation.
//!
//! # Responsibility
//! - Create backing tables for record types with a unique identity index.
//! - Record each table's column layout in `resource_catalog`.
//!
//! # Invariants
//! - An installed layout is never altered; a differing layout is an error.
//! - Table and column names reaching SQL have passed schema validation.

use super::record::RecordType;
use super::{StoreError, StoreResult};
use log::info;
use rusqlite::{params, Connection, OptionalExtension};

/// Creates the backing table for `record_type` if needed and registers its
/// layout in the catalog.
///
/// Installing the same layout twice is a no-op.
pub fn install_record_type(
    conn: &Connection,
    resource_type: &str,
    record_type: &RecordType,
) -> StoreResult<()> {
    let identity_json = encode_columns(record_type, record_type.identity_columns())?;
    let payload_json = encode_columns(record_type, record_type.payload_columns())?;

    let tx = conn.unchecked_transaction()?;
    let existing = tx
        .query_row(
            "SELECT resource_type, identity_columns, payload_columns
             FROM resource_catalog
             WHERE table_name = ?1;",
            [record_type.name()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    match existing {
        Some((stored_type, stored_identity, stored_payload)) => {
            if stored_type != resource_type {
                return Err(mismatch(
                    record_type,
                    format!("registered for `{stored_type}`, not `{resource_type}`"),
                ));
            }
            if stored_identity != identity_json {
                return Err(mismatch(
                    record_type,
                    format!("identity columns {stored_identity} != {identity_json}"),
                ));
            }
            if stored_payload != payload_json {
                return Err(mismatch(
                    record_type,
                    format!("payload columns {stored_payload} != {payload_json}"),
                ));
            }
        }
        None => {
            tx.execute_batch(&create_table_sql(record_type))?;
            tx.execute(
                "INSERT INTO resource_catalog (
                    table_name,
                    resource_type,
                    identity_columns,
                    payload_columns
                ) VALUES (?1, ?2, ?3, ?4);",
                params![record_type.name(), resource_type, identity_json, payload_json],
            )?;
            info!(
                "event=table_install module=store status=ok table={} resource_type={}",
                record_type.name(),
                resource_type
            );
        }
    }

    tx.commit()?;
    Ok(())
}

fn create_table_sql(record_type: &RecordType) -> String {
    let columns = record_type
        .columns()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ");
    let identity = record_type
        .identity_columns()
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({columns}, UNIQUE ({identity}));",
        quote_ident(record_type.name())
    )
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

fn encode_columns(record_type: &RecordType, columns: &[String]) -> StoreResult<String> {
    serde_json::to_string(columns)
        .map_err(|err| mismatch(record_type, format!("failed to encode column list: {err}")))
}

fn mismatch(record_type: &RecordType, detail: String) -> StoreError {
    StoreError::SchemaMismatch {
        table: record_type.name().to_string(),
        detail,
    }
}
