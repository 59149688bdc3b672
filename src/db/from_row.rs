//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors.
///
/// This provides graceful error handling instead of panicking when the
/// database contains invalid enum values (from corruption, migration
/// errors, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const REFUND_ATTEMPT_COLS: &str = "id, gateway, gateway_transaction_ref, gateway_refund_ref, refund_amount_minor, original_amount_minor, settled_amount_minor, currency, status, initiated_by, reason, admin_notes, error_code, error_message, local_transaction_id, initiated_at, processed_at, completed_at";

/// Same columns prefixed for queries that join the transactions table.
pub const REFUND_ATTEMPT_COLS_PREFIXED: &str = "r.id, r.gateway, r.gateway_transaction_ref, r.gateway_refund_ref, r.refund_amount_minor, r.original_amount_minor, r.settled_amount_minor, r.currency, r.status, r.initiated_by, r.reason, r.admin_notes, r.error_code, r.error_message, r.local_transaction_id, r.initiated_at, r.processed_at, r.completed_at";

pub const TRANSACTION_COLS: &str =
    "id, gateway, provider_ref, amount_minor, currency, customer_email, created_at";

// ============ FromRow Implementations ============

impl FromRow for RefundRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RefundRecord {
            id: row.get(0)?,
            gateway: parse_enum(row, 1, "gateway")?,
            gateway_transaction_ref: row.get(2)?,
            gateway_refund_ref: row.get(3)?,
            refund_amount_minor: row.get(4)?,
            original_amount_minor: row.get(5)?,
            settled_amount_minor: row.get(6)?,
            currency: row.get(7)?,
            status: parse_enum(row, 8, "status")?,
            initiated_by: row.get(9)?,
            reason: row.get(10)?,
            admin_notes: row.get(11)?,
            error_code: row.get(12)?,
            error_message: row.get(13)?,
            local_transaction_id: row.get(14)?,
            initiated_at: row.get(15)?,
            processed_at: row.get(16)?,
            completed_at: row.get(17)?,
        })
    }
}

impl FromRow for LocalTransaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LocalTransaction {
            id: row.get(0)?,
            gateway: parse_enum(row, 1, "gateway")?,
            provider_ref: row.get(2)?,
            amount_minor: row.get(3)?,
            currency: row.get(4)?,
            customer_email: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}
