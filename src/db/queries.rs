use chrono::Utc;
use rusqlite::{params, types::Value, Connection};

use crate::error::{AppError, Result, msg};
use crate::gateways::Gateway;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, REFUND_ATTEMPT_COLS, REFUND_ATTEMPT_COLS_PREFIXED, TRANSACTION_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Refund Ledger ============

/// Open a new attempt row in the ledger.
///
/// Runs the cumulative-amount check and the insert inside one IMMEDIATE
/// transaction: the write lock is taken before the sum is read, so two
/// admins racing on the same transaction ref are serialized and the
/// second sees the first's reservation. This is the authoritative
/// double-refund guard.
pub fn create_attempt(conn: &mut Connection, input: &CreateRefundAttempt) -> Result<RefundRecord> {
    if input.refund_amount_minor <= 0 {
        return Err(AppError::BadRequest(msg::AMOUNT_NOT_POSITIVE.into()));
    }

    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    // Attempts still in flight reserve their amount; see
    // RefundStatus::counts_toward_cap for which statuses are excluded.
    let already_refunded: i64 = tx.query_row(
        "SELECT COALESCE(SUM(refund_amount_minor), 0) FROM refund_attempts
         WHERE gateway = ?1 AND gateway_transaction_ref = ?2
           AND status NOT IN ('failed', 'cancelled')",
        params![input.gateway.as_str(), input.gateway_transaction_ref],
        |row| row.get(0),
    )?;

    if already_refunded + input.refund_amount_minor > input.original_amount_minor {
        return Err(AppError::OverRefund(format!(
            "{} of {} minor units already refunded or reserved for {}; requested {} more",
            already_refunded,
            input.original_amount_minor,
            input.gateway_transaction_ref,
            input.refund_amount_minor
        )));
    }

    let id = EntityType::RefundAttempt.gen_id();
    let initiated_at = now();

    tx.execute(
        "INSERT INTO refund_attempts (
            id, gateway, gateway_transaction_ref, refund_amount_minor,
            original_amount_minor, currency, status, initiated_by, reason,
            admin_notes, local_transaction_id, initiated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            input.gateway.as_str(),
            input.gateway_transaction_ref,
            input.refund_amount_minor,
            input.original_amount_minor,
            input.currency,
            RefundStatus::Initiated.as_str(),
            input.initiated_by,
            input.reason,
            input.admin_notes,
            input.local_transaction_id,
            initiated_at,
        ],
    )?;

    tx.commit()?;

    Ok(RefundRecord {
        id,
        gateway: input.gateway,
        gateway_transaction_ref: input.gateway_transaction_ref.clone(),
        gateway_refund_ref: None,
        refund_amount_minor: input.refund_amount_minor,
        original_amount_minor: input.original_amount_minor,
        settled_amount_minor: None,
        currency: input.currency.clone(),
        status: RefundStatus::Initiated,
        initiated_by: input.initiated_by.clone(),
        reason: input.reason.clone(),
        admin_notes: input.admin_notes.clone(),
        error_code: None,
        error_message: None,
        local_transaction_id: input.local_transaction_id.clone(),
        initiated_at,
        processed_at: None,
        completed_at: None,
    })
}

pub fn get_refund_attempt(conn: &Connection, refund_id: &str) -> Result<Option<RefundRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM refund_attempts WHERE id = ?1",
            REFUND_ATTEMPT_COLS
        ),
        &[&refund_id],
    )
}

/// All prior attempts for a transaction ref, newest first. Used for the
/// already-refunded idempotency check and eligibility display.
pub fn find_attempts_by_transaction(
    conn: &Connection,
    gateway: Gateway,
    gateway_transaction_ref: &str,
) -> Result<Vec<RefundRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM refund_attempts
             WHERE gateway = ?1 AND gateway_transaction_ref = ?2
             ORDER BY initiated_at DESC, id DESC",
            REFUND_ATTEMPT_COLS
        ),
        &[&gateway.as_str(), &gateway_transaction_ref],
    )
}

/// Transition an attempt to a new status, writing the accompanying fields.
///
/// Validates the transition against the state machine and rejects illegal
/// ones instead of silently overwriting; a set `gateway_refund_ref` is
/// immutable. `processed_at`/`completed_at` are stamped monotonically.
pub fn update_attempt_status(
    conn: &mut Connection,
    refund_id: &str,
    new_status: RefundStatus,
    update: &StatusUpdate,
) -> Result<RefundRecord> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let current: RefundRecord = query_one(
        &tx,
        &format!(
            "SELECT {} FROM refund_attempts WHERE id = ?1",
            REFUND_ATTEMPT_COLS
        ),
        &[&refund_id],
    )?
    .ok_or_else(|| AppError::NotFound(msg::REFUND_NOT_FOUND.into()))?;

    if !current.status.can_transition_to(new_status) {
        tracing::error!(
            refund_id = %refund_id,
            from = %current.status,
            to = %new_status,
            "rejected illegal refund status transition"
        );
        return Err(AppError::IllegalTransition(format!(
            "{}: {} -> {}",
            refund_id, current.status, new_status
        )));
    }

    if let (Some(existing), Some(incoming)) =
        (&current.gateway_refund_ref, &update.gateway_refund_ref)
    {
        if existing != incoming {
            tracing::error!(
                refund_id = %refund_id,
                existing = %existing,
                incoming = %incoming,
                "rejected attempt to overwrite gateway refund ref"
            );
            return Err(AppError::IllegalTransition(format!(
                "{}: gateway refund ref is immutable once set",
                refund_id
            )));
        }
    }

    let stamp = now();
    // processed_at: first time the record leaves `initiated`
    let processed_at = current.processed_at.unwrap_or(stamp);
    // completed_at: only when the refund actually settled (fully or short)
    let completed_at = match new_status {
        RefundStatus::Completed | RefundStatus::Partial => Some(current.completed_at.unwrap_or(stamp)),
        _ => current.completed_at,
    };

    tx.execute(
        "UPDATE refund_attempts SET
            status = ?1,
            gateway_refund_ref = COALESCE(?2, gateway_refund_ref),
            settled_amount_minor = COALESCE(?3, settled_amount_minor),
            error_code = COALESCE(?4, error_code),
            error_message = COALESCE(?5, error_message),
            admin_notes = COALESCE(?6, admin_notes),
            processed_at = ?7,
            completed_at = ?8
         WHERE id = ?9",
        params![
            new_status.as_str(),
            update.gateway_refund_ref,
            update.settled_amount_minor,
            update.error_code,
            update.error_message,
            update.admin_notes,
            processed_at,
            completed_at,
            refund_id,
        ],
    )?;

    let updated: RefundRecord = query_one(
        &tx,
        &format!(
            "SELECT {} FROM refund_attempts WHERE id = ?1",
            REFUND_ATTEMPT_COLS
        ),
        &[&refund_id],
    )?
    .ok_or_else(|| AppError::Internal(format!("refund {} vanished mid-update", refund_id)))?;

    tx.commit()?;
    Ok(updated)
}

/// Filtered, paginated listing for audit and reporting. Read-only.
pub fn list_refunds_filtered(
    conn: &Connection,
    filters: &RefundFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<RefundRecord>, i64)> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(gateway) = filters.gateway {
        values.push(gateway.as_str().to_string().into());
        where_clauses.push(format!("r.gateway = ?{}", values.len()));
    }
    if let Some(status) = filters.status {
        values.push(status.as_str().to_string().into());
        where_clauses.push(format!("r.status = ?{}", values.len()));
    }
    if let Some(start) = filters.start_date {
        values.push(start.into());
        where_clauses.push(format!("r.initiated_at >= ?{}", values.len()));
    }
    if let Some(end) = filters.end_date {
        values.push(end.into());
        where_clauses.push(format!("r.initiated_at <= ?{}", values.len()));
    }
    if let Some(ref search) = filters.search {
        let pattern = format!("%{}%", search);
        values.push(pattern.into());
        let idx = values.len();
        where_clauses.push(format!(
            "(r.id LIKE ?{idx} OR r.gateway_transaction_ref LIKE ?{idx} \
             OR r.gateway_refund_ref LIKE ?{idx} OR r.initiated_by LIKE ?{idx} \
             OR t.customer_email LIKE ?{idx})"
        ));
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM refund_attempts r
             LEFT JOIN transactions t ON r.local_transaction_id = t.id
             {}",
            where_sql
        ),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let limit_idx = values.len() + 1;
    let offset_idx = values.len() + 2;
    let sql = format!(
        "SELECT {} FROM refund_attempts r
         LEFT JOIN transactions t ON r.local_transaction_id = t.id
         {}
         ORDER BY r.initiated_at DESC, r.id DESC
         LIMIT ?{} OFFSET ?{}",
        REFUND_ATTEMPT_COLS_PREFIXED, where_sql, limit_idx, offset_idx
    );
    values.push(limit.into());
    values.push(offset.into());

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), |row| {
            super::from_row::FromRow::from_row(row)
        })?
        .collect::<std::result::Result<Vec<RefundRecord>, _>>()?;

    Ok((records, total))
}

/// Non-terminal attempts that have a gateway refund ref and can therefore
/// be polled. Feeds the drift-correction sweep.
pub fn list_unsettled_refunds(conn: &Connection, limit: i64) -> Result<Vec<RefundRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM refund_attempts
             WHERE status IN ('initiated', 'processing')
               AND gateway_refund_ref IS NOT NULL
             ORDER BY initiated_at ASC
             LIMIT ?1",
            REFUND_ATTEMPT_COLS
        ),
        &[&limit],
    )
}

// ============ Local payment ledger (read-only collaborator) ============

pub fn get_transaction(conn: &Connection, transaction_id: &str) -> Result<Option<LocalTransaction>> {
    query_one(
        conn,
        &format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLS),
        &[&transaction_id],
    )
}

pub fn find_transaction_by_provider_ref(
    conn: &Connection,
    gateway: Gateway,
    provider_ref: &str,
) -> Result<Option<LocalTransaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE gateway = ?1 AND provider_ref = ?2",
            TRANSACTION_COLS
        ),
        &[&gateway.as_str(), &provider_ref],
    )
}

/// Insert a payment record. Used by dev seeding and tests only; at runtime
/// the payment ledger belongs to the upstream system.
pub fn insert_transaction(
    conn: &Connection,
    input: &CreateLocalTransaction,
) -> Result<LocalTransaction> {
    let id = EntityType::Transaction.gen_id();
    let created_at = now();

    conn.execute(
        "INSERT INTO transactions (id, gateway, provider_ref, amount_minor, currency, customer_email, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            input.gateway.as_str(),
            input.provider_ref,
            input.amount_minor,
            input.currency,
            input.customer_email,
            created_at,
        ],
    )?;

    Ok(LocalTransaction {
        id,
        gateway: input.gateway,
        provider_ref: input.provider_ref.clone(),
        amount_minor: input.amount_minor,
        currency: input.currency.clone(),
        customer_email: input.customer_email.clone(),
        created_at,
    })
}
