use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Internal payment ledger (external collaborator data; this service
        -- reads it to link refunds and never writes to it at runtime)
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            gateway TEXT NOT NULL CHECK (gateway IN ('paypal', 'razorpay')),
            provider_ref TEXT NOT NULL,
            amount_minor INTEGER NOT NULL,
            currency TEXT NOT NULL,
            customer_email TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(gateway, provider_ref)
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_provider ON transactions(provider_ref);

        -- Refund ledger: one row per attempt, append/update only, never
        -- deleted. System of record for financial review.
        CREATE TABLE IF NOT EXISTS refund_attempts (
            id TEXT PRIMARY KEY,
            gateway TEXT NOT NULL CHECK (gateway IN ('paypal', 'razorpay')),
            gateway_transaction_ref TEXT NOT NULL,
            gateway_refund_ref TEXT,
            refund_amount_minor INTEGER NOT NULL CHECK (refund_amount_minor > 0),
            original_amount_minor INTEGER NOT NULL CHECK (original_amount_minor >= 0),
            settled_amount_minor INTEGER,
            currency TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('initiated', 'processing', 'completed', 'failed', 'partial', 'cancelled')),
            initiated_by TEXT NOT NULL,
            reason TEXT NOT NULL,
            admin_notes TEXT,
            error_code TEXT,
            error_message TEXT,
            local_transaction_id TEXT REFERENCES transactions(id),
            initiated_at INTEGER NOT NULL,
            processed_at INTEGER,
            completed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_refund_attempts_txn ON refund_attempts(gateway, gateway_transaction_ref);
        CREATE INDEX IF NOT EXISTS idx_refund_attempts_status ON refund_attempts(status);
        CREATE INDEX IF NOT EXISTS idx_refund_attempts_initiated ON refund_attempts(initiated_at);
        -- A gateway refund id maps to exactly one attempt
        CREATE UNIQUE INDEX IF NOT EXISTS idx_refund_attempts_refund_ref ON refund_attempts(gateway_refund_ref) WHERE gateway_refund_ref IS NOT NULL;
        "#,
    )
}
