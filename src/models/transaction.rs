use serde::{Deserialize, Serialize};

use crate::gateways::Gateway;

/// A row in the internal payment ledger. External collaborator data: the
/// engine reads it to link refunds and populate audit fields, and never
/// writes to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTransaction {
    pub id: String,
    pub gateway: Gateway,
    /// The gateway's identifier for the original charge (PayPal capture or
    /// order id, Razorpay payment id).
    pub provider_ref: String,
    pub amount_minor: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub created_at: i64,
}

/// Seed/test input for the payment ledger.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLocalTransaction {
    pub gateway: Gateway,
    pub provider_ref: String,
    pub amount_minor: i64,
    pub currency: String,
    pub customer_email: Option<String>,
}
