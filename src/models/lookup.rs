use serde::{Deserialize, Serialize};

use crate::gateways::Gateway;
use crate::models::LocalTransaction;

/// Relationship between the local payment ledger and the gateway's own
/// record for a looked-up transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    /// Found at the gateway and recorded in the local payment ledger.
    Verified,
    /// Found at the gateway but never recorded locally. Refundable, but the
    /// ledger row will carry no local transaction link.
    Unrecorded,
    /// Unknown to both the gateway and the local ledger.
    NotFound,
    /// Recorded locally but the gateway has no such transaction.
    NotInGateway,
}

/// Which identifier convention a gateway lookup resolved. PayPal addresses
/// a refund at the *capture*, even when the operator pasted an order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Capture,
    Order,
    Payment,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Order => "order",
            Self::Payment => "payment",
        }
    }
}

/// Normalized, ephemeral view of a gateway transaction. Never persisted;
/// the ledger records only the attempt derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionLookupResult {
    pub gateway: Gateway,
    /// The identifier as presented for lookup.
    pub transaction_ref: String,
    /// The identifier the gateway requires when initiating the refund.
    pub refund_target_ref: Option<String>,
    pub ref_kind: Option<RefKind>,
    pub status: LookupStatus,
    pub can_refund: bool,
    /// Original charge amount, normalized to minor units.
    pub original_amount_minor: Option<i64>,
    pub currency: Option<String>,
    /// The gateway's own status string, for display only.
    pub gateway_state: Option<String>,
    /// Linked internal payment record, when the transaction was recorded
    /// locally.
    pub local_transaction: Option<LocalTransaction>,
    /// Sum of prior attempts counting toward the refund cap, for
    /// eligibility display.
    pub already_refunded_minor: i64,
}

impl TransactionLookupResult {
    /// A gateway-side miss, before the engine decides between `NotFound`
    /// and `NotInGateway` using the local ledger.
    pub fn miss(gateway: Gateway, transaction_ref: &str) -> Self {
        Self {
            gateway,
            transaction_ref: transaction_ref.to_string(),
            refund_target_ref: None,
            ref_kind: None,
            status: LookupStatus::NotFound,
            can_refund: false,
            original_amount_minor: None,
            currency: None,
            gateway_state: None,
            local_transaction: None,
            already_refunded_minor: 0,
        }
    }
}
