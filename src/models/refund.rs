use serde::{Deserialize, Serialize};

use crate::gateways::Gateway;

/// One row in the refund ledger: a single refund *attempt*, created before
/// the gateway call and updated with its outcome. Never deleted. A failed
/// attempt is a record like any other; a silently lost attempt is the bug
/// this table exists to prevent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub id: String,
    pub gateway: Gateway,
    /// The external identifier the operator presented for lookup. Semantics
    /// differ by gateway (PayPal capture/order id, Razorpay payment id).
    pub gateway_transaction_ref: String,
    /// The gateway's refund identifier. Null until the gateway acknowledges
    /// the refund; immutable once set.
    pub gateway_refund_ref: Option<String>,

    // Amounts (canonical minor units)
    pub refund_amount_minor: i64,
    pub original_amount_minor: i64,
    /// Gateway-reported settled amount, when it differs from the request
    /// (populates `partial`).
    pub settled_amount_minor: Option<i64>,
    pub currency: String,

    pub status: RefundStatus,

    // Audit
    pub initiated_by: String,
    pub reason: String,
    pub admin_notes: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,

    /// Internal payment record this refund applies to, when one exists.
    pub local_transaction_id: Option<String>,

    pub initiated_at: i64,
    pub processed_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Lifecycle of a refund attempt.
///
/// ```text
/// initiated -> processing | completed | failed | cancelled
/// processing -> completed | failed | partial
/// ```
/// `completed`, `failed`, `partial`, `cancelled` are terminal. Transitions
/// are one-directional; nothing ever leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Ledger row created, gateway call not yet acknowledged.
    Initiated,
    /// Gateway acknowledged receipt; refund not yet settled.
    Processing,
    /// Gateway confirmed settlement for the full requested amount.
    Completed,
    /// Gateway rejected the refund, or the call errored before any
    /// acknowledgment.
    Failed,
    /// Gateway settled less than the requested amount. Terminal, but
    /// flagged for manual review.
    Partial,
    /// Abandoned before any gateway acknowledgment; no external side
    /// effect occurred.
    Cancelled,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Partial | Self::Cancelled
        )
    }

    /// Whether this attempt's amount counts toward the cumulative refund
    /// cap for its transaction. In-flight attempts reserve their amount so
    /// concurrent admins cannot jointly over-refund.
    pub fn counts_toward_cap(&self) -> bool {
        !matches!(self, Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (*self, next),
            (Initiated, Processing | Completed | Failed | Cancelled)
                | (Processing, Completed | Failed | Partial)
        )
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Data required to open a new attempt row in the ledger.
#[derive(Debug, Clone)]
pub struct CreateRefundAttempt {
    pub gateway: Gateway,
    pub gateway_transaction_ref: String,
    pub refund_amount_minor: i64,
    pub original_amount_minor: i64,
    pub currency: String,
    pub initiated_by: String,
    pub reason: String,
    pub admin_notes: Option<String>,
    pub local_transaction_id: Option<String>,
}

/// Fields written alongside a status transition. All optional; absent
/// fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub gateway_refund_ref: Option<String>,
    pub settled_amount_minor: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub admin_notes: Option<String>,
}

/// Filters for the audit/report listing. No business logic.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RefundFilters {
    pub gateway: Option<Gateway>,
    pub status: Option<RefundStatus>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    /// Free-text match over refund id, transaction ref, refund ref, actor
    /// and linked customer email.
    pub search: Option<String>,
}
