mod paypal;
mod razorpay;

pub use paypal::PaypalClient;
pub use razorpay::RazorpayClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::TransactionLookupResult;

/// Supported payment gateways, peer implementations of one adapter
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Paypal,
    Razorpay,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paypal => "paypal",
            Self::Razorpay => "razorpay",
        }
    }
}

impl std::str::FromStr for Gateway {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paypal" | "pp" => Ok(Gateway::Paypal),
            "razorpay" | "rzp" => Ok(Gateway::Razorpay),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a refund stands on the gateway's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundPollState {
    /// Accepted but not yet settled.
    Pending,
    /// Settled. The gateway may report a settled amount short of the
    /// request.
    Settled,
    /// Rejected or reversed by the gateway.
    Failed,
}

/// Result of a refund initiation call that reached the gateway.
///
/// A gateway *rejection* is an outcome (`accepted == false`, error fields
/// set); only transport-level trouble is an `Err`.
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub accepted: bool,
    pub gateway_refund_ref: Option<String>,
    /// Settlement state at acceptance time; `Settled` means the gateway
    /// completed the refund synchronously.
    pub state: Option<RefundPollState>,
    pub settled_amount_minor: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Result of polling a previously-accepted refund.
#[derive(Debug, Clone)]
pub struct RefundPoll {
    pub state: RefundPollState,
    pub settled_amount_minor: Option<i64>,
    /// The gateway's own status string, for audit messages.
    pub gateway_state: String,
}

/// Contract implemented once per gateway.
///
/// Adapters normalize amounts into minor units (via [`crate::money`], the
/// only permitted conversion path), map each gateway's identifier
/// conventions into the common shape, and never touch local state.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Look up a transaction. A gateway-side miss is a `NotFound`-tagged
    /// result, not an error; transport trouble is `GatewayUnavailable`.
    async fn lookup(&self, transaction_ref: &str) -> Result<TransactionLookupResult>;

    /// Initiate a refund against the gateway's refund-target identifier
    /// (as resolved by [`lookup`](Self::lookup)).
    async fn initiate_refund(
        &self,
        refund_target_ref: &str,
        amount_minor: i64,
        currency: &str,
        note: &str,
    ) -> Result<RefundOutcome>;

    /// Current gateway-side state of an accepted refund.
    async fn poll_status(&self, gateway_refund_ref: &str) -> Result<RefundPoll>;
}

/// Holds one adapter per gateway. Tests swap in scripted mocks.
#[derive(Clone)]
pub struct GatewayRegistry {
    paypal: Arc<dyn GatewayAdapter>,
    razorpay: Arc<dyn GatewayAdapter>,
}

impl GatewayRegistry {
    pub fn new(paypal: Arc<dyn GatewayAdapter>, razorpay: Arc<dyn GatewayAdapter>) -> Self {
        Self { paypal, razorpay }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Arc::new(PaypalClient::new(&config.paypal, config.gateway_timeout)?),
            Arc::new(RazorpayClient::new(&config.razorpay, config.gateway_timeout)?),
        ))
    }

    pub fn adapter(&self, gateway: Gateway) -> &dyn GatewayAdapter {
        match gateway {
            Gateway::Paypal => self.paypal.as_ref(),
            Gateway::Razorpay => self.razorpay.as_ref(),
        }
    }
}

/// Map transport-level reqwest failures. Timeouts and connection errors are
/// `GatewayUnavailable` (retryable via a fresh attempt or sync); anything
/// else at this layer is unexpected.
pub(crate) fn transport_error(gateway: Gateway, e: reqwest::Error) -> AppError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        AppError::GatewayUnavailable(format!("{}: {}", gateway, e))
    } else {
        AppError::Internal(format!("{} transport error: {}", gateway, e))
    }
}

/// Map an unexpected HTTP status from a gateway. Server-side errors are
/// retryable; anything else means we are talking to the API wrong.
pub(crate) fn unexpected_status(
    gateway: Gateway,
    status: reqwest::StatusCode,
    body: &str,
) -> AppError {
    if status.is_server_error() {
        AppError::GatewayUnavailable(format!("{} returned {}: {}", gateway, status, body))
    } else {
        AppError::Internal(format!("{} returned {}: {}", gateway, status, body))
    }
}
