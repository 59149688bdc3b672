use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::RazorpayConfig;
use crate::error::{AppError, Result};
use crate::models::{LookupStatus, RefKind, TransactionLookupResult};
use crate::money;

use super::{
    transport_error, unexpected_status, Gateway, GatewayAdapter, RefundOutcome, RefundPoll,
    RefundPollState,
};

/// Razorpay payment entity. Amounts are already integer minor units
/// (paise); no decimal conversion happens for this gateway, only the
/// plausibility check.
#[derive(Debug, Deserialize)]
struct RazorpayPayment {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    amount_refunded: i64,
}

#[derive(Debug, Deserialize)]
struct RazorpayRefund {
    id: String,
    status: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorBody {
    error: Option<RazorpayErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: String,
    api_base: String,
}

impl RazorpayClient {
    pub fn new(config: &RazorpayConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::Internal(format!("Failed to build Razorpay HTTP client: {}", e))
        })?;
        Ok(Self {
            client,
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            api_base: config.api_base.clone(),
        })
    }

    fn payment_refundable(payment: &RazorpayPayment) -> bool {
        payment.status == "captured" && payment.amount_refunded < payment.amount
    }
}

#[async_trait]
impl GatewayAdapter for RazorpayClient {
    /// Razorpay has a single identifier convention: the `pay_…` payment id
    /// is both the lookup key and the refund target.
    async fn lookup(&self, transaction_ref: &str) -> Result<TransactionLookupResult> {
        let response = self
            .client
            .get(format!("{}/v1/payments/{}", self.api_base, transaction_ref))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| transport_error(Gateway::Razorpay, e))?;

        let status = response.status();
        // Razorpay answers an unknown payment id with 400 BAD_REQUEST_ERROR
        // rather than 404; both mean the transaction does not exist there.
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Ok(TransactionLookupResult::miss(Gateway::Razorpay, transaction_ref));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unexpected_status(Gateway::Razorpay, status, &body));
        }

        let payment: RazorpayPayment = response.json().await.map_err(|e| {
            AppError::Internal(format!("Failed to parse Razorpay payment: {}", e))
        })?;

        money::check_plausible(payment.amount, &payment.currency)?;

        Ok(TransactionLookupResult {
            gateway: Gateway::Razorpay,
            transaction_ref: transaction_ref.to_string(),
            refund_target_ref: Some(payment.id.clone()),
            ref_kind: Some(RefKind::Payment),
            status: LookupStatus::Unrecorded,
            can_refund: Self::payment_refundable(&payment),
            original_amount_minor: Some(payment.amount),
            currency: Some(payment.currency.to_lowercase()),
            gateway_state: Some(payment.status),
            local_transaction: None,
            already_refunded_minor: payment.amount_refunded.max(0),
        })
    }

    async fn initiate_refund(
        &self,
        refund_target_ref: &str,
        amount_minor: i64,
        currency: &str,
        note: &str,
    ) -> Result<RefundOutcome> {
        money::check_plausible(amount_minor, currency)?;

        let body = serde_json::json!({
            "amount": amount_minor,
            "notes": { "reason": note },
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/payments/{}/refund",
                self.api_base, refund_target_ref
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Gateway::Razorpay, e))?;

        let status = response.status();
        if status.is_success() {
            let refund: RazorpayRefund = response.json().await.map_err(|e| {
                AppError::Internal(format!("Failed to parse Razorpay refund: {}", e))
            })?;
            let (accepted, state) = match refund.status.as_str() {
                "processed" => (true, Some(RefundPollState::Settled)),
                "created" | "pending" => (true, Some(RefundPollState::Pending)),
                _ => (false, Some(RefundPollState::Failed)),
            };
            let settled_amount_minor = match state {
                Some(RefundPollState::Settled) => Some(refund.amount),
                _ => None,
            };
            return Ok(RefundOutcome {
                accepted,
                gateway_refund_ref: Some(refund.id),
                state,
                settled_amount_minor,
                error_code: None,
                error_message: None,
            });
        }

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(unexpected_status(Gateway::Razorpay, status, &body));
        }

        // Gateway rejection: record it, don't lose it.
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<RazorpayErrorBody> = serde_json::from_str(&body).ok();
        let detail = parsed.and_then(|e| e.error);
        let (code, description) = detail
            .map(|d| (d.code, d.description))
            .unwrap_or((None, None));
        Ok(RefundOutcome {
            accepted: false,
            gateway_refund_ref: None,
            state: None,
            settled_amount_minor: None,
            error_code: Some(code.unwrap_or_else(|| status.as_u16().to_string())),
            error_message: Some(description.unwrap_or(body)),
        })
    }

    async fn poll_status(&self, gateway_refund_ref: &str) -> Result<RefundPoll> {
        let response = self
            .client
            .get(format!("{}/v1/refunds/{}", self.api_base, gateway_refund_ref))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| transport_error(Gateway::Razorpay, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Err(AppError::NotFoundAtGateway(format!(
                "Razorpay has no refund {}",
                gateway_refund_ref
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unexpected_status(Gateway::Razorpay, status, &body));
        }

        let refund: RazorpayRefund = response.json().await.map_err(|e| {
            AppError::Internal(format!("Failed to parse Razorpay refund: {}", e))
        })?;

        let state = match refund.status.as_str() {
            "processed" => RefundPollState::Settled,
            "created" | "pending" => RefundPollState::Pending,
            _ => RefundPollState::Failed,
        };
        let settled_amount_minor = match state {
            RefundPollState::Settled => Some(refund.amount),
            _ => None,
        };

        Ok(RefundPoll {
            state,
            settled_amount_minor,
            gateway_state: refund.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(status: &str, amount: i64, amount_refunded: i64) -> RazorpayPayment {
        RazorpayPayment {
            id: "pay_ABC123".into(),
            amount,
            currency: "INR".into(),
            status: status.into(),
            amount_refunded,
        }
    }

    #[test]
    fn test_payment_refundable() {
        assert!(RazorpayClient::payment_refundable(&payment("captured", 150000, 0)));
        // Partially refunded captures can still take the remainder
        assert!(RazorpayClient::payment_refundable(&payment("captured", 150000, 50000)));
        // Fully refunded or never captured: no
        assert!(!RazorpayClient::payment_refundable(&payment("captured", 150000, 150000)));
        assert!(!RazorpayClient::payment_refundable(&payment("authorized", 150000, 0)));
        assert!(!RazorpayClient::payment_refundable(&payment("failed", 150000, 0)));
    }
}
