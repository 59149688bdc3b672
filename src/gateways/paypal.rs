use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::PaypalConfig;
use crate::error::{AppError, Result};
use crate::models::{LookupStatus, RefKind, TransactionLookupResult};
use crate::money;

use super::{
    transport_error, unexpected_status, Gateway, GatewayAdapter, RefundOutcome, RefundPoll,
    RefundPollState,
};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// PayPal money object: decimal major-unit string plus uppercase currency.
#[derive(Debug, Deserialize)]
struct PaypalAmount {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PaypalCapture {
    id: String,
    status: String,
    amount: PaypalAmount,
}

#[derive(Debug, Deserialize)]
struct PaypalOrder {
    status: String,
    #[serde(default)]
    purchase_units: Vec<PaypalPurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PaypalPurchaseUnit {
    payments: Option<PaypalPayments>,
}

#[derive(Debug, Deserialize)]
struct PaypalPayments {
    #[serde(default)]
    captures: Vec<PaypalCapture>,
}

#[derive(Debug, Deserialize)]
struct PaypalRefund {
    id: String,
    status: String,
    amount: Option<PaypalAmount>,
}

#[derive(Debug, Deserialize)]
struct PaypalErrorBody {
    name: Option<String>,
    message: Option<String>,
}

/// Capture statuses PayPal will accept a (further) refund against.
fn capture_refundable(status: &str) -> bool {
    matches!(status, "COMPLETED" | "PARTIALLY_REFUNDED")
}

#[derive(Debug, Clone)]
pub struct PaypalClient {
    client: Client,
    client_id: String,
    client_secret: String,
    api_base: String,
}

impl PaypalClient {
    pub fn new(config: &PaypalConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::Internal(format!("Failed to build PayPal HTTP client: {}", e))
        })?;
        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            api_base: config.api_base.clone(),
        })
    }

    // Tokens are fetched per call. Refund traffic is rare and admin-driven;
    // a cache would only save one round trip per operator action.
    async fn access_token(&self) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| transport_error(Gateway::Paypal, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(unexpected_status(Gateway::Paypal, status, &body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse PayPal token: {}", e)))?;
        Ok(token.access_token)
    }

    /// GET a PayPal resource; `Ok(None)` on 404 so lookups can fall
    /// through identifier kinds.
    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
    ) -> Result<Option<T>> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport_error(Gateway::Paypal, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let parsed = response.json().await.map_err(|e| {
                    AppError::Internal(format!("Failed to parse PayPal response: {}", e))
                })?;
                Ok(Some(parsed))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(unexpected_status(Gateway::Paypal, status, &body))
            }
        }
    }

    fn capture_to_lookup(
        &self,
        transaction_ref: &str,
        kind: RefKind,
        capture: &PaypalCapture,
    ) -> Result<TransactionLookupResult> {
        let currency = capture.amount.currency_code.to_lowercase();
        let original_minor = money::major_to_minor(&capture.amount.value, &currency)?;

        Ok(TransactionLookupResult {
            gateway: Gateway::Paypal,
            transaction_ref: transaction_ref.to_string(),
            // Refunds always address the capture, whichever id was presented.
            refund_target_ref: Some(capture.id.clone()),
            ref_kind: Some(kind),
            status: LookupStatus::Unrecorded,
            can_refund: capture_refundable(&capture.status),
            original_amount_minor: Some(original_minor),
            currency: Some(currency),
            gateway_state: Some(capture.status.clone()),
            local_transaction: None,
            already_refunded_minor: 0,
        })
    }

    fn map_refund_state(status: &str) -> (bool, Option<RefundPollState>) {
        match status {
            "COMPLETED" => (true, Some(RefundPollState::Settled)),
            "PENDING" => (true, Some(RefundPollState::Pending)),
            _ => (false, Some(RefundPollState::Failed)),
        }
    }
}

#[async_trait]
impl GatewayAdapter for PaypalClient {
    /// Accepts either a capture id or an order id. PayPal keys refunds by
    /// capture, so an order lookup resolves down to its first capture.
    async fn lookup(&self, transaction_ref: &str) -> Result<TransactionLookupResult> {
        let token = self.access_token().await?;

        if let Some(capture) = self
            .get_optional::<PaypalCapture>(
                &token,
                &format!("/v2/payments/captures/{}", transaction_ref),
            )
            .await?
        {
            return self.capture_to_lookup(transaction_ref, RefKind::Capture, &capture);
        }

        if let Some(order) = self
            .get_optional::<PaypalOrder>(
                &token,
                &format!("/v2/checkout/orders/{}", transaction_ref),
            )
            .await?
        {
            let capture = order
                .purchase_units
                .iter()
                .filter_map(|unit| unit.payments.as_ref())
                .flat_map(|payments| payments.captures.iter())
                .next();

            return match capture {
                Some(capture) => self.capture_to_lookup(transaction_ref, RefKind::Order, capture),
                // Order exists but was never captured: nothing refundable.
                None => {
                    let mut result = TransactionLookupResult::miss(Gateway::Paypal, transaction_ref);
                    result.ref_kind = Some(RefKind::Order);
                    result.gateway_state = Some(order.status);
                    Ok(result)
                }
            };
        }

        Ok(TransactionLookupResult::miss(Gateway::Paypal, transaction_ref))
    }

    async fn initiate_refund(
        &self,
        refund_target_ref: &str,
        amount_minor: i64,
        currency: &str,
        note: &str,
    ) -> Result<RefundOutcome> {
        money::check_plausible(amount_minor, currency)?;
        let value = money::minor_to_major(amount_minor, currency)?;
        let token = self.access_token().await?;

        let body = serde_json::json!({
            "amount": {
                "value": value,
                "currency_code": currency.to_uppercase(),
            },
            "note_to_payer": note,
        });

        let response = self
            .client
            .post(format!(
                "{}/v2/payments/captures/{}/refund",
                self.api_base, refund_target_ref
            ))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Gateway::Paypal, e))?;

        let status = response.status();
        if status.is_success() {
            let refund: PaypalRefund = response.json().await.map_err(|e| {
                AppError::Internal(format!("Failed to parse PayPal refund: {}", e))
            })?;
            let (accepted, state) = Self::map_refund_state(&refund.status);
            let settled_amount_minor = match (&refund.amount, state) {
                (Some(amount), Some(RefundPollState::Settled)) => {
                    Some(money::major_to_minor(&amount.value, currency)?)
                }
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
            return Err(unexpected_status(Gateway::Paypal, status, &body));
        }

        // 4xx: the gateway looked at the request and said no. That is an
        // outcome to record, not a transport failure.
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<PaypalErrorBody> = serde_json::from_str(&body).ok();
        let (name, message) = parsed
            .map(|e| (e.name, e.message))
            .unwrap_or((None, None));
        Ok(RefundOutcome {
            accepted: false,
            gateway_refund_ref: None,
            state: None,
            settled_amount_minor: None,
            error_code: Some(name.unwrap_or_else(|| status.as_u16().to_string())),
            error_message: Some(message.unwrap_or(body)),
        })
    }

    async fn poll_status(&self, gateway_refund_ref: &str) -> Result<RefundPoll> {
        let token = self.access_token().await?;

        let refund: PaypalRefund = self
            .get_optional(&token, &format!("/v2/payments/refunds/{}", gateway_refund_ref))
            .await?
            .ok_or_else(|| {
                AppError::NotFoundAtGateway(format!(
                    "PayPal has no refund {}",
                    gateway_refund_ref
                ))
            })?;

        let state = match refund.status.as_str() {
            "COMPLETED" => RefundPollState::Settled,
            "PENDING" => RefundPollState::Pending,
            _ => RefundPollState::Failed,
        };
        let settled_amount_minor = match (&refund.amount, state) {
            (Some(amount), RefundPollState::Settled) => {
                let currency = amount.currency_code.to_lowercase();
                Some(money::major_to_minor(&amount.value, &currency)?)
            }
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

    #[test]
    fn test_capture_refundable_states() {
        assert!(capture_refundable("COMPLETED"));
        assert!(capture_refundable("PARTIALLY_REFUNDED"));
        assert!(!capture_refundable("PENDING"));
        assert!(!capture_refundable("DECLINED"));
        assert!(!capture_refundable("REFUNDED"));
    }

    #[test]
    fn test_refund_state_mapping() {
        assert_eq!(
            PaypalClient::map_refund_state("COMPLETED"),
            (true, Some(RefundPollState::Settled))
        );
        assert_eq!(
            PaypalClient::map_refund_state("PENDING"),
            (true, Some(RefundPollState::Pending))
        );
        assert_eq!(
            PaypalClient::map_refund_state("CANCELLED"),
            (false, Some(RefundPollState::Failed))
        );
        assert_eq!(
            PaypalClient::map_refund_state("FAILED"),
            (false, Some(RefundPollState::Failed))
        );
    }

    #[test]
    fn test_capture_amount_normalization() {
        // PayPal reports decimal major units; the normalized view must be
        // exact minor units.
        let config = PaypalConfig {
            client_id: "test".into(),
            client_secret: "test".into(),
            api_base: "https://api-m.sandbox.paypal.com".into(),
        };
        let client = PaypalClient::new(&config, Duration::from_secs(1)).unwrap();
        let capture = PaypalCapture {
            id: "3C123456XY789".into(),
            status: "COMPLETED".into(),
            amount: PaypalAmount {
                currency_code: "USD".into(),
                value: "12.50".into(),
            },
        };

        let lookup = client
            .capture_to_lookup("3C123456XY789", RefKind::Capture, &capture)
            .unwrap();
        assert_eq!(lookup.original_amount_minor, Some(1250));
        assert_eq!(lookup.currency.as_deref(), Some("usd"));
        assert_eq!(lookup.refund_target_ref.as_deref(), Some("3C123456XY789"));
        assert!(lookup.can_refund);
    }
}
