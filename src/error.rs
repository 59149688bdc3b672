use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The gateway has no record of the transaction. Not retryable.
    #[error("Not found at gateway: {0}")]
    NotFoundAtGateway(String),

    /// Network error or timeout talking to the gateway. Retryable via a
    /// fresh attempt or a later sync.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The requested refund would exceed the original charge amount.
    #[error("Over-refund rejected: {0}")]
    OverRefund(String),

    /// A status update attempted an invalid state-machine transition.
    /// Integrity error: logged loudly, never coerced.
    #[error("Illegal status transition: {0}")]
    IllegalTransition(String),

    /// Amount normalization produced an implausible value. Halts before
    /// any gateway call.
    #[error("Unit mismatch: {0}")]
    UnitMismatch(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code, persisted in the ledger's error_code
    /// column and echoed in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NotFound",
            AppError::BadRequest(_) => "BadRequest",
            AppError::Conflict(_) => "Conflict",
            AppError::NotFoundAtGateway(_) => "NotFoundAtGateway",
            AppError::GatewayUnavailable(_) => "GatewayUnavailable",
            AppError::OverRefund(_) => "OverRefund",
            AppError::IllegalTransition(_) => "IllegalTransition",
            AppError::UnitMismatch(_) => "UnitMismatch",
            AppError::Database(_) => "Database",
            AppError::Pool(_) => "Pool",
            AppError::Json(_) => "Json",
            AppError::Internal(_) => "Internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::PathRejection> for AppError {
    fn from(rejection: axum::extract::rejection::PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::NotFoundAtGateway(msg) => (
                StatusCode::NOT_FOUND,
                "Transaction not found at gateway",
                Some(msg.clone()),
            ),
            AppError::GatewayUnavailable(msg) => (
                StatusCode::BAD_GATEWAY,
                "Gateway unavailable",
                Some(msg.clone()),
            ),
            AppError::OverRefund(msg) => (
                StatusCode::CONFLICT,
                "Refund exceeds original amount",
                Some(msg.clone()),
            ),
            // Already logged at the rejection site with full context
            AppError::IllegalTransition(msg) => (
                StatusCode::CONFLICT,
                "Illegal status transition",
                Some(msg.clone()),
            ),
            AppError::UnitMismatch(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Amount normalization failed",
                Some(msg.clone()),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let code = self.code().to_string();
        let body = ErrorResponse {
            error: error.to_string(),
            code,
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Extension for the common `Option -> NotFound` pattern in handlers.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}

/// User-visible message constants. Every failure names a specific reason;
/// a bare "failed" is never shown.
pub mod msg {
    pub const REFUND_NOT_FOUND: &str = "Refund attempt not found";
    pub const TRANSACTION_NOT_FOUND: &str = "Transaction not found";
    pub const UNKNOWN_GATEWAY: &str = "Unknown gateway (expected 'paypal' or 'razorpay')";
    pub const REFUND_IN_FLIGHT: &str =
        "A refund for this transaction is already being processed in this session";
    pub const REFUND_NOT_POLLABLE: &str =
        "Refund has no gateway reference yet; nothing to sync";
    pub const CANCEL_AFTER_DISPATCH: &str =
        "Refund was already dispatched to the gateway and can no longer be cancelled";
    pub const NOT_REFUNDABLE: &str = "Transaction is not in a refundable state at the gateway";
    pub const AMOUNT_NOT_POSITIVE: &str = "Refund amount must be a positive number of minor units";
}
