use axum::extract::State;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::gateways::Gateway;
use crate::id;
use crate::models::{
    LocalTransaction, RefundFilters, RefundRecord, RefundStatus, TransactionLookupResult,
};
use crate::pagination::Paginated;
use crate::workflow::RefundWorkflow;

#[derive(Deserialize)]
pub struct GatewayPath {
    pub gateway: String,
}

#[derive(Deserialize)]
pub struct RefundPath {
    pub refund_id: String,
}

#[derive(Deserialize)]
pub struct TransactionPath {
    pub transaction_id: String,
}

fn parse_gateway(s: &str) -> Result<Gateway> {
    s.parse()
        .map_err(|_| AppError::BadRequest(msg::UNKNOWN_GATEWAY.into()))
}

/// Cheap format check so garbage ids miss the database entirely.
fn checked_refund_id(refund_id: &str) -> Result<&str> {
    if !id::is_valid_prefixed_id(refund_id) {
        return Err(AppError::NotFound(msg::REFUND_NOT_FOUND.into()));
    }
    Ok(refund_id)
}

#[derive(Debug, Deserialize)]
pub struct LookupRequest {
    pub transaction_ref: String,
}

/// POST /gateways/{gateway}/lookup
/// Look a transaction up at the gateway and report refund eligibility.
pub async fn lookup_transaction(
    State(state): State<AppState>,
    Path(path): Path<GatewayPath>,
    Json(body): Json<LookupRequest>,
) -> Result<Json<TransactionLookupResult>> {
    let gateway = parse_gateway(&path.gateway)?;

    let mut workflow = RefundWorkflow::new();
    workflow.select_gateway(gateway)?;
    let result = workflow.lookup(&state.engine, &body.transaction_ref).await?;

    Ok(Json(result.clone()))
}

#[derive(Debug, Deserialize)]
pub struct InitiateRefundRequest {
    pub gateway: String,
    pub transaction_ref: String,
    /// Omit to refund the full original amount.
    pub amount_minor: Option<i64>,
    pub reason: String,
    pub actor: String,
    pub admin_notes: Option<String>,
}

/// POST /refunds
/// Run the full refund sequence for one attempt. The response mirrors the
/// ledger row, which is the durable record of truth whether or not this
/// response is ever received.
pub async fn initiate_refund(
    State(state): State<AppState>,
    Json(body): Json<InitiateRefundRequest>,
) -> Result<Json<RefundRecord>> {
    let gateway = parse_gateway(&body.gateway)?;

    // Holds until this request finishes, success or error.
    let _guard = state.in_flight.begin(gateway, &body.transaction_ref)?;

    let mut workflow = RefundWorkflow::new();
    workflow.select_gateway(gateway)?;
    workflow.lookup(&state.engine, &body.transaction_ref).await?;
    let record = workflow
        .confirm(
            &state.engine,
            body.amount_minor,
            body.reason,
            body.actor,
            body.admin_notes,
        )
        .await?;

    Ok(Json(record))
}

/// POST /refunds/{refund_id}/sync
/// Re-poll the gateway and correct local status drift. Idempotent.
pub async fn sync_refund(
    State(state): State<AppState>,
    Path(path): Path<RefundPath>,
) -> Result<Json<RefundRecord>> {
    let refund_id = checked_refund_id(&path.refund_id)?;
    let record = state.engine.sync_status(refund_id).await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct CancelRefundRequest {
    pub actor: String,
}

/// POST /refunds/{refund_id}/cancel
/// Abandon an attempt the gateway never acknowledged.
pub async fn cancel_refund(
    State(state): State<AppState>,
    Path(path): Path<RefundPath>,
    Json(body): Json<CancelRefundRequest>,
) -> Result<Json<RefundRecord>> {
    let refund_id = checked_refund_id(&path.refund_id)?;
    let record = state.engine.cancel_refund(refund_id, &body.actor)?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct ListRefundsQuery {
    /// Filter by gateway (paypal, razorpay)
    pub gateway: Option<Gateway>,
    /// Filter by status (initiated, processing, completed, failed, partial, cancelled)
    pub status: Option<RefundStatus>,
    /// Filter by start date (unix timestamp)
    pub start_date: Option<i64>,
    /// Filter by end date (unix timestamp)
    pub end_date: Option<i64>,
    /// Free-text search over ids, refs, actor and customer email
    pub search: Option<String>,
    /// Max results to return (default 50, max 100)
    pub limit: Option<i64>,
    /// Offset for pagination (default 0)
    pub offset: Option<i64>,
}

impl ListRefundsQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    fn to_filters(&self) -> RefundFilters {
        RefundFilters {
            gateway: self.gateway,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
            search: self.search.clone(),
        }
    }
}

/// GET /refunds
/// Audit/report listing with filters and pagination. Read-only.
pub async fn list_refunds(
    State(state): State<AppState>,
    Query(query): Query<ListRefundsQuery>,
) -> Result<Json<Paginated<RefundRecord>>> {
    let conn = state.db.get()?;

    let limit = query.limit();
    let offset = query.offset();

    let (records, total) =
        queries::list_refunds_filtered(&conn, &query.to_filters(), limit, offset)?;

    Ok(Json(Paginated::new(records, total, limit, offset)))
}

/// GET /refunds/{refund_id}
pub async fn get_refund(
    State(state): State<AppState>,
    Path(path): Path<RefundPath>,
) -> Result<Json<RefundRecord>> {
    let refund_id = checked_refund_id(&path.refund_id)?;
    let conn = state.db.get()?;

    let record =
        queries::get_refund_attempt(&conn, refund_id)?.or_not_found(msg::REFUND_NOT_FOUND)?;

    Ok(Json(record))
}

/// GET /transactions/{transaction_id}
/// Read-only view of the internal payment record a refund links to.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(path): Path<TransactionPath>,
) -> Result<Json<LocalTransaction>> {
    let conn = state.db.get()?;

    let transaction = queries::get_transaction(&conn, &path.transaction_id)?
        .or_not_found(msg::TRANSACTION_NOT_FOUND)?;

    Ok(Json(transaction))
}
