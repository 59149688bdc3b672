pub mod refunds;

use axum::routing::{get, post};
use axum::Router;

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Workflow step 2: transaction lookup & eligibility
        .route("/gateways/{gateway}/lookup", post(refunds::lookup_transaction))
        // Workflow steps 3-4: confirmation & processing; audit listing
        .route("/refunds", post(refunds::initiate_refund).get(refunds::list_refunds))
        .route("/refunds/{refund_id}", get(refunds::get_refund))
        .route("/refunds/{refund_id}/sync", post(refunds::sync_refund))
        .route("/refunds/{refund_id}/cancel", post(refunds::cancel_refund))
        // Read-only view into the internal payment ledger
        .route("/transactions/{transaction_id}", get(refunds::get_transaction))
}
