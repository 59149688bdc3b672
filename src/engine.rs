//! Reconciliation engine: orchestrates gateway lookup, eligibility,
//! refund initiation and the ledger write, plus the independent sync
//! operation that corrects local status drift against the gateway.

use crate::db::{queries, DbPool};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::gateways::{Gateway, GatewayRegistry, RefundOutcome, RefundPollState};
use crate::models::{
    CreateRefundAttempt, LookupStatus, RefundRecord, RefundStatus, StatusUpdate,
    TransactionLookupResult,
};
use crate::money;

/// A refund request as it arrives from the workflow layer.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub gateway: Gateway,
    pub transaction_ref: String,
    /// Omitted = refund the full original amount.
    pub amount_minor: Option<i64>,
    pub reason: String,
    pub actor: String,
    pub admin_notes: Option<String>,
}

pub struct Engine {
    db: DbPool,
    gateways: GatewayRegistry,
}

impl Engine {
    pub fn new(db: DbPool, gateways: GatewayRegistry) -> Self {
        Self { db, gateways }
    }

    /// Look a transaction up at its gateway and relate it to the local
    /// payment ledger and prior refund attempts.
    pub async fn lookup(
        &self,
        gateway: Gateway,
        transaction_ref: &str,
    ) -> Result<TransactionLookupResult> {
        let mut result = self.gateways.adapter(gateway).lookup(transaction_ref).await?;

        let conn = self.db.get()?;
        let mut local = queries::find_transaction_by_provider_ref(&conn, gateway, transaction_ref)?;
        if local.is_none() {
            // The operator may have presented an order id while the local
            // ledger recorded the capture id (or vice versa).
            if let Some(target) = result.refund_target_ref.clone() {
                if target != transaction_ref {
                    local = queries::find_transaction_by_provider_ref(&conn, gateway, &target)?;
                }
            }
        }

        match (result.status, local.is_some()) {
            (LookupStatus::Unrecorded, true) => result.status = LookupStatus::Verified,
            (LookupStatus::NotFound, true) => result.status = LookupStatus::NotInGateway,
            _ => {}
        }
        result.local_transaction = local;

        // Ledger reservations may be ahead of what the gateway has settled;
        // show the operator the larger of the two.
        let attempts = queries::find_attempts_by_transaction(&conn, gateway, transaction_ref)?;
        let reserved: i64 = attempts
            .iter()
            .filter(|a| a.status.counts_toward_cap())
            .map(|a| a.refund_amount_minor)
            .sum();
        result.already_refunded_minor = result.already_refunded_minor.max(reserved);

        Ok(result)
    }

    /// Process one refund attempt.
    ///
    /// Order matters: nothing is written before a real gateway target is
    /// confirmed, and once the attempt row exists the outcome write happens
    /// on every path, including gateway timeouts. A dropped client
    /// connection after the gateway call cannot erase the audit trail.
    pub async fn process_refund(&self, req: RefundRequest) -> Result<RefundRecord> {
        let lookup = self.lookup(req.gateway, &req.transaction_ref).await?;

        match lookup.status {
            LookupStatus::NotFound | LookupStatus::NotInGateway => {
                return Err(AppError::NotFoundAtGateway(format!(
                    "{} has no transaction '{}'",
                    req.gateway, req.transaction_ref
                )));
            }
            LookupStatus::Verified | LookupStatus::Unrecorded => {}
        }
        if !lookup.can_refund {
            return Err(AppError::Conflict(msg::NOT_REFUNDABLE.into()));
        }

        let original_minor = lookup
            .original_amount_minor
            .ok_or_else(|| AppError::Internal("gateway lookup carried no amount".into()))?;
        let currency = lookup
            .currency
            .clone()
            .ok_or_else(|| AppError::Internal("gateway lookup carried no currency".into()))?;
        let refund_target = lookup
            .refund_target_ref
            .clone()
            .ok_or_else(|| AppError::Internal("gateway lookup carried no refund target".into()))?;

        let amount_minor = req.amount_minor.unwrap_or(original_minor);
        if amount_minor <= 0 {
            return Err(AppError::BadRequest(msg::AMOUNT_NOT_POSITIVE.into()));
        }
        money::check_plausible(amount_minor, &currency)?;

        // The ledger row exists before the gateway call: from here on the
        // attempt is never lost, whatever happens on the wire.
        let mut conn = self.db.get()?;
        let attempt = queries::create_attempt(
            &mut conn,
            &CreateRefundAttempt {
                gateway: req.gateway,
                gateway_transaction_ref: req.transaction_ref.clone(),
                refund_amount_minor: amount_minor,
                original_amount_minor: original_minor,
                currency: currency.clone(),
                initiated_by: req.actor.clone(),
                reason: req.reason.clone(),
                admin_notes: req.admin_notes.clone(),
                local_transaction_id: lookup.local_transaction.as_ref().map(|t| t.id.clone()),
            },
        )?;
        drop(conn);

        let call = self
            .gateways
            .adapter(req.gateway)
            .initiate_refund(&refund_target, amount_minor, &currency, &req.reason)
            .await;

        self.write_initiation_result(&attempt, call)
    }

    /// The unconditional step-4 write: the gateway call's outcome, success
    /// or failure, lands in the ledger before anything is surfaced.
    fn write_initiation_result(
        &self,
        attempt: &RefundRecord,
        call: Result<RefundOutcome>,
    ) -> Result<RefundRecord> {
        let mut conn = self.db.get().map_err(|e| {
            // Nothing we can do but shout: the attempt row stays
            // `initiated` and must be reconciled by hand.
            tracing::error!(
                refund_id = %attempt.id,
                outcome = ?call,
                "could not obtain db connection to record refund outcome: {}",
                e
            );
            AppError::from(e)
        })?;

        match call {
            Ok(outcome) if outcome.accepted => {
                let settled = outcome.settled_amount_minor;
                let status = match outcome.state {
                    Some(RefundPollState::Settled) => {
                        if settled.map_or(false, |s| s < attempt.refund_amount_minor) {
                            RefundStatus::Partial
                        } else {
                            RefundStatus::Completed
                        }
                    }
                    _ => RefundStatus::Processing,
                };
                queries::update_attempt_status(
                    &mut conn,
                    &attempt.id,
                    status,
                    &StatusUpdate {
                        gateway_refund_ref: outcome.gateway_refund_ref,
                        settled_amount_minor: settled,
                        ..Default::default()
                    },
                )
            }
            Ok(outcome) => {
                // Gateway rejection: a recorded outcome, returned to the
                // caller as the failed record itself.
                tracing::warn!(
                    refund_id = %attempt.id,
                    error_code = ?outcome.error_code,
                    "gateway rejected refund"
                );
                queries::update_attempt_status(
                    &mut conn,
                    &attempt.id,
                    RefundStatus::Failed,
                    &StatusUpdate {
                        error_code: Some(
                            outcome.error_code.unwrap_or_else(|| "GatewayRejected".into()),
                        ),
                        error_message: outcome.error_message,
                        ..Default::default()
                    },
                )
            }
            Err(e) => {
                // Transport failure (timeout, connect error). Until a later
                // sync proves otherwise this is a failure, and it is
                // recorded as one before being surfaced.
                let write = queries::update_attempt_status(
                    &mut conn,
                    &attempt.id,
                    RefundStatus::Failed,
                    &StatusUpdate {
                        error_code: Some(e.code().to_string()),
                        error_message: Some(e.to_string()),
                        ..Default::default()
                    },
                );
                if let Err(write_err) = write {
                    tracing::error!(
                        refund_id = %attempt.id,
                        "failed to record gateway error in ledger: {}",
                        write_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Re-poll the gateway for a non-terminal attempt and correct local
    /// drift. Idempotent; a terminal record is returned untouched.
    pub async fn sync_status(&self, refund_id: &str) -> Result<RefundRecord> {
        let conn = self.db.get()?;
        let record =
            queries::get_refund_attempt(&conn, refund_id)?.or_not_found(msg::REFUND_NOT_FOUND)?;
        drop(conn);

        if record.status.is_terminal() {
            return Ok(record);
        }
        let Some(refund_ref) = record.gateway_refund_ref.clone() else {
            // The gateway never acknowledged this attempt; there is nothing
            // to poll. Resolution is the cancel path.
            tracing::warn!(refund_id = %record.id, "{}", msg::REFUND_NOT_POLLABLE);
            return Ok(record);
        };

        let poll = self
            .gateways
            .adapter(record.gateway)
            .poll_status(&refund_ref)
            .await?;

        let (new_status, update) = match poll.state {
            RefundPollState::Pending => {
                if record.status == RefundStatus::Initiated {
                    (RefundStatus::Processing, StatusUpdate::default())
                } else {
                    // Still pending at the gateway: no change to make.
                    return Ok(record);
                }
            }
            RefundPollState::Settled => {
                let settled = poll.settled_amount_minor;
                let status = if settled.map_or(false, |s| s < record.refund_amount_minor) {
                    RefundStatus::Partial
                } else {
                    RefundStatus::Completed
                };
                (
                    status,
                    StatusUpdate {
                        settled_amount_minor: settled,
                        ..Default::default()
                    },
                )
            }
            RefundPollState::Failed => (
                RefundStatus::Failed,
                StatusUpdate {
                    error_code: Some("GatewayReportedFailure".into()),
                    error_message: Some(format!(
                        "gateway reports refund state '{}'",
                        poll.gateway_state
                    )),
                    ..Default::default()
                },
            ),
        };

        let mut conn = self.db.get()?;
        queries::update_attempt_status(&mut conn, refund_id, new_status, &update)
    }

    /// Abandon an attempt the gateway never acknowledged. Only legal from
    /// `initiated`; once a refund was dispatched it can only resolve
    /// through sync.
    pub fn cancel_refund(&self, refund_id: &str, actor: &str) -> Result<RefundRecord> {
        let mut conn = self.db.get()?;
        let record =
            queries::get_refund_attempt(&conn, refund_id)?.or_not_found(msg::REFUND_NOT_FOUND)?;

        if record.status != RefundStatus::Initiated || record.gateway_refund_ref.is_some() {
            return Err(AppError::Conflict(msg::CANCEL_AFTER_DISPATCH.into()));
        }

        queries::update_attempt_status(
            &mut conn,
            refund_id,
            RefundStatus::Cancelled,
            &StatusUpdate {
                admin_notes: Some(format!("cancelled by {}", actor)),
                ..Default::default()
            },
        )
    }

    /// One pass of the drift-correction sweep: sync every pollable
    /// non-terminal attempt. Returns how many records changed state.
    pub async fn run_sync_sweep(&self, batch: i64) -> Result<usize> {
        let conn = self.db.get()?;
        let unsettled = queries::list_unsettled_refunds(&conn, batch)?;
        drop(conn);

        let mut corrected = 0;
        for record in unsettled {
            match self.sync_status(&record.id).await {
                Ok(updated) if updated.status != record.status => corrected += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(refund_id = %record.id, "sync sweep: {}", e);
                }
            }
        }
        Ok(corrected)
    }
}
