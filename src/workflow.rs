//! Refund workflow controller: the bounded operator-facing sequence
//! (gateway selection -> lookup -> confirmation -> result).
//!
//! This is presentation-layer session state, a simple linear progression
//! with no persistence of its own; everything durable lives in the ledger.
//! The in-flight guard here is a courtesy against duplicate clicks in one
//! process -- the authoritative double-refund guard is the ledger's
//! transactional amount check.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::engine::{Engine, RefundRequest};
use crate::error::{msg, AppError, Result};
use crate::gateways::Gateway;
use crate::models::{RefundRecord, TransactionLookupResult};

/// Position in the refund sequence. Steps only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    SelectGateway,
    LookupTransaction,
    Confirm,
    Done,
}

/// One operator's pass through the refund sequence.
pub struct RefundWorkflow {
    step: WorkflowStep,
    gateway: Option<Gateway>,
    lookup: Option<TransactionLookupResult>,
}

impl Default for RefundWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

impl RefundWorkflow {
    pub fn new() -> Self {
        Self {
            step: WorkflowStep::SelectGateway,
            gateway: None,
            lookup: None,
        }
    }

    pub fn step(&self) -> WorkflowStep {
        self.step
    }

    pub fn select_gateway(&mut self, gateway: Gateway) -> Result<()> {
        if self.step != WorkflowStep::SelectGateway {
            return Err(AppError::Conflict("gateway already selected".into()));
        }
        self.gateway = Some(gateway);
        self.step = WorkflowStep::LookupTransaction;
        Ok(())
    }

    pub async fn lookup(
        &mut self,
        engine: &Engine,
        transaction_ref: &str,
    ) -> Result<&TransactionLookupResult> {
        if self.step != WorkflowStep::LookupTransaction {
            return Err(AppError::Conflict(
                "lookup requires a selected gateway and no prior lookup".into(),
            ));
        }
        let gateway = self
            .gateway
            .ok_or_else(|| AppError::Internal("workflow step advanced without gateway".into()))?;

        let result = engine.lookup(gateway, transaction_ref).await?;
        self.step = WorkflowStep::Confirm;
        Ok(self.lookup.insert(result))
    }

    /// The confirmation step: dispatch the refund. Consumes the remaining
    /// sequence; whatever the outcome, this workflow is done and a fresh
    /// one is needed for another attempt.
    pub async fn confirm(
        &mut self,
        engine: &Engine,
        amount_minor: Option<i64>,
        reason: String,
        actor: String,
        admin_notes: Option<String>,
    ) -> Result<RefundRecord> {
        if self.step != WorkflowStep::Confirm {
            return Err(AppError::Conflict(
                "confirmation requires a completed lookup".into(),
            ));
        }
        let gateway = self
            .gateway
            .ok_or_else(|| AppError::Internal("workflow step advanced without gateway".into()))?;
        let lookup = self
            .lookup
            .as_ref()
            .ok_or_else(|| AppError::Internal("workflow step advanced without lookup".into()))?;

        self.step = WorkflowStep::Done;

        if !lookup.can_refund {
            return Err(AppError::Conflict(msg::NOT_REFUNDABLE.into()));
        }

        engine
            .process_refund(RefundRequest {
                gateway,
                transaction_ref: lookup.transaction_ref.clone(),
                amount_minor,
                reason,
                actor,
                admin_notes,
            })
            .await
    }
}

/// Process-wide set of refund attempts currently in flight, keyed by
/// gateway + transaction ref. Refuses a second concurrent attempt for the
/// same reference.
#[derive(Clone, Default)]
pub struct InFlightRefunds {
    inner: Arc<Mutex<HashSet<(Gateway, String)>>>,
}

impl InFlightRefunds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a transaction ref for the duration of the returned guard.
    pub fn begin(&self, gateway: Gateway, transaction_ref: &str) -> Result<InFlightGuard> {
        let key = (gateway, transaction_ref.to_string());
        let mut set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(key.clone()) {
            return Err(AppError::Conflict(msg::REFUND_IN_FLIGHT.into()));
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.inner),
            key,
        })
    }
}

/// Releases the in-flight claim on drop, so the claim survives exactly as
/// long as the attempt does -- including early error returns.
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<Mutex<HashSet<(Gateway, String)>>>,
    key: (Gateway, String),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}
