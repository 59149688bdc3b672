//! Test utilities and fixtures for recoup integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub use recoup::db::{init_db, queries, DbPool};
pub use recoup::engine::{Engine, RefundRequest};
pub use recoup::error::{AppError, Result};
pub use recoup::gateways::{
    Gateway, GatewayAdapter, GatewayRegistry, RefundOutcome, RefundPoll, RefundPollState,
};
pub use recoup::models::*;

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Create a pooled in-memory database (shared cache, unique per call) with
/// schema initialized. The pool keeps the database alive.
pub fn setup_test_pool() -> DbPool {
    let name = format!(
        "file:recoup_test_{}?mode=memory&cache=shared",
        uuid::Uuid::new_v4().as_simple()
    );
    let manager = SqliteConnectionManager::file(name);
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .expect("Failed to create test pool");
    {
        let conn = pool.get().expect("Failed to get test connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    pool
}

/// How the mock gateway answers a refund initiation.
#[derive(Debug, Clone)]
pub enum MockRefundBehavior {
    /// Accepted and settled synchronously (optionally short of the request)
    AcceptSettled {
        refund_ref: String,
        settled_minor: Option<i64>,
    },
    /// Accepted, settlement pending
    AcceptPending { refund_ref: String },
    /// Gateway looked at the request and rejected it
    Reject { code: String, message: String },
    /// Transport-level failure (timeout)
    Timeout,
}

/// A payment the mock gateway knows about.
#[derive(Debug, Clone)]
pub struct MockPayment {
    pub amount_minor: i64,
    pub currency: String,
    pub can_refund: bool,
}

/// Scriptable in-memory gateway adapter. Lookups answer from a payment
/// table, refunds follow the configured behavior, polls answer from a
/// refund-state table.
pub struct MockGateway {
    gateway: Gateway,
    payments: Mutex<HashMap<String, MockPayment>>,
    refund_behavior: Mutex<MockRefundBehavior>,
    poll_states: Mutex<HashMap<String, (RefundPollState, Option<i64>)>>,
    /// (refund_target_ref, amount_minor) per initiate_refund call
    pub refund_calls: Mutex<Vec<(String, i64)>>,
}

impl MockGateway {
    pub fn new(gateway: Gateway) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            payments: Mutex::new(HashMap::new()),
            refund_behavior: Mutex::new(MockRefundBehavior::Reject {
                code: "UNCONFIGURED".into(),
                message: "mock gateway has no refund behavior configured".into(),
            }),
            poll_states: Mutex::new(HashMap::new()),
            refund_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn add_payment(&self, provider_ref: &str, amount_minor: i64, currency: &str) {
        self.payments.lock().unwrap().insert(
            provider_ref.to_string(),
            MockPayment {
                amount_minor,
                currency: currency.to_string(),
                can_refund: true,
            },
        );
    }

    pub fn add_unrefundable_payment(&self, provider_ref: &str, amount_minor: i64, currency: &str) {
        self.payments.lock().unwrap().insert(
            provider_ref.to_string(),
            MockPayment {
                amount_minor,
                currency: currency.to_string(),
                can_refund: false,
            },
        );
    }

    pub fn set_refund_behavior(&self, behavior: MockRefundBehavior) {
        *self.refund_behavior.lock().unwrap() = behavior;
    }

    pub fn set_poll_state(&self, refund_ref: &str, state: RefundPollState, settled: Option<i64>) {
        self.poll_states
            .lock()
            .unwrap()
            .insert(refund_ref.to_string(), (state, settled));
    }

    pub fn refund_call_count(&self) -> usize {
        self.refund_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GatewayAdapter for MockGateway {
    async fn lookup(&self, transaction_ref: &str) -> Result<TransactionLookupResult> {
        let payments = self.payments.lock().unwrap();
        match payments.get(transaction_ref) {
            Some(payment) => Ok(TransactionLookupResult {
                gateway: self.gateway,
                transaction_ref: transaction_ref.to_string(),
                refund_target_ref: Some(transaction_ref.to_string()),
                ref_kind: Some(RefKind::Payment),
                status: LookupStatus::Unrecorded,
                can_refund: payment.can_refund,
                original_amount_minor: Some(payment.amount_minor),
                currency: Some(payment.currency.clone()),
                gateway_state: Some("captured".to_string()),
                local_transaction: None,
                already_refunded_minor: 0,
            }),
            None => Ok(TransactionLookupResult::miss(self.gateway, transaction_ref)),
        }
    }

    async fn initiate_refund(
        &self,
        refund_target_ref: &str,
        amount_minor: i64,
        _currency: &str,
        _note: &str,
    ) -> Result<RefundOutcome> {
        self.refund_calls
            .lock()
            .unwrap()
            .push((refund_target_ref.to_string(), amount_minor));

        let behavior = self.refund_behavior.lock().unwrap().clone();
        match behavior {
            MockRefundBehavior::AcceptSettled {
                refund_ref,
                settled_minor,
            } => Ok(RefundOutcome {
                accepted: true,
                gateway_refund_ref: Some(refund_ref),
                state: Some(RefundPollState::Settled),
                settled_amount_minor: settled_minor.or(Some(amount_minor)),
                error_code: None,
                error_message: None,
            }),
            MockRefundBehavior::AcceptPending { refund_ref } => Ok(RefundOutcome {
                accepted: true,
                gateway_refund_ref: Some(refund_ref),
                state: Some(RefundPollState::Pending),
                settled_amount_minor: None,
                error_code: None,
                error_message: None,
            }),
            MockRefundBehavior::Reject { code, message } => Ok(RefundOutcome {
                accepted: false,
                gateway_refund_ref: None,
                state: None,
                settled_amount_minor: None,
                error_code: Some(code),
                error_message: Some(message),
            }),
            MockRefundBehavior::Timeout => Err(AppError::GatewayUnavailable(format!(
                "{}: operation timed out",
                self.gateway
            ))),
        }
    }

    async fn poll_status(&self, gateway_refund_ref: &str) -> Result<RefundPoll> {
        let states = self.poll_states.lock().unwrap();
        match states.get(gateway_refund_ref) {
            Some((state, settled)) => Ok(RefundPoll {
                state: *state,
                settled_amount_minor: *settled,
                gateway_state: format!("{:?}", state).to_lowercase(),
            }),
            None => Err(AppError::NotFoundAtGateway(format!(
                "mock gateway has no refund {}",
                gateway_refund_ref
            ))),
        }
    }
}

/// Engine wired to one scriptable mock per gateway, over a pooled test db.
pub struct TestHarness {
    pub pool: DbPool,
    pub engine: Engine,
    pub paypal: Arc<MockGateway>,
    pub razorpay: Arc<MockGateway>,
}

pub fn setup_engine() -> TestHarness {
    let pool = setup_test_pool();
    let paypal = MockGateway::new(Gateway::Paypal);
    let razorpay = MockGateway::new(Gateway::Razorpay);
    let registry = GatewayRegistry::new(paypal.clone(), razorpay.clone());
    let engine = Engine::new(pool.clone(), registry);
    TestHarness {
        pool,
        engine,
        paypal,
        razorpay,
    }
}

impl TestHarness {
    /// Record a payment in the local ledger (the internal system of record
    /// the engine reads from).
    pub fn insert_local_transaction(
        &self,
        gateway: Gateway,
        provider_ref: &str,
        amount_minor: i64,
        currency: &str,
    ) -> LocalTransaction {
        let conn = self.pool.get().expect("Failed to get connection");
        queries::insert_transaction(
            &conn,
            &CreateLocalTransaction {
                gateway,
                provider_ref: provider_ref.to_string(),
                amount_minor,
                currency: currency.to_string(),
                customer_email: Some("customer@example.com".to_string()),
            },
        )
        .expect("Failed to insert local transaction")
    }

    pub fn attempts_for(&self, gateway: Gateway, transaction_ref: &str) -> Vec<RefundRecord> {
        let conn = self.pool.get().expect("Failed to get connection");
        queries::find_attempts_by_transaction(&conn, gateway, transaction_ref)
            .expect("Failed to list attempts")
    }

    /// A standard refund request against the mock Razorpay gateway.
    pub fn razorpay_request(&self, transaction_ref: &str, amount_minor: Option<i64>) -> RefundRequest {
        RefundRequest {
            gateway: Gateway::Razorpay,
            transaction_ref: transaction_ref.to_string(),
            amount_minor,
            reason: "customer request".to_string(),
            actor: "admin@example.com".to_string(),
            admin_notes: None,
        }
    }
}
