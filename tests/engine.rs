//! Reconciliation engine tests: one ledger record per attempt, the
//! over-refund cap, and the unconditional outcome write.

mod common;

use common::*;

// ============ Full-refund happy path ============

#[tokio::test]
async fn test_synchronous_full_refund_completes() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_ABC123", 150000, "inr");
    h.insert_local_transaction(Gateway::Razorpay, "pay_ABC123", 150000, "inr");
    h.razorpay.set_refund_behavior(MockRefundBehavior::AcceptSettled {
        refund_ref: "rfnd_001".to_string(),
        settled_minor: Some(150000),
    });

    let record = h
        .engine
        .process_refund(h.razorpay_request("pay_ABC123", Some(150000)))
        .await
        .expect("Refund should succeed");

    assert_eq!(record.status, RefundStatus::Completed);
    assert_eq!(record.refund_amount_minor, 150000);
    assert_eq!(record.original_amount_minor, 150000);
    assert_eq!(record.gateway_refund_ref.as_deref(), Some("rfnd_001"));
    assert_eq!(record.settled_amount_minor, Some(150000));
    assert_eq!(record.currency, "inr");
    assert!(record.local_transaction_id.is_some());
    assert!(record.processed_at.is_some());
    assert!(record.completed_at.is_some());
    assert!(record.processed_at.unwrap() >= record.initiated_at);
}

#[tokio::test]
async fn test_omitted_amount_refunds_full_original() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_FULL", 4200, "inr");
    h.razorpay.set_refund_behavior(MockRefundBehavior::AcceptSettled {
        refund_ref: "rfnd_full".to_string(),
        settled_minor: None,
    });

    let record = h
        .engine
        .process_refund(h.razorpay_request("pay_FULL", None))
        .await
        .expect("Refund should succeed");

    assert_eq!(record.refund_amount_minor, 4200);
    assert_eq!(record.status, RefundStatus::Completed);
    // The adapter was asked for the full original amount
    assert_eq!(
        h.razorpay.refund_calls.lock().unwrap().as_slice(),
        &[("pay_FULL".to_string(), 4200)]
    );
}

// ============ Over-refund protection ============

#[tokio::test]
async fn test_second_refund_exceeding_original_rejected() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_ABC123", 150000, "inr");
    h.razorpay.set_refund_behavior(MockRefundBehavior::AcceptSettled {
        refund_ref: "rfnd_001".to_string(),
        settled_minor: Some(150000),
    });

    h.engine
        .process_refund(h.razorpay_request("pay_ABC123", Some(150000)))
        .await
        .expect("First refund should succeed");

    // 150000 + 1 > 150000
    let err = h
        .engine
        .process_refund(h.razorpay_request("pay_ABC123", Some(1)))
        .await
        .expect_err("Second refund must be rejected");

    assert!(matches!(err, AppError::OverRefund(_)), "got {:?}", err);
    // The rejection happened before any ledger row or gateway call
    assert_eq!(h.attempts_for(Gateway::Razorpay, "pay_ABC123").len(), 1);
    assert_eq!(h.razorpay.refund_call_count(), 1);
}

#[tokio::test]
async fn test_in_flight_attempt_reserves_its_amount() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_SPLIT", 150000, "inr");
    h.razorpay.set_refund_behavior(MockRefundBehavior::AcceptPending {
        refund_ref: "rfnd_pending".to_string(),
    });

    // 100000 of 150000 now pending at the gateway
    let first = h
        .engine
        .process_refund(h.razorpay_request("pay_SPLIT", Some(100000)))
        .await
        .expect("First refund should be accepted");
    assert_eq!(first.status, RefundStatus::Processing);

    // 100000 reserved + 60000 requested > 150000
    let err = h
        .engine
        .process_refund(h.razorpay_request("pay_SPLIT", Some(60000)))
        .await
        .expect_err("Reservation must block the second refund");
    assert!(matches!(err, AppError::OverRefund(_)));

    // The remaining 50000 still fits
    h.razorpay.set_refund_behavior(MockRefundBehavior::AcceptSettled {
        refund_ref: "rfnd_rest".to_string(),
        settled_minor: Some(50000),
    });
    let second = h
        .engine
        .process_refund(h.razorpay_request("pay_SPLIT", Some(50000)))
        .await
        .expect("Refund within the remainder should succeed");
    assert_eq!(second.status, RefundStatus::Completed);
}

#[tokio::test]
async fn test_failed_attempts_release_their_reservation() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_RETRY", 5000, "inr");
    h.razorpay.set_refund_behavior(MockRefundBehavior::Timeout);

    let err = h
        .engine
        .process_refund(h.razorpay_request("pay_RETRY", Some(5000)))
        .await
        .expect_err("Timeout surfaces as an error");
    assert!(matches!(err, AppError::GatewayUnavailable(_)));

    // The failed attempt does not count toward the cap; a fresh attempt
    // for the full amount is allowed.
    h.razorpay.set_refund_behavior(MockRefundBehavior::AcceptSettled {
        refund_ref: "rfnd_retry".to_string(),
        settled_minor: Some(5000),
    });
    let record = h
        .engine
        .process_refund(h.razorpay_request("pay_RETRY", Some(5000)))
        .await
        .expect("Retry after failure should succeed");
    assert_eq!(record.status, RefundStatus::Completed);

    assert_eq!(h.attempts_for(Gateway::Razorpay, "pay_RETRY").len(), 2);
}

// ============ Lookup gating: no record without a real gateway target ============

#[tokio::test]
async fn test_lookup_miss_creates_no_record() {
    let h = setup_engine();

    let err = h
        .engine
        .process_refund(RefundRequest {
            gateway: Gateway::Paypal,
            transaction_ref: "not-a-real-id".to_string(),
            amount_minor: Some(1000),
            reason: "customer request".to_string(),
            actor: "admin@example.com".to_string(),
            admin_notes: None,
        })
        .await
        .expect_err("Unknown transaction must be rejected");

    assert!(matches!(err, AppError::NotFoundAtGateway(_)), "got {:?}", err);
    assert!(h.attempts_for(Gateway::Paypal, "not-a-real-id").is_empty());
    assert_eq!(h.paypal.refund_call_count(), 0);
}

#[tokio::test]
async fn test_locally_recorded_but_missing_at_gateway() {
    let h = setup_engine();
    // Recorded in the internal ledger, unknown to the gateway
    h.insert_local_transaction(Gateway::Razorpay, "pay_GHOST", 9900, "inr");

    let lookup = h
        .engine
        .lookup(Gateway::Razorpay, "pay_GHOST")
        .await
        .expect("Lookup itself should succeed");
    assert_eq!(lookup.status, LookupStatus::NotInGateway);
    assert!(!lookup.can_refund);

    let err = h
        .engine
        .process_refund(h.razorpay_request("pay_GHOST", None))
        .await
        .expect_err("No gateway target means no attempt");
    assert!(matches!(err, AppError::NotFoundAtGateway(_)));
    assert!(h.attempts_for(Gateway::Razorpay, "pay_GHOST").is_empty());
}

#[tokio::test]
async fn test_lookup_relates_gateway_to_local_ledger() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_KNOWN", 7500, "inr");
    h.razorpay.add_payment("pay_STRANGER", 1100, "inr");
    h.insert_local_transaction(Gateway::Razorpay, "pay_KNOWN", 7500, "inr");

    let verified = h.engine.lookup(Gateway::Razorpay, "pay_KNOWN").await.unwrap();
    assert_eq!(verified.status, LookupStatus::Verified);
    assert!(verified.local_transaction.is_some());

    let unrecorded = h
        .engine
        .lookup(Gateway::Razorpay, "pay_STRANGER")
        .await
        .unwrap();
    assert_eq!(unrecorded.status, LookupStatus::Unrecorded);
    assert!(unrecorded.local_transaction.is_none());
}

#[tokio::test]
async fn test_unrefundable_transaction_rejected_before_ledger_write() {
    let h = setup_engine();
    h.razorpay
        .add_unrefundable_payment("pay_AUTH_ONLY", 3000, "inr");

    let err = h
        .engine
        .process_refund(h.razorpay_request("pay_AUTH_ONLY", None))
        .await
        .expect_err("Unrefundable transaction must be rejected");
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(h.attempts_for(Gateway::Razorpay, "pay_AUTH_ONLY").is_empty());
}

// ============ The unconditional outcome write ============

#[tokio::test]
async fn test_timeout_still_writes_failed_record() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_TIMEOUT", 8800, "inr");
    h.razorpay.set_refund_behavior(MockRefundBehavior::Timeout);

    let err = h
        .engine
        .process_refund(h.razorpay_request("pay_TIMEOUT", Some(8800)))
        .await
        .expect_err("Timeout surfaces as GatewayUnavailable");
    assert!(matches!(err, AppError::GatewayUnavailable(_)));

    let attempts = h.attempts_for(Gateway::Razorpay, "pay_TIMEOUT");
    assert_eq!(attempts.len(), 1);
    let record = &attempts[0];
    assert_eq!(record.status, RefundStatus::Failed);
    assert_eq!(record.error_code.as_deref(), Some("GatewayUnavailable"));
    assert!(record.error_message.is_some());
    assert!(record.gateway_refund_ref.is_none());
}

#[tokio::test]
async fn test_gateway_rejection_returns_failed_record() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_REJECT", 2000, "inr");
    h.razorpay.set_refund_behavior(MockRefundBehavior::Reject {
        code: "BAD_REQUEST_ERROR".to_string(),
        message: "refund window elapsed".to_string(),
    });

    // A gateway rejection is a recorded outcome, not a transport error
    let record = h
        .engine
        .process_refund(h.razorpay_request("pay_REJECT", Some(2000)))
        .await
        .expect("Rejection is returned as the failed record");

    assert_eq!(record.status, RefundStatus::Failed);
    assert_eq!(record.error_code.as_deref(), Some("BAD_REQUEST_ERROR"));
    assert_eq!(record.error_message.as_deref(), Some("refund window elapsed"));
    assert!(record.gateway_refund_ref.is_none());
}

#[tokio::test]
async fn test_exactly_one_record_per_attempt() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_MANY", 100000, "inr");

    // failure, failure, success: three attempts, three records
    h.razorpay.set_refund_behavior(MockRefundBehavior::Timeout);
    let _ = h
        .engine
        .process_refund(h.razorpay_request("pay_MANY", Some(30000)))
        .await;

    h.razorpay.set_refund_behavior(MockRefundBehavior::Reject {
        code: "SERVER_BUSY".to_string(),
        message: "try again".to_string(),
    });
    let _ = h
        .engine
        .process_refund(h.razorpay_request("pay_MANY", Some(30000)))
        .await;

    h.razorpay.set_refund_behavior(MockRefundBehavior::AcceptSettled {
        refund_ref: "rfnd_many".to_string(),
        settled_minor: Some(30000),
    });
    let _ = h
        .engine
        .process_refund(h.razorpay_request("pay_MANY", Some(30000)))
        .await;

    let attempts = h.attempts_for(Gateway::Razorpay, "pay_MANY");
    assert_eq!(attempts.len(), 3);
    let failed = attempts
        .iter()
        .filter(|r| r.status == RefundStatus::Failed)
        .count();
    assert_eq!(failed, 2);
}

#[tokio::test]
async fn test_short_synchronous_settle_is_partial() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_SHORT", 50000, "inr");
    h.razorpay.set_refund_behavior(MockRefundBehavior::AcceptSettled {
        refund_ref: "rfnd_short".to_string(),
        settled_minor: Some(40000),
    });

    let record = h
        .engine
        .process_refund(h.razorpay_request("pay_SHORT", Some(50000)))
        .await
        .expect("Refund should be accepted");

    assert_eq!(record.status, RefundStatus::Partial);
    assert_eq!(record.refund_amount_minor, 50000);
    assert_eq!(record.settled_amount_minor, Some(40000));
}

// ============ Amount validation ============

#[tokio::test]
async fn test_zero_and_negative_amounts_rejected() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_AMT", 1000, "inr");

    for bad in [0, -100] {
        let err = h
            .engine
            .process_refund(h.razorpay_request("pay_AMT", Some(bad)))
            .await
            .expect_err("Non-positive amount must be rejected");
        assert!(
            matches!(err, AppError::BadRequest(_) | AppError::UnitMismatch(_)),
            "got {:?}",
            err
        );
    }
    assert!(h.attempts_for(Gateway::Razorpay, "pay_AMT").is_empty());
}

// ============ Cancellation ============

#[tokio::test]
async fn test_cancel_only_from_initiated() {
    let h = setup_engine();

    // A stale `initiated` row, as left by a crash between the attempt
    // insert and the outcome write.
    let mut conn = h.pool.get().unwrap();
    let stale = queries::create_attempt(
        &mut conn,
        &CreateRefundAttempt {
            gateway: Gateway::Razorpay,
            gateway_transaction_ref: "pay_STALE".to_string(),
            refund_amount_minor: 1200,
            original_amount_minor: 1200,
            currency: "inr".to_string(),
            initiated_by: "admin@example.com".to_string(),
            reason: "customer request".to_string(),
            admin_notes: None,
            local_transaction_id: None,
        },
    )
    .unwrap();
    drop(conn);

    let cancelled = h
        .engine
        .cancel_refund(&stale.id, "ops@example.com")
        .expect("Cancel from initiated should succeed");
    assert_eq!(cancelled.status, RefundStatus::Cancelled);
    assert_eq!(
        cancelled.admin_notes.as_deref(),
        Some("cancelled by ops@example.com")
    );

    // Cancelling again is a conflict: the record is terminal.
    let err = h
        .engine
        .cancel_refund(&stale.id, "ops@example.com")
        .expect_err("Cancel of a terminal record must fail");
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_cancel_rejected_after_gateway_dispatch() {
    let h = setup_engine();
    h.razorpay.add_payment("pay_SENT", 6000, "inr");
    h.razorpay.set_refund_behavior(MockRefundBehavior::AcceptPending {
        refund_ref: "rfnd_sent".to_string(),
    });

    let record = h
        .engine
        .process_refund(h.razorpay_request("pay_SENT", None))
        .await
        .unwrap();
    assert_eq!(record.status, RefundStatus::Processing);

    let err = h
        .engine
        .cancel_refund(&record.id, "ops@example.com")
        .expect_err("A dispatched refund cannot be cancelled");
    assert!(matches!(err, AppError::Conflict(_)));
}
