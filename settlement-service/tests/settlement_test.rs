//! End-to-end settlement tests over the in-memory store: allocation,
//! balance movement, receipts and notifications.

mod common;

use common::Harness;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use service_core::error::AppError;
use settlement_service::models::InvoiceStatus;
use settlement_service::services::{IngestOutcome, SettlementStore};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn exact_payment_settles_single_invoice() {
    let h = Harness::new();
    let customer = h.customer("Amina Odhiambo", "254700000001").await;
    let invoice = h.invoice(customer.customer_id, dec!(1000)).await;
    assert_eq!(h.balance_of(customer.customer_id).await, dec!(1000));

    let outcome = h
        .ingestor
        .ingest(h.event("254700000001", dec!(1000), "MPESA-001"))
        .await
        .expect("ingest");

    let (payment, receipt, allocations, new_balance) = match outcome {
        IngestOutcome::Settled {
            payment,
            receipt,
            allocations,
            new_balance,
        } => (payment, receipt, allocations, new_balance),
        other => panic!("expected Settled, got {:?}", other),
    };

    assert_eq!(new_balance, Decimal::ZERO);
    assert_eq!(h.balance_of(customer.customer_id).await, Decimal::ZERO);

    let invoice = h.invoice_state(invoice.invoice_id).await;
    assert_eq!(invoice.amount_paid, dec!(1000));
    assert_eq!(
        InvoiceStatus::from_string(&invoice.status),
        InvoiceStatus::Paid
    );

    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].invoice_id, Some(invoice.invoice_id));
    assert_eq!(allocations[0].amount, dec!(1000));

    assert!(payment.receipted);
    assert_eq!(payment.receipt_id, Some(receipt.receipt_id));
    assert_eq!(receipt.amount, dec!(1000));
    assert!(receipt.receipt_number.starts_with("RCT-"));
}

#[tokio::test]
async fn partial_payment_leaves_invoice_partially_paid() {
    let h = Harness::new();
    let customer = h.customer("Brian Mwangi", "254700000002").await;
    let invoice = h.invoice(customer.customer_id, dec!(1000)).await;

    let outcome = h
        .ingestor
        .ingest(h.event("254700000002", dec!(600), "MPESA-002"))
        .await
        .expect("ingest");
    assert!(matches!(outcome, IngestOutcome::Settled { .. }));

    let invoice = h.invoice_state(invoice.invoice_id).await;
    assert_eq!(invoice.amount_paid, dec!(600));
    assert_eq!(
        InvoiceStatus::from_string(&invoice.status),
        InvoiceStatus::PartiallyPaid
    );
    assert_eq!(h.balance_of(customer.customer_id).await, dec!(400));
}

#[tokio::test]
async fn overpayment_settles_invoices_and_holds_credit() {
    let h = Harness::new();
    let customer = h.customer("Cynthia Wanjiru", "254700000003").await;
    let first = h.invoice(customer.customer_id, dec!(500)).await;
    let second = h.invoice(customer.customer_id, dec!(300)).await;

    let outcome = h
        .ingestor
        .ingest(h.event("254700000003", dec!(1000), "MPESA-003"))
        .await
        .expect("ingest");

    let allocations = match outcome {
        IngestOutcome::Settled { allocations, .. } => allocations,
        other => panic!("expected Settled, got {:?}", other),
    };

    for invoice_id in [first.invoice_id, second.invoice_id] {
        let invoice = h.invoice_state(invoice_id).await;
        assert_eq!(
            InvoiceStatus::from_string(&invoice.status),
            InvoiceStatus::Paid
        );
        assert_eq!(invoice.amount_paid, invoice.invoice_amount);
    }

    // 500 + 300 applied, 200 held as credit.
    assert_eq!(allocations.len(), 3);
    let credit: Vec<_> = allocations.iter().filter(|a| a.invoice_id.is_none()).collect();
    assert_eq!(credit.len(), 1);
    assert_eq!(credit[0].amount, dec!(200));
    assert_eq!(h.balance_of(customer.customer_id).await, dec!(-200));
}

#[tokio::test]
async fn payment_with_no_open_invoices_becomes_credit() {
    let h = Harness::new();
    let customer = h.customer("David Otieno", "254700000004").await;

    let outcome = h
        .ingestor
        .ingest(h.event("254700000004", dec!(750), "MPESA-004"))
        .await
        .expect("ingest");

    let allocations = match outcome {
        IngestOutcome::Settled { allocations, .. } => allocations,
        other => panic!("expected Settled, got {:?}", other),
    };
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].invoice_id, None);
    assert_eq!(allocations[0].amount, dec!(750));
    assert_eq!(h.balance_of(customer.customer_id).await, dec!(-750));
}

#[tokio::test]
async fn oldest_invoice_is_settled_first() {
    let h = Harness::new();
    let customer = h.customer("Esther Njeri", "254700000005").await;
    let older = h.invoice(customer.customer_id, dec!(400)).await;
    let newer = h.invoice(customer.customer_id, dec!(400)).await;

    h.ingestor
        .ingest(h.event("254700000005", dec!(500), "MPESA-005"))
        .await
        .expect("ingest");

    let older = h.invoice_state(older.invoice_id).await;
    let newer = h.invoice_state(newer.invoice_id).await;
    assert_eq!(
        InvoiceStatus::from_string(&older.status),
        InvoiceStatus::Paid
    );
    assert_eq!(older.amount_paid, dec!(400));
    assert_eq!(
        InvoiceStatus::from_string(&newer.status),
        InvoiceStatus::PartiallyPaid
    );
    assert_eq!(newer.amount_paid, dec!(100));
}

#[tokio::test]
async fn payment_covering_two_of_three_invoices_leaves_newest_untouched() {
    let h = Harness::new();
    let customer = h.customer("Felix Maina", "254700000011").await;
    let first = h.invoice(customer.customer_id, dec!(600)).await;
    let second = h.invoice(customer.customer_id, dec!(200)).await;
    let third = h.invoice(customer.customer_id, dec!(900)).await;

    h.ingestor
        .ingest(h.event("254700000011", dec!(800), "MPESA-012"))
        .await
        .expect("ingest");

    for invoice_id in [first.invoice_id, second.invoice_id] {
        let invoice = h.invoice_state(invoice_id).await;
        assert_eq!(
            InvoiceStatus::from_string(&invoice.status),
            InvoiceStatus::Paid
        );
    }
    let third = h.invoice_state(third.invoice_id).await;
    assert_eq!(
        InvoiceStatus::from_string(&third.status),
        InvoiceStatus::Unpaid
    );
    assert_eq!(third.amount_paid, Decimal::ZERO);
}

#[tokio::test]
async fn settlement_sends_one_notification() {
    let h = Harness::new();
    let customer = h.customer("Faith Chebet", "254700000006").await;
    h.invoice(customer.customer_id, dec!(1000)).await;

    h.ingestor
        .ingest(h.event("254700000006", dec!(1000), "MPESA-006"))
        .await
        .expect("ingest");

    assert_eq!(h.gateway.sent_count(), 1);
    let sms = h.gateway.last_message().expect("message recorded");
    assert_eq!(sms.to, "254700000006");
    assert!(sms.body.contains("RCT-"));
}

#[tokio::test]
async fn notification_failure_does_not_undo_settlement() {
    let h = Harness::new();
    let customer = h.customer("George Kiptoo", "254700000007").await;
    h.invoice(customer.customer_id, dec!(1000)).await;
    h.gateway.fail.store(true, Ordering::SeqCst);

    let outcome = h
        .ingestor
        .ingest(h.event("254700000007", dec!(1000), "MPESA-007"))
        .await
        .expect("ingest must not propagate gateway errors");

    assert!(matches!(outcome, IngestOutcome::Settled { .. }));
    assert_eq!(h.balance_of(customer.customer_id).await, Decimal::ZERO);
    assert_eq!(h.gateway.sent_count(), 0);
}

#[tokio::test]
async fn unmatched_payer_is_held_for_reconciliation() {
    let h = Harness::new();
    let customer = h.customer("Hannah Akinyi", "254700000008").await;
    h.invoice(customer.customer_id, dec!(1000)).await;

    let outcome = h
        .ingestor
        .ingest(h.event("254799999999", dec!(500), "MPESA-008"))
        .await
        .expect("ingest");

    let payment = match outcome {
        IngestOutcome::Unmatched { payment } => payment,
        other => panic!("expected Unmatched, got {:?}", other),
    };
    assert_eq!(payment.customer_id, None);
    assert!(!payment.receipted);

    // No financial movement and no notification.
    assert_eq!(h.balance_of(customer.customer_id).await, dec!(1000));
    assert_eq!(h.gateway.sent_count(), 0);

    let unmatched = h
        .store
        .list_unmatched_payments(h.tenant_id)
        .await
        .expect("list unmatched");
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].payment_id, payment.payment_id);
}

#[tokio::test]
async fn invalid_events_are_rejected_without_side_effects() {
    let h = Harness::new();
    let customer = h.customer("Irene Wambui", "254700000009").await;
    h.invoice(customer.customer_id, dec!(1000)).await;

    let zero = h.event("254700000009", dec!(0), "MPESA-009");
    let negative = h.event("254700000009", dec!(-100), "MPESA-010");
    let blank_txn = h.event("254700000009", dec!(100), "");

    for event in [zero, negative, blank_txn] {
        let err = h.ingestor.ingest(event).await.expect_err("must reject");
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    assert_eq!(h.balance_of(customer.customer_id).await, dec!(1000));
    let unmatched = h
        .store
        .list_unmatched_payments(h.tenant_id)
        .await
        .expect("list unmatched");
    assert!(unmatched.is_empty());
}

#[tokio::test]
async fn zero_and_negative_invoice_amounts_are_rejected() {
    let h = Harness::new();
    let customer = h.customer("Kennedy Ouma", "254700000012").await;

    // A zero-amount invoice would stay open forever: the allocator never
    // applies anything to an invoice with nothing due.
    for amount in [dec!(0), dec!(-250)] {
        let err = h
            .store
            .issue_invoice(&settlement_service::models::CreateInvoice {
                tenant_id: h.tenant_id,
                customer_id: customer.customer_id,
                description: None,
                invoice_amount: amount,
            })
            .await
            .expect_err("non-positive invoice amount must be rejected");
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    assert_eq!(h.balance_of(customer.customer_id).await, Decimal::ZERO);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let h = Harness::new();
    let customer = h.customer("Joseph Baraka", "254700000010").await;
    h.invoice(customer.customer_id, dec!(1000)).await;

    // Same MSISDN under another tenant must not match this tenant's customer.
    let mut foreign = h.event("254700000010", dec!(1000), "MPESA-011");
    foreign.tenant_id = uuid::Uuid::new_v4();

    let outcome = h.ingestor.ingest(foreign).await.expect("ingest");
    assert!(matches!(outcome, IngestOutcome::Unmatched { .. }));
    assert_eq!(h.balance_of(customer.customer_id).await, dec!(1000));
}
