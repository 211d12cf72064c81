//! Idempotency guard tests: repeated and racing submissions of the same
//! external transaction id settle exactly once.

mod common;

use common::Harness;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settlement_service::services::{IngestOutcome, SettlementStore};

#[tokio::test]
async fn duplicate_event_is_ignored() {
    let h = Harness::new();
    let customer = h.customer("Kevin Omondi", "254711000001").await;
    h.invoice(customer.customer_id, dec!(1000)).await;

    let first = h
        .ingestor
        .ingest(h.event("254711000001", dec!(1000), "MPESA-100"))
        .await
        .expect("first ingest");
    let settled_id = match first {
        IngestOutcome::Settled { ref payment, .. } => payment.payment_id,
        ref other => panic!("expected Settled, got {:?}", other),
    };

    let second = h
        .ingestor
        .ingest(h.event("254711000001", dec!(1000), "MPESA-100"))
        .await
        .expect("second ingest");
    match second {
        IngestOutcome::Duplicate { payment } => {
            assert_eq!(payment.payment_id, settled_id);
        }
        other => panic!("expected Duplicate, got {:?}", other),
    }

    // The replay moved no money and issued no second receipt.
    assert_eq!(h.balance_of(customer.customer_id).await, Decimal::ZERO);
    assert_eq!(h.gateway.sent_count(), 1);
}

#[tokio::test]
async fn duplicate_of_unmatched_payment_is_also_ignored() {
    let h = Harness::new();

    let first = h
        .ingestor
        .ingest(h.event("254799999998", dec!(200), "MPESA-101"))
        .await
        .expect("first ingest");
    let unmatched_id = match first {
        IngestOutcome::Unmatched { ref payment, .. } => payment.payment_id,
        ref other => panic!("expected Unmatched, got {:?}", other),
    };

    let second = h
        .ingestor
        .ingest(h.event("254799999998", dec!(200), "MPESA-101"))
        .await
        .expect("second ingest");
    match second {
        IngestOutcome::Duplicate { payment } => {
            assert_eq!(payment.payment_id, unmatched_id);
        }
        other => panic!("expected Duplicate, got {:?}", other),
    }

    let unmatched = h
        .store
        .list_unmatched_payments(h.tenant_id)
        .await
        .expect("list unmatched");
    assert_eq!(unmatched.len(), 1);
}

#[tokio::test]
async fn racing_submissions_settle_exactly_once() {
    let h = Harness::new();
    let customer = h.customer("Lucy Nyambura", "254711000002").await;
    h.invoice(customer.customer_id, dec!(1000)).await;

    let event = h.event("254711000002", dec!(1000), "MPESA-102");
    let (a, b) = tokio::join!(
        h.ingestor.ingest(event.clone()),
        h.ingestor.ingest(event.clone()),
    );
    let outcomes = [a.expect("first ingest"), b.expect("second ingest")];

    let settled = outcomes
        .iter()
        .filter(|o| matches!(o, IngestOutcome::Settled { .. }))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o, IngestOutcome::Duplicate { .. }))
        .count();
    assert_eq!(settled, 1, "exactly one submission settles");
    assert_eq!(duplicates, 1, "the loser reports the prior outcome");

    assert_eq!(h.balance_of(customer.customer_id).await, Decimal::ZERO);
    assert_eq!(h.gateway.sent_count(), 1);
}

#[tokio::test]
async fn same_external_id_in_different_tenants_both_settle() {
    let h = Harness::new();
    let customer = h.customer("Mercy Wairimu", "254711000003").await;
    h.invoice(customer.customer_id, dec!(500)).await;

    let first = h
        .ingestor
        .ingest(h.event("254711000003", dec!(500), "MPESA-103"))
        .await
        .expect("first ingest");
    assert!(matches!(first, IngestOutcome::Settled { .. }));

    // The dedup key is scoped per tenant.
    let mut foreign = h.event("254711000003", dec!(500), "MPESA-103");
    foreign.tenant_id = uuid::Uuid::new_v4();
    let second = h.ingestor.ingest(foreign).await.expect("second ingest");
    assert!(matches!(second, IngestOutcome::Unmatched { .. }));
}
