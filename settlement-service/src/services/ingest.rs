//! Payment ingestion: the single entry point for recording a payment event
//! and settling it, with at-most-once processing per external transaction id.
//!
//! The dedup pre-check is an optimization; the store's unique constraint on
//! `(tenant_id, external_transaction_id)` is the real guard. A constraint
//! hit during the settlement transaction is treated the same as a pre-check
//! hit: roll back and return the prior outcome. Because the transaction is
//! all-or-nothing, callers may retry transient failures freely.

use crate::models::{Allocation, CustomerAccount, IngestPayment, NewPayment, Payment, Receipt};
use crate::services::metrics::{
    ALLOCATED_AMOUNT_TOTAL, ERRORS_TOTAL, PAYMENTS_INGESTED_TOTAL, RECEIPTS_TOTAL,
};
use crate::services::notifier::NotificationDispatcher;
use crate::services::store::{PaymentInsert, SettlementStore, SettlementUnit};
use crate::services::{allocator, ledger, receipts};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Outcome of ingesting a payment event. `Duplicate` and `Unmatched` are
/// recognized results, not errors.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Payment allocated, balance updated, receipt issued.
    Settled {
        payment: Payment,
        receipt: Receipt,
        allocations: Vec<Allocation>,
        new_balance: Decimal,
    },
    /// The external transaction id was seen before; the prior payment is
    /// returned unchanged.
    Duplicate { payment: Payment },
    /// No customer matched the payer reference. The payment is persisted
    /// unreconciled and waits for manual follow-up.
    Unmatched { payment: Payment },
}

/// A committed settlement, before metrics and notification.
struct Settled {
    payment: Payment,
    receipt: Receipt,
    allocations: Vec<Allocation>,
    new_balance: Decimal,
    applied_to_invoices: Decimal,
    credited: Decimal,
}

pub struct PaymentIngestor {
    store: Arc<dyn SettlementStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl PaymentIngestor {
    pub fn new(store: Arc<dyn SettlementStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Record one payment event and settle it against the payer's open
    /// invoices. Safe to call repeatedly with the same external
    /// transaction id, including concurrently.
    #[instrument(skip(self, event), fields(
        tenant_id = %event.tenant_id,
        external_transaction_id = %event.external_transaction_id
    ))]
    pub async fn ingest(&self, event: IngestPayment) -> Result<IngestOutcome, AppError> {
        if let Err(e) = event.validate() {
            PAYMENTS_INGESTED_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(e.into());
        }

        // Step 1: idempotency pre-check.
        if let Some(existing) = self
            .store
            .find_payment_by_external_id(event.tenant_id, &event.external_transaction_id)
            .await?
        {
            PAYMENTS_INGESTED_TOTAL.with_label_values(&["duplicate"]).inc();
            info!(payment_id = %existing.payment_id, "Duplicate payment event ignored");
            return Ok(IngestOutcome::Duplicate { payment: existing });
        }

        // Step 2: resolve the payer reference to a customer account.
        let customer = self
            .store
            .find_customer_by_msisdn(event.tenant_id, &event.payer_ref)
            .await?;
        let customer = match customer {
            Some(c) => c,
            None => return self.record_unmatched(&event).await,
        };

        // Step 3: settle inside a single unit of work.
        self.settle(&event, &customer).await
    }

    /// Manually reconcile a previously unmatched payment to a customer.
    /// Runs the same settlement transaction as webhook ingestion.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn claim(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        customer_id: Uuid,
    ) -> Result<IngestOutcome, AppError> {
        let customer = self
            .store
            .get_customer(tenant_id, customer_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Customer {} not found in tenant",
                    customer_id
                ))
            })?;

        let mut unit = self.store.begin().await?;
        match run_claim(unit.as_mut(), tenant_id, payment_id, &customer).await {
            Ok(settled) => {
                unit.commit().await?;
                self.finish_settled(&customer, settled, "claim").await
            }
            Err(e) => {
                unit.rollback().await.ok();
                ERRORS_TOTAL.with_label_values(&["claim"]).inc();
                Err(e)
            }
        }
    }

    async fn settle(
        &self,
        event: &IngestPayment,
        customer: &CustomerAccount,
    ) -> Result<IngestOutcome, AppError> {
        let mut unit = self.store.begin().await?;
        match run_settlement(unit.as_mut(), event, customer).await {
            Ok(Some(settled)) => {
                unit.commit().await?;
                self.finish_settled(customer, settled, "ingest").await
            }
            Ok(None) => {
                // Unique-constraint race: another submission of the same
                // transaction won. Same as a pre-check hit.
                unit.rollback().await.ok();
                let payment = self
                    .store
                    .find_payment_by_external_id(event.tenant_id, &event.external_transaction_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Conflict(anyhow::anyhow!(
                            "Concurrent duplicate of '{}' not yet visible",
                            event.external_transaction_id
                        ))
                    })?;
                PAYMENTS_INGESTED_TOTAL.with_label_values(&["duplicate"]).inc();
                info!(payment_id = %payment.payment_id, "Duplicate payment event ignored");
                Ok(IngestOutcome::Duplicate { payment })
            }
            Err(e) => {
                unit.rollback().await.ok();
                ERRORS_TOTAL.with_label_values(&["settlement"]).inc();
                Err(e)
            }
        }
    }

    async fn record_unmatched(&self, event: &IngestPayment) -> Result<IngestOutcome, AppError> {
        let new_payment = NewPayment::from_event(event, None);
        match self.store.insert_unmatched_payment(&new_payment).await? {
            PaymentInsert::Inserted(payment) => {
                PAYMENTS_INGESTED_TOTAL.with_label_values(&["unmatched"]).inc();
                warn!(
                    payment_id = %payment.payment_id,
                    payer_ref = %payment.payer_ref,
                    "Payment matched no customer; held for manual reconciliation"
                );
                Ok(IngestOutcome::Unmatched { payment })
            }
            PaymentInsert::Duplicate => {
                let payment = self
                    .store
                    .find_payment_by_external_id(event.tenant_id, &event.external_transaction_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Conflict(anyhow::anyhow!(
                            "Concurrent duplicate of '{}' not yet visible",
                            event.external_transaction_id
                        ))
                    })?;
                PAYMENTS_INGESTED_TOTAL.with_label_values(&["duplicate"]).inc();
                Ok(IngestOutcome::Duplicate { payment })
            }
        }
    }

    /// Step 4: metrics and best-effort notification, after commit.
    async fn finish_settled(
        &self,
        customer: &CustomerAccount,
        settled: Settled,
        source: &str,
    ) -> Result<IngestOutcome, AppError> {
        PAYMENTS_INGESTED_TOTAL.with_label_values(&["settled"]).inc();
        RECEIPTS_TOTAL.with_label_values(&[source]).inc();
        ALLOCATED_AMOUNT_TOTAL
            .with_label_values(&["invoice"])
            .inc_by(settled.applied_to_invoices.to_f64().unwrap_or(0.0));
        ALLOCATED_AMOUNT_TOTAL
            .with_label_values(&["credit"])
            .inc_by(settled.credited.to_f64().unwrap_or(0.0));

        info!(
            payment_id = %settled.payment.payment_id,
            receipt_number = %settled.receipt.receipt_number,
            amount = %settled.payment.amount,
            applied_to_invoices = %settled.applied_to_invoices,
            credited = %settled.credited,
            new_balance = %settled.new_balance,
            "Payment settled"
        );

        self.dispatcher
            .payment_settled(customer, &settled.receipt, settled.new_balance)
            .await;

        Ok(IngestOutcome::Settled {
            payment: settled.payment,
            receipt: settled.receipt,
            allocations: settled.allocations,
            new_balance: settled.new_balance,
        })
    }
}

/// Settlement body for a fresh payment event. Returns `None` on a
/// unique-constraint race (the caller rolls back and reports a duplicate).
async fn run_settlement(
    unit: &mut dyn SettlementUnit,
    event: &IngestPayment,
    customer: &CustomerAccount,
) -> Result<Option<Settled>, AppError> {
    let new_payment = NewPayment::from_event(event, Some(customer.customer_id));
    let payment = match unit.insert_payment(&new_payment).await? {
        PaymentInsert::Inserted(p) => p,
        PaymentInsert::Duplicate => return Ok(None),
    };

    settle_payment(unit, customer, payment).await.map(Some)
}

/// Settlement body for claiming an unmatched payment.
async fn run_claim(
    unit: &mut dyn SettlementUnit,
    tenant_id: Uuid,
    payment_id: Uuid,
    customer: &CustomerAccount,
) -> Result<Settled, AppError> {
    let payment = unit.claim_payment(tenant_id, payment_id).await?;
    unit.attach_payment_customer(tenant_id, payment_id, customer.customer_id)
        .await?;
    let payment = Payment {
        customer_id: Some(customer.customer_id),
        ..payment
    };
    settle_payment(unit, customer, payment).await
}

/// Allocate, adjust the balance, record allocations, issue the receipt and
/// flip the receipted flag. The caller owns commit/rollback.
async fn settle_payment(
    unit: &mut dyn SettlementUnit,
    customer: &CustomerAccount,
    payment: Payment,
) -> Result<Settled, AppError> {
    let tenant_id = payment.tenant_id;

    // Re-read under the row lock; the resolved snapshot may be stale.
    let locked = unit.lock_customer(tenant_id, customer.customer_id).await?;
    let invoices = unit.open_invoices(tenant_id, locked.customer_id).await?;

    let plan = allocator::plan(payment.amount, &invoices);
    for application in &plan.applications {
        unit.update_invoice_paid(
            tenant_id,
            application.invoice_id,
            application.new_amount_paid,
            application.new_status.as_str(),
        )
        .await?;
    }

    let new_balance =
        ledger::apply_delta(unit, tenant_id, locked.customer_id, plan.balance_delta()).await?;

    let mut allocations = Vec::with_capacity(plan.applications.len() + 1);
    for application in &plan.applications {
        allocations.push(
            unit.insert_allocation(
                tenant_id,
                payment.payment_id,
                Some(application.invoice_id),
                application.applied,
            )
            .await?,
        );
    }
    if plan.unapplied > Decimal::ZERO {
        allocations.push(
            unit.insert_allocation(tenant_id, payment.payment_id, None, plan.unapplied)
                .await?,
        );
    }

    let receipt = receipts::issue(
        unit,
        tenant_id,
        payment.payment_id,
        locked.customer_id,
        payment.amount,
    )
    .await?;
    unit.mark_payment_receipted(tenant_id, payment.payment_id, receipt.receipt_id)
        .await?;

    let applied_to_invoices = plan.total_applied();
    let credited = plan.unapplied;
    let payment = Payment {
        receipt_id: Some(receipt.receipt_id),
        receipted: true,
        ..payment
    };

    Ok(Settled {
        payment,
        receipt,
        allocations,
        new_balance,
        applied_to_invoices,
        credited,
    })
}
