//! Invoice allocation: distributes a payment across a customer's open
//! invoices, oldest first.
//!
//! Planning is pure: it takes the payment amount and the open invoices as
//! loaded (and locked) by the caller's unit of work, and produces the exact
//! writes to perform. Whatever the invoices absorb, the ledger delta is
//! always the full payment amount; leftover becomes unapplied credit, not
//! a discarded remainder.

use crate::models::{Invoice, InvoiceStatus};
use rust_decimal::Decimal;
use uuid::Uuid;

/// One invoice touched by an allocation plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedApplication {
    pub invoice_id: Uuid,
    /// Portion of the payment applied to this invoice.
    pub applied: Decimal,
    pub new_amount_paid: Decimal,
    pub new_status: InvoiceStatus,
}

/// The writes implied by applying one payment.
#[derive(Debug, Clone)]
pub struct AllocationPlan {
    pub payment_amount: Decimal,
    pub applications: Vec<PlannedApplication>,
    /// Remainder no open invoice absorbed; held as credit.
    pub unapplied: Decimal,
}

impl AllocationPlan {
    pub fn total_applied(&self) -> Decimal {
        self.payment_amount - self.unapplied
    }

    /// Delta for the running balance. Always the full original amount:
    /// credit reduces the balance exactly like an invoice application.
    pub fn balance_delta(&self) -> Decimal {
        -self.payment_amount
    }
}

/// Plan the application of `payment_amount` against `open_invoices`.
///
/// Invoices are taken oldest first (`created_utc` ascending, invoice id as
/// tie-break); each absorbs `min(remaining, due)` until the payment is
/// exhausted. Closed or cancelled invoices are skipped even if the caller
/// passed them in.
pub fn plan(payment_amount: Decimal, open_invoices: &[Invoice]) -> AllocationPlan {
    debug_assert!(payment_amount > Decimal::ZERO);

    let mut ordered: Vec<&Invoice> = open_invoices
        .iter()
        .filter(|inv| InvoiceStatus::from_string(&inv.status).is_open())
        .collect();
    ordered.sort_by(|a, b| {
        a.created_utc
            .cmp(&b.created_utc)
            .then(a.invoice_id.cmp(&b.invoice_id))
    });

    let mut remaining = payment_amount;
    let mut applications = Vec::new();

    for invoice in ordered {
        if remaining.is_zero() {
            break;
        }
        let due = invoice.amount_due();
        if due <= Decimal::ZERO {
            continue;
        }
        let applied = remaining.min(due);
        let new_amount_paid = invoice.amount_paid + applied;
        applications.push(PlannedApplication {
            invoice_id: invoice.invoice_id,
            applied,
            new_amount_paid,
            new_status: InvoiceStatus::for_amounts(new_amount_paid, invoice.invoice_amount),
        });
        remaining -= applied;
    }

    AllocationPlan {
        payment_amount,
        applications,
        unapplied: remaining,
    }
}
