//! Invoice model for settlement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
///
/// `Unpaid`, `PartiallyPaid` and `Paid` are a pure function of
/// `amount_paid` vs `invoice_amount` (see [`InvoiceStatus::for_amounts`]).
/// `Cancelled` is a terminal override set by explicit cancellation; cancelled
/// invoices are never allocation candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Unpaid,
        }
    }

    /// Whether the invoice is eligible for allocation.
    pub fn is_open(&self) -> bool {
        matches!(self, InvoiceStatus::Unpaid | InvoiceStatus::PartiallyPaid)
    }

    /// The status implied by the paid/total amounts.
    pub fn for_amounts(amount_paid: Decimal, invoice_amount: Decimal) -> Self {
        if amount_paid <= Decimal::ZERO {
            InvoiceStatus::Unpaid
        } else if amount_paid < invoice_amount {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Paid
        }
    }
}

/// A billing obligation for one period.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub invoice_amount: Decimal,
    pub amount_paid: Decimal,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    /// Amount still owed on this invoice.
    pub fn amount_due(&self) -> Decimal {
        self.invoice_amount - self.amount_paid
    }
}

/// Input for issuing an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub invoice_amount: Decimal,
}
