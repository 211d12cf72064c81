//! Customer statement read model.

use crate::models::{Invoice, Receipt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Invoices and receipts for a customer over a period, with opening and
/// closing balances derived from the same sums that define the running
/// balance invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerStatement {
    pub opening_balance: Decimal,
    pub invoices: Vec<Invoice>,
    pub receipts: Vec<Receipt>,
    pub closing_balance: Decimal,
}
