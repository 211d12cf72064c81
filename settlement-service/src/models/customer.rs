//! Customer account model for settlement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A billable party within a tenant, carrying the single running balance.
///
/// A positive balance means the customer owes money; a negative balance is
/// credit from overpayment. The balance is mutated only by invoice issuance
/// and by payment settlement, never by any other writer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CustomerAccount {
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Payer phone number used to match incoming mobile-money payments.
    pub msisdn: String,
    pub running_balance: Decimal,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Input for onboarding a customer account.
#[derive(Debug, Clone)]
pub struct CreateCustomerAccount {
    pub tenant_id: Uuid,
    pub name: String,
    pub msisdn: String,
}
