//! Receipt model for settlement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Proof of a settled payment. Created once per successfully allocated
/// payment, in the same transaction as the invoice and balance updates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Receipt {
    pub receipt_id: Uuid,
    pub tenant_id: Uuid,
    /// Human-readable number, unique within the tenant.
    pub receipt_number: String,
    pub payment_id: Uuid,
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}
