//! Allocation model for settlement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How much of one payment was applied to one invoice.
///
/// A null `invoice_id` records the unapplied remainder of a payment held as
/// credit. For every payment, the allocation amounts sum exactly to the
/// payment amount.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Allocation {
    pub allocation_id: Uuid,
    pub tenant_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}
