//! Payment model for settlement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// A single received amount from one mobile-money or manual transaction.
///
/// `customer_id` is null while the payer reference is unmatched; `receipted`
/// flips to true exactly once, when settlement commits.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub amount: Decimal,
    /// Gateway transaction id, unique per tenant. The deduplication key.
    pub external_transaction_id: String,
    /// Payer reference as received from the gateway (MSISDN).
    pub payer_ref: String,
    pub receipt_id: Option<Uuid>,
    pub receipted: bool,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

/// A raw payment event from the webhook or manual-entry boundary.
#[derive(Debug, Clone, Validate)]
pub struct IngestPayment {
    pub tenant_id: Uuid,
    #[validate(length(min = 1, message = "external transaction id must not be empty"))]
    pub external_transaction_id: String,
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    #[validate(length(min = 1, message = "payer reference must not be empty"))]
    pub payer_ref: String,
    pub metadata: Option<serde_json::Value>,
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("amount_not_positive"))
    }
}

/// Row to insert for a validated payment event.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub amount: Decimal,
    pub external_transaction_id: String,
    pub payer_ref: String,
    pub metadata: Option<serde_json::Value>,
}

impl NewPayment {
    pub fn from_event(event: &IngestPayment, customer_id: Option<Uuid>) -> Self {
        Self {
            payment_id: Uuid::new_v4(),
            tenant_id: event.tenant_id,
            customer_id,
            amount: event.amount,
            external_transaction_id: event.external_transaction_id.clone(),
            payer_ref: event.payer_ref.clone(),
            metadata: event.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(amount: Decimal, txn: &str) -> IngestPayment {
        IngestPayment {
            tenant_id: Uuid::new_v4(),
            external_transaction_id: txn.to_string(),
            amount,
            payer_ref: "254700000001".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn positive_amount_passes_validation() {
        assert!(event(dec!(100), "TXN1").validate().is_ok());
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        assert!(event(dec!(0), "TXN1").validate().is_err());
        assert!(event(dec!(-50), "TXN1").validate().is_err());
    }

    #[test]
    fn empty_transaction_id_is_rejected() {
        assert!(event(dec!(100), "").validate().is_err());
    }
}
