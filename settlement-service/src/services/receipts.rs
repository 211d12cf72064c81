//! Receipt issuance: mint a unique, human-readable receipt number and
//! persist the receipt inside the settlement unit of work.
//!
//! Number generation retries a bounded number of candidates on collision
//! and surfaces `ResourceExhausted` rather than looping forever. A
//! collision that slips past the uniqueness check (two units generating
//! the same number concurrently) hits the tenant-scoped unique constraint
//! at commit and rolls the whole settlement back as a retryable conflict.

use crate::models::Receipt;
use crate::services::store::SettlementUnit;
use rand::Rng;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// Candidate numbers tried per receipt before giving up.
pub const MAX_ATTEMPTS: usize = 5;

/// Generate one candidate receipt number: a fixed prefix plus ten random
/// digits, e.g. `RCT-0734912685`.
pub fn candidate_number<R: Rng + ?Sized>(rng: &mut R) -> String {
    let digits: u64 = rng.gen_range(0..10_000_000_000);
    format!("RCT-{:010}", digits)
}

/// Generate `count` candidate numbers up front, so issuance needs no RNG
/// access between database round-trips.
pub fn candidates(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| candidate_number(&mut rng)).collect()
}

/// Issue a receipt for a payment, retrying across the supplied candidate
/// numbers on collision.
pub async fn issue_numbered(
    unit: &mut dyn SettlementUnit,
    tenant_id: Uuid,
    payment_id: Uuid,
    customer_id: Uuid,
    amount: Decimal,
    candidates: &[String],
) -> Result<Receipt, AppError> {
    for number in candidates {
        if unit.receipt_number_exists(tenant_id, number).await? {
            continue;
        }
        return unit
            .insert_receipt(tenant_id, number, payment_id, customer_id, amount)
            .await;
    }

    Err(AppError::ResourceExhausted(anyhow::anyhow!(
        "receipt number generation exhausted after {} attempts for tenant {}",
        candidates.len(),
        tenant_id
    )))
}

/// Issue a receipt with freshly generated candidate numbers.
pub async fn issue(
    unit: &mut dyn SettlementUnit,
    tenant_id: Uuid,
    payment_id: Uuid,
    customer_id: Uuid,
    amount: Decimal,
) -> Result<Receipt, AppError> {
    let numbers = candidates(MAX_ATTEMPTS);
    issue_numbered(unit, tenant_id, payment_id, customer_id, amount, &numbers).await
}
