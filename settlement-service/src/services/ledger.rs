//! Account ledger: the single authoritative mutation point for a
//! customer's running balance.
//!
//! The balance invariant: running balance == sum of invoice amounts ever
//! issued minus sum of payment amounts ever applied (credit included). The
//! adjustment runs inside the caller's unit of work, read-modify-write
//! under the customer row lock, so concurrent settlements for the same
//! customer cannot lose updates.

use crate::services::store::SettlementUnit;
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::debug;
use uuid::Uuid;

/// Add `delta` to the customer's balance (positive for new charges,
/// negative for payments) and return the resulting balance.
///
/// Fails with `NotFound` if the customer does not exist within the tenant;
/// any failure aborts the enclosing unit of work.
pub async fn apply_delta(
    unit: &mut dyn SettlementUnit,
    tenant_id: Uuid,
    customer_id: Uuid,
    delta: Decimal,
) -> Result<Decimal, AppError> {
    let new_balance = unit.apply_balance_delta(tenant_id, customer_id, delta).await?;

    debug!(
        customer_id = %customer_id,
        delta = %delta,
        new_balance = %new_balance,
        "Balance adjusted"
    );

    Ok(new_balance)
}
