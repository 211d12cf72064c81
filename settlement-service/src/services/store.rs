//! Storage contract for settlement.
//!
//! All financial writes flow through a [`SettlementUnit`], an explicit
//! transaction-scoped unit of work handed out by [`SettlementStore::begin`]
//! and passed through the ledger, allocator and receipt steps. The unit
//! commits or rolls back as a whole; a crash mid-settlement leaves either
//! the pre-state or the fully committed post-state.
//!
//! Two implementations exist: the Postgres store
//! ([`Database`](crate::services::database::Database)) used in production,
//! and an in-memory store ([`MemoryStore`](crate::services::memory::MemoryStore))
//! for tests and local runs.

use crate::models::{
    Allocation, CreateCustomerAccount, CreateInvoice, CustomerAccount, CustomerStatement, Invoice,
    NewPayment, Payment, Receipt,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// Result of attempting to insert a payment row.
///
/// `Duplicate` reports that the store's unique constraint on
/// `(tenant_id, external_transaction_id)` fired: another submission of the
/// same external transaction already exists (or committed concurrently).
/// The caller must roll back its unit and return the prior outcome.
#[derive(Debug)]
pub enum PaymentInsert {
    Inserted(Payment),
    Duplicate,
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Idempotency pre-check: find a payment by its external transaction id.
    async fn find_payment_by_external_id(
        &self,
        tenant_id: Uuid,
        external_transaction_id: &str,
    ) -> Result<Option<Payment>, AppError>;

    /// Resolve a payer reference (MSISDN) to an active customer account.
    async fn find_customer_by_msisdn(
        &self,
        tenant_id: Uuid,
        msisdn: &str,
    ) -> Result<Option<CustomerAccount>, AppError>;

    async fn get_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Option<CustomerAccount>, AppError>;

    /// Persist a payment that matched no customer. Terminal success state;
    /// the payment waits for manual follow-up.
    async fn insert_unmatched_payment(
        &self,
        payment: &NewPayment,
    ) -> Result<PaymentInsert, AppError>;

    /// Payments awaiting manual reconciliation, oldest first.
    async fn list_unmatched_payments(&self, tenant_id: Uuid) -> Result<Vec<Payment>, AppError>;

    /// Open a settlement unit of work.
    async fn begin(&self) -> Result<Box<dyn SettlementUnit>, AppError>;

    // ---------------------------------------------------------------------
    // Onboarding and reporting collaborators
    // ---------------------------------------------------------------------

    async fn create_customer(
        &self,
        input: &CreateCustomerAccount,
    ) -> Result<CustomerAccount, AppError>;

    /// Issue an invoice and fold its amount into the running balance, as
    /// one atomic write.
    async fn issue_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError>;

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;

    async fn list_allocations_for_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<Allocation>, AppError>;

    async fn get_receipt(
        &self,
        tenant_id: Uuid,
        receipt_id: Uuid,
    ) -> Result<Option<Receipt>, AppError>;

    /// Invoices and receipts for a customer in a period, with opening and
    /// closing balances.
    async fn customer_statement(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<CustomerStatement, AppError>;
}

/// One atomic settlement transaction.
///
/// Row-level locking: `lock_customer` and `open_invoices` take locks held
/// until commit or rollback, serializing concurrent settlements for the
/// same customer.
#[async_trait]
pub trait SettlementUnit: Send {
    /// Insert the payment row. A unique-constraint hit yields
    /// [`PaymentInsert::Duplicate`], never an error.
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<PaymentInsert, AppError>;

    /// Lock the customer row for the rest of this unit. `NotFound` if the
    /// customer vanished or was deactivated since resolution.
    async fn lock_customer(
        &mut self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<CustomerAccount, AppError>;

    /// Open invoices for the customer, locked, ordered ascending by
    /// creation time with invoice id as the deterministic tie-break.
    async fn open_invoices(
        &mut self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Write one invoice's new paid amount and status.
    async fn update_invoice_paid(
        &mut self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        amount_paid: Decimal,
        status: &str,
    ) -> Result<(), AppError>;

    /// Add `delta` to the customer's running balance and return the result.
    /// The single authoritative balance mutation.
    async fn apply_balance_delta(
        &mut self,
        tenant_id: Uuid,
        customer_id: Uuid,
        delta: Decimal,
    ) -> Result<Decimal, AppError>;

    async fn insert_allocation(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
        invoice_id: Option<Uuid>,
        amount: Decimal,
    ) -> Result<Allocation, AppError>;

    async fn receipt_number_exists(
        &mut self,
        tenant_id: Uuid,
        receipt_number: &str,
    ) -> Result<bool, AppError>;

    async fn insert_receipt(
        &mut self,
        tenant_id: Uuid,
        receipt_number: &str,
        payment_id: Uuid,
        customer_id: Uuid,
        amount: Decimal,
    ) -> Result<Receipt, AppError>;

    /// Flip the payment's receipted flag and link the receipt. `Conflict`
    /// if the payment was already receipted.
    async fn mark_payment_receipted(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
        receipt_id: Uuid,
    ) -> Result<(), AppError>;

    /// Lock an unmatched payment for manual claiming. `NotFound` if it does
    /// not exist, `Conflict` if it was already claimed or receipted.
    async fn claim_payment(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Payment, AppError>;

    /// Attach a customer to a previously unmatched payment.
    async fn attach_payment_customer(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
        customer_id: Uuid,
    ) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
