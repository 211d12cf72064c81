//! In-memory store for tests and local runs.
//!
//! Mirrors the Postgres store's semantics: a settlement unit holds an
//! exclusive lock for its whole lifetime (the in-memory stand-in for row
//! locks), stages its writes on a copy of the state, and publishes them
//! atomically on commit. Rollback drops the staged copy.

use crate::models::{
    Allocation, CreateCustomerAccount, CreateInvoice, CustomerAccount, CustomerStatement, Invoice,
    InvoiceStatus, NewPayment, Payment, Receipt,
};
use crate::services::store::{PaymentInsert, SettlementStore, SettlementUnit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
struct State {
    customers: Vec<CustomerAccount>,
    invoices: Vec<Invoice>,
    payments: Vec<Payment>,
    allocations: Vec<Allocation>,
    receipts: Vec<Receipt>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn find_payment_by_external_id(
        &self,
        tenant_id: Uuid,
        external_transaction_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| {
                p.tenant_id == tenant_id && p.external_transaction_id == external_transaction_id
            })
            .cloned())
    }

    async fn find_customer_by_msisdn(
        &self,
        tenant_id: Uuid,
        msisdn: &str,
    ) -> Result<Option<CustomerAccount>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .customers
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.msisdn == msisdn && c.active)
            .cloned())
    }

    async fn get_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Option<CustomerAccount>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .customers
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.customer_id == customer_id)
            .cloned())
    }

    async fn insert_unmatched_payment(
        &self,
        payment: &NewPayment,
    ) -> Result<PaymentInsert, AppError> {
        let mut state = self.state.lock().await;
        if state.payments.iter().any(|p| {
            p.tenant_id == payment.tenant_id
                && p.external_transaction_id == payment.external_transaction_id
        }) {
            return Ok(PaymentInsert::Duplicate);
        }
        let row = Payment {
            payment_id: payment.payment_id,
            tenant_id: payment.tenant_id,
            customer_id: None,
            amount: payment.amount,
            external_transaction_id: payment.external_transaction_id.clone(),
            payer_ref: payment.payer_ref.clone(),
            receipt_id: None,
            receipted: false,
            metadata: payment.metadata.clone(),
            created_utc: Utc::now(),
        };
        state.payments.push(row.clone());
        Ok(PaymentInsert::Inserted(row))
    }

    async fn list_unmatched_payments(&self, tenant_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.customer_id.is_none())
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then(a.payment_id.cmp(&b.payment_id))
        });
        Ok(payments)
    }

    async fn begin(&self) -> Result<Box<dyn SettlementUnit>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnit { guard, staged }))
    }

    async fn create_customer(
        &self,
        input: &CreateCustomerAccount,
    ) -> Result<CustomerAccount, AppError> {
        let mut state = self.state.lock().await;
        if state
            .customers
            .iter()
            .any(|c| c.tenant_id == input.tenant_id && c.msisdn == input.msisdn)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Customer with msisdn '{}' already exists for tenant",
                input.msisdn
            )));
        }
        let customer = CustomerAccount {
            customer_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            name: input.name.clone(),
            msisdn: input.msisdn.clone(),
            running_balance: Decimal::ZERO,
            active: true,
            created_utc: Utc::now(),
        };
        state.customers.push(customer.clone());
        Ok(customer)
    }

    async fn issue_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        if input.invoice_amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice amount must be positive"
            )));
        }
        let mut state = self.state.lock().await;
        let customer = state
            .customers
            .iter_mut()
            .find(|c| c.tenant_id == input.tenant_id && c.customer_id == input.customer_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Customer {} not found in tenant",
                    input.customer_id
                ))
            })?;
        customer.running_balance += input.invoice_amount;
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            customer_id: input.customer_id,
            description: input.description.clone(),
            invoice_amount: input.invoice_amount,
            amount_paid: Decimal::ZERO,
            status: InvoiceStatus::Unpaid.as_str().to_string(),
            created_utc: Utc::now(),
        };
        state.invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .find(|i| i.tenant_id == tenant_id && i.invoice_id == invoice_id)
            .cloned())
    }

    async fn list_allocations_for_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<Allocation>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .allocations
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn get_receipt(
        &self,
        tenant_id: Uuid,
        receipt_id: Uuid,
    ) -> Result<Option<Receipt>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .receipts
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.receipt_id == receipt_id)
            .cloned())
    }

    async fn customer_statement(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<CustomerStatement, AppError> {
        let state = self.state.lock().await;

        let not_cancelled = |i: &&Invoice| {
            i.tenant_id == tenant_id
                && i.customer_id == customer_id
                && InvoiceStatus::from_string(&i.status) != InvoiceStatus::Cancelled
        };
        let for_customer =
            |r: &&Receipt| r.tenant_id == tenant_id && r.customer_id == customer_id;

        let invoiced_before: Decimal = state
            .invoices
            .iter()
            .filter(not_cancelled)
            .filter(|i| i.created_utc < period_start)
            .map(|i| i.invoice_amount)
            .sum();
        let paid_before: Decimal = state
            .receipts
            .iter()
            .filter(for_customer)
            .filter(|r| r.created_utc < period_start)
            .map(|r| r.amount)
            .sum();

        let mut invoices: Vec<Invoice> = state
            .invoices
            .iter()
            .filter(not_cancelled)
            .filter(|i| i.created_utc >= period_start && i.created_utc <= period_end)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then(a.invoice_id.cmp(&b.invoice_id))
        });

        let mut receipts: Vec<Receipt> = state
            .receipts
            .iter()
            .filter(for_customer)
            .filter(|r| r.created_utc >= period_start && r.created_utc <= period_end)
            .cloned()
            .collect();
        receipts.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then(a.receipt_number.cmp(&b.receipt_number))
        });

        let opening_balance = invoiced_before - paid_before;
        let period_invoiced: Decimal = invoices.iter().map(|i| i.invoice_amount).sum();
        let period_paid: Decimal = receipts.iter().map(|r| r.amount).sum();

        Ok(CustomerStatement {
            opening_balance,
            invoices,
            receipts,
            closing_balance: opening_balance + period_invoiced - period_paid,
        })
    }
}

/// A staged copy of the state, published atomically on commit. The owned
/// guard serializes units the way row locks serialize Postgres
/// transactions for the same customer.
struct MemoryUnit {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl SettlementUnit for MemoryUnit {
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<PaymentInsert, AppError> {
        if self.staged.payments.iter().any(|p| {
            p.tenant_id == payment.tenant_id
                && p.external_transaction_id == payment.external_transaction_id
        }) {
            return Ok(PaymentInsert::Duplicate);
        }
        let row = Payment {
            payment_id: payment.payment_id,
            tenant_id: payment.tenant_id,
            customer_id: payment.customer_id,
            amount: payment.amount,
            external_transaction_id: payment.external_transaction_id.clone(),
            payer_ref: payment.payer_ref.clone(),
            receipt_id: None,
            receipted: false,
            metadata: payment.metadata.clone(),
            created_utc: Utc::now(),
        };
        self.staged.payments.push(row.clone());
        Ok(PaymentInsert::Inserted(row))
    }

    async fn lock_customer(
        &mut self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<CustomerAccount, AppError> {
        self.staged
            .customers
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.customer_id == customer_id && c.active)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Customer {} not found or inactive in tenant",
                    customer_id
                ))
            })
    }

    async fn open_invoices(
        &mut self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let mut invoices: Vec<Invoice> = self
            .staged
            .invoices
            .iter()
            .filter(|i| {
                i.tenant_id == tenant_id
                    && i.customer_id == customer_id
                    && InvoiceStatus::from_string(&i.status).is_open()
            })
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then(a.invoice_id.cmp(&b.invoice_id))
        });
        Ok(invoices)
    }

    async fn update_invoice_paid(
        &mut self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        amount_paid: Decimal,
        status: &str,
    ) -> Result<(), AppError> {
        let invoice = self
            .staged
            .invoices
            .iter_mut()
            .find(|i| {
                i.tenant_id == tenant_id
                    && i.invoice_id == invoice_id
                    && InvoiceStatus::from_string(&i.status).is_open()
            })
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Invoice {} vanished during settlement",
                    invoice_id
                ))
            })?;
        invoice.amount_paid = amount_paid;
        invoice.status = status.to_string();
        Ok(())
    }

    async fn apply_balance_delta(
        &mut self,
        tenant_id: Uuid,
        customer_id: Uuid,
        delta: Decimal,
    ) -> Result<Decimal, AppError> {
        let customer = self
            .staged
            .customers
            .iter_mut()
            .find(|c| c.tenant_id == tenant_id && c.customer_id == customer_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Customer {} not found in tenant",
                    customer_id
                ))
            })?;
        customer.running_balance += delta;
        Ok(customer.running_balance)
    }

    async fn insert_allocation(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
        invoice_id: Option<Uuid>,
        amount: Decimal,
    ) -> Result<Allocation, AppError> {
        let allocation = Allocation {
            allocation_id: Uuid::new_v4(),
            tenant_id,
            payment_id,
            invoice_id,
            amount,
            created_utc: Utc::now(),
        };
        self.staged.allocations.push(allocation.clone());
        Ok(allocation)
    }

    async fn receipt_number_exists(
        &mut self,
        tenant_id: Uuid,
        receipt_number: &str,
    ) -> Result<bool, AppError> {
        Ok(self
            .staged
            .receipts
            .iter()
            .any(|r| r.tenant_id == tenant_id && r.receipt_number == receipt_number))
    }

    async fn insert_receipt(
        &mut self,
        tenant_id: Uuid,
        receipt_number: &str,
        payment_id: Uuid,
        customer_id: Uuid,
        amount: Decimal,
    ) -> Result<Receipt, AppError> {
        if self
            .staged
            .receipts
            .iter()
            .any(|r| r.tenant_id == tenant_id && r.receipt_number == receipt_number)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Receipt number '{}' already exists for tenant",
                receipt_number
            )));
        }
        let receipt = Receipt {
            receipt_id: Uuid::new_v4(),
            tenant_id,
            receipt_number: receipt_number.to_string(),
            payment_id,
            customer_id,
            amount,
            created_utc: Utc::now(),
        };
        self.staged.receipts.push(receipt.clone());
        Ok(receipt)
    }

    async fn mark_payment_receipted(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
        receipt_id: Uuid,
    ) -> Result<(), AppError> {
        let payment = self
            .staged
            .payments
            .iter_mut()
            .find(|p| p.tenant_id == tenant_id && p.payment_id == payment_id && !p.receipted)
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Payment {} was already receipted",
                    payment_id
                ))
            })?;
        payment.receipt_id = Some(receipt_id);
        payment.receipted = true;
        Ok(())
    }

    async fn claim_payment(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Payment, AppError> {
        let payment = self
            .staged
            .payments
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.payment_id == payment_id)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Payment {} not found in tenant", payment_id))
            })?;

        if payment.receipted || payment.customer_id.is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment {} was already claimed",
                payment_id
            )));
        }

        Ok(payment)
    }

    async fn attach_payment_customer(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
        customer_id: Uuid,
    ) -> Result<(), AppError> {
        let payment = self
            .staged
            .payments
            .iter_mut()
            .find(|p| {
                p.tenant_id == tenant_id && p.payment_id == payment_id && p.customer_id.is_none()
            })
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Payment {} was already assigned to a customer",
                    payment_id
                ))
            })?;
        payment.customer_id = Some(customer_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryUnit { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}
