//! Postgres store for settlement-service.

use crate::models::{
    Allocation, CreateCustomerAccount, CreateInvoice, CustomerAccount, CustomerStatement, Invoice,
    NewPayment, Payment, Receipt,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{PaymentInsert, SettlementStore, SettlementUnit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "payment_id, tenant_id, customer_id, amount, \
    external_transaction_id, payer_ref, receipt_id, receipted, metadata, created_utc";

const INVOICE_COLUMNS: &str =
    "invoice_id, tenant_id, customer_id, description, invoice_amount, amount_paid, status, created_utc";

const CUSTOMER_COLUMNS: &str =
    "customer_id, tenant_id, name, msisdn, running_balance, active, created_utc";

const RECEIPT_COLUMNS: &str =
    "receipt_id, tenant_id, receipt_number, payment_id, customer_id, amount, created_utc";

/// Map store errors, folding lock timeouts, deadlocks and serialization
/// failures into retryable conflicts.
fn map_db_err(context: &str, e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db_err) = e {
        // 55P03 lock_not_available, 40001 serialization_failure, 40P01 deadlock_detected
        if matches!(
            db_err.code().as_deref(),
            Some("55P03") | Some("40001") | Some("40P01")
        ) {
            return AppError::Conflict(anyhow::anyhow!("{}: transaction contention: {}", context, e));
        }
    }
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    lock_timeout_secs: u64,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "settlement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        lock_timeout_secs: u64,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self {
            pool,
            lock_timeout_secs,
        })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for Database {
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn find_payment_by_external_id(
        &self,
        tenant_id: Uuid,
        external_transaction_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_by_external_id"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE tenant_id = $1 AND external_transaction_id = $2"
        ))
        .bind(tenant_id)
        .bind(external_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to look up payment", e))?;

        timer.observe_duration();

        Ok(payment)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn find_customer_by_msisdn(
        &self,
        tenant_id: Uuid,
        msisdn: &str,
    ) -> Result<Option<CustomerAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_customer_by_msisdn"])
            .start_timer();

        let customer = sqlx::query_as::<_, CustomerAccount>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer_accounts \
             WHERE tenant_id = $1 AND msisdn = $2 AND active = TRUE"
        ))
        .bind(tenant_id)
        .bind(msisdn)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to resolve customer", e))?;

        timer.observe_duration();

        Ok(customer)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
    async fn get_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Option<CustomerAccount>, AppError> {
        let customer = sqlx::query_as::<_, CustomerAccount>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer_accounts \
             WHERE tenant_id = $1 AND customer_id = $2"
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to get customer", e))?;

        Ok(customer)
    }

    #[instrument(skip(self, payment), fields(tenant_id = %payment.tenant_id))]
    async fn insert_unmatched_payment(
        &self,
        payment: &NewPayment,
    ) -> Result<PaymentInsert, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_unmatched_payment"])
            .start_timer();

        let result = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments \
                 (payment_id, tenant_id, customer_id, amount, external_transaction_id, payer_ref, metadata) \
             VALUES ($1, $2, NULL, $3, $4, $5, $6) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment.payment_id)
        .bind(payment.tenant_id)
        .bind(payment.amount)
        .bind(&payment.external_transaction_id)
        .bind(&payment.payer_ref)
        .bind(&payment.metadata)
        .fetch_one(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(inserted) => {
                info!(
                    payment_id = %inserted.payment_id,
                    external_transaction_id = %inserted.external_transaction_id,
                    "Unmatched payment recorded"
                );
                Ok(PaymentInsert::Inserted(inserted))
            }
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Ok(PaymentInsert::Duplicate)
            }
            Err(e) => Err(map_db_err("Failed to insert unmatched payment", e)),
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_unmatched_payments(&self, tenant_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE tenant_id = $1 AND customer_id IS NULL \
             ORDER BY created_utc, payment_id"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to list unmatched payments", e))?;

        Ok(payments)
    }

    async fn begin(&self) -> Result<Box<dyn SettlementUnit>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("Failed to begin transaction", e))?;

        // Bounded wait on row locks; exceeding it aborts the whole unit.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}s'",
            self.lock_timeout_secs
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("Failed to set lock timeout", e))?;

        Ok(Box::new(PgUnit { tx }))
    }

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    async fn create_customer(
        &self,
        input: &CreateCustomerAccount,
    ) -> Result<CustomerAccount, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_customer"])
            .start_timer();

        let customer_id = Uuid::new_v4();
        let customer = sqlx::query_as::<_, CustomerAccount>(&format!(
            "INSERT INTO customer_accounts (customer_id, tenant_id, name, msisdn) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {CUSTOMER_COLUMNS}"
        ))
        .bind(customer_id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.msisdn)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Customer with msisdn '{}' already exists for tenant",
                    input.msisdn
                ))
            }
            _ => map_db_err("Failed to create customer", e),
        })?;

        timer.observe_duration();

        info!(customer_id = %customer.customer_id, "Customer account created");

        Ok(customer)
    }

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, customer_id = %input.customer_id))]
    async fn issue_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["issue_invoice"])
            .start_timer();

        // Matches the schema's CHECK so both stores reject the same inputs.
        if input.invoice_amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice amount must be positive"
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("Failed to begin transaction", e))?;

        let invoice_id = Uuid::new_v4();
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "INSERT INTO invoices (invoice_id, tenant_id, customer_id, description, invoice_amount) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(invoice_id)
        .bind(input.tenant_id)
        .bind(input.customer_id)
        .bind(&input.description)
        .bind(input.invoice_amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_db_err("Failed to insert invoice", e))?;

        // Invoice issuance is the other writer of the running balance.
        let updated = sqlx::query_scalar::<_, Decimal>(
            "UPDATE customer_accounts \
             SET running_balance = running_balance + $3 \
             WHERE tenant_id = $1 AND customer_id = $2 \
             RETURNING running_balance",
        )
        .bind(input.tenant_id)
        .bind(input.customer_id)
        .bind(input.invoice_amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_db_err("Failed to charge balance", e))?;

        if updated.is_none() {
            tx.rollback().await.ok();
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Customer {} not found in tenant",
                input.customer_id
            )));
        }

        tx.commit()
            .await
            .map_err(|e| map_db_err("Failed to commit invoice", e))?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, amount = %invoice.invoice_amount, "Invoice issued");

        Ok(invoice)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE tenant_id = $1 AND invoice_id = $2"
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to get invoice", e))?;

        Ok(invoice)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    async fn list_allocations_for_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<Allocation>, AppError> {
        let allocations = sqlx::query_as::<_, Allocation>(
            "SELECT allocation_id, tenant_id, payment_id, invoice_id, amount, created_utc \
             FROM allocations \
             WHERE tenant_id = $1 AND payment_id = $2 \
             ORDER BY created_utc, allocation_id",
        )
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to list allocations", e))?;

        Ok(allocations)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, receipt_id = %receipt_id))]
    async fn get_receipt(
        &self,
        tenant_id: Uuid,
        receipt_id: Uuid,
    ) -> Result<Option<Receipt>, AppError> {
        let receipt = sqlx::query_as::<_, Receipt>(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts \
             WHERE tenant_id = $1 AND receipt_id = $2"
        ))
        .bind(tenant_id)
        .bind(receipt_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to get receipt", e))?;

        Ok(receipt)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
    async fn customer_statement(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<CustomerStatement, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["customer_statement"])
            .start_timer();

        let invoiced_before: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(invoice_amount), 0) FROM invoices \
             WHERE tenant_id = $1 AND customer_id = $2 \
               AND status <> 'cancelled' AND created_utc < $3",
        )
        .bind(tenant_id)
        .bind(customer_id)
        .bind(period_start)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to sum invoices", e))?;

        let paid_before: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM receipts \
             WHERE tenant_id = $1 AND customer_id = $2 AND created_utc < $3",
        )
        .bind(tenant_id)
        .bind(customer_id)
        .bind(period_start)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to sum receipts", e))?;

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE tenant_id = $1 AND customer_id = $2 \
               AND status <> 'cancelled' \
               AND created_utc >= $3 AND created_utc <= $4 \
             ORDER BY created_utc, invoice_id"
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to list statement invoices", e))?;

        let receipts = sqlx::query_as::<_, Receipt>(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts \
             WHERE tenant_id = $1 AND customer_id = $2 \
               AND created_utc >= $3 AND created_utc <= $4 \
             ORDER BY created_utc, receipt_number"
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to list statement receipts", e))?;

        timer.observe_duration();

        let opening_balance =
            invoiced_before.unwrap_or(Decimal::ZERO) - paid_before.unwrap_or(Decimal::ZERO);
        let period_invoiced: Decimal = invoices.iter().map(|i| i.invoice_amount).sum();
        let period_paid: Decimal = receipts.iter().map(|r| r.amount).sum();
        let closing_balance = opening_balance + period_invoiced - period_paid;

        Ok(CustomerStatement {
            opening_balance,
            invoices,
            receipts,
            closing_balance,
        })
    }
}

/// One settlement transaction against Postgres. Row locks taken by
/// `lock_customer`/`open_invoices` are held until commit or rollback.
struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SettlementUnit for PgUnit {
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<PaymentInsert, AppError> {
        let result = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments \
                 (payment_id, tenant_id, customer_id, amount, external_transaction_id, payer_ref, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment.payment_id)
        .bind(payment.tenant_id)
        .bind(payment.customer_id)
        .bind(payment.amount)
        .bind(&payment.external_transaction_id)
        .bind(&payment.payer_ref)
        .bind(&payment.metadata)
        .fetch_one(&mut *self.tx)
        .await;

        match result {
            Ok(inserted) => Ok(PaymentInsert::Inserted(inserted)),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Ok(PaymentInsert::Duplicate)
            }
            Err(e) => Err(map_db_err("Failed to insert payment", e)),
        }
    }

    async fn lock_customer(
        &mut self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<CustomerAccount, AppError> {
        let customer = sqlx::query_as::<_, CustomerAccount>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer_accounts \
             WHERE tenant_id = $1 AND customer_id = $2 AND active = TRUE \
             FOR UPDATE"
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to lock customer", e))?;

        customer.ok_or_else(|| {
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
        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE tenant_id = $1 AND customer_id = $2 \
               AND status IN ('unpaid', 'partially_paid') \
             ORDER BY created_utc, invoice_id \
             FOR UPDATE"
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to load open invoices", e))?;

        Ok(invoices)
    }

    async fn update_invoice_paid(
        &mut self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        amount_paid: Decimal,
        status: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE invoices \
             SET amount_paid = $3, status = $4 \
             WHERE tenant_id = $1 AND invoice_id = $2 \
               AND status IN ('unpaid', 'partially_paid')",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(amount_paid)
        .bind(status)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to update invoice", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} vanished during settlement",
                invoice_id
            )));
        }

        Ok(())
    }

    async fn apply_balance_delta(
        &mut self,
        tenant_id: Uuid,
        customer_id: Uuid,
        delta: Decimal,
    ) -> Result<Decimal, AppError> {
        let new_balance = sqlx::query_scalar::<_, Decimal>(
            "UPDATE customer_accounts \
             SET running_balance = running_balance + $3 \
             WHERE tenant_id = $1 AND customer_id = $2 \
             RETURNING running_balance",
        )
        .bind(tenant_id)
        .bind(customer_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to adjust balance", e))?;

        new_balance.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Customer {} not found in tenant",
                customer_id
            ))
        })
    }

    async fn insert_allocation(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
        invoice_id: Option<Uuid>,
        amount: Decimal,
    ) -> Result<Allocation, AppError> {
        let allocation_id = Uuid::new_v4();
        let allocation = sqlx::query_as::<_, Allocation>(
            "INSERT INTO allocations (allocation_id, tenant_id, payment_id, invoice_id, amount) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING allocation_id, tenant_id, payment_id, invoice_id, amount, created_utc",
        )
        .bind(allocation_id)
        .bind(tenant_id)
        .bind(payment_id)
        .bind(invoice_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to insert allocation", e))?;

        Ok(allocation)
    }

    async fn receipt_number_exists(
        &mut self,
        tenant_id: Uuid,
        receipt_number: &str,
    ) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM receipts WHERE tenant_id = $1 AND receipt_number = $2)",
        )
        .bind(tenant_id)
        .bind(receipt_number)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to check receipt number", e))?;

        Ok(exists)
    }

    async fn insert_receipt(
        &mut self,
        tenant_id: Uuid,
        receipt_number: &str,
        payment_id: Uuid,
        customer_id: Uuid,
        amount: Decimal,
    ) -> Result<Receipt, AppError> {
        let receipt_id = Uuid::new_v4();
        let receipt = sqlx::query_as::<_, Receipt>(&format!(
            "INSERT INTO receipts (receipt_id, tenant_id, receipt_number, payment_id, customer_id, amount) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {RECEIPT_COLUMNS}"
        ))
        .bind(receipt_id)
        .bind(tenant_id)
        .bind(receipt_number)
        .bind(payment_id)
        .bind(customer_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to insert receipt", e))?;

        Ok(receipt)
    }

    async fn mark_payment_receipted(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
        receipt_id: Uuid,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE payments \
             SET receipt_id = $3, receipted = TRUE \
             WHERE tenant_id = $1 AND payment_id = $2 AND receipted = FALSE",
        )
        .bind(tenant_id)
        .bind(payment_id)
        .bind(receipt_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to mark payment receipted", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment {} was already receipted",
                payment_id
            )));
        }

        Ok(())
    }

    async fn claim_payment(
        &mut self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Payment, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE tenant_id = $1 AND payment_id = $2 \
             FOR UPDATE"
        ))
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to lock payment", e))?;

        let payment = payment.ok_or_else(|| {
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
        let result = sqlx::query(
            "UPDATE payments \
             SET customer_id = $3 \
             WHERE tenant_id = $1 AND payment_id = $2 AND customer_id IS NULL",
        )
        .bind(tenant_id)
        .bind(payment_id)
        .bind(customer_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_db_err("Failed to attach customer", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment {} was already assigned to a customer",
                payment_id
            )));
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_db_err("Failed to commit settlement", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_db_err("Failed to roll back settlement", e))
    }
}
