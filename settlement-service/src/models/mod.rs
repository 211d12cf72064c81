//! Domain models for settlement-service.

mod allocation;
mod customer;
mod invoice;
mod payment;
mod receipt;
mod statement;

pub use allocation::Allocation;
pub use customer::{CreateCustomerAccount, CustomerAccount};
pub use invoice::{CreateInvoice, Invoice, InvoiceStatus};
pub use payment::{IngestPayment, NewPayment, Payment};
pub use receipt::Receipt;
pub use statement::CustomerStatement;
