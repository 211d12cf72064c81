pub mod allocator;
pub mod database;
pub mod ingest;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod receipts;
pub mod store;

pub use database::Database;
pub use ingest::{IngestOutcome, PaymentIngestor};
pub use memory::MemoryStore;
pub use notifier::{NotificationDispatcher, SmsGateway};
pub use store::{PaymentInsert, SettlementStore, SettlementUnit};
