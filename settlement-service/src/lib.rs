//! Settlement Service - Payment reconciliation and invoice settlement
//! for multi-tenant property billing.
//!
//! Incoming mobile-money payments are deduplicated by external transaction
//! id, matched to a customer account, applied against open invoices
//! oldest-first inside a single transaction, and receipted. Leftover amounts
//! become credit on the customer's running balance. Customer notification
//! happens after commit and is best-effort.

pub mod config;
pub mod models;
pub mod services;
