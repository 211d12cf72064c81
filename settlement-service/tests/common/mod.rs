//! Shared test harness: in-memory store, ingestor and a recording SMS
//! gateway.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use settlement_service::models::{
    CreateCustomerAccount, CreateInvoice, CustomerAccount, IngestPayment, Invoice,
};
use settlement_service::services::notifier::{
    GatewayDelivery, GatewayError, NotificationDispatcher, SmsGateway, SmsMessage,
};
use settlement_service::services::{MemoryStore, PaymentIngestor, SettlementStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// SMS gateway double that records every message instead of sending it.
/// Flip `fail` to make deliveries error.
pub struct RecordingGateway {
    pub sent: Mutex<Vec<SmsMessage>>,
    pub fail: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("gateway mutex poisoned").len()
    }

    pub fn last_message(&self) -> Option<SmsMessage> {
        self.sent
            .lock()
            .expect("gateway mutex poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl SmsGateway for RecordingGateway {
    async fn send(&self, sms: &SmsMessage) -> Result<GatewayDelivery, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::SendFailed("gateway unavailable".to_string()));
        }
        self.sent
            .lock()
            .expect("gateway mutex poisoned")
            .push(sms.clone());
        Ok(GatewayDelivery {
            provider_message_id: Some("provider-1".to_string()),
        })
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub ingestor: PaymentIngestor,
    pub gateway: Arc<RecordingGateway>,
    pub tenant_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let gateway = RecordingGateway::new();
        let dispatcher = Arc::new(NotificationDispatcher::new(gateway.clone()));
        let ingestor = PaymentIngestor::new(Arc::new(store.clone()), dispatcher);
        Self {
            store,
            ingestor,
            gateway,
            tenant_id: Uuid::new_v4(),
        }
    }

    pub async fn customer(&self, name: &str, msisdn: &str) -> CustomerAccount {
        self.store
            .create_customer(&CreateCustomerAccount {
                tenant_id: self.tenant_id,
                name: name.to_string(),
                msisdn: msisdn.to_string(),
            })
            .await
            .expect("create customer")
    }

    pub async fn invoice(&self, customer_id: Uuid, amount: Decimal) -> Invoice {
        self.store
            .issue_invoice(&CreateInvoice {
                tenant_id: self.tenant_id,
                customer_id,
                description: Some("Monthly rent".to_string()),
                invoice_amount: amount,
            })
            .await
            .expect("issue invoice")
    }

    pub fn event(&self, msisdn: &str, amount: Decimal, txn: &str) -> IngestPayment {
        IngestPayment {
            tenant_id: self.tenant_id,
            external_transaction_id: txn.to_string(),
            amount,
            payer_ref: msisdn.to_string(),
            metadata: None,
        }
    }

    pub async fn balance_of(&self, customer_id: Uuid) -> Decimal {
        self.store
            .get_customer(self.tenant_id, customer_id)
            .await
            .expect("get customer")
            .expect("customer exists")
            .running_balance
    }

    pub async fn invoice_state(&self, invoice_id: Uuid) -> Invoice {
        self.store
            .get_invoice(self.tenant_id, invoice_id)
            .await
            .expect("get invoice")
            .expect("invoice exists")
    }
}
