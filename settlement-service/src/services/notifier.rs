//! Notification dispatch: customer-facing messages after settlement.
//!
//! Invoked strictly after the financial transaction commits. Delivery is
//! best-effort: failures are counted and logged, never propagated back
//! into the financial path.

use crate::config::SmsGatewayConfig;
use crate::models::{CustomerAccount, Receipt};
use crate::services::metrics::NOTIFICATIONS_TOTAL;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway not enabled: {0}")]
    NotEnabled(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

#[derive(Debug, Clone)]
pub struct SmsMessage {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct GatewayDelivery {
    pub provider_message_id: Option<String>,
}

/// Outbound SMS boundary. Implementations must not reach back into
/// financial state.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, sms: &SmsMessage) -> Result<GatewayDelivery, GatewayError>;
}

#[derive(Debug, Serialize)]
struct BulkSmsRequest {
    sender: String,
    to: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BulkSmsResponse {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// HTTP bulk-SMS gateway client.
pub struct HttpSmsGateway {
    config: SmsGatewayConfig,
    client: Client,
}

impl HttpSmsGateway {
    pub fn new(config: SmsGatewayConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, sms: &SmsMessage) -> Result<GatewayDelivery, GatewayError> {
        if !self.config.enabled {
            return Err(GatewayError::NotEnabled(
                "SMS gateway is not enabled".to_string(),
            ));
        }

        // Normalize phone number (digits plus leading +).
        let normalized_phone = sms
            .to
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect::<String>();

        if normalized_phone.is_empty() {
            return Err(GatewayError::InvalidRecipient(
                "Phone number is empty".to_string(),
            ));
        }

        let request = BulkSmsRequest {
            sender: self.config.sender_id.clone(),
            to: normalized_phone,
            message: sms.body.clone(),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("apikey", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Connection(format!("Failed to reach SMS gateway: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::SendFailed(format!(
                "SMS gateway returned error status {}: {}",
                status, body
            )));
        }

        let gateway_response: BulkSmsResponse = response.json().await.map_err(|e| {
            GatewayError::SendFailed(format!("Failed to parse gateway response: {}", e))
        })?;

        if let Some(status) = &gateway_response.status {
            if status != "success" && status != "queued" {
                return Err(GatewayError::SendFailed(format!(
                    "SMS gateway rejected message: {}",
                    status
                )));
            }
        }

        Ok(GatewayDelivery {
            provider_message_id: gateway_response.message_id,
        })
    }
}

/// Formats settlement outcomes and hands them to the SMS gateway.
pub struct NotificationDispatcher {
    gateway: Arc<dyn SmsGateway>,
}

impl NotificationDispatcher {
    pub fn new(gateway: Arc<dyn SmsGateway>) -> Self {
        Self { gateway }
    }

    /// Notify the customer of a settled payment. Never fails: gateway
    /// errors are logged and counted only.
    pub async fn payment_settled(
        &self,
        customer: &CustomerAccount,
        receipt: &Receipt,
        new_balance: Decimal,
    ) {
        let balance_line = if new_balance < Decimal::ZERO {
            format!("You have a credit of {}.", -new_balance)
        } else {
            format!("Outstanding balance: {}.", new_balance)
        };
        let body = format!(
            "Dear {}, we received your payment of {}. Receipt {}. {}",
            customer.name, receipt.amount, receipt.receipt_number, balance_line
        );
        let sms = SmsMessage {
            to: customer.msisdn.clone(),
            body,
        };

        match self.gateway.send(&sms).await {
            Ok(delivery) => {
                NOTIFICATIONS_TOTAL.with_label_values(&["sent"]).inc();
                info!(
                    customer_id = %customer.customer_id,
                    receipt_number = %receipt.receipt_number,
                    provider_message_id = ?delivery.provider_message_id,
                    "Settlement notification sent"
                );
            }
            Err(GatewayError::NotEnabled(_)) => {
                NOTIFICATIONS_TOTAL.with_label_values(&["disabled"]).inc();
            }
            Err(e) => {
                NOTIFICATIONS_TOTAL.with_label_values(&["failed"]).inc();
                warn!(
                    customer_id = %customer.customer_id,
                    receipt_number = %receipt.receipt_number,
                    error = %e,
                    "Settlement notification failed"
                );
            }
        }
    }
}
