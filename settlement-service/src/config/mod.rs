//! Configuration module for settlement-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub database: DatabaseConfig,
    pub sms: SmsGatewayConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound on waiting for row locks inside a settlement
    /// transaction. Exceeding it aborts and rolls back the whole unit.
    pub lock_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SmsGatewayConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: String,
    pub sender_id: String,
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "settlement-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL must be set"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2),
                lock_timeout_secs: env::var("SETTLEMENT_LOCK_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            },
            sms: SmsGatewayConfig {
                enabled: env::var("SMS_ENABLED")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
                endpoint: env::var("SMS_ENDPOINT").unwrap_or_default(),
                api_key: env::var("SMS_API_KEY").unwrap_or_default(),
                sender_id: env::var("SMS_SENDER_ID").unwrap_or_else(|_| "BILLING".to_string()),
            },
        })
    }
}
