//! Runtime configuration, read from the environment (and `.env` when present).

use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::aggregates::DEFAULT_RESERVATION_MINUTES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub checkout: CheckoutConfig,
    pub gateway: GatewayConfig,
    pub reservation_sweep_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct CheckoutConfig {
    pub currency: String,
    pub reservation_ttl_minutes: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self { Self { currency: "VND".to_string(), reservation_ttl_minutes: DEFAULT_RESERVATION_MINUTES } }
}

/// Merchant settings for the redirect gateway. `hash_secret` is deliberately
/// left out of any log output.
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub terminal_code: String,
    pub hash_secret: String,
    pub version: String,
    pub command: String,
    pub currency_code: String,
    pub locale: String,
    pub order_type: String,
    pub expire_minutes: i64,
    pub utc_offset_minutes: i32,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("terminal_code", &self.terminal_code)
            .field("hash_secret", &"[REDACTED]")
            .field("version", &self.version)
            .field("expire_minutes", &self.expire_minutes)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let checkout = CheckoutConfig {
            currency: var_or("STORE_CURRENCY", "VND"),
            reservation_ttl_minutes: parsed_or("RESERVATION_TTL_MINUTES", DEFAULT_RESERVATION_MINUTES)?,
        };
        let config = Self {
            checkout,
            gateway: GatewayConfig::from_env()?,
            reservation_sweep_seconds: parsed_or("RESERVATION_SWEEP_SECONDS", 60)?,
        };
        tracing::info!(currency = %config.checkout.currency, gateway = %config.gateway.base_url, "configuration loaded");
        Ok(config)
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: required("GATEWAY_BASE_URL")?,
            terminal_code: required("GATEWAY_TERMINAL_CODE")?,
            hash_secret: required("GATEWAY_HASH_SECRET")?,
            version: var_or("GATEWAY_VERSION", "2.1.0"),
            command: var_or("GATEWAY_COMMAND", "pay"),
            currency_code: var_or("GATEWAY_CURRENCY_CODE", "VND"),
            locale: var_or("GATEWAY_LOCALE", "vn"),
            order_type: var_or("GATEWAY_ORDER_TYPE", "other"),
            expire_minutes: parsed_or("GATEWAY_EXPIRE_MINUTES", 15)?,
            utc_offset_minutes: parsed_or("GATEWAY_UTC_OFFSET_MINUTES", 420)?,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).ok().filter(|v| !v.trim().is_empty()).ok_or(ConfigError::Missing(name))
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_or_defaults_and_errors() {
        env::set_var("BOOKSTORE_TEST_TTL", "abc");
        assert!(matches!(parsed_or::<i64>("BOOKSTORE_TEST_TTL", 15), Err(ConfigError::Invalid { .. })));
        env::set_var("BOOKSTORE_TEST_TTL", " 30 ");
        assert_eq!(parsed_or::<i64>("BOOKSTORE_TEST_TTL", 15).unwrap(), 30);
        assert_eq!(parsed_or::<i64>("BOOKSTORE_TEST_UNSET", 15).unwrap(), 15);
    }

    #[test]
    fn test_required_rejects_blank() {
        env::set_var("BOOKSTORE_TEST_BLANK", "  ");
        assert!(matches!(required("BOOKSTORE_TEST_BLANK"), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = crate::gateway::tests::test_config();
        assert!(!format!("{:?}", config).contains(&config.hash_secret));
    }
}
