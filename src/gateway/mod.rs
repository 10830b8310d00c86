//! Redirect payment gateway protocol.
//!
//! Outbound: a canonical, key-sorted, URL-encoded parameter string signed
//! with HMAC-SHA512 and appended to the gateway base URL. Inbound: the same
//! canonical string rebuilt from the callback and checked against the
//! supplied signature. No network traffic happens here; the customer's browser
//! follows the URL and the gateway calls back.

pub mod response_codes;
pub mod txn_ref;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::GatewayConfig;
use crate::domain::value_objects::{Money, MoneyError, OrderId};
use crate::ErrorKind;

type HmacSha512 = Hmac<Sha512>;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Parameter keys. Case-sensitive; the signature depends on them.
pub mod keys {
    pub const VERSION: &str = "vnp_Version";
    pub const COMMAND: &str = "vnp_Command";
    pub const TERMINAL_CODE: &str = "vnp_TmnCode";
    pub const AMOUNT: &str = "vnp_Amount";
    pub const BANK_CODE: &str = "vnp_BankCode";
    pub const CREATE_DATE: &str = "vnp_CreateDate";
    pub const CURRENCY_CODE: &str = "vnp_CurrCode";
    pub const CLIENT_IP: &str = "vnp_IpAddr";
    pub const LOCALE: &str = "vnp_Locale";
    pub const ORDER_INFO: &str = "vnp_OrderInfo";
    pub const ORDER_TYPE: &str = "vnp_OrderType";
    pub const RETURN_URL: &str = "vnp_ReturnUrl";
    pub const TXN_REF: &str = "vnp_TxnRef";
    pub const EXPIRE_DATE: &str = "vnp_ExpireDate";
    pub const SECURE_HASH: &str = "vnp_SecureHash";
    pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";

    pub const BANK_TRANSACTION_NO: &str = "vnp_BankTranNo";
    pub const CARD_TYPE: &str = "vnp_CardType";
    pub const PAY_DATE: &str = "vnp_PayDate";
    pub const RESPONSE_CODE: &str = "vnp_ResponseCode";
    pub const TRANSACTION_NO: &str = "vnp_TransactionNo";
    pub const TRANSACTION_STATUS: &str = "vnp_TransactionStatus";

    pub const PREFIX: &str = "vnp_";
}

/// A signed redirect ready to hand to the customer's browser.
#[derive(Clone, Debug)]
pub struct PaymentRequest {
    pub url: String,
    pub txn_ref: String,
    pub amount_minor: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outbound request details that vary per payment.
#[derive(Clone, Debug)]
pub struct PaymentRequestParams<'a> {
    pub order_id: OrderId,
    pub amount: &'a Money,
    pub order_info: String,
    pub return_url: &'a str,
    pub client_ip: &'a str,
    pub bank_code: Option<&'a str>,
}

/// A callback whose signature has been verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayCallback {
    pub txn_ref: String,
    pub order_id: OrderId,
    pub amount_minor: i64,
    pub response_code: String,
    pub transaction_status: String,
    pub transaction_no: Option<String>,
    pub bank_code: Option<String>,
    pub bank_transaction_no: Option<String>,
    pub card_type: Option<String>,
    pub order_info: Option<String>,
    pub pay_date: Option<String>,
}

impl GatewayCallback {
    pub fn is_success(&self) -> bool {
        self.response_code == response_codes::SUCCESS && self.transaction_status == response_codes::SUCCESS
    }

    pub fn failure_message(&self) -> &'static str { response_codes::describe(&self.response_code) }
}

#[derive(Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    offset: FixedOffset,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient").field("base_url", &self.config.base_url).field("terminal_code", &self.config.terminal_code).finish()
    }
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        url::Url::parse(&config.base_url).map_err(|e| GatewayError::InvalidBaseUrl(e.to_string()))?;
        if config.hash_secret.is_empty() { return Err(GatewayError::MissingSecret); }
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or(GatewayError::InvalidOffset(config.utc_offset_minutes))?;
        Ok(Self { config, offset })
    }

    pub fn config(&self) -> &GatewayConfig { &self.config }

    /// Offset the gateway expects its timestamps in.
    pub fn offset(&self) -> FixedOffset { self.offset }

    pub fn create_payment_request(&self, params: PaymentRequestParams<'_>) -> Result<PaymentRequest, GatewayError> {
        self.create_payment_request_at(params, Utc::now())
    }

    #[instrument(skip(self, params), fields(order_id = %params.order_id, amount = %params.amount))]
    pub fn create_payment_request_at(&self, params: PaymentRequestParams<'_>, now: DateTime<Utc>) -> Result<PaymentRequest, GatewayError> {
        let amount_minor = params.amount.minor_units()?;
        let local_now = now.with_timezone(&self.offset);
        let expires_at = now + Duration::minutes(self.config.expire_minutes);
        let txn_ref = txn_ref::format(params.order_id, &local_now);

        let mut fields = BTreeMap::new();
        fields.insert(keys::VERSION.to_string(), self.config.version.clone());
        fields.insert(keys::COMMAND.to_string(), self.config.command.clone());
        fields.insert(keys::TERMINAL_CODE.to_string(), self.config.terminal_code.clone());
        fields.insert(keys::AMOUNT.to_string(), amount_minor.to_string());
        fields.insert(keys::BANK_CODE.to_string(), params.bank_code.unwrap_or_default().to_string());
        fields.insert(keys::CREATE_DATE.to_string(), local_now.format(TIMESTAMP_FORMAT).to_string());
        fields.insert(keys::CURRENCY_CODE.to_string(), self.config.currency_code.clone());
        fields.insert(keys::CLIENT_IP.to_string(), params.client_ip.to_string());
        fields.insert(keys::LOCALE.to_string(), self.config.locale.clone());
        fields.insert(keys::ORDER_INFO.to_string(), params.order_info);
        fields.insert(keys::ORDER_TYPE.to_string(), self.config.order_type.clone());
        fields.insert(keys::RETURN_URL.to_string(), params.return_url.to_string());
        fields.insert(keys::TXN_REF.to_string(), txn_ref.clone());
        fields.insert(keys::EXPIRE_DATE.to_string(), expires_at.with_timezone(&self.offset).format(TIMESTAMP_FORMAT).to_string());

        let query = canonical_query(&fields);
        let signature = self.sign_canonical(&query)?;
        let url = format!("{}?{}&{}={}", self.config.base_url, query, keys::SECURE_HASH, signature);
        debug!(%txn_ref, amount_minor, "built gateway redirect");
        Ok(PaymentRequest { url, txn_ref, amount_minor, created_at: now, expires_at })
    }

    /// Lowercase hex HMAC-SHA512 over the canonical form of `fields`.
    pub fn sign(&self, fields: &BTreeMap<String, String>) -> Result<String, GatewayError> {
        self.sign_canonical(&canonical_query(fields))
    }

    /// Checks the signature of a callback (all of its query parameters) and
    /// extracts the typed fields. Fails closed on any mismatch.
    #[instrument(skip(self, params), fields(txn_ref = params.get(keys::TXN_REF).map(String::as_str).unwrap_or_default()))]
    pub fn verify_callback(&self, params: &BTreeMap<String, String>) -> Result<GatewayCallback, GatewayError> {
        let supplied = params.get(keys::SECURE_HASH).filter(|h| !h.is_empty()).ok_or(GatewayError::MissingSignature)?;
        let signed: BTreeMap<String, String> = params
            .iter()
            .filter(|(k, _)| k.starts_with(keys::PREFIX) && k.as_str() != keys::SECURE_HASH && k.as_str() != keys::SECURE_HASH_TYPE)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let expected = hex::decode(supplied.to_ascii_lowercase()).map_err(|_| GatewayError::SignatureMismatch)?;
        let mut mac = self.mac()?;
        mac.update(canonical_query(&signed).as_bytes());
        if mac.verify_slice(&expected).is_err() {
            warn!("gateway callback signature mismatch");
            return Err(GatewayError::SignatureMismatch);
        }

        let required = |key: &'static str| params.get(key).filter(|v| !v.is_empty()).cloned().ok_or(GatewayError::MissingField(key));
        let optional = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();
        let txn_ref = required(keys::TXN_REF)?;
        let order_id = txn_ref::parse_order_id(&txn_ref)?;
        let amount_raw = required(keys::AMOUNT)?;
        let amount_minor = amount_raw.parse::<i64>().map_err(|_| GatewayError::MalformedField { field: keys::AMOUNT, value: amount_raw })?;
        Ok(GatewayCallback {
            txn_ref,
            order_id,
            amount_minor,
            response_code: required(keys::RESPONSE_CODE)?,
            transaction_status: required(keys::TRANSACTION_STATUS)?,
            transaction_no: optional(keys::TRANSACTION_NO),
            bank_code: optional(keys::BANK_CODE),
            bank_transaction_no: optional(keys::BANK_TRANSACTION_NO),
            card_type: optional(keys::CARD_TYPE),
            order_info: optional(keys::ORDER_INFO),
            pay_date: optional(keys::PAY_DATE),
        })
    }

    fn sign_canonical(&self, canonical: &str) -> Result<String, GatewayError> {
        let mut mac = self.mac()?;
        mac.update(canonical.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> Result<HmacSha512, GatewayError> {
        HmacSha512::new_from_slice(self.config.hash_secret.as_bytes()).map_err(|_| GatewayError::MissingSecret)
    }
}

/// `k=v&k=v...` over non-empty values, keys in ordinal order, both sides
/// form-URL-encoded.
pub fn canonical_query(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode(value: &str) -> String { url::form_urlencoded::byte_serialize(value.as_bytes()).collect() }

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("gateway base URL is invalid: {0}")]
    InvalidBaseUrl(String),
    #[error("gateway hash secret is not configured")]
    MissingSecret,
    #[error("invalid gateway UTC offset: {0} minutes")]
    InvalidOffset(i32),
    #[error("callback carries no signature")]
    MissingSignature,
    #[error("callback signature mismatch")]
    SignatureMismatch,
    #[error("callback is missing {0}")]
    MissingField(&'static str),
    #[error("callback field {field} is malformed: {value}")]
    MalformedField { field: &'static str, value: String },
    #[error("malformed transaction reference: {0}")]
    MalformedReference(String),
    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingSignature | Self::SignatureMismatch => ErrorKind::Security,
            Self::Money(e) => e.kind(),
            _ => ErrorKind::Validation,
        }
    }
}
