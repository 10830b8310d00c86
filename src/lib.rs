//! Bookstore Commerce
//!
//! Checkout core for an online bookstore.
//!
//! ## Features
//! - Exact decimal money with currency guards
//! - Inventory with time-bounded reservations
//! - Vouchers with eligibility rules and a per-user usage ledger
//! - Order and payment state machines, refunds
//! - Signed redirect payment gateway (HMAC-SHA512)
//! - Checkout orchestration over pluggable stores

pub mod application;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod infrastructure;

use serde::Serialize;
use thiserror::Error;

use crate::domain::aggregates::{InventoryError, OrderError, PaymentError, VoucherError};
use crate::domain::value_objects::MoneyError;
use crate::gateway::GatewayError;

// =============================================================================
// Error Types
// =============================================================================

/// Broad failure classes every domain error maps onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Bad input to a constructor or operation.
    Validation,
    /// Operation not allowed in the current state.
    State,
    NotFound,
    /// Stock, voucher, refund and similar business limits.
    BusinessRule,
    /// Signature or integrity failure.
    Security,
    /// Infrastructure or collaborator failure.
    Unexpected,
}

#[derive(Error, Debug)]
pub enum BookstoreError {
    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Voucher(#[from] VoucherError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("security check failed: {0}")]
    Security(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl BookstoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Money(e) => e.kind(),
            Self::Inventory(e) => e.kind(),
            Self::Voucher(e) => e.kind(),
            Self::Order(e) => e.kind(),
            Self::Payment(e) => e.kind(),
            Self::Gateway(e) => e.kind(),
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::Security(_) => ErrorKind::Security,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Message safe to show a customer. Infrastructure details stay in logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unexpected(_) => "An unexpected error occurred, please try again later".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for BookstoreError {
    fn from(errors: validator::ValidationErrors) -> Self { Self::InvalidRequest(errors.to_string()) }
}

pub type Result<T> = std::result::Result<T, BookstoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_pass_through() {
        let err: BookstoreError = InventoryError::InvalidQuantity.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err: BookstoreError = GatewayError::SignatureMismatch.into();
        assert_eq!(err.kind(), ErrorKind::Security);
        assert_eq!(BookstoreError::not_found("order", 5).to_string(), "order 5 not found");
    }

    #[test]
    fn test_unexpected_is_masked() {
        let err = BookstoreError::from(anyhow::anyhow!("connection reset by peer"));
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(!err.public_message().contains("connection"));
    }
}
