//! Value Objects for the bookstore

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::ErrorKind;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self { Self(value) }
            pub fn value(&self) -> i64 { self.0 }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> { s.parse::<i64>().map(Self) }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self { Self(Uuid::now_v7()) }
            pub fn as_uuid(&self) -> &Uuid { &self.0 }
        }

        impl Default for $name { fn default() -> Self { Self::new() } }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }
    };
}

numeric_id!(
    /// Order ids are numeric: the gateway transaction reference embeds them.
    OrderId
);
numeric_id!(UserId);
numeric_id!(VariantId);
numeric_id!(VoucherId);
numeric_id!(AddressId);

uuid_id!(PaymentId);
uuid_id!(ReservationId);
uuid_id!(RefundId);

/// Money value object.
///
/// The amount is never negative. Arithmetic between two values requires the
/// same currency; ordering between different currencies is undefined
/// (`partial_cmp` yields `None`, `try_cmp` reports the mismatch).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Result<Self, MoneyError> {
        if amount < Decimal::ZERO { return Err(MoneyError::Negative(amount)); }
        let currency = currency.trim().to_uppercase();
        if currency.is_empty() { return Err(MoneyError::MissingCurrency); }
        Ok(Self { amount, currency })
    }

    pub fn zero(currency: &str) -> Self {
        Self { amount: Decimal::ZERO, currency: currency.trim().to_uppercase() }
    }

    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_zero(&self) -> bool { self.amount.is_zero() }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(self.with_amount(self.amount + other.amount))
    }

    /// Subtraction floors at zero.
    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(self.with_amount((self.amount - other.amount).max(Decimal::ZERO)))
    }

    pub fn multiply(&self, factor: Decimal) -> Result<Money, MoneyError> {
        if factor < Decimal::ZERO { return Err(MoneyError::NegativeFactor(factor)); }
        let amount = self.amount.checked_mul(factor).ok_or(MoneyError::Overflow)?;
        Ok(self.with_amount(amount))
    }

    pub fn times(&self, quantity: u32) -> Result<Money, MoneyError> {
        self.multiply(Decimal::from(quantity))
    }

    /// `percent` of this amount, with `percent` in `[0, 100]`.
    pub fn percentage(&self, percent: Decimal) -> Result<Money, MoneyError> {
        if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
            return Err(MoneyError::PercentOutOfRange(percent));
        }
        let amount = self.amount.checked_mul(percent).ok_or(MoneyError::Overflow)? / Decimal::ONE_HUNDRED;
        Ok(self.with_amount(amount))
    }

    pub fn min(&self, other: &Money) -> Result<Money, MoneyError> {
        Ok(if self.try_cmp(other)? == Ordering::Greater { other.clone() } else { self.clone() })
    }

    pub fn try_cmp(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    /// Amount in minor units (amount x 100), truncated.
    pub fn minor_units(&self) -> Result<i64, MoneyError> {
        self.amount
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|v| v.trunc().to_i64())
            .ok_or(MoneyError::Overflow)
    }

    fn with_amount(&self, amount: Decimal) -> Money {
        Money { amount, currency: self.currency.clone() }
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch { left: self.currency.clone(), right: other.currency.clone() });
        }
        Ok(())
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { self.try_cmp(other).ok() }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{} {}", self.amount, self.currency) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
    #[error("currency is required")]
    MissingCurrency,
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },
    #[error("factor cannot be negative: {0}")]
    NegativeFactor(Decimal),
    #[error("percentage must be between 0 and 100, got {0}")]
    PercentOutOfRange(Decimal),
    #[error("amount overflow")]
    Overflow,
}

impl MoneyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CurrencyMismatch { .. } => ErrorKind::BusinessRule,
            _ => ErrorKind::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vnd(amount: i64) -> Money { Money::new(Decimal::from(amount), "VND").unwrap() }

    #[test]
    fn test_negative_amount_rejected() {
        let err = Money::new(Decimal::new(-1, 0), "VND").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(Money::new(Decimal::ZERO, "").is_err());
    }

    #[test]
    fn test_currency_normalized() {
        assert_eq!(Money::new(Decimal::ONE, " vnd ").unwrap().currency(), "VND");
    }

    #[test]
    fn test_add_and_subtract_floor() {
        let a = vnd(100);
        let b = vnd(250);
        assert_eq!(a.add(&b).unwrap().amount(), Decimal::from(350));
        assert_eq!(a.subtract(&b).unwrap().amount(), Decimal::ZERO);
        assert_eq!(b.subtract(&a).unwrap().amount(), Decimal::from(150));
    }

    #[test]
    fn test_mismatched_currency() {
        let usd = Money::new(Decimal::ONE, "USD").unwrap();
        assert!(matches!(vnd(1).add(&usd), Err(MoneyError::CurrencyMismatch { .. })));
        assert!(matches!(vnd(1).subtract(&usd), Err(MoneyError::CurrencyMismatch { .. })));
        assert!(vnd(1).try_cmp(&usd).is_err());
        assert!(!(vnd(5) > usd) && !(vnd(5) < usd));
    }

    #[test]
    fn test_ordering_same_currency() {
        assert!(vnd(5) > vnd(4));
        assert_eq!(vnd(5).min(&vnd(4)).unwrap(), vnd(4));
    }

    #[test]
    fn test_multiply_and_percentage() {
        assert!(vnd(10).multiply(Decimal::new(-1, 0)).is_err());
        assert_eq!(vnd(10).times(3).unwrap(), vnd(30));
        assert_eq!(vnd(200).percentage(Decimal::from(15)).unwrap(), vnd(30));
        assert!(vnd(200).percentage(Decimal::from(101)).is_err());
        assert!(vnd(200).percentage(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(vnd(170000).minor_units().unwrap(), 17_000_000);
        assert_eq!(Money::new(Decimal::new(1999, 2), "USD").unwrap().minor_units().unwrap(), 1999);
    }

    #[test]
    fn test_ids_parse() {
        assert_eq!("42".parse::<OrderId>().unwrap(), OrderId::new(42));
        assert!("x".parse::<OrderId>().is_err());
        assert_ne!(PaymentId::new(), PaymentId::new());
    }
}
