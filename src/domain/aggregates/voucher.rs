//! Voucher Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::events::{DomainEvent, VoucherEvent};
use crate::domain::value_objects::{Money, MoneyError, OrderId, UserId, VoucherId};
use crate::ErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountType { Percent, Fixed }

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserVoucherUsage { pub user_id: UserId, pub voucher_id: VoucherId, pub order_id: OrderId, pub used_at: DateTime<Utc> }

/// Input for [`Voucher::create`].
#[derive(Clone, Debug)]
pub struct NewVoucher {
    pub code: String,
    pub name: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub currency: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    /// Zero means unlimited.
    pub usage_limit: u32,
    pub owner_id: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct Voucher {
    id: VoucherId,
    code: String,
    name: String,
    discount_type: DiscountType,
    discount_value: Decimal,
    min_order_amount: Money,
    max_discount_amount: Option<Money>,
    usage_limit: u32,
    usage_count: u32,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    is_active: bool,
    owner_id: Option<UserId>,
    usages: Vec<UserVoucherUsage>,
    events: Vec<DomainEvent>,
}

impl Voucher {
    pub fn create(id: VoucherId, new: NewVoucher) -> Result<Self, VoucherError> {
        let code = new.code.trim().to_uppercase();
        if code.is_empty() { return Err(VoucherError::MissingCode); }
        if new.name.trim().is_empty() { return Err(VoucherError::MissingName); }
        if new.discount_value <= Decimal::ZERO { return Err(VoucherError::InvalidDiscountValue(new.discount_value)); }
        if new.discount_type == DiscountType::Percent && new.discount_value > Decimal::ONE_HUNDRED {
            return Err(VoucherError::InvalidDiscountValue(new.discount_value));
        }
        if new.end_date <= new.start_date { return Err(VoucherError::InvalidPeriod); }
        let min_order_amount = Money::new(new.min_order_amount.unwrap_or(Decimal::ZERO), &new.currency)?;
        let max_discount_amount = new.max_discount_amount.map(|m| Money::new(m, &new.currency)).transpose()?;
        Ok(Self {
            id, code, name: new.name.trim().to_string(), discount_type: new.discount_type, discount_value: new.discount_value,
            min_order_amount, max_discount_amount, usage_limit: new.usage_limit, usage_count: 0,
            start_date: new.start_date, end_date: new.end_date, is_active: true, owner_id: new.owner_id,
            usages: vec![], events: vec![],
        })
    }

    pub fn id(&self) -> VoucherId { self.id }
    pub fn code(&self) -> &str { &self.code }
    pub fn name(&self) -> &str { &self.name }
    pub fn discount_type(&self) -> DiscountType { self.discount_type }
    pub fn discount_value(&self) -> Decimal { self.discount_value }
    pub fn min_order_amount(&self) -> &Money { &self.min_order_amount }
    pub fn max_discount_amount(&self) -> Option<&Money> { self.max_discount_amount.as_ref() }
    pub fn usage_limit(&self) -> u32 { self.usage_limit }
    pub fn usage_count(&self) -> u32 { self.usage_count }
    pub fn is_active(&self) -> bool { self.is_active }
    pub fn owner_id(&self) -> Option<UserId> { self.owner_id }
    pub fn usages(&self) -> &[UserVoucherUsage] { &self.usages }

    pub fn activate(&mut self) { self.is_active = true; }
    pub fn deactivate(&mut self) { self.is_active = false; }

    pub fn is_valid(&self) -> bool { self.is_valid_at(Utc::now()) }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && now >= self.start_date
            && now <= self.end_date
            && (self.usage_limit == 0 || self.usage_count < self.usage_limit)
    }

    pub fn can_apply(&self, amount: &Money) -> bool { self.can_apply_at(amount, Utc::now()) }

    pub fn can_apply_at(&self, amount: &Money, now: DateTime<Utc>) -> bool {
        self.is_valid_at(now) && matches!(amount.try_cmp(&self.min_order_amount), Ok(o) if o.is_ge())
    }

    pub fn has_been_used_by(&self, user_id: UserId) -> bool { self.usages.iter().any(|u| u.user_id == user_id) }

    pub fn can_be_used_by(&self, user_id: UserId) -> bool { self.owner_id.map_or(true, |owner| owner == user_id) }

    pub fn calculate_discount(&self, total: &Money) -> Money { self.calculate_discount_at(total, Utc::now()) }

    /// Discount for `total`; zero whenever the voucher does not apply.
    pub fn calculate_discount_at(&self, total: &Money, now: DateTime<Utc>) -> Money {
        if !self.can_apply_at(total, now) { return Money::zero(total.currency()); }
        let discount = match self.discount_type {
            DiscountType::Percent => total.percentage(self.discount_value).and_then(|d| match &self.max_discount_amount {
                Some(cap) => d.min(cap),
                None => Ok(d),
            }),
            DiscountType::Fixed => Money::new(self.discount_value, total.currency()).and_then(|d| d.min(total)),
        };
        discount.unwrap_or_else(|_| Money::zero(total.currency()))
    }

    pub fn record_use(&mut self, user_id: UserId, order_id: OrderId) -> Result<(), VoucherError> {
        self.record_use_at(user_id, order_id, Utc::now())
    }

    /// Records the single permitted use of this voucher by `user_id`.
    pub fn record_use_at(&mut self, user_id: UserId, order_id: OrderId, now: DateTime<Utc>) -> Result<(), VoucherError> {
        if !self.is_valid_at(now) { return Err(VoucherError::NotValid(self.code.clone())); }
        if !self.can_be_used_by(user_id) { return Err(VoucherError::NotOwner { code: self.code.clone(), user_id }); }
        if self.has_been_used_by(user_id) { return Err(VoucherError::AlreadyUsed { code: self.code.clone(), user_id }); }
        self.usages.push(UserVoucherUsage { user_id, voucher_id: self.id, order_id, used_at: now });
        self.usage_count += 1;
        self.events.push(DomainEvent::Voucher(VoucherEvent::Used { voucher_id: self.id, user_id, order_id }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoucherError {
    #[error("voucher code is required")]
    MissingCode,
    #[error("voucher name is required")]
    MissingName,
    #[error("invalid discount value: {0}")]
    InvalidDiscountValue(Decimal),
    #[error("voucher end date must be after its start date")]
    InvalidPeriod,
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error("voucher {0} is not valid")]
    NotValid(String),
    #[error("voucher {code} cannot be applied to an order of {amount}")]
    NotApplicable { code: String, amount: Money },
    #[error("voucher {code} does not belong to user {user_id}")]
    NotOwner { code: String, user_id: UserId },
    #[error("voucher {code} was already used by user {user_id}")]
    AlreadyUsed { code: String, user_id: UserId },
}

impl VoucherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCode | Self::MissingName | Self::InvalidDiscountValue(_) | Self::InvalidPeriod => ErrorKind::Validation,
            Self::Money(e) => e.kind(),
            Self::NotValid(_) => ErrorKind::State,
            Self::NotApplicable { .. } | Self::NotOwner { .. } | Self::AlreadyUsed { .. } => ErrorKind::BusinessRule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn vnd(amount: i64) -> Money { Money::new(Decimal::from(amount), "VND").unwrap() }

    fn draft(discount_type: DiscountType, value: i64) -> NewVoucher {
        let now = Utc::now();
        NewVoucher {
            code: "books10".into(), name: "Book week".into(), discount_type, discount_value: Decimal::from(value),
            currency: "VND".into(), start_date: now - Duration::days(1), end_date: now + Duration::days(7),
            min_order_amount: None, max_discount_amount: None, usage_limit: 0, owner_id: None,
        }
    }

    #[test]
    fn test_create_validation() {
        assert_eq!(Voucher::create(VoucherId::new(1), draft(DiscountType::Percent, 101)).unwrap_err().kind(), ErrorKind::Validation);
        assert!(Voucher::create(VoucherId::new(1), draft(DiscountType::Fixed, 0)).is_err());
        let mut bad_period = draft(DiscountType::Fixed, 10);
        bad_period.end_date = bad_period.start_date;
        assert_eq!(Voucher::create(VoucherId::new(1), bad_period).unwrap_err(), VoucherError::InvalidPeriod);
        let mut blank = draft(DiscountType::Fixed, 10);
        blank.code = "  ".into();
        assert_eq!(Voucher::create(VoucherId::new(1), blank).unwrap_err(), VoucherError::MissingCode);
        let v = Voucher::create(VoucherId::new(1), draft(DiscountType::Fixed, 10)).unwrap();
        assert_eq!(v.code(), "BOOKS10");
    }

    #[test]
    fn test_validity_window() {
        let v = Voucher::create(VoucherId::new(1), draft(DiscountType::Fixed, 10)).unwrap();
        assert!(v.is_valid());
        assert!(!v.is_valid_at(Utc::now() - Duration::days(2)));
        assert!(!v.is_valid_at(Utc::now() + Duration::days(8)));
    }

    #[test]
    fn test_min_order_amount() {
        let mut d = draft(DiscountType::Fixed, 10000);
        d.min_order_amount = Some(Decimal::from(100000));
        let v = Voucher::create(VoucherId::new(1), d).unwrap();
        assert!(!v.can_apply(&vnd(99999)));
        assert!(v.can_apply(&vnd(100000)));
        assert!(v.calculate_discount(&vnd(99999)).is_zero());
        assert!(!v.can_apply(&Money::new(Decimal::from(200000), "USD").unwrap()));
    }

    #[test]
    fn test_percent_discount_capped() {
        let mut d = draft(DiscountType::Percent, 20);
        d.max_discount_amount = Some(Decimal::from(30000));
        let v = Voucher::create(VoucherId::new(1), d).unwrap();
        assert_eq!(v.calculate_discount(&vnd(100000)), vnd(20000));
        assert_eq!(v.calculate_discount(&vnd(500000)), vnd(30000));
    }

    #[test]
    fn test_fixed_discount_never_exceeds_total() {
        let v = Voucher::create(VoucherId::new(1), draft(DiscountType::Fixed, 30000)).unwrap();
        assert_eq!(v.calculate_discount(&vnd(200000)), vnd(30000));
        assert_eq!(v.calculate_discount(&vnd(20000)), vnd(20000));
    }

    #[test]
    fn test_usage_limit_exhaustion() {
        let mut d = draft(DiscountType::Fixed, 10);
        d.usage_limit = 1;
        let mut v = Voucher::create(VoucherId::new(1), d).unwrap();
        v.record_use(UserId::new(1), OrderId::new(10)).unwrap();
        assert_eq!(v.usage_count(), 1);
        assert!(!v.is_valid());
        let err = v.record_use(UserId::new(2), OrderId::new(11)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(v.usage_count(), 1);
    }

    #[test]
    fn test_single_use_per_user() {
        let mut v = Voucher::create(VoucherId::new(1), draft(DiscountType::Fixed, 10)).unwrap();
        v.record_use(UserId::new(1), OrderId::new(10)).unwrap();
        let err = v.record_use(UserId::new(1), OrderId::new(12)).unwrap_err();
        assert!(matches!(err, VoucherError::AlreadyUsed { .. }));
        assert_eq!(v.usages().len(), 1);
        assert!(v.has_been_used_by(UserId::new(1)));
        v.record_use(UserId::new(2), OrderId::new(13)).unwrap();
        assert_eq!(v.take_events().len(), 2);
    }

    #[test]
    fn test_owner_restriction() {
        let mut d = draft(DiscountType::Fixed, 10);
        d.owner_id = Some(UserId::new(7));
        let mut v = Voucher::create(VoucherId::new(1), d).unwrap();
        assert!(matches!(v.record_use(UserId::new(8), OrderId::new(1)), Err(VoucherError::NotOwner { .. })));
        assert!(v.record_use(UserId::new(7), OrderId::new(1)).is_ok());
    }

    #[test]
    fn test_inactive_voucher_gives_no_discount() {
        let mut v = Voucher::create(VoucherId::new(1), draft(DiscountType::Fixed, 10)).unwrap();
        v.deactivate();
        assert!(v.calculate_discount(&vnd(100)).is_zero());
    }
}
