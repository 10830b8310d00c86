//! Payment Aggregate
//!
//! One payment attempt against an order. Lifecycle:
//! `Pending -> Processing -> Completed -> Refunded`, with `Failed` and
//! `Cancelled` as the other terminal states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::domain::value_objects::{Money, MoneyError, OrderId, PaymentId, RefundId};
use crate::ErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod { Cash, Gateway }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus { #[default] Pending, Processing, Completed, Failed, Cancelled, Refunded }

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool { !matches!(self, Self::Pending | Self::Processing) }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Refund { pub id: RefundId, pub payment_id: PaymentId, pub amount: Money, pub reason: String, pub processed: bool, pub created_at: DateTime<Utc> }

#[derive(Clone, Debug)]
pub struct Payment {
    id: PaymentId,
    order_id: OrderId,
    amount: Money,
    method: PaymentMethod,
    status: PaymentStatus,
    reference: Option<String>,
    transaction_id: Option<String>,
    failure_reason: Option<String>,
    refunds: Vec<Refund>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    events: Vec<DomainEvent>,
}

impl Payment {
    pub fn new(order_id: OrderId, amount: Money, method: PaymentMethod) -> Self {
        Self {
            id: PaymentId::new(), order_id, amount, method, status: PaymentStatus::Pending,
            reference: None, transaction_id: None, failure_reason: None, refunds: vec![],
            created_at: Utc::now(), completed_at: None, events: vec![],
        }
    }

    pub fn id(&self) -> PaymentId { self.id }
    pub fn order_id(&self) -> OrderId { self.order_id }
    pub fn amount(&self) -> &Money { &self.amount }
    pub fn method(&self) -> PaymentMethod { self.method }
    pub fn status(&self) -> PaymentStatus { self.status }
    pub fn reference(&self) -> Option<&str> { self.reference.as_deref() }
    pub fn transaction_id(&self) -> Option<&str> { self.transaction_id.as_deref() }
    pub fn failure_reason(&self) -> Option<&str> { self.failure_reason.as_deref() }
    pub fn refunds(&self) -> &[Refund] { &self.refunds }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn completed_at(&self) -> Option<DateTime<Utc>> { self.completed_at }
    pub fn is_completed(&self) -> bool { self.status == PaymentStatus::Completed }

    /// Merchant-side reference: the synthetic cash reference or the gateway
    /// transaction reference. Fixed once the payment reaches a terminal state.
    pub fn assign_reference(&mut self, reference: impl Into<String>) -> Result<(), PaymentError> {
        self.ensure_not_terminal("assign a reference to")?;
        self.reference = Some(reference.into());
        Ok(())
    }

    pub fn start_processing(&mut self) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Pending { return Err(self.invalid("start processing")); }
        self.status = PaymentStatus::Processing;
        self.raise_event(DomainEvent::Payment(PaymentEvent::ProcessingStarted { payment_id: self.id, order_id: self.order_id }));
        Ok(())
    }

    pub fn complete(&mut self, transaction_id: impl Into<String>) -> Result<(), PaymentError> {
        if !matches!(self.status, PaymentStatus::Pending | PaymentStatus::Processing) { return Err(self.invalid("complete")); }
        let transaction_id = transaction_id.into();
        self.status = PaymentStatus::Completed;
        self.transaction_id = Some(transaction_id.clone());
        self.completed_at = Some(Utc::now());
        self.raise_event(DomainEvent::Payment(PaymentEvent::Completed { payment_id: self.id, order_id: self.order_id, transaction_id }));
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), PaymentError> {
        self.ensure_not_terminal("fail")?;
        let reason = reason.into();
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.clone());
        self.raise_event(DomainEvent::Payment(PaymentEvent::Failed { payment_id: self.id, order_id: self.order_id, reason }));
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), PaymentError> {
        self.ensure_not_terminal("cancel")?;
        self.status = PaymentStatus::Cancelled;
        self.raise_event(DomainEvent::Payment(PaymentEvent::Cancelled { payment_id: self.id, order_id: self.order_id }));
        Ok(())
    }

    pub fn refunded_total(&self) -> Money {
        self.refunds.iter().fold(Money::zero(self.amount.currency()), |acc, r| acc.add(&r.amount).unwrap_or(acc))
    }

    pub fn refundable_amount(&self) -> Money {
        self.amount.subtract(&self.refunded_total()).unwrap_or_else(|_| Money::zero(self.amount.currency()))
    }

    /// Records a refund. The payment moves to `Refunded` once refunds cover
    /// the full amount.
    pub fn create_refund(&mut self, amount: Money, reason: impl Into<String>) -> Result<RefundId, PaymentError> {
        if self.status != PaymentStatus::Completed { return Err(self.invalid("refund")); }
        if amount.is_zero() { return Err(PaymentError::InvalidRefundAmount); }
        let refunded = self.refunded_total().add(&amount)?;
        if refunded.try_cmp(&self.amount)?.is_gt() {
            return Err(PaymentError::RefundExceedsPayment { requested: amount, remaining: self.refundable_amount() });
        }
        let refund = Refund {
            id: RefundId::new(), payment_id: self.id, amount: amount.clone(), reason: reason.into(),
            processed: false, created_at: Utc::now(),
        };
        let refund_id = refund.id;
        self.refunds.push(refund);
        self.raise_event(DomainEvent::Payment(PaymentEvent::RefundCreated { payment_id: self.id, refund_id, amount }));
        if refunded == self.amount {
            self.status = PaymentStatus::Refunded;
            self.raise_event(DomainEvent::Payment(PaymentEvent::Refunded { payment_id: self.id, order_id: self.order_id }));
        }
        Ok(refund_id)
    }

    pub fn process_refund(&mut self, refund_id: RefundId) -> Result<(), PaymentError> {
        let refund = self.refunds.iter_mut().find(|r| r.id == refund_id).ok_or(PaymentError::RefundNotFound(refund_id))?;
        if refund.processed { return Err(PaymentError::RefundAlreadyProcessed(refund_id)); }
        refund.processed = true;
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }

    fn ensure_not_terminal(&self, action: &'static str) -> Result<(), PaymentError> {
        if self.status.is_terminal() { return Err(self.invalid(action)); }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> PaymentError {
        PaymentError::InvalidTransition { payment_id: self.id, status: self.status, action }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("cannot {action} payment {payment_id} in status {status:?}")]
    InvalidTransition { payment_id: PaymentId, status: PaymentStatus, action: &'static str },
    #[error("refund amount must be greater than zero")]
    InvalidRefundAmount,
    #[error("refund of {requested} exceeds the refundable {remaining}")]
    RefundExceedsPayment { requested: Money, remaining: Money },
    #[error("refund {0} not found")]
    RefundNotFound(RefundId),
    #[error("refund {0} was already processed")]
    RefundAlreadyProcessed(RefundId),
    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTransition { .. } | Self::RefundAlreadyProcessed(_) => ErrorKind::State,
            Self::InvalidRefundAmount => ErrorKind::Validation,
            Self::RefundExceedsPayment { .. } => ErrorKind::BusinessRule,
            Self::RefundNotFound(_) => ErrorKind::NotFound,
            Self::Money(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn vnd(amount: i64) -> Money { Money::new(Decimal::from(amount), "VND").unwrap() }
    fn payment(method: PaymentMethod) -> Payment { Payment::new(OrderId::new(1), vnd(100000), method) }

    #[test]
    fn test_gateway_lifecycle() {
        let mut p = payment(PaymentMethod::Gateway);
        p.start_processing().unwrap();
        assert!(p.start_processing().is_err());
        p.complete("TXN-1").unwrap();
        assert_eq!(p.status(), PaymentStatus::Completed);
        assert_eq!(p.transaction_id(), Some("TXN-1"));
        assert!(p.completed_at().is_some());
    }

    #[test]
    fn test_complete_from_pending() {
        let mut p = payment(PaymentMethod::Cash);
        p.complete("COD").unwrap();
        assert!(p.is_completed());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut p = payment(PaymentMethod::Gateway);
        p.complete("TXN").unwrap();
        let err = p.complete("TXN").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(p.fail("late").is_err());
        assert!(p.cancel().is_err());

        let mut failed = payment(PaymentMethod::Gateway);
        failed.fail("declined").unwrap();
        assert_eq!(failed.failure_reason(), Some("declined"));
        assert!(failed.fail("again").is_err());
        assert!(failed.complete("TXN").is_err());
        assert!(failed.assign_reference("x").is_err());
    }

    #[test]
    fn test_partial_then_full_refund() {
        let mut p = payment(PaymentMethod::Gateway);
        assert!(p.create_refund(vnd(10), "early").is_err());
        p.complete("TXN").unwrap();
        let first = p.create_refund(vnd(40000), "damaged").unwrap();
        assert_eq!(p.status(), PaymentStatus::Completed);
        assert_eq!(p.refundable_amount(), vnd(60000));
        let err = p.create_refund(vnd(60001), "too much").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        p.create_refund(vnd(60000), "rest").unwrap();
        assert_eq!(p.status(), PaymentStatus::Refunded);
        assert_eq!(p.refunded_total(), vnd(100000));
        assert!(p.create_refund(vnd(1), "more").is_err());
        p.process_refund(first).unwrap();
        assert!(p.refunds()[0].processed);
        assert_eq!(p.process_refund(first), Err(PaymentError::RefundAlreadyProcessed(first)));
    }

    #[test]
    fn test_refund_validation() {
        let mut p = payment(PaymentMethod::Cash);
        p.complete("COD").unwrap();
        assert_eq!(p.create_refund(vnd(0), "zero"), Err(PaymentError::InvalidRefundAmount));
        let usd = Money::new(Decimal::ONE, "USD").unwrap();
        assert!(matches!(p.create_refund(usd, "fx"), Err(PaymentError::Money(MoneyError::CurrencyMismatch { .. }))));
    }
}
