//! Order Aggregate
//!
//! `Pending -> Confirmed -> Processing -> Shipped -> Delivered`, with
//! `Cancelled` reachable from every non-terminal state. Line items and the
//! voucher can only change while the order is `Pending`. Every operation
//! validates before it mutates, so a rejected call leaves the order as it was.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::domain::aggregates::payment::{Payment, PaymentError, PaymentMethod, PaymentStatus};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Money, MoneyError, OrderId, PaymentId, ReservationId, UserId, VariantId, VoucherId};
use crate::ErrorKind;

#[derive(Clone, Debug)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    items: Vec<OrderItem>,
    total_amount: Money,
    discount_amount: Money,
    final_amount: Money,
    status: OrderStatus,
    voucher_id: Option<VoucherId>,
    shipping_address: ShippingAddress,
    notes: Option<String>,
    payments: Vec<Payment>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderItem {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
    pub book_title: String,
    pub variant_name: String,
    /// Inventory holds backing this line.
    pub reservation_ids: Vec<ReservationId>,
}

/// What a caller supplies to [`Order::add_item`].
#[derive(Clone, Debug)]
pub struct NewOrderItem {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub unit_price: Money,
    pub book_title: String,
    pub variant_name: String,
    pub reservation_id: Option<ReservationId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 100))]
    pub recipient_name: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub street: String,
    pub ward: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub district: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
}

impl std::fmt::Display for ShippingAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}), {}", self.recipient_name, self.phone, self.street)?;
        if let Some(ward) = &self.ward { write!(f, ", {}", ward)?; }
        write!(f, ", {}, {}", self.district, self.city)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled }

impl OrderStatus {
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }
}

impl Order {
    pub fn create(id: OrderId, user_id: UserId, shipping_address: ShippingAddress, notes: Option<String>, currency: &str) -> Result<Self, OrderError> {
        shipping_address.validate().map_err(|e| OrderError::InvalidAddress(e.to_string()))?;
        let now = Utc::now();
        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let mut order = Self {
            id, user_id, items: vec![], total_amount: Money::zero(currency), discount_amount: Money::zero(currency),
            final_amount: Money::zero(currency), status: OrderStatus::Pending, voucher_id: None, shipping_address, notes,
            payments: vec![], created_at: now, updated_at: now, confirmed_at: None, completed_at: None,
            cancelled_at: None, cancellation_reason: None, events: vec![],
        };
        order.raise_event(OrderEvent::Created { order_id: id, user_id });
        Ok(order)
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn user_id(&self) -> UserId { self.user_id }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn total_amount(&self) -> &Money { &self.total_amount }
    pub fn discount_amount(&self) -> &Money { &self.discount_amount }
    pub fn final_amount(&self) -> &Money { &self.final_amount }
    pub fn currency(&self) -> &str { self.total_amount.currency() }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn voucher_id(&self) -> Option<VoucherId> { self.voucher_id }
    pub fn shipping_address(&self) -> &ShippingAddress { &self.shipping_address }
    pub fn notes(&self) -> Option<&str> { self.notes.as_deref() }
    pub fn payments(&self) -> &[Payment] { &self.payments }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> { self.confirmed_at }
    pub fn completed_at(&self) -> Option<DateTime<Utc>> { self.completed_at }
    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> { self.cancelled_at }
    pub fn cancellation_reason(&self) -> Option<&str> { self.cancellation_reason.as_deref() }

    pub fn reservation_ids(&self) -> Vec<(VariantId, ReservationId)> {
        self.items.iter().flat_map(|i| i.reservation_ids.iter().map(move |r| (i.variant_id, *r))).collect()
    }

    /// Adds a line, or increases the quantity of the line for the same variant.
    pub fn add_item(&mut self, item: NewOrderItem) -> Result<(), OrderError> {
        self.ensure_pending()?;
        if item.quantity == 0 { return Err(OrderError::InvalidQuantity(item.variant_id)); }
        self.total_amount.try_cmp(&item.unit_price)?;
        let (quantity, subtotal) = match self.items.iter().find(|i| i.variant_id == item.variant_id) {
            Some(existing) => {
                let quantity = existing.quantity.checked_add(item.quantity).ok_or(OrderError::InvalidQuantity(item.variant_id))?;
                (quantity, existing.unit_price.times(quantity)?)
            }
            None => (item.quantity, item.unit_price.times(item.quantity)?),
        };
        match self.items.iter_mut().find(|i| i.variant_id == item.variant_id) {
            Some(existing) => {
                existing.quantity = quantity;
                existing.subtotal = subtotal.clone();
                existing.reservation_ids.extend(item.reservation_id);
            }
            None => self.items.push(OrderItem {
                variant_id: item.variant_id, quantity, unit_price: item.unit_price, subtotal: subtotal.clone(),
                book_title: item.book_title, variant_name: item.variant_name,
                reservation_ids: item.reservation_id.into_iter().collect(),
            }),
        }
        self.recalculate();
        self.raise_event(OrderEvent::ItemAdded { order_id: self.id, variant_id: item.variant_id, quantity: item.quantity, line_quantity: quantity, subtotal });
        Ok(())
    }

    /// Removes the whole line for `variant_id` and hands it back so the
    /// caller can release its holds.
    pub fn remove_item(&mut self, variant_id: VariantId) -> Result<OrderItem, OrderError> {
        self.ensure_pending()?;
        let index = self.items.iter().position(|i| i.variant_id == variant_id).ok_or(OrderError::ItemNotFound(variant_id))?;
        let removed = self.items.remove(index);
        self.recalculate();
        self.raise_event(OrderEvent::ItemRemoved { order_id: self.id, variant_id });
        Ok(removed)
    }

    pub fn apply_voucher(&mut self, voucher_id: VoucherId, discount: Money) -> Result<(), OrderError> {
        self.ensure_pending()?;
        self.total_amount.try_cmp(&discount)?;
        self.voucher_id = Some(voucher_id);
        self.discount_amount = discount.clone();
        self.recalculate();
        self.raise_event(OrderEvent::VoucherApplied { order_id: self.id, voucher_id, discount });
        Ok(())
    }

    pub fn remove_voucher(&mut self) -> Result<(), OrderError> {
        self.ensure_pending()?;
        if let Some(voucher_id) = self.voucher_id.take() {
            self.discount_amount = Money::zero(self.currency());
            self.recalculate();
            self.raise_event(OrderEvent::VoucherRemoved { order_id: self.id, voucher_id });
        }
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending { return Err(self.invalid("confirm")); }
        if self.items.is_empty() { return Err(OrderError::NoItems(self.id)); }
        self.confirmed_at = Some(Utc::now());
        self.transition(OrderStatus::Confirmed);
        Ok(())
    }

    pub fn start_processing(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Confirmed { return Err(self.invalid("start processing")); }
        self.transition(OrderStatus::Processing);
        Ok(())
    }

    pub fn ship(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Processing { return Err(self.invalid("ship")); }
        self.transition(OrderStatus::Shipped);
        Ok(())
    }

    pub fn deliver(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Shipped { return Err(self.invalid("deliver")); }
        self.completed_at = Some(Utc::now());
        self.transition(OrderStatus::Delivered);
        Ok(())
    }

    pub fn can_be_cancelled(&self) -> bool { !self.status.is_terminal() }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if !self.can_be_cancelled() { return Err(self.invalid("cancel")); }
        let reason = reason.into();
        self.cancelled_at = Some(Utc::now());
        self.cancellation_reason = Some(reason.clone());
        self.transition(OrderStatus::Cancelled);
        self.raise_event(OrderEvent::Cancelled { order_id: self.id, reason });
        Ok(())
    }

    /// Appends a new pending payment attempt; the order status is unaffected.
    pub fn add_payment(&mut self, amount: Money, method: PaymentMethod) -> Result<PaymentId, OrderError> {
        if self.status == OrderStatus::Cancelled { return Err(self.invalid("add a payment to")); }
        self.total_amount.try_cmp(&amount)?;
        let payment = Payment::new(self.id, amount.clone(), method);
        let payment_id = payment.id();
        self.payments.push(payment);
        self.touch();
        self.raise_event(OrderEvent::PaymentAdded { order_id: self.id, payment_id, amount, method });
        Ok(payment_id)
    }

    pub fn payment(&self, id: PaymentId) -> Option<&Payment> { self.payments.iter().find(|p| p.id() == id) }

    pub fn payment_mut(&mut self, id: PaymentId) -> Result<&mut Payment, OrderError> {
        let index = self.payments.iter().position(|p| p.id() == id).ok_or(OrderError::PaymentNotFound(id))?;
        self.touch();
        Ok(&mut self.payments[index])
    }

    pub fn payment_by_reference(&self, reference: &str) -> Option<&Payment> {
        self.payments.iter().rev().find(|p| p.reference() == Some(reference))
    }

    /// Most recent gateway attempt still awaiting the gateway's answer.
    pub fn processing_gateway_payment(&self) -> Option<&Payment> {
        self.payments.iter().rev().find(|p| p.method() == PaymentMethod::Gateway && p.status() == PaymentStatus::Processing)
    }

    pub fn total_paid(&self) -> Money {
        self.payments.iter().filter(|p| p.is_completed())
            .fold(Money::zero(self.currency()), |acc, p| acc.add(p.amount()).unwrap_or(acc))
    }

    pub fn is_fully_paid(&self) -> bool { self.total_paid() >= self.final_amount }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        let mut events = std::mem::take(&mut self.events);
        for payment in &mut self.payments { events.extend(payment.take_events()); }
        events
    }

    fn ensure_pending(&self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending { return Err(OrderError::NotPending { order_id: self.id, status: self.status }); }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> OrderError {
        OrderError::InvalidTransition { order_id: self.id, status: self.status, action }
    }

    fn transition(&mut self, to: OrderStatus) {
        let from = std::mem::replace(&mut self.status, to);
        self.touch();
        self.raise_event(OrderEvent::StatusChanged { order_id: self.id, from, to });
    }

    fn recalculate(&mut self) {
        let currency = self.currency().to_string();
        self.total_amount = self.items.iter().fold(Money::zero(&currency), |acc, i| acc.add(&i.subtotal).unwrap_or(acc));
        self.final_amount = self.total_amount.subtract(&self.discount_amount).unwrap_or_else(|_| self.total_amount.clone());
        self.touch();
    }

    fn raise_event(&mut self, e: OrderEvent) { self.events.push(DomainEvent::Order(e)); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order {order_id} can only be modified while pending (status {status:?})")]
    NotPending { order_id: OrderId, status: OrderStatus },
    #[error("cannot {action} order {order_id} in status {status:?}")]
    InvalidTransition { order_id: OrderId, status: OrderStatus, action: &'static str },
    #[error("order {0} has no items")]
    NoItems(OrderId),
    #[error("invalid quantity for variant {0}")]
    InvalidQuantity(VariantId),
    #[error("order has no line for variant {0}")]
    ItemNotFound(VariantId),
    #[error("invalid shipping address: {0}")]
    InvalidAddress(String),
    #[error("payment {0} not found on order")]
    PaymentNotFound(PaymentId),
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotPending { .. } | Self::InvalidTransition { .. } => ErrorKind::State,
            Self::NoItems(_) => ErrorKind::BusinessRule,
            Self::InvalidQuantity(_) | Self::InvalidAddress(_) => ErrorKind::Validation,
            Self::ItemNotFound(_) | Self::PaymentNotFound(_) => ErrorKind::NotFound,
            Self::Money(e) => e.kind(),
            Self::Payment(e) => e.kind(),
        }
    }
}
