//! Domain events
//!
//! Aggregates buffer these while they mutate; whoever persisted the aggregate
//! drains them with `take_events()` and hands them to a publisher.
use crate::domain::value_objects::{Money, OrderId, PaymentId, RefundId, ReservationId, UserId, VariantId, VoucherId};
use crate::domain::aggregates::{OrderStatus, PaymentMethod};
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event")]
pub enum DomainEvent {
    Order(OrderEvent),
    Payment(PaymentEvent),
    Inventory(InventoryEvent),
    Voucher(VoucherEvent),
}

#[derive(Clone, Debug, Serialize)]
pub enum OrderEvent {
    Created { order_id: OrderId, user_id: UserId },
    /// `quantity` is what was added; `line_quantity` the line's new total.
    ItemAdded { order_id: OrderId, variant_id: VariantId, quantity: u32, line_quantity: u32, subtotal: Money },
    ItemRemoved { order_id: OrderId, variant_id: VariantId },
    VoucherApplied { order_id: OrderId, voucher_id: VoucherId, discount: Money },
    VoucherRemoved { order_id: OrderId, voucher_id: VoucherId },
    StatusChanged { order_id: OrderId, from: OrderStatus, to: OrderStatus },
    Cancelled { order_id: OrderId, reason: String },
    PaymentAdded { order_id: OrderId, payment_id: PaymentId, amount: Money, method: PaymentMethod },
}

#[derive(Clone, Debug, Serialize)]
pub enum PaymentEvent {
    ProcessingStarted { payment_id: PaymentId, order_id: OrderId },
    Completed { payment_id: PaymentId, order_id: OrderId, transaction_id: String },
    Failed { payment_id: PaymentId, order_id: OrderId, reason: String },
    Cancelled { payment_id: PaymentId, order_id: OrderId },
    RefundCreated { payment_id: PaymentId, refund_id: RefundId, amount: Money },
    Refunded { payment_id: PaymentId, order_id: OrderId },
}

#[derive(Clone, Debug, Serialize)]
pub enum InventoryEvent {
    Reserved { variant_id: VariantId, reservation_id: ReservationId, quantity: u32 },
    ReservationConfirmed { variant_id: VariantId, reservation_id: ReservationId, quantity: u32 },
    ReservationReleased { variant_id: VariantId, reservation_id: ReservationId },
    ReservationsExpired { variant_id: VariantId, count: usize },
    Restocked { variant_id: VariantId, quantity: u32 },
    StockDeducted { variant_id: VariantId, quantity: u32 },
    LowStock { variant_id: VariantId, stock: u32 },
}

#[derive(Clone, Debug, Serialize)]
pub enum VoucherEvent {
    Used { voucher_id: VoucherId, user_id: UserId, order_id: OrderId },
}
