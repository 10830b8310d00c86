//! Aggregates module
pub mod inventory;
pub mod voucher;
pub mod order;
pub mod payment;

pub use inventory::{Inventory, InventoryError, InventoryReservation, DEFAULT_RESERVATION_MINUTES};
pub use voucher::{DiscountType, NewVoucher, UserVoucherUsage, Voucher, VoucherError};
pub use order::{NewOrderItem, Order, OrderError, OrderItem, OrderStatus, ShippingAddress};
pub use payment::{Payment, PaymentError, PaymentMethod, PaymentStatus, Refund};
