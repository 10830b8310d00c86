//! Use cases built on the domain model.
pub mod checkout;
pub mod payment;
pub mod ports;

pub use checkout::{CheckoutItem, CheckoutOutcome, CheckoutRequest, CheckoutService, CallbackOutcome, Stores};
pub use payment::{PaymentContext, PaymentInitiation, PaymentService};
pub use ports::{AddressBook, Catalog, InventoryStore, OrderStore, VariantListing, VoucherStore};
