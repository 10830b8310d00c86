//! Collaborators the checkout consumes. Storage, transactions and locking
//! belong to the implementations; failures come back as `anyhow::Error`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::aggregates::{Inventory, Order, ShippingAddress, Voucher};
use crate::domain::value_objects::{AddressId, Money, OrderId, UserId, VariantId};

/// Price and title snapshot of a sellable book variant.
#[derive(Clone, Debug)]
pub struct VariantListing {
    pub variant_id: VariantId,
    pub book_title: String,
    pub variant_name: String,
    pub price: Money,
}

#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn find(&self, user_id: UserId, address_id: AddressId) -> anyhow::Result<Option<ShippingAddress>>;
    async fn default_for(&self, user_id: UserId) -> anyhow::Result<Option<ShippingAddress>>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn find_variant(&self, variant_id: VariantId) -> anyhow::Result<Option<VariantListing>>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn find(&self, variant_id: VariantId) -> anyhow::Result<Option<Inventory>>;
    async fn save(&self, inventory: &Inventory) -> anyhow::Result<()>;
    /// Inventories holding at least one reservation expired at `now`.
    async fn with_expired_reservations(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Inventory>>;
}

#[async_trait]
pub trait VoucherStore: Send + Sync {
    async fn find_by_code(&self, code: &str) -> anyhow::Result<Option<Voucher>>;
    async fn save(&self, voucher: &Voucher) -> anyhow::Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn next_id(&self) -> anyhow::Result<OrderId>;
    async fn find(&self, order_id: OrderId) -> anyhow::Result<Option<Order>>;
    async fn save(&self, order: &Order) -> anyhow::Result<()>;
}
