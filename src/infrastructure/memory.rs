//! In-memory implementation of every checkout collaborator. Backs the demo
//! binary and the tests.
//!
//! Locking is per call: a find/modify/save cycle is not isolated, so two
//! writers to the same inventory (a checkout and the reservation sweep) can
//! overwrite each other. The sweep re-reads before saving to keep that rare;
//! a persistent store should use conditional writes on `updated_at`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::RwLock;

use crate::application::ports::{AddressBook, Catalog, InventoryStore, OrderStore, VariantListing, VoucherStore};
use crate::domain::aggregates::{Inventory, Order, ShippingAddress, Voucher};
use crate::domain::value_objects::{AddressId, OrderId, UserId, VariantId};

#[derive(Clone, Debug)]
struct StoredAddress {
    id: AddressId,
    address: ShippingAddress,
    is_default: bool,
}

#[derive(Debug)]
pub struct InMemoryStore {
    addresses: RwLock<HashMap<UserId, Vec<StoredAddress>>>,
    variants: RwLock<HashMap<VariantId, VariantListing>>,
    inventories: RwLock<HashMap<VariantId, Inventory>>,
    vouchers: RwLock<HashMap<String, Voucher>>,
    orders: RwLock<HashMap<OrderId, Order>>,
    next_order_id: AtomicI64,
    reject_voucher_saves: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self { Self::new() }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            addresses: RwLock::default(),
            variants: RwLock::default(),
            inventories: RwLock::default(),
            vouchers: RwLock::default(),
            orders: RwLock::default(),
            next_order_id: AtomicI64::new(1),
            reject_voucher_saves: AtomicBool::new(false),
        }
    }

    pub async fn add_address(&self, user_id: UserId, id: AddressId, address: ShippingAddress, is_default: bool) {
        self.addresses.write().await.entry(user_id).or_default().push(StoredAddress { id, address, is_default });
    }

    pub async fn add_variant(&self, listing: VariantListing) {
        self.variants.write().await.insert(listing.variant_id, listing);
    }

    pub async fn put_inventory(&self, inventory: Inventory) {
        self.inventories.write().await.insert(inventory.variant_id(), inventory);
    }

    pub async fn put_voucher(&self, voucher: Voucher) {
        self.vouchers.write().await.insert(voucher.code().to_string(), voucher);
    }

    /// Makes every following voucher save fail, to exercise recovery paths.
    pub fn reject_voucher_saves(&self, reject: bool) { self.reject_voucher_saves.store(reject, Ordering::SeqCst); }
}

#[async_trait]
impl AddressBook for InMemoryStore {
    async fn find(&self, user_id: UserId, address_id: AddressId) -> anyhow::Result<Option<ShippingAddress>> {
        let addresses = self.addresses.read().await;
        Ok(addresses.get(&user_id).and_then(|list| list.iter().find(|a| a.id == address_id)).map(|a| a.address.clone()))
    }

    async fn default_for(&self, user_id: UserId) -> anyhow::Result<Option<ShippingAddress>> {
        let addresses = self.addresses.read().await;
        Ok(addresses.get(&user_id).and_then(|list| list.iter().find(|a| a.is_default)).map(|a| a.address.clone()))
    }
}

#[async_trait]
impl Catalog for InMemoryStore {
    async fn find_variant(&self, variant_id: VariantId) -> anyhow::Result<Option<VariantListing>> {
        Ok(self.variants.read().await.get(&variant_id).cloned())
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn find(&self, variant_id: VariantId) -> anyhow::Result<Option<Inventory>> {
        Ok(self.inventories.read().await.get(&variant_id).cloned())
    }

    async fn save(&self, inventory: &Inventory) -> anyhow::Result<()> {
        self.inventories.write().await.insert(inventory.variant_id(), inventory.clone());
        Ok(())
    }

    async fn with_expired_reservations(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Inventory>> {
        let inventories = self.inventories.read().await;
        Ok(inventories.values().filter(|i| i.has_expired_reservations_at(now)).cloned().collect())
    }
}

#[async_trait]
impl VoucherStore for InMemoryStore {
    async fn find_by_code(&self, code: &str) -> anyhow::Result<Option<Voucher>> {
        Ok(self.vouchers.read().await.get(&code.trim().to_uppercase()).cloned())
    }

    async fn save(&self, voucher: &Voucher) -> anyhow::Result<()> {
        if self.reject_voucher_saves.load(Ordering::SeqCst) {
            anyhow::bail!("voucher store unavailable");
        }
        self.vouchers.write().await.insert(voucher.code().to_string(), voucher.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn next_id(&self) -> anyhow::Result<OrderId> {
        Ok(OrderId::new(self.next_order_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn find(&self, order_id: OrderId) -> anyhow::Result<Option<Order>> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn save(&self, order: &Order) -> anyhow::Result<()> {
        self.orders.write().await.insert(order.id(), order.clone());
        Ok(())
    }
}
