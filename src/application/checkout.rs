//! Checkout orchestration.
//!
//! Turns a cart into a persisted order: resolve the shipping address, hold
//! stock for every line, apply a voucher, persist, then start the payment.
//! Failures come back as a [`CheckoutOutcome`] rather than an error. Any
//! holds taken before the failure are released, and an order that was
//! already persisted is cancelled.
//!
//! The same service drives the rest of the order lifecycle: gateway
//! callbacks, manual confirmation, shipping, delivery (which collects cash),
//! cancellation, refunds and the reservation sweep.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use crate::application::payment::{CallbackResult, PaymentContext, PaymentInitiation, PaymentService};
use crate::application::ports::{AddressBook, Catalog, InventoryStore, OrderStore, VoucherStore};
use crate::config::CheckoutConfig;
use crate::domain::aggregates::{InventoryError, NewOrderItem, Order, OrderStatus, PaymentMethod, ShippingAddress, Voucher, VoucherError};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{AddressId, Money, OrderId, PaymentId, RefundId, ReservationId, UserId, VariantId};
use crate::gateway::PaymentRequest;
use crate::{BookstoreError, ErrorKind, Result};

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct CheckoutItem {
    pub variant_id: VariantId,
    #[validate(range(min = 1, max = 99))]
    pub quantity: u32,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    #[validate(length(min = 1, max = 50))]
    pub items: Vec<CheckoutItem>,
    /// Falls back to the user's default address when absent.
    pub address_id: Option<AddressId>,
    #[validate(length(min = 1, max = 50))]
    pub voucher_code: Option<String>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    pub payment_method: PaymentMethod,
    #[validate(url)]
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
    pub bank_code: Option<String>,
}

impl CheckoutRequest {
    fn validate_all(&self) -> Result<()> {
        self.validate()?;
        for item in &self.items { item.validate()?; }
        Ok(())
    }

    fn payment_context(&self) -> PaymentContext {
        PaymentContext { return_url: self.return_url.clone(), client_ip: self.client_ip.clone(), bank_code: self.bank_code.clone() }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckoutOutcome {
    pub success: bool,
    pub message: String,
    /// Set whenever an order was persisted, including on failure.
    pub order_id: Option<OrderId>,
    pub payment: Option<PaymentInitiation>,
    pub error_kind: Option<ErrorKind>,
    #[serde(skip)]
    pub events: Vec<DomainEvent>,
}

impl CheckoutOutcome {
    pub fn payment_url(&self) -> Option<&str> {
        match &self.payment {
            Some(PaymentInitiation::Redirect { url, .. }) => Some(url.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CallbackOutcome {
    pub success: bool,
    #[serde(flatten)]
    pub result: CallbackResult,
    #[serde(skip)]
    pub events: Vec<DomainEvent>,
}

/// Collaborators of the checkout.
#[derive(Clone)]
pub struct Stores {
    pub addresses: Arc<dyn AddressBook>,
    pub catalog: Arc<dyn Catalog>,
    pub inventory: Arc<dyn InventoryStore>,
    pub vouchers: Arc<dyn VoucherStore>,
    pub orders: Arc<dyn OrderStore>,
}

/// What a checkout run has done so far, for compensation.
#[derive(Debug, Default)]
struct Progress {
    reservations: Vec<(VariantId, ReservationId)>,
    persisted_order: Option<OrderId>,
    events: Vec<DomainEvent>,
}

struct Placed {
    order_id: OrderId,
    payment: PaymentInitiation,
}

pub struct CheckoutService {
    stores: Stores,
    payments: PaymentService,
    config: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(stores: Stores, payments: PaymentService, config: CheckoutConfig) -> Self {
        Self { stores, payments, config }
    }

    pub fn payments(&self) -> &PaymentService { &self.payments }

    #[instrument(skip(self, request), fields(user_id = %request.user_id, method = ?request.payment_method, items = request.items.len()))]
    pub async fn checkout(&self, request: CheckoutRequest) -> CheckoutOutcome {
        let mut progress = Progress::default();
        match self.place_order(&request, &mut progress).await {
            Ok(placed) => {
                info!(order_id = %placed.order_id, "checkout completed");
                let message = match placed.payment {
                    PaymentInitiation::Cash { .. } => "Order placed, payment will be collected on delivery",
                    PaymentInitiation::Redirect { .. } => "Order placed, continue to the payment gateway",
                };
                CheckoutOutcome {
                    success: true, message: message.to_string(), order_id: Some(placed.order_id),
                    payment: Some(placed.payment), error_kind: None, events: progress.events,
                }
            }
            Err(err) => {
                match err.kind() {
                    ErrorKind::Unexpected => error!(error = ?err, "checkout failed unexpectedly"),
                    kind => warn!(?kind, error = %err, "checkout rejected"),
                }
                let reason = err.public_message();
                self.compensate(&mut progress, &reason).await;
                CheckoutOutcome {
                    success: false, message: reason, order_id: progress.persisted_order,
                    payment: None, error_kind: Some(err.kind()), events: progress.events,
                }
            }
        }
    }

    async fn place_order(&self, request: &CheckoutRequest, progress: &mut Progress) -> Result<Placed> {
        request.validate_all()?;
        let address = self.resolve_address(request.user_id, request.address_id).await?;
        let order_id = self.stores.orders.next_id().await?;
        let mut order = Order::create(order_id, request.user_id, address, request.notes.clone(), &self.config.currency)?;
        let ttl = Duration::minutes(self.config.reservation_ttl_minutes);

        for item in &request.items {
            let mut inventory = self.stores.inventory.find(item.variant_id).await?
                .ok_or_else(|| BookstoreError::not_found("inventory", item.variant_id))?;
            if !inventory.is_available(item.quantity) {
                return Err(InventoryError::InsufficientStock {
                    variant_id: item.variant_id, requested: item.quantity, available: inventory.available_stock(),
                }.into());
            }
            let listing = self.stores.catalog.find_variant(item.variant_id).await?
                .ok_or_else(|| BookstoreError::not_found("variant", item.variant_id))?;
            let reservation_id = inventory.reserve(item.quantity, ttl)?;
            let events = inventory.take_events();
            self.stores.inventory.save(&inventory).await?;
            progress.reservations.push((item.variant_id, reservation_id));
            progress.events.extend(events);
            debug!(variant_id = %item.variant_id, quantity = item.quantity, %reservation_id, "stock reserved");

            order.add_item(NewOrderItem {
                variant_id: item.variant_id, quantity: item.quantity, unit_price: listing.price,
                book_title: listing.book_title, variant_name: listing.variant_name, reservation_id: Some(reservation_id),
            })?;
        }

        let voucher = match request.voucher_code.as_deref() {
            Some(code) => Some(self.apply_voucher(&mut order, code).await?),
            None => None,
        };

        let events = order.take_events();
        self.stores.orders.save(&order).await?;
        progress.persisted_order = Some(order_id);
        progress.events.extend(events);

        if let Some(mut voucher) = voucher {
            let events = voucher.take_events();
            self.stores.vouchers.save(&voucher).await?;
            progress.events.extend(events);
        }

        let payment = self.payments.start_payment(&mut order, request.payment_method, &request.payment_context())?;
        let events = order.take_events();
        self.stores.orders.save(&order).await?;
        progress.events.extend(events);
        Ok(Placed { order_id, payment })
    }

    async fn resolve_address(&self, user_id: UserId, address_id: Option<AddressId>) -> Result<ShippingAddress> {
        let address = match address_id {
            Some(id) => self.stores.addresses.find(user_id, id).await?,
            None => self.stores.addresses.default_for(user_id).await?,
        };
        address.ok_or_else(|| BookstoreError::not_found("shipping address", address_id.map_or_else(|| format!("default of user {}", user_id), |id| id.to_string())))
    }

    /// Applies the voucher to the order and records the user's single use.
    /// The voucher is returned unsaved; it is persisted after the order.
    async fn apply_voucher(&self, order: &mut Order, code: &str) -> Result<Voucher> {
        let mut voucher = self.stores.vouchers.find_by_code(code).await?
            .ok_or_else(|| BookstoreError::not_found("voucher", code))?;
        if !voucher.is_valid() {
            return Err(VoucherError::NotValid(voucher.code().to_string()).into());
        }
        if !voucher.can_apply(order.total_amount()) {
            return Err(VoucherError::NotApplicable { code: voucher.code().to_string(), amount: order.total_amount().clone() }.into());
        }
        let discount = voucher.calculate_discount(order.total_amount());
        voucher.record_use(order.user_id(), order.id())?;
        order.apply_voucher(voucher.id(), discount.clone())?;
        info!(voucher_code = %voucher.code(), %discount, "voucher applied");
        Ok(voucher)
    }

    /// Releases the holds a failed checkout took and cancels its order if it
    /// had already been persisted. Best effort: failures are logged.
    async fn compensate(&self, progress: &mut Progress, reason: &str) {
        for (variant_id, reservation_id) in progress.reservations.drain(..) {
            match self.release(variant_id, reservation_id).await {
                Ok(events) => progress.events.extend(events),
                Err(err) => warn!(%variant_id, %reservation_id, error = %err, "could not release reservation"),
            }
        }
        if let Some(order_id) = progress.persisted_order {
            match self.cancel_unplaced(order_id, reason).await {
                Ok(events) => progress.events.extend(events),
                Err(err) => error!(%order_id, error = %err, "could not cancel order after failed checkout"),
            }
        }
    }

    async fn cancel_unplaced(&self, order_id: OrderId, reason: &str) -> Result<Vec<DomainEvent>> {
        let mut order = self.load_order(order_id).await?;
        if !order.can_be_cancelled() { return Ok(vec![]); }
        order.cancel(format!("Checkout failed: {}", reason))?;
        self.cancel_open_payments(&mut order)?;
        self.persist_order(&mut order).await
    }

    async fn release(&self, variant_id: VariantId, reservation_id: ReservationId) -> Result<Vec<DomainEvent>> {
        let mut inventory = self.stores.inventory.find(variant_id).await?
            .ok_or_else(|| BookstoreError::not_found("inventory", variant_id))?;
        match inventory.release_reservation(reservation_id) {
            Ok(()) => {}
            // Already consumed, released or swept.
            Err(InventoryError::ReservationNotFound(_)) => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        }
        let events = inventory.take_events();
        self.stores.inventory.save(&inventory).await?;
        Ok(events)
    }

    /// Verifies a gateway callback and applies it. A confirmed order takes its
    /// lines out of stock; when that stock is gone the callback fails and the
    /// order is left as it was.
    #[instrument(skip(self, params))]
    pub async fn handle_gateway_callback(&self, params: &BTreeMap<String, String>) -> Result<CallbackOutcome> {
        let callback = self.payments.gateway().verify_callback(params)?;
        let mut order = self.load_order(callback.order_id).await?;
        let result = self.payments.apply_callback(&mut order, &callback)?;
        let mut events = Vec::new();
        if result.order_confirmed {
            events.extend(self.fulfil_order(&order).await.map_err(|err| {
                error!(order_id = %order.id(), error = %err, "paid order could not be fulfilled from stock");
                err
            })?);
        }
        events.extend(self.persist_order(&mut order).await?);
        Ok(CallbackOutcome { success: callback.is_success(), result, events })
    }

    /// Manual confirmation, e.g. of a cash order by staff.
    pub async fn confirm_order(&self, order_id: OrderId) -> Result<Vec<DomainEvent>> {
        let mut order = self.load_order(order_id).await?;
        order.confirm()?;
        let mut events = self.fulfil_order(&order).await?;
        events.extend(self.persist_order(&mut order).await?);
        info!(%order_id, "order confirmed");
        Ok(events)
    }

    pub async fn start_processing(&self, order_id: OrderId) -> Result<Vec<DomainEvent>> {
        let mut order = self.load_order(order_id).await?;
        order.start_processing()?;
        self.persist_order(&mut order).await
    }

    pub async fn ship_order(&self, order_id: OrderId) -> Result<Vec<DomainEvent>> {
        let mut order = self.load_order(order_id).await?;
        order.ship()?;
        self.persist_order(&mut order).await
    }

    /// Marks the order delivered and completes any cash still owed on it.
    pub async fn deliver_order(&self, order_id: OrderId) -> Result<Vec<DomainEvent>> {
        let mut order = self.load_order(order_id).await?;
        order.deliver()?;
        let collected = self.payments.collect_cash(&mut order)?;
        info!(%order_id, cash_payments = collected.len(), "order delivered");
        self.persist_order(&mut order).await
    }

    /// Cancels the order and its open payments. A pending order gives back its
    /// holds; a confirmed one puts its lines back into stock.
    pub async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<Vec<DomainEvent>> {
        let mut order = self.load_order(order_id).await?;
        let was_pending = order.status() == OrderStatus::Pending;
        order.cancel(reason)?;
        self.cancel_open_payments(&mut order)?;
        let mut events = self.persist_order(&mut order).await?;
        if was_pending {
            for (variant_id, reservation_id) in order.reservation_ids() {
                match self.release(variant_id, reservation_id).await {
                    Ok(released) => events.extend(released),
                    Err(err) => warn!(%order_id, %variant_id, error = %err, "could not release reservation"),
                }
            }
        } else {
            for item in order.items() {
                match self.restock(item.variant_id, item.quantity).await {
                    Ok(restocked) => events.extend(restocked),
                    Err(err) => error!(%order_id, variant_id = %item.variant_id, quantity = item.quantity, error = %err, "could not return stock of cancelled order"),
                }
            }
        }
        info!(%order_id, reason, "order cancelled");
        Ok(events)
    }

    pub async fn refund_payment(&self, order_id: OrderId, payment_id: PaymentId, amount: Money, reason: &str) -> Result<(RefundId, Vec<DomainEvent>)> {
        let mut order = self.load_order(order_id).await?;
        let refund_id = order.payment_mut(payment_id)?.create_refund(amount, reason)?;
        let events = self.persist_order(&mut order).await?;
        info!(%order_id, %payment_id, %refund_id, "refund created");
        Ok((refund_id, events))
    }

    /// New gateway attempt for a pending order. A gateway attempt still in
    /// flight is cancelled first so the callback for it is rejected.
    pub async fn retry_gateway_payment(&self, order_id: OrderId, return_url: &str, client_ip: &str) -> Result<(PaymentRequest, Vec<DomainEvent>)> {
        let mut order = self.load_order(order_id).await?;
        if order.status() != OrderStatus::Pending {
            return Err(crate::domain::aggregates::OrderError::NotPending { order_id, status: order.status() }.into());
        }
        if let Some(previous) = order.processing_gateway_payment().map(|p| p.id()) {
            order.payment_mut(previous)?.cancel()?;
        }
        let (_, request) = self.payments.create_payment_url(&mut order, return_url, client_ip, None)?;
        let events = self.persist_order(&mut order).await?;
        Ok((request, events))
    }

    /// Drops expired holds everywhere. Meant for a periodic task owned by the
    /// caller; returns how many holds were dropped and the resulting events.
    ///
    /// An inventory written by someone else since it was read is skipped and
    /// left for the next run. The re-read narrows the window for a lost
    /// update but only a store with conditional writes closes it.
    #[instrument(skip(self))]
    pub async fn sweep_expired_reservations(&self, now: DateTime<Utc>) -> Result<(usize, Vec<DomainEvent>)> {
        let mut removed = 0;
        let mut events = Vec::new();
        for mut inventory in self.stores.inventory.with_expired_reservations(now).await? {
            let read_version = inventory.updated_at();
            let dropped = inventory.cleanup_expired_reservations_at(now);
            let current = self.stores.inventory.find(inventory.variant_id()).await?;
            if current.map(|c| c.updated_at()) != Some(read_version) {
                debug!(variant_id = %inventory.variant_id(), "inventory changed during sweep, skipped");
                continue;
            }
            self.stores.inventory.save(&inventory).await?;
            removed += dropped;
            events.extend(inventory.take_events());
        }
        if removed > 0 { info!(removed, "expired reservations swept"); }
        Ok((removed, events))
    }

    /// Takes every line of a confirmed order out of stock. All inventories
    /// are checked before any is saved, so a shortage on one line leaves the
    /// others untouched.
    async fn fulfil_order(&self, order: &Order) -> Result<Vec<DomainEvent>> {
        let now = Utc::now();
        let mut staged = Vec::with_capacity(order.items().len());
        for item in order.items() {
            let mut inventory = self.stores.inventory.find(item.variant_id).await?
                .ok_or_else(|| BookstoreError::not_found("inventory", item.variant_id))?;
            inventory.fulfil_at(&item.reservation_ids, item.quantity, now)?;
            staged.push(inventory);
        }
        let mut events = Vec::new();
        for mut inventory in staged {
            events.extend(inventory.take_events());
            self.stores.inventory.save(&inventory).await?;
        }
        Ok(events)
    }

    async fn restock(&self, variant_id: VariantId, quantity: u32) -> Result<Vec<DomainEvent>> {
        let mut inventory = self.stores.inventory.find(variant_id).await?
            .ok_or_else(|| BookstoreError::not_found("inventory", variant_id))?;
        inventory.add_stock(quantity)?;
        let events = inventory.take_events();
        self.stores.inventory.save(&inventory).await?;
        Ok(events)
    }

    fn cancel_open_payments(&self, order: &mut Order) -> Result<()> {
        let open: Vec<PaymentId> = order.payments().iter().filter(|p| !p.status().is_terminal()).map(|p| p.id()).collect();
        for payment_id in open {
            order.payment_mut(payment_id)?.cancel()?;
        }
        Ok(())
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Order> {
        self.stores.orders.find(order_id).await?.ok_or_else(|| BookstoreError::not_found("order", order_id))
    }

    async fn persist_order(&self, order: &mut Order) -> Result<Vec<DomainEvent>> {
        let events = order.take_events();
        self.stores.orders.save(order).await?;
        Ok(events)
    }
}
