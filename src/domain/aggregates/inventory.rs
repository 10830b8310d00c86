//! Inventory Aggregate
//!
//! Physical stock for one variant plus the time-bounded holds placed on it.
//! Holds lower the *available* stock only; `confirm_reservation` and
//! `fulfil` are the paths that consume physical stock. Nothing in here runs on a timer: expired
//! holds stop counting as soon as they are past `expires_at` and are removed
//! when a caller runs `cleanup_expired_reservations`.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::domain::value_objects::{ReservationId, VariantId};
use crate::ErrorKind;

pub const DEFAULT_RESERVATION_MINUTES: i64 = 15;

#[derive(Clone, Debug)]
pub struct Inventory {
    variant_id: VariantId,
    stock: u32,
    min_stock_level: u32,
    reservations: Vec<InventoryReservation>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryReservation {
    pub id: ReservationId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl InventoryReservation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }
}

impl Inventory {
    pub fn create(variant_id: VariantId, initial_stock: u32, min_stock_level: u32) -> Self {
        Self { variant_id, stock: initial_stock, min_stock_level, reservations: vec![], updated_at: Utc::now(), events: vec![] }
    }

    pub fn variant_id(&self) -> VariantId { self.variant_id }
    pub fn stock(&self) -> u32 { self.stock }
    pub fn min_stock_level(&self) -> u32 { self.min_stock_level }
    pub fn reservations(&self) -> &[InventoryReservation] { &self.reservations }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_low_stock(&self) -> bool { self.stock <= self.min_stock_level }

    pub fn reservation(&self, id: ReservationId) -> Option<&InventoryReservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn available_stock(&self) -> u32 { self.available_stock_at(Utc::now()) }

    pub fn available_stock_at(&self, now: DateTime<Utc>) -> u32 {
        let held: u32 = self.reservations.iter().filter(|r| !r.is_expired_at(now)).map(|r| r.quantity).sum();
        self.stock.saturating_sub(held)
    }

    pub fn is_available(&self, quantity: u32) -> bool { self.is_available_at(quantity, Utc::now()) }

    pub fn is_available_at(&self, quantity: u32, now: DateTime<Utc>) -> bool {
        self.available_stock_at(now) >= quantity
    }

    pub fn reserve(&mut self, quantity: u32, duration: Duration) -> Result<ReservationId, InventoryError> {
        self.reserve_at(quantity, duration, Utc::now())
    }

    /// Places a hold of `quantity` until `now + duration`. A non-positive
    /// duration falls back to the default hold time.
    pub fn reserve_at(&mut self, quantity: u32, duration: Duration, now: DateTime<Utc>) -> Result<ReservationId, InventoryError> {
        if quantity == 0 { return Err(InventoryError::InvalidQuantity); }
        let available = self.available_stock_at(now);
        if available < quantity {
            return Err(InventoryError::InsufficientStock { variant_id: self.variant_id, requested: quantity, available });
        }
        let duration = if duration <= Duration::zero() { Duration::minutes(DEFAULT_RESERVATION_MINUTES) } else { duration };
        let reservation = InventoryReservation {
            id: ReservationId::new(),
            variant_id: self.variant_id,
            quantity,
            created_at: now,
            expires_at: now + duration,
        };
        let id = reservation.id;
        self.reservations.push(reservation);
        self.touch(now);
        self.raise_event(DomainEvent::Inventory(InventoryEvent::Reserved { variant_id: self.variant_id, reservation_id: id, quantity }));
        Ok(id)
    }

    pub fn confirm_reservation(&mut self, id: ReservationId) -> Result<(), InventoryError> {
        self.confirm_reservation_at(id, Utc::now())
    }

    pub fn confirm_reservation_at(&mut self, id: ReservationId, now: DateTime<Utc>) -> Result<(), InventoryError> {
        let index = self.reservations.iter().position(|r| r.id == id).ok_or(InventoryError::ReservationNotFound(id))?;
        let reservation = &self.reservations[index];
        if reservation.is_expired_at(now) { return Err(InventoryError::ReservationExpired(id)); }
        let quantity = reservation.quantity;
        let remaining = self.stock.checked_sub(quantity).ok_or(InventoryError::InsufficientStock {
            variant_id: self.variant_id,
            requested: quantity,
            available: self.stock,
        })?;
        self.stock = remaining;
        self.reservations.remove(index);
        self.touch(now);
        self.raise_event(DomainEvent::Inventory(InventoryEvent::ReservationConfirmed { variant_id: self.variant_id, reservation_id: id, quantity }));
        if self.is_low_stock() {
            self.raise_event(DomainEvent::Inventory(InventoryEvent::LowStock { variant_id: self.variant_id, stock: self.stock }));
        }
        Ok(())
    }

    pub fn fulfil(&mut self, reservation_ids: &[ReservationId], quantity: u32) -> Result<(), InventoryError> {
        self.fulfil_at(reservation_ids, quantity, Utc::now())
    }

    /// Takes `quantity` out of physical stock for a confirmed order line.
    /// Live holds in `reservation_ids` are consumed first; holds that expired
    /// or were swept are dropped and their share is taken from available
    /// stock. Fails without changes when that share is not available.
    pub fn fulfil_at(&mut self, reservation_ids: &[ReservationId], quantity: u32, now: DateTime<Utc>) -> Result<(), InventoryError> {
        if quantity == 0 { return Err(InventoryError::InvalidQuantity); }
        let live: Vec<(ReservationId, u32)> = self.reservations.iter()
            .filter(|r| reservation_ids.contains(&r.id) && !r.is_expired_at(now))
            .map(|r| (r.id, r.quantity))
            .collect();
        let held: u32 = live.iter().map(|(_, q)| q).sum();
        let direct = quantity.saturating_sub(held);
        let available = self.available_stock_at(now);
        if direct > available {
            return Err(InventoryError::InsufficientStock { variant_id: self.variant_id, requested: direct, available });
        }

        for (id, _) in &live {
            self.confirm_reservation_at(*id, now)?;
        }
        let stale_before = self.reservations.len();
        self.reservations.retain(|r| !reservation_ids.contains(&r.id));
        if self.reservations.len() < stale_before {
            self.raise_event(DomainEvent::Inventory(InventoryEvent::ReservationsExpired { variant_id: self.variant_id, count: stale_before - self.reservations.len() }));
        }
        if direct > 0 {
            self.stock -= direct;
            self.touch(now);
            self.raise_event(DomainEvent::Inventory(InventoryEvent::StockDeducted { variant_id: self.variant_id, quantity: direct }));
            if self.is_low_stock() {
                self.raise_event(DomainEvent::Inventory(InventoryEvent::LowStock { variant_id: self.variant_id, stock: self.stock }));
            }
        }
        Ok(())
    }

    pub fn release_reservation(&mut self, id: ReservationId) -> Result<(), InventoryError> {
        let before = self.reservations.len();
        self.reservations.retain(|r| r.id != id);
        if self.reservations.len() == before { return Err(InventoryError::ReservationNotFound(id)); }
        self.touch(Utc::now());
        self.raise_event(DomainEvent::Inventory(InventoryEvent::ReservationReleased { variant_id: self.variant_id, reservation_id: id }));
        Ok(())
    }

    pub fn cleanup_expired_reservations(&mut self) -> usize { self.cleanup_expired_reservations_at(Utc::now()) }

    /// Drops every hold past its expiry and returns how many were dropped.
    pub fn cleanup_expired_reservations_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.reservations.len();
        self.reservations.retain(|r| !r.is_expired_at(now));
        let removed = before - self.reservations.len();
        if removed > 0 {
            self.touch(now);
            self.raise_event(DomainEvent::Inventory(InventoryEvent::ReservationsExpired { variant_id: self.variant_id, count: removed }));
        }
        removed
    }

    pub fn has_expired_reservations_at(&self, now: DateTime<Utc>) -> bool {
        self.reservations.iter().any(|r| r.is_expired_at(now))
    }

    pub fn add_stock(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if quantity == 0 { return Err(InventoryError::InvalidQuantity); }
        self.stock = self.stock.saturating_add(quantity);
        self.touch(Utc::now());
        self.raise_event(DomainEvent::Inventory(InventoryEvent::Restocked { variant_id: self.variant_id, quantity }));
        Ok(())
    }

    pub fn set_min_stock_level(&mut self, level: u32) { self.min_stock_level = level; self.touch(Utc::now()); }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("quantity must be greater than zero")]
    InvalidQuantity,
    #[error("insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock { variant_id: VariantId, requested: u32, available: u32 },
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),
    #[error("reservation {0} has expired")]
    ReservationExpired(ReservationId),
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidQuantity => ErrorKind::Validation,
            Self::ReservationNotFound(_) => ErrorKind::NotFound,
            Self::InsufficientStock { .. } | Self::ReservationExpired(_) => ErrorKind::BusinessRule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory(stock: u32) -> Inventory { Inventory::create(VariantId::new(1), stock, 2) }

    #[test]
    fn test_available_stock_subtracts_live_holds() {
        let now = Utc::now();
        let mut inv = inventory(10);
        inv.reserve_at(3, Duration::minutes(15), now).unwrap();
        inv.reserve_at(2, Duration::minutes(1), now).unwrap();
        assert_eq!(inv.available_stock_at(now), 5);
        assert_eq!(inv.available_stock_at(now + Duration::minutes(2)), 7);
        assert_eq!(inv.stock(), 10);
    }

    #[test]
    fn test_hold_expiry_frees_stock() {
        let now = Utc::now();
        let mut inv = inventory(5);
        inv.reserve_at(5, Duration::minutes(15), now).unwrap();
        let err = inv.reserve_at(1, Duration::minutes(15), now).unwrap_err();
        assert_eq!(err, InventoryError::InsufficientStock { variant_id: VariantId::new(1), requested: 1, available: 0 });
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        let later = now + Duration::minutes(16);
        assert!(inv.reserve_at(1, Duration::minutes(15), later).is_ok());
    }

    #[test]
    fn test_non_positive_duration_uses_default() {
        let now = Utc::now();
        let mut inv = inventory(5);
        let id = inv.reserve_at(1, Duration::zero(), now).unwrap();
        assert_eq!(inv.reservation(id).unwrap().expires_at, now + Duration::minutes(DEFAULT_RESERVATION_MINUTES));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        assert_eq!(inventory(5).reserve(0, Duration::minutes(1)), Err(InventoryError::InvalidQuantity));
    }

    #[test]
    fn test_confirm_consumes_stock() {
        let now = Utc::now();
        let mut inv = inventory(5);
        let id = inv.reserve_at(4, Duration::minutes(15), now).unwrap();
        inv.take_events();
        inv.confirm_reservation_at(id, now).unwrap();
        assert_eq!(inv.stock(), 1);
        assert!(inv.reservations().is_empty());
        assert_eq!(inv.available_stock_at(now), 1);
        assert!(inv.is_low_stock());
        let events = inv.take_events();
        assert!(matches!(events.last(), Some(DomainEvent::Inventory(InventoryEvent::LowStock { stock: 1, .. }))));
        assert_eq!(inv.confirm_reservation_at(id, now), Err(InventoryError::ReservationNotFound(id)));
    }

    #[test]
    fn test_confirm_expired_leaves_state() {
        let now = Utc::now();
        let mut inv = inventory(5);
        let id = inv.reserve_at(2, Duration::minutes(15), now).unwrap();
        let err = inv.confirm_reservation_at(id, now + Duration::minutes(15)).unwrap_err();
        assert_eq!(err, InventoryError::ReservationExpired(id));
        assert_eq!(inv.stock(), 5);
        assert_eq!(inv.reservations().len(), 1);
    }

    #[test]
    fn test_release_has_no_stock_effect() {
        let mut inv = inventory(5);
        let id = inv.reserve(2, Duration::minutes(15)).unwrap();
        inv.release_reservation(id).unwrap();
        assert_eq!(inv.stock(), 5);
        assert_eq!(inv.available_stock(), 5);
        assert!(inv.release_reservation(id).is_err());
    }

    #[test]
    fn test_cleanup_sweeps_only_expired() {
        let now = Utc::now();
        let mut inv = inventory(10);
        inv.reserve_at(1, Duration::minutes(1), now).unwrap();
        let keep = inv.reserve_at(1, Duration::minutes(30), now).unwrap();
        assert!(inv.has_expired_reservations_at(now + Duration::minutes(5)));
        assert_eq!(inv.cleanup_expired_reservations_at(now + Duration::minutes(5)), 1);
        assert_eq!(inv.reservations().len(), 1);
        assert!(inv.reservation(keep).is_some());
        assert_eq!(inv.cleanup_expired_reservations_at(now + Duration::minutes(5)), 0);
    }

    #[test]
    fn test_fulfil_consumes_live_hold() {
        let now = Utc::now();
        let mut inv = inventory(10);
        let id = inv.reserve_at(3, Duration::minutes(15), now).unwrap();
        inv.fulfil_at(&[id], 3, now).unwrap();
        assert_eq!(inv.stock(), 7);
        assert!(inv.reservations().is_empty());
        assert_eq!(inv.available_stock_at(now), 7);
    }

    #[test]
    fn test_fulfil_after_hold_swept() {
        let now = Utc::now();
        let later = now + Duration::minutes(20);
        let mut inv = inventory(5);
        let id = inv.reserve_at(2, Duration::minutes(15), now).unwrap();
        inv.cleanup_expired_reservations_at(later);
        inv.take_events();
        inv.fulfil_at(&[id], 2, later).unwrap();
        assert_eq!(inv.stock(), 3);
        assert!(inv.take_events().iter().any(|e| matches!(e, DomainEvent::Inventory(InventoryEvent::StockDeducted { quantity: 2, .. }))));
    }

    #[test]
    fn test_fulfil_drops_expired_hold() {
        let now = Utc::now();
        let later = now + Duration::minutes(20);
        let mut inv = inventory(5);
        let id = inv.reserve_at(2, Duration::minutes(15), now).unwrap();
        inv.fulfil_at(&[id], 2, later).unwrap();
        assert_eq!(inv.stock(), 3);
        assert!(inv.reservations().is_empty());
    }

    #[test]
    fn test_fulfil_without_stock_leaves_state() {
        let now = Utc::now();
        let later = now + Duration::minutes(20);
        let mut inv = inventory(3);
        let stale = inv.reserve_at(2, Duration::minutes(15), now).unwrap();
        inv.reserve_at(3, Duration::minutes(15), later).unwrap();
        let err = inv.fulfil_at(&[stale], 2, later).unwrap_err();
        assert_eq!(err, InventoryError::InsufficientStock { variant_id: VariantId::new(1), requested: 2, available: 0 });
        assert_eq!(inv.stock(), 3);
        assert_eq!(inv.reservations().len(), 2);
    }

    #[test]
    fn test_restock() {
        let mut inv = inventory(1);
        assert!(inv.is_low_stock());
        inv.add_stock(9).unwrap();
        assert_eq!(inv.stock(), 10);
        assert!(!inv.is_low_stock());
    }
}
