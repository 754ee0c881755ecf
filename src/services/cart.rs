//! Virtual carts - per-customer running tally of held items
//!
//! Carts are mutated only through pick/return events. The total is
//! never accumulated: it is recomputed from current item quantities
//! after every mutation, so application order cannot make it drift.

use crate::domain::{epoch_ms, CoreError, CustomerId, EventKind, ProductEvent, SessionId};
use crate::io::collaborators::PriceLookup;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Carts untouched for longer than this are treated as abandoned (ms)
pub const DEFAULT_CART_TIMEOUT_MS: u64 = 300_000;

/// One product line in a cart
#[derive(Debug, Clone, Serialize)]
pub struct CartItem {
    pub label: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub confidences: SmallVec<[f32; 8]>,
}

impl CartItem {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }

    pub fn avg_confidence(&self) -> f32 {
        if self.confidences.is_empty() {
            return 0.0;
        }
        self.confidences.iter().sum::<f32>() / self.confidences.len() as f32
    }
}

/// Live running total of one customer's held items
#[derive(Debug, Clone, Serialize)]
pub struct VirtualCart {
    pub customer_id: CustomerId,
    pub session_id: SessionId,
    pub created_ms: u64,
    pub updated_ms: u64,
    pub items: FxHashMap<String, CartItem>,
    pub total_amount: f64,
}

impl VirtualCart {
    pub(crate) fn new(customer_id: CustomerId, session_id: SessionId) -> Self {
        let now = epoch_ms();
        Self {
            customer_id,
            session_id,
            created_ms: now,
            updated_ms: now,
            items: FxHashMap::default(),
            total_amount: 0.0,
        }
    }

    /// Increment quantity for a picked item
    pub fn add_item(&mut self, label: &str, unit_price: f64, confidence: f32, ts_ms: u64) {
        match self.items.get_mut(label) {
            Some(item) => {
                item.quantity += 1;
                item.confidences.push(confidence);
                item.last_seen_ms = ts_ms;
            }
            None => {
                self.items.insert(
                    label.to_string(),
                    CartItem {
                        label: label.to_string(),
                        quantity: 1,
                        unit_price,
                        first_seen_ms: ts_ms,
                        last_seen_ms: ts_ms,
                        confidences: SmallVec::from_slice(&[confidence]),
                    },
                );
            }
        }
        self.updated_ms = epoch_ms();
        self.recalculate_total();
    }

    /// Decrement quantity for a returned item; the entry is deleted
    /// at quantity zero. Unknown labels are ignored.
    pub fn remove_item(&mut self, label: &str, quantity: u32, ts_ms: u64) {
        let Some(item) = self.items.get_mut(label) else { return };
        item.quantity = item.quantity.saturating_sub(quantity);
        item.last_seen_ms = ts_ms;
        if item.quantity == 0 {
            self.items.remove(label);
        }
        self.updated_ms = epoch_ms();
        self.recalculate_total();
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.updated_ms = epoch_ms();
        self.recalculate_total();
    }

    /// Invariant: total == Σ(unit price × quantity), always recomputed
    fn recalculate_total(&mut self) {
        self.total_amount = self.items.values().map(CartItem::line_total).sum();
    }

    pub fn item_count(&self) -> u32 {
        self.items.values().map(|i| i.quantity).sum()
    }
}

/// Aggregate view over all live carts
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CartSummary {
    pub carts: usize,
    pub items: u32,
    pub value: f64,
}

/// Owns every live cart, keyed by customer id
pub struct VirtualCartManager {
    cart_timeout_ms: u64,
    prices: Arc<dyn PriceLookup>,
    carts: FxHashMap<CustomerId, VirtualCart>,
    by_session: FxHashMap<SessionId, CustomerId>,
}

impl VirtualCartManager {
    pub fn new(prices: Arc<dyn PriceLookup>, cart_timeout_ms: u64) -> Self {
        Self {
            cart_timeout_ms,
            prices,
            carts: FxHashMap::default(),
            by_session: FxHashMap::default(),
        }
    }

    /// One cart per customer; re-calls return the existing cart
    pub fn create_cart(&mut self, customer_id: &CustomerId, session_id: &SessionId) -> &VirtualCart {
        if self.carts.contains_key(customer_id) {
            warn!(customer_id = %customer_id, "cart_already_exists");
            return &self.carts[customer_id];
        }
        let cart = VirtualCart::new(customer_id.clone(), session_id.clone());
        info!(customer_id = %customer_id, session_id = %session_id, "cart_created");
        self.by_session.insert(session_id.clone(), customer_id.clone());
        self.carts.insert(customer_id.clone(), cart);
        &self.carts[customer_id]
    }

    pub fn get(&self, customer_id: &CustomerId) -> Option<&VirtualCart> {
        self.carts.get(customer_id)
    }

    pub fn get_by_session(&self, session_id: &SessionId) -> Option<&VirtualCart> {
        self.by_session.get(session_id).and_then(|c| self.carts.get(c))
    }

    /// Apply pick/return events to a customer's cart, in timestamp
    /// order regardless of arrival order across cameras.
    pub fn update_from_events(
        &mut self,
        customer_id: &CustomerId,
        events: &[ProductEvent],
    ) -> Result<(), CoreError> {
        let cart = self
            .carts
            .get_mut(customer_id)
            .ok_or_else(|| CoreError::NotFound(format!("cart for customer {customer_id}")))?;

        let mut ordered: Vec<&ProductEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.ts_ms);

        for event in ordered {
            match event.kind {
                EventKind::Pick => {
                    let price = self.prices.price(&event.label);
                    cart.add_item(&event.label, price, event.confidence, event.ts_ms);
                }
                EventKind::Return => {
                    cart.remove_item(&event.label, 1, event.ts_ms);
                }
            }
        }

        debug!(
            customer_id = %customer_id,
            items = %cart.item_count(),
            total = %cart.total_amount,
            "cart_updated"
        );
        Ok(())
    }

    /// Remove a cart (after checkout or abandonment)
    pub fn remove_cart(&mut self, customer_id: &CustomerId) -> Option<VirtualCart> {
        let cart = self.carts.remove(customer_id)?;
        self.by_session.remove(&cart.session_id);
        info!(customer_id = %customer_id, session_id = %cart.session_id, "cart_removed");
        Some(cart)
    }

    /// Drop carts untouched for longer than the timeout; prolonged
    /// inactivity is treated as an abandoned cart.
    pub fn cleanup_expired(&mut self) -> Vec<CustomerId> {
        let now = epoch_ms();
        let expired: Vec<CustomerId> = self
            .carts
            .values()
            .filter(|c| now.saturating_sub(c.updated_ms) > self.cart_timeout_ms)
            .map(|c| c.customer_id.clone())
            .collect();
        for customer_id in &expired {
            warn!(customer_id = %customer_id, "cart_expired");
            self.remove_cart(customer_id);
        }
        expired
    }

    pub fn summary(&self) -> CartSummary {
        CartSummary {
            carts: self.carts.len(),
            items: self.carts.values().map(VirtualCart::item_count).sum(),
            value: self.carts.values().map(|c| c.total_amount).sum(),
        }
    }

    #[cfg(test)]
    fn backdate(&mut self, customer_id: &CustomerId, updated_ms: u64) {
        if let Some(cart) = self.carts.get_mut(customer_id) {
            cart.updated_ms = updated_ms;
        }
    }
}
