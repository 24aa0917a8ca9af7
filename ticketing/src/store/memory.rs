//! In-memory [`TicketStore`].
//!
//! A transaction takes the store's single lock and works on a copy of the
//! state; commit swaps the copy in, drop discards it. Transactions are
//! therefore fully serialized, which gives the same outcomes as row locks on
//! a single product.

use super::{StoreError, StoreTransaction, TicketStore};
use crate::lifecycle::TicketStatus;
use crate::types::{
    BatchId, BatchStatus, Order, OrderId, Product, ProductId, Reservation, ReservationId,
    ReservationStatus, Ticket, TicketBatch, TicketCode,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    reservations: HashMap<ReservationId, Reservation>,
    batches: HashMap<BatchId, TicketBatch>,
    tickets: BTreeMap<TicketCode, Ticket>,
    orders: HashMap<OrderId, Order>,
}

/// Thread-safe in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_ticket_inserts: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a catalog product.
    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Every order created so far.
    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    /// Makes every subsequent ticket insert fail with a database error.
    pub fn fail_ticket_inserts(&self, fail: bool) {
        self.fail_ticket_inserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            fail_ticket_inserts: self.fail_ticket_inserts.load(Ordering::SeqCst),
        }))
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn find_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn due_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Active && r.is_expired_at(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.expires_at);
        Ok(due)
    }

    async fn due_batches(&self, now: DateTime<Utc>) -> Result<Vec<TicketBatch>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<TicketBatch> = state
            .batches
            .values()
            .filter(|b| b.status == BatchStatus::Active && b.is_expired_at(now))
            .cloned()
            .collect();
        due.sort_by_key(|b| b.expires_at);
        Ok(due)
    }

    async fn find_batch(&self, id: &BatchId) -> Result<Option<TicketBatch>, StoreError> {
        Ok(self.state.lock().await.batches.get(id).cloned())
    }

    async fn tickets_in_batch(&self, id: &BatchId) -> Result<Vec<Ticket>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tickets
            .values()
            .filter(|t| t.batch_id.as_ref() == Some(id))
            .cloned()
            .collect())
    }

    async fn find_ticket(&self, code: &TicketCode) -> Result<Option<Ticket>, StoreError> {
        Ok(self.state.lock().await.tickets.get(code).cloned())
    }

    async fn insert_batch_placeholder(&self, batch: &TicketBatch) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.batches.contains_key(&batch.id) {
            return Err(StoreError::Conflict(format!("batch {} exists", batch.id)));
        }
        state.batches.insert(batch.id.clone(), batch.clone());
        Ok(())
    }

    async fn delete_batch(&self, id: &BatchId) -> Result<(), StoreError> {
        self.state.lock().await.batches.remove(id);
        Ok(())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_ticket_inserts: bool,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn save_inventory(&mut self, product: &Product) -> Result<(), StoreError> {
        let stored = self
            .working
            .products
            .get_mut(&product.id)
            .ok_or_else(|| StoreError::NotFound(format!("product {}", product.id)))?;
        stored.channels.clone_from(&product.channels);
        stored.sold_count = product.sold_count;
        Ok(())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.working.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Conflict(format!(
                "reservation {} exists",
                reservation.id
            )));
        }
        self.working
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn lock_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.working.reservations.get(&id).cloned())
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        let stored = self
            .working
            .reservations
            .get_mut(&reservation.id)
            .ok_or_else(|| StoreError::NotFound(format!("reservation {}", reservation.id)))?;
        *stored = reservation.clone();
        Ok(())
    }

    async fn lock_batch(&mut self, id: &BatchId) -> Result<Option<TicketBatch>, StoreError> {
        Ok(self.working.batches.get(id).cloned())
    }

    async fn update_batch_status(
        &mut self,
        id: &BatchId,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        let batch = self
            .working
            .batches
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {id}")))?;
        batch.status = status;
        Ok(())
    }

    async fn insert_tickets(&mut self, tickets: &[Ticket]) -> Result<(), StoreError> {
        if self.fail_ticket_inserts {
            return Err(StoreError::Database("injected ticket insert failure".into()));
        }
        for ticket in tickets {
            if self.working.tickets.contains_key(&ticket.code) {
                return Err(StoreError::Conflict(format!("ticket {} exists", ticket.code)));
            }
            self.working.tickets.insert(ticket.code.clone(), ticket.clone());
        }
        Ok(())
    }

    async fn retire_pre_generated(
        &mut self,
        batch: &BatchId,
        status: TicketStatus,
    ) -> Result<u32, StoreError> {
        let mut retired = 0;
        for ticket in self.working.tickets.values_mut() {
            if ticket.batch_id.as_ref() == Some(batch) && ticket.status == TicketStatus::PreGenerated
            {
                ticket.status = status;
                retired += 1;
            }
        }
        Ok(retired)
    }

    async fn lock_ticket(&mut self, code: &TicketCode) -> Result<Option<Ticket>, StoreError> {
        Ok(self.working.tickets.get(code).cloned())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError> {
        let stored = self
            .working
            .tickets
            .get_mut(&ticket.code)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", ticket.code)))?;
        *stored = ticket.clone();
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if self.working.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict(format!("order {} exists", order.id)));
        }
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::types::{ChannelId, Money};

    fn product() -> Product {
        Product::new(ProductId::new(), "Harbour cruise", Money::from_cents(5_000), "EUR")
            .with_allocation("ota", 10)
    }

    #[tokio::test]
    async fn uncommitted_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let product = product();
        store.insert_product(product.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_product(product.id).await.unwrap().unwrap();
        locked.channels.get_mut(&ChannelId::from("ota")).unwrap().reserved = 4;
        tx.save_inventory(&locked).await.unwrap();
        drop(tx);

        let stored = store.find_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.allocation(&ChannelId::from("ota")).unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::new();
        let product = product();
        store.insert_product(product.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_product(product.id).await.unwrap().unwrap();
        locked.sold_count = 3;
        tx.save_inventory(&locked).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.find_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.sold_count, 3);
    }

    #[tokio::test]
    async fn missing_batch_status_update_is_not_found() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let result = tx
            .update_batch_status(&BatchId::from("BATCH-X"), BatchStatus::Active)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
