//! Transactional storage seam.
//!
//! Every inventory-affecting operation runs inside one [`StoreTransaction`].
//! The transaction's first write is always the product-row lock taken by the
//! ledger, so concurrent reservations, batch completions and activations on
//! the same product are serialized by the store, never by application locks.
//!
//! Two implementations ship with the crate:
//! - [`MemoryStore`]: one exclusive lock over the whole state, working-copy
//!   transactions. Used by tests and local development.
//! - `PostgresStore` (feature `postgres`): `SELECT ... FOR UPDATE` on the
//!   product row, primary keys for duplicate detection.
//!
//! # Lock order
//!
//! Product row first, then reservation / batch / ticket rows. Callers must
//! not invoke store-level methods while holding an open transaction.

use crate::lifecycle::TicketStatus;
use crate::types::{
    BatchId, BatchStatus, Order, Product, ProductId, Reservation, ReservationId, Ticket,
    TicketBatch, TicketCode,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique key already taken (duplicate batch id, ticket code)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Row expected by an update does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection, query or transaction failure
    #[error("Database error: {0}")]
    Database(String),

    /// Row could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored counters would violate an inventory invariant
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

/// Storage entry point.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Reads a product without locking it.
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Reads a reservation.
    async fn find_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Active reservations whose hold lapsed at or before `now`.
    async fn due_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError>;

    /// Active batches whose expiry is at or before `now`.
    async fn due_batches(&self, now: DateTime<Utc>) -> Result<Vec<TicketBatch>, StoreError>;

    /// Reads a batch.
    async fn find_batch(&self, id: &BatchId) -> Result<Option<TicketBatch>, StoreError>;

    /// Tickets belonging to a batch, in code order.
    async fn tickets_in_batch(&self, id: &BatchId) -> Result<Vec<Ticket>, StoreError>;

    /// Reads a ticket.
    async fn find_ticket(&self, code: &TicketCode) -> Result<Option<Ticket>, StoreError>;

    /// Inserts a batch row in its own implicit transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when the batch id already exists.
    async fn insert_batch_placeholder(&self, batch: &TicketBatch) -> Result<(), StoreError>;

    /// Deletes a batch row (compensation). Deleting a missing row is not an error.
    async fn delete_batch(&self, id: &BatchId) -> Result<(), StoreError>;
}

/// One open transaction. Dropping it without [`commit`](Self::commit) rolls back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Reads and locks a product row.
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Writes back the product's channel counters and `sold_count`.
    async fn save_inventory(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Inserts a reservation.
    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;

    /// Reads and locks a reservation row.
    async fn lock_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Overwrites a reservation.
    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;

    /// Reads and locks a batch row.
    async fn lock_batch(&mut self, id: &BatchId) -> Result<Option<TicketBatch>, StoreError>;

    /// Sets a batch status.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the batch row is gone.
    async fn update_batch_status(
        &mut self,
        id: &BatchId,
        status: BatchStatus,
    ) -> Result<(), StoreError>;

    /// Inserts one chunk of tickets.
    async fn insert_tickets(&mut self, tickets: &[Ticket]) -> Result<(), StoreError>;

    /// Moves every still `PRE_GENERATED` ticket of a batch to `status`
    /// (`CANCELLED` or `EXPIRED`), returning how many changed.
    async fn retire_pre_generated(
        &mut self,
        batch: &BatchId,
        status: TicketStatus,
    ) -> Result<u32, StoreError>;

    /// Reads and locks a ticket row.
    async fn lock_ticket(&mut self, code: &TicketCode) -> Result<Option<Ticket>, StoreError>;

    /// Overwrites a ticket.
    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError>;

    /// Inserts an order row.
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Rolls the transaction back.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Rolls back after a failed step, logging (not propagating) rollback errors
/// so the original failure reaches the caller.
pub(crate) async fn abort(tx: Box<dyn StoreTransaction>) {
    if let Err(error) = tx.rollback().await {
        tracing::warn!(error = %error, "Rollback failed");
    }
}
