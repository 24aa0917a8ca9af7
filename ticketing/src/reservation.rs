//! Reservation manager: time-boxed inventory holds.
//!
//! ```text
//! create ──▶ active ──┬── activate ──▶ activated
//!                     ├── cancel   ──▶ cancelled   (releases units)
//!                     └── expire   ──▶ expired     (releases units)
//! ```
//!
//! Expiry is lazy: a lapsed hold keeps its units until [`ReservationManager::expire_due`]
//! runs, either from a sweeper or opportunistically from
//! [`ReservationManager::availability`].

use crate::config::ReservationConfig;
use crate::error::{Result, TicketingError};
use crate::inventory::InventoryLedger;
use crate::lifecycle::TicketStatus;
use crate::metrics;
use crate::pricing;
use crate::store::{StoreTransaction, TicketStore, abort};
use crate::types::{
    ChannelId, OrderId, ProductId, Reservation, ReservationId, ReservationStatus,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tessera_core::environment::Clock;
use tracing::{info, instrument, warn};

impl From<ReservationStatus> for TicketStatus {
    fn from(status: ReservationStatus) -> Self {
        match status {
            ReservationStatus::Active => Self::Reserved,
            ReservationStatus::Activated => Self::Activated,
            ReservationStatus::Expired => Self::Expired,
            ReservationStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Creates, cancels, activates and expires reservations.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    ledger: InventoryLedger,
    max_hold: Duration,
}

impl ReservationManager {
    /// Creates a manager over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, config: &ReservationConfig) -> Self {
        let max_hold = i64::try_from(config.max_hold_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            ledger: InventoryLedger::new(Arc::clone(&store)),
            store,
            clock,
            max_hold,
        }
    }

    /// Holds `quantity` units of `product` on `channel`.
    ///
    /// The hold lasts `ttl`, capped at the configured maximum. A zero `ttl`
    /// creates a hold that is already lapsed: it can only be expired or
    /// cancelled, never activated.
    ///
    /// # Errors
    ///
    /// [`TicketingError::SoldOut`] with current availability, nothing written.
    #[instrument(skip(self), fields(product = %product, channel = %channel))]
    pub async fn create(
        &self,
        product: ProductId,
        channel: &ChannelId,
        quantity: u32,
        ttl: Duration,
    ) -> Result<Reservation> {
        let now = self.clock.now();
        let hold = ttl.clamp(Duration::zero(), self.max_hold);
        let expires_at = now.checked_add_signed(hold).ok_or_else(|| {
            TicketingError::Configuration("reservation hold exceeds the calendar range".into())
        })?;

        let mut tx = self.store.begin().await?;
        match Self::create_in(&mut *tx, product, channel, quantity, now, expires_at).await {
            Ok(reservation) => {
                tx.commit().await?;
                metrics::record_reservation("created");
                info!(reservation = %reservation.id, quantity, expires_at = %reservation.expires_at, "Reservation created");
                Ok(reservation)
            }
            Err(error) => {
                abort(tx).await;
                if let TicketingError::SoldOut { available, .. } = &error {
                    metrics::record_reservation("sold_out");
                    warn!(quantity, available, "Reservation rejected: sold out");
                }
                Err(error)
            }
        }
    }

    async fn create_in(
        tx: &mut dyn StoreTransaction,
        product: ProductId,
        channel: &ChannelId,
        quantity: u32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let locked = InventoryLedger::reserve(tx, product, channel, quantity).await?;
        let reservation = Reservation {
            id: ReservationId::new(),
            product_id: product,
            channel_id: channel.clone(),
            quantity,
            status: ReservationStatus::Active,
            pricing: pricing::snapshot(&locked, now)?,
            created_at: now,
            expires_at,
            activated_at: None,
            order_id: None,
        };
        tx.insert_reservation(&reservation).await?;
        Ok(reservation)
    }

    /// Cancels an active hold and releases its units.
    ///
    /// Cancelling an expired or already cancelled hold is a no-op that
    /// returns it unchanged.
    ///
    /// # Errors
    ///
    /// [`TicketingError::ReservationNotFound`],
    /// [`TicketingError::ReservationAlreadyActivated`].
    #[instrument(skip(self), fields(reservation = %id))]
    pub async fn cancel(&self, id: ReservationId) -> Result<Reservation> {
        let product = self
            .store
            .find_reservation(id)
            .await?
            .ok_or(TicketingError::ReservationNotFound(id))?
            .product_id;

        let mut tx = self.store.begin().await?;
        match Self::cancel_in(&mut *tx, product, id).await {
            Ok((reservation, changed)) => {
                if changed {
                    tx.commit().await?;
                    metrics::record_reservation("cancelled");
                    info!(quantity = reservation.quantity, "Reservation cancelled");
                } else {
                    abort(tx).await;
                }
                Ok(reservation)
            }
            Err(error) => {
                abort(tx).await;
                Err(error)
            }
        }
    }

    async fn cancel_in(
        tx: &mut dyn StoreTransaction,
        product: ProductId,
        id: ReservationId,
    ) -> Result<(Reservation, bool)> {
        // Product row first, then the reservation, same order as expiry.
        tx.lock_product(product).await?;
        let mut reservation = tx
            .lock_reservation(id)
            .await?
            .ok_or(TicketingError::ReservationNotFound(id))?;

        match reservation.status {
            ReservationStatus::Activated => Err(TicketingError::ReservationAlreadyActivated(id)),
            ReservationStatus::Expired | ReservationStatus::Cancelled => Ok((reservation, false)),
            ReservationStatus::Active => {
                InventoryLedger::release(
                    tx,
                    reservation.product_id,
                    &reservation.channel_id,
                    reservation.quantity,
                )
                .await?;
                reservation.status = ReservationStatus::Cancelled;
                tx.update_reservation(&reservation).await?;
                Ok((reservation, true))
            }
        }
    }

    /// Expires every lapsed active hold, releasing its units.
    ///
    /// Each hold is re-read under the product lock, so overlapping calls
    /// never release the same units twice. Returns how many holds expired.
    ///
    /// # Errors
    ///
    /// Storage errors. Holds expired before the failure stay expired.
    #[instrument(skip(self))]
    pub async fn expire_due(&self) -> Result<usize> {
        let now = self.clock.now();
        let due = self.store.due_reservations(now).await?;
        let mut expired = 0;

        for candidate in due {
            let mut tx = self.store.begin().await?;
            match Self::expire_in(&mut *tx, &candidate, now).await {
                Ok(true) => {
                    tx.commit().await?;
                    expired += 1;
                    metrics::record_reservation("expired");
                }
                Ok(false) => abort(tx).await,
                Err(error) => {
                    abort(tx).await;
                    return Err(error);
                }
            }
        }

        if expired > 0 {
            info!(expired, "Expired lapsed reservations");
        }
        Ok(expired)
    }

    async fn expire_in(
        tx: &mut dyn StoreTransaction,
        candidate: &Reservation,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        tx.lock_product(candidate.product_id).await?;
        let Some(mut reservation) = tx.lock_reservation(candidate.id).await? else {
            return Ok(false);
        };
        if reservation.status != ReservationStatus::Active || !reservation.is_expired_at(now) {
            return Ok(false);
        }

        InventoryLedger::release(
            tx,
            reservation.product_id,
            &reservation.channel_id,
            reservation.quantity,
        )
        .await?;
        reservation.status = ReservationStatus::Expired;
        tx.update_reservation(&reservation).await?;
        Ok(true)
    }

    /// Marks an active, unexpired hold as sold under `order_id`.
    ///
    /// Inventory is not touched here; the order subsystem converts the
    /// held units.
    ///
    /// # Errors
    ///
    /// [`TicketingError::ReservationExpired`] past `expires_at`,
    /// [`TicketingError::ReservationAlreadyActivated`],
    /// [`TicketingError::ReservationNotActive`] for cancelled or expired holds.
    #[instrument(skip(self), fields(reservation = %id, order = %order_id))]
    pub async fn activate(&self, id: ReservationId, order_id: OrderId) -> Result<Reservation> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        match Self::activate_in(&mut *tx, id, order_id, now).await {
            Ok(reservation) => {
                tx.commit().await?;
                metrics::record_reservation("activated");
                info!("Reservation activated");
                Ok(reservation)
            }
            Err(error) => {
                abort(tx).await;
                Err(error)
            }
        }
    }

    async fn activate_in(
        tx: &mut dyn StoreTransaction,
        id: ReservationId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut reservation = tx
            .lock_reservation(id)
            .await?
            .ok_or(TicketingError::ReservationNotFound(id))?;

        match reservation.status {
            ReservationStatus::Active if reservation.is_expired_at(now) => {
                Err(TicketingError::ReservationExpired(id))
            }
            ReservationStatus::Active => {
                reservation.status = ReservationStatus::Activated;
                reservation.activated_at = Some(now);
                reservation.order_id = Some(order_id);
                tx.update_reservation(&reservation).await?;
                Ok(reservation)
            }
            ReservationStatus::Activated => Err(TicketingError::ReservationAlreadyActivated(id)),
            ReservationStatus::Expired | ReservationStatus::Cancelled => {
                Err(TicketingError::ReservationNotActive(id))
            }
        }
    }

    /// Free units after reclaiming lapsed holds.
    ///
    /// # Errors
    ///
    /// Lookup or storage errors.
    pub async fn availability(&self, product: ProductId, channel: &ChannelId) -> Result<u32> {
        self.expire_due().await?;
        self.ledger.available(product, channel).await
    }

    /// Reads a reservation.
    ///
    /// # Errors
    ///
    /// [`TicketingError::ReservationNotFound`].
    pub async fn find(&self, id: ReservationId) -> Result<Reservation> {
        self.store
            .find_reservation(id)
            .await?
            .ok_or(TicketingError::ReservationNotFound(id))
    }
}
