//! Channel-scoped inventory ledger.
//!
//! Counter arithmetic lives in [`counters`] as pure functions over a
//! [`ChannelAllocation`]; [`InventoryLedger`] applies them to a product row
//! locked inside a [`StoreTransaction`]. `reserve` is the only oversell gate:
//! no ticket, reservation or order row may be written before it succeeds.

use crate::error::{Result, TicketingError};
use crate::store::{StoreError, StoreTransaction, TicketStore};
use crate::types::{ChannelAllocation, ChannelId, Product, ProductId};
use std::sync::Arc;
use tracing::debug;

/// Pure counter transitions. Each either applies completely or leaves the
/// allocation untouched.
pub mod counters {
    use super::{ChannelAllocation, Result, StoreError, TicketingError};

    /// `reserved += quantity` iff enough units are free.
    ///
    /// # Errors
    ///
    /// [`TicketingError::InvalidQuantity`] for zero,
    /// [`TicketingError::SoldOut`] when `available < quantity`.
    pub fn reserve(allocation: &mut ChannelAllocation, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(TicketingError::InvalidQuantity(quantity));
        }
        let available = allocation.available();
        if available < quantity {
            return Err(TicketingError::SoldOut {
                requested: quantity,
                available,
            });
        }
        allocation.reserved += quantity;
        Ok(())
    }

    /// `reserved -= quantity`, floored at zero. Returns the units actually released.
    ///
    /// # Errors
    ///
    /// [`TicketingError::InvalidQuantity`] for zero.
    pub fn release(allocation: &mut ChannelAllocation, quantity: u32) -> Result<u32> {
        if quantity == 0 {
            return Err(TicketingError::InvalidQuantity(quantity));
        }
        let released = if quantity < allocation.reserved {
            quantity
        } else {
            allocation.reserved
        };
        allocation.reserved -= released;
        Ok(released)
    }

    /// Moves `quantity` units from `reserved` to `sold`.
    ///
    /// # Errors
    ///
    /// [`TicketingError::InvalidQuantity`] for zero,
    /// [`StoreError::Integrity`] when fewer than `quantity` units are reserved.
    pub fn activate(allocation: &mut ChannelAllocation, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(TicketingError::InvalidQuantity(quantity));
        }
        if allocation.reserved < quantity {
            return Err(StoreError::Integrity(format!(
                "cannot sell {quantity} units, only {} reserved",
                allocation.reserved
            ))
            .into());
        }
        allocation.reserved -= quantity;
        allocation.sold += quantity;
        Ok(())
    }
}

/// Inventory ledger over a [`TicketStore`].
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn TicketStore>,
}

impl InventoryLedger {
    /// Creates a ledger reading from `store`
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Free units of `product` on `channel`.
    ///
    /// # Errors
    ///
    /// [`TicketingError::ProductNotFound`], [`TicketingError::UnknownChannel`],
    /// or a storage error.
    pub async fn available(&self, product: ProductId, channel: &ChannelId) -> Result<u32> {
        let product = self
            .store
            .find_product(product)
            .await?
            .ok_or(TicketingError::ProductNotFound(product))?;
        Ok(allocation(&product, channel)?.available())
    }

    /// Locks the product and reserves `quantity` units on `channel`.
    ///
    /// Returns the updated product so callers can snapshot its pricing
    /// without a second read.
    ///
    /// # Errors
    ///
    /// [`TicketingError::SoldOut`] with no side effect, lookup errors, or a
    /// storage error.
    pub async fn reserve(
        tx: &mut dyn StoreTransaction,
        product: ProductId,
        channel: &ChannelId,
        quantity: u32,
    ) -> Result<Product> {
        let mut locked = lock(tx, product).await?;
        counters::reserve(allocation_mut(&mut locked, channel)?, quantity)?;
        tx.save_inventory(&locked).await?;
        debug!(product = %product, channel = %channel, quantity, "Reserved units");
        Ok(locked)
    }

    /// Locks the product and releases up to `quantity` held units.
    ///
    /// # Errors
    ///
    /// Lookup errors or a storage error.
    pub async fn release(
        tx: &mut dyn StoreTransaction,
        product: ProductId,
        channel: &ChannelId,
        quantity: u32,
    ) -> Result<Product> {
        let mut locked = lock(tx, product).await?;
        let released = counters::release(allocation_mut(&mut locked, channel)?, quantity)?;
        if released < quantity {
            tracing::warn!(
                product = %product,
                channel = %channel,
                quantity,
                released,
                "Released more units than were reserved, floored at zero"
            );
        }
        tx.save_inventory(&locked).await?;
        debug!(product = %product, channel = %channel, released, "Released units");
        Ok(locked)
    }

    /// Locks the product and converts `quantity` held units into sales.
    ///
    /// # Errors
    ///
    /// [`StoreError::Integrity`] when not enough units are held, lookup
    /// errors, or a storage error.
    pub async fn activate(
        tx: &mut dyn StoreTransaction,
        product: ProductId,
        channel: &ChannelId,
        quantity: u32,
    ) -> Result<Product> {
        let mut locked = lock(tx, product).await?;
        counters::activate(allocation_mut(&mut locked, channel)?, quantity)?;
        locked.sold_count += u64::from(quantity);
        tx.save_inventory(&locked).await?;
        debug!(product = %product, channel = %channel, quantity, "Sold units");
        Ok(locked)
    }
}

async fn lock(tx: &mut dyn StoreTransaction, product: ProductId) -> Result<Product> {
    tx.lock_product(product)
        .await?
        .ok_or(TicketingError::ProductNotFound(product))
}

fn allocation<'a>(product: &'a Product, channel: &ChannelId) -> Result<&'a ChannelAllocation> {
    product
        .channels
        .get(channel)
        .ok_or_else(|| TicketingError::UnknownChannel {
            product: product.id,
            channel: channel.clone(),
        })
}

fn allocation_mut<'a>(
    product: &'a mut Product,
    channel: &ChannelId,
) -> Result<&'a mut ChannelAllocation> {
    let id = product.id;
    product
        .channels
        .get_mut(channel)
        .ok_or_else(|| TicketingError::UnknownChannel {
            product: id,
            channel: channel.clone(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Money;
    use proptest::prelude::*;

    #[test]
    fn reserve_beyond_availability_is_sold_out_without_side_effect() {
        let mut allocation = ChannelAllocation::new(5);
        counters::reserve(&mut allocation, 4).unwrap();

        let result = counters::reserve(&mut allocation, 2);
        assert!(matches!(
            result,
            Err(TicketingError::SoldOut {
                requested: 2,
                available: 1
            })
        ));
        assert_eq!(allocation.reserved, 4);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut allocation = ChannelAllocation::new(5);
        assert!(matches!(
            counters::reserve(&mut allocation, 0),
            Err(TicketingError::InvalidQuantity(0))
        ));
        assert!(counters::release(&mut allocation, 0).is_err());
        assert!(counters::activate(&mut allocation, 0).is_err());
    }

    #[test]
    fn release_floors_at_zero() {
        let mut allocation = ChannelAllocation::new(5);
        counters::reserve(&mut allocation, 2).unwrap();
        assert_eq!(counters::release(&mut allocation, 3).unwrap(), 2);
        assert_eq!(allocation.reserved, 0);
    }

    #[test]
    fn activate_requires_held_units() {
        let mut allocation = ChannelAllocation::new(5);
        counters::reserve(&mut allocation, 1).unwrap();
        assert!(matches!(
            counters::activate(&mut allocation, 2),
            Err(TicketingError::Storage(StoreError::Integrity(_)))
        ));
        counters::activate(&mut allocation, 1).unwrap();
        assert_eq!((allocation.reserved, allocation.sold), (0, 1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(u32),
        Release(u32),
        Activate(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..8).prop_map(Op::Reserve),
            (0u32..8).prop_map(Op::Release),
            (0u32..8).prop_map(Op::Activate),
        ]
    }

    proptest! {
        #[test]
        fn counters_never_oversell(allocated in 0u32..20, ops in prop::collection::vec(op(), 0..64)) {
            let mut allocation = ChannelAllocation::new(allocated);
            for op in ops {
                let before = allocation;
                let result = match op {
                    Op::Reserve(n) => counters::reserve(&mut allocation, n),
                    Op::Release(n) => counters::release(&mut allocation, n).map(|_| ()),
                    Op::Activate(n) => counters::activate(&mut allocation, n),
                };
                if result.is_err() {
                    prop_assert_eq!(allocation, before);
                }
                prop_assert!(allocation.is_consistent());
                prop_assert_eq!(allocation.allocated, allocated);
                prop_assert!(allocation.sold >= before.sold);
            }
        }
    }

    #[tokio::test]
    async fn ledger_round_trip_through_store() {
        let store = MemoryStore::new();
        let product = Product::new(ProductId::new(), "Day pass", Money::from_cents(2_500), "EUR")
            .with_allocation("direct", 3);
        let id = product.id;
        store.insert_product(product).await;
        let ledger = InventoryLedger::new(Arc::new(store.clone()));
        let channel = ChannelId::from("direct");

        let mut tx = store.begin().await.unwrap();
        InventoryLedger::reserve(&mut *tx, id, &channel, 2).await.unwrap();
        let sold = InventoryLedger::activate(&mut *tx, id, &channel, 1).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(sold.sold_count, 1);
        assert_eq!(ledger.available(id, &channel).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_channel_is_reported() {
        let store = MemoryStore::new();
        let product = Product::new(ProductId::new(), "Day pass", Money::from_cents(2_500), "EUR");
        let id = product.id;
        store.insert_product(product).await;
        let ledger = InventoryLedger::new(Arc::new(store));

        let result = ledger.available(id, &ChannelId::from("ota")).await;
        assert!(matches!(result, Err(TicketingError::UnknownChannel { .. })));
    }
}
