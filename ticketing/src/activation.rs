//! Activation: converting a pre-generated ticket into a sale.
//!
//! Pricing is resolved from the batch snapshot before any lock is taken;
//! the write path (order row, ticket update, `reserved → sold`) is a single
//! transaction that re-checks the ticket status under lock, so two
//! concurrent activations of one ticket produce exactly one sale.

use crate::error::{Result, TicketingError};
use crate::inventory::InventoryLedger;
use crate::lifecycle::TicketStatus;
use crate::metrics;
use crate::pricing;
use crate::store::{StoreTransaction, TicketStore, abort};
use crate::types::{
    ActivationStamp, CustomerIdentity, CustomerType, Order, OrderId, PartnerId, PriceBreakdown,
    ProductId, Ticket, TicketCode,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tessera_core::environment::Clock;
use tracing::{info, instrument, warn};

/// Request to activate one ticket.
#[derive(Debug, Clone)]
pub struct ActivationRequest {
    /// Ticket to activate
    pub ticket_code: TicketCode,
    /// Partner scope of the caller
    pub partner: PartnerId,
    /// Customer the ticket is sold to
    pub customer: CustomerIdentity,
    /// Payment reference from the partner
    pub payment_reference: String,
    /// Customer type to price
    pub customer_type: CustomerType,
    /// Visit date; the activation date when absent
    pub visit_date: Option<NaiveDate>,
}

/// A completed activation.
#[derive(Debug, Clone)]
pub struct Activation {
    /// Ticket after activation
    pub ticket: Ticket,
    /// Order created for the sale
    pub order: Order,
}

/// Activates pre-generated tickets.
#[derive(Clone)]
pub struct ActivationProcessor {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
}

impl ActivationProcessor {
    /// Creates a processor over `store`
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Activates a ticket for a customer.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::TicketNotFound`]: absent, other partner, cancelled or expired,
    ///   or its batch is no longer active or past its expiry
    /// - [`TicketingError::TicketAlreadyActivated`]: already sold or redeemed
    /// - [`TicketingError::BatchNotFound`]: the ticket's batch is gone
    /// - [`TicketingError::InvalidCustomerType`]: type not priced in the batch
    #[instrument(
        skip(self, request),
        fields(ticket = %request.ticket_code, partner = %request.partner, customer_type = %request.customer_type)
    )]
    pub async fn activate(&self, request: ActivationRequest) -> Result<Activation> {
        let now = self.clock.now();
        let ticket = self
            .store
            .find_ticket(&request.ticket_code)
            .await?
            .filter(|t| t.partner_id.as_ref() == Some(&request.partner))
            .ok_or(TicketingError::TicketNotFound)?;
        check_activatable(ticket.status)?;

        let batch_id = ticket.batch_id.clone().ok_or(TicketingError::TicketNotFound)?;
        let batch = self
            .store
            .find_batch(&batch_id)
            .await?
            .ok_or(TicketingError::BatchNotFound(batch_id))?;
        if !batch.is_sellable_at(now) {
            warn!(batch = %batch.id, status = ?batch.status, "Ticket belongs to a closed batch");
            return Err(TicketingError::TicketNotFound);
        }

        let visit_date = request.visit_date.unwrap_or_else(|| now.date_naive());
        let breakdown = pricing::quote(&batch.pricing, request.customer_type, Some(visit_date))?;
        let base = batch.pricing.snapshot.base_price;
        if pricing::is_anomalous(breakdown.final_price, base) {
            metrics::record_pricing_anomaly();
            warn!(
                price = %breakdown.final_price,
                base = %base,
                batch = %batch.id,
                "Activation price exceeds twice the batch base price"
            );
        }

        let mut tx = self.store.begin().await?;
        match Self::activate_in(&mut *tx, ticket.product_id, &request, breakdown, now).await {
            Ok(activation) => {
                tx.commit().await?;
                metrics::record_activation();
                info!(
                    order = %activation.order.id,
                    price = %activation.order.total,
                    "Ticket activated"
                );
                Ok(activation)
            }
            Err(error) => {
                abort(tx).await;
                Err(error)
            }
        }
    }

    async fn activate_in(
        tx: &mut dyn StoreTransaction,
        product: ProductId,
        request: &ActivationRequest,
        breakdown: PriceBreakdown,
        now: DateTime<Utc>,
    ) -> Result<Activation> {
        // Product row before the ticket row, same order as batch cancellation.
        tx.lock_product(product).await?;
        let mut ticket = tx
            .lock_ticket(&request.ticket_code)
            .await?
            .ok_or(TicketingError::TicketNotFound)?;
        check_activatable(ticket.status)?;

        let order = Order {
            id: OrderId::new(),
            product_id: ticket.product_id,
            quantity: 1,
            total: breakdown.final_price,
            currency: breakdown.currency.clone(),
            channel_id: ticket.channel_id.clone(),
            customer: request.customer.clone(),
            payment_reference: request.payment_reference.clone(),
            created_at: now,
        };
        tx.insert_order(&order).await?;

        ticket.status = ticket.status.transition(TicketStatus::Activated)?;
        ticket.customer = Some(request.customer.clone());
        ticket.customer_type = Some(request.customer_type);
        ticket.order_id = Some(order.id);
        ticket.charged_price = Some(breakdown.final_price);
        ticket.price_breakdown = Some(breakdown);
        ticket.payment_reference = Some(request.payment_reference.clone());
        ticket.activated_at = Some(now);
        ticket.audit.activation = Some(ActivationStamp {
            partner_id: request.partner.clone(),
            at: now,
        });
        tx.update_ticket(&ticket).await?;

        InventoryLedger::activate(tx, ticket.product_id, &ticket.channel_id, 1).await?;
        Ok(Activation { ticket, order })
    }
}

fn check_activatable(status: TicketStatus) -> Result<()> {
    match status {
        TicketStatus::PreGenerated => Ok(()),
        TicketStatus::Activated | TicketStatus::Verified => {
            Err(TicketingError::TicketAlreadyActivated)
        }
        _ => Err(TicketingError::TicketNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pre_generated_tickets_are_activatable() {
        assert!(check_activatable(TicketStatus::PreGenerated).is_ok());
        assert!(matches!(
            check_activatable(TicketStatus::Verified),
            Err(TicketingError::TicketAlreadyActivated)
        ));
        for status in [
            TicketStatus::Cancelled,
            TicketStatus::Expired,
            TicketStatus::Reserved,
            TicketStatus::PendingPayment,
        ] {
            assert!(matches!(
                check_activatable(status),
                Err(TicketingError::TicketNotFound)
            ));
        }
    }
}
