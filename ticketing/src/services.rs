//! Wiring of the ticketing services over one store and one clock.

use crate::batch::BatchIssuer;
use crate::config::Config;
use crate::activation::ActivationProcessor;
use crate::admission::AdmissionDesk;
use crate::error::Result;
use crate::inventory::InventoryLedger;
use crate::reservation::ReservationManager;
use crate::store::TicketStore;
use crate::token::{AdmissionTokenService, TokenExpiryPolicy};
use std::sync::Arc;
use tessera_core::environment::Clock;

/// Every service, sharing the same store, clock and token keys.
#[derive(Clone)]
pub struct TicketingServices {
    /// Channel counters
    pub ledger: InventoryLedger,
    /// Direct-sale holds
    pub reservations: ReservationManager,
    /// Partner batches
    pub batches: BatchIssuer,
    /// Pre-generated ticket activation
    pub activations: ActivationProcessor,
    /// Reissue, entry check and redemption
    pub admission: AdmissionDesk,
    /// Token issue and verification
    pub tokens: Arc<AdmissionTokenService>,
}

impl TicketingServices {
    /// Builds the services from configuration.
    ///
    /// # Errors
    ///
    /// [`crate::TicketingError::Configuration`] when token keys are malformed.
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, config: &Config) -> Result<Self> {
        let tokens = Arc::new(AdmissionTokenService::from_config(
            &config.tokens,
            Arc::clone(&clock),
        )?);
        Ok(Self::with_tokens(store, clock, config, tokens))
    }

    /// Builds the services around an existing token service.
    #[must_use]
    pub fn with_tokens(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        config: &Config,
        tokens: Arc<AdmissionTokenService>,
    ) -> Self {
        let policy = TokenExpiryPolicy::new(&config.tokens);
        Self {
            ledger: InventoryLedger::new(Arc::clone(&store)),
            reservations: ReservationManager::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                &config.reservation,
            ),
            batches: BatchIssuer::new(
                Arc::clone(&store),
                Arc::clone(&tokens),
                policy,
                Arc::clone(&clock),
                config.batch.clone(),
            ),
            activations: ActivationProcessor::new(Arc::clone(&store), Arc::clone(&clock)),
            admission: AdmissionDesk::new(store, Arc::clone(&tokens), policy, clock),
            tokens,
        }
    }
}
