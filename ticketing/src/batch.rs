//! Two-phase batch issuance.
//!
//! Rendering thousands of tokens cannot happen inside a database
//! transaction, so a batch is created across three boundaries:
//!
//! ```text
//! 1. placeholder insert      own transaction, status = creating, PK = batch id
//! 2. token rendering         no transaction, blocking pool
//! 3. completion              one transaction: reserve N, status = active, insert N tickets
//! ```
//!
//! Every failure after step 1 deletes the placeholder, so a failed batch
//! leaves no batch row, no tickets and untouched counters. The batch id is
//! the only duplicate guard: a second concurrent request with the same id
//! loses the primary-key insert and stops before rendering anything.

use crate::config::BatchConfig;
use crate::error::{Result, TicketingError};
use crate::inventory::InventoryLedger;
use crate::lifecycle::TicketStatus;
use crate::metrics;
use crate::pricing;
use crate::store::{StoreError, StoreTransaction, TicketStore, abort};
use crate::token::{AdmissionTokenService, IssuedToken, TokenAudience, TokenExpiryPolicy};
use crate::types::{
    BatchId, BatchPricing, BatchStatus, ChannelId, DistributionMode, PartnerId, PricingOverrides,
    PricingSnapshot, ProductId, ResellerMetadata, Ticket, TicketAudit, TicketBatch, TicketCode,
    TokenId,
};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tessera_core::environment::Clock;
use tracing::{info, instrument, warn};

const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const CODE_LEN: usize = 16;
const PARTNER_TAG_LEN: usize = 12;

/// Request to issue a batch of pre-generated tickets.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Caller-chosen id for duplicate detection; generated when absent
    pub batch_id: Option<BatchId>,
    /// Partner the batch belongs to
    pub partner_id: PartnerId,
    /// Product issued
    pub product_id: ProductId,
    /// Channel the units come from
    pub channel_id: ChannelId,
    /// Number of tickets
    pub quantity: u32,
    /// How the partner distributes the tickets
    pub distribution_mode: DistributionMode,
    /// Pricing stored verbatim instead of a fresh catalog snapshot
    pub pricing: Option<PricingSnapshot>,
    /// Overrides applied at activation
    pub overrides: PricingOverrides,
    /// Reseller / campaign metadata
    pub reseller: Option<ResellerMetadata>,
    /// Batch expiry
    pub expires_at: Option<DateTime<Utc>>,
}

impl BatchRequest {
    /// Direct-sale request with catalog pricing and no overrides
    #[must_use]
    pub fn new(
        partner_id: impl Into<PartnerId>,
        product_id: ProductId,
        channel_id: impl Into<ChannelId>,
        quantity: u32,
    ) -> Self {
        Self {
            batch_id: None,
            partner_id: partner_id.into(),
            product_id,
            channel_id: channel_id.into(),
            quantity,
            distribution_mode: DistributionMode::DirectSale,
            pricing: None,
            overrides: PricingOverrides::default(),
            reseller: None,
            expires_at: None,
        }
    }

    /// Builder-style batch id
    #[must_use]
    pub fn with_batch_id(mut self, batch_id: impl Into<BatchId>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Builder-style pricing overrides
    #[must_use]
    pub fn with_overrides(mut self, overrides: PricingOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Builder-style batch expiry
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// A completed batch with its tickets.
#[derive(Debug, Clone)]
pub struct IssuedBatch {
    /// Batch row, status `active`
    pub batch: TicketBatch,
    /// Tickets, all `PRE_GENERATED`
    pub tickets: Vec<Ticket>,
}

/// Outcome of a batch cancellation.
#[derive(Debug, Clone)]
pub struct CancelledBatch {
    /// Batch row after cancellation
    pub batch: TicketBatch,
    /// Pre-generated tickets cancelled and units released
    pub released: u32,
}

/// Issues and cancels ticket batches.
#[derive(Clone)]
pub struct BatchIssuer {
    store: Arc<dyn TicketStore>,
    tokens: Arc<AdmissionTokenService>,
    policy: TokenExpiryPolicy,
    clock: Arc<dyn Clock>,
    config: BatchConfig,
}

impl BatchIssuer {
    /// Creates an issuer.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        tokens: Arc<AdmissionTokenService>,
        policy: TokenExpiryPolicy,
        clock: Arc<dyn Clock>,
        config: BatchConfig,
    ) -> Self {
        Self {
            store,
            tokens,
            policy,
            clock,
            config,
        }
    }

    /// Issues `request.quantity` pre-generated tickets as one unit.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::InvalidQuantity`] outside `1..=max_size`
    /// - [`TicketingError::DuplicateBatch`] when the id is taken
    /// - [`TicketingError::SoldOut`] when the channel cannot hold the batch
    /// - [`TicketingError::Render`] or a storage error; the batch is rolled back
    #[instrument(
        skip(self, request),
        fields(partner = %request.partner_id, product = %request.product_id, quantity = request.quantity)
    )]
    pub async fn issue(&self, request: BatchRequest) -> Result<IssuedBatch> {
        if request.quantity == 0 || request.quantity > self.config.max_size {
            return Err(TicketingError::InvalidQuantity(request.quantity));
        }
        let now = self.clock.now();
        let batch = self.prepare(request, now).await?;

        if let Err(error) = self.store.insert_batch_placeholder(&batch).await {
            return Err(match error {
                StoreError::Conflict(_) => {
                    metrics::record_batch("duplicate");
                    warn!(batch = %batch.id, "Duplicate batch id rejected");
                    TicketingError::DuplicateBatch(batch.id)
                }
                other => other.into(),
            });
        }

        match self.render_and_complete(&batch, now).await {
            Ok(issued) => Ok(issued),
            Err(error) => {
                self.compensate(&batch.id, &error).await;
                Err(error)
            }
        }
    }

    async fn prepare(&self, request: BatchRequest, now: DateTime<Utc>) -> Result<TicketBatch> {
        let product = self
            .store
            .find_product(request.product_id)
            .await?
            .ok_or(TicketingError::ProductNotFound(request.product_id))?;
        if product.allocation(&request.channel_id).is_none() {
            return Err(TicketingError::UnknownChannel {
                product: product.id,
                channel: request.channel_id,
            });
        }

        pricing::validate_overrides(&request.overrides)?;
        let snapshot = match request.pricing {
            Some(snapshot) => snapshot,
            None => pricing::snapshot(&product, now)?,
        };
        let id = request
            .batch_id
            .unwrap_or_else(|| generate_batch_id(&request.partner_id, now));

        Ok(TicketBatch {
            id,
            partner_id: request.partner_id,
            product_id: request.product_id,
            channel_id: request.channel_id,
            quantity: request.quantity,
            distribution_mode: request.distribution_mode,
            status: BatchStatus::Creating,
            pricing: BatchPricing {
                snapshot,
                overrides: request.overrides,
            },
            reseller: request.reseller,
            expires_at: request.expires_at,
            created_at: now,
        })
    }

    async fn render_and_complete(&self, batch: &TicketBatch, now: DateTime<Utc>) -> Result<IssuedBatch> {
        let drafts = draft_codes(batch.quantity);
        let expires_at = self.policy.expires_at(TokenAudience::Partner, now);

        let started = Instant::now();
        let rendered = self.render_all(drafts, expires_at).await?;
        let render_secs = started.elapsed().as_secs_f64();

        let tickets: Vec<Ticket> = rendered
            .into_iter()
            .map(|(code, token)| pre_generated_ticket(batch, code, token, now))
            .collect();

        let mut tx = self.store.begin().await?;
        if let Err(error) = self.complete_in(&mut *tx, batch, &tickets).await {
            abort(tx).await;
            return Err(error);
        }
        tx.commit().await?;

        metrics::record_batch_issued(batch.quantity, render_secs);
        info!(batch = %batch.id, tickets = tickets.len(), render_secs, "Batch issued");

        let mut issued = batch.clone();
        issued.status = BatchStatus::Active;
        Ok(IssuedBatch {
            batch: issued,
            tickets,
        })
    }

    /// Renders every token, all at once for small batches, otherwise
    /// chunk by chunk with each chunk rendered concurrently.
    async fn render_all(
        &self,
        drafts: Vec<(TicketCode, TokenId)>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<(TicketCode, IssuedToken)>> {
        let chunk_size = if drafts.len() < self.config.full_parallel_below {
            drafts.len().max(1)
        } else {
            self.config.render_chunk.max(1)
        };

        let mut rendered = Vec::with_capacity(drafts.len());
        for chunk in drafts.chunks(chunk_size) {
            let tasks = chunk.iter().cloned().map(|(code, token_id)| {
                let tokens = Arc::clone(&self.tokens);
                async move {
                    tokio::task::spawn_blocking(move || {
                        tokens
                            .issue_with_id(token_id, &code, expires_at)
                            .map(|token| (code, token))
                    })
                    .await
                    .map_err(|e| TicketingError::Render(format!("render task failed: {e}")))?
                }
            });
            rendered.extend(try_join_all(tasks).await?);
        }
        Ok(rendered)
    }

    async fn complete_in(
        &self,
        tx: &mut dyn StoreTransaction,
        batch: &TicketBatch,
        tickets: &[Ticket],
    ) -> Result<()> {
        InventoryLedger::reserve(tx, batch.product_id, &batch.channel_id, batch.quantity).await?;
        tx.update_batch_status(&batch.id, BatchStatus::Active).await?;
        for chunk in tickets.chunks(self.config.insert_chunk.max(1)) {
            tx.insert_tickets(chunk).await?;
        }
        Ok(())
    }

    async fn compensate(&self, id: &BatchId, cause: &TicketingError) {
        metrics::record_batch("failed");
        warn!(batch = %id, error = %cause, "Batch issuance failed, removing placeholder");
        if let Err(error) = self.store.delete_batch(id).await {
            warn!(batch = %id, error = %error, "Failed to remove batch placeholder");
        }
    }

    /// Cancels an active batch.
    ///
    /// Tickets still `PRE_GENERATED` become `CANCELLED` and their held units
    /// are released; activated tickets are untouched. Cancelling a cancelled
    /// or expired batch returns it unchanged.
    ///
    /// # Errors
    ///
    /// [`TicketingError::BatchNotFound`] when absent, owned by another
    /// partner, or still being created.
    #[instrument(skip(self), fields(batch = %id, partner = %partner))]
    pub async fn cancel(&self, id: &BatchId, partner: &PartnerId) -> Result<CancelledBatch> {
        let batch = self.find_owned(id, partner).await?;

        let mut tx = self.store.begin().await?;
        match Self::cancel_in(&mut *tx, &batch).await {
            Ok(Some(cancelled)) => {
                tx.commit().await?;
                metrics::record_batch("cancelled");
                info!(released = cancelled.released, "Batch cancelled");
                Ok(cancelled)
            }
            Ok(None) => {
                abort(tx).await;
                Ok(CancelledBatch { batch, released: 0 })
            }
            Err(error) => {
                abort(tx).await;
                Err(error)
            }
        }
    }

    async fn cancel_in(
        tx: &mut dyn StoreTransaction,
        batch: &TicketBatch,
    ) -> Result<Option<CancelledBatch>> {
        tx.lock_product(batch.product_id).await?;
        let mut locked = tx
            .lock_batch(&batch.id)
            .await?
            .ok_or_else(|| TicketingError::BatchNotFound(batch.id.clone()))?;

        match locked.status {
            BatchStatus::Creating => Err(TicketingError::BatchNotFound(batch.id.clone())),
            BatchStatus::Cancelled | BatchStatus::Expired => Ok(None),
            BatchStatus::Active => {
                let released = Self::retire_in(tx, &locked, BatchStatus::Cancelled).await?;
                locked.status = BatchStatus::Cancelled;
                Ok(Some(CancelledBatch {
                    batch: locked,
                    released,
                }))
            }
        }
    }

    /// Expires every active batch past its expiry.
    ///
    /// Tickets still `PRE_GENERATED` become `EXPIRED` and their held units
    /// return to the channel; activated tickets are untouched. Each batch is
    /// re-read under the product lock, so overlapping calls never release
    /// the same units twice. Returns how many batches expired.
    ///
    /// # Errors
    ///
    /// Storage errors. Batches expired before the failure stay expired.
    #[instrument(skip(self))]
    pub async fn expire_due(&self) -> Result<usize> {
        let now = self.clock.now();
        let due = self.store.due_batches(now).await?;
        let mut expired = 0;

        for candidate in due {
            let mut tx = self.store.begin().await?;
            match Self::expire_in(&mut *tx, &candidate, now).await {
                Ok(Some(released)) => {
                    tx.commit().await?;
                    expired += 1;
                    metrics::record_batch("expired");
                    info!(batch = %candidate.id, released, "Batch expired");
                }
                Ok(None) => abort(tx).await,
                Err(error) => {
                    abort(tx).await;
                    return Err(error);
                }
            }
        }
        Ok(expired)
    }

    async fn expire_in(
        tx: &mut dyn StoreTransaction,
        candidate: &TicketBatch,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        tx.lock_product(candidate.product_id).await?;
        let Some(batch) = tx.lock_batch(&candidate.id).await? else {
            return Ok(None);
        };
        if batch.status != BatchStatus::Active || !batch.is_expired_at(now) {
            return Ok(None);
        }
        Self::retire_in(tx, &batch, BatchStatus::Expired).await.map(Some)
    }

    /// Retires the unsold tickets of a locked, active batch and releases
    /// their units. Returns how many units were released.
    async fn retire_in(
        tx: &mut dyn StoreTransaction,
        batch: &TicketBatch,
        status: BatchStatus,
    ) -> Result<u32> {
        let ticket_status = match status {
            BatchStatus::Expired => TicketStatus::Expired,
            _ => TicketStatus::Cancelled,
        };
        let released = tx.retire_pre_generated(&batch.id, ticket_status).await?;
        if released > 0 {
            InventoryLedger::release(tx, batch.product_id, &batch.channel_id, released).await?;
        }
        tx.update_batch_status(&batch.id, status).await?;
        Ok(released)
    }

    /// Reads a batch.
    ///
    /// # Errors
    ///
    /// [`TicketingError::BatchNotFound`].
    pub async fn find(&self, id: &BatchId) -> Result<TicketBatch> {
        self.store
            .find_batch(id)
            .await?
            .ok_or_else(|| TicketingError::BatchNotFound(id.clone()))
    }

    /// Tickets of a batch.
    ///
    /// # Errors
    ///
    /// [`TicketingError::BatchNotFound`].
    pub async fn tickets(&self, id: &BatchId) -> Result<Vec<Ticket>> {
        self.find(id).await?;
        Ok(self.store.tickets_in_batch(id).await?)
    }

    async fn find_owned(&self, id: &BatchId, partner: &PartnerId) -> Result<TicketBatch> {
        match self.store.find_batch(id).await? {
            Some(batch) if &batch.partner_id == partner => Ok(batch),
            _ => Err(TicketingError::BatchNotFound(id.clone())),
        }
    }
}

/// `BATCH-YYYYMMDD-PARTNER-xxxxxx`
fn generate_batch_id(partner: &PartnerId, now: DateTime<Utc>) -> BatchId {
    let tag: String = partner
        .as_str()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .take(PARTNER_TAG_LEN)
        .collect();
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    BatchId::new(format!("BATCH-{}-{tag}-{suffix:06x}", now.format("%Y%m%d")))
}

/// `TKT-` followed by 16 base32 characters (80 bits).
fn generate_ticket_code(rng: &mut impl Rng) -> TicketCode {
    let body: String = (0..CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect();
    TicketCode::new(format!("TKT-{body}"))
}

fn draft_codes(quantity: u32) -> Vec<(TicketCode, TokenId)> {
    let mut rng = rand::thread_rng();
    let mut seen = HashSet::new();
    let mut drafts = Vec::with_capacity(quantity as usize);
    while drafts.len() < quantity as usize {
        let code = generate_ticket_code(&mut rng);
        if seen.insert(code.clone()) {
            drafts.push((code, TokenId::new()));
        }
    }
    drafts
}

fn pre_generated_ticket(
    batch: &TicketBatch,
    code: TicketCode,
    token: IssuedToken,
    now: DateTime<Utc>,
) -> Ticket {
    let (token_id, admission) = token.into_artifact();
    Ticket {
        code,
        product_id: batch.product_id,
        batch_id: Some(batch.id.clone()),
        partner_id: Some(batch.partner_id.clone()),
        channel_id: batch.channel_id.clone(),
        status: TicketStatus::PreGenerated,
        customer: None,
        customer_type: None,
        order_id: None,
        charged_price: None,
        price_breakdown: None,
        payment_reference: None,
        admission,
        audit: TicketAudit::issued(token_id, now),
        created_at: now,
        activated_at: None,
        verified_at: None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use tessera_testing::test_epoch;

    #[test]
    fn batch_ids_are_human_decodable() {
        let id = generate_batch_id(&PartnerId::from("acme-travel GmbH"), test_epoch());
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts[0], "BATCH");
        assert_eq!(parts[1], "20250101");
        assert_eq!(parts[2], "ACMETRAVELGM");
        assert_eq!(parts[3].len(), 6);
    }

    #[test]
    fn ticket_codes_use_base32_alphabet() {
        let code = generate_ticket_code(&mut rand::thread_rng());
        let body = code.as_str().strip_prefix("TKT-").unwrap();
        assert_eq!(body.len(), CODE_LEN);
        assert!(body.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn drafted_codes_are_unique() {
        let drafts = draft_codes(500);
        let unique: HashSet<_> = drafts.iter().map(|(code, _)| code.clone()).collect();
        assert_eq!(unique.len(), 500);
    }
}
