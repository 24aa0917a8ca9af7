//! Ticket-side token operations at the venue boundary.
//!
//! Token validity and ticket status are independent: a cryptographically
//! valid, unexpired token may belong to a cancelled ticket, and an activated
//! ticket may be presented with a superseded token. [`EntryCheck`] reports
//! all three facts and leaves the admission decision to the caller.

use crate::error::{Result, TicketingError};
use crate::lifecycle::TicketStatus;
use crate::store::{StoreTransaction, TicketStore, abort};
use crate::token::{AdmissionTokenService, IssuedToken, TokenAudience, TokenExpiryPolicy, VerifiedToken};
use crate::types::{PartnerId, Ticket, TicketCode, TokenId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tessera_core::environment::Clock;
use tracing::{info, instrument};

/// Result of presenting a token at entry.
#[derive(Debug, Clone)]
pub struct EntryCheck {
    /// Verified token (may be expired)
    pub token: VerifiedToken,
    /// Status of the ticket the token names
    pub ticket_status: TicketStatus,
    /// Whether the token is the ticket's most recently issued one
    pub token_is_current: bool,
}

/// Reissue, entry check and redemption.
#[derive(Clone)]
pub struct AdmissionDesk {
    store: Arc<dyn TicketStore>,
    tokens: Arc<AdmissionTokenService>,
    policy: TokenExpiryPolicy,
    clock: Arc<dyn Clock>,
}

impl AdmissionDesk {
    /// Creates a desk.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        tokens: Arc<AdmissionTokenService>,
        policy: TokenExpiryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            tokens,
            policy,
            clock,
        }
    }

    /// Renders a fresh token for a `PRE_GENERATED` or `ACTIVATED` ticket.
    ///
    /// The new token id becomes `current_token_id`; `issued_token_id` keeps
    /// the id issued at creation.
    ///
    /// # Errors
    ///
    /// [`TicketingError::TicketNotFound`] when absent, out of scope, or in
    /// any other status.
    #[instrument(skip(self), fields(ticket = %code, partner = %partner))]
    pub async fn reissue(&self, code: &TicketCode, partner: &PartnerId) -> Result<Ticket> {
        let ticket = self
            .store
            .find_ticket(code)
            .await?
            .filter(|t| t.partner_id.as_ref() == Some(partner))
            .ok_or(TicketingError::TicketNotFound)?;
        check_reissuable(ticket.status)?;

        let now = self.clock.now();
        let audience = if ticket.batch_id.is_some() {
            TokenAudience::Partner
        } else {
            TokenAudience::Direct { slot_end: None }
        };
        let expires_at = self.policy.expires_at(audience, now);
        let token = self.render(code.clone(), expires_at).await?;

        let mut tx = self.store.begin().await?;
        match Self::reissue_in(&mut *tx, code, token, now).await {
            Ok(ticket) => {
                tx.commit().await?;
                info!(token = %ticket.audit.current_token_id, "Admission token reissued");
                Ok(ticket)
            }
            Err(error) => {
                abort(tx).await;
                Err(error)
            }
        }
    }

    async fn render(&self, code: TicketCode, expires_at: DateTime<Utc>) -> Result<IssuedToken> {
        let tokens = Arc::clone(&self.tokens);
        tokio::task::spawn_blocking(move || tokens.issue_with_id(TokenId::new(), &code, expires_at))
            .await
            .map_err(|e| TicketingError::Render(format!("render task failed: {e}")))?
    }

    async fn reissue_in(
        tx: &mut dyn StoreTransaction,
        code: &TicketCode,
        token: IssuedToken,
        now: DateTime<Utc>,
    ) -> Result<Ticket> {
        let mut ticket = tx
            .lock_ticket(code)
            .await?
            .ok_or(TicketingError::TicketNotFound)?;
        check_reissuable(ticket.status)?;

        let (token_id, admission) = token.into_artifact();
        ticket.admission = admission;
        ticket.audit.current_token_id = token_id;
        ticket.audit.token_rendered_at = now;
        tx.update_ticket(&ticket).await?;
        Ok(ticket)
    }

    /// Verifies a presented token and reports the ticket's status alongside.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Token`] when verification fails,
    /// [`TicketingError::TicketNotFound`] when the token names no ticket.
    pub async fn check_entry(&self, wire: &str) -> Result<EntryCheck> {
        let token = self.tokens.verify(wire)?;
        let ticket = self
            .store
            .find_ticket(&token.payload.ticket_code)
            .await?
            .ok_or(TicketingError::TicketNotFound)?;

        Ok(EntryCheck {
            token_is_current: ticket.audit.current_token_id == token.payload.token_id,
            ticket_status: ticket.status,
            token,
        })
    }

    /// Records a redemption at the venue: `ACTIVATED → VERIFIED`.
    ///
    /// # Errors
    ///
    /// [`TicketingError::TicketNotFound`], or
    /// [`TicketingError::InvalidTransition`] unless the ticket is `ACTIVATED`.
    #[instrument(skip(self), fields(ticket = %code))]
    pub async fn record_redemption(&self, code: &TicketCode) -> Result<Ticket> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        match Self::redeem_in(&mut *tx, code, now).await {
            Ok(ticket) => {
                tx.commit().await?;
                info!("Ticket redeemed");
                Ok(ticket)
            }
            Err(error) => {
                abort(tx).await;
                Err(error)
            }
        }
    }

    async fn redeem_in(
        tx: &mut dyn StoreTransaction,
        code: &TicketCode,
        now: DateTime<Utc>,
    ) -> Result<Ticket> {
        let mut ticket = tx
            .lock_ticket(code)
            .await?
            .ok_or(TicketingError::TicketNotFound)?;
        ticket.status = ticket.status.transition(TicketStatus::Verified)?;
        ticket.verified_at = Some(now);
        tx.update_ticket(&ticket).await?;
        Ok(ticket)
    }
}

fn check_reissuable(status: TicketStatus) -> Result<()> {
    match status {
        TicketStatus::PreGenerated | TicketStatus::Activated => Ok(()),
        _ => Err(TicketingError::TicketNotFound),
    }
}
