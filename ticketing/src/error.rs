//! Error types for inventory, issuance, activation and token operations.

use crate::lifecycle::TicketStatus;
use crate::store::StoreError;
use crate::token::TokenError;
use crate::types::{BatchId, ChannelId, ProductId, ReservationId};
use thiserror::Error;

/// Result type alias for ticketing operations.
pub type Result<T> = std::result::Result<T, TicketingError>;

/// Error taxonomy for the issuance core.
///
/// Every failure a caller can act on has its own variant, so an expired
/// token (soft) is never confused with a tampered one (hard) or with a
/// storage failure.
#[derive(Debug, Error)]
pub enum TicketingError {
    // ═══════════════════════════════════════════════════════════
    // Inventory
    // ═══════════════════════════════════════════════════════════

    /// Not enough free units on the channel. Retry with a smaller quantity.
    #[error("Sold out: requested {requested}, available {available}")]
    SoldOut {
        /// Units requested
        requested: u32,
        /// Units currently available
        available: u32,
    },

    /// Quantity outside the accepted range.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    /// Product does not exist in the catalog.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Product has no allocation for the channel.
    #[error("Channel {channel} has no allocation for product {product}")]
    UnknownChannel {
        /// Product
        product: ProductId,
        /// Channel
        channel: ChannelId,
    },

    // ═══════════════════════════════════════════════════════════
    // Reservations
    // ═══════════════════════════════════════════════════════════

    /// Reservation does not exist.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Reservation was already converted into a sale.
    #[error("Reservation already activated: {0}")]
    ReservationAlreadyActivated(ReservationId),

    /// Reservation hold has lapsed.
    #[error("Reservation expired: {0}")]
    ReservationExpired(ReservationId),

    /// Reservation is no longer active (expired or cancelled).
    #[error("Reservation not active: {0}")]
    ReservationNotActive(ReservationId),

    // ═══════════════════════════════════════════════════════════
    // Batches
    // ═══════════════════════════════════════════════════════════

    /// Another request already claimed this batch id.
    #[error("Duplicate batch: {0}")]
    DuplicateBatch(BatchId),

    /// Batch does not exist (or belongs to another partner).
    #[error("Batch not found: {0}")]
    BatchNotFound(BatchId),

    /// Token rendering failed while issuing a batch.
    #[error("Token rendering failed: {0}")]
    Render(String),

    // ═══════════════════════════════════════════════════════════
    // Tickets
    // ═══════════════════════════════════════════════════════════

    /// Ticket absent, out of the caller's partner scope, or not activatable.
    #[error("Ticket not found")]
    TicketNotFound,

    /// Ticket was already activated.
    #[error("Ticket already activated")]
    TicketAlreadyActivated,

    /// Customer type is not priced in the batch.
    #[error("Invalid customer type: {0}")]
    InvalidCustomerType(String),

    /// Pricing cannot be resolved (discount above 100%, arithmetic overflow).
    #[error("Invalid pricing: {0}")]
    InvalidPricing(String),

    /// Lifecycle transition is not allowed.
    #[error("Invalid ticket transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current status
        from: TicketStatus,
        /// Requested status
        to: TicketStatus,
    },

    // ═══════════════════════════════════════════════════════════
    // Tokens
    // ═══════════════════════════════════════════════════════════

    /// Admission token failed verification.
    #[error(transparent)]
    Token(#[from] TokenError),

    // ═══════════════════════════════════════════════════════════
    // System
    // ═══════════════════════════════════════════════════════════

    /// Storage or transaction failure. The transaction was rolled back.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Invalid configuration (keys, limits).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TicketingError {
    /// Returns `true` if this error is caused by client input (4xx-equivalent).
    ///
    /// # Examples
    ///
    /// ```
    /// # use tessera_ticketing::TicketingError;
    /// assert!(TicketingError::TicketNotFound.is_client_error());
    /// assert!(!TicketingError::Configuration("bad key".into()).is_client_error());
    /// ```
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::SoldOut { .. }
                | Self::InvalidQuantity(_)
                | Self::ProductNotFound(_)
                | Self::UnknownChannel { .. }
                | Self::ReservationNotFound(_)
                | Self::ReservationAlreadyActivated(_)
                | Self::ReservationExpired(_)
                | Self::ReservationNotActive(_)
                | Self::DuplicateBatch(_)
                | Self::BatchNotFound(_)
                | Self::TicketNotFound
                | Self::TicketAlreadyActivated
                | Self::InvalidCustomerType(_)
                | Self::InvalidPricing(_)
                | Self::InvalidTransition { .. }
                | Self::Token(_)
        )
    }

    /// Returns `true` if retrying (with a smaller quantity) can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::SoldOut { .. })
    }

    /// Returns `true` if this error indicates possible tampering.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tessera_ticketing::{TicketingError, token::TokenError};
    /// assert!(TicketingError::Token(TokenError::SignatureInvalid).is_security_issue());
    /// assert!(!TicketingError::TicketNotFound.is_security_issue());
    /// ```
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(
            self,
            Self::Token(TokenError::SignatureInvalid | TokenError::DecryptionFailed)
        )
    }

    /// Message safe to show to untrusted callers.
    ///
    /// Token failures collapse into one generic tamper signal; storage and
    /// configuration failures never leak their details.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Token(TokenError::SignatureInvalid | TokenError::DecryptionFailed) => {
                "Invalid admission token".to_string()
            }
            Self::Storage(_) | Self::Configuration(_) | Self::Render(_) => {
                "Internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tamper_errors_share_one_public_message() {
        let signature = TicketingError::Token(TokenError::SignatureInvalid);
        let decryption = TicketingError::Token(TokenError::DecryptionFailed);
        assert_eq!(signature.public_message(), decryption.public_message());
    }

    #[test]
    fn sold_out_reports_availability() {
        let error = TicketingError::SoldOut {
            requested: 3,
            available: 1,
        };
        assert!(error.is_retryable());
        assert!(error.public_message().contains("available 1"));
    }

    #[test]
    fn storage_errors_are_not_client_errors() {
        let error = TicketingError::Storage(StoreError::Database("connection reset".into()));
        assert!(!error.is_client_error());
        assert_eq!(error.public_message(), "Internal error");
    }
}
