//! Ticket lifecycle state machine and channel vocabularies.
//!
//! ```text
//! PENDING_PAYMENT ──▶ RESERVED ──┐
//!                                ├──▶ ACTIVATED ──▶ VERIFIED
//!          PRE_GENERATED ────────┘
//!
//! any non-terminal ──▶ EXPIRED | CANCELLED
//! ```
//!
//! `PRE_GENERATED` is only produced by batch issuance, `VERIFIED` only by
//! the venue's redemption flow. Each sales channel speaks its own status
//! vocabulary; the mappings here are pure and total in both directions.

use crate::error::{Result, TicketingError};
use serde::{Deserialize, Serialize};

/// Internal ticket status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Direct sale awaiting payment
    PendingPayment,
    /// Direct sale holding inventory
    Reserved,
    /// Created by a batch, not yet bound to a customer
    PreGenerated,
    /// Sold and bound to a customer
    Activated,
    /// Redeemed at the venue
    Verified,
    /// Lapsed
    Expired,
    /// Cancelled
    Cancelled,
}

impl TicketStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::PendingPayment,
        Self::Reserved,
        Self::PreGenerated,
        Self::Activated,
        Self::Verified,
        Self::Expired,
        Self::Cancelled,
    ];

    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Reserved => "RESERVED",
            Self::PreGenerated => "PRE_GENERATED",
            Self::Activated => "ACTIVATED",
            Self::Verified => "VERIFIED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// No transition leaves a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Expired | Self::Cancelled)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Self::PendingPayment, Self::Reserved)
                | (Self::Reserved | Self::PreGenerated, Self::Activated)
                | (Self::Activated, Self::Verified)
                | (_, Self::Expired | Self::Cancelled)
        )
    }

    /// Validates and performs a transition.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::InvalidTransition`] if the move is not allowed.
    pub fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TicketingError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// A channel's external status vocabulary.
///
/// Both directions are total: every internal status has an external name and
/// every external name resolves to one internal status.
pub trait ChannelVocabulary {
    /// External status type
    type External: Copy;

    /// Internal → external
    fn to_external(status: TicketStatus) -> Self::External;

    /// External → internal
    fn to_internal(external: Self::External) -> TicketStatus;
}

/// Status names exposed to travel-agency partners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartnerStatus {
    /// Issued, not yet sold
    PreGenerated,
    /// Sold
    Active,
    /// Redeemed
    Used,
    /// Lapsed
    Expired,
    /// Cancelled
    Cancelled,
}

/// Partner channel mapping.
///
/// Direct-sale-only states (`PENDING_PAYMENT`, `RESERVED`) have no partner
/// name and surface as `ACTIVE`; an unpaid hold therefore reads as active to
/// a partner.
#[derive(Debug, Clone, Copy)]
pub struct PartnerVocabulary;

impl ChannelVocabulary for PartnerVocabulary {
    type External = PartnerStatus;

    fn to_external(status: TicketStatus) -> PartnerStatus {
        match status {
            TicketStatus::PreGenerated => PartnerStatus::PreGenerated,
            TicketStatus::Activated | TicketStatus::PendingPayment | TicketStatus::Reserved => {
                PartnerStatus::Active
            }
            TicketStatus::Verified => PartnerStatus::Used,
            TicketStatus::Expired => PartnerStatus::Expired,
            TicketStatus::Cancelled => PartnerStatus::Cancelled,
        }
    }

    fn to_internal(external: PartnerStatus) -> TicketStatus {
        match external {
            PartnerStatus::PreGenerated => TicketStatus::PreGenerated,
            PartnerStatus::Active => TicketStatus::Activated,
            PartnerStatus::Used => TicketStatus::Verified,
            PartnerStatus::Expired => TicketStatus::Expired,
            PartnerStatus::Cancelled => TicketStatus::Cancelled,
        }
    }
}

/// Status names exposed on the direct storefront.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorefrontStatus {
    /// Awaiting payment
    AwaitingPayment,
    /// Inventory held
    Held,
    /// Paid
    Confirmed,
    /// Redeemed
    Redeemed,
    /// Lapsed
    Expired,
    /// Cancelled
    Cancelled,
}

/// Storefront channel mapping. Batch tickets never appear here in practice;
/// `PRE_GENERATED` folds into `CONFIRMED`.
#[derive(Debug, Clone, Copy)]
pub struct StorefrontVocabulary;

impl ChannelVocabulary for StorefrontVocabulary {
    type External = StorefrontStatus;

    fn to_external(status: TicketStatus) -> StorefrontStatus {
        match status {
            TicketStatus::PendingPayment => StorefrontStatus::AwaitingPayment,
            TicketStatus::Reserved => StorefrontStatus::Held,
            TicketStatus::PreGenerated | TicketStatus::Activated => StorefrontStatus::Confirmed,
            TicketStatus::Verified => StorefrontStatus::Redeemed,
            TicketStatus::Expired => StorefrontStatus::Expired,
            TicketStatus::Cancelled => StorefrontStatus::Cancelled,
        }
    }

    fn to_internal(external: StorefrontStatus) -> TicketStatus {
        match external {
            StorefrontStatus::AwaitingPayment => TicketStatus::PendingPayment,
            StorefrontStatus::Held => TicketStatus::Reserved,
            StorefrontStatus::Confirmed => TicketStatus::Activated,
            StorefrontStatus::Redeemed => TicketStatus::Verified,
            StorefrontStatus::Expired => TicketStatus::Expired,
            StorefrontStatus::Cancelled => TicketStatus::Cancelled,
        }
    }
}
