//! Token lifetimes per audience.

use crate::config::TokenConfig;
use chrono::{DateTime, Duration, Utc};

/// Who a token is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAudience {
    /// Partner bulk tickets, valid until the partner sells them
    Partner,
    /// Direct sale, optionally bound to a visit slot
    Direct {
        /// End of the booked time slot
        slot_end: Option<DateTime<Utc>>,
    },
}

/// Computes token expiry from the audience.
#[derive(Debug, Clone, Copy)]
pub struct TokenExpiryPolicy {
    direct_ttl: Duration,
    partner_ttl: Duration,
}

impl TokenExpiryPolicy {
    /// Policy from configured lifetimes
    #[must_use]
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            direct_ttl: Duration::try_minutes(config.direct_ttl_minutes).unwrap_or(Duration::MAX),
            partner_ttl: Duration::try_days(config.partner_ttl_days).unwrap_or(Duration::MAX),
        }
    }

    /// Expiry of a token issued at `issued_at`, saturating at the end of time.
    #[must_use]
    pub fn expires_at(&self, audience: TokenAudience, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = match audience {
            TokenAudience::Direct {
                slot_end: Some(slot_end),
            } => return slot_end,
            TokenAudience::Direct { slot_end: None } => self.direct_ttl,
            TokenAudience::Partner => self.partner_ttl,
        };
        issued_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for TokenExpiryPolicy {
    fn default() -> Self {
        Self::new(&TokenConfig::default())
    }
}
