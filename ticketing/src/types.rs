//! Domain types for the ticket issuance core.
//!
//! Value objects, entities and status enums shared by the ledger, the
//! reservation manager, the batch issuer and the activation processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a `", stringify!($name), "` from any string-like value")]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a product in the catalog
    ProductId
);
uuid_id!(
    /// Unique identifier for a reservation (inventory hold)
    ReservationId
);
uuid_id!(
    /// Unique identifier for an order created by the order subsystem
    OrderId
);
uuid_id!(
    /// Unique identifier of one issued admission token
    TokenId
);

string_id!(
    /// A named sales surface (`direct`, `ota`, one reseller) with its own inventory slice
    ChannelId
);
string_id!(
    /// External partner (travel agency, reseller) that owns batches and tickets
    PartnerId
);
string_id!(
    /// Batch identifier. Human-decodable (`BATCH-20250101-ACME-3f9a1c`) and a uniqueness token.
    BatchId
);
string_id!(
    /// Opaque, unguessable ticket code printed on the admission token
    TicketCode
);

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two money amounts (returns None if result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }

    /// Applies a percentage discount with overflow checking.
    ///
    /// Returns `None` on overflow or when `percent > 100`.
    #[must_use]
    pub const fn checked_apply_discount(self, percent: u32) -> Option<Self> {
        let discount = match self.0.checked_mul(percent as u64) {
            Some(product) => product / 100,
            None => return None,
        };

        if discount > self.0 {
            return None;
        }

        Some(Self(self.0 - discount))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Customer types
// ============================================================================

/// Customer category a ticket is priced for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerType {
    /// Standard adult fare
    Adult,
    /// Child fare
    Child,
    /// Senior fare
    Elderly,
    /// Student fare
    Student,
    /// Resident / local fare
    Resident,
}

impl CustomerType {
    /// Canonical lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Adult => "adult",
            Self::Child => "child",
            Self::Elderly => "elderly",
            Self::Student => "student",
            Self::Resident => "resident",
        }
    }
}

impl fmt::Display for CustomerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CustomerType {
    type Err = crate::error::TicketingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adult" => Ok(Self::Adult),
            "child" => Ok(Self::Child),
            "elderly" | "senior" => Ok(Self::Elderly),
            "student" => Ok(Self::Student),
            "resident" => Ok(Self::Resident),
            other => Err(crate::error::TicketingError::InvalidCustomerType(other.to_string())),
        }
    }
}

/// Identity of the end customer a ticket is bound to at activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerIdentity {
    /// Full name
    pub name: String,
    /// Contact email
    pub email: Option<String>,
    /// Contact phone
    pub phone: Option<String>,
}

// ============================================================================
// Product catalog + embedded inventory
// ============================================================================

/// Per-channel inventory counters embedded in a product.
///
/// Invariant: `allocated >= reserved + sold`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAllocation {
    /// Units allocated to the channel
    pub allocated: u32,
    /// Units currently held (reservations, pre-generated tickets)
    pub reserved: u32,
    /// Units sold
    pub sold: u32,
}

impl ChannelAllocation {
    /// Creates an allocation with nothing reserved or sold
    #[must_use]
    pub const fn new(allocated: u32) -> Self {
        Self {
            allocated,
            reserved: 0,
            sold: 0,
        }
    }

    /// Returns the number of free units (computed, not stored)
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.allocated
            .saturating_sub(self.reserved)
            .saturating_sub(self.sold)
    }

    /// Returns `true` when `allocated >= reserved + sold`.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        match self.reserved.checked_add(self.sold) {
            Some(taken) => taken <= self.allocated,
            None => false,
        }
    }
}

/// Product as seen by this core: pricing fields are read-only, the embedded
/// inventory is mutated exclusively through the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Base price per unit
    pub base_price: Money,
    /// Added on Saturday/Sunday visits
    pub weekend_premium: Option<Money>,
    /// Percentage discount per customer type
    pub customer_type_discounts: BTreeMap<CustomerType, u32>,
    /// ISO currency code
    pub currency: String,
    /// Channel allocations keyed by channel
    pub channels: HashMap<ChannelId, ChannelAllocation>,
    /// Units sold across every channel
    pub sold_count: u64,
}

impl Product {
    /// Creates a product with no channels, discounts or premium
    #[must_use]
    pub fn new(id: ProductId, name: impl Into<String>, base_price: Money, currency: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            base_price,
            weekend_premium: None,
            customer_type_discounts: BTreeMap::new(),
            currency: currency.into(),
            channels: HashMap::new(),
            sold_count: 0,
        }
    }

    /// Builder-style weekend premium
    #[must_use]
    pub const fn with_weekend_premium(mut self, premium: Money) -> Self {
        self.weekend_premium = Some(premium);
        self
    }

    /// Builder-style per-type discount (percent)
    #[must_use]
    pub fn with_discount(mut self, customer_type: CustomerType, percent: u32) -> Self {
        self.customer_type_discounts.insert(customer_type, percent);
        self
    }

    /// Builder-style channel allocation
    #[must_use]
    pub fn with_allocation(mut self, channel: impl Into<ChannelId>, allocated: u32) -> Self {
        self.channels.insert(channel.into(), ChannelAllocation::new(allocated));
        self
    }

    /// Gets the allocation of a channel
    #[must_use]
    pub fn allocation(&self, channel: &ChannelId) -> Option<&ChannelAllocation> {
        self.channels.get(channel)
    }
}

// ============================================================================
// Pricing snapshots
// ============================================================================

/// Prices captured at hold / batch-creation time so later catalog changes do
/// not alter already-issued inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    /// Base unit price
    pub base_price: Money,
    /// Standard price per customer type (base price minus the type discount)
    pub customer_type_prices: BTreeMap<CustomerType, Money>,
    /// Weekend premium (zero when the product has none)
    pub weekend_premium: Money,
    /// ISO currency code
    pub currency: String,
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

/// Caller-supplied overrides applied on top of a batch snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingOverrides {
    /// Flat campaign discount in percent, applied only when no per-type override is used
    pub discount_percent: Option<u32>,
    /// Replaces the snapshot weekend premium (zero suppresses it)
    pub weekend_premium: Option<Money>,
    /// Explicit per-type prices, taking precedence over the standard prices
    pub customer_type_prices: BTreeMap<CustomerType, Money>,
}

/// Pricing stored on a batch: the snapshot plus the overrides it was created with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPricing {
    /// Prices captured from the catalog at creation
    pub snapshot: PricingSnapshot,
    /// Overrides supplied by the caller
    pub overrides: PricingOverrides,
}

/// Decomposition of the price charged at activation, kept for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Unit price before discount and premium
    pub base: Money,
    /// Flat discount taken off `base`
    pub discount: Money,
    /// Weekend premium added
    pub weekend_premium: Money,
    /// Final charged price
    pub final_price: Money,
    /// Whether a per-type override price was used
    pub override_applied: bool,
    /// ISO currency code
    pub currency: String,
}

// ============================================================================
// Reservations
// ============================================================================

/// Reservation status. Leaves `Active` exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding inventory
    Active,
    /// Converted into a sale
    Activated,
    /// Hold ran out
    Expired,
    /// Released by the caller
    Cancelled,
}

impl ReservationStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Activated => "activated",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "activated" => Some(Self::Activated),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Time-boxed inventory hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Product held
    pub product_id: ProductId,
    /// Channel the units are held on
    pub channel_id: ChannelId,
    /// Units held
    pub quantity: u32,
    /// Current status
    pub status: ReservationStatus,
    /// Prices at hold time
    pub pricing: PricingSnapshot,
    /// When the hold was created
    pub created_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
    /// When the hold was converted into a sale
    pub activated_at: Option<DateTime<Utc>>,
    /// Order created for the sale
    pub order_id: Option<OrderId>,
}

impl Reservation {
    /// Checks if the hold has lapsed at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ============================================================================
// Batches
// ============================================================================

/// How a batch reaches customers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    /// The partner sells each ticket directly to a customer
    DirectSale,
    /// The batch is handed to a reseller as a block
    ResellerBatch,
}

impl DistributionMode {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DirectSale => "direct_sale",
            Self::ResellerBatch => "reseller_batch",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct_sale" => Some(Self::DirectSale),
            "reseller_batch" => Some(Self::ResellerBatch),
            _ => None,
        }
    }
}

/// Batch status. `Creating` only exists between issuance start and completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Placeholder row, tokens being rendered
    Creating,
    /// All tickets persisted
    Active,
    /// Past its expiry
    Expired,
    /// Cancelled by the partner
    Cancelled,
}

impl BatchStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(Self::Creating),
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Reseller / campaign metadata attached to a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResellerMetadata {
    /// Reseller name
    pub reseller_name: Option<String>,
    /// Campaign name
    pub campaign_name: Option<String>,
    /// Campaign type (`early_bird`, `group`, ...)
    pub campaign_type: Option<String>,
    /// Free-form notes
    pub notes: Option<String>,
}

/// Set of tickets issued together for one partner/channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBatch {
    /// Batch identifier (primary key)
    pub id: BatchId,
    /// Owning partner
    pub partner_id: PartnerId,
    /// Product issued
    pub product_id: ProductId,
    /// Channel the inventory is taken from
    pub channel_id: ChannelId,
    /// Number of tickets
    pub quantity: u32,
    /// Distribution mode
    pub distribution_mode: DistributionMode,
    /// Current status
    pub status: BatchStatus,
    /// Snapshot + overrides
    pub pricing: BatchPricing,
    /// Reseller / campaign metadata
    pub reseller: Option<ResellerMetadata>,
    /// Optional batch expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// When issuance started
    pub created_at: DateTime<Utc>,
}

impl TicketBatch {
    /// Checks if the batch is past its expiry at `now`. Batches without one never expire.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Checks if tickets of this batch may still be sold at `now`
    #[must_use]
    pub fn is_sellable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == BatchStatus::Active && !self.is_expired_at(now)
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Who activated a ticket, and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationStamp {
    /// Partner that sold the ticket
    pub partner_id: PartnerId,
    /// Activation time
    pub at: DateTime<Utc>,
}

/// Audit trail recorded on a ticket.
///
/// `issued_token_id` never changes; `current_token_id` moves on reissue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketAudit {
    /// Token id issued when the ticket was created
    pub issued_token_id: TokenId,
    /// Token id currently considered valid
    pub current_token_id: TokenId,
    /// When the current token was rendered
    pub token_rendered_at: DateTime<Utc>,
    /// Set once, by activation
    pub activation: Option<ActivationStamp>,
}

impl TicketAudit {
    /// Audit record for a freshly issued ticket
    #[must_use]
    pub const fn issued(token_id: TokenId, at: DateTime<Utc>) -> Self {
        Self {
            issued_token_id: token_id,
            current_token_id: token_id,
            token_rendered_at: at,
            activation: None,
        }
    }
}

/// Scannable artifact rendered for a ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionArtifact {
    /// Signed + encrypted wire value encoded in the barcode
    pub wire_value: String,
    /// Rendered PNG image
    pub image_png: Vec<u8>,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
}

/// One admission unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique ticket code
    pub code: TicketCode,
    /// Product
    pub product_id: ProductId,
    /// Owning batch
    pub batch_id: Option<BatchId>,
    /// Owning partner
    pub partner_id: Option<PartnerId>,
    /// Sales channel
    pub channel_id: ChannelId,
    /// Lifecycle status
    pub status: crate::lifecycle::TicketStatus,
    /// Customer bound at activation
    pub customer: Option<CustomerIdentity>,
    /// Customer type priced at activation
    pub customer_type: Option<CustomerType>,
    /// Order created at activation
    pub order_id: Option<OrderId>,
    /// Price charged
    pub charged_price: Option<Money>,
    /// Price decomposition
    pub price_breakdown: Option<PriceBreakdown>,
    /// Payment reference supplied at activation
    pub payment_reference: Option<String>,
    /// Rendered token
    pub admission: AdmissionArtifact,
    /// Token ids
    pub audit: TicketAudit,
    /// When the ticket row was created
    pub created_at: DateTime<Utc>,
    /// When it was activated
    pub activated_at: Option<DateTime<Utc>>,
    /// When it was redeemed at the venue
    pub verified_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Orders
// ============================================================================

/// Order row created inside the activation transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Product sold
    pub product_id: ProductId,
    /// Units
    pub quantity: u32,
    /// Total charged
    pub total: Money,
    /// ISO currency code
    pub currency: String,
    /// Channel sold on
    pub channel_id: ChannelId,
    /// Customer
    pub customer: CustomerIdentity,
    /// Payment reference supplied by the caller
    pub payment_reference: String,
    /// When the order was created
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_available_never_underflows() {
        let allocation = ChannelAllocation {
            allocated: 3,
            reserved: 2,
            sold: 2,
        };
        assert_eq!(allocation.available(), 0);
        assert!(!allocation.is_consistent());
    }

    #[test]
    fn discount_rejects_more_than_full_price() {
        let price = Money::from_cents(1_000);
        assert_eq!(price.checked_apply_discount(25), Some(Money::from_cents(750)));
        assert_eq!(price.checked_apply_discount(100), Some(Money::ZERO));
        assert_eq!(price.checked_apply_discount(101), None);
    }

    #[test]
    fn customer_type_parsing_accepts_aliases() {
        assert_eq!("Senior".parse::<CustomerType>().ok(), Some(CustomerType::Elderly));
        assert_eq!(" adult ".parse::<CustomerType>().ok(), Some(CustomerType::Adult));
        assert!("pirate".parse::<CustomerType>().is_err());
    }

    #[test]
    fn money_display_uses_two_decimals() {
        assert_eq!(Money::from_cents(1_205).to_string(), "12.05");
    }
}
