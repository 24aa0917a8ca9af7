//! # Tessera ticketing
//!
//! Channel-scoped inventory, direct-sale reservations, partner batch
//! issuance and encrypted admission tokens.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ┌─────────────┐  ┌──────────────┐  ┌──────────────┐
//! │ Reservation  │  │ BatchIssuer │  │ Activation   │  │ AdmissionDesk│
//! │ Manager      │  │             │  │ Processor    │  │              │
//! └──────┬───────┘  └──────┬──────┘  └──────┬───────┘  └──────┬───────┘
//!        │                 │                │                 │
//!        └────────┬────────┴───────┬────────┘          AdmissionTokenService
//!                 ▼                ▼                    (AES-256-GCM + HMAC)
//!          InventoryLedger     pricing
//!                 │
//!                 ▼
//!        TicketStore / StoreTransaction
//!        (MemoryStore, PostgresStore)
//! ```
//!
//! Every operation that moves inventory counters does so inside one store
//! transaction that starts by locking the product row. For each channel,
//! `reserved + sold <= allocated` holds at every commit.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera_core::environment::SystemClock;
//! use tessera_ticketing::{Config, MemoryStore, TicketingServices};
//!
//! # fn main() -> tessera_ticketing::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let services = TicketingServices::new(store, Arc::new(SystemClock), &Config::from_env())?;
//! # let _ = services;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activation;
pub mod admission;
pub mod batch;
pub mod config;
pub mod error;
pub mod inventory;
pub mod lifecycle;
pub mod metrics;
pub mod pricing;
pub mod reservation;
pub mod services;
pub mod store;
pub mod token;
pub mod types;

pub use activation::{Activation, ActivationProcessor, ActivationRequest};
pub use admission::{AdmissionDesk, EntryCheck};
pub use batch::{BatchIssuer, BatchRequest, CancelledBatch, IssuedBatch};
pub use config::Config;
pub use error::{Result, TicketingError};
pub use inventory::InventoryLedger;
pub use lifecycle::{ChannelVocabulary, PartnerVocabulary, StorefrontVocabulary, TicketStatus};
pub use reservation::ReservationManager;
pub use services::TicketingServices;
pub use store::{MemoryStore, StoreError, StoreTransaction, TicketStore};
pub use token::{AdmissionTokenService, TokenError, TokenExpiryPolicy, TokenKeys};
pub use types::*;
