//! Shared fixture: one product on an in-memory store driven by a mock clock.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tessera_core::environment::Clock;
use tessera_testing::MockClock;
use tessera_ticketing::token::BarcodeRenderer;
use tessera_ticketing::{
    AdmissionTokenService, ChannelAllocation, ChannelId, Config, CustomerIdentity, CustomerType,
    MemoryStore, Money, PartnerId, Product, ProductId, TicketStore, TicketingError,
    TicketingServices, TokenKeys,
};

pub const PARTNER: &str = "acme-travel";
pub const OTA: &str = "ota";
pub const DIRECT: &str = "direct";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<MockClock>,
    pub services: TicketingServices,
    pub product: ProductId,
}

/// Harbour cruise: 50.00 EUR, +10.00 on weekends, children half price.
/// `ota` holds 10 units, `direct` holds 5.
pub fn harbour_cruise() -> Product {
    Product::new(ProductId::new(), "Harbour cruise", Money::from_cents(5_000), "EUR")
        .with_weekend_premium(Money::from_cents(1_000))
        .with_discount(CustomerType::Adult, 0)
        .with_discount(CustomerType::Child, 50)
        .with_allocation(OTA, 10)
        .with_allocation(DIRECT, 5)
}

pub async fn harness() -> Harness {
    let clock = Arc::new(MockClock::at_test_epoch());
    let tokens = AdmissionTokenService::new(&TokenKeys::ephemeral(), clock.clone());
    harness_with_tokens(clock, tokens).await
}

pub async fn harness_with_renderer(renderer: Arc<dyn BarcodeRenderer>) -> Harness {
    let clock = Arc::new(MockClock::at_test_epoch());
    let tokens =
        AdmissionTokenService::new(&TokenKeys::ephemeral(), clock.clone()).with_renderer(renderer);
    harness_with_tokens(clock, tokens).await
}

async fn harness_with_tokens(clock: Arc<MockClock>, tokens: AdmissionTokenService) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let product = harbour_cruise();
    let id = product.id;
    store.insert_product(product).await;
    let services = TicketingServices::with_tokens(
        store.clone(),
        clock.clone(),
        &Config::default(),
        Arc::new(tokens),
    );
    Harness {
        store,
        clock,
        services,
        product: id,
    }
}

impl Harness {
    pub async fn allocation(&self, channel: &str) -> ChannelAllocation {
        let product = self.store.find_product(self.product).await.unwrap().unwrap();
        *product.allocation(&ChannelId::from(channel)).unwrap()
    }

    pub async fn sold_count(&self) -> u64 {
        self.store
            .find_product(self.product)
            .await
            .unwrap()
            .unwrap()
            .sold_count
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn partner(&self) -> PartnerId {
        PartnerId::from(PARTNER)
    }
}

pub fn customer(name: &str) -> CustomerIdentity {
    CustomerIdentity {
        name: name.to_string(),
        email: Some(format!("{}@example.com", name.to_ascii_lowercase())),
        phone: None,
    }
}

/// Renderer that always fails, standing in for a broken barcode encoder.
pub struct FailingRenderer;

impl BarcodeRenderer for FailingRenderer {
    fn render(&self, _value: &str) -> tessera_ticketing::Result<Vec<u8>> {
        Err(TicketingError::Render("encoder offline".into()))
    }
}
