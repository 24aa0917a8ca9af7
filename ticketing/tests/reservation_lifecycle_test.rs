//! Reservation lifecycle tests.
//!
//! Holds are created against a channel, expire lazily on the mock clock and
//! never push a channel past its allocation, even under concurrent demand.
//!
//! Run with: `cargo test --test reservation_lifecycle_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration;
use common::{DIRECT, OTA, customer, harness};
use tessera_ticketing::{
    ActivationRequest, BatchRequest, ChannelId, CustomerType, OrderId, PartnerId,
    ReservationStatus, TicketStatus, TicketingError,
};

/// Test 1: A zero TTL hold is born lapsed
#[tokio::test]
async fn test_zero_ttl_hold_is_immediately_expirable() {
    let h = harness().await;
    let direct = ChannelId::from(DIRECT);

    let reservation = h
        .services
        .reservations
        .create(h.product, &direct, 2, Duration::zero())
        .await
        .unwrap();
    assert_eq!(reservation.expires_at, reservation.created_at);
    assert_eq!(h.allocation(DIRECT).await.reserved, 2);

    let activation = h
        .services
        .reservations
        .activate(reservation.id, OrderId::new())
        .await;
    assert!(matches!(activation, Err(TicketingError::ReservationExpired(_))));

    assert_eq!(
        h.services
            .reservations
            .availability(h.product, &direct)
            .await
            .unwrap(),
        5
    );
    let expired = h.services.reservations.find(reservation.id).await.unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
}

/// Test 2: Full hold → activate path
#[tokio::test]
async fn test_hold_then_activate() {
    let h = harness().await;
    let direct = ChannelId::from(DIRECT);
    let reservation = h
        .services
        .reservations
        .create(h.product, &direct, 3, Duration::minutes(15))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(14));
    let order = OrderId::new();
    let activated = h
        .services
        .reservations
        .activate(reservation.id, order)
        .await
        .unwrap();

    assert_eq!(activated.status, ReservationStatus::Activated);
    assert_eq!(activated.order_id, Some(order));
    assert_eq!(TicketStatus::from(activated.status), TicketStatus::Activated);

    // Activated holds are not swept.
    h.clock.advance(Duration::minutes(5));
    assert_eq!(h.services.reservations.expire_due().await.unwrap(), 0);
    assert_eq!(h.allocation(DIRECT).await.reserved, 3);
}

/// Test 3: Concurrent holds never exceed the allocation
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_holds_never_oversell() {
    let h = harness().await;

    let attempts: Vec<_> = (0..20)
        .map(|_| {
            let reservations = h.services.reservations.clone();
            let product = h.product;
            tokio::spawn(async move {
                reservations
                    .create(product, &ChannelId::from(DIRECT), 1, Duration::minutes(10))
                    .await
            })
        })
        .collect();

    let mut held = 0;
    let mut sold_out = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => held += 1,
            Err(TicketingError::SoldOut { .. }) => sold_out += 1,
            Err(_) => {}
        }
    }

    assert_eq!((held, sold_out), (5, 15));
    let allocation = h.allocation(DIRECT).await;
    assert_eq!(allocation.reserved, 5);
    assert!(allocation.is_consistent());
}

/// Test 4: Reservations and batches share the same channel pool
#[tokio::test]
async fn test_holds_and_batches_share_channel_inventory() {
    let h = harness().await;
    let ota = ChannelId::from(OTA);

    h.services
        .reservations
        .create(h.product, &ota, 7, Duration::minutes(10))
        .await
        .unwrap();
    let result = h
        .services
        .batches
        .issue(BatchRequest::new(common::PARTNER, h.product, OTA, 4))
        .await;
    assert!(matches!(
        result,
        Err(TicketingError::SoldOut {
            requested: 4,
            available: 3
        })
    ));

    // Other channels are independent.
    assert_eq!(h.allocation(DIRECT).await.reserved, 0);

    h.clock.advance(Duration::minutes(10));
    assert_eq!(h.services.reservations.expire_due().await.unwrap(), 1);
    h.services
        .batches
        .issue(BatchRequest::new(common::PARTNER, h.product, OTA, 4))
        .await
        .unwrap();
    assert_eq!(h.allocation(OTA).await.reserved, 4);
}

/// Test 5: Holds on an unknown product or channel are rejected
#[tokio::test]
async fn test_hold_on_unknown_channel_is_rejected() {
    let h = harness().await;

    let result = h
        .services
        .reservations
        .create(h.product, &ChannelId::from("kiosk"), 1, Duration::minutes(5))
        .await;
    assert!(matches!(result, Err(TicketingError::UnknownChannel { .. })));

    let result = h
        .services
        .reservations
        .create(
            tessera_ticketing::ProductId::new(),
            &ChannelId::from(DIRECT),
            1,
            Duration::minutes(5),
        )
        .await;
    assert!(matches!(result, Err(TicketingError::ProductNotFound(_))));
}

/// Test 6: A batch holding the whole allocation leaves nothing for storefront holds
#[tokio::test]
async fn test_full_batch_blocks_storefront_hold() {
    let h = harness().await;
    let ota = ChannelId::from(OTA);
    let issued = h
        .services
        .batches
        .issue(BatchRequest::new(common::PARTNER, h.product, OTA, 10))
        .await
        .unwrap();
    assert_eq!(h.allocation(OTA).await.reserved, 10);

    let result = h
        .services
        .reservations
        .create(h.product, &ota, 1, Duration::minutes(10))
        .await;
    assert!(matches!(
        result,
        Err(TicketingError::SoldOut {
            requested: 1,
            available: 0
        })
    ));
    let allocation = h.allocation(OTA).await;
    assert_eq!((allocation.reserved, allocation.sold), (10, 0));

    // Selling a batch ticket moves the unit to sold; the channel stays full.
    h.services
        .activations
        .activate(ActivationRequest {
            ticket_code: issued.tickets[0].code.clone(),
            partner: PartnerId::from(common::PARTNER),
            customer: customer("Margaret"),
            payment_reference: "PAY-1".into(),
            customer_type: CustomerType::Adult,
            visit_date: None,
        })
        .await
        .unwrap();
    let result = h
        .services
        .reservations
        .create(h.product, &ota, 1, Duration::minutes(10))
        .await;
    assert!(matches!(result, Err(TicketingError::SoldOut { available: 0, .. })));
    let allocation = h.allocation(OTA).await;
    assert_eq!((allocation.reserved, allocation.sold), (9, 1));
    assert_eq!(
        h.services.reservations.availability(h.product, &ota).await.unwrap(),
        0
    );
}
