//! Admission tests: token reissue, entry checks and redemption.
//!
//! Run with: `cargo test --test admission_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration;
use common::{OTA, customer, harness};
use tessera_ticketing::{
    ActivationRequest, BatchRequest, CustomerType, IssuedBatch, PartnerId, TicketStatus,
    TicketingError, TokenError,
};

async fn issue(h: &common::Harness, quantity: u32) -> IssuedBatch {
    h.services
        .batches
        .issue(BatchRequest::new(common::PARTNER, h.product, OTA, quantity))
        .await
        .unwrap()
}

/// Test 1: Batch tokens verify and name their ticket
#[tokio::test]
async fn test_batch_token_passes_entry_check() {
    let h = harness().await;
    let batch = issue(&h, 1).await;
    let ticket = &batch.tickets[0];

    assert!(!ticket.admission.image_png.is_empty());
    assert_eq!(ticket.audit.issued_token_id, ticket.audit.current_token_id);
    assert_eq!(ticket.admission.expires_at, h.clock_now() + Duration::days(3_650));

    let check = h
        .services
        .admission
        .check_entry(&ticket.admission.wire_value)
        .await
        .unwrap();
    assert_eq!(check.token.payload.ticket_code, ticket.code);
    assert!(!check.token.is_expired);
    assert!(check.token_is_current);
    assert_eq!(check.ticket_status, TicketStatus::PreGenerated);
}

/// Test 2: Reissue supersedes the current token without invalidating the old one
#[tokio::test]
async fn test_reissue_moves_current_token() {
    let h = harness().await;
    let batch = issue(&h, 1).await;
    let original = batch.tickets[0].clone();

    h.clock.advance(Duration::hours(1));
    let reissued = h
        .services
        .admission
        .reissue(&original.code, &h.partner())
        .await
        .unwrap();

    assert_ne!(reissued.audit.current_token_id, original.audit.current_token_id);
    assert_eq!(reissued.audit.issued_token_id, original.audit.issued_token_id);
    assert_ne!(reissued.admission.wire_value, original.admission.wire_value);
    assert_eq!(reissued.audit.token_rendered_at, h.clock_now());

    let old = h
        .services
        .admission
        .check_entry(&original.admission.wire_value)
        .await
        .unwrap();
    assert!(!old.token_is_current);
    let new = h
        .services
        .admission
        .check_entry(&reissued.admission.wire_value)
        .await
        .unwrap();
    assert!(new.token_is_current);
}

/// Test 3: Reissue is scoped to the owning partner and live tickets
#[tokio::test]
async fn test_reissue_requires_owner_and_live_ticket() {
    let h = harness().await;
    let batch = issue(&h, 1).await;
    let code = batch.tickets[0].code.clone();

    let foreign = h
        .services
        .admission
        .reissue(&code, &PartnerId::from("intruder"))
        .await;
    assert!(matches!(foreign, Err(TicketingError::TicketNotFound)));

    h.services
        .batches
        .cancel(&batch.batch.id, &h.partner())
        .await
        .unwrap();
    let cancelled = h.services.admission.reissue(&code, &h.partner()).await;
    assert!(matches!(cancelled, Err(TicketingError::TicketNotFound)));
}

/// Test 4: Token validity and ticket status are reported independently
#[tokio::test]
async fn test_cancelled_ticket_token_still_verifies() {
    let h = harness().await;
    let batch = issue(&h, 1).await;
    h.services
        .batches
        .cancel(&batch.batch.id, &h.partner())
        .await
        .unwrap();

    let check = h
        .services
        .admission
        .check_entry(&batch.tickets[0].admission.wire_value)
        .await
        .unwrap();
    assert!(!check.token.is_expired);
    assert_eq!(check.ticket_status, TicketStatus::Cancelled);
}

/// Test 5: Tampered tokens fail hard
#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let h = harness().await;
    let batch = issue(&h, 1).await;
    let mut wire = batch.tickets[0].admission.wire_value.clone();
    let last = wire.pop().unwrap();
    wire.push(if last == 'A' { 'B' } else { 'A' });

    let result = h.services.admission.check_entry(&wire).await;
    assert!(matches!(
        result,
        Err(TicketingError::Token(TokenError::SignatureInvalid))
    ));
}

/// Test 6: Redemption only follows activation, once
#[tokio::test]
async fn test_redemption_after_activation() {
    let h = harness().await;
    let batch = issue(&h, 1).await;
    let code = batch.tickets[0].code.clone();

    let early = h.services.admission.record_redemption(&code).await;
    assert!(matches!(early, Err(TicketingError::InvalidTransition { .. })));

    h.services
        .activations
        .activate(ActivationRequest {
            ticket_code: code.clone(),
            partner: h.partner(),
            customer: customer("Barbara"),
            payment_reference: "PAY-9".into(),
            customer_type: CustomerType::Adult,
            visit_date: None,
        })
        .await
        .unwrap();

    let redeemed = h.services.admission.record_redemption(&code).await.unwrap();
    assert_eq!(redeemed.status, TicketStatus::Verified);
    assert_eq!(redeemed.verified_at, Some(h.clock_now()));

    let again = h.services.admission.record_redemption(&code).await;
    assert!(matches!(again, Err(TicketingError::InvalidTransition { .. })));
    let reissue = h.services.admission.reissue(&code, &h.partner()).await;
    assert!(matches!(reissue, Err(TicketingError::TicketNotFound)));
}
