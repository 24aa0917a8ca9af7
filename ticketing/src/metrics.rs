//! Business metrics for the issuance core.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `tessera_reservations_total{status}` - Reservations by outcome (created, sold_out, cancelled, expired, activated)
//! - `tessera_batches_total{status}` - Batch issuance outcomes (issued, duplicate, failed, cancelled)
//! - `tessera_tickets_issued_total` - Tickets created by batches
//! - `tessera_activations_total` - Tickets activated
//! - `tessera_token_verifications_total{outcome}` - Token verifications by outcome
//! - `tessera_pricing_anomalies_total` - Activations priced above twice the base price
//!
//! ## Histograms
//! - `tessera_batch_render_seconds` - Time spent rendering one batch's tokens

use metrics::{describe_counter, describe_histogram};

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "tessera_reservations_total",
        "Total number of reservations by status (created, sold_out, cancelled, expired, activated)"
    );
    describe_counter!(
        "tessera_batches_total",
        "Total number of batch issuance attempts by status (issued, duplicate, failed, cancelled, expired)"
    );
    describe_counter!(
        "tessera_tickets_issued_total",
        "Total number of tickets created by batch issuance"
    );
    describe_counter!(
        "tessera_activations_total",
        "Total number of pre-generated tickets activated"
    );
    describe_counter!(
        "tessera_token_verifications_total",
        "Total number of admission token verifications by outcome"
    );
    describe_counter!(
        "tessera_pricing_anomalies_total",
        "Activations whose price exceeded twice the batch base price"
    );
    describe_histogram!(
        "tessera_batch_render_seconds",
        "Time taken to render every token of one batch"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a reservation outcome (`created`, `sold_out`, `cancelled`, `expired`, `activated`).
pub fn record_reservation(status: &'static str) {
    metrics::counter!("tessera_reservations_total", "status" => status).increment(1);
}

/// Record a batch outcome (`issued`, `duplicate`, `failed`, `cancelled`, `expired`).
pub fn record_batch(status: &'static str) {
    metrics::counter!("tessera_batches_total", "status" => status).increment(1);
}

/// Record a completed batch.
///
/// # Arguments
///
/// * `tickets` - Number of tickets persisted
/// * `render_secs` - Time spent rendering tokens
pub fn record_batch_issued(tickets: u32, render_secs: f64) {
    record_batch("issued");
    metrics::counter!("tessera_tickets_issued_total").increment(u64::from(tickets));
    metrics::histogram!("tessera_batch_render_seconds").record(render_secs);
    tracing::debug!(tickets, render_secs, "Recorded batch_issued metric");
}

/// Record a ticket activation.
pub fn record_activation() {
    metrics::counter!("tessera_activations_total").increment(1);
}

/// Record a token verification outcome (`valid`, `signature_invalid`, `decryption_failed`, `malformed`).
pub fn record_token_verification(outcome: &'static str) {
    metrics::counter!("tessera_token_verifications_total", "outcome" => outcome).increment(1);
}

/// Record a pricing anomaly.
pub fn record_pricing_anomaly() {
    metrics::counter!("tessera_pricing_anomalies_total").increment(1);
}
