//! Business metrics for the walk-in queue.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `walkin_tickets_issued_total{lane,tier}` - Tickets issued
//! - `walkin_tickets_closed_total{status}` - Tickets reaching a terminal status
//! - `walkin_policy_denials_total{reason}` - Issuance refusals
//! - `walkin_claims_total{outcome}` - Desk claims (claimed, empty, already_claimed)
//! - `walkin_tickets_expired_total` - Tickets cancelled by the expiry sweep
//! - `walkin_violations_total{category}` - Violations recorded
//! - `walkin_lockouts_total` - Credentials locked out
//! - `walkin_repairs_total{outcome}` - Dead-lettered snapshots replayed
//! - `walkin_ticket_write_failures_total` / `walkin_violation_write_failures_total`
//!
//! ## Gauges
//! - `walkin_waiting_tickets` - Tickets currently waiting across all lanes

use crate::aggregates::violation::ViolationCategory;
use crate::error::DenialReason;
use crate::types::{LaneId, PriorityTier, TicketStatus};
use metrics::{describe_counter, describe_gauge};

/// Register all metric descriptions.
///
/// Call once at startup, after the recorder is installed.
pub fn register_business_metrics() {
    // Lifecycle
    describe_counter!("walkin_tickets_issued_total", "Tickets issued by lane and tier");
    describe_counter!(
        "walkin_tickets_closed_total",
        "Tickets closed by terminal status (completed, no_show, cancelled)"
    );
    describe_counter!(
        "walkin_tickets_expired_total",
        "Active tickets cancelled because their office-day ended"
    );
    describe_gauge!("walkin_waiting_tickets", "Tickets currently waiting");

    // Admission and claims
    describe_counter!("walkin_policy_denials_total", "Issuance refusals by reason");
    describe_counter!("walkin_claims_total", "Desk claim attempts by outcome");

    // Violations
    describe_counter!("walkin_violations_total", "Violations recorded by category");
    describe_counter!("walkin_lockouts_total", "Credentials locked out after failed logins");

    // Persistence
    describe_counter!(
        "walkin_ticket_write_failures_total",
        "Ticket snapshots that failed to persist"
    );
    describe_counter!(
        "walkin_violation_write_failures_total",
        "Violation or login window writes that failed"
    );
    describe_counter!("walkin_repairs_total", "Dead-lettered snapshots replayed by outcome");

    tracing::info!("Business metrics registered");
}

/// Record an issued ticket.
pub fn record_issued(lane: &LaneId, tier: PriorityTier) {
    metrics::counter!(
        "walkin_tickets_issued_total",
        "lane" => lane.to_string(),
        "tier" => tier.as_str()
    )
    .increment(1);
}

/// Record a ticket reaching a terminal status.
pub fn record_closed(status: TicketStatus) {
    metrics::counter!("walkin_tickets_closed_total", "status" => status.as_str()).increment(1);
}

/// Record tickets cancelled by the expiry sweep.
pub fn record_expired(count: usize) {
    metrics::counter!("walkin_tickets_expired_total").increment(count as u64);
    metrics::counter!("walkin_tickets_closed_total", "status" => TicketStatus::Cancelled.as_str())
        .increment(count as u64);
}

/// Record a refused issuance.
pub fn record_denial(reason: DenialReason) {
    metrics::counter!("walkin_policy_denials_total", "reason" => reason.code()).increment(1);
    tracing::debug!(reason = reason.code(), "Recorded policy denial");
}

/// Record a claim attempt.
pub fn record_claim(outcome: &'static str) {
    metrics::counter!("walkin_claims_total", "outcome" => outcome).increment(1);
}

/// Record a new violation.
pub fn record_violation(category: ViolationCategory) {
    metrics::counter!("walkin_violations_total", "category" => category.as_str()).increment(1);
}

/// Record a credential lockout.
pub fn record_lockout() {
    metrics::counter!("walkin_lockouts_total").increment(1);
}

/// Record one replayed snapshot (`written`, `stale` or `failed`).
pub fn record_repair(outcome: &'static str) {
    metrics::counter!("walkin_repairs_total", "outcome" => outcome).increment(1);
}

/// Set the number of waiting tickets.
#[allow(clippy::cast_precision_loss)] // Queue sizes stay far below 2^52
pub fn set_waiting(count: usize) {
    metrics::gauge!("walkin_waiting_tickets").set(count as f64);
}
