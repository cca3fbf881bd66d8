//! Admission policy gate.
//!
//! Decides whether a customer may receive a new ticket. The gate is a pure
//! function over the office/lane configuration, the customer's profile and
//! their derived [`CustomerQueueState`]; it never mutates anything. The
//! lifecycle reducer calls it inside the same critical section that creates
//! the ticket, so two concurrent requests from one customer cannot both pass.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. office or lane in maintenance → `OfficeUnderMaintenance`
//! 2. waiting or serving ticket → `ActiveTicketExists`
//! 3. completed ticket without evaluation → `EvaluationPending`
//! 4. lane eligibility, or a vip/priority tier without a verified
//!    credential → `IneligibleForLane`
//!
//! The same-day rule is enforced by the expiry sweep, not here.

use crate::error::DenialReason;
use crate::types::{
    CustomerProfile, CustomerQueueState, Lane, LaneKind, Office, PriorityTier, ServiceStatus,
};

/// Everything the gate looks at
#[derive(Clone, Copy, Debug)]
pub struct AdmissionContext<'a> {
    /// Office issuing the ticket
    pub office: &'a Office,
    /// Lane requested
    pub lane: &'a Lane,
    /// Tier requested
    pub tier: PriorityTier,
    /// Customer profile
    pub profile: &'a CustomerProfile,
    /// Derived per-customer queue facts
    pub customer: &'a CustomerQueueState,
}

/// Decide whether a ticket may be issued
///
/// # Errors
///
/// Returns the first [`DenialReason`] that applies.
pub fn check_admission(ctx: &AdmissionContext<'_>) -> Result<(), DenialReason> {
    if ctx.office.status == ServiceStatus::Maintenance
        || ctx.lane.status == ServiceStatus::Maintenance
    {
        return Err(DenialReason::OfficeUnderMaintenance);
    }

    if ctx.customer.active_ticket.is_some() {
        return Err(DenialReason::ActiveTicketExists);
    }

    if ctx.customer.pending_evaluation.is_some() {
        return Err(DenialReason::EvaluationPending);
    }

    if !lane_admits(&ctx.lane.kind, ctx.profile) || !tier_admits(ctx.tier, ctx.profile) {
        return Err(DenialReason::IneligibleForLane);
    }

    Ok(())
}

/// Only a verified credential on file earns service ahead of regular tickets
#[must_use]
pub fn tier_admits(tier: PriorityTier, profile: &CustomerProfile) -> bool {
    tier == PriorityTier::Regular || profile.verified_priority_credential
}

/// Whether a profile satisfies a lane's eligibility rule
///
/// For restricted regular lanes every listed attribute must be present on the
/// profile with one of the accepted values.
#[must_use]
pub fn lane_admits(kind: &LaneKind, profile: &CustomerProfile) -> bool {
    match kind {
        LaneKind::All => true,
        LaneKind::Priority => profile.verified_priority_credential,
        LaneKind::Regular { allow_list } => allow_list.iter().all(|(attribute, accepted)| {
            profile
                .attributes
                .get(attribute)
                .is_some_and(|value| accepted.contains(value))
        }),
    }
}
