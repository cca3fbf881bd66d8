//! Desk assignment rules.
//!
//! Decides whether a desk may call a ticket and which ticket it gets. A desk
//! serving several lanes takes the best head across them: highest tier first,
//! then the earliest issued, then the order the lanes are bound in.

use crate::error::{Conflict, Entity, QueueError};
use crate::ordering::{LaneHead, QueueOrdering};
use crate::types::{Desk, DeskStatus, Lane, LaneId, StaffId, TicketId};
use std::collections::HashMap;

/// A desk may claim only while active, staffed and idle
///
/// # Errors
///
/// [`Conflict::DeskUnavailable`] or [`Conflict::DeskBusy`].
pub const fn ensure_can_claim(desk: &Desk) -> Result<(), Conflict> {
    if !matches!(desk.status, DeskStatus::Active) || desk.assigned_staff.is_none() {
        return Err(Conflict::DeskUnavailable);
    }
    if desk.current_ticket.is_some() {
        return Err(Conflict::DeskBusy);
    }
    Ok(())
}

/// The desk must be bound to the lane it calls from
///
/// # Errors
///
/// [`QueueError::InvalidInput`] when the lane is not one of the desk's lanes.
pub fn ensure_serves_lane(desk: &Desk, lane: &LaneId) -> Result<(), QueueError> {
    if desk.serves(lane) {
        Ok(())
    } else {
        Err(QueueError::InvalidInput(format!(
            "desk {} does not serve lane {lane}",
            desk.id
        )))
    }
}

/// Pick the ticket a desk should call next
///
/// With `lane` set, only that lane is considered. Otherwise every lane bound
/// to the desk competes.
///
/// # Errors
///
/// [`QueueError::InvalidInput`] if `lane` is not bound to the desk.
pub fn next_for_desk(
    desk: &Desk,
    lane: Option<&LaneId>,
    ordering: &QueueOrdering,
) -> Result<Option<TicketId>, QueueError> {
    if let Some(lane) = lane {
        ensure_serves_lane(desk, lane)?;
        return Ok(ordering.peek_next(lane));
    }

    let best = desk
        .lanes
        .iter()
        .filter_map(|lane| ordering.head(lane))
        .reduce(|best, head| if outranks(&head, &best) { head } else { best });

    Ok(best.map(|head| head.ticket_id))
}

fn outranks(candidate: &LaneHead, current: &LaneHead) -> bool {
    let (a, b) = (candidate.tier.rank(), current.tier.rank());
    a > b || (a == b && candidate.created_at < current.created_at)
}

/// A desk holding a ticket must stay active
///
/// # Errors
///
/// [`Conflict::DeskBusy`] when leaving `active` with a current ticket.
pub const fn validate_status_change(desk: &Desk, status: DeskStatus) -> Result<(), Conflict> {
    if desk.current_ticket.is_some() && !matches!(status, DeskStatus::Active) {
        return Err(Conflict::DeskBusy);
    }
    Ok(())
}

/// Staff cannot be swapped out mid-service
///
/// # Errors
///
/// [`Conflict::DeskBusy`] when the desk is serving and the staff changes.
pub fn validate_staff_change(desk: &Desk, staff: Option<&StaffId>) -> Result<(), Conflict> {
    if desk.current_ticket.is_some() && desk.assigned_staff.as_ref() != staff {
        return Err(Conflict::DeskBusy);
    }
    Ok(())
}

/// Lanes bound to a desk must exist in the desk's office
///
/// # Errors
///
/// [`QueueError::InvalidInput`] for an empty list or a lane of another
/// office, [`QueueError::NotFound`] for an unknown lane.
pub fn validate_lane_binding(
    desk: &Desk,
    lanes: &[LaneId],
    known: &HashMap<LaneId, Lane>,
) -> Result<(), QueueError> {
    if lanes.is_empty() {
        return Err(QueueError::InvalidInput(format!(
            "desk {} must serve at least one lane",
            desk.id
        )));
    }
    for lane_id in lanes {
        let lane = known.get(lane_id).ok_or(QueueError::NotFound(Entity::Lane))?;
        if lane.office != desk.office {
            return Err(QueueError::InvalidInput(format!(
                "lane {lane_id} belongs to office {}, not {}",
                lane.office, desk.office
            )));
        }
    }
    Ok(())
}
