//! Ticket lifecycle aggregate.
//!
//! Owns every ticket, the per-lane ordering, the office directory inputs and
//! the per office-day sequence counters. It is the only place a ticket's
//! status changes:
//!
//! ```text
//! waiting ──claim──▶ serving ──complete──▶ completed
//!    │                  ├──no-show───▶ no_show
//!    └──cancel──▶ cancelled ◀──cancel──┘
//! ```
//!
//! All commands run under the store's write lock, which makes the admission
//! check and ticket creation a single critical section, serializes sequence
//! allocation per office-day, and lets exactly one of several concurrent claims
//! on a ticket succeed.
//!
//! Each transition returns two effects chained in order: persist the full
//! snapshot, then publish a [`TicketEvent`]. A failed write lands the snapshot
//! in the dead letter queue for the repair pass; it is never retried inline.

use crate::error::{Conflict, Entity, QueueError};
use crate::events::TicketEventSink;
use crate::ordering::QueueOrdering;
use crate::policy::{check_admission, AdmissionContext};
use crate::repository::{DailySequence, TicketRepository, WriteOutcome};
use crate::scheduler;
use crate::types::{
    CancelReason, Claim, CustomerId, CustomerQueueState, Desk, DeskId, DeskStatus, Evaluation,
    IssueRequest, Lane, LaneId, LaneSnapshot, Office, OfficeId, ServiceStatus, StaffId, Ticket,
    TicketEvent, TicketId, TicketNumber, TicketStatus, WaitingEntry,
};
use chrono::{DateTime, Days, NaiveDate, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use walkin_core::{effect::Effect, environment::Clock, reducer::Reducer, smallvec, SmallVec};
use walkin_macros::Action;
use walkin_runtime::DeadLetterQueue;

// ============================================================================
// State
// ============================================================================

/// In-memory working set of the queue
#[derive(Clone, Debug, Default)]
pub struct QueueState {
    /// Offices by code
    pub offices: HashMap<OfficeId, Office>,
    /// Lanes by code
    pub lanes: HashMap<LaneId, Lane>,
    /// Desks by code
    pub desks: HashMap<DeskId, Desk>,
    /// Resident tickets: everything active, recent or owing an evaluation
    pub tickets: HashMap<TicketId, Ticket>,
    /// Waiting tickets in serving order
    pub ordering: QueueOrdering,
    /// Last sequence handed out per office-day
    pub sequences: HashMap<(OfficeId, NaiveDate), u32>,
    /// Resident tickets per customer
    by_customer: HashMap<CustomerId, BTreeSet<TicketId>>,
    /// Tickets touched by the last command
    pub last_batch: Vec<TicketId>,
    /// Error from the last command
    pub last_error: Option<QueueError>,
}

impl QueueState {
    /// Create an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a resident ticket
    #[must_use]
    pub fn ticket(&self, ticket_id: &TicketId) -> Option<&Ticket> {
        self.tickets.get(ticket_id)
    }

    /// Queue facts of a customer, derived from their resident tickets
    #[must_use]
    pub fn customer_state(&self, customer: &CustomerId) -> CustomerQueueState {
        CustomerQueueState::derive(
            self.by_customer
                .get(customer)
                .into_iter()
                .flatten()
                .filter_map(|id| self.tickets.get(id)),
        )
    }

    /// 1-based queue position of a waiting ticket
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] for an unknown ticket, [`Conflict::NotWaiting`]
    /// once it has left the queue.
    pub fn position(&self, ticket_id: &TicketId) -> Result<usize, QueueError> {
        let ticket = self
            .tickets
            .get(ticket_id)
            .ok_or(QueueError::NotFound(Entity::Ticket))?;
        if ticket.status != TicketStatus::Waiting {
            return Err(Conflict::NotWaiting.into());
        }
        self.ordering
            .position(ticket_id)
            .ok_or(QueueError::NotFound(Entity::Ticket))
    }

    /// Waiting tickets of a lane in serving order
    #[must_use]
    pub fn lane_snapshot(&self, lane_id: &LaneId) -> Option<LaneSnapshot> {
        let lane = self.lanes.get(lane_id)?;
        let waiting = self
            .ordering
            .waiting(lane_id)
            .into_iter()
            .filter_map(|id| self.tickets.get(&id))
            .enumerate()
            .map(|(index, ticket)| WaitingEntry {
                position: index + 1,
                ticket_id: ticket.id,
                number: ticket.number.to_string(),
                tier: ticket.tier,
                created_at: ticket.created_at,
            })
            .collect();

        Some(LaneSnapshot {
            lane: lane_id.clone(),
            status: lane.status,
            waiting,
        })
    }

    /// Outcome of the last command: the first ticket it touched, or its error
    ///
    /// # Errors
    ///
    /// The error the last command was rejected with.
    pub fn last_outcome(&self) -> Result<Option<Ticket>, QueueError> {
        if let Some(error) = &self.last_error {
            return Err(error.clone());
        }
        Ok(self
            .last_batch
            .first()
            .and_then(|id| self.tickets.get(id))
            .cloned())
    }

    /// Tickets touched by the last command that are still resident
    #[must_use]
    pub fn last_tickets(&self) -> Vec<Ticket> {
        self.last_batch
            .iter()
            .filter_map(|id| self.tickets.get(id))
            .cloned()
            .collect()
    }

    fn index_ticket(&mut self, ticket: &Ticket) {
        self.by_customer
            .entry(ticket.customer_id.clone())
            .or_default()
            .insert(ticket.id);
    }

    fn evict_ticket(&mut self, ticket_id: &TicketId) {
        if let Some(ticket) = self.tickets.remove(ticket_id) {
            if let Some(ids) = self.by_customer.get_mut(&ticket.customer_id) {
                ids.remove(ticket_id);
                if ids.is_empty() {
                    self.by_customer.remove(&ticket.customer_id);
                }
            }
        }
        self.ordering.remove(ticket_id);
    }

    fn release_desk(&mut self, ticket_id: &TicketId, desk_id: Option<&DeskId>) {
        if let Some(desk) = desk_id.and_then(|id| self.desks.get_mut(id)) {
            if desk.current_ticket.as_ref() == Some(ticket_id) {
                desk.current_ticket = None;
            }
        }
    }

    fn close(&mut self, ticket_id: &TicketId, status: TicketStatus, at: DateTime<Utc>) {
        let Some(ticket) = self.tickets.get_mut(ticket_id) else {
            return;
        };
        let previous = ticket.status;
        ticket.status = status;
        ticket.closed_at = Some(at);
        ticket.version += 1;
        let desk_id = ticket.claim.as_ref().map(|c| c.desk_id.clone());

        match previous {
            TicketStatus::Waiting => {
                self.ordering.remove(ticket_id);
            },
            TicketStatus::Serving => self.release_desk(ticket_id, desk_id.as_ref()),
            _ => {},
        }
    }
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the ticket lifecycle
#[derive(Action, Clone, Debug)]
pub enum QueueAction {
    // Commands
    /// Create or replace an office and its lanes
    #[command]
    ConfigureOffice {
        /// Office
        office: Office,
        /// Lanes of the office
        lanes: Vec<Lane>,
    },

    /// Open or close an office for issuance
    #[command]
    SetOfficeStatus {
        /// Office
        office_id: OfficeId,
        /// New status
        status: ServiceStatus,
    },

    /// Open or close a lane for issuance
    #[command]
    SetLaneStatus {
        /// Lane
        lane_id: LaneId,
        /// New status
        status: ServiceStatus,
    },

    /// Create or replace an idle desk
    #[command]
    RegisterDesk {
        /// Desk
        desk: Desk,
    },

    /// Put a staff member at a desk, or clear it
    #[command]
    AssignStaff {
        /// Desk
        desk_id: DeskId,
        /// Staff member
        staff: Option<StaffId>,
    },

    /// Change desk availability
    #[command]
    SetDeskStatus {
        /// Desk
        desk_id: DeskId,
        /// New status
        status: DeskStatus,
    },

    /// Change the lanes a desk calls from
    #[command]
    BindDeskLanes {
        /// Desk
        desk_id: DeskId,
        /// Lanes, in tie-break order
        lanes: Vec<LaneId>,
    },

    /// Issue a ticket if the admission policy allows it
    #[command]
    IssueTicket {
        /// ID for the new ticket
        ticket_id: TicketId,
        /// What the customer asked for
        request: IssueRequest,
    },

    /// Call a specific waiting ticket to a desk
    #[command]
    ClaimTicket {
        /// Ticket
        ticket_id: TicketId,
        /// Desk
        desk_id: DeskId,
    },

    /// Call the next ticket for a desk
    #[command]
    ClaimNext {
        /// Desk
        desk_id: DeskId,
        /// Restrict to one of the desk's lanes
        lane: Option<LaneId>,
    },

    /// Finish serving a ticket
    #[command]
    CompleteTicket {
        /// Ticket
        ticket_id: TicketId,
    },

    /// Close a called ticket whose customer never showed up
    #[command]
    NoShowTicket {
        /// Ticket
        ticket_id: TicketId,
    },

    /// Cancel an active ticket
    #[command]
    CancelTicket {
        /// Ticket
        ticket_id: TicketId,
        /// Why; must not be empty
        reason: String,
    },

    /// Record the customer's post-service evaluation
    #[command]
    SubmitEvaluation {
        /// Ticket
        ticket_id: TicketId,
        /// 1 to 5
        rating: u8,
        /// Optional comment
        comment: Option<String>,
    },

    /// Cancel active tickets whose office-day has ended
    #[command]
    ExpireStale,

    /// Move closed tickets of earlier days out of memory
    #[command]
    ArchiveBefore {
        /// Tickets from office-days before this one are archived
        before: NaiveDate,
    },

    /// Archive closed tickets whose office-day is at least `days` days
    /// behind their office's current local day
    #[command]
    ArchiveOlderThan {
        /// Retention in office-days
        days: u32,
    },

    /// Load tickets and counters from storage
    Hydrate {
        /// Stored tickets
        tickets: Vec<Ticket>,
        /// Stored office-day sequences
        sequences: Vec<DailySequence>,
    },

    // Events
    /// An office and its lanes were configured
    #[event]
    OfficeConfigured {
        /// Office
        office: Office,
        /// Lanes
        lanes: Vec<Lane>,
    },

    /// Office status changed
    #[event]
    OfficeStatusChanged {
        /// Office
        office_id: OfficeId,
        /// New status
        status: ServiceStatus,
    },

    /// Lane status changed
    #[event]
    LaneStatusChanged {
        /// Lane
        lane_id: LaneId,
        /// New status
        status: ServiceStatus,
    },

    /// A desk was registered
    #[event]
    DeskRegistered {
        /// Desk
        desk: Desk,
    },

    /// Desk staffing changed
    #[event]
    StaffAssigned {
        /// Desk
        desk_id: DeskId,
        /// Staff member
        staff: Option<StaffId>,
    },

    /// Desk availability changed
    #[event]
    DeskStatusChanged {
        /// Desk
        desk_id: DeskId,
        /// New status
        status: DeskStatus,
    },

    /// Desk lanes changed
    #[event]
    DeskLanesBound {
        /// Desk
        desk_id: DeskId,
        /// Lanes
        lanes: Vec<LaneId>,
    },

    /// A ticket was issued
    #[event]
    TicketIssued {
        /// The new ticket
        ticket: Ticket,
    },

    /// A desk called a ticket
    #[event]
    TicketClaimed {
        /// Ticket
        ticket_id: TicketId,
        /// Desk
        desk_id: DeskId,
        /// When
        at: DateTime<Utc>,
    },

    /// Service finished
    #[event]
    TicketCompleted {
        /// Ticket
        ticket_id: TicketId,
        /// When
        at: DateTime<Utc>,
    },

    /// Customer did not show up
    #[event]
    TicketMarkedNoShow {
        /// Ticket
        ticket_id: TicketId,
        /// When
        at: DateTime<Utc>,
    },

    /// Ticket cancelled
    #[event]
    TicketCancelled {
        /// Ticket
        ticket_id: TicketId,
        /// Why
        reason: CancelReason,
        /// When
        at: DateTime<Utc>,
    },

    /// Evaluation recorded
    #[event]
    EvaluationSubmitted {
        /// Ticket
        ticket_id: TicketId,
        /// Evaluation
        evaluation: Evaluation,
    },

    /// Tickets left the hot set
    #[event]
    TicketsArchived {
        /// Final snapshots, with `archived_at` set
        tickets: Vec<Ticket>,
    },

    /// A command was refused
    #[event]
    CommandRejected {
        /// Why
        error: QueueError,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the ticket lifecycle
#[derive(Clone)]
pub struct QueueEnvironment {
    /// Clock for timestamps and office-days
    pub clock: Arc<dyn Clock>,
    /// Ticket storage
    pub repository: Arc<dyn TicketRepository>,
    /// Transition subscribers
    pub events: Arc<dyn TicketEventSink>,
    /// Snapshots whose write failed, awaiting repair
    pub dead_letters: DeadLetterQueue<Ticket>,
}

impl QueueEnvironment {
    /// Creates a new `QueueEnvironment` with a default-sized dead letter queue
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        repository: Arc<dyn TicketRepository>,
        events: Arc<dyn TicketEventSink>,
    ) -> Self {
        Self {
            clock,
            repository,
            events,
            dead_letters: DeadLetterQueue::default(),
        }
    }

    /// Use a specific dead letter queue
    #[must_use]
    pub fn with_dead_letters(mut self, dead_letters: DeadLetterQueue<Ticket>) -> Self {
        self.dead_letters = dead_letters;
        self
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the ticket lifecycle
#[derive(Clone, Debug, Default)]
pub struct QueueReducer;

type Effects = SmallVec<[Effect<QueueAction>; 4]>;

impl QueueReducer {
    /// Creates a new `QueueReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    // ========== Validation ==========

    fn validate_office(office: &Office, lanes: &[Lane], state: &QueueState) -> Result<(), QueueError> {
        if office.id.is_blank() {
            return Err(QueueError::InvalidInput("office id must not be empty".to_string()));
        }
        for lane in lanes {
            if lane.office != office.id {
                return Err(QueueError::InvalidInput(format!(
                    "lane {} belongs to office {}",
                    lane.id, lane.office
                )));
            }
            if state
                .lanes
                .get(&lane.id)
                .is_some_and(|existing| existing.office != office.id)
            {
                return Err(QueueError::InvalidInput(format!(
                    "lane {} already exists in another office",
                    lane.id
                )));
            }
        }
        Ok(())
    }

    fn validate_register_desk(desk: &Desk, state: &QueueState) -> Result<(), QueueError> {
        if !state.offices.contains_key(&desk.office) {
            return Err(QueueError::NotFound(Entity::Office));
        }
        if desk.current_ticket.is_some() {
            return Err(QueueError::InvalidInput(
                "a desk is registered without a ticket".to_string(),
            ));
        }
        if state
            .desks
            .get(&desk.id)
            .is_some_and(|existing| existing.current_ticket.is_some())
        {
            return Err(Conflict::DeskBusy.into());
        }
        scheduler::validate_lane_binding(desk, &desk.lanes, &state.lanes)
    }

    fn desk<'a>(state: &'a QueueState, desk_id: &DeskId) -> Result<&'a Desk, QueueError> {
        state
            .desks
            .get(desk_id)
            .ok_or(QueueError::NotFound(Entity::Desk))
    }

    fn ticket<'a>(state: &'a QueueState, ticket_id: &TicketId) -> Result<&'a Ticket, QueueError> {
        state
            .tickets
            .get(ticket_id)
            .ok_or(QueueError::NotFound(Entity::Ticket))
    }

    /// Build the ticket an issuance would create
    fn validate_issue(
        state: &QueueState,
        ticket_id: TicketId,
        request: IssueRequest,
        now: DateTime<Utc>,
    ) -> Result<Ticket, QueueError> {
        if request.customer_id.is_blank() {
            return Err(QueueError::InvalidInput("customer id must not be empty".to_string()));
        }
        if request.service.is_blank() {
            return Err(QueueError::InvalidInput("service must not be empty".to_string()));
        }
        if state.tickets.contains_key(&ticket_id) {
            return Err(QueueError::InvalidInput(format!("ticket {ticket_id} already exists")));
        }
        let office = state
            .offices
            .get(&request.office)
            .ok_or(QueueError::NotFound(Entity::Office))?;
        let lane = state
            .lanes
            .get(&request.lane)
            .ok_or(QueueError::NotFound(Entity::Lane))?;
        if lane.office != office.id {
            return Err(QueueError::InvalidInput(format!(
                "lane {} is not part of office {}",
                lane.id, office.id
            )));
        }

        let customer = state.customer_state(&request.customer_id);
        check_admission(&AdmissionContext {
            office,
            lane,
            tier: request.tier,
            profile: &request.profile,
            customer: &customer,
        })
        .map_err(QueueError::denied)?;

        let office_day = office.local_day(now);
        let sequence = state
            .sequences
            .get(&(office.id.clone(), office_day))
            .copied()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| QueueError::InvalidInput("daily sequence exhausted".to_string()))?;

        Ok(Ticket {
            id: ticket_id,
            number: TicketNumber {
                prefix: lane.prefix.clone(),
                sequence,
            },
            office: office.id.clone(),
            office_day,
            service: request.service,
            lane: lane.id.clone(),
            tier: request.tier,
            customer_id: request.customer_id,
            customer_type: request.customer_type,
            status: TicketStatus::Waiting,
            created_at: now,
            claim: None,
            completed_at: None,
            closed_at: None,
            cancel_reason: None,
            evaluation: None,
            archived_at: None,
            version: 1,
        })
    }

    fn validate_claim(state: &QueueState, ticket_id: &TicketId, desk_id: &DeskId) -> Result<(), QueueError> {
        let ticket = Self::ticket(state, ticket_id)?;
        match ticket.status {
            TicketStatus::Waiting => {},
            TicketStatus::Serving => return Err(Conflict::AlreadyClaimed.into()),
            _ => return Err(Conflict::NotWaiting.into()),
        }
        let desk = Self::desk(state, desk_id)?;
        scheduler::ensure_serves_lane(desk, &ticket.lane)?;
        scheduler::ensure_can_claim(desk)?;
        Ok(())
    }

    fn validate_serving(state: &QueueState, ticket_id: &TicketId) -> Result<(), QueueError> {
        if Self::ticket(state, ticket_id)?.status == TicketStatus::Serving {
            Ok(())
        } else {
            Err(Conflict::NotServing.into())
        }
    }

    fn validate_cancel(state: &QueueState, ticket_id: &TicketId, reason: &str) -> Result<(), QueueError> {
        if reason.trim().is_empty() {
            return Err(QueueError::InvalidInput(
                "a cancellation reason is required".to_string(),
            ));
        }
        if Self::ticket(state, ticket_id)?.is_active() {
            Ok(())
        } else {
            Err(Conflict::NotCancellable.into())
        }
    }

    fn validate_evaluation(state: &QueueState, ticket_id: &TicketId, rating: u8) -> Result<(), QueueError> {
        if !(Evaluation::MIN_RATING..=Evaluation::MAX_RATING).contains(&rating) {
            return Err(QueueError::InvalidInput(format!(
                "rating must be between {} and {}",
                Evaluation::MIN_RATING,
                Evaluation::MAX_RATING
            )));
        }
        let ticket = Self::ticket(state, ticket_id)?;
        if ticket.status != TicketStatus::Completed {
            return Err(Conflict::NotCompleted.into());
        }
        if ticket.evaluation.is_some() {
            return Err(Conflict::EvaluationAlreadySubmitted.into());
        }
        Ok(())
    }

    /// Active tickets whose office-day is over at `now`, oldest first
    fn stale_tickets(state: &QueueState, now: DateTime<Utc>) -> Vec<TicketId> {
        let mut stale: Vec<&Ticket> = state
            .tickets
            .values()
            .filter(|t| t.is_active())
            .filter(|t| {
                let today = state
                    .offices
                    .get(&t.office)
                    .map_or_else(|| now.date_naive(), |office| office.local_day(now));
                today > t.office_day
            })
            .collect();
        stale.sort_by_key(|t| (t.created_at, t.id));
        stale.into_iter().map(|t| t.id).collect()
    }

    /// Closed, evaluated tickets whose office-day falls before `cutoff(ticket)`
    fn archivable(
        state: &QueueState,
        now: DateTime<Utc>,
        cutoff: impl Fn(&Ticket) -> NaiveDate,
    ) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| {
                t.status.is_terminal()
                    && t.office_day < cutoff(t)
                    && !t.owes_evaluation()
                    && t.archived_at.is_none()
            })
            .cloned()
            .collect();
        tickets.sort_by_key(|t| (t.created_at, t.id));
        for ticket in &mut tickets {
            ticket.archived_at = Some(now);
            ticket.version += 1;
        }
        tickets
    }

    fn archive(state: &mut QueueState, tickets: Vec<Ticket>, env: &QueueEnvironment) -> Effects {
        if tickets.is_empty() {
            return SmallVec::new();
        }
        tracing::info!(count = tickets.len(), "Archived closed tickets");
        state.last_batch = tickets.iter().map(|t| t.id).collect();

        let writes = tickets
            .iter()
            .map(|ticket| Self::persist_effect(env, ticket.clone(), false))
            .collect();
        Self::apply_event(state, &QueueAction::TicketsArchived { tickets });
        smallvec![Effect::merge(writes)]
    }

    // ========== State changes ==========

    /// Applies an event to state
    fn apply_event(state: &mut QueueState, action: &QueueAction) {
        match action {
            QueueAction::OfficeConfigured { office, lanes } => {
                state.offices.insert(office.id.clone(), office.clone());
                for lane in lanes {
                    state.lanes.insert(lane.id.clone(), lane.clone());
                }
            },
            QueueAction::OfficeStatusChanged { office_id, status } => {
                if let Some(office) = state.offices.get_mut(office_id) {
                    office.status = *status;
                }
            },
            QueueAction::LaneStatusChanged { lane_id, status } => {
                if let Some(lane) = state.lanes.get_mut(lane_id) {
                    lane.status = *status;
                }
            },
            QueueAction::DeskRegistered { desk } => {
                state.desks.insert(desk.id.clone(), desk.clone());
            },
            QueueAction::StaffAssigned { desk_id, staff } => {
                if let Some(desk) = state.desks.get_mut(desk_id) {
                    desk.assigned_staff.clone_from(staff);
                }
            },
            QueueAction::DeskStatusChanged { desk_id, status } => {
                if let Some(desk) = state.desks.get_mut(desk_id) {
                    desk.status = *status;
                }
            },
            QueueAction::DeskLanesBound { desk_id, lanes } => {
                if let Some(desk) = state.desks.get_mut(desk_id) {
                    desk.lanes.clone_from(lanes);
                }
            },
            QueueAction::TicketIssued { ticket } => {
                let key = (ticket.office.clone(), ticket.office_day);
                let last = state.sequences.entry(key).or_insert(0);
                *last = (*last).max(ticket.number.sequence);
                state.ordering.enqueue(ticket);
                state.index_ticket(ticket);
                state.tickets.insert(ticket.id, ticket.clone());
                state.last_batch.push(ticket.id);
            },
            QueueAction::TicketClaimed {
                ticket_id,
                desk_id,
                at,
            } => {
                if let Some(ticket) = state.tickets.get_mut(ticket_id) {
                    ticket.status = TicketStatus::Serving;
                    ticket.claim = Some(Claim {
                        desk_id: desk_id.clone(),
                        at: *at,
                    });
                    ticket.version += 1;
                }
                state.ordering.remove(ticket_id);
                if let Some(desk) = state.desks.get_mut(desk_id) {
                    desk.current_ticket = Some(*ticket_id);
                }
                state.last_batch.push(*ticket_id);
            },
            QueueAction::TicketCompleted { ticket_id, at } => {
                state.close(ticket_id, TicketStatus::Completed, *at);
                if let Some(ticket) = state.tickets.get_mut(ticket_id) {
                    ticket.completed_at = Some(*at);
                }
                state.last_batch.push(*ticket_id);
            },
            QueueAction::TicketMarkedNoShow { ticket_id, at } => {
                state.close(ticket_id, TicketStatus::NoShow, *at);
                state.last_batch.push(*ticket_id);
            },
            QueueAction::TicketCancelled {
                ticket_id,
                reason,
                at,
            } => {
                state.close(ticket_id, TicketStatus::Cancelled, *at);
                if let Some(ticket) = state.tickets.get_mut(ticket_id) {
                    ticket.cancel_reason = Some(reason.clone());
                }
                state.last_batch.push(*ticket_id);
            },
            QueueAction::EvaluationSubmitted {
                ticket_id,
                evaluation,
            } => {
                if let Some(ticket) = state.tickets.get_mut(ticket_id) {
                    ticket.evaluation = Some(evaluation.clone());
                    ticket.version += 1;
                }
                state.last_batch.push(*ticket_id);
            },
            QueueAction::TicketsArchived { tickets } => {
                for ticket in tickets {
                    state.evict_ticket(&ticket.id);
                }
            },
            QueueAction::CommandRejected { error } => {
                state.last_error = Some(error.clone());
            },
            QueueAction::ConfigureOffice { .. }
            | QueueAction::SetOfficeStatus { .. }
            | QueueAction::SetLaneStatus { .. }
            | QueueAction::RegisterDesk { .. }
            | QueueAction::AssignStaff { .. }
            | QueueAction::SetDeskStatus { .. }
            | QueueAction::BindDeskLanes { .. }
            | QueueAction::IssueTicket { .. }
            | QueueAction::ClaimTicket { .. }
            | QueueAction::ClaimNext { .. }
            | QueueAction::CompleteTicket { .. }
            | QueueAction::NoShowTicket { .. }
            | QueueAction::CancelTicket { .. }
            | QueueAction::SubmitEvaluation { .. }
            | QueueAction::ExpireStale
            | QueueAction::ArchiveBefore { .. }
            | QueueAction::ArchiveOlderThan { .. }
            | QueueAction::Hydrate { .. } => {},
        }
    }

    fn hydrate(state: &mut QueueState, tickets: Vec<Ticket>, sequences: Vec<DailySequence>) {
        for ticket in tickets {
            if ticket.archived_at.is_some() {
                continue;
            }
            let newer = state
                .tickets
                .get(&ticket.id)
                .is_none_or(|resident| resident.version < ticket.version);
            if newer {
                state.tickets.insert(ticket.id, ticket);
            }
        }

        for sequence in sequences {
            let last = state
                .sequences
                .entry((sequence.office, sequence.day))
                .or_insert(0);
            *last = (*last).max(sequence.last);
        }
        for ticket in state.tickets.values() {
            let last = state
                .sequences
                .entry((ticket.office.clone(), ticket.office_day))
                .or_insert(0);
            *last = (*last).max(ticket.number.sequence);
        }

        let mut resident: Vec<Ticket> = state.tickets.values().cloned().collect();
        resident.sort_by_key(|t| (t.created_at, t.id));

        state.ordering = QueueOrdering::new();
        state.by_customer.clear();
        for desk in state.desks.values_mut() {
            desk.current_ticket = None;
        }
        for ticket in &resident {
            state.index_ticket(ticket);
            match ticket.status {
                TicketStatus::Waiting => {
                    state.ordering.enqueue(ticket);
                },
                TicketStatus::Serving => {
                    let desk = ticket.desk_id().and_then(|id| state.desks.get_mut(id));
                    if let Some(desk) = desk {
                        desk.current_ticket = Some(ticket.id);
                    } else {
                        tracing::warn!(ticket_id = %ticket.id, "Serving ticket has no registered desk");
                    }
                },
                _ => {},
            }
        }

        tracing::info!(
            tickets = state.tickets.len(),
            waiting = state.ordering.total_waiting(),
            "Queue state hydrated"
        );
    }

    // ========== Effects ==========

    /// Persist-then-publish effect for a ticket that just transitioned
    fn transition_effect(
        env: &QueueEnvironment,
        ticket: &Ticket,
        from: Option<TicketStatus>,
        at: DateTime<Utc>,
    ) -> Effect<QueueAction> {
        let event = TicketEvent::transition(ticket, from, at);
        let sink = Arc::clone(&env.events);
        Effect::chain(vec![
            Self::persist_effect(env, ticket.clone(), from.is_none()),
            Effect::future(async move {
                sink.publish(event).await;
                None
            }),
        ])
    }

    fn persist_effect(env: &QueueEnvironment, ticket: Ticket, advance_sequence: bool) -> Effect<QueueAction> {
        let repository = Arc::clone(&env.repository);
        let dead_letters = env.dead_letters.clone();
        Effect::future(async move {
            match write_snapshot(repository.as_ref(), &ticket, advance_sequence).await {
                Ok(WriteOutcome::Written) => {},
                Ok(WriteOutcome::Stale) => {
                    tracing::debug!(ticket_id = %ticket.id, version = ticket.version, "Skipped stale ticket snapshot");
                },
                Err(error) => {
                    metrics::counter!("walkin_ticket_write_failures_total").increment(1);
                    tracing::error!(
                        ticket_id = %ticket.id,
                        version = ticket.version,
                        error = %error,
                        "Failed to persist ticket; queued for repair"
                    );
                    dead_letters.push(ticket, error.to_string(), 0);
                },
            }
            None
        })
    }

    fn reject(state: &mut QueueState, command: &'static str, error: QueueError) -> Effects {
        if let QueueError::PolicyDenied { reason } = &error {
            crate::metrics::record_denial(*reason);
        }
        if let QueueError::Conflict(Conflict::AlreadyClaimed) = &error {
            crate::metrics::record_claim("already_claimed");
        }
        tracing::warn!(command, error = %error, "Command rejected");
        Self::apply_event(state, &QueueAction::CommandRejected { error });
        SmallVec::new()
    }

    /// Apply a directory event; directory changes are not persisted here
    fn directory(state: &mut QueueState, event: &QueueAction) -> Effects {
        tracing::debug!(event = event.name(), "Directory updated");
        Self::apply_event(state, event);
        SmallVec::new()
    }

    /// Apply a ticket event and emit its transition effect
    fn transition(
        state: &mut QueueState,
        event: &QueueAction,
        ticket_id: &TicketId,
        env: &QueueEnvironment,
        at: DateTime<Utc>,
    ) -> Effects {
        let from = state.tickets.get(ticket_id).map(|t| t.status);
        Self::apply_event(state, event);
        crate::metrics::set_waiting(state.ordering.total_waiting());

        match state.tickets.get(ticket_id) {
            Some(ticket) => {
                tracing::debug!(
                    ticket_id = %ticket.id,
                    number = %ticket.number,
                    status = %ticket.status,
                    event = event.name(),
                    "Ticket transitioned"
                );
                smallvec![Self::transition_effect(env, ticket, from, at)]
            },
            None => SmallVec::new(),
        }
    }
}

/// Write a snapshot, advancing its office-day sequence first when asked
async fn write_snapshot(
    repository: &dyn TicketRepository,
    ticket: &Ticket,
    advance_sequence: bool,
) -> Result<WriteOutcome, crate::error::StorageError> {
    if advance_sequence {
        repository
            .advance_sequence(ticket.office.clone(), ticket.office_day, ticket.number.sequence)
            .await?;
    }
    repository.upsert_ticket(ticket.clone()).await
}

/// Re-write a snapshot during repair
pub(crate) async fn repair_snapshot(
    repository: &dyn TicketRepository,
    ticket: &Ticket,
) -> Result<WriteOutcome, crate::error::StorageError> {
    write_snapshot(repository, ticket, true).await
}

impl Reducer for QueueReducer {
    type State = QueueState;
    type Action = QueueAction;
    type Environment = QueueEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per command
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        tracing::trace!(action = action.name(), kind = action.kind(), "Reducing queue action");
        if action.is_command() {
            state.last_error = None;
            state.last_batch.clear();
        }
        let now = env.clock.now();

        match action {
            // ========== Directory ==========
            QueueAction::ConfigureOffice { office, lanes } => {
                if let Err(error) = Self::validate_office(&office, &lanes, state) {
                    return Self::reject(state, "configure_office", error);
                }
                Self::directory(state, &QueueAction::OfficeConfigured { office, lanes })
            },

            QueueAction::SetOfficeStatus { office_id, status } => {
                if !state.offices.contains_key(&office_id) {
                    return Self::reject(state, "set_office_status", QueueError::NotFound(Entity::Office));
                }
                Self::directory(state, &QueueAction::OfficeStatusChanged { office_id, status })
            },

            QueueAction::SetLaneStatus { lane_id, status } => {
                if !state.lanes.contains_key(&lane_id) {
                    return Self::reject(state, "set_lane_status", QueueError::NotFound(Entity::Lane));
                }
                Self::directory(state, &QueueAction::LaneStatusChanged { lane_id, status })
            },

            QueueAction::RegisterDesk { desk } => {
                if let Err(error) = Self::validate_register_desk(&desk, state) {
                    return Self::reject(state, "register_desk", error);
                }
                Self::directory(state, &QueueAction::DeskRegistered { desk })
            },

            QueueAction::AssignStaff { desk_id, staff } => {
                let checked = Self::desk(state, &desk_id).and_then(|desk| {
                    scheduler::validate_staff_change(desk, staff.as_ref()).map_err(QueueError::from)
                });
                if let Err(error) = checked {
                    return Self::reject(state, "assign_staff", error);
                }
                Self::directory(state, &QueueAction::StaffAssigned { desk_id, staff })
            },

            QueueAction::SetDeskStatus { desk_id, status } => {
                let checked = Self::desk(state, &desk_id).and_then(|desk| {
                    scheduler::validate_status_change(desk, status).map_err(QueueError::from)
                });
                if let Err(error) = checked {
                    return Self::reject(state, "set_desk_status", error);
                }
                Self::directory(state, &QueueAction::DeskStatusChanged { desk_id, status })
            },

            QueueAction::BindDeskLanes { desk_id, lanes } => {
                let checked = Self::desk(state, &desk_id)
                    .and_then(|desk| scheduler::validate_lane_binding(desk, &lanes, &state.lanes));
                if let Err(error) = checked {
                    return Self::reject(state, "bind_desk_lanes", error);
                }
                Self::directory(state, &QueueAction::DeskLanesBound { desk_id, lanes })
            },

            // ========== Lifecycle ==========
            QueueAction::IssueTicket { ticket_id, request } => {
                let ticket = match Self::validate_issue(state, ticket_id, request, now) {
                    Ok(ticket) => ticket,
                    Err(error) => return Self::reject(state, "issue_ticket", error),
                };
                crate::metrics::record_issued(&ticket.lane, ticket.tier);
                tracing::info!(
                    ticket_id = %ticket.id,
                    number = %ticket.number,
                    office = %ticket.office,
                    lane = %ticket.lane,
                    tier = %ticket.tier,
                    "Ticket issued"
                );
                Self::transition(state, &QueueAction::TicketIssued { ticket }, &ticket_id, env, now)
            },

            QueueAction::ClaimTicket { ticket_id, desk_id } => {
                if let Err(error) = Self::validate_claim(state, &ticket_id, &desk_id) {
                    return Self::reject(state, "claim_ticket", error);
                }
                crate::metrics::record_claim("claimed");
                let event = QueueAction::TicketClaimed {
                    ticket_id,
                    desk_id,
                    at: now,
                };
                Self::transition(state, &event, &ticket_id, env, now)
            },

            QueueAction::ClaimNext { desk_id, lane } => {
                let next = Self::desk(state, &desk_id).and_then(|desk| {
                    scheduler::ensure_can_claim(desk)?;
                    scheduler::next_for_desk(desk, lane.as_ref(), &state.ordering)
                });
                match next {
                    Err(error) => Self::reject(state, "claim_next", error),
                    Ok(None) => {
                        crate::metrics::record_claim("empty");
                        tracing::debug!(desk_id = %desk_id, "No ticket waiting for desk");
                        SmallVec::new()
                    },
                    Ok(Some(ticket_id)) => {
                        crate::metrics::record_claim("claimed");
                        let event = QueueAction::TicketClaimed {
                            ticket_id,
                            desk_id,
                            at: now,
                        };
                        Self::transition(state, &event, &ticket_id, env, now)
                    },
                }
            },

            QueueAction::CompleteTicket { ticket_id } => {
                if let Err(error) = Self::validate_serving(state, &ticket_id) {
                    return Self::reject(state, "complete_ticket", error);
                }
                crate::metrics::record_closed(TicketStatus::Completed);
                let event = QueueAction::TicketCompleted { ticket_id, at: now };
                Self::transition(state, &event, &ticket_id, env, now)
            },

            QueueAction::NoShowTicket { ticket_id } => {
                if let Err(error) = Self::validate_serving(state, &ticket_id) {
                    return Self::reject(state, "no_show_ticket", error);
                }
                crate::metrics::record_closed(TicketStatus::NoShow);
                let event = QueueAction::TicketMarkedNoShow { ticket_id, at: now };
                Self::transition(state, &event, &ticket_id, env, now)
            },

            QueueAction::CancelTicket { ticket_id, reason } => {
                if let Err(error) = Self::validate_cancel(state, &ticket_id, &reason) {
                    return Self::reject(state, "cancel_ticket", error);
                }
                crate::metrics::record_closed(TicketStatus::Cancelled);
                let event = QueueAction::TicketCancelled {
                    ticket_id,
                    reason: CancelReason::Requested(reason.trim().to_string()),
                    at: now,
                };
                Self::transition(state, &event, &ticket_id, env, now)
            },

            QueueAction::SubmitEvaluation {
                ticket_id,
                rating,
                comment,
            } => {
                if let Err(error) = Self::validate_evaluation(state, &ticket_id, rating) {
                    return Self::reject(state, "submit_evaluation", error);
                }
                Self::apply_event(
                    state,
                    &QueueAction::EvaluationSubmitted {
                        ticket_id,
                        evaluation: Evaluation {
                            rating,
                            comment,
                            submitted_at: now,
                        },
                    },
                );
                match state.tickets.get(&ticket_id) {
                    Some(ticket) => smallvec![Self::persist_effect(env, ticket.clone(), false)],
                    None => SmallVec::new(),
                }
            },

            // ========== Maintenance ==========
            QueueAction::ExpireStale => {
                let stale = Self::stale_tickets(state, now);
                if stale.is_empty() {
                    return SmallVec::new();
                }
                crate::metrics::record_expired(stale.len());
                tracing::info!(count = stale.len(), "Expiring tickets from earlier office-days");

                let mut effects = Vec::with_capacity(stale.len());
                for ticket_id in stale {
                    let event = QueueAction::TicketCancelled {
                        ticket_id,
                        reason: CancelReason::Expired,
                        at: now,
                    };
                    effects.extend(Self::transition(state, &event, &ticket_id, env, now));
                }
                smallvec![Effect::merge(effects)]
            },

            QueueAction::ArchiveBefore { before } => {
                let tickets = Self::archivable(state, now, |_| before);
                tracing::debug!(count = tickets.len(), %before, "Archiving closed tickets");
                Self::archive(state, tickets, env)
            },

            QueueAction::ArchiveOlderThan { days } => {
                let tickets = Self::archivable(state, now, |ticket| {
                    state
                        .offices
                        .get(&ticket.office)
                        .map_or_else(|| now.date_naive(), |office| office.local_day(now))
                        .checked_sub_days(Days::new(u64::from(days)))
                        .unwrap_or(NaiveDate::MIN)
                });
                tracing::debug!(count = tickets.len(), days, "Archiving closed tickets past retention");
                Self::archive(state, tickets, env)
            },

            QueueAction::Hydrate { tickets, sequences } => {
                Self::hydrate(state, tickets, sequences);
                crate::metrics::set_waiting(state.ordering.total_waiting());
                SmallVec::new()
            },

            // ========== Events ==========
            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::DenialReason;
    use crate::events::NoopSink;
    use crate::repository::InMemoryRepository;
    use crate::types::{CustomerProfile, CustomerType, LaneKind, PriorityTier, ServiceId};
    use walkin_testing::{assertions, test_clock, ReducerTest};

    fn env() -> QueueEnvironment {
        QueueEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(InMemoryRepository::new()),
            Arc::new(NoopSink),
        )
    }

    fn configured() -> QueueState {
        let mut state = QueueState::new();
        let reducer = QueueReducer::new();
        let env = env();
        let _ = reducer.reduce(
            &mut state,
            QueueAction::ConfigureOffice {
                office: Office::new("main", "Main", 0),
                lanes: vec![
                    Lane::new("regular", "main", "Regular", "R", LaneKind::All),
                    Lane::new("priority", "main", "Priority", "P", LaneKind::Priority),
                ],
            },
            &env,
        );
        let _ = reducer.reduce(
            &mut state,
            QueueAction::RegisterDesk {
                desk: Desk::new("d1", "main", vec![LaneId::new("regular"), LaneId::new("priority")])
                    .staffed_by("s1"),
            },
            &env,
        );
        let _ = reducer.reduce(
            &mut state,
            QueueAction::RegisterDesk {
                desk: Desk::new("d2", "main", vec![LaneId::new("regular")]).staffed_by("s2"),
            },
            &env,
        );
        state
    }

    fn issue(customer: &str, lane: &str, tier: PriorityTier) -> (TicketId, QueueAction) {
        let ticket_id = TicketId::new();
        let profile = if lane == "priority" {
            CustomerProfile::default().with_verified_priority()
        } else {
            CustomerProfile::default()
        };
        (
            ticket_id,
            QueueAction::IssueTicket {
                ticket_id,
                request: IssueRequest {
                    customer_id: CustomerId::new(customer),
                    office: OfficeId::new("main"),
                    service: ServiceId::new("enrolment"),
                    lane: LaneId::new(lane),
                    tier,
                    customer_type: CustomerType::WalkIn,
                    profile,
                },
            },
        )
    }

    #[test]
    fn issue_numbers_tickets_per_office_day() {
        let (t1, a1) = issue("c1", "regular", PriorityTier::Regular);
        let (t2, a2) = issue("c2", "regular", PriorityTier::Regular);
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(a1)
            .when_action(a2)
            .then_state(move |state| {
                assert_eq!(state.tickets[&t1].number.to_string(), "R-001");
                assert_eq!(state.tickets[&t2].number.to_string(), "R-002");
                assert_eq!(state.tickets[&t2].status, TicketStatus::Waiting);
                assert_eq!(state.position(&t2).unwrap(), 2);
                assert_eq!(state.last_batch, vec![t2]);
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn second_active_ticket_is_denied() {
        let (_, a1) = issue("c1", "regular", PriorityTier::Regular);
        let (t2, a2) = issue("c1", "regular", PriorityTier::Regular);
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(a1)
            .when_action(a2)
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(QueueError::denied(DenialReason::ActiveTicketExists))
                );
                assert!(state.ticket(&t2).is_none());
                assert_eq!(state.sequences.values().copied().max(), Some(1));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn priority_ticket_is_served_first_and_claim_binds_desk() {
        let (regular, a1) = issue("c1", "regular", PriorityTier::Regular);
        let (priority, a2) = issue("c2", "priority", PriorityTier::Priority);
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(a1)
            .when_action(a2)
            .when_action(QueueAction::ClaimNext {
                desk_id: DeskId::new("d1"),
                lane: None,
            })
            .then_state(move |state| {
                let claimed = state.last_outcome().unwrap().unwrap();
                assert_eq!(claimed.id, priority);
                assert_eq!(claimed.status, TicketStatus::Serving);
                assert_eq!(claimed.desk_id(), Some(&DeskId::new("d1")));
                assert_eq!(claimed.claimed_at(), Some(test_clock().now()));
                assert_eq!(state.desks[&DeskId::new("d1")].current_ticket, Some(priority));
                assert_eq!(state.position(&regular).unwrap(), 1);
            })
            .run();
    }

    #[test]
    fn claimed_ticket_cannot_be_claimed_again() {
        let (t1, a1) = issue("c1", "regular", PriorityTier::Regular);
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(a1)
            .when_action(QueueAction::ClaimTicket {
                ticket_id: t1,
                desk_id: DeskId::new("d1"),
            })
            .when_action(QueueAction::ClaimTicket {
                ticket_id: t1,
                desk_id: DeskId::new("d2"),
            })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(QueueError::Conflict(Conflict::AlreadyClaimed))
                );
                assert_eq!(state.tickets[&t1].desk_id(), Some(&DeskId::new("d1")));
                assert!(state.desks[&DeskId::new("d2")].current_ticket.is_none());
            })
            .run();
    }

    #[test]
    fn busy_desk_cannot_claim_next() {
        let (_, a1) = issue("c1", "regular", PriorityTier::Regular);
        let (_, a2) = issue("c2", "regular", PriorityTier::Regular);
        let claim = || QueueAction::ClaimNext {
            desk_id: DeskId::new("d2"),
            lane: None,
        };
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(a1)
            .when_action(a2)
            .when_action(claim())
            .when_action(claim())
            .then_state(|state| {
                assert_eq!(state.last_error, Some(QueueError::Conflict(Conflict::DeskBusy)));
            })
            .run();
    }

    #[test]
    fn empty_lane_claims_nothing() {
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(QueueAction::ClaimNext {
                desk_id: DeskId::new("d1"),
                lane: Some(LaneId::new("regular")),
            })
            .then_state(|state| {
                assert_eq!(state.last_outcome(), Ok(None));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn completion_frees_desk_and_blocks_until_evaluated() {
        let (t1, a1) = issue("c1", "regular", PriorityTier::Regular);
        let (_, again) = issue("c1", "regular", PriorityTier::Regular);
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(a1)
            .when_action(QueueAction::ClaimTicket {
                ticket_id: t1,
                desk_id: DeskId::new("d2"),
            })
            .when_action(QueueAction::CompleteTicket { ticket_id: t1 })
            .when_action(again)
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(QueueError::denied(DenialReason::EvaluationPending))
                );
                assert!(state.desks[&DeskId::new("d2")].current_ticket.is_none());
                let ticket = &state.tickets[&t1];
                assert_eq!(ticket.status, TicketStatus::Completed);
                assert!(ticket.completed_at.is_some());
                assert_eq!(
                    state.customer_state(&CustomerId::new("c1")).pending_evaluation,
                    Some(t1)
                );
            })
            .run();
    }

    #[test]
    fn evaluation_is_validated_and_recorded_once() {
        let mut state = configured();
        let reducer = QueueReducer::new();
        let env = env();
        let (t1, a1) = issue("c1", "regular", PriorityTier::Regular);
        let _ = reducer.reduce(&mut state, a1, &env);

        let evaluate = |rating| QueueAction::SubmitEvaluation {
            ticket_id: t1,
            rating,
            comment: None,
        };

        let _ = reducer.reduce(&mut state, evaluate(5), &env);
        assert_eq!(state.last_error, Some(QueueError::Conflict(Conflict::NotCompleted)));

        let _ = reducer.reduce(
            &mut state,
            QueueAction::ClaimTicket {
                ticket_id: t1,
                desk_id: DeskId::new("d1"),
            },
            &env,
        );
        let _ = reducer.reduce(&mut state, QueueAction::CompleteTicket { ticket_id: t1 }, &env);

        let _ = reducer.reduce(&mut state, evaluate(0), &env);
        assert!(matches!(state.last_error, Some(QueueError::InvalidInput(_))));

        let _ = reducer.reduce(&mut state, evaluate(4), &env);
        assert!(state.last_error.is_none());
        assert_eq!(state.tickets[&t1].evaluation.as_ref().unwrap().rating, 4);
        assert_eq!(state.customer_state(&CustomerId::new("c1")), CustomerQueueState::default());

        let _ = reducer.reduce(&mut state, evaluate(3), &env);
        assert_eq!(
            state.last_error,
            Some(QueueError::Conflict(Conflict::EvaluationAlreadySubmitted))
        );
    }

    #[test]
    fn cancel_requires_reason_and_active_ticket() {
        let mut state = configured();
        let reducer = QueueReducer::new();
        let env = env();
        let (t1, a1) = issue("c1", "regular", PriorityTier::Regular);
        let _ = reducer.reduce(&mut state, a1, &env);

        let _ = reducer.reduce(
            &mut state,
            QueueAction::CancelTicket {
                ticket_id: t1,
                reason: "  ".into(),
            },
            &env,
        );
        assert!(matches!(state.last_error, Some(QueueError::InvalidInput(_))));

        let effects = reducer.reduce(
            &mut state,
            QueueAction::CancelTicket {
                ticket_id: t1,
                reason: "left early".into(),
            },
            &env,
        );
        assertions::assert_has_future_effect(&effects);
        let ticket = &state.tickets[&t1];
        assert_eq!(ticket.status, TicketStatus::Cancelled);
        assert_eq!(ticket.cancel_reason, Some(CancelReason::Requested("left early".into())));
        assert!(state.ordering.is_empty());

        let _ = reducer.reduce(
            &mut state,
            QueueAction::CancelTicket {
                ticket_id: t1,
                reason: "again".into(),
            },
            &env,
        );
        assert_eq!(state.last_error, Some(QueueError::Conflict(Conflict::NotCancellable)));
    }

    #[test]
    fn complete_requires_serving() {
        let (t1, a1) = issue("c1", "regular", PriorityTier::Regular);
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(a1)
            .when_action(QueueAction::NoShowTicket { ticket_id: t1 })
            .then_state(|state| {
                assert_eq!(state.last_error, Some(QueueError::Conflict(Conflict::NotServing)));
            })
            .run();
    }

    #[test]
    fn maintenance_blocks_issuance() {
        let (_, a1) = issue("c1", "regular", PriorityTier::Regular);
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(QueueAction::SetLaneStatus {
                lane_id: LaneId::new("regular"),
                status: ServiceStatus::Maintenance,
            })
            .when_action(a1)
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(QueueError::denied(DenialReason::OfficeUnderMaintenance))
                );
            })
            .run();
    }

    #[test]
    fn serving_desk_cannot_go_on_break() {
        let (t1, a1) = issue("c1", "regular", PriorityTier::Regular);
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(a1)
            .when_action(QueueAction::ClaimTicket {
                ticket_id: t1,
                desk_id: DeskId::new("d2"),
            })
            .when_action(QueueAction::SetDeskStatus {
                desk_id: DeskId::new("d2"),
                status: DeskStatus::Break,
            })
            .then_state(|state| {
                assert_eq!(state.last_error, Some(QueueError::Conflict(Conflict::DeskBusy)));
                assert_eq!(state.desks[&DeskId::new("d2")].status, DeskStatus::Active);
            })
            .run();
    }

    #[test]
    fn hydrate_rebuilds_ordering_and_desks() {
        let mut source = configured();
        let reducer = QueueReducer::new();
        let env = env();
        let (t1, a1) = issue("c1", "regular", PriorityTier::Regular);
        let (t2, a2) = issue("c2", "regular", PriorityTier::Regular);
        let _ = reducer.reduce(&mut source, a1, &env);
        let _ = reducer.reduce(&mut source, a2, &env);
        let _ = reducer.reduce(
            &mut source,
            QueueAction::ClaimTicket {
                ticket_id: t1,
                desk_id: DeskId::new("d1"),
            },
            &env,
        );
        let tickets: Vec<Ticket> = source.tickets.values().cloned().collect();
        let sequences = vec![DailySequence {
            office: OfficeId::new("main"),
            day: test_clock().now().date_naive(),
            last: 7,
        }];

        let mut restored = configured();
        let _ = reducer.reduce(&mut restored, QueueAction::Hydrate { tickets, sequences }, &env);

        assert_eq!(restored.desks[&DeskId::new("d1")].current_ticket, Some(t1));
        assert_eq!(restored.position(&t2).unwrap(), 1);
        assert_eq!(
            restored.customer_state(&CustomerId::new("c1")).active_ticket,
            Some(t1)
        );

        let (t3, a3) = issue("c3", "regular", PriorityTier::Regular);
        let _ = reducer.reduce(&mut restored, a3, &env);
        assert_eq!(restored.tickets[&t3].number.sequence, 8);
    }
}
