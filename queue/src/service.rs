//! Public operations of the queue.
//!
//! [`QueueService`] owns two stores:
//!
//! - the ticket store ([`QueueReducer`]), whose write lock serializes every
//!   lifecycle command for all lanes and offices
//! - the violation store ([`ViolationReducer`]), fed with every ticket
//!   transition through [`ViolationFeed`]
//!
//! Each operation sends one command, reads its outcome under the same lock,
//! then waits for the command's effects (persist, publish, detect) before
//! returning. A caller that gets `Ok` can rely on the transition having been
//! published to subscribers.

use crate::aggregates::ticket::{QueueAction, QueueEnvironment, QueueReducer, QueueState};
use crate::aggregates::violation::{
    Evidence, LockoutState, Severity, Violation, ViolationAction, ViolationCategory,
    ViolationEnvironment, ViolationFilter, ViolationId, ViolationReducer, ViolationState,
    ViolationStatus,
};
use crate::config::Config;
use crate::error::{Entity, QueueError, Result, StorageError};
use crate::events::{BroadcastSink, FanOutSink, TicketEventSink};
use crate::repository::{InMemoryRepository, TicketQuery, TicketRepository, ViolationRepository};
use crate::types::{
    Actor, CredentialId, CustomerId, CustomerQueueState, Desk, DeskId, DeskStatus, IssueRequest,
    Lane, LaneId, LaneSnapshot, Office, OfficeId, ServiceStatus, StaffId, Ticket, TicketEvent,
    TicketId, TicketStatus, UserId,
};
use chrono::NaiveDate;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use walkin_core::environment::Clock;
use walkin_runtime::retry::{retry_with_predicate, RetryPolicy};
use walkin_runtime::{DeadLetterQueue, HealthReport, Store, StoreConfig};

/// Store running the ticket lifecycle
pub type QueueStore = Store<QueueState, QueueAction, QueueEnvironment, QueueReducer>;

/// Store running violation detection and login lockout
pub type ViolationStore = Store<ViolationState, ViolationAction, ViolationEnvironment, ViolationReducer>;

/// Dead-lettered ticket snapshots kept before the oldest are dropped
const DEAD_LETTER_CAPACITY: usize = 1000;

/// A staff-filed violation
#[derive(Clone, Debug)]
pub struct ViolationReport {
    /// Subject
    pub user_id: UserId,
    /// Category
    pub category: ViolationCategory,
    /// Severity
    pub severity: Severity,
    /// Supporting evidence
    pub evidence: Vec<Evidence>,
    /// Free-form notes
    pub notes: Option<String>,
}

/// Forwards ticket transitions to the violation detector
pub struct ViolationFeed {
    store: ViolationStore,
}

impl ViolationFeed {
    /// Feed `store` with every published transition
    #[must_use]
    pub const fn new(store: ViolationStore) -> Self {
        Self { store }
    }
}

impl TicketEventSink for ViolationFeed {
    fn publish(&self, event: TicketEvent) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let ticket_id = event.ticket_id;
            match self.store.send(ViolationAction::ObserveTicketEvent { event }).await {
                Ok(mut handle) => handle.wait().await,
                Err(error) => {
                    tracing::warn!(%ticket_id, error = %error, "Violation detector did not observe transition");
                },
            }
        })
    }
}

/// Entry point for every queue operation
#[derive(Clone)]
pub struct QueueService {
    queue: QueueStore,
    violations: ViolationStore,
    tickets: Arc<dyn TicketRepository>,
    violation_repository: Arc<dyn ViolationRepository>,
    events: BroadcastSink,
    dead_letters: DeadLetterQueue<Ticket>,
    clock: Arc<dyn Clock>,
    read_retry: RetryPolicy,
    config: Config,
}

impl QueueService {
    /// Wire both stores over the given repositories
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        tickets: Arc<dyn TicketRepository>,
        violation_repository: Arc<dyn ViolationRepository>,
        config: Config,
    ) -> Self {
        let shutdown_timeout = config.shutdown_timeout();

        let violations = Store::with_config(
            ViolationState::new(),
            ViolationReducer::new(),
            ViolationEnvironment::new(
                Arc::clone(&clock),
                Arc::clone(&violation_repository),
                config.detector_policy(),
            ),
            StoreConfig::named("violations").with_shutdown_timeout(shutdown_timeout),
        );

        let events = BroadcastSink::default();
        let sink = FanOutSink::new()
            .with(Arc::new(ViolationFeed::new(violations.clone())))
            .with(Arc::new(events.clone()));

        let dead_letters = DeadLetterQueue::new(DEAD_LETTER_CAPACITY);
        let queue = Store::with_config(
            QueueState::new(),
            QueueReducer::new(),
            QueueEnvironment::new(Arc::clone(&clock), Arc::clone(&tickets), Arc::new(sink))
                .with_dead_letters(dead_letters.clone()),
            StoreConfig::named("tickets").with_shutdown_timeout(shutdown_timeout),
        );

        Self {
            queue,
            violations,
            tickets,
            violation_repository,
            events,
            dead_letters,
            clock,
            read_retry: config.storage.read_retry_policy(),
            config,
        }
    }

    /// Service over a fresh in-memory repository
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>, config: Config) -> Self {
        let repository = InMemoryRepository::new();
        Self::new(
            clock,
            Arc::new(repository.clone()),
            Arc::new(repository),
            config,
        )
    }

    /// Loaded configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Clock driving timestamps and office-days
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Ticket snapshots waiting for the repair pass
    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterQueue<Ticket> {
        &self.dead_letters
    }

    /// Ticket storage
    #[must_use]
    pub fn ticket_repository(&self) -> &dyn TicketRepository {
        self.tickets.as_ref()
    }

    /// Subscribe to ticket transitions
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.events.subscribe()
    }

    // ========== Dispatch ==========

    async fn dispatch(&self, action: QueueAction) -> Result<Option<Ticket>> {
        let (outcome, mut handle) = self.queue.send_with(action, QueueState::last_outcome).await?;
        handle.wait().await;
        outcome
    }

    async fn dispatch_ticket(&self, action: QueueAction) -> Result<Ticket> {
        self.dispatch(action)
            .await?
            .ok_or(QueueError::NotFound(Entity::Ticket))
    }

    async fn dispatch_batch(&self, action: QueueAction) -> Result<Vec<TicketId>> {
        let (outcome, mut handle) = self
            .queue
            .send_with(action, |state| match &state.last_error {
                Some(error) => Err(error.clone()),
                None => Ok(state.last_batch.clone()),
            })
            .await?;
        handle.wait().await;
        outcome
    }

    async fn dispatch_violation<T, F>(&self, action: ViolationAction, read: F) -> Result<T>
    where
        F: FnOnce(&ViolationState) -> Option<T>,
    {
        let (outcome, mut handle) = self
            .violations
            .send_with(action, |state| match &state.last_error {
                Some(error) => Err(error.clone()),
                None => read(state).ok_or(QueueError::NotFound(Entity::Violation)),
            })
            .await?;
        handle.wait().await;
        outcome
    }

    async fn dispatch_recorded(&self, action: ViolationAction) -> Result<Violation> {
        self.dispatch_violation(action, |state| {
            state
                .last_violation
                .and_then(|id| state.violations.get(&id))
                .cloned()
        })
        .await
    }

    async fn dispatch_login(&self, action: ViolationAction) -> Result<LockoutState> {
        self.dispatch_violation(action, |state| state.last_lockout.clone())
            .await
    }

    // ========== Directory ==========

    /// Create or replace an office and its lanes
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidInput`] if a lane belongs to another office.
    pub async fn configure_office(&self, office: Office, lanes: Vec<Lane>) -> Result<()> {
        self.dispatch_batch(QueueAction::ConfigureOffice { office, lanes })
            .await
            .map(drop)
    }

    /// Open an office or put it in maintenance
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] for an unknown office.
    pub async fn set_office_status(&self, office_id: OfficeId, status: ServiceStatus) -> Result<()> {
        self.dispatch_batch(QueueAction::SetOfficeStatus { office_id, status })
            .await
            .map(drop)
    }

    /// Open a lane or put it in maintenance
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] for an unknown lane.
    pub async fn set_lane_status(&self, lane_id: LaneId, status: ServiceStatus) -> Result<()> {
        self.dispatch_batch(QueueAction::SetLaneStatus { lane_id, status })
            .await
            .map(drop)
    }

    /// Create or replace an idle desk
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] for an unknown office, [`QueueError::InvalidInput`]
    /// for lanes outside the desk's office, [`crate::error::Conflict::DeskBusy`]
    /// when replacing a desk that is serving.
    pub async fn register_desk(&self, desk: Desk) -> Result<()> {
        self.dispatch_batch(QueueAction::RegisterDesk { desk }).await.map(drop)
    }

    /// Put a staff member at a desk, or clear it
    ///
    /// # Errors
    ///
    /// [`crate::error::Conflict::DeskBusy`] when unstaffing a serving desk.
    pub async fn assign_staff(&self, desk_id: DeskId, staff: Option<StaffId>) -> Result<()> {
        self.dispatch_batch(QueueAction::AssignStaff { desk_id, staff })
            .await
            .map(drop)
    }

    /// Change desk availability
    ///
    /// # Errors
    ///
    /// [`crate::error::Conflict::DeskBusy`] when a serving desk leaves `active`.
    pub async fn set_desk_status(&self, desk_id: DeskId, status: DeskStatus) -> Result<()> {
        self.dispatch_batch(QueueAction::SetDeskStatus { desk_id, status })
            .await
            .map(drop)
    }

    /// Change the lanes a desk calls from
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidInput`] for unknown lanes or lanes of another office.
    pub async fn bind_desk_lanes(&self, desk_id: DeskId, lanes: Vec<LaneId>) -> Result<()> {
        self.dispatch_batch(QueueAction::BindDeskLanes { desk_id, lanes })
            .await
            .map(drop)
    }

    // ========== Lifecycle ==========

    /// Issue a ticket
    ///
    /// # Errors
    ///
    /// [`QueueError::PolicyDenied`] when admission refuses the customer,
    /// [`QueueError::NotFound`] / [`QueueError::InvalidInput`] for bad requests.
    pub async fn issue(&self, request: IssueRequest) -> Result<Ticket> {
        self.dispatch_ticket(QueueAction::IssueTicket {
            ticket_id: TicketId::new(),
            request,
        })
        .await
    }

    /// Call a specific waiting ticket to a desk
    ///
    /// # Errors
    ///
    /// [`crate::error::Conflict::AlreadyClaimed`] when another desk won the race.
    pub async fn claim(&self, ticket_id: TicketId, desk_id: DeskId) -> Result<Ticket> {
        self.dispatch_ticket(QueueAction::ClaimTicket { ticket_id, desk_id })
            .await
    }

    /// Call the next ticket for a desk; `None` when nothing is waiting
    ///
    /// # Errors
    ///
    /// [`crate::error::Conflict::DeskUnavailable`] or
    /// [`crate::error::Conflict::DeskBusy`] when the desk cannot take a ticket.
    pub async fn claim_next(&self, desk_id: DeskId, lane: Option<LaneId>) -> Result<Option<Ticket>> {
        self.dispatch(QueueAction::ClaimNext { desk_id, lane }).await
    }

    /// Finish serving a ticket
    ///
    /// # Errors
    ///
    /// [`crate::error::Conflict::NotServing`] unless the ticket is being served.
    pub async fn complete(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.dispatch_ticket(QueueAction::CompleteTicket { ticket_id })
            .await
    }

    /// Close a called ticket whose customer never came
    ///
    /// # Errors
    ///
    /// [`crate::error::Conflict::NotServing`] unless the ticket is being served.
    pub async fn no_show(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.dispatch_ticket(QueueAction::NoShowTicket { ticket_id })
            .await
    }

    /// Cancel an active ticket
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidInput`] for an empty reason,
    /// [`crate::error::Conflict::NotCancellable`] once the ticket is closed.
    pub async fn cancel(&self, ticket_id: TicketId, reason: impl Into<String>) -> Result<Ticket> {
        self.dispatch_ticket(QueueAction::CancelTicket {
            ticket_id,
            reason: reason.into(),
        })
        .await
    }

    /// Record the evaluation of a completed ticket
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidInput`] for a rating outside 1..=5,
    /// [`crate::error::Conflict::NotCompleted`] or
    /// [`crate::error::Conflict::EvaluationAlreadySubmitted`].
    pub async fn submit_evaluation(
        &self,
        ticket_id: TicketId,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Ticket> {
        self.dispatch_ticket(QueueAction::SubmitEvaluation {
            ticket_id,
            rating,
            comment,
        })
        .await
    }

    /// Cancel active tickets whose office-day has ended
    ///
    /// # Errors
    ///
    /// [`QueueError::ShuttingDown`] once shutdown started.
    pub async fn expire_stale(&self) -> Result<Vec<Ticket>> {
        let expired = self.dispatch_batch(QueueAction::ExpireStale).await?;
        Ok(self
            .queue
            .state(|state| {
                expired
                    .iter()
                    .filter_map(|id| state.ticket(id))
                    .cloned()
                    .collect()
            })
            .await)
    }

    /// Move closed tickets of office-days before `before` out of memory
    ///
    /// # Errors
    ///
    /// [`QueueError::ShuttingDown`] once shutdown started.
    pub async fn archive_before(&self, before: NaiveDate) -> Result<usize> {
        self.dispatch_batch(QueueAction::ArchiveBefore { before })
            .await
            .map(|archived| archived.len())
    }

    /// Archive closed tickets at least `days` office-days old, counted from
    /// each office's own local day
    ///
    /// # Errors
    ///
    /// [`QueueError::ShuttingDown`] once shutdown started.
    pub async fn archive_older_than(&self, days: u32) -> Result<usize> {
        self.dispatch_batch(QueueAction::ArchiveOlderThan { days })
            .await
            .map(|archived| archived.len())
    }

    // ========== Reads ==========

    /// 1-based position of a waiting ticket in its lane
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] for an unknown ticket,
    /// [`crate::error::Conflict::NotWaiting`] once it left the queue.
    pub async fn queue_position(&self, ticket_id: TicketId) -> Result<usize> {
        self.queue.state(|state| state.position(&ticket_id)).await
    }

    /// A ticket, from memory or storage
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] if no such ticket exists,
    /// [`QueueError::StorageUnavailable`] once read retries are exhausted.
    pub async fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        if let Some(ticket) = self.resident_ticket(ticket_id).await {
            return Ok(ticket);
        }
        let repository = Arc::clone(&self.tickets);
        retry_with_predicate(
            &self.read_retry,
            "get_ticket",
            move || {
                let repository = Arc::clone(&repository);
                async move { repository.get_ticket(ticket_id).await }
            },
            StorageError::is_transient,
        )
        .await?
        .ok_or(QueueError::NotFound(Entity::Ticket))
    }

    /// A ticket held in memory
    pub async fn resident_ticket(&self, ticket_id: TicketId) -> Option<Ticket> {
        self.queue.state(|state| state.ticket(&ticket_id).cloned()).await
    }

    /// Search stored tickets
    ///
    /// # Errors
    ///
    /// [`QueueError::StorageUnavailable`] once read retries are exhausted.
    pub async fn find_tickets(&self, query: TicketQuery) -> Result<Vec<Ticket>> {
        let repository = Arc::clone(&self.tickets);
        let found = retry_with_predicate(
            &self.read_retry,
            "find_tickets",
            move || {
                let repository = Arc::clone(&repository);
                let query = query.clone();
                async move { repository.find_tickets(query).await }
            },
            StorageError::is_transient,
        )
        .await?;
        Ok(found)
    }

    /// Waiting tickets of a lane in serving order
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] for an unknown lane.
    pub async fn lane_snapshot(&self, lane_id: LaneId) -> Result<LaneSnapshot> {
        self.queue
            .state(|state| state.lane_snapshot(&lane_id))
            .await
            .ok_or(QueueError::NotFound(Entity::Lane))
    }

    /// Derived queue facts of a customer
    pub async fn customer_state(&self, customer: CustomerId) -> CustomerQueueState {
        self.queue.state(|state| state.customer_state(&customer)).await
    }

    /// Current binding of a desk
    pub async fn desk(&self, desk_id: DeskId) -> Option<Desk> {
        self.queue.state(|state| state.desks.get(&desk_id).cloned()).await
    }

    // ========== Login lockout ==========

    /// Count a failed authentication
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidInput`] for a blank credential.
    pub async fn record_login_failure(&self, credential: CredentialId) -> Result<LockoutState> {
        self.dispatch_login(ViolationAction::RecordLoginFailure { credential })
            .await
    }

    /// Reset the failure count after a successful authentication
    ///
    /// An active lockout stays in force until it expires.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidInput`] for a blank credential.
    pub async fn record_login_success(&self, credential: CredentialId) -> Result<LockoutState> {
        self.dispatch_login(ViolationAction::RecordLoginSuccess { credential })
            .await
    }

    /// Lockout decision for a credential
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidInput`] for a blank credential.
    pub async fn login_state(&self, credential: CredentialId) -> Result<LockoutState> {
        self.dispatch_login(ViolationAction::CheckLogin { credential })
            .await
    }

    // ========== Violations ==========

    /// Violations matching `filter`, oldest first
    pub async fn list_violations(&self, filter: ViolationFilter) -> Vec<Violation> {
        self.violations.state(|state| state.list(&filter)).await
    }

    /// File a violation by hand
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidInput`] for a blank user id.
    pub async fn report_violation(&self, report: ViolationReport, reporter: Actor) -> Result<Violation> {
        self.dispatch_recorded(ViolationAction::ReportViolation {
            user_id: report.user_id,
            category: report.category,
            severity: report.severity,
            evidence: report.evidence,
            notes: report.notes,
            reporter,
        })
        .await
    }

    /// Flag a customer whose priority credential failed verification
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidInput`] for a blank customer id.
    pub async fn flag_priority_credential(
        &self,
        customer: &CustomerId,
        reporter: Actor,
        note: impl Into<String>,
    ) -> Result<Violation> {
        let note = note.into();
        self.report_violation(
            ViolationReport {
                user_id: UserId::from(customer),
                category: ViolationCategory::Fraud,
                severity: Severity::High,
                evidence: vec![Evidence::Note { text: note.clone() }],
                notes: Some(note),
            },
            reporter,
        )
        .await
    }

    /// Close a violation
    ///
    /// # Errors
    ///
    /// [`QueueError::Forbidden`] for non-admins, [`QueueError::NotFound`] for an
    /// unknown violation, [`crate::error::Conflict::ViolationNotActive`] if it is
    /// already resolved.
    pub async fn resolve_violation(
        &self,
        violation_id: ViolationId,
        resolver: Actor,
        notes: Option<String>,
    ) -> Result<Violation> {
        self.dispatch_recorded(ViolationAction::ResolveViolation {
            violation_id,
            resolver,
            notes,
        })
        .await
    }

    /// Move a violation between active and pending
    ///
    /// # Errors
    ///
    /// As [`Self::resolve_violation`], plus [`QueueError::InvalidInput`] when
    /// asked to resolve.
    pub async fn set_violation_status(
        &self,
        violation_id: ViolationId,
        status: ViolationStatus,
        actor: Actor,
    ) -> Result<Violation> {
        self.dispatch_recorded(ViolationAction::SetViolationStatus {
            violation_id,
            status,
            actor,
        })
        .await
    }

    // ========== Lifecycle of the service ==========

    /// Load tickets, counters, violations and login windows from storage
    ///
    /// # Errors
    ///
    /// [`QueueError::StorageUnavailable`] once read retries are exhausted.
    pub async fn hydrate(&self) -> Result<()> {
        let tickets = self.find_tickets(TicketQuery::default()).await?;
        let repository = Arc::clone(&self.tickets);
        let sequences = retry_with_predicate(
            &self.read_retry,
            "load_sequences",
            move || {
                let repository = Arc::clone(&repository);
                async move { repository.load_sequences().await }
            },
            StorageError::is_transient,
        )
        .await?;

        let repository = Arc::clone(&self.violation_repository);
        let violations = retry_with_predicate(
            &self.read_retry,
            "list_violations",
            move || {
                let repository = Arc::clone(&repository);
                async move { repository.list_violations(ViolationFilter::all()).await }
            },
            StorageError::is_transient,
        )
        .await?;
        let repository = Arc::clone(&self.violation_repository);
        let login_windows = retry_with_predicate(
            &self.read_retry,
            "load_login_windows",
            move || {
                let repository = Arc::clone(&repository);
                async move { repository.load_login_windows().await }
            },
            StorageError::is_transient,
        )
        .await?;

        let recent_events = recent_closures(&tickets);
        tracing::info!(
            tickets = tickets.len(),
            violations = violations.len(),
            credentials = login_windows.len(),
            "Hydrating from storage"
        );

        let mut handle = self
            .violations
            .send(ViolationAction::Hydrate {
                violations,
                login_windows,
                recent_events,
            })
            .await?;
        handle.wait().await;
        let mut handle = self
            .queue
            .send(QueueAction::Hydrate { tickets, sequences })
            .await?;
        handle.wait().await;
        Ok(())
    }

    /// Health of both stores and the dead letter queue
    pub fn health(&self) -> HealthReport {
        HealthReport::new(
            vec![
                self.queue.health(),
                self.violations.health(),
                self.dead_letters.health("ticket_dead_letters"),
            ],
            self.clock.now(),
        )
    }

    /// Stop accepting commands and drain in-flight effects
    ///
    /// The ticket store drains first since its effects feed the detector.
    ///
    /// # Errors
    ///
    /// [`QueueError::ShuttingDown`] if effects are still running at the timeout.
    pub async fn shutdown(&self) -> Result<()> {
        self.queue.shutdown_default().await?;
        self.violations.shutdown_default().await?;
        if !self.dead_letters.is_empty() {
            tracing::warn!(
                pending = self.dead_letters.len(),
                "Shutting down with ticket snapshots awaiting repair"
            );
        }
        Ok(())
    }

    /// Wait for the effects of earlier commands to settle
    pub async fn settle(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while self.queue.pending_effects() > 0 || self.violations.pending_effects() > 0 {
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

/// Requested cancellations and no-shows, as transitions for the detector
fn recent_closures(tickets: &[Ticket]) -> Vec<TicketEvent> {
    let mut events: Vec<TicketEvent> = tickets
        .iter()
        .filter(|t| {
            t.status == TicketStatus::NoShow
                || (t.status == TicketStatus::Cancelled
                    && t.cancel_reason.as_ref().is_some_and(|r| r.is_requested()))
        })
        .filter_map(|t| {
            let from = if t.claim.is_some() {
                TicketStatus::Serving
            } else {
                TicketStatus::Waiting
            };
            t.closed_at.map(|at| TicketEvent::transition(t, Some(from), at))
        })
        .collect();
    events.sort_by_key(|e| e.at);
    events
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("dead_letters", &self.dead_letters.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{LaneKind, PriorityTier, ServiceId};
    use walkin_testing::test_clock;

    async fn service() -> QueueService {
        let service = QueueService::in_memory(Arc::new(test_clock()), Config::default());
        service
            .configure_office(
                Office::new("main", "Main", 0),
                vec![Lane::new("a", "main", "General", "A", LaneKind::All)],
            )
            .await
            .unwrap();
        service
            .register_desk(Desk::new("d1", "main", vec![LaneId::new("a")]).staffed_by("s1"))
            .await
            .unwrap();
        service
    }

    #[tokio::test]
    async fn issued_ticket_is_persisted_before_issue_returns() {
        let service = service().await;
        let ticket = service
            .issue(IssueRequest::walk_in("c1", "main", "enrolment", "a"))
            .await
            .unwrap();

        let stored = service
            .ticket_repository()
            .get_ticket(ticket.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, ticket);
        assert_eq!(ticket.service, ServiceId::new("enrolment"));
        assert_eq!(ticket.tier, PriorityTier::Regular);
    }

    #[tokio::test]
    async fn transitions_are_broadcast() {
        let service = service().await;
        let mut events = service.subscribe();

        let ticket = service
            .issue(IssueRequest::walk_in("c1", "main", "enrolment", "a"))
            .await
            .unwrap();
        service.claim_next(DeskId::new("d1"), None).await.unwrap();

        let issued = events.recv().await.unwrap();
        assert_eq!(issued.ticket_id, ticket.id);
        assert_eq!(issued.from, None);
        let claimed = events.recv().await.unwrap();
        assert_eq!(claimed.from, Some(TicketStatus::Waiting));
        assert_eq!(claimed.to, TicketStatus::Serving);
    }

    #[tokio::test]
    async fn unknown_ticket_is_not_found() {
        let service = service().await;
        assert_eq!(
            service.get_ticket(TicketId::new()).await,
            Err(QueueError::NotFound(Entity::Ticket))
        );
        assert_eq!(
            service.queue_position(TicketId::new()).await,
            Err(QueueError::NotFound(Entity::Ticket))
        );
    }

    #[tokio::test]
    async fn shutdown_rejects_new_commands() {
        let service = service().await;
        service.shutdown().await.unwrap();

        assert!(!service.health().is_healthy());
        assert_eq!(
            service
                .issue(IssueRequest::walk_in("c1", "main", "enrolment", "a"))
                .await,
            Err(QueueError::ShuttingDown)
        );
    }
}
