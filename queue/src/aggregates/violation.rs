//! Violation detector and login lockout manager.
//!
//! Watches ticket transitions and login attempts and records violations:
//!
//! - **Login lockout**: consecutive failures per credential; at the threshold the
//!   credential is locked for a fixed duration and a `security`/`high`
//!   violation is recorded. Failures while locked do not extend the lockout;
//!   an expired lockout is cleared lazily on the next attempt or check.
//! - **Cancellation abuse**: requested cancellations (not expiries) inside a
//!   rolling window; reaching the threshold records one `abuse`/`medium`
//!   violation and clears the window.
//! - **No-show abuse**: every no-show is logged; reaching the threshold records
//!   an `attendance` violation at `low`, or `medium` when the customer already
//!   has an unresolved detector-issued attendance violation.
//!
//! Staff may file violations directly (including fraudulent priority
//! credentials). Only office or super admins change a violation's status, and
//! nothing is ever resolved automatically.
//!
//! Persistence is best-effort: a failed write is logged and counted but never
//! fails the login or ticket operation that triggered it.

use crate::error::{Conflict, Entity, QueueError};
use crate::repository::ViolationRepository;
use crate::types::{Actor, CredentialId, CustomerId, StaffId, TicketEvent, TicketId, TicketStatus, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use walkin_core::{effect::Effect, environment::Clock, reducer::Reducer, smallvec, SmallVec};
use walkin_macros::Action;

// ============================================================================
// Types
// ============================================================================

/// Unique identifier for a violation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViolationId(Uuid);

impl ViolationId {
    /// Creates a new random `ViolationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ViolationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ViolationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ViolationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Violation category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    /// Authentication abuse
    Security,
    /// False claims (e.g. an invalid priority credential)
    Fraud,
    /// Queue abuse (e.g. repeated cancellations)
    Abuse,
    /// Repeated no-shows
    Attendance,
    /// Other rule breaches filed by staff
    Compliance,
}

impl ViolationCategory {
    /// Metric/log label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Fraud => "fraud",
            Self::Abuse => "abuse",
            Self::Attendance => "attendance",
            Self::Compliance => "compliance",
        }
    }
}

/// Violation severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Needs immediate attention
    High,
    /// Needs review
    Medium,
    /// Informational
    Low,
}

/// Violation status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    /// Open
    Active,
    /// Under review
    Pending,
    /// Closed by an admin
    Resolved,
}

impl ViolationStatus {
    /// Active or pending
    #[must_use]
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

/// What a violation is based on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Evidence {
    /// A ticket involved in the pattern
    Ticket {
        /// Ticket
        ticket_id: TicketId,
    },
    /// The failed login window that caused a lockout
    LoginFailures {
        /// Credential
        credential: CredentialId,
        /// Consecutive failures
        failures: u32,
        /// First failure of the window
        first_failure_at: Option<DateTime<Utc>>,
    },
    /// Free-form staff note
    Note {
        /// Text
        text: String,
    },
}

/// Who filed a violation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "staff_id")]
pub enum ViolationSource {
    /// Recorded automatically
    Detector,
    /// Filed by a staff member
    Staff(StaffId),
}

/// A recorded compliance or security event tied to a user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Violation ID
    pub id: ViolationId,
    /// Subject
    pub user_id: UserId,
    /// Category
    pub category: ViolationCategory,
    /// Severity
    pub severity: Severity,
    /// Status
    pub status: ViolationStatus,
    /// Supporting evidence
    pub evidence: Vec<Evidence>,
    /// Who filed it
    pub source: ViolationSource,
    /// Notes added on filing or resolution
    pub notes: Option<String>,
    /// When recorded
    pub created_at: DateTime<Utc>,
    /// When resolved
    pub resolved_at: Option<DateTime<Utc>>,
    /// Admin who resolved it
    pub resolved_by: Option<StaffId>,
}

/// Failed-login bookkeeping for one credential
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptWindow {
    /// Consecutive failures
    pub failures: u32,
    /// First failure of the current run
    pub first_failure_at: Option<DateTime<Utc>>,
    /// Locked until this instant
    pub lockout_until: Option<DateTime<Utc>>,
}

impl LoginAttemptWindow {
    /// Whether the credential is locked at `now`
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }

    /// Whether a lockout was set and has run out at `now`
    #[must_use]
    pub fn lockout_expired(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| now >= until)
    }
}

/// Lockout decision returned by login operations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    /// Credential
    pub credential: CredentialId,
    /// Consecutive failures
    pub failures: u32,
    /// Whether authentication must be refused
    pub locked: bool,
    /// End of the lockout
    pub lockout_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    fn of(credential: &CredentialId, window: &LoginAttemptWindow, now: DateTime<Utc>) -> Self {
        Self {
            credential: credential.clone(),
            failures: window.failures,
            locked: window.is_locked(now),
            lockout_until: window.lockout_until,
        }
    }
}

/// Violation search; set fields combine with logical AND
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationFilter {
    /// Status
    pub status: Option<ViolationStatus>,
    /// Category
    pub category: Option<ViolationCategory>,
    /// Severity
    pub severity: Option<Severity>,
    /// Subject
    pub user_id: Option<UserId>,
}

impl ViolationFilter {
    /// Match everything
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Narrow to a status
    #[must_use]
    pub const fn with_status(mut self, status: ViolationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Narrow to a category
    #[must_use]
    pub const fn with_category(mut self, category: ViolationCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Narrow to a severity
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Narrow to a user
    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Whether a violation satisfies every set field
    #[must_use]
    pub fn matches(&self, violation: &Violation) -> bool {
        self.status.is_none_or(|s| s == violation.status)
            && self.category.is_none_or(|c| c == violation.category)
            && self.severity.is_none_or(|s| s == violation.severity)
            && self.user_id.as_ref().is_none_or(|u| *u == violation.user_id)
    }
}

/// Detector thresholds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorPolicy {
    /// Requested cancellations that count as abuse
    pub cancel_threshold: u32,
    /// Rolling cancellation window
    pub cancel_window: Duration,
    /// No-shows that count as an attendance problem
    pub no_show_threshold: u32,
    /// Rolling no-show window
    pub no_show_window: Duration,
    /// Consecutive failures before lockout
    pub login_max_failures: u32,
    /// Lockout duration
    pub lockout_duration: Duration,
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        Self {
            cancel_threshold: 3,
            cancel_window: Duration::hours(2),
            no_show_threshold: 2,
            no_show_window: Duration::hours(24),
            login_max_failures: 3,
            lockout_duration: Duration::minutes(15),
        }
    }
}

/// Which rolling window an observation lands in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Requested cancellations
    Cancellations,
    /// No-shows
    NoShows,
}

/// State of the detector
#[derive(Clone, Debug, Default)]
pub struct ViolationState {
    /// Every known violation
    pub violations: HashMap<ViolationId, Violation>,
    /// Attempt windows by credential
    pub login_windows: HashMap<CredentialId, LoginAttemptWindow>,
    /// Recent requested cancellations per customer
    pub cancellations: HashMap<CustomerId, Vec<(DateTime<Utc>, TicketId)>>,
    /// Recent no-shows per customer
    pub no_shows: HashMap<CustomerId, Vec<(DateTime<Utc>, TicketId)>>,
    /// Lockout decision of the last login command
    pub last_lockout: Option<LockoutState>,
    /// Violation touched by the last command
    pub last_violation: Option<ViolationId>,
    /// Error from the last command
    pub last_error: Option<QueueError>,
}

impl ViolationState {
    /// Create an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Violations matching `filter`, oldest first
    #[must_use]
    pub fn list(&self, filter: &ViolationFilter) -> Vec<Violation> {
        let mut found: Vec<Violation> = self
            .violations
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        found.sort_by_key(|v| (v.created_at, v.id));
        found
    }

    /// Attempt window of a credential (zeroed if unknown)
    #[must_use]
    pub fn login_window(&self, credential: &CredentialId) -> LoginAttemptWindow {
        self.login_windows.get(credential).cloned().unwrap_or_default()
    }

    /// Size of a customer's rolling window
    #[must_use]
    pub fn window_len(&self, customer: &CustomerId, kind: WindowKind) -> usize {
        self.window(kind).get(customer).map_or(0, Vec::len)
    }

    fn window(&self, kind: WindowKind) -> &HashMap<CustomerId, Vec<(DateTime<Utc>, TicketId)>> {
        match kind {
            WindowKind::Cancellations => &self.cancellations,
            WindowKind::NoShows => &self.no_shows,
        }
    }

    fn window_mut(
        &mut self,
        kind: WindowKind,
    ) -> &mut HashMap<CustomerId, Vec<(DateTime<Utc>, TicketId)>> {
        match kind {
            WindowKind::Cancellations => &mut self.cancellations,
            WindowKind::NoShows => &mut self.no_shows,
        }
    }

    fn has_open_detector_violation(&self, user: &UserId, category: ViolationCategory) -> bool {
        self.violations.values().any(|v| {
            v.user_id == *user
                && v.category == category
                && v.status.is_open()
                && v.source == ViolationSource::Detector
        })
    }
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the violation detector
#[derive(Action, Clone, Debug)]
pub enum ViolationAction {
    // Commands
    /// Count a failed authentication
    #[command]
    RecordLoginFailure {
        /// Credential
        credential: CredentialId,
    },

    /// Reset the failure count after a successful authentication
    ///
    /// An active lockout is left in place until it expires.
    #[command]
    RecordLoginSuccess {
        /// Credential
        credential: CredentialId,
    },

    /// Read the lockout decision, clearing an expired lockout
    #[command]
    CheckLogin {
        /// Credential
        credential: CredentialId,
    },

    /// Feed a ticket transition to the detector
    #[command]
    ObserveTicketEvent {
        /// Transition
        event: TicketEvent,
    },

    /// File a violation by hand
    #[command]
    ReportViolation {
        /// Subject
        user_id: UserId,
        /// Category
        category: ViolationCategory,
        /// Severity
        severity: Severity,
        /// Supporting evidence
        evidence: Vec<Evidence>,
        /// Notes
        notes: Option<String>,
        /// Staff filing it
        reporter: Actor,
    },

    /// Close a violation
    #[command]
    ResolveViolation {
        /// Violation
        violation_id: ViolationId,
        /// Admin resolving it
        resolver: Actor,
        /// Resolution notes
        notes: Option<String>,
    },

    /// Move a violation between active and pending
    #[command]
    SetViolationStatus {
        /// Violation
        violation_id: ViolationId,
        /// Target status (active or pending)
        status: ViolationStatus,
        /// Admin making the change
        actor: Actor,
    },

    /// Rebuild state from storage at startup
    Hydrate {
        /// Stored violations
        violations: Vec<Violation>,
        /// Stored attempt windows
        login_windows: Vec<(CredentialId, LoginAttemptWindow)>,
        /// Recent cancellations and no-shows, to refill rolling windows
        recent_events: Vec<TicketEvent>,
    },

    // Events
    /// A credential's attempt window changed
    #[event]
    LoginWindowUpdated {
        /// Credential
        credential: CredentialId,
        /// New window
        window: LoginAttemptWindow,
    },

    /// A transition landed in a customer's rolling window
    #[event]
    ObservationCounted {
        /// Customer
        customer: CustomerId,
        /// Window
        kind: WindowKind,
        /// Ticket
        ticket_id: TicketId,
        /// When it happened
        at: DateTime<Utc>,
        /// Entries older than this fall out of the window
        horizon: DateTime<Utc>,
    },

    /// A customer's rolling window was emptied
    #[event]
    WindowCleared {
        /// Customer
        customer: CustomerId,
        /// Window
        kind: WindowKind,
    },

    /// A violation was recorded
    #[event]
    ViolationRecorded {
        /// The violation
        violation: Violation,
    },

    /// A violation was resolved
    #[event]
    ViolationResolved {
        /// Violation
        violation_id: ViolationId,
        /// Admin
        resolved_by: StaffId,
        /// Notes
        notes: Option<String>,
        /// When
        at: DateTime<Utc>,
    },

    /// A violation moved between active and pending
    #[event]
    ViolationStatusChanged {
        /// Violation
        violation_id: ViolationId,
        /// New status
        status: ViolationStatus,
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

/// Environment dependencies for the detector
#[derive(Clone)]
pub struct ViolationEnvironment {
    /// Clock for windows and lockouts
    pub clock: Arc<dyn Clock>,
    /// Violation and login window storage
    pub repository: Arc<dyn ViolationRepository>,
    /// Thresholds
    pub policy: DetectorPolicy,
}

impl ViolationEnvironment {
    /// Creates a new `ViolationEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        repository: Arc<dyn ViolationRepository>,
        policy: DetectorPolicy,
    ) -> Self {
        Self {
            clock,
            repository,
            policy,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the violation detector
#[derive(Clone, Debug, Default)]
pub struct ViolationReducer;

type Effects = SmallVec<[Effect<ViolationAction>; 4]>;

impl ViolationReducer {
    /// Creates a new `ViolationReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn detector_violation(
        user_id: UserId,
        category: ViolationCategory,
        severity: Severity,
        evidence: Vec<Evidence>,
        now: DateTime<Utc>,
    ) -> Violation {
        Violation {
            id: ViolationId::new(),
            user_id,
            category,
            severity,
            status: ViolationStatus::Active,
            evidence,
            source: ViolationSource::Detector,
            notes: None,
            created_at: now,
            resolved_at: None,
            resolved_by: None,
        }
    }

    /// Events for a failed login at `now`
    fn login_failure(
        state: &ViolationState,
        credential: CredentialId,
        policy: &DetectorPolicy,
        now: DateTime<Utc>,
    ) -> Vec<ViolationAction> {
        let mut window = state.login_window(&credential);

        if window.is_locked(now) {
            return Vec::new();
        }
        if window.lockout_expired(now) {
            window = LoginAttemptWindow::default();
        }

        window.failures += 1;
        window.first_failure_at.get_or_insert(now);

        let mut events = Vec::with_capacity(2);
        if window.failures >= policy.login_max_failures {
            window.lockout_until = Some(now + policy.lockout_duration);
            events.push(ViolationAction::ViolationRecorded {
                violation: Self::detector_violation(
                    UserId::from(&credential),
                    ViolationCategory::Security,
                    Severity::High,
                    vec![Evidence::LoginFailures {
                        credential: credential.clone(),
                        failures: window.failures,
                        first_failure_at: window.first_failure_at,
                    }],
                    now,
                ),
            });
        }
        events.insert(0, ViolationAction::LoginWindowUpdated { credential, window });
        events
    }

    /// Events for a ticket transition
    fn observe(
        state: &ViolationState,
        event: &TicketEvent,
        policy: &DetectorPolicy,
        now: DateTime<Utc>,
    ) -> Vec<ViolationAction> {
        let (kind, threshold, span) = match (event.to, &event.cancel_reason) {
            (TicketStatus::Cancelled, Some(reason)) if reason.is_requested() => (
                WindowKind::Cancellations,
                policy.cancel_threshold,
                policy.cancel_window,
            ),
            (TicketStatus::NoShow, _) => {
                tracing::info!(
                    customer = %event.customer_id,
                    ticket_id = %event.ticket_id,
                    "No-show recorded"
                );
                (WindowKind::NoShows, policy.no_show_threshold, policy.no_show_window)
            },
            _ => return Vec::new(),
        };

        let entries = state.window(kind).get(&event.customer_id);
        if entries.is_some_and(|e| e.iter().any(|(_, id)| *id == event.ticket_id)) {
            return Vec::new();
        }

        let horizon = event.at - span;
        let in_window: Vec<TicketId> = entries
            .into_iter()
            .flatten()
            .filter(|(at, _)| *at > horizon)
            .map(|(_, id)| *id)
            .chain(std::iter::once(event.ticket_id))
            .collect();

        let mut events = vec![ViolationAction::ObservationCounted {
            customer: event.customer_id.clone(),
            kind,
            ticket_id: event.ticket_id,
            at: event.at,
            horizon,
        }];

        if u32::try_from(in_window.len()).unwrap_or(u32::MAX) >= threshold {
            let user = UserId::from(&event.customer_id);
            let (category, severity) = match kind {
                WindowKind::Cancellations => (ViolationCategory::Abuse, Severity::Medium),
                WindowKind::NoShows => {
                    let severity =
                        if state.has_open_detector_violation(&user, ViolationCategory::Attendance) {
                            Severity::Medium
                        } else {
                            Severity::Low
                        };
                    (ViolationCategory::Attendance, severity)
                },
            };
            let evidence = in_window
                .into_iter()
                .map(|ticket_id| Evidence::Ticket { ticket_id })
                .collect();

            events.push(ViolationAction::ViolationRecorded {
                violation: Self::detector_violation(user, category, severity, evidence, now),
            });
            events.push(ViolationAction::WindowCleared {
                customer: event.customer_id.clone(),
                kind,
            });
        }
        events
    }

    fn require_admin(actor: &Actor) -> Result<(), QueueError> {
        if actor.role.can_administer_violations() {
            Ok(())
        } else {
            Err(QueueError::Forbidden(format!(
                "staff {} may not change violations",
                actor.staff_id
            )))
        }
    }

    fn open_violation<'a>(
        state: &'a ViolationState,
        violation_id: &ViolationId,
    ) -> Result<&'a Violation, QueueError> {
        let violation = state
            .violations
            .get(violation_id)
            .ok_or(QueueError::NotFound(Entity::Violation))?;
        if violation.status.is_open() {
            Ok(violation)
        } else {
            Err(Conflict::ViolationNotActive.into())
        }
    }

    /// Applies an event to state
    fn apply_event(state: &mut ViolationState, action: &ViolationAction) {
        match action {
            ViolationAction::LoginWindowUpdated { credential, window } => {
                state.login_windows.insert(credential.clone(), window.clone());
            },
            ViolationAction::ObservationCounted {
                customer,
                kind,
                ticket_id,
                at,
                horizon,
            } => {
                let entries = state.window_mut(*kind).entry(customer.clone()).or_default();
                entries.retain(|(seen, _)| seen > horizon);
                entries.push((*at, *ticket_id));
            },
            ViolationAction::WindowCleared { customer, kind } => {
                state.window_mut(*kind).remove(customer);
            },
            ViolationAction::ViolationRecorded { violation } => {
                state.last_violation = Some(violation.id);
                state.violations.insert(violation.id, violation.clone());
            },
            ViolationAction::ViolationResolved {
                violation_id,
                resolved_by,
                notes,
                at,
            } => {
                if let Some(violation) = state.violations.get_mut(violation_id) {
                    violation.status = ViolationStatus::Resolved;
                    violation.resolved_at = Some(*at);
                    violation.resolved_by = Some(resolved_by.clone());
                    if notes.is_some() {
                        violation.notes.clone_from(notes);
                    }
                }
                state.last_violation = Some(*violation_id);
            },
            ViolationAction::ViolationStatusChanged {
                violation_id,
                status,
            } => {
                if let Some(violation) = state.violations.get_mut(violation_id) {
                    violation.status = *status;
                }
                state.last_violation = Some(*violation_id);
            },
            ViolationAction::CommandRejected { error } => {
                state.last_error = Some(error.clone());
            },
            ViolationAction::RecordLoginFailure { .. }
            | ViolationAction::RecordLoginSuccess { .. }
            | ViolationAction::CheckLogin { .. }
            | ViolationAction::ObserveTicketEvent { .. }
            | ViolationAction::ReportViolation { .. }
            | ViolationAction::ResolveViolation { .. }
            | ViolationAction::SetViolationStatus { .. }
            | ViolationAction::Hydrate { .. } => {},
        }
    }

    /// Apply events and build their persistence effects
    fn commit(state: &mut ViolationState, events: Vec<ViolationAction>, env: &ViolationEnvironment) -> Effects {
        let mut writes = Vec::new();
        for event in &events {
            Self::apply_event(state, event);
            match event {
                ViolationAction::LoginWindowUpdated { credential, window } => {
                    writes.push(persist_window(env, credential.clone(), window.clone()));
                },
                ViolationAction::ViolationRecorded { violation } => {
                    crate::metrics::record_violation(violation.category);
                    tracing::warn!(
                        violation_id = %violation.id,
                        user_id = %violation.user_id,
                        category = violation.category.as_str(),
                        severity = ?violation.severity,
                        "Violation recorded"
                    );
                    writes.push(persist_violation(env, violation.clone()));
                },
                ViolationAction::ViolationResolved { violation_id, .. }
                | ViolationAction::ViolationStatusChanged { violation_id, .. } => {
                    if let Some(violation) = state.violations.get(violation_id) {
                        writes.push(persist_violation(env, violation.clone()));
                    }
                },
                _ => {},
            }
        }

        if writes.is_empty() {
            SmallVec::new()
        } else {
            smallvec![Effect::merge(writes)]
        }
    }

    fn reject(state: &mut ViolationState, command: &'static str, error: QueueError) -> Effects {
        tracing::warn!(command, error = %error, "Command rejected");
        Self::apply_event(state, &ViolationAction::CommandRejected { error });
        SmallVec::new()
    }

    fn hydrate(
        state: &mut ViolationState,
        violations: Vec<Violation>,
        login_windows: Vec<(CredentialId, LoginAttemptWindow)>,
        recent_events: Vec<TicketEvent>,
        env: &ViolationEnvironment,
    ) {
        state.violations = violations.into_iter().map(|v| (v.id, v)).collect();
        state.login_windows = login_windows.into_iter().collect();
        state.cancellations.clear();
        state.no_shows.clear();

        let now = env.clock.now();
        for event in recent_events {
            let (kind, span) = match (event.to, &event.cancel_reason) {
                (TicketStatus::Cancelled, Some(reason)) if reason.is_requested() => {
                    (WindowKind::Cancellations, env.policy.cancel_window)
                },
                (TicketStatus::NoShow, _) => (WindowKind::NoShows, env.policy.no_show_window),
                _ => continue,
            };
            if event.at > now - span {
                state
                    .window_mut(kind)
                    .entry(event.customer_id)
                    .or_default()
                    .push((event.at, event.ticket_id));
            }
        }
        for entries in state.cancellations.values_mut().chain(state.no_shows.values_mut()) {
            entries.sort_by_key(|(at, _)| *at);
        }

        tracing::info!(
            violations = state.violations.len(),
            login_windows = state.login_windows.len(),
            "Violation state hydrated"
        );
    }
}

fn persist_violation(env: &ViolationEnvironment, violation: Violation) -> Effect<ViolationAction> {
    let repository = Arc::clone(&env.repository);
    Effect::future(async move {
        let violation_id = violation.id;
        if let Err(error) = repository.upsert_violation(violation).await {
            metrics::counter!("walkin_violation_write_failures_total").increment(1);
            tracing::error!(%violation_id, error = %error, "Failed to persist violation");
        }
        None
    })
}

fn persist_window(
    env: &ViolationEnvironment,
    credential: CredentialId,
    window: LoginAttemptWindow,
) -> Effect<ViolationAction> {
    let repository = Arc::clone(&env.repository);
    Effect::future(async move {
        if let Err(error) = repository.upsert_login_window(credential.clone(), window).await {
            metrics::counter!("walkin_violation_write_failures_total").increment(1);
            tracing::error!(%credential, error = %error, "Failed to persist login window");
        }
        None
    })
}

impl Reducer for ViolationReducer {
    type State = ViolationState;
    type Action = ViolationAction;
    type Environment = ViolationEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per command
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        tracing::trace!(action = action.name(), kind = action.kind(), "Reducing violation action");
        if action.is_command() {
            state.last_error = None;
            state.last_violation = None;
            state.last_lockout = None;
        }
        let now = env.clock.now();

        if let ViolationAction::RecordLoginFailure { credential }
        | ViolationAction::RecordLoginSuccess { credential }
        | ViolationAction::CheckLogin { credential } = &action
        {
            if credential.is_blank() {
                return Self::reject(
                    state,
                    action.name(),
                    QueueError::InvalidInput("credential must not be empty".to_string()),
                );
            }
        }

        match action {
            // ========== Commands ==========
            ViolationAction::RecordLoginFailure { credential } => {
                let events = Self::login_failure(state, credential.clone(), &env.policy, now);
                if events.is_empty() {
                    tracing::warn!(%credential, "Login attempt while locked out");
                }
                if events.len() > 1 {
                    crate::metrics::record_lockout();
                }
                let effects = Self::commit(state, events, env);
                state.last_lockout =
                    Some(LockoutState::of(&credential, &state.login_window(&credential), now));
                effects
            },

            // Clears the failure count only. A lockout already in force keeps
            // its `lockout_until` and lifts when it expires, so a success
            // cannot cut a lockout short.
            ViolationAction::RecordLoginSuccess { credential } => {
                let current = state.login_window(&credential);
                let window = if current.lockout_expired(now) {
                    LoginAttemptWindow::default()
                } else {
                    LoginAttemptWindow {
                        lockout_until: current.lockout_until,
                        ..LoginAttemptWindow::default()
                    }
                };
                let effects = if window == current {
                    SmallVec::new()
                } else {
                    Self::commit(
                        state,
                        vec![ViolationAction::LoginWindowUpdated {
                            credential: credential.clone(),
                            window,
                        }],
                        env,
                    )
                };
                state.last_lockout =
                    Some(LockoutState::of(&credential, &state.login_window(&credential), now));
                effects
            },

            ViolationAction::CheckLogin { credential } => {
                let current = state.login_window(&credential);
                let effects = if current.lockout_expired(now) {
                    Self::commit(
                        state,
                        vec![ViolationAction::LoginWindowUpdated {
                            credential: credential.clone(),
                            window: LoginAttemptWindow::default(),
                        }],
                        env,
                    )
                } else {
                    SmallVec::new()
                };
                state.last_lockout =
                    Some(LockoutState::of(&credential, &state.login_window(&credential), now));
                effects
            },

            ViolationAction::ObserveTicketEvent { event } => {
                let events = Self::observe(state, &event, &env.policy, now);
                Self::commit(state, events, env)
            },

            ViolationAction::ReportViolation {
                user_id,
                category,
                severity,
                evidence,
                notes,
                reporter,
            } => {
                if user_id.is_blank() {
                    return Self::reject(
                        state,
                        "report_violation",
                        QueueError::InvalidInput("user id must not be empty".to_string()),
                    );
                }
                let violation = Violation {
                    id: ViolationId::new(),
                    user_id,
                    category,
                    severity,
                    status: ViolationStatus::Active,
                    evidence,
                    source: ViolationSource::Staff(reporter.staff_id),
                    notes,
                    created_at: now,
                    resolved_at: None,
                    resolved_by: None,
                };
                Self::commit(state, vec![ViolationAction::ViolationRecorded { violation }], env)
            },

            ViolationAction::ResolveViolation {
                violation_id,
                resolver,
                notes,
            } => {
                let checked = Self::require_admin(&resolver)
                    .and_then(|()| Self::open_violation(state, &violation_id).map(|_| ()));
                if let Err(error) = checked {
                    return Self::reject(state, "resolve_violation", error);
                }
                tracing::info!(%violation_id, resolver = %resolver.staff_id, "Violation resolved");
                Self::commit(
                    state,
                    vec![ViolationAction::ViolationResolved {
                        violation_id,
                        resolved_by: resolver.staff_id,
                        notes,
                        at: now,
                    }],
                    env,
                )
            },

            ViolationAction::SetViolationStatus {
                violation_id,
                status,
                actor,
            } => {
                let checked = Self::require_admin(&actor)
                    .and_then(|()| {
                        if status.is_open() {
                            Ok(())
                        } else {
                            Err(QueueError::InvalidInput(
                                "use resolve to close a violation".to_string(),
                            ))
                        }
                    })
                    .and_then(|()| Self::open_violation(state, &violation_id).map(|_| ()));
                if let Err(error) = checked {
                    return Self::reject(state, "set_violation_status", error);
                }
                Self::commit(
                    state,
                    vec![ViolationAction::ViolationStatusChanged {
                        violation_id,
                        status,
                    }],
                    env,
                )
            },

            ViolationAction::Hydrate {
                violations,
                login_windows,
                recent_events,
            } => {
                Self::hydrate(state, violations, login_windows, recent_events, env);
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
    use crate::repository::InMemoryRepository;
    use crate::types::{CancelReason, LaneId, OfficeId, Role};
    use walkin_testing::{assertions, test_clock, test_instant, ReducerTest};

    fn env() -> ViolationEnvironment {
        ViolationEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(InMemoryRepository::new()),
            DetectorPolicy::default(),
        )
    }

    fn failure(credential: &str) -> ViolationAction {
        ViolationAction::RecordLoginFailure {
            credential: CredentialId::new(credential),
        }
    }

    fn closed(customer: &str, to: TicketStatus, reason: Option<CancelReason>, minutes: i64) -> TicketEvent {
        TicketEvent {
            ticket_id: TicketId::new(),
            customer_id: CustomerId::new(customer),
            office: OfficeId::new("main"),
            lane: LaneId::new("a"),
            from: Some(TicketStatus::Waiting),
            to,
            at: test_instant() - Duration::minutes(minutes),
            cancel_reason: reason,
        }
    }

    fn cancelled(customer: &str, minutes_ago: i64) -> ViolationAction {
        ViolationAction::ObserveTicketEvent {
            event: closed(
                customer,
                TicketStatus::Cancelled,
                Some(CancelReason::Requested("changed plans".into())),
                minutes_ago,
            ),
        }
    }

    #[test]
    fn third_failure_locks_and_records_security_violation() {
        ReducerTest::new(ViolationReducer::new())
            .with_env(env())
            .given_state(ViolationState::new())
            .when_action(failure("u1"))
            .when_action(failure("u1"))
            .when_action(failure("u1"))
            .then_state(|state| {
                let lockout = state.last_lockout.clone().unwrap();
                assert!(lockout.locked);
                assert_eq!(lockout.failures, 3);
                assert_eq!(
                    lockout.lockout_until,
                    Some(test_instant() + Duration::minutes(15))
                );
                let violations = state.list(&ViolationFilter::all());
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].category, ViolationCategory::Security);
                assert_eq!(violations[0].severity, Severity::High);
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn failure_while_locked_does_not_extend_lockout() {
        ReducerTest::new(ViolationReducer::new())
            .with_env(env())
            .given_state(ViolationState::new())
            .when_action(failure("u1"))
            .when_action(failure("u1"))
            .when_action(failure("u1"))
            .when_action(failure("u1"))
            .then_state(|state| {
                let lockout = state.last_lockout.clone().unwrap();
                assert!(lockout.locked);
                assert_eq!(lockout.failures, 3);
                assert_eq!(state.violations.len(), 1);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn success_before_lockout_resets_count() {
        ReducerTest::new(ViolationReducer::new())
            .with_env(env())
            .given_state(ViolationState::new())
            .when_action(failure("u1"))
            .when_action(failure("u1"))
            .when_action(ViolationAction::RecordLoginSuccess {
                credential: CredentialId::new("u1"),
            })
            .when_action(failure("u1"))
            .then_state(|state| {
                let lockout = state.last_lockout.clone().unwrap();
                assert_eq!(lockout.failures, 1);
                assert!(!lockout.locked);
                assert!(state.violations.is_empty());
            })
            .run();
    }

    #[test]
    fn blank_credential_is_rejected_without_a_window() {
        ReducerTest::new(ViolationReducer::new())
            .with_env(env())
            .given_state(ViolationState::new())
            .when_action(failure(""))
            .when_action(failure("  "))
            .when_action(failure(""))
            .then_state(|state| {
                assert!(matches!(state.last_error, Some(QueueError::InvalidInput(_))));
                assert!(state.last_lockout.is_none());
                assert!(state.login_windows.is_empty());
                assert!(state.violations.is_empty());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn success_during_lockout_keeps_the_lockout() {
        ReducerTest::new(ViolationReducer::new())
            .with_env(env())
            .given_state(ViolationState::new())
            .when_action(failure("u1"))
            .when_action(failure("u1"))
            .when_action(failure("u1"))
            .when_action(ViolationAction::RecordLoginSuccess {
                credential: CredentialId::new("u1"),
            })
            .then_state(|state| {
                let lockout = state.last_lockout.clone().unwrap();
                assert!(lockout.locked);
                assert_eq!(lockout.failures, 0);
                assert_eq!(
                    lockout.lockout_until,
                    Some(test_instant() + Duration::minutes(15))
                );
            })
            .run();
    }

    #[test]
    fn third_requested_cancellation_records_one_abuse_violation() {
        ReducerTest::new(ViolationReducer::new())
            .with_env(env())
            .given_state(ViolationState::new())
            .when_action(cancelled("c1", 90))
            .when_action(cancelled("c1", 45))
            .when_action(cancelled("c1", 0))
            .then_state(|state| {
                let abuse = state.list(&ViolationFilter::all().with_category(ViolationCategory::Abuse));
                assert_eq!(abuse.len(), 1);
                assert_eq!(abuse[0].severity, Severity::Medium);
                assert_eq!(abuse[0].evidence.len(), 3);
                assert_eq!(state.window_len(&CustomerId::new("c1"), WindowKind::Cancellations), 0);
            })
            .run();
    }

    #[test]
    fn cancellations_outside_window_do_not_count() {
        ReducerTest::new(ViolationReducer::new())
            .with_env(env())
            .given_state(ViolationState::new())
            .when_action(cancelled("c1", 300))
            .when_action(cancelled("c1", 60))
            .when_action(cancelled("c1", 0))
            .then_state(|state| {
                assert!(state.violations.is_empty());
                assert_eq!(state.window_len(&CustomerId::new("c1"), WindowKind::Cancellations), 2);
            })
            .run();
    }

    #[test]
    fn expired_cancellations_are_ignored() {
        let expired = |minutes| ViolationAction::ObserveTicketEvent {
            event: closed("c1", TicketStatus::Cancelled, Some(CancelReason::Expired), minutes),
        };
        ReducerTest::new(ViolationReducer::new())
            .with_env(env())
            .given_state(ViolationState::new())
            .when_action(expired(10))
            .when_action(expired(5))
            .when_action(expired(0))
            .then_state(|state| {
                assert!(state.violations.is_empty());
                assert_eq!(state.window_len(&CustomerId::new("c1"), WindowKind::Cancellations), 0);
            })
            .run();
    }

    #[test]
    fn repeated_no_shows_escalate_severity() {
        let no_show = |minutes| ViolationAction::ObserveTicketEvent {
            event: closed("c1", TicketStatus::NoShow, None, minutes),
        };
        ReducerTest::new(ViolationReducer::new())
            .with_env(env())
            .given_state(ViolationState::new())
            .when_action(no_show(120))
            .when_action(no_show(100))
            .when_action(no_show(60))
            .when_action(no_show(30))
            .then_state(|state| {
                let attendance = state.list(&ViolationFilter::all().with_category(ViolationCategory::Attendance));
                assert_eq!(attendance.len(), 2);
                assert_eq!(attendance[0].severity, Severity::Low);
                assert_eq!(attendance[1].severity, Severity::Medium);
            })
            .run();
    }

    #[test]
    fn only_admins_resolve_and_resolution_is_final() {
        let mut state = ViolationState::new();
        let reducer = ViolationReducer::new();
        let env = env();
        let _ = reducer.reduce(
            &mut state,
            ViolationAction::ReportViolation {
                user_id: UserId::new("c1"),
                category: ViolationCategory::Fraud,
                severity: Severity::High,
                evidence: vec![Evidence::Note {
                    text: "forged senior card".into(),
                }],
                notes: None,
                reporter: Actor::new("staff-1", Role::Staff),
            },
            &env,
        );
        let id = state.last_violation.unwrap();

        let _ = reducer.reduce(
            &mut state,
            ViolationAction::ResolveViolation {
                violation_id: id,
                resolver: Actor::new("staff-1", Role::Staff),
                notes: None,
            },
            &env,
        );
        assert!(matches!(state.last_error, Some(QueueError::Forbidden(_))));

        let _ = reducer.reduce(
            &mut state,
            ViolationAction::ResolveViolation {
                violation_id: id,
                resolver: Actor::new("admin-1", Role::OfficeAdmin),
                notes: Some("verified with registrar".into()),
            },
            &env,
        );
        assert!(state.last_error.is_none());
        let resolved = &state.violations[&id];
        assert_eq!(resolved.status, ViolationStatus::Resolved);
        assert_eq!(resolved.resolved_by, Some(StaffId::new("admin-1")));
        assert_eq!(resolved.resolved_at, Some(test_instant()));

        let _ = reducer.reduce(
            &mut state,
            ViolationAction::ResolveViolation {
                violation_id: id,
                resolver: Actor::new("admin-1", Role::SuperAdmin),
                notes: None,
            },
            &env,
        );
        assert_eq!(
            state.last_error,
            Some(QueueError::Conflict(Conflict::ViolationNotActive))
        );
    }

    #[test]
    fn filter_combines_fields() {
        let mut state = ViolationState::new();
        for (user, category) in [
            ("a", ViolationCategory::Abuse),
            ("a", ViolationCategory::Security),
            ("b", ViolationCategory::Abuse),
        ] {
            let violation = ViolationReducer::detector_violation(
                UserId::new(user),
                category,
                Severity::Medium,
                Vec::new(),
                test_instant(),
            );
            state.violations.insert(violation.id, violation);
        }

        let filter = ViolationFilter::all()
            .for_user("a")
            .with_category(ViolationCategory::Abuse)
            .with_status(ViolationStatus::Active);
        assert_eq!(state.list(&filter).len(), 1);
        assert_eq!(state.list(&ViolationFilter::all().with_severity(Severity::High)).len(), 0);
    }
}
