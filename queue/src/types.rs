//! Domain types for the walk-in queue.
//!
//! Value objects and entities shared by the lifecycle reducer, the ordering
//! engine, the policy gate and the desk scheduler. Violation-side types live
//! with their reducer in [`crate::aggregates::violation`].

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
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

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Defines a string-backed identifier owned by an external directory.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for an empty or whitespace-only identifier
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Office code (e.g. `registrar-main`)
    OfficeId
);
string_id!(
    /// Lane code, unique across offices
    LaneId
);
string_id!(
    /// Serving desk code
    DeskId
);
string_id!(
    /// Staff member identifier
    StaffId
);
string_id!(
    /// Customer account identifier
    CustomerId
);
string_id!(
    /// Office service code (what the customer came for)
    ServiceId
);
string_id!(
    /// Login credential identifier (e.g. an email or student number)
    CredentialId
);
string_id!(
    /// Subject of a violation: a customer or the owner of a credential
    UserId
);

impl From<&CustomerId> for UserId {
    fn from(customer: &CustomerId) -> Self {
        Self(customer.0.clone())
    }
}

impl From<&CredentialId> for UserId {
    fn from(credential: &CredentialId) -> Self {
        Self(credential.0.clone())
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Priority class of a ticket; determines service order within a lane
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    /// Ordinary walk-in
    Regular,
    /// Priority customer (e.g. senior, disabled, pregnant)
    Priority,
    /// Served ahead of everyone else
    Vip,
}

impl PriorityTier {
    /// Tiers in the order they are drained
    pub const SERVICE_ORDER: [Self; 3] = [Self::Vip, Self::Priority, Self::Regular];

    /// Rank of the tier; higher is served first
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Regular => 0,
            Self::Priority => 1,
            Self::Vip => 2,
        }
    }

    /// Position of the tier in [`Self::SERVICE_ORDER`]
    #[must_use]
    pub const fn service_slot(self) -> usize {
        match self {
            Self::Vip => 0,
            Self::Priority => 1,
            Self::Regular => 2,
        }
    }

    /// Metric/log label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Priority => "priority",
            Self::Vip => "vip",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the customer arrived
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerType {
    /// Walked in without booking
    WalkIn,
    /// Holds an appointment
    Appointment,
}

/// Ticket status
///
/// `waiting → serving → {completed, no_show}`, `waiting → cancelled` and
/// `serving → cancelled`. Everything else is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// In a lane, waiting to be called
    Waiting,
    /// Claimed by a desk
    Serving,
    /// Served; an evaluation is owed
    Completed,
    /// Cancelled by the customer, staff or the expiry sweep
    Cancelled,
    /// Called but never showed up
    NoShow,
}

impl TicketStatus {
    /// Waiting or serving
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::Serving)
    }

    /// Completed, cancelled or no-show
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Whether the state machine allows `self → next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Serving | Self::Cancelled)
                | (Self::Serving, Self::Completed | Self::NoShow | Self::Cancelled)
        )
    }

    /// Metric/log label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Serving => "serving",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a ticket was cancelled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum CancelReason {
    /// Requested by the customer or staff, with their stated reason
    Requested(String),
    /// Still open after local midnight of its office-day
    Expired,
}

impl CancelReason {
    /// Whether a person asked for the cancellation
    #[must_use]
    pub const fn is_requested(&self) -> bool {
        matches!(self, Self::Requested(_))
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested(reason) => f.write_str(reason),
            Self::Expired => f.write_str("expired"),
        }
    }
}

/// Desk claim; desk and claim time are always set together
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Desk serving the ticket
    pub desk_id: DeskId,
    /// When the desk called the ticket
    pub at: DateTime<Utc>,
}

/// Post-service evaluation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// 1 (poor) to 5 (excellent)
    pub rating: u8,
    /// Free-form comment
    pub comment: Option<String>,
    /// When the customer submitted it
    pub submitted_at: DateTime<Utc>,
}

impl Evaluation {
    /// Lowest accepted rating
    pub const MIN_RATING: u8 = 1;
    /// Highest accepted rating
    pub const MAX_RATING: u8 = 5;
}

/// Human-readable ticket number: lane prefix plus zero-padded daily sequence
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketNumber {
    /// Lane prefix (e.g. `R`)
    pub prefix: String,
    /// Per office-day sequence, starting at 1
    pub sequence: u32,
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", self.prefix, self.sequence)
    }
}

/// A queue ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Display number (unique per office-day)
    pub number: TicketNumber,
    /// Office that issued the ticket
    pub office: OfficeId,
    /// Local calendar day of issuance; the ticket is only valid that day
    pub office_day: NaiveDate,
    /// Service requested
    pub service: ServiceId,
    /// Lane the ticket waits in
    pub lane: LaneId,
    /// Priority tier
    pub tier: PriorityTier,
    /// Customer holding the ticket
    pub customer_id: CustomerId,
    /// Walk-in or appointment
    pub customer_type: CustomerType,
    /// Current status
    pub status: TicketStatus,
    /// When issued
    pub created_at: DateTime<Utc>,
    /// Desk claim, present from `serving` onwards
    pub claim: Option<Claim>,
    /// When service completed
    pub completed_at: Option<DateTime<Utc>>,
    /// When the ticket reached a terminal status
    pub closed_at: Option<DateTime<Utc>>,
    /// Set when cancelled
    pub cancel_reason: Option<CancelReason>,
    /// Submitted post-service evaluation
    pub evaluation: Option<Evaluation>,
    /// Set once moved out of the hot set
    pub archived_at: Option<DateTime<Utc>>,
    /// Incremented on every change; storage ignores stale snapshots
    pub version: u64,
}

impl Ticket {
    /// Waiting or serving
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Completed without a submitted evaluation
    #[must_use]
    pub const fn owes_evaluation(&self) -> bool {
        matches!(self.status, TicketStatus::Completed) && self.evaluation.is_none()
    }

    /// Desk currently (or last) serving the ticket
    #[must_use]
    pub fn desk_id(&self) -> Option<&DeskId> {
        self.claim.as_ref().map(|c| &c.desk_id)
    }

    /// When a desk claimed the ticket
    #[must_use]
    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claim.as_ref().map(|c| c.at)
    }
}

/// Request to issue a ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    /// Customer asking for the ticket
    pub customer_id: CustomerId,
    /// Office
    pub office: OfficeId,
    /// Service requested
    pub service: ServiceId,
    /// Lane chosen
    pub lane: LaneId,
    /// Requested tier
    pub tier: PriorityTier,
    /// Walk-in or appointment
    pub customer_type: CustomerType,
    /// Customer profile used by the eligibility rules
    pub profile: CustomerProfile,
}

impl IssueRequest {
    /// Regular-tier walk-in request with an empty profile
    #[must_use]
    pub fn walk_in(
        customer_id: impl Into<CustomerId>,
        office: impl Into<OfficeId>,
        service: impl Into<ServiceId>,
        lane: impl Into<LaneId>,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            office: office.into(),
            service: service.into(),
            lane: lane.into(),
            tier: PriorityTier::Regular,
            customer_type: CustomerType::WalkIn,
            profile: CustomerProfile::default(),
        }
    }

    /// Request a tier
    #[must_use]
    pub const fn with_tier(mut self, tier: PriorityTier) -> Self {
        self.tier = tier;
        self
    }

    /// Attach the customer's profile
    #[must_use]
    pub fn with_profile(mut self, profile: CustomerProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Mark the request as an appointment
    #[must_use]
    pub const fn by_appointment(mut self) -> Self {
        self.customer_type = CustomerType::Appointment;
        self
    }
}

// ============================================================================
// Office directory
// ============================================================================

/// Operating status of an office or lane
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Issuing tickets
    Active,
    /// Closed for issuance
    Maintenance,
}

/// A service office
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Office {
    /// Office code
    pub id: OfficeId,
    /// Display name
    pub name: String,
    /// Offset of the office's local time from UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Operating status
    pub status: ServiceStatus,
}

impl Office {
    /// An active office
    #[must_use]
    pub fn new(id: impl Into<OfficeId>, name: impl Into<String>, utc_offset_minutes: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            utc_offset_minutes,
            status: ServiceStatus::Active,
        }
    }

    /// Local calendar day at `at`
    #[must_use]
    pub fn local_day(&self, at: DateTime<Utc>) -> NaiveDate {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).map_or_else(
            || at.date_naive(),
            |offset| at.with_timezone(&offset).date_naive(),
        )
    }
}

/// Eligibility rule of a lane
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LaneKind {
    /// Anyone may queue
    All,
    /// Requires a verified priority credential
    Priority,
    /// Optionally restricted by profile attributes
    Regular {
        /// Attribute name to accepted values; every listed attribute must match.
        /// Empty means unrestricted.
        allow_list: BTreeMap<String, BTreeSet<String>>,
    },
}

/// A named queue partition with an eligibility rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lane {
    /// Lane code
    pub id: LaneId,
    /// Owning office
    pub office: OfficeId,
    /// Display name
    pub name: String,
    /// Ticket number prefix
    pub prefix: String,
    /// Eligibility rule
    pub kind: LaneKind,
    /// Operating status
    pub status: ServiceStatus,
}

impl Lane {
    /// An active lane
    #[must_use]
    pub fn new(
        id: impl Into<LaneId>,
        office: impl Into<OfficeId>,
        name: impl Into<String>,
        prefix: impl Into<String>,
        kind: LaneKind,
    ) -> Self {
        Self {
            id: id.into(),
            office: office.into(),
            name: name.into(),
            prefix: prefix.into(),
            kind,
            status: ServiceStatus::Active,
        }
    }
}

/// Desk availability
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeskStatus {
    /// Open for calls
    Active,
    /// Temporarily away
    Break,
    /// Closed
    Inactive,
}

/// A serving position
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Desk {
    /// Desk code
    pub id: DeskId,
    /// Owning office
    pub office: OfficeId,
    /// Lanes this desk calls from
    pub lanes: Vec<LaneId>,
    /// Staff member currently at the desk
    pub assigned_staff: Option<StaffId>,
    /// Availability
    pub status: DeskStatus,
    /// Ticket being served; only set while `status` is active
    pub current_ticket: Option<TicketId>,
}

impl Desk {
    /// An active, unstaffed desk bound to `lanes`
    #[must_use]
    pub fn new(id: impl Into<DeskId>, office: impl Into<OfficeId>, lanes: Vec<LaneId>) -> Self {
        Self {
            id: id.into(),
            office: office.into(),
            lanes,
            assigned_staff: None,
            status: DeskStatus::Active,
            current_ticket: None,
        }
    }

    /// Builder-style staff assignment
    #[must_use]
    pub fn staffed_by(mut self, staff: impl Into<StaffId>) -> Self {
        self.assigned_staff = Some(staff.into());
        self
    }

    /// Whether the desk calls from `lane`
    #[must_use]
    pub fn serves(&self, lane: &LaneId) -> bool {
        self.lanes.contains(lane)
    }
}

// ============================================================================
// Customers
// ============================================================================

/// Customer data consulted by lane eligibility rules
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    /// Whether a priority credential on file has been verified by staff
    pub verified_priority_credential: bool,
    /// Profile attributes (e.g. `program`, `year`)
    pub attributes: BTreeMap<String, String>,
}

impl CustomerProfile {
    /// Builder-style attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder-style verified priority credential
    #[must_use]
    pub const fn with_verified_priority(mut self) -> Self {
        self.verified_priority_credential = true;
        self
    }
}

/// Per-customer queue facts derived from ticket history
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerQueueState {
    /// Ticket in `waiting` or `serving`
    pub active_ticket: Option<TicketId>,
    /// Completed ticket without a submitted evaluation
    pub pending_evaluation: Option<TicketId>,
}

impl CustomerQueueState {
    /// Derive the state from a customer's tickets
    pub fn derive<'a>(tickets: impl IntoIterator<Item = &'a Ticket>) -> Self {
        let mut state = Self::default();
        for ticket in tickets {
            if ticket.is_active() {
                state.active_ticket = Some(ticket.id);
            } else if ticket.owes_evaluation() {
                state.pending_evaluation = Some(ticket.id);
            }
        }
        state
    }
}

// ============================================================================
// Events and read models
// ============================================================================

/// A ticket status transition, published after every change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketEvent {
    /// Ticket ID
    pub ticket_id: TicketId,
    /// Customer holding the ticket
    pub customer_id: CustomerId,
    /// Office
    pub office: OfficeId,
    /// Lane
    pub lane: LaneId,
    /// Previous status; `None` on issuance
    pub from: Option<TicketStatus>,
    /// New status
    pub to: TicketStatus,
    /// When the transition happened
    pub at: DateTime<Utc>,
    /// Set for cancellations
    pub cancel_reason: Option<CancelReason>,
}

impl TicketEvent {
    /// Event describing `ticket`'s latest transition from `from`
    #[must_use]
    pub fn transition(ticket: &Ticket, from: Option<TicketStatus>, at: DateTime<Utc>) -> Self {
        Self {
            ticket_id: ticket.id,
            customer_id: ticket.customer_id.clone(),
            office: ticket.office.clone(),
            lane: ticket.lane.clone(),
            from,
            to: ticket.status,
            at,
            cancel_reason: ticket.cancel_reason.clone(),
        }
    }
}

/// One waiting ticket on a lane display board
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingEntry {
    /// 1-based position
    pub position: usize,
    /// Ticket ID
    pub ticket_id: TicketId,
    /// Display number
    pub number: String,
    /// Tier
    pub tier: PriorityTier,
    /// When issued
    pub created_at: DateTime<Utc>,
}

/// Waiting tickets of a lane in serving order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneSnapshot {
    /// Lane
    pub lane: LaneId,
    /// Lane status
    pub status: ServiceStatus,
    /// Tickets in the order they will be called
    pub waiting: Vec<WaitingEntry>,
}

// ============================================================================
// Staff
// ============================================================================

/// Staff role
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Desk staff
    Staff,
    /// Administrator of one office
    OfficeAdmin,
    /// Administrator of every office
    SuperAdmin,
}

impl Role {
    /// May change the status of violations
    #[must_use]
    pub const fn can_administer_violations(self) -> bool {
        matches!(self, Self::OfficeAdmin | Self::SuperAdmin)
    }
}

/// Staff member performing an administrative action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Who
    pub staff_id: StaffId,
    /// With which role
    pub role: Role,
}

impl Actor {
    /// Build an actor
    #[must_use]
    pub fn new(staff_id: impl Into<StaffId>, role: Role) -> Self {
        Self {
            staff_id: staff_id.into(),
            role,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn state_machine_only_moves_forward() {
        use TicketStatus::{Cancelled, Completed, NoShow, Serving, Waiting};

        assert!(Waiting.can_transition_to(Serving));
        assert!(Waiting.can_transition_to(Cancelled));
        assert!(Serving.can_transition_to(Completed));
        assert!(Serving.can_transition_to(NoShow));
        assert!(Serving.can_transition_to(Cancelled));

        assert!(!Waiting.can_transition_to(Completed));
        assert!(!Waiting.can_transition_to(NoShow));
        assert!(!Serving.can_transition_to(Waiting));
        for terminal in [Completed, Cancelled, NoShow] {
            for next in [Waiting, Serving, Completed, Cancelled, NoShow] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn ticket_number_is_zero_padded() {
        let number = TicketNumber {
            prefix: "R".to_string(),
            sequence: 7,
        };
        assert_eq!(number.to_string(), "R-007");
    }

    #[test]
    fn local_day_follows_office_offset() {
        let office = Office::new("manila", "Manila", 8 * 60);
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 17, 0, 0).unwrap();
        assert_eq!(office.local_day(at), NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());

        let utc_office = Office::new("hq", "HQ", 0);
        assert_eq!(utc_office.local_day(at), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn tiers_drain_highest_first() {
        let ranks: Vec<u8> = PriorityTier::SERVICE_ORDER.iter().map(|t| t.rank()).collect();
        assert_eq!(ranks, vec![2, 1, 0]);
        for tier in PriorityTier::SERVICE_ORDER {
            assert_eq!(PriorityTier::SERVICE_ORDER[tier.service_slot()], tier);
        }
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let id = OfficeId::new("registrar");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"registrar\"");
        assert!(CustomerId::new("  ").is_blank());
    }
}
