//! Storage collaborator interfaces.
//!
//! The queue keeps its working set in memory and writes every change through
//! these traits. Implementations must provide:
//!
//! - tickets keyed by id, with secondary indexes on `(office, status)`,
//!   `(office, lane, status)` and `(customer, status)`
//! - violations keyed by id, indexed on `status` and `user_id`
//! - a per office-day sequence row that only moves forward
//!
//! Every write is a full snapshot and idempotent: writing the same ticket
//! twice, or an older version after a newer one, leaves the newer version in
//! place. That is what makes the repair pass safe to repeat.
//!
//! Traits return [`BoxFuture`] so they stay object-safe behind `Arc<dyn _>`.

use crate::aggregates::violation::{LoginAttemptWindow, Violation, ViolationFilter};
use crate::error::StorageError;
use crate::types::{CredentialId, CustomerId, LaneId, OfficeId, Ticket, TicketId, TicketStatus};
use chrono::NaiveDate;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

mod memory;

pub use memory::InMemoryRepository;

/// Result of a conditional ticket write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The snapshot was stored
    Written,
    /// A newer version was already stored; nothing changed
    Stale,
}

/// Highest sequence handed out for an office-day
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySequence {
    /// Office
    pub office: OfficeId,
    /// Local calendar day
    pub day: NaiveDate,
    /// Last allocated sequence
    pub last: u32,
}

/// Ticket search; every set field narrows the result (logical AND)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TicketQuery {
    /// Issuing office
    pub office: Option<OfficeId>,
    /// Lane
    pub lane: Option<LaneId>,
    /// Accepted statuses; empty means any
    pub statuses: Vec<TicketStatus>,
    /// Ticket holder
    pub customer: Option<CustomerId>,
    /// Include archived tickets
    pub include_archived: bool,
}

impl TicketQuery {
    /// Tickets of an office
    #[must_use]
    pub fn office(office: impl Into<OfficeId>) -> Self {
        Self {
            office: Some(office.into()),
            ..Self::default()
        }
    }

    /// Tickets of a customer
    #[must_use]
    pub fn customer(customer: impl Into<CustomerId>) -> Self {
        Self {
            customer: Some(customer.into()),
            ..Self::default()
        }
    }

    /// Tickets in any of `statuses`
    #[must_use]
    pub fn statuses(statuses: impl IntoIterator<Item = TicketStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Narrow to a lane
    #[must_use]
    pub fn in_lane(mut self, lane: impl Into<LaneId>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    /// Narrow to a status (may be called repeatedly)
    #[must_use]
    pub fn with_status(mut self, status: TicketStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Also return archived tickets
    #[must_use]
    pub const fn including_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    /// Whether a ticket satisfies the query
    #[must_use]
    pub fn matches(&self, ticket: &Ticket) -> bool {
        self.office.as_ref().is_none_or(|o| *o == ticket.office)
            && self.lane.as_ref().is_none_or(|l| *l == ticket.lane)
            && self.customer.as_ref().is_none_or(|c| *c == ticket.customer_id)
            && (self.statuses.is_empty() || self.statuses.contains(&ticket.status))
            && (self.include_archived || ticket.archived_at.is_none())
    }
}

/// Durable store of tickets and daily sequences
pub trait TicketRepository: Send + Sync {
    /// Store a ticket snapshot unless a newer version is already stored
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    fn upsert_ticket(&self, ticket: Ticket) -> BoxFuture<'_, Result<WriteOutcome, StorageError>>;

    /// Load one ticket
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or the document is corrupt.
    fn get_ticket(&self, id: TicketId) -> BoxFuture<'_, Result<Option<Ticket>, StorageError>>;

    /// Search tickets through the secondary indexes
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or a document is corrupt.
    fn find_tickets(&self, query: TicketQuery) -> BoxFuture<'_, Result<Vec<Ticket>, StorageError>>;

    /// Raise the stored sequence of an office-day to at least `sequence`
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    fn advance_sequence(
        &self,
        office: OfficeId,
        day: NaiveDate,
        sequence: u32,
    ) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Every stored office-day sequence
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    fn load_sequences(&self) -> BoxFuture<'_, Result<Vec<DailySequence>, StorageError>>;
}

/// Durable store of violations and login attempt windows
pub trait ViolationRepository: Send + Sync {
    /// Insert or replace a violation
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    fn upsert_violation(&self, violation: Violation) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Violations matching `filter`, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or a document is corrupt.
    fn list_violations(
        &self,
        filter: ViolationFilter,
    ) -> BoxFuture<'_, Result<Vec<Violation>, StorageError>>;

    /// Insert or replace the attempt window of a credential
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    fn upsert_login_window(
        &self,
        credential: CredentialId,
        window: LoginAttemptWindow,
    ) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Every stored attempt window
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or a document is corrupt.
    fn load_login_windows(
        &self,
    ) -> BoxFuture<'_, Result<Vec<(CredentialId, LoginAttemptWindow)>, StorageError>>;
}
