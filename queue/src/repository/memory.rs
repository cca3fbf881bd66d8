//! In-memory repository.
//!
//! Documents are stored as JSON so that every read and write crosses the same
//! serialization boundary a real backend would. Secondary indexes mirror the
//! ones a relational schema would declare. Writes and reads can be made to
//! fail on demand, which the repair and retry tests rely on.

use super::{DailySequence, TicketQuery, TicketRepository, ViolationRepository, WriteOutcome};
use crate::aggregates::violation::{
    LoginAttemptWindow, Violation, ViolationFilter, ViolationId, ViolationStatus,
};
use crate::error::StorageError;
use crate::types::{CredentialId, CustomerId, LaneId, OfficeId, Ticket, TicketId, TicketStatus, UserId};
use chrono::NaiveDate;
use futures::future::BoxFuture;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
struct TicketTable {
    docs: HashMap<TicketId, (u64, TicketStatus, String)>,
    by_office_status: HashMap<(OfficeId, TicketStatus), BTreeSet<TicketId>>,
    by_lane_status: HashMap<(OfficeId, LaneId, TicketStatus), BTreeSet<TicketId>>,
    by_customer_status: HashMap<(CustomerId, TicketStatus), BTreeSet<TicketId>>,
}

impl TicketTable {
    fn unindex(&mut self, ticket: &Ticket, status: TicketStatus) {
        if let Some(ids) = self.by_office_status.get_mut(&(ticket.office.clone(), status)) {
            ids.remove(&ticket.id);
        }
        if let Some(ids) =
            self.by_lane_status
                .get_mut(&(ticket.office.clone(), ticket.lane.clone(), status))
        {
            ids.remove(&ticket.id);
        }
        if let Some(ids) = self
            .by_customer_status
            .get_mut(&(ticket.customer_id.clone(), status))
        {
            ids.remove(&ticket.id);
        }
    }

    fn index(&mut self, ticket: &Ticket) {
        self.by_office_status
            .entry((ticket.office.clone(), ticket.status))
            .or_default()
            .insert(ticket.id);
        self.by_lane_status
            .entry((ticket.office.clone(), ticket.lane.clone(), ticket.status))
            .or_default()
            .insert(ticket.id);
        self.by_customer_status
            .entry((ticket.customer_id.clone(), ticket.status))
            .or_default()
            .insert(ticket.id);
    }

    /// Candidate ids from the most selective index the query allows
    fn candidates(&self, query: &TicketQuery) -> Vec<TicketId> {
        let statuses = &query.statuses;
        let collect = |sets: Vec<Option<&BTreeSet<TicketId>>>| -> Vec<TicketId> {
            sets.into_iter().flatten().flatten().copied().collect()
        };

        if statuses.is_empty() {
            return self.docs.keys().copied().collect();
        }
        if let Some(customer) = &query.customer {
            return collect(
                statuses
                    .iter()
                    .map(|s| self.by_customer_status.get(&(customer.clone(), *s)))
                    .collect(),
            );
        }
        match (&query.office, &query.lane) {
            (Some(office), Some(lane)) => collect(
                statuses
                    .iter()
                    .map(|s| self.by_lane_status.get(&(office.clone(), lane.clone(), *s)))
                    .collect(),
            ),
            (Some(office), None) => collect(
                statuses
                    .iter()
                    .map(|s| self.by_office_status.get(&(office.clone(), *s)))
                    .collect(),
            ),
            _ => self
                .docs
                .iter()
                .filter(|(_, (_, status, _))| statuses.contains(status))
                .map(|(id, _)| *id)
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct ViolationTable {
    docs: HashMap<ViolationId, String>,
    by_status: HashMap<ViolationStatus, BTreeSet<ViolationId>>,
    by_user: HashMap<UserId, BTreeSet<ViolationId>>,
}

#[derive(Debug, Default)]
struct Inner {
    tickets: RwLock<TicketTable>,
    violations: RwLock<ViolationTable>,
    sequences: RwLock<HashMap<(OfficeId, NaiveDate), u32>>,
    login_windows: RwLock<HashMap<CredentialId, String>>,
    fail_writes: AtomicBool,
    failing_reads: AtomicUsize,
    ticket_writes: AtomicUsize,
}

/// Repository backed by process memory
///
/// Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRepository {
    inner: Arc<Inner>,
}

impl InMemoryRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched off
    pub fn fail_writes(&self, enabled: bool) {
        self.inner.fail_writes.store(enabled, Ordering::SeqCst);
    }

    /// Make the next `count` reads fail
    pub fn fail_reads(&self, count: usize) {
        self.inner.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Ticket snapshots accepted so far
    #[must_use]
    pub fn ticket_writes(&self) -> usize {
        self.inner.ticket_writes.load(Ordering::SeqCst)
    }

    /// Number of stored tickets
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.inner
            .tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .docs
            .len()
    }

    fn check_write(&self) -> Result<(), StorageError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), StorageError> {
        let failed = self
            .inner
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StorageError::Unavailable("read timed out".to_string()));
        }
        Ok(())
    }

    fn store_ticket(&self, ticket: &Ticket) -> Result<WriteOutcome, StorageError> {
        self.check_write()?;
        let doc = serde_json::to_string(ticket)?;
        let mut table = self
            .inner
            .tickets
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let previous = table
            .docs
            .get(&ticket.id)
            .map(|(version, status, _)| (*version, *status));
        if let Some((version, status)) = previous {
            if version > ticket.version {
                return Ok(WriteOutcome::Stale);
            }
            table.unindex(ticket, status);
        }
        table.index(ticket);
        table
            .docs
            .insert(ticket.id, (ticket.version, ticket.status, doc));
        self.inner.ticket_writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Written)
    }

    fn load_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StorageError> {
        self.check_read()?;
        let table = self
            .inner
            .tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        table
            .docs
            .get(&id)
            .map(|(_, _, doc)| serde_json::from_str(doc))
            .transpose()
            .map_err(StorageError::from)
    }

    fn query_tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StorageError> {
        self.check_read()?;
        let table = self
            .inner
            .tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut found = Vec::new();
        for id in table.candidates(query) {
            if let Some((_, _, doc)) = table.docs.get(&id) {
                let ticket: Ticket = serde_json::from_str(doc)?;
                if query.matches(&ticket) {
                    found.push(ticket);
                }
            }
        }
        found.sort_by_key(|t| (t.created_at, t.id));
        Ok(found)
    }

    fn store_violation(&self, violation: &Violation) -> Result<(), StorageError> {
        self.check_write()?;
        let doc = serde_json::to_string(violation)?;
        let mut table = self
            .inner
            .violations
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for ids in table.by_status.values_mut() {
            ids.remove(&violation.id);
        }
        table
            .by_status
            .entry(violation.status)
            .or_default()
            .insert(violation.id);
        table
            .by_user
            .entry(violation.user_id.clone())
            .or_default()
            .insert(violation.id);
        table.docs.insert(violation.id, doc);
        Ok(())
    }

    fn query_violations(&self, filter: &ViolationFilter) -> Result<Vec<Violation>, StorageError> {
        self.check_read()?;
        let table = self
            .inner
            .violations
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let candidates: Vec<ViolationId> = match (&filter.user_id, filter.status) {
            (Some(user), _) => table
                .by_user
                .get(user)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            (None, Some(status)) => table
                .by_status
                .get(&status)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            (None, None) => table.docs.keys().copied().collect(),
        };

        let mut found = Vec::new();
        for id in candidates {
            if let Some(doc) = table.docs.get(&id) {
                let violation: Violation = serde_json::from_str(doc)?;
                if filter.matches(&violation) {
                    found.push(violation);
                }
            }
        }
        found.sort_by_key(|v| (v.created_at, v.id));
        Ok(found)
    }

    fn bump_sequence(&self, office: OfficeId, day: NaiveDate, sequence: u32) -> Result<(), StorageError> {
        self.check_write()?;
        let mut sequences = self
            .inner
            .sequences
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let last = sequences.entry((office, day)).or_insert(0);
        *last = (*last).max(sequence);
        Ok(())
    }

    fn sequences(&self) -> Result<Vec<DailySequence>, StorageError> {
        self.check_read()?;
        let sequences = self
            .inner
            .sequences
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(sequences
            .iter()
            .map(|((office, day), last)| DailySequence {
                office: office.clone(),
                day: *day,
                last: *last,
            })
            .collect())
    }

    fn store_login_window(
        &self,
        credential: CredentialId,
        window: &LoginAttemptWindow,
    ) -> Result<(), StorageError> {
        self.check_write()?;
        let doc = serde_json::to_string(window)?;
        self.inner
            .login_windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credential, doc);
        Ok(())
    }

    fn login_windows(&self) -> Result<Vec<(CredentialId, LoginAttemptWindow)>, StorageError> {
        self.check_read()?;
        let windows = self
            .inner
            .login_windows
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut loaded = Vec::with_capacity(windows.len());
        for (credential, doc) in windows.iter() {
            loaded.push((credential.clone(), serde_json::from_str(doc)?));
        }
        Ok(loaded)
    }
}

impl TicketRepository for InMemoryRepository {
    fn upsert_ticket(&self, ticket: Ticket) -> BoxFuture<'_, Result<WriteOutcome, StorageError>> {
        Box::pin(async move { self.store_ticket(&ticket) })
    }

    fn get_ticket(&self, id: TicketId) -> BoxFuture<'_, Result<Option<Ticket>, StorageError>> {
        Box::pin(async move { self.load_ticket(id) })
    }

    fn find_tickets(&self, query: TicketQuery) -> BoxFuture<'_, Result<Vec<Ticket>, StorageError>> {
        Box::pin(async move { self.query_tickets(&query) })
    }

    fn advance_sequence(
        &self,
        office: OfficeId,
        day: NaiveDate,
        sequence: u32,
    ) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move { self.bump_sequence(office, day, sequence) })
    }

    fn load_sequences(&self) -> BoxFuture<'_, Result<Vec<DailySequence>, StorageError>> {
        Box::pin(async move { self.sequences() })
    }
}

impl ViolationRepository for InMemoryRepository {
    fn upsert_violation(&self, violation: Violation) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move { self.store_violation(&violation) })
    }

    fn list_violations(
        &self,
        filter: ViolationFilter,
    ) -> BoxFuture<'_, Result<Vec<Violation>, StorageError>> {
        Box::pin(async move { self.query_violations(&filter) })
    }

    fn upsert_login_window(
        &self,
        credential: CredentialId,
        window: LoginAttemptWindow,
    ) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move { self.store_login_window(credential, &window) })
    }

    fn load_login_windows(
        &self,
    ) -> BoxFuture<'_, Result<Vec<(CredentialId, LoginAttemptWindow)>, StorageError>> {
        Box::pin(async move { self.login_windows() })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregates::violation::{Severity, ViolationCategory, ViolationSource};
    use crate::types::{CustomerType, PriorityTier, ServiceId, TicketNumber};
    use walkin_testing::test_instant;

    fn ticket(customer: &str, lane: &str) -> Ticket {
        Ticket {
            id: TicketId::new(),
            number: TicketNumber {
                prefix: "R".into(),
                sequence: 1,
            },
            office: OfficeId::new("main"),
            office_day: test_instant().date_naive(),
            service: ServiceId::new("svc"),
            lane: LaneId::new(lane),
            tier: PriorityTier::Regular,
            customer_id: CustomerId::new(customer),
            customer_type: CustomerType::WalkIn,
            status: TicketStatus::Waiting,
            created_at: test_instant(),
            claim: None,
            completed_at: None,
            closed_at: None,
            cancel_reason: None,
            evaluation: None,
            archived_at: None,
            version: 1,
        }
    }

    #[tokio::test]
    async fn older_version_never_overwrites_newer() {
        let repo = InMemoryRepository::new();
        let mut t = ticket("c1", "a");
        let v1 = t.clone();
        t.status = TicketStatus::Serving;
        t.version = 2;

        assert_eq!(repo.upsert_ticket(t.clone()).await.unwrap(), WriteOutcome::Written);
        assert_eq!(repo.upsert_ticket(v1).await.unwrap(), WriteOutcome::Stale);
        assert_eq!(repo.upsert_ticket(t.clone()).await.unwrap(), WriteOutcome::Written);

        let stored = repo.get_ticket(t.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Serving);
        assert_eq!(repo.ticket_count(), 1);
    }

    #[tokio::test]
    async fn status_change_moves_ticket_between_indexes() {
        let repo = InMemoryRepository::new();
        let mut t = ticket("c1", "a");
        repo.upsert_ticket(t.clone()).await.unwrap();
        t.status = TicketStatus::Cancelled;
        t.version = 2;
        repo.upsert_ticket(t.clone()).await.unwrap();

        let waiting = repo
            .find_tickets(TicketQuery::office("main").with_status(TicketStatus::Waiting))
            .await
            .unwrap();
        assert!(waiting.is_empty());

        let cancelled = repo
            .find_tickets(TicketQuery::customer("c1").with_status(TicketStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 1);
    }

    #[tokio::test]
    async fn lane_query_narrows_results() {
        let repo = InMemoryRepository::new();
        repo.upsert_ticket(ticket("c1", "a")).await.unwrap();
        repo.upsert_ticket(ticket("c2", "b")).await.unwrap();

        let lane_a = repo
            .find_tickets(
                TicketQuery::office("main")
                    .in_lane("a")
                    .with_status(TicketStatus::Waiting),
            )
            .await
            .unwrap();
        assert_eq!(lane_a.len(), 1);
        assert_eq!(lane_a[0].customer_id, CustomerId::new("c1"));
        assert_eq!(repo.find_tickets(TicketQuery::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sequences_only_move_forward() {
        let repo = InMemoryRepository::new();
        let day = test_instant().date_naive();
        repo.advance_sequence(OfficeId::new("main"), day, 5).await.unwrap();
        repo.advance_sequence(OfficeId::new("main"), day, 3).await.unwrap();

        let sequences = repo.load_sequences().await.unwrap();
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].last, 5);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_unavailable() {
        let repo = InMemoryRepository::new();
        repo.fail_writes(true);
        let err = repo.upsert_ticket(ticket("c1", "a")).await.unwrap_err();
        assert!(err.is_transient());
        repo.fail_writes(false);

        repo.fail_reads(1);
        assert!(repo.get_ticket(TicketId::new()).await.is_err());
        assert!(repo.get_ticket(TicketId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn violations_are_listed_oldest_first_with_filters() {
        let repo = InMemoryRepository::new();
        for (minutes, user, status) in [
            (10, "u1", ViolationStatus::Active),
            (0, "u1", ViolationStatus::Resolved),
            (5, "u2", ViolationStatus::Active),
        ] {
            repo.upsert_violation(Violation {
                id: ViolationId::new(),
                user_id: UserId::new(user),
                category: ViolationCategory::Abuse,
                severity: Severity::Medium,
                status,
                evidence: Vec::new(),
                source: ViolationSource::Detector,
                notes: None,
                created_at: test_instant() + chrono::Duration::minutes(minutes),
                resolved_at: None,
                resolved_by: None,
            })
            .await
            .unwrap();
        }

        let all = repo.list_violations(ViolationFilter::all()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let active_u1 = repo
            .list_violations(
                ViolationFilter::all()
                    .for_user("u1")
                    .with_status(ViolationStatus::Active),
            )
            .await
            .unwrap();
        assert_eq!(active_u1.len(), 1);
    }
}
