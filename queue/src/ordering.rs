//! Per-lane ordering of waiting tickets.
//!
//! Each lane keeps one ordered map per tier, drained `vip` → `priority` →
//! `regular`. Within a tier tickets are keyed by `(created_at, insertion)`, so
//! FIFO holds even for tickets issued in the same instant. Removing a ticket
//! never disturbs the relative order of the rest.
//!
//! The structure is owned by the lifecycle state and only mutated under the
//! store's write lock.

use crate::types::{LaneId, PriorityTier, Ticket, TicketId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

type Key = (DateTime<Utc>, u64);

#[derive(Clone, Debug, Default)]
struct LaneQueue {
    tiers: [BTreeMap<Key, TicketId>; 3],
}

impl LaneQueue {
    fn len(&self) -> usize {
        self.tiers.iter().map(BTreeMap::len).sum()
    }

    fn head(&self) -> Option<(PriorityTier, Key, TicketId)> {
        PriorityTier::SERVICE_ORDER.into_iter().find_map(|tier| {
            self.tiers[tier.service_slot()]
                .first_key_value()
                .map(|(key, id)| (tier, *key, *id))
        })
    }

    fn iter(&self) -> impl Iterator<Item = (PriorityTier, &Key, &TicketId)> {
        PriorityTier::SERVICE_ORDER.into_iter().flat_map(move |tier| {
            self.tiers[tier.service_slot()]
                .iter()
                .map(move |(key, id)| (tier, key, id))
        })
    }
}

#[derive(Clone, Debug)]
struct Slot {
    lane: LaneId,
    tier: PriorityTier,
    key: Key,
}

/// Head of a lane: the ticket that would be served next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaneHead {
    /// Ticket
    pub ticket_id: TicketId,
    /// Its tier
    pub tier: PriorityTier,
    /// When it was issued
    pub created_at: DateTime<Utc>,
}

/// Waiting tickets of every lane, in serving order
#[derive(Clone, Debug, Default)]
pub struct QueueOrdering {
    lanes: HashMap<LaneId, LaneQueue>,
    index: HashMap<TicketId, Slot>,
    next_insertion: u64,
}

impl QueueOrdering {
    /// Empty ordering
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a waiting ticket at its tier/FIFO position
    ///
    /// Returns `false` if the ticket is already queued.
    pub fn enqueue(&mut self, ticket: &Ticket) -> bool {
        if self.index.contains_key(&ticket.id) {
            return false;
        }

        let key = (ticket.created_at, self.next_insertion);
        self.next_insertion += 1;

        self.lanes.entry(ticket.lane.clone()).or_default().tiers[ticket.tier.service_slot()]
            .insert(key, ticket.id);
        self.index.insert(
            ticket.id,
            Slot {
                lane: ticket.lane.clone(),
                tier: ticket.tier,
                key,
            },
        );
        true
    }

    /// Next ticket to serve in `lane`, without removing it
    #[must_use]
    pub fn peek_next(&self, lane: &LaneId) -> Option<TicketId> {
        self.head(lane).map(|head| head.ticket_id)
    }

    /// Next ticket to serve in `lane` with its ordering keys
    #[must_use]
    pub fn head(&self, lane: &LaneId) -> Option<LaneHead> {
        self.lanes
            .get(lane)
            .and_then(LaneQueue::head)
            .map(|(tier, (created_at, _), ticket_id)| LaneHead {
                ticket_id,
                tier,
                created_at,
            })
    }

    /// Remove a ticket from its lane
    ///
    /// Returns `false` if it was not queued.
    pub fn remove(&mut self, ticket_id: &TicketId) -> bool {
        let Some(slot) = self.index.remove(ticket_id) else {
            return false;
        };

        if let Some(queue) = self.lanes.get_mut(&slot.lane) {
            queue.tiers[slot.tier.service_slot()].remove(&slot.key);
            if queue.len() == 0 {
                self.lanes.remove(&slot.lane);
            }
        }
        true
    }

    /// 1-based position of a ticket in its lane's serving order
    ///
    /// Computed from the current contents on every call.
    #[must_use]
    pub fn position(&self, ticket_id: &TicketId) -> Option<usize> {
        let slot = self.index.get(ticket_id)?;
        let queue = self.lanes.get(&slot.lane)?;
        let own = slot.tier.service_slot();

        let ahead_in_higher_tiers: usize = queue.tiers[..own].iter().map(BTreeMap::len).sum();
        let ahead_in_tier = queue.tiers[own].range(..slot.key).count();

        Some(ahead_in_higher_tiers + ahead_in_tier + 1)
    }

    /// Waiting tickets of `lane` in serving order
    #[must_use]
    pub fn waiting(&self, lane: &LaneId) -> Vec<TicketId> {
        self.lanes
            .get(lane)
            .map(|queue| queue.iter().map(|(_, _, id)| *id).collect())
            .unwrap_or_default()
    }

    /// Number of waiting tickets in `lane`
    #[must_use]
    pub fn len(&self, lane: &LaneId) -> usize {
        self.lanes.get(lane).map_or(0, LaneQueue::len)
    }

    /// Waiting tickets across all lanes
    #[must_use]
    pub fn total_waiting(&self) -> usize {
        self.index.len()
    }

    /// Whether no ticket is waiting anywhere
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether the ticket is queued
    #[must_use]
    pub fn contains(&self, ticket_id: &TicketId) -> bool {
        self.index.contains_key(ticket_id)
    }

    /// Lane a queued ticket waits in
    #[must_use]
    pub fn lane_of(&self, ticket_id: &TicketId) -> Option<&LaneId> {
        self.index.get(ticket_id).map(|slot| &slot.lane)
    }
}
