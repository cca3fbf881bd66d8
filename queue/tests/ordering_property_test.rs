//! Serving order properties of `QueueOrdering`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use proptest::prelude::*;
use walkin_queue::ordering::QueueOrdering;
use walkin_queue::{
    CustomerId, CustomerType, LaneId, OfficeId, PriorityTier, ServiceId, Ticket, TicketId,
    TicketNumber, TicketStatus,
};
use walkin_testing::test_instant;

fn ticket(sequence: u32, lane: &str, tier: PriorityTier, offset_secs: i64) -> Ticket {
    let created_at = test_instant() + Duration::seconds(offset_secs);
    Ticket {
        id: TicketId::new(),
        number: TicketNumber {
            prefix: "T".to_string(),
            sequence,
        },
        office: OfficeId::new("main"),
        office_day: created_at.date_naive(),
        service: ServiceId::new("passport"),
        lane: LaneId::new(lane),
        tier,
        customer_id: CustomerId::new(format!("c{sequence}")),
        customer_type: CustomerType::WalkIn,
        status: TicketStatus::Waiting,
        created_at,
        claim: None,
        completed_at: None,
        closed_at: None,
        cancel_reason: None,
        evaluation: None,
        archived_at: None,
        version: 1,
    }
}

fn tier() -> impl Strategy<Value = PriorityTier> {
    prop_oneof![
        Just(PriorityTier::Regular),
        Just(PriorityTier::Priority),
        Just(PriorityTier::Vip),
    ]
}

/// Drain a lane by repeatedly serving its head
fn drain(ordering: &mut QueueOrdering, lane: &LaneId) -> Vec<TicketId> {
    let mut served = Vec::new();
    while let Some(next) = ordering.peek_next(lane) {
        assert!(ordering.remove(&next));
        served.push(next);
    }
    served
}

proptest! {
    #[test]
    fn lane_is_served_by_tier_then_arrival(
        arrivals in prop::collection::vec((tier(), 0i64..600), 1..60)
    ) {
        let mut ordering = QueueOrdering::new();
        let mut tickets = Vec::new();
        for (n, (tier, offset)) in arrivals.into_iter().enumerate() {
            let t = ticket(u32::try_from(n).unwrap() + 1, "a", tier, offset);
            prop_assert!(ordering.enqueue(&t));
            tickets.push(t);
        }

        // Stable sort keeps insertion order for equal timestamps
        let mut expected = tickets.clone();
        expected.sort_by_key(|t| (std::cmp::Reverse(t.tier.rank()), t.created_at));
        let expected: Vec<TicketId> = expected.iter().map(|t| t.id).collect();

        prop_assert_eq!(drain(&mut ordering, &LaneId::new("a")), expected);
        prop_assert!(ordering.is_empty());
    }

    #[test]
    fn positions_are_dense_and_one_based(
        arrivals in prop::collection::vec((tier(), 0i64..600), 1..40),
        removals in prop::collection::vec(any::<prop::sample::Index>(), 0..20)
    ) {
        let mut ordering = QueueOrdering::new();
        let mut ids = Vec::new();
        for (n, (tier, offset)) in arrivals.into_iter().enumerate() {
            let t = ticket(u32::try_from(n).unwrap() + 1, "a", tier, offset);
            ordering.enqueue(&t);
            ids.push(t.id);
        }
        for index in removals {
            let id = *index.get(&ids);
            ordering.remove(&id);
        }

        let lane = LaneId::new("a");
        let waiting = ordering.waiting(&lane);
        prop_assert_eq!(waiting.len(), ordering.len(&lane));
        for (i, id) in waiting.iter().enumerate() {
            prop_assert_eq!(ordering.position(id), Some(i + 1));
        }
    }

    #[test]
    fn lanes_are_independent(
        arrivals in prop::collection::vec((0usize..3, tier(), 0i64..600), 1..60)
    ) {
        let lanes = ["a", "b", "c"];
        let mut ordering = QueueOrdering::new();
        let mut per_lane: Vec<Vec<Ticket>> = vec![Vec::new(); lanes.len()];
        for (n, (lane, tier, offset)) in arrivals.into_iter().enumerate() {
            let t = ticket(u32::try_from(n).unwrap() + 1, lanes[lane], tier, offset);
            ordering.enqueue(&t);
            per_lane[lane].push(t);
        }

        prop_assert_eq!(
            ordering.total_waiting(),
            per_lane.iter().map(Vec::len).sum::<usize>()
        );
        for (lane, tickets) in lanes.iter().zip(per_lane) {
            let lane = LaneId::new(*lane);
            for t in &tickets {
                prop_assert_eq!(ordering.lane_of(&t.id), Some(&lane));
            }
            prop_assert_eq!(drain(&mut ordering, &lane).len(), tickets.len());
        }
    }
}

#[test]
fn duplicate_enqueue_is_ignored() {
    let mut ordering = QueueOrdering::new();
    let t = ticket(1, "a", PriorityTier::Regular, 0);
    assert!(ordering.enqueue(&t));
    assert!(!ordering.enqueue(&t));
    assert_eq!(ordering.len(&LaneId::new("a")), 1);
    assert!(!ordering.remove(&TicketId::new()));
}
