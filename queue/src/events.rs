//! Ticket transition publishing.
//!
//! Every status change produces one [`TicketEvent`]. Subscribers (the
//! violation detector, display boards) receive events through a
//! [`TicketEventSink`]; the sink is called from the reducer's effects after
//! the state change is committed, never under the store lock.

use crate::types::TicketEvent;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Receives ticket transitions
pub trait TicketEventSink: Send + Sync {
    /// Deliver one event; delivery failures are the sink's to handle
    fn publish(&self, event: TicketEvent) -> BoxFuture<'_, ()>;
}

/// Sink that drops every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TicketEventSink for NoopSink {
    fn publish(&self, _event: TicketEvent) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Fan-out to any number of in-process subscribers
///
/// Slow subscribers lag and lose the oldest events rather than blocking the
/// queue.
#[derive(Clone, Debug)]
pub struct BroadcastSink {
    sender: broadcast::Sender<TicketEvent>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TicketEventSink for BroadcastSink {
    fn publish(&self, event: TicketEvent) -> BoxFuture<'_, ()> {
        // No subscribers is not an error
        let _ = self.sender.send(event);
        Box::pin(async {})
    }
}

/// Delivers each event to several sinks in order
#[derive(Clone, Default)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn TicketEventSink>>,
}

impl FanOutSink {
    /// Empty fan-out
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn TicketEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl std::fmt::Debug for FanOutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl TicketEventSink for FanOutSink {
    fn publish(&self, event: TicketEvent) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for sink in &self.sinks {
                sink.publish(event.clone()).await;
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{CustomerId, LaneId, OfficeId, TicketId, TicketStatus};
    use walkin_testing::test_instant;

    fn event() -> TicketEvent {
        TicketEvent {
            ticket_id: TicketId::new(),
            customer_id: CustomerId::new("c1"),
            office: OfficeId::new("main"),
            lane: LaneId::new("a"),
            from: None,
            to: TicketStatus::Waiting,
            at: test_instant(),
            cancel_reason: None,
        }
    }

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let first = BroadcastSink::default();
        let second = BroadcastSink::default();
        let mut rx1 = first.subscribe();
        let mut rx2 = second.subscribe();

        let sink = FanOutSink::new()
            .with(Arc::new(first))
            .with(Arc::new(NoopSink))
            .with(Arc::new(second));
        let sent = event();
        sink.publish(sent.clone()).await;

        assert_eq!(rx1.recv().await.unwrap(), sent);
        assert_eq!(rx2.recv().await.unwrap(), sent);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        BroadcastSink::new(1).publish(event()).await;
    }
}
