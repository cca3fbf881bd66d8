//! Walk-in queue: ticket admission, queue ordering and abuse detection.
//!
//! Service counters hand out numbered tickets, call them to desks and close
//! them. This crate is the core of such a system:
//!
//! - **Admission**: one active ticket per customer, no new ticket while an
//!   evaluation is owed, lane eligibility, maintenance switches
//! - **Ordering**: per-lane priority tiers with FIFO inside each tier
//! - **Desks**: a desk serves at most one ticket, from the lanes bound to it
//! - **Abuse detection**: rolling windows of cancellations and no-shows,
//!   login lockout
//!
//! # Architecture
//!
//! ```text
//!             ┌──────────────────────────────┐
//!  commands ─▶│ QueueService                 │
//!             │  ┌────────────┐ transitions  │
//!             │  │ QueueStore │─────────┐    │
//!             │  └─────┬──────┘         ▼    │
//!             │        │        ┌──────────────────┐
//!             │        │        │ ViolationStore   │
//!             │        │        └────────┬─────────┘
//!             └────────┼─────────────────┼────┘
//!                      ▼                 ▼
//!              TicketRepository   ViolationRepository
//! ```
//!
//! Each store runs a reducer under a single write lock. Reducers validate a
//! command, apply the resulting event and return effects that persist the
//! new snapshot and publish the transition. Failed writes land in a dead
//! letter queue drained by [`maintenance::repair`].
//!
//! # Usage
//!
//! ```ignore
//! let service = QueueService::in_memory(Arc::new(SystemClock), Config::from_env());
//! service.configure_office(office, lanes).await?;
//! let ticket = service.issue(IssueRequest::walk_in("c-1", "main", "passport", "general")).await?;
//! let called = service.claim_next(DeskId::new("desk-1"), None).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod config;
pub mod error;
pub mod events;
pub mod maintenance;
pub mod metrics;
pub mod ordering;
pub mod policy;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod types;

pub use aggregates::ticket::{QueueAction, QueueEnvironment, QueueReducer, QueueState};
pub use aggregates::violation::{
    DetectorPolicy, Evidence, LockoutState, Severity, Violation, ViolationAction,
    ViolationCategory, ViolationFilter, ViolationId, ViolationReducer, ViolationState,
    ViolationStatus,
};
pub use config::Config;
pub use error::{Conflict, DenialReason, Entity, QueueError, Result, StorageError};
pub use events::{BroadcastSink, FanOutSink, NoopSink, TicketEventSink};
pub use repository::{InMemoryRepository, TicketQuery, TicketRepository, ViolationRepository};
pub use service::{QueueService, ViolationReport};
pub use types::*;
