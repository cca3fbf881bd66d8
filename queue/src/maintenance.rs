//! Background upkeep: expiry sweep, repair of failed writes, archival.
//!
//! A failed ticket write never fails the command that caused it; the
//! snapshot goes to the dead letter queue instead. [`repair`] replays those
//! snapshots. Because repository writes are version-checked, replaying is
//! safe to repeat and never overwrites a newer stored version.

use crate::aggregates::ticket::repair_snapshot;
use crate::error::Result;
use crate::repository::WriteOutcome;
use crate::service::QueueService;
use crate::types::{Ticket, TicketId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use walkin_runtime::DeadLetter;

/// Outcome of one repair pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Snapshots now stored
    pub written: usize,
    /// Snapshots superseded by a newer stored version
    pub stale: usize,
    /// Snapshots that failed again and were re-queued
    pub failed: usize,
}

impl RepairReport {
    /// Whether the pass found nothing to do
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.written == 0 && self.stale == 0 && self.failed == 0
    }
}

/// Outcome of one maintenance cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Tickets cancelled because their office-day ended
    pub expired: usize,
    /// Dead letters replayed
    pub repair: RepairReport,
    /// Tickets moved out of memory
    pub archived: usize,
}

/// Cancel active tickets left over from earlier office-days
///
/// # Errors
///
/// [`crate::error::QueueError::ShuttingDown`] once shutdown started.
pub async fn run_expiry_sweep(service: &QueueService) -> Result<usize> {
    let expired = service.expire_stale().await?;
    if !expired.is_empty() {
        tracing::info!(count = expired.len(), "Expiry sweep cancelled stale tickets");
    }
    Ok(expired.len())
}

/// Replay dead-lettered ticket snapshots
///
/// Snapshots of the same ticket collapse to the newest one. When the ticket
/// is still resident its current snapshot is written instead, since it
/// includes every later change.
pub async fn repair(service: &QueueService) -> RepairReport {
    let letters = service.dead_letters().drain();
    if letters.is_empty() {
        return RepairReport::default();
    }

    let mut newest: HashMap<TicketId, DeadLetter<Ticket>> = HashMap::new();
    for letter in letters {
        match newest.get(&letter.payload.id) {
            Some(kept) if kept.payload.version >= letter.payload.version => {},
            _ => {
                newest.insert(letter.payload.id, letter);
            },
        }
    }

    let mut pending: Vec<DeadLetter<Ticket>> = newest.into_values().collect();
    pending.sort_by_key(|letter| (letter.payload.created_at, letter.payload.id));

    let mut report = RepairReport::default();
    for letter in pending {
        let snapshot = match service.resident_ticket(letter.payload.id).await {
            Some(resident) if resident.version >= letter.payload.version => resident,
            _ => letter.payload,
        };

        match repair_snapshot(service.ticket_repository(), &snapshot).await {
            Ok(WriteOutcome::Written) => {
                report.written += 1;
                crate::metrics::record_repair("written");
            },
            Ok(WriteOutcome::Stale) => {
                report.stale += 1;
                crate::metrics::record_repair("stale");
            },
            Err(error) => {
                report.failed += 1;
                crate::metrics::record_repair("failed");
                tracing::warn!(
                    ticket_id = %snapshot.id,
                    retry_count = letter.retry_count + 1,
                    error = %error,
                    "Repair write failed; re-queued"
                );
                service
                    .dead_letters()
                    .push(snapshot, error.to_string(), letter.retry_count + 1);
            },
        }
    }

    tracing::info!(
        written = report.written,
        stale = report.stale,
        failed = report.failed,
        "Repair pass finished"
    );
    report
}

/// Archive closed tickets older than the configured retention
///
/// Age is counted in office-days of each ticket's own office.
///
/// # Errors
///
/// [`crate::error::QueueError::ShuttingDown`] once shutdown started.
pub async fn archive_stale(service: &QueueService) -> Result<usize> {
    service
        .archive_older_than(service.config().sweep.archive_after_days)
        .await
}

/// Run expiry, repair and archival once
///
/// # Errors
///
/// [`crate::error::QueueError::ShuttingDown`] once shutdown started.
pub async fn run_cycle(service: &QueueService) -> Result<MaintenanceReport> {
    let expired = run_expiry_sweep(service).await?;
    let repair = repair(service).await;
    let archived = archive_stale(service).await?;
    Ok(MaintenanceReport {
        expired,
        repair,
        archived,
    })
}

/// Run [`run_cycle`] every `interval` until `shutdown` flips to `true`
pub fn spawn_maintenance(
    service: QueueService,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "Maintenance task started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match run_cycle(&service).await {
                        Ok(report) => tracing::debug!(?report, "Maintenance cycle finished"),
                        Err(error) if error == crate::error::QueueError::ShuttingDown => break,
                        Err(error) => tracing::error!(error = %error, "Maintenance cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Maintenance task stopped");
    })
}
