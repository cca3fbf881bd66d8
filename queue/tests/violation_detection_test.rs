//! Abuse detection and login lockout fed by real ticket transitions.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use std::sync::Arc;
use walkin_queue::{
    Actor, Config, Conflict, CredentialId, CustomerId, Desk, DeskId, Evidence, IssueRequest, Lane,
    LaneId, LaneKind, Office, QueueError, QueueService, Role, Severity, TicketId,
    ViolationCategory, ViolationFilter, ViolationReport, ViolationStatus,
};
use walkin_testing::{test_instant, ManualClock};

async fn service() -> (QueueService, ManualClock) {
    let clock = ManualClock::new(test_instant());
    let service = QueueService::in_memory(Arc::new(clock.clone()), Config::default());
    service
        .configure_office(
            Office::new("main", "Main", 0),
            vec![Lane::new("general", "main", "General", "G", LaneKind::All)],
        )
        .await
        .unwrap();
    service
        .register_desk(Desk::new("d1", "main", vec![LaneId::new("general")]).staffed_by("s1"))
        .await
        .unwrap();
    (service, clock)
}

async fn issue_and_cancel(service: &QueueService, customer: &str) -> TicketId {
    let ticket = service
        .issue(IssueRequest::walk_in(customer, "main", "passport", "general"))
        .await
        .unwrap();
    service.cancel(ticket.id, "changed my mind").await.unwrap();
    ticket.id
}

async fn issue_and_no_show(service: &QueueService, customer: &str) -> TicketId {
    let ticket = service
        .issue(IssueRequest::walk_in(customer, "main", "passport", "general"))
        .await
        .unwrap();
    service.claim(ticket.id, DeskId::new("d1")).await.unwrap();
    service.no_show(ticket.id).await.unwrap();
    ticket.id
}

fn admin() -> Actor {
    Actor::new("boss", Role::OfficeAdmin)
}

#[tokio::test]
async fn repeated_cancellations_record_one_abuse_violation() {
    let (service, clock) = service().await;

    let mut cancelled = Vec::new();
    for _ in 0..3 {
        cancelled.push(issue_and_cancel(&service, "c1").await);
        clock.advance(Duration::minutes(10));
    }

    let found = service
        .list_violations(ViolationFilter::all().for_user(&CustomerId::new("c1")))
        .await;
    assert_eq!(found.len(), 1);
    let violation = &found[0];
    assert_eq!(violation.category, ViolationCategory::Abuse);
    assert_eq!(violation.severity, Severity::Medium);
    assert_eq!(violation.status, ViolationStatus::Active);
    let evidence: Vec<TicketId> = violation
        .evidence
        .iter()
        .filter_map(|e| match e {
            Evidence::Ticket { ticket_id } => Some(*ticket_id),
            _ => None,
        })
        .collect();
    assert_eq!(evidence, cancelled);

    // The window restarts after a violation
    issue_and_cancel(&service, "c1").await;
    assert_eq!(
        service
            .list_violations(ViolationFilter::all().for_user(&CustomerId::new("c1")))
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn cancellations_outside_the_window_do_not_count() {
    let (service, clock) = service().await;

    for _ in 0..4 {
        issue_and_cancel(&service, "c1").await;
        clock.advance(Duration::hours(1));
    }
    assert!(service.list_violations(ViolationFilter::all()).await.is_empty());
}

#[tokio::test]
async fn expired_tickets_are_not_held_against_the_customer() {
    let (service, clock) = service().await;

    for _ in 0..3 {
        service
            .issue(IssueRequest::walk_in("c1", "main", "passport", "general"))
            .await
            .unwrap();
        clock.advance(Duration::days(1));
        assert_eq!(service.expire_stale().await.unwrap().len(), 1);
    }
    assert!(service.list_violations(ViolationFilter::all()).await.is_empty());
}

#[tokio::test]
async fn repeated_no_shows_escalate() {
    let (service, clock) = service().await;

    issue_and_no_show(&service, "c1").await;
    clock.advance(Duration::hours(2));
    issue_and_no_show(&service, "c1").await;

    let first = service
        .list_violations(ViolationFilter::all().with_category(ViolationCategory::Attendance))
        .await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].severity, Severity::Low);

    clock.advance(Duration::hours(2));
    issue_and_no_show(&service, "c1").await;
    clock.advance(Duration::hours(2));
    issue_and_no_show(&service, "c1").await;

    let all = service
        .list_violations(ViolationFilter::all().with_category(ViolationCategory::Attendance))
        .await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].severity, Severity::Medium);
}

#[tokio::test]
async fn failed_logins_lock_the_credential_until_expiry() {
    let (service, clock) = service().await;
    let credential = CredentialId::new("kiosk-1");

    for attempt in 1..=2 {
        let state = service.record_login_failure(credential.clone()).await.unwrap();
        assert_eq!(state.failures, attempt);
        assert!(!state.locked);
    }
    let locked = service.record_login_failure(credential.clone()).await.unwrap();
    assert!(locked.locked);
    assert_eq!(locked.lockout_until, Some(test_instant() + Duration::minutes(15)));

    let security = service
        .list_violations(ViolationFilter::all().with_category(ViolationCategory::Security))
        .await;
    assert_eq!(security.len(), 1);

    // A correct password does not lift an active lockout
    let after_success = service.record_login_success(credential.clone()).await.unwrap();
    assert!(after_success.locked);

    clock.advance(Duration::minutes(15));
    let unlocked = service.login_state(credential.clone()).await.unwrap();
    assert!(!unlocked.locked);
    assert_eq!(unlocked.failures, 0);
}

#[tokio::test]
async fn login_success_resets_the_failure_count() {
    let (service, _) = service().await;
    let credential = CredentialId::new("kiosk-2");

    service.record_login_failure(credential.clone()).await.unwrap();
    service.record_login_failure(credential.clone()).await.unwrap();
    let state = service.record_login_success(credential.clone()).await.unwrap();
    assert_eq!(state.failures, 0);

    let state = service.record_login_failure(credential).await.unwrap();
    assert_eq!(state.failures, 1);
    assert!(!state.locked);
}

#[tokio::test]
async fn blank_credentials_are_rejected() {
    let (service, _) = service().await;
    let blank = CredentialId::new("");

    for _ in 0..3 {
        assert!(matches!(
            service.record_login_failure(blank.clone()).await,
            Err(QueueError::InvalidInput(_))
        ));
    }
    assert!(matches!(
        service.record_login_success(blank.clone()).await,
        Err(QueueError::InvalidInput(_))
    ));
    assert!(matches!(
        service.login_state(CredentialId::new("   ")).await,
        Err(QueueError::InvalidInput(_))
    ));
    assert!(service.list_violations(ViolationFilter::all()).await.is_empty());
}

#[tokio::test]
async fn only_admins_change_violations() {
    let (service, _) = service().await;
    let flagged = service
        .flag_priority_credential(
            &CustomerId::new("c9"),
            Actor::new("s1", Role::Staff),
            "disability card did not verify",
        )
        .await
        .unwrap();
    assert_eq!(flagged.category, ViolationCategory::Fraud);
    assert_eq!(flagged.severity, Severity::High);

    assert!(matches!(
        service
            .resolve_violation(flagged.id, Actor::new("s1", Role::Staff), None)
            .await,
        Err(QueueError::Forbidden(_))
    ));

    let pending = service
        .set_violation_status(flagged.id, ViolationStatus::Pending, admin())
        .await
        .unwrap();
    assert_eq!(pending.status, ViolationStatus::Pending);

    let resolved = service
        .resolve_violation(flagged.id, admin(), Some("card re-checked".into()))
        .await
        .unwrap();
    assert_eq!(resolved.status, ViolationStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    assert_eq!(
        service.resolve_violation(flagged.id, admin(), None).await,
        Err(QueueError::Conflict(Conflict::ViolationNotActive))
    );
    assert_eq!(
        service
            .list_violations(ViolationFilter::all().with_status(ViolationStatus::Resolved))
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn manual_report_requires_a_subject() {
    let (service, _) = service().await;
    let result = service
        .report_violation(
            ViolationReport {
                user_id: "  ".into(),
                category: ViolationCategory::Compliance,
                severity: Severity::Low,
                evidence: Vec::new(),
                notes: None,
            },
            admin(),
        )
        .await;
    assert!(matches!(result, Err(QueueError::InvalidInput(_))));
}
