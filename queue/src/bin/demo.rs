//! Walk-in Queue Demo
//!
//! Runs a morning at a small office against the in-memory repository:
//! - Office, lanes and desks are configured
//! - Customers take tickets; one is refused a second ticket
//! - Desks call tickets in priority order, complete and mark no-shows
//! - Repeated cancellations trip the abuse detector
//! - Failed logins lock a credential out
//!
//! Then it keeps the maintenance task running until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! METRICS_ADDR=127.0.0.1:9000 cargo run --bin walkin-demo
//! ```

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkin_core::environment::SystemClock;
use walkin_queue::{
    maintenance, Config, CredentialId, CustomerId, CustomerProfile, Desk, DeskId, IssueRequest,
    Lane, LaneId, LaneKind, Office, PriorityTier, QueueService, ViolationFilter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    config.validate().context("invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("walkin_queue={},walkin_runtime=warn", config.server.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(addr) = &config.server.metrics_addr {
        let addr: SocketAddr = addr.parse().context("METRICS_ADDR is not a socket address")?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        tracing::info!(%addr, "Prometheus exporter listening");
    }
    walkin_queue::metrics::register_business_metrics();

    let service = QueueService::in_memory(Arc::new(SystemClock), config.clone());
    service.hydrate().await?;

    println!("\n🎫 ============================================");
    println!("   Walk-in Queue - Live Demo");
    println!("============================================\n");

    // ========== Setup ==========

    service
        .configure_office(
            Office::new("main", "Main Street Office", 60),
            vec![
                Lane::new("general", "main", "General", "G", LaneKind::All),
                Lane::new("priority", "main", "Priority", "P", LaneKind::Priority),
            ],
        )
        .await?;
    for (desk, staff) in [("desk-1", "alice"), ("desk-2", "bob")] {
        service
            .register_desk(
                Desk::new(desk, "main", vec![LaneId::new("priority"), LaneId::new("general")])
                    .staffed_by(staff),
            )
            .await?;
    }
    println!("✓ Office configured with 2 lanes and 2 desks\n");

    // ========== Issuance ==========

    println!("1️⃣  Customers taking tickets...");
    let mut tickets = Vec::new();
    for customer in ["c-ana", "c-ben", "c-cai"] {
        let ticket = service
            .issue(IssueRequest::walk_in(customer, "main", "passport", "general"))
            .await?;
        println!("   ✓ {customer} got {}", ticket.number);
        tickets.push(ticket);
    }
    let elder = service
        .issue(
            IssueRequest::walk_in("c-dora", "main", "passport", "priority")
                .with_tier(PriorityTier::Priority)
                .with_profile(CustomerProfile::default().with_verified_priority()),
        )
        .await?;
    println!("   ✓ c-dora got {} (priority lane)", elder.number);

    match service
        .issue(IssueRequest::walk_in("c-ana", "main", "passport", "general"))
        .await
    {
        Ok(ticket) => println!("   ✗ unexpected second ticket {}", ticket.number),
        Err(error) => println!("   ✓ c-ana refused a second ticket: {error}"),
    }
    println!();

    // ========== Service ==========

    println!("2️⃣  Desks calling tickets...");
    if let Some(called) = service.claim_next(DeskId::new("desk-1"), None).await? {
        println!("   ✓ desk-1 called {}", called.number);
        service.complete(called.id).await?;
        service.submit_evaluation(called.id, 5, Some("quick".into())).await?;
        println!("   ✓ {} completed and rated 5", called.number);
    }
    if let Some(called) = service.claim_next(DeskId::new("desk-2"), None).await? {
        println!("   ✓ desk-2 called {}", called.number);
        service.no_show(called.id).await?;
        println!("   ✓ {} marked no-show", called.number);
    }
    if let Some(waiting) = tickets.last() {
        let position = service.queue_position(waiting.id).await?;
        println!("   ✓ {} is at position {position}", waiting.number);
    }
    println!();

    // ========== Abuse detection ==========

    println!("3️⃣  A customer cancelling repeatedly...");
    let serial = CustomerId::new("c-eve");
    for attempt in 1..=config.policy.cancel_abuse_threshold {
        let ticket = service
            .issue(IssueRequest::walk_in(serial.clone(), "main", "passport", "general"))
            .await?;
        service.cancel(ticket.id, format!("changed my mind ({attempt})")).await?;
    }
    for violation in service
        .list_violations(ViolationFilter::all().for_user(&serial))
        .await
    {
        println!(
            "   ⚠ violation {} ({}, {:?})",
            violation.id,
            violation.category.as_str(),
            violation.severity
        );
    }

    println!("\n4️⃣  Failed logins...");
    let credential = CredentialId::new("kiosk-7");
    for _ in 0..config.lockout.max_failures {
        let state = service.record_login_failure(credential.clone()).await?;
        println!("   • failures={} locked={}", state.failures, state.locked);
    }
    println!();

    // ========== Maintenance ==========

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = maintenance::spawn_maintenance(
        service.clone(),
        config.sweep_interval(),
        shutdown_rx,
    );

    println!("Running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C signal");

    let _ = shutdown_tx.send(true);
    if let Err(error) = maintenance.await {
        tracing::warn!(error = %error, "Maintenance task ended abnormally");
    }
    service.shutdown().await?;

    let health = service.health();
    tracing::info!(status = ?health.status, "Shut down");
    Ok(())
}
