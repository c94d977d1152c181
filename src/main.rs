//! Office queue daemon
//!
//! Runs the queue engine for one service office: loads the office layout,
//! opens the working day when the timetable says so and drives the engine
//! from its timers, inbound notifications and the operator console.
//!
//! Module structure:
//! - `domain/` - Core business types (Visitor, Workplace, Service, Events)
//! - `io/` - External interfaces (Journal, Console, Notifications, Prometheus)
//! - `services/` - Business logic (QueueEngine, queues, repository, timers)
//! - `infra/` - Infrastructure (Config, Clock, Errors, Metrics)

use clap::Parser;
use office_queue::infra::{Config, Metrics, SystemClock};
use office_queue::io::{create_event_channel, create_notification_worker, run_console, Journal};
use office_queue::services::{InMemoryRepository, LocalRegistration, QueueEngine, TimerDriver};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Office queue - visitor distribution engine for a service office
#[derive(Parser, Debug)]
#[command(name = "office-queue", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Do not read operator commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let git_hash = env!("GIT_HASH");
    info!(git_hash = %git_hash, "office-queue starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        role = ?config.role(),
        distribution = %config.distribution().as_str(),
        free_workplace_call = %config.free_workplace_call(),
        max_visitor_queue = %config.max_visitor_queue(),
        services = %config.services().len(),
        workplaces = %config.workplaces().len(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Outbound events go to the JSONL journal
    let (events, events_rx) =
        create_event_channel(config.event_buffer_size(), config.site_id().to_string(), metrics.clone());
    let journal = Journal::new(config.journal_file());
    let journal_shutdown = shutdown_rx.clone();
    let journal_handle = tokio::spawn(async move {
        journal.run(events_rx, journal_shutdown).await;
    });

    let repository = Arc::new(InMemoryRepository::from_config(&config));
    let registration = Arc::new(LocalRegistration::new(repository.clone()));
    let engine = Arc::new(QueueEngine::new(
        config.clone(),
        repository,
        registration,
        events,
        Arc::new(SystemClock),
        metrics.clone(),
    )?);

    match engine.startup() {
        Ok(opened) => info!(day_open = %opened, "engine_started"),
        Err(e) => error!(error = %e, "engine_startup_failed"),
    }

    // Coarse and fine timers
    let timer = TimerDriver::new(engine.clone(), config.coarse_interval_secs(), config.fine_interval_secs());
    let timer_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        timer.run(timer_shutdown).await;
    });

    // Inbound notifications
    let (notifications_tx, worker) = create_notification_worker(engine.clone(), config.event_buffer_size());
    let worker_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        worker.run(worker_shutdown).await;
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = office_queue::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    // Periodic metrics summary in the log
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    if !args.no_console {
        let console_engine = engine.clone();
        let console_tx = notifications_tx.clone();
        let console_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            run_console(console_engine, Some(console_tx), console_shutdown).await;
        });
    }

    // Handle shutdown on Ctrl+C
    let mut wait_shutdown = shutdown_rx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    while !*wait_shutdown.borrow() {
        if wait_shutdown.changed().await.is_err() {
            break;
        }
    }

    // Journal drains queued events before it stops
    let _ = journal_handle.await;
    drop(notifications_tx);

    info!("office-queue shutdown complete");
    Ok(())
}
