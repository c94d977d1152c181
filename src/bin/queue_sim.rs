//! Queue simulation - scripted office day on a manual clock
//!
//! Replays console commands against an engine whose clock only moves when
//! the script says so. `at HH:MM` moves the clock and runs both timer
//! passes; every other line is an operator console command.
//!
//! Usage:
//!   cargo run --bin queue-sim -- --config config/dev.toml --script day.txt --events

use anyhow::Context;
use chrono::{Local, NaiveDate, NaiveTime};
use clap::Parser;
use office_queue::infra::{Config, ManualClock, Metrics};
use office_queue::io::{create_event_channel, execute, parse_command, EventEnvelope};
use office_queue::services::{InMemoryRepository, LocalRegistration, QueueEngine};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

const DEFAULT_SCRIPT: &str = "\
# closed before the shift starts
at 08:50
register 1
at 09:00
login 1 101
login 2 102
register 1
register 1
register 2
list
next 1
next 2
complete 1
holdover 3 0 1 missing form
next 1
complete 2
at 09:05
next 2
list
close
";

#[derive(Parser, Debug)]
#[command(name = "queue-sim")]
#[command(about = "Replay a scripted office day against the queue engine")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Script file (built-in demo day when omitted)
    #[arg(short, long)]
    script: Option<String>,

    /// Simulated date, YYYY-MM-DD (today when omitted)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Print outbound events as they are emitted
    #[arg(long)]
    events: bool,
}

fn parse_at(rest: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(rest.trim(), "%H:%M").with_context(|| format!("invalid time '{}'", rest.trim()))
}

fn print_events(rx: &mut mpsc::Receiver<EventEnvelope>, show: bool) {
    while let Ok(envelope) = rx.try_recv() {
        if show {
            match serde_json::to_string(&envelope.event) {
                Ok(json) => println!("    event {json}"),
                Err(e) => println!("    event <unserializable: {e}>"),
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    let script = match &args.script {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Failed to read script {path}"))?,
        None => DEFAULT_SCRIPT.to_string(),
    };

    let date = args.date.unwrap_or_else(|| Local::now().date_naive());
    let clock = Arc::new(ManualClock::new(date.and_time(NaiveTime::MIN)));
    let metrics = Arc::new(Metrics::new());
    let (events, mut events_rx) =
        create_event_channel(config.event_buffer_size().max(4096), config.site_id().to_string(), metrics.clone());
    let repository = Arc::new(InMemoryRepository::from_config(&config));
    let registration = Arc::new(LocalRegistration::new(repository.clone()));
    let engine = QueueEngine::new(config, repository, registration, events, clock.clone(), metrics.clone())?;

    for (lineno, line) in script.lines().enumerate() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("at ") {
            let time = parse_at(rest).with_context(|| format!("line {}", lineno + 1))?;
            clock.set(date.and_time(time));
            engine.minute_tick();
            engine.second_tick();
            println!("[{}]", time.format("%H:%M"));
        } else {
            match parse_command(trimmed) {
                Ok(Some(command)) => {
                    println!("> {trimmed}");
                    for out in execute(&engine, command).lines() {
                        println!("  {out}");
                    }
                }
                Ok(None) => {}
                Err(e) => println!("> {trimmed}\n  error: {e}"),
            }
        }
        print_events(&mut events_rx, args.events);
    }

    let summary = metrics.report();
    println!(
        "registered={} called={} completed={} cancelled={} held_over={} rebuilds={}",
        summary.visitors_registered,
        summary.visitors_called,
        summary.visitors_completed,
        summary.visitors_cancelled,
        summary.visitors_held_over,
        summary.rebuilds_total
    );
    Ok(())
}
