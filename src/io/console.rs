//! Operator console - line commands on stdin
//!
//! Gives a terminal operator (or a scripted simulation) the same
//! operations a workplace client would call:
//!
//! ```text
//! open | close | tick | list | help
//! register <service>
//! login <workplace> [employee] | logout <workplace>
//! next <workplace> | call <workplace> <visitor>
//! complete <visitor> | cancel <visitor> <reason> [workplace]
//! holdover <visitor> [minutes] [count] [reason...]
//! move-wp <visitor> <workplace> | move-svc <visitor> <service>
//! test <algorithm> <workplace> | find <ticket>
//! arrived <visitor> | suspend <visitor> | ping <workplace>
//! algorithm <id> <list,list,...> [workplace]
//! sms <visitor> <status> | unbook <visitor>
//! ```
//!
//! The last three build a [`Notification`]. Under the daemon they travel
//! through the notification worker like any other inbound change.

use crate::domain::{
    Algorithm, AlgorithmId, CancelReason, CandidateKind, EmployeeId, Notification, ServiceId,
    SmsStatus, Visitor, VisitorId, WorkplaceId,
};
use crate::services::engine::QueueEngine;
use std::fmt::Write;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open,
    Close,
    Tick,
    List,
    Help,
    Register(ServiceId),
    Login { workplace: WorkplaceId, employee: Option<EmployeeId> },
    Logout(WorkplaceId),
    Next(WorkplaceId),
    Call { workplace: WorkplaceId, visitor: VisitorId },
    Complete(VisitorId),
    Cancel { visitor: VisitorId, reason: CancelReason, workplace: Option<WorkplaceId> },
    Holdover { visitor: VisitorId, minutes: u32, count: u32, reason: String },
    MoveToWorkplace { visitor: VisitorId, workplace: WorkplaceId },
    MoveToService { visitor: VisitorId, service: ServiceId },
    TestAlgorithm { algorithm: AlgorithmId, workplace: WorkplaceId },
    Find(String),
    Arrived(VisitorId),
    Suspend(VisitorId),
    Heartbeat(WorkplaceId),
    Notify(Notification),
}

fn arg<T: FromStr>(words: &[&str], idx: usize, name: &str) -> Result<T, String> {
    let raw = words.get(idx).ok_or_else(|| format!("missing <{name}>"))?;
    raw.parse().map_err(|_| format!("invalid <{name}> '{raw}'"))
}

fn opt_arg<T: FromStr>(words: &[&str], idx: usize, name: &str) -> Result<Option<T>, String> {
    match words.get(idx) {
        Some(_) => arg(words, idx, name).map(Some),
        None => Ok(None),
    }
}

/// Parse one console line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words[0] {
        "open" => Command::Open,
        "close" => Command::Close,
        "tick" => Command::Tick,
        "list" | "ls" => Command::List,
        "help" | "?" => Command::Help,
        "register" | "reg" => Command::Register(arg(&words, 1, "service")?),
        "login" => Command::Login {
            workplace: arg(&words, 1, "workplace")?,
            employee: opt_arg(&words, 2, "employee")?,
        },
        "logout" => Command::Logout(arg(&words, 1, "workplace")?),
        "next" => Command::Next(arg(&words, 1, "workplace")?),
        "call" => Command::Call {
            workplace: arg(&words, 1, "workplace")?,
            visitor: arg(&words, 2, "visitor")?,
        },
        "complete" | "done" => Command::Complete(arg(&words, 1, "visitor")?),
        "cancel" => Command::Cancel {
            visitor: arg(&words, 1, "visitor")?,
            reason: arg(&words, 2, "reason")?,
            workplace: opt_arg(&words, 3, "workplace")?,
        },
        "holdover" | "hold" => Command::Holdover {
            visitor: arg(&words, 1, "visitor")?,
            minutes: opt_arg(&words, 2, "minutes")?.unwrap_or(0),
            count: opt_arg(&words, 3, "count")?.unwrap_or(0),
            reason: words.get(4..).map(|rest| rest.join(" ")).unwrap_or_default(),
        },
        "move-wp" => Command::MoveToWorkplace {
            visitor: arg(&words, 1, "visitor")?,
            workplace: arg(&words, 2, "workplace")?,
        },
        "move-svc" => Command::MoveToService {
            visitor: arg(&words, 1, "visitor")?,
            service: arg(&words, 2, "service")?,
        },
        "test" => Command::TestAlgorithm {
            algorithm: arg(&words, 1, "algorithm")?,
            workplace: arg(&words, 2, "workplace")?,
        },
        "find" => Command::Find(arg(&words, 1, "ticket")?),
        "arrived" => Command::Arrived(arg(&words, 1, "visitor")?),
        "suspend" => Command::Suspend(arg(&words, 1, "visitor")?),
        "ping" => Command::Heartbeat(arg(&words, 1, "workplace")?),
        "algorithm" | "alg" => {
            let id: AlgorithmId = arg(&words, 1, "algorithm")?;
            let raw = words.get(2).ok_or("missing <lists>")?;
            let priority = raw
                .split(',')
                .map(str::parse::<CandidateKind>)
                .collect::<Result<Vec<_>, _>>()?;
            let algorithm = Algorithm::new(id, "console").with_priority(priority);
            Command::Notify(Notification::AlgorithmChanged {
                algorithm,
                workplace: opt_arg(&words, 3, "workplace")?,
            })
        }
        "sms" => Command::Notify(Notification::SmsDeliveryStatus(vec![SmsStatus {
            visitor: arg(&words, 1, "visitor")?,
            status: arg(&words, 2, "status")?,
        }])),
        "unbook" => Command::Notify(Notification::AppointmentVisitorRemove(arg(&words, 1, "visitor")?)),
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(command))
}

const HELP: &str = "open | close | tick | list | register <svc> | login <wp> [emp] | logout <wp> | \
next <wp> | call <wp> <visitor> | complete <visitor> | cancel <visitor> <reason> [wp] | \
holdover <visitor> [min] [count] [reason] | move-wp <visitor> <wp> | move-svc <visitor> <svc> | \
test <alg> <wp> | find <ticket> | arrived <visitor> | suspend <visitor> | ping <wp> | \
algorithm <id> <lists> [wp] | sms <visitor> <status> | unbook <visitor>";

fn describe(visitor: Option<Visitor>) -> String {
    match visitor {
        Some(v) => format!(
            "{} status={} service={} workplace={}",
            v,
            v.status,
            v.next_service,
            v.current_workplace.map_or_else(|| "-".to_string(), |wp| wp.to_string())
        ),
        None => "no visitor".to_string(),
    }
}

fn list(engine: &QueueEngine) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "day_open={} watermark={}", engine.is_day_open(), engine.watermark());
    for wp in engine.day_workplaces() {
        let current = wp.process.current_visitor.map_or_else(|| "-".to_string(), |id| id.to_string());
        let queue: Vec<String> = wp.queue.iter().map(|id| id.to_string()).collect();
        let _ = writeln!(
            out,
            "  {} registered={} employee={:?} current={} served={} queue=[{}]",
            wp.workplace,
            wp.process.registered,
            wp.process.employee,
            current,
            wp.process.served_total(),
            queue.join(",")
        );
    }
    for v in engine.active_visitors() {
        let _ = writeln!(out, "  {}", describe(Some(v)));
    }
    out
}

/// Run one command against the engine and render the outcome
pub fn execute(engine: &QueueEngine, command: Command) -> String {
    debug!(command = ?command, "console_command");
    let result = match command {
        Command::Open => engine.start_day(false).map(|opened| format!("opened={opened}")),
        Command::Close => Ok(format!("closed={}", engine.stop_day())),
        Command::Tick => {
            engine.minute_tick();
            Ok("tick".to_string())
        }
        Command::List => Ok(list(engine)),
        Command::Help => Ok(HELP.to_string()),
        Command::Register(service) => engine.register_walk_in(service).map(|v| {
            format!(
                "{} ahead={} wait_min={}",
                describe(Some(v.clone())),
                v.process.count_before,
                v.process.minutes_before
            )
        }),
        Command::Login { workplace, employee } => {
            engine.register_employee(employee, workplace).map(|()| format!("workplace {workplace} registered"))
        }
        Command::Logout(workplace) => {
            Ok(format!("unregistered={}", engine.unregister_workplace(workplace)))
        }
        Command::Next(workplace) => engine.call_next(workplace).map(describe),
        Command::Call { workplace, visitor } => engine.call_visitor(workplace, visitor).map(describe),
        Command::Complete(visitor) => engine.complete(visitor).map(describe),
        Command::Cancel { visitor, reason, workplace } => {
            engine.cancel(workplace, visitor, reason).map(describe)
        }
        Command::Holdover { visitor, minutes, count, reason } => {
            engine.holdover(visitor, &reason, minutes, count).map(describe)
        }
        Command::MoveToWorkplace { visitor, workplace } => {
            engine.move_to_workplace(visitor, workplace).map(describe)
        }
        Command::MoveToService { visitor, service } => {
            engine.move_to_service(visitor, service).map(describe)
        }
        Command::TestAlgorithm { algorithm, workplace } => {
            engine.test_algorithm(algorithm, workplace).map(|()| "algorithm ok".to_string())
        }
        Command::Find(ticket) => Ok(describe(engine.find_by_ticket(&ticket))),
        Command::Arrived(visitor) => Ok(describe(engine.set_arrived(visitor))),
        Command::Suspend(visitor) => Ok(describe(engine.set_suspended(visitor))),
        Command::Heartbeat(workplace) => Ok(format!("active={}", engine.heartbeat(workplace))),
        Command::Notify(notification) => {
            let kind = notification.kind();
            engine.handle(notification).map(|()| format!("{kind} applied"))
        }
    };
    result.unwrap_or_else(|e| format!("error: {e}"))
}

/// Read commands from stdin until EOF or shutdown
///
/// With a `notifications` sender, notification commands are queued for the
/// worker instead of being applied inline.
pub async fn run_console(
    engine: Arc<QueueEngine>,
    notifications: Option<mpsc::Sender<Notification>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("console_started");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "console_read_failed");
                        break;
                    }
                };
                let output = match parse_command(&line) {
                    Ok(Some(Command::Notify(notification))) if notifications.is_some() => {
                        let kind = notification.kind();
                        match notifications.as_ref().map(|tx| tx.try_send(notification)) {
                            Some(Ok(())) => format!("{kind} queued"),
                            Some(Err(e)) => format!("error: {e}"),
                            None => continue,
                        }
                    }
                    Ok(Some(command)) => execute(&engine, command),
                    Ok(None) => continue,
                    Err(e) => format!("error: {e}"),
                };
                println!("{output}");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("console_stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(parse_command("open").unwrap(), Some(Command::Open));
        assert_eq!(parse_command("  register 2 ").unwrap(), Some(Command::Register(ServiceId(2))));
        assert_eq!(
            parse_command("login 3").unwrap(),
            Some(Command::Login { workplace: WorkplaceId(3), employee: None })
        );
        assert_eq!(
            parse_command("login 3 17").unwrap(),
            Some(Command::Login { workplace: WorkplaceId(3), employee: Some(EmployeeId(17)) })
        );
    }

    #[test]
    fn test_parse_skips_blank_and_comments() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("   # morning rush").unwrap(), None);
    }

    #[test]
    fn test_parse_cancel_reason() {
        assert_eq!(
            parse_command("cancel 5 consulted 2").unwrap(),
            Some(Command::Cancel {
                visitor: VisitorId(5),
                reason: CancelReason::Consulted,
                workplace: Some(WorkplaceId(2)),
            })
        );
        assert!(parse_command("cancel 5 bogus").is_err());
    }

    #[test]
    fn test_parse_holdover_defaults_and_reason() {
        assert_eq!(
            parse_command("holdover 4").unwrap(),
            Some(Command::Holdover { visitor: VisitorId(4), minutes: 0, count: 0, reason: String::new() })
        );
        assert_eq!(
            parse_command("hold 4 0 3 missing passport copy").unwrap(),
            Some(Command::Holdover {
                visitor: VisitorId(4),
                minutes: 0,
                count: 3,
                reason: "missing passport copy".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_command("next").unwrap_err(), "missing <workplace>");
        assert_eq!(parse_command("next x").unwrap_err(), "invalid <workplace> 'x'");
        assert!(parse_command("launch").unwrap_err().starts_with("unknown command"));
        assert_eq!(parse_command("algorithm 2 free,vip").unwrap_err(), "unknown candidate list 'vip'");
    }

    #[test]
    fn test_parse_notifications() {
        let parsed = parse_command("algorithm 4 appointment,free 2").unwrap();
        assert_eq!(
            parsed,
            Some(Command::Notify(Notification::AlgorithmChanged {
                algorithm: Algorithm::new(AlgorithmId(4), "console")
                    .with_priority(vec![CandidateKind::Appointment, CandidateKind::Free]),
                workplace: Some(WorkplaceId(2)),
            }))
        );
        assert_eq!(
            parse_command("unbook 9").unwrap(),
            Some(Command::Notify(Notification::AppointmentVisitorRemove(VisitorId(9))))
        );
        assert!(matches!(
            parse_command("sms 9 delivered").unwrap(),
            Some(Command::Notify(Notification::SmsDeliveryStatus(ref list))) if list.len() == 1
        ));
    }
}
