//! Integration tests for configuration loading

use chrono::NaiveTime;
use office_queue::domain::{
    AlgorithmId, CandidateKind, DistributionPolicy, MaintenanceMode, NodeRole, RoomId, ScheduleId,
    ServiceId, WorkplaceId, WorkplaceType,
};
use office_queue::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[site]
id = "test-office"
role = "master"

[queue]
distribution = "by_room"
allow_unassigned = true
free_workplace_call = true
max_visitor_queue = 12

[timers]
coarse_interval_secs = 30
fine_interval_secs = 2
workplace_stale_ms = 60000

[[timetable.schedules]]
id = 7
begin = "08:30"
end = "17:45"

[[services]]
id = 1
name = "Consultation"
prefix = "A"
holdover_to = 2

[[services]]
id = 2
name = "Documents"

[[workplaces]]
id = 4
name = "Window 4"
algorithm = 3
room = 2
services = [{ service = 1, mode = "appointment" }, { service = 2 }]

[[algorithms]]
id = 3
name = "walk-ins first"
priority = ["free", "appointment"]

[journal]
file = "/tmp/journal.jsonl"

[metrics]
interval_secs = 15
prometheus_port = 9091

[events]
buffer_size = 64
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-office");
    assert_eq!(config.role(), NodeRole::Master);
    assert!(!config.is_serving());
    assert_eq!(config.distribution(), DistributionPolicy::ByRoom);
    assert!(config.allow_unassigned());
    assert!(config.free_workplace_call());
    assert_eq!(config.max_visitor_queue(), 12);
    assert_eq!(config.coarse_interval_secs(), 30);
    assert_eq!(config.fine_interval_secs(), 2);
    assert_eq!(config.workplace_stale_ms(), 60_000);

    let schedule = &config.timetable().schedules[0];
    assert_eq!(schedule.id, ScheduleId(7));
    assert_eq!(schedule.begin, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
    assert_eq!(schedule.end, NaiveTime::from_hms_opt(17, 45, 0).unwrap());
    assert!(schedule.active);

    assert_eq!(config.services().len(), 2);
    assert_eq!(config.services()[0].holdover_to, Some(ServiceId(2)));
    assert_eq!(config.services()[1].routine_minutes, 10);

    let workplace = &config.workplaces()[0];
    assert_eq!(workplace.id, WorkplaceId(4));
    assert_eq!(workplace.kind, WorkplaceType::Operator);
    assert_eq!(workplace.room, Some(RoomId(2)));
    assert_eq!(workplace.services[0].mode, MaintenanceMode::Appointment);
    assert_eq!(workplace.services[1].mode, MaintenanceMode::Both);

    assert_eq!(config.algorithms()[0].id, AlgorithmId(3));
    assert_eq!(config.algorithms()[0].priority, vec![CandidateKind::Free, CandidateKind::Appointment]);

    assert_eq!(config.journal_file(), "/tmp/journal.jsonl");
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.prometheus_port(), 9091);
    assert_eq!(config.event_buffer_size(), 64);
}

#[test]
fn test_minimal_file_uses_section_defaults() {
    let temp_file = write_config(
        r#"
[timetable]
around_the_clock = true
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert!(config.timetable().around_the_clock);
    assert!(config.timetable().schedules.is_empty());
    assert_eq!(config.site_id(), "office");
    assert!(config.is_serving());
    assert_eq!(config.distribution(), DistributionPolicy::Default);
    assert_eq!(config.max_visitor_queue(), 0);
    assert_eq!(config.workplace_stale_ms(), 215_000);
    // Without configured policies the default one stays available
    assert_eq!(config.algorithms()[0].id, AlgorithmId(1));
}

#[test]
fn test_invalid_schedule_time_is_rejected() {
    let temp_file = write_config(
        r#"
[[timetable.schedules]]
id = 1
begin = "9am"
end = "18:00"
"#,
    );

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.services().len(), 2);
    assert_eq!(config.workplaces().len(), 2);
    assert_eq!(config.timetable().schedules.len(), 1);
}

#[test]
fn test_resolve_config_path() {
    let args = vec!["office-queue".to_string(), "--config".to_string(), "a.toml".to_string()];
    assert_eq!(Config::resolve_config_path(&args), "a.toml");

    let args = vec!["office-queue".to_string(), "--config=b.toml".to_string()];
    assert_eq!(Config::resolve_config_path(&args), "b.toml");
}

#[test]
fn test_dev_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::from_file(path).unwrap();

    assert_eq!(config.site_id(), "office-dev");
    assert_eq!(config.services().len(), 3);
    assert_eq!(config.workplaces()[2].kind, WorkplaceType::Automatic);
    assert_eq!(config.algorithms().len(), 2);
}
