//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::{
    Algorithm, AlgorithmId, DistributionPolicy, MaintenanceMode, NodeRole, Schedule, ScheduleId,
    Service, ServiceId, Timetable, Workplace, WorkplaceId,
};
use anyhow::Context;
use chrono::NaiveTime;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique office identifier
    #[serde(default = "default_site_id")]
    pub id: String,
    #[serde(default)]
    pub role: NodeRole,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id(), role: NodeRole::Serving }
    }
}

fn default_site_id() -> String {
    "office".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueueConfig {
    #[serde(default)]
    pub distribution: DistributionPolicy,
    /// BY_ROOM / BY_WORKSTATION: accept visitors no room or workplace can take yet
    #[serde(default)]
    pub allow_unassigned: bool,
    /// Appointment visitors may be called at any matching workplace
    #[serde(default)]
    pub free_workplace_call: bool,
    /// Waiting-visitor cap per workplace queue (0 = unlimited)
    #[serde(default)]
    pub max_visitor_queue: usize,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimersConfig {
    #[serde(default = "default_coarse_interval")]
    pub coarse_interval_secs: u64,
    #[serde(default = "default_fine_interval")]
    pub fine_interval_secs: u64,
    /// Operator workplaces silent for longer than this are unregistered
    #[serde(default = "default_workplace_stale_ms")]
    pub workplace_stale_ms: u64,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            coarse_interval_secs: default_coarse_interval(),
            fine_interval_secs: default_fine_interval(),
            workplace_stale_ms: default_workplace_stale_ms(),
        }
    }
}

fn default_coarse_interval() -> u64 {
    60
}

fn default_fine_interval() -> u64 {
    1
}

fn default_workplace_stale_ms() -> u64 {
    215_000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TimetableConfig {
    #[serde(default)]
    pub around_the_clock: bool,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    /// File path for the outbound event journal (JSONL format)
    #[serde(default = "default_journal_file")]
    pub file: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { file: default_journal_file() }
    }
}

fn default_journal_file() -> String {
    "events.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_buffer")]
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { buffer_size: default_event_buffer() }
    }
}

fn default_event_buffer() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub timers: TimersConfig,
    #[serde(default)]
    pub timetable: TimetableConfig,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub workplaces: Vec<Workplace>,
    #[serde(default)]
    pub algorithms: Vec<Algorithm>,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    role: NodeRole,
    distribution: DistributionPolicy,
    allow_unassigned: bool,
    free_workplace_call: bool,
    max_visitor_queue: usize,
    debug: bool,
    coarse_interval_secs: u64,
    fine_interval_secs: u64,
    workplace_stale_ms: u64,
    timetable: Timetable,
    services: Vec<Service>,
    workplaces: Vec<Workplace>,
    algorithms: Vec<Algorithm>,
    journal_file: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    event_buffer_size: usize,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            role: NodeRole::Serving,
            distribution: DistributionPolicy::Default,
            allow_unassigned: false,
            free_workplace_call: false,
            max_visitor_queue: 0,
            debug: false,
            coarse_interval_secs: default_coarse_interval(),
            fine_interval_secs: default_fine_interval(),
            workplace_stale_ms: default_workplace_stale_ms(),
            timetable: Self::default_timetable(),
            services: Self::default_services(),
            workplaces: Self::default_workplaces(),
            algorithms: vec![Algorithm::new(AlgorithmId(1), "default")],
            journal_file: default_journal_file(),
            metrics_interval_secs: default_metrics_interval(),
            prometheus_port: default_prometheus_port(),
            event_buffer_size: default_event_buffer(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    fn default_timetable() -> Timetable {
        let begin = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN);
        let end = NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN);
        Timetable::new(vec![Schedule::new(ScheduleId(1), begin, end)])
    }

    fn default_services() -> Vec<Service> {
        vec![
            Service::new(ServiceId(1), "Consultation").with_prefix("A"),
            Service::new(ServiceId(2), "Documents").with_prefix("D").with_holdover_to(ServiceId(1)),
        ]
    }

    fn default_workplaces() -> Vec<Workplace> {
        vec![
            Workplace::new(WorkplaceId(1), "Window 1", AlgorithmId(1))
                .with_service(ServiceId(1), MaintenanceMode::Both),
            Workplace::new(WorkplaceId(2), "Window 2", AlgorithmId(1))
                .with_service(ServiceId(2), MaintenanceMode::Both),
        ]
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let defaults = Self::default();
        let mut timetable = Timetable::new(toml_config.timetable.schedules);
        timetable.around_the_clock = toml_config.timetable.around_the_clock;

        Ok(Self {
            site_id: toml_config.site.id,
            role: toml_config.site.role,
            distribution: toml_config.queue.distribution,
            allow_unassigned: toml_config.queue.allow_unassigned,
            free_workplace_call: toml_config.queue.free_workplace_call,
            max_visitor_queue: toml_config.queue.max_visitor_queue,
            debug: toml_config.queue.debug,
            coarse_interval_secs: toml_config.timers.coarse_interval_secs,
            fine_interval_secs: toml_config.timers.fine_interval_secs,
            workplace_stale_ms: toml_config.timers.workplace_stale_ms,
            timetable,
            services: toml_config.services,
            workplaces: toml_config.workplaces,
            algorithms: if toml_config.algorithms.is_empty() {
                defaults.algorithms
            } else {
                toml_config.algorithms
            },
            journal_file: toml_config.journal.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            event_buffer_size: toml_config.events.buffer_size,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    pub fn is_serving(&self) -> bool {
        self.role == NodeRole::Serving
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn distribution(&self) -> DistributionPolicy {
        self.distribution
    }

    pub fn allow_unassigned(&self) -> bool {
        self.allow_unassigned
    }

    pub fn free_workplace_call(&self) -> bool {
        self.free_workplace_call
    }

    pub fn max_visitor_queue(&self) -> usize {
        self.max_visitor_queue
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn coarse_interval_secs(&self) -> u64 {
        self.coarse_interval_secs
    }

    pub fn fine_interval_secs(&self) -> u64 {
        self.fine_interval_secs
    }

    pub fn workplace_stale_ms(&self) -> u64 {
        self.workplace_stale_ms
    }

    pub fn timetable(&self) -> &Timetable {
        &self.timetable
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn workplaces(&self) -> &[Workplace] {
        &self.workplaces
    }

    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    pub fn journal_file(&self) -> &str {
        &self.journal_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn event_buffer_size(&self) -> usize {
        self.event_buffer_size
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the distribution policy
    #[cfg(test)]
    pub fn with_distribution(mut self, policy: DistributionPolicy, allow_unassigned: bool) -> Self {
        self.distribution = policy;
        self.allow_unassigned = allow_unassigned;
        self
    }

    #[cfg(test)]
    pub fn with_free_workplace_call(mut self, enabled: bool) -> Self {
        self.free_workplace_call = enabled;
        self
    }

    #[cfg(test)]
    pub fn with_max_visitor_queue(mut self, limit: usize) -> Self {
        self.max_visitor_queue = limit;
        self
    }

    #[cfg(test)]
    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    /// Builder method for tests to replace the seeded reference data
    #[cfg(test)]
    pub fn with_seed(
        mut self,
        services: Vec<Service>,
        workplaces: Vec<Workplace>,
        algorithms: Vec<Algorithm>,
    ) -> Self {
        self.services = services;
        self.workplaces = workplaces;
        self.algorithms = algorithms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "office");
        assert!(config.is_serving());
        assert_eq!(config.distribution(), DistributionPolicy::Default);
        assert_eq!(config.max_visitor_queue(), 0);
        assert_eq!(config.coarse_interval_secs(), 60);
        assert_eq!(config.fine_interval_secs(), 1);
        assert_eq!(config.workplace_stale_ms(), 215_000);
        assert_eq!(config.timetable().schedules.len(), 1);
        assert_eq!(config.algorithms().len(), 1);
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["office-queue".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "office-queue".to_string(),
            "--config".to_string(),
            "config/branch.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/branch.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["office-queue".to_string(), "--config=config/night.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/night.toml");
    }

    #[test]
    fn test_journal_file_default() {
        let journal = JournalConfig::default();
        assert_eq!(journal.file, "events.jsonl");
        assert_eq!(Config::default().journal_file(), "events.jsonl");
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let parsed: TomlConfig = toml::from_str("[queue]\ndistribution = \"by_room\"\n").unwrap();
        assert_eq!(parsed.queue.distribution, DistributionPolicy::ByRoom);
        assert!(!parsed.queue.allow_unassigned);
        assert_eq!(parsed.timers.workplace_stale_ms, 215_000);
        assert_eq!(parsed.events.buffer_size, 1000);
    }
}
