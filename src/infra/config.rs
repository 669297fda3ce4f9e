//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct BuildingConfig {
    /// Highest floor; valid floors are 0..=floors
    #[serde(default = "default_floors")]
    pub floors: i32,
    /// Cars provisioned at startup (car-1..car-N, all at floor 0)
    #[serde(default = "default_initial_cars")]
    pub initial_cars: u32,
}

fn default_floors() -> i32 {
    10
}

fn default_initial_cars() -> u32 {
    3
}

impl Default for BuildingConfig {
    fn default() -> Self {
        Self { floors: default_floors(), initial_cars: default_initial_cars() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Simulated transit time per floor
    #[serde(default = "default_floor_travel_ms")]
    pub floor_travel_ms: u64,
    /// DOORS_OPENING -> DOORS_OPEN
    #[serde(default = "default_door_phase_ms")]
    pub door_open_ms: u64,
    /// DOORS_OPEN -> DOORS_CLOSING
    #[serde(default = "default_door_phase_ms")]
    pub door_dwell_ms: u64,
    /// DOORS_CLOSING -> IDLE
    #[serde(default = "default_door_phase_ms")]
    pub door_close_ms: u64,
}

fn default_floor_travel_ms() -> u64 {
    2000
}

fn default_door_phase_ms() -> u64 {
    2000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            floor_travel_ms: default_floor_travel_ms(),
            door_open_ms: default_door_phase_ms(),
            door_dwell_ms: default_door_phase_ms(),
            door_close_ms: default_door_phase_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Worker tasks processing movement jobs
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Step retry attempts before a job is failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Lease time-to-live; refreshed on every step write
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            lease_ttl_ms: default_lease_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: "localhost".to_string(), port: 1883, username: None, password: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { bind_address: default_broker_bind_address(), port: default_broker_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Enable MQTT fan-out publishing
    #[serde(default = "default_notify_enabled")]
    pub enabled: bool,
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
    #[serde(default = "default_failures_topic")]
    pub failures_topic: String,
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Interval for publishing metrics snapshots (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

fn default_notify_enabled() -> bool {
    true
}

fn default_state_topic() -> String {
    "lift/state".to_string()
}

fn default_events_topic() -> String {
    "lift/events".to_string()
}

fn default_failures_topic() -> String {
    "lift/failures".to_string()
}

fn default_metrics_topic() -> String {
    "lift/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: default_notify_enabled(),
            state_topic: default_state_topic(),
            events_topic: default_events_topic(),
            failures_topic: default_failures_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventLogConfig {
    /// File path for the durable event log (JSONL format)
    #[serde(default = "default_event_log_file")]
    pub file: String,
}

fn default_event_log_file() -> String {
    "events.jsonl".to_string()
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { file: default_event_log_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Call/status API port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Interval for the periodic summary log (seconds)
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Deployment identifier included in every published payload
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "liftbank".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub building: BuildingConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    floors: i32,
    initial_cars: u32,
    floor_travel_ms: u64,
    door_open_ms: u64,
    door_dwell_ms: u64,
    door_close_ms: u64,
    scheduler_workers: usize,
    max_attempts: u32,
    backoff_base_ms: u64,
    lease_ttl_ms: u64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_bind_address: String,
    broker_port: u16,
    notify_enabled: bool,
    notify_state_topic: String,
    notify_events_topic: String,
    notify_failures_topic: String,
    notify_metrics_topic: String,
    notify_metrics_interval_secs: u64,
    event_log_file: String,
    http_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, source: &str) -> Self {
        Self {
            site_id: if toml_config.site.id.is_empty() {
                default_site_id()
            } else {
                toml_config.site.id
            },
            floors: toml_config.building.floors,
            initial_cars: toml_config.building.initial_cars,
            floor_travel_ms: toml_config.timing.floor_travel_ms,
            door_open_ms: toml_config.timing.door_open_ms,
            door_dwell_ms: toml_config.timing.door_dwell_ms,
            door_close_ms: toml_config.timing.door_close_ms,
            scheduler_workers: toml_config.scheduler.workers,
            max_attempts: toml_config.scheduler.max_attempts,
            backoff_base_ms: toml_config.scheduler.backoff_base_ms,
            lease_ttl_ms: toml_config.scheduler.lease_ttl_ms,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            notify_enabled: toml_config.notify.enabled,
            notify_state_topic: toml_config.notify.state_topic,
            notify_events_topic: toml_config.notify.events_topic,
            notify_failures_topic: toml_config.notify.failures_topic,
            notify_metrics_topic: toml_config.notify.metrics_topic,
            notify_metrics_interval_secs: toml_config.notify.metrics_publish_interval_secs,
            event_log_file: toml_config.event_log.file,
            http_port: toml_config.http.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: source.to_string(),
        }
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

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// True when the floor is inside the building
    pub fn is_valid_floor(&self, floor: i32) -> bool {
        (0..=self.floors).contains(&floor)
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn floors(&self) -> i32 {
        self.floors
    }

    pub fn initial_cars(&self) -> u32 {
        self.initial_cars
    }

    pub fn floor_travel_ms(&self) -> u64 {
        self.floor_travel_ms
    }

    pub fn door_open_ms(&self) -> u64 {
        self.door_open_ms
    }

    pub fn door_dwell_ms(&self) -> u64 {
        self.door_dwell_ms
    }

    pub fn door_close_ms(&self) -> u64 {
        self.door_close_ms
    }

    pub fn scheduler_workers(&self) -> usize {
        self.scheduler_workers
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_base_ms(&self) -> u64 {
        self.backoff_base_ms
    }

    pub fn lease_ttl_ms(&self) -> u64 {
        self.lease_ttl_ms
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn notify_enabled(&self) -> bool {
        self.notify_enabled
    }

    pub fn notify_state_topic(&self) -> &str {
        &self.notify_state_topic
    }

    pub fn notify_events_topic(&self) -> &str {
        &self.notify_events_topic
    }

    pub fn notify_failures_topic(&self) -> &str {
        &self.notify_failures_topic
    }

    pub fn notify_metrics_topic(&self) -> &str {
        &self.notify_metrics_topic
    }

    pub fn notify_metrics_interval_secs(&self) -> u64 {
        self.notify_metrics_interval_secs
    }

    pub fn event_log_file(&self) -> &str {
        &self.event_log_file
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shrink timing delays
    #[cfg(test)]
    pub fn with_timing_ms(mut self, floor: u64, door: u64) -> Self {
        self.floor_travel_ms = floor;
        self.door_open_ms = door;
        self.door_dwell_ms = door;
        self.door_close_ms = door;
        self
    }

    /// Builder method for tests to set the retry budget
    #[cfg(test)]
    pub fn with_retry(mut self, max_attempts: u32, backoff_base_ms: u64) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    /// Builder method for tests to set the building size
    #[cfg(test)]
    pub fn with_floors(mut self, floors: i32) -> Self {
        self.floors = floors;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "liftbank");
        assert_eq!(config.floors(), 10);
        assert_eq!(config.initial_cars(), 3);
        assert_eq!(config.floor_travel_ms(), 2000);
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.backoff_base_ms(), 2000);
        assert_eq!(config.scheduler_workers(), 4);
        assert_eq!(config.http_port(), 8080);
        assert_eq!(config.notify_state_topic(), "lift/state");
    }

    #[test]
    fn test_is_valid_floor() {
        let config = Config::default();
        assert!(config.is_valid_floor(0));
        assert!(config.is_valid_floor(10));
        assert!(!config.is_valid_floor(-1));
        assert!(!config.is_valid_floor(11));
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["liftbank".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "liftbank".to_string(),
            "--config".to_string(),
            "config/tower.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/tower.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["liftbank".to_string(), "--config=config/tower.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/tower.toml");
    }

    #[test]
    fn test_empty_toml_parses_to_defaults() {
        let toml_config: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_toml(toml_config, "inline");
        assert_eq!(config.floors(), 10);
        assert_eq!(config.event_log_file(), "events.jsonl");
    }
}
