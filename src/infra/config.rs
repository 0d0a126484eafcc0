//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! After the file is loaded, environment variables override the database URL,
//! per-zone device lists and intervals, the stuck threshold and the custom
//! attribute keys (see `apply_env_overrides`).

use crate::services::normalizer::ParseMode;
use anyhow::Context;
use chrono::NaiveTime;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Order in which the store returns badge pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOrder {
    Asc,
    #[default]
    Desc,
}

impl FetchOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FetchOrder::Asc => "ASC",
            FetchOrder::Desc => "DESC",
        }
    }
}

/// Device lists and poll cadence for one monitored zone
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(default)]
    pub in_devices: Vec<String>,
    #[serde(default)]
    pub out_devices: Vec<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl ZoneConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            in_devices: Vec::new(),
            out_devices: Vec::new(),
            interval_secs: default_interval_secs(),
        }
    }

    /// A zone needs both entry and exit devices before it can be polled
    pub fn is_configured(&self) -> bool {
        !self.in_devices.is_empty() && !self.out_devices.is_empty()
    }
}

fn default_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub order: FetchOrder,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, page_size: default_page_size(), order: FetchOrder::default() }
    }
}

fn default_page_size() -> u32 {
    800
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,
    #[serde(default)]
    pub parse_mode: ParseMode,
    /// Department tag assigned to visitor reads
    #[serde(default = "default_visitor_department")]
    pub visitor_department: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_secs: default_stuck_threshold_secs(),
            parse_mode: ParseMode::default(),
            visitor_department: default_visitor_department(),
        }
    }
}

fn default_stuck_threshold_secs() -> u64 {
    12 * 3600
}

fn default_visitor_department() -> String {
    "TAMU".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarryOverConfig {
    /// Feed yesterday's window as carry-over instead of concatenating it
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_evening_start")]
    pub evening_start: NaiveTime,
    #[serde(default = "default_morning_end")]
    pub morning_end: NaiveTime,
}

impl Default for CarryOverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            evening_start: default_evening_start(),
            morning_end: default_morning_end(),
        }
    }
}

fn default_evening_start() -> NaiveTime {
    NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default()
}

fn default_morning_end() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailConfig {
    /// Attribute names read from the personnel extension table
    #[serde(default)]
    pub custom_attributes: Vec<String>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self { custom_attributes: Vec::new(), cache_capacity: default_cache_capacity() }
    }
}

fn default_cache_capacity() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_timeout_secs: default_cycle_timeout_secs(),
            metrics_interval_secs: default_metrics_interval_secs(),
        }
    }
}

fn default_cycle_timeout_secs() -> u64 {
    120
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SnapshotConfig {
    /// Directory for `<zone>.json` snapshot files (disabled when absent)
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub carry_over: CarryOverConfig,
    #[serde(default)]
    pub detail: DetailConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    database_url: Option<String>,
    page_size: u32,
    fetch_order: FetchOrder,
    stuck_threshold_secs: u64,
    parse_mode: ParseMode,
    visitor_department: String,
    carry_over_enabled: bool,
    carry_over_evening_start: NaiveTime,
    carry_over_morning_end: NaiveTime,
    custom_attributes: Vec<String>,
    detail_cache_capacity: usize,
    cycle_timeout_secs: u64,
    metrics_interval_secs: u64,
    snapshot_dir: Option<String>,
    zones: Vec<ZoneConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            page_size: default_page_size(),
            fetch_order: FetchOrder::Desc,
            stuck_threshold_secs: default_stuck_threshold_secs(),
            parse_mode: ParseMode::Strict,
            visitor_department: default_visitor_department(),
            carry_over_enabled: false,
            carry_over_evening_start: default_evening_start(),
            carry_over_morning_end: default_morning_end(),
            custom_attributes: Vec::new(),
            detail_cache_capacity: default_cache_capacity(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            metrics_interval_secs: default_metrics_interval_secs(),
            snapshot_dir: None,
            zones: Self::default_zones(),
            config_file: "default".to_string(),
        }
    }
}

/// Split a comma-separated list, dropping blanks
fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

impl Config {
    fn default_zones() -> Vec<ZoneConfig> {
        vec![ZoneConfig::new("hijau"), ZoneConfig::new("merah")]
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

        let zones =
            if toml_config.zones.is_empty() { Self::default_zones() } else { toml_config.zones };

        Ok(Self {
            database_url: toml_config.database.url,
            page_size: toml_config.database.page_size.max(1),
            fetch_order: toml_config.database.order,
            stuck_threshold_secs: toml_config.session.stuck_threshold_secs,
            parse_mode: toml_config.session.parse_mode,
            visitor_department: toml_config.session.visitor_department,
            carry_over_enabled: toml_config.carry_over.enabled,
            carry_over_evening_start: toml_config.carry_over.evening_start,
            carry_over_morning_end: toml_config.carry_over.morning_end,
            custom_attributes: toml_config
                .detail
                .custom_attributes
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            detail_cache_capacity: toml_config.detail.cache_capacity,
            cycle_timeout_secs: toml_config.scheduler.cycle_timeout_secs,
            metrics_interval_secs: toml_config.scheduler.metrics_interval_secs,
            snapshot_dir: toml_config.snapshot.dir,
            zones,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults, then apply env overrides
    pub fn load_from_path(path: &str) -> Self {
        let mut config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        };
        config.apply_env_overrides(|key| env::var(key).ok());
        config
    }

    /// Apply environment overrides using the given lookup
    ///
    /// Zone keys use the uppercased zone name: `IN_DEVICES_HIJAU`,
    /// `OUT_DEVICES_HIJAU`, `INTERVAL_HIJAU_SEC`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            self.database_url = Some(url);
        }
        if let Some(secs) = lookup("STUCK_THRESHOLD_SEC").and_then(|v| v.trim().parse().ok()) {
            self.stuck_threshold_secs = secs;
        }
        if let Some(keys) = lookup("CUSTOM_ATTRIBUT") {
            self.custom_attributes =
                split_list(&keys).into_iter().map(|k| k.to_lowercase()).collect();
        }

        for zone in &mut self.zones {
            let suffix = zone.name.to_uppercase();
            if let Some(list) = lookup(&format!("IN_DEVICES_{suffix}")) {
                zone.in_devices = split_list(&list);
            }
            if let Some(list) = lookup(&format!("OUT_DEVICES_{suffix}")) {
                zone.out_devices = split_list(&list);
            }
            if let Some(secs) =
                lookup(&format!("INTERVAL_{suffix}_SEC")).and_then(|v| v.trim().parse().ok())
            {
                zone.interval_secs = secs;
            }
        }
    }

    pub fn zone(&self, name: &str) -> Option<&ZoneConfig> {
        self.zones.iter().find(|z| z.name.eq_ignore_ascii_case(name))
    }

    // Getters for all config fields
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn fetch_order(&self) -> FetchOrder {
        self.fetch_order
    }

    pub fn stuck_threshold_secs(&self) -> u64 {
        self.stuck_threshold_secs
    }

    pub fn parse_mode(&self) -> ParseMode {
        self.parse_mode
    }

    pub fn visitor_department(&self) -> &str {
        &self.visitor_department
    }

    pub fn carry_over_enabled(&self) -> bool {
        self.carry_over_enabled
    }

    pub fn carry_over_band(&self) -> (NaiveTime, NaiveTime) {
        (self.carry_over_evening_start, self.carry_over_morning_end)
    }

    pub fn custom_attributes(&self) -> &[String] {
        &self.custom_attributes
    }

    pub fn detail_cache_capacity(&self) -> usize {
        self.detail_cache_capacity
    }

    pub fn cycle_timeout_secs(&self) -> u64 {
        self.cycle_timeout_secs
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn snapshot_dir(&self) -> Option<&str> {
        self.snapshot_dir.as_deref()
    }

    pub fn zones(&self) -> &[ZoneConfig] {
        &self.zones
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to replace the zone list
    pub fn with_zones(mut self, zones: Vec<ZoneConfig>) -> Self {
        self.zones = zones;
        self
    }

    /// Builder method to enable or disable carry-over mode
    pub fn with_carry_over(mut self, enabled: bool) -> Self {
        self.carry_over_enabled = enabled;
        self
    }

    /// Builder method to set the custom attribute keys
    pub fn with_custom_attributes(mut self, keys: &[&str]) -> Self {
        self.custom_attributes = keys.iter().map(|k| k.to_lowercase()).collect();
        self
    }

    /// Builder method to set the cycle timeout
    pub fn with_cycle_timeout_secs(mut self, secs: u64) -> Self {
        self.cycle_timeout_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.page_size(), 800);
        assert_eq!(config.fetch_order(), FetchOrder::Desc);
        assert_eq!(config.stuck_threshold_secs(), 43_200);
        assert_eq!(config.cycle_timeout_secs(), 120);
        assert_eq!(config.visitor_department(), "TAMU");
        assert_eq!(config.zones().len(), 2);
        assert_eq!(config.zones()[0].name, "hijau");
        assert_eq!(config.zones()[1].interval_secs, 30);
        assert!(!config.carry_over_enabled());
    }

    #[test]
    fn test_default_zones_are_not_configured() {
        let config = Config::default();
        assert!(config.zones().iter().all(|z| !z.is_configured()));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "postgres://u:p@db/acc"),
            ("IN_DEVICES_HIJAU", "GATE-A, GATE-B ,,"),
            ("OUT_DEVICES_HIJAU", "GATE-A-READER"),
            ("INTERVAL_HIJAU_SEC", "15"),
            ("INTERVAL_MERAH_SEC", "not-a-number"),
            ("CUSTOM_ATTRIBUT", "NIPEG, Jabatan"),
            ("STUCK_THRESHOLD_SEC", "3600"),
        ]);
        let mut config = Config::default();
        config.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.database_url(), Some("postgres://u:p@db/acc"));
        let hijau = config.zone("HIJAU").unwrap();
        assert_eq!(hijau.in_devices, vec!["GATE-A", "GATE-B"]);
        assert_eq!(hijau.out_devices, vec!["GATE-A-READER"]);
        assert_eq!(hijau.interval_secs, 15);
        assert!(hijau.is_configured());
        assert_eq!(config.zone("merah").unwrap().interval_secs, 30);
        assert_eq!(config.custom_attributes(), &["nipeg", "jabatan"]);
        assert_eq!(config.stuck_threshold_secs(), 3600);
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["badge-occupancy".to_string(), "--config".to_string(), "config/site.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/site.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["badge-occupancy".to_string(), "--config=config/other.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/other.toml");
    }

    #[test]
    fn test_default_carry_over_band() {
        let (evening, morning) = Config::default().carry_over_band();
        assert_eq!(evening, NaiveTime::from_hms_opt(21, 0, 0).unwrap());
        assert_eq!(morning, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
    }
}
