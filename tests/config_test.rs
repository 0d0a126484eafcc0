//! Integration tests for configuration loading

use badge_occupancy::infra::config::FetchOrder;
use badge_occupancy::infra::Config;
use badge_occupancy::services::ParseMode;
use chrono::NaiveTime;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[database]
url = "postgres://reader:secret@db:5432/access"
page_size = 500
order = "asc"

[session]
stuck_threshold_secs = 36000
parse_mode = "lenient"
visitor_department = "GUEST"

[carry_over]
enabled = true
evening_start = "22:00:00"
morning_end = "10:30:00"

[detail]
custom_attributes = ["NIPEG", " jabatan "]
cache_capacity = 250

[scheduler]
cycle_timeout_secs = 60
metrics_interval_secs = 15

[snapshot]
dir = "/var/lib/badge-occupancy"

[[zones]]
name = "hijau"
in_devices = ["GATE-A", "GATE-B"]
out_devices = ["GATE-A-READER"]
interval_secs = 10

[[zones]]
name = "merah"
in_devices = ["RED-IN"]
out_devices = ["RED-OUT"]
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.database_url(), Some("postgres://reader:secret@db:5432/access"));
    assert_eq!(config.page_size(), 500);
    assert_eq!(config.fetch_order(), FetchOrder::Asc);
    assert_eq!(config.stuck_threshold_secs(), 36_000);
    assert_eq!(config.parse_mode(), ParseMode::Lenient);
    assert_eq!(config.visitor_department(), "GUEST");
    assert!(config.carry_over_enabled());
    assert_eq!(
        config.carry_over_band(),
        (NaiveTime::from_hms_opt(22, 0, 0).unwrap(), NaiveTime::from_hms_opt(10, 30, 0).unwrap())
    );
    assert_eq!(config.custom_attributes(), &["nipeg", "jabatan"]);
    assert_eq!(config.detail_cache_capacity(), 250);
    assert_eq!(config.cycle_timeout_secs(), 60);
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.snapshot_dir(), Some("/var/lib/badge-occupancy"));

    let hijau = config.zone("hijau").unwrap();
    assert_eq!(hijau.interval_secs, 10);
    assert_eq!(hijau.out_devices, vec!["GATE-A-READER"]);
    assert_eq!(config.zone("merah").unwrap().interval_secs, 30);
}

#[test]
fn test_missing_sections_use_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[snapshot]\ndir = \"out\"\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.page_size(), 800);
    assert_eq!(config.fetch_order(), FetchOrder::Desc);
    assert_eq!(config.stuck_threshold_secs(), 43_200);
    assert_eq!(config.zones().len(), 2);
    assert!(!config.carry_over_enabled());
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[database\npage_size = ").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.page_size(), 800);
    assert_eq!(config.cycle_timeout_secs(), 120);
    assert_eq!(config.zones()[0].name, "hijau");
    assert_eq!(config.zones()[1].name, "merah");
}
