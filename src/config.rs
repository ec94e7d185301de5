//! Runtime configuration.
//!
//! Loaded from an optional JSON file, with every field defaulted so an
//! empty file (or none at all) yields a working setup. Secrets and the
//! database path can be overridden from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::calc::{BloomParams, VcpParams};
use crate::data::downloader::DownloaderConfig;
use crate::data::hybrid::HybridConfig;
use crate::data::retry::RetryConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TWSCREEN_CONFIG";
/// Environment variable overriding the API token.
pub const TOKEN_ENV: &str = "FINMIND_TOKEN";
/// Environment variable overriding the database path.
pub const DB_ENV: &str = "TWSCREEN_DB";

/// Primary API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Auth token; usually injected via FINMIND_TOKEN
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_calls_per_hour")]
    pub calls_per_hour: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: String::new(),
            calls_per_hour: default_calls_per_hour(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    crate::data::finmind::DEFAULT_BASE_URL.to_string()
}

fn default_calls_per_hour() -> u64 {
    600
}

fn default_timeout_secs() -> u64 {
    30
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "twscreen.db".to_string()
}

/// Cron schedules for the unattended mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Daily screen after market close on weekdays
    #[serde(default = "default_daily_cron")]
    pub daily_cron: String,
    /// Monthly company-list refresh
    #[serde(default = "default_monthly_cron")]
    pub monthly_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_cron: default_daily_cron(),
            monthly_cron: default_monthly_cron(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_daily_cron() -> String {
    "0 45 17 * * Mon-Fri".to_string() // 17:45 on weekdays
}

fn default_monthly_cron() -> String {
    "0 0 9 1 * *".to_string() // 09:00 on the first of the month
}

/// Top-level settings tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub vcp: VcpParams,
    #[serde(default)]
    pub bloom: BloomParams,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            retry: RetryConfig::default(),
            hybrid: HybridConfig::default(),
            downloader: DownloaderConfig::default(),
            vcp: VcpParams::default(),
            bloom: BloomParams::default(),
            storage: StorageConfig::default(),
            schedule: ScheduleConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings: config file (if present) plus environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "twscreen.json".to_string());
        let mut settings = if Path::new(&path).exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            let parsed: Settings = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid config file {}", path))?;
            info!(path = %path, "Configuration loaded");
            parsed
        } else {
            info!("No config file, using defaults");
            Settings::default()
        };

        if let Ok(token) = std::env::var(TOKEN_ENV) {
            settings.api.token = token;
        }
        if let Ok(db) = std::env::var(DB_ENV) {
            settings.storage.db_path = db;
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.api.calls_per_hour, 600);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.retry.intervals, vec![300, 600, 3600]);
        assert_eq!(settings.hybrid.min_stock_count, 1000);
        assert!((settings.hybrid.min_price_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(settings.downloader.initial_batch_size, 100);
        assert_eq!(settings.vcp.ma_long, 200);
        assert!((settings.vcp.new_high_tolerance - 0.10).abs() < f64::EPSILON);
        assert_eq!(settings.bloom.ma_slow, 55);
    }

    #[test]
    fn test_empty_json_yields_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.api.base_url, default_base_url());
        assert_eq!(settings.schedule.daily_cron, "0 45 17 * * Mon-Fri");
    }

    #[test]
    fn test_partial_override() {
        let settings: Settings =
            serde_json::from_str(r#"{"api": {"calls_per_hour": 1200}, "vcp": {"new_high_tolerance": 0.01}}"#)
                .unwrap();
        assert_eq!(settings.api.calls_per_hour, 1200);
        assert!((settings.vcp.new_high_tolerance - 0.01).abs() < f64::EPSILON);
        // Untouched fields keep their defaults
        assert_eq!(settings.api.base_url, default_base_url());
        assert_eq!(settings.vcp.ma_long, 200);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let settings = Settings::default();
        let json = serde_json::to_string_pretty(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.api.calls_per_hour, settings.api.calls_per_hour);
        assert_eq!(back.schedule.monthly_cron, settings.schedule.monthly_cron);
    }
}
