use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::LevelFilter;

use crate::scanner::ScanConfig;

pub struct Config {
    pub music_path: String,
    pub api_host: String,
    pub api_port: u16,
    pub database_url: String,
    pub log_level: LevelFilter,
    pub batch_size: usize,
    pub decode_timeout: Duration,
    pub batch_pause: Duration,
    pub show_progress: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str, default| parse_or(lookup(key), default);

        Self {
            music_path: lookup("MUSIC_PATH").unwrap_or_else(|| "./music".to_string()),
            api_host: lookup("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            api_port: parse_or(lookup("API_PORT"), 8000),
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://noxtune.db?mode=rwc".to_string()),
            log_level: parse_or(lookup("LOG_LEVEL"), LevelFilter::Info),
            batch_size: parse_or(lookup("SCAN_BATCH_SIZE"), 100usize).max(1),
            decode_timeout: Duration::from_secs(parsed("SCAN_DECODE_TIMEOUT_SECS", 5)),
            batch_pause: Duration::from_millis(parsed("SCAN_BATCH_PAUSE_MS", 100)),
            show_progress: parse_or(lookup("SCAN_SHOW_PROGRESS"), true),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            batch_size: self.batch_size,
            decode_timeout: self.decode_timeout,
            batch_pause: self.batch_pause,
            show_progress: self.show_progress,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
