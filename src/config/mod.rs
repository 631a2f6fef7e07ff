use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub detail: DetailConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

/// REST backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// `status --wait` polls this many times before giving up.
    #[serde(default = "default_status_poll_attempts")]
    pub status_poll_attempts: usize,

    #[serde(default = "default_status_poll_delay_ms")]
    pub status_poll_delay_ms: u64,
}

/// Socket.IO push channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SocketConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: usize,

    #[serde(default = "default_reconnection_delay_ms")]
    pub reconnection_delay_ms: u64,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Ranking table configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_page_sizes")]
    pub page_sizes: Vec<u32>,
}

/// Per-stock drill-down configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetailConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    #[serde(default = "default_page_size_u")]
    pub page_size: usize,

    #[serde(default = "default_candle_type")]
    pub candle_type: String,
}

/// CSV export configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_file")]
    pub file_name: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    "live-chart/0.1 (terminal client for the real-time RS ranking service)".to_string()
}
fn default_status_poll_attempts() -> usize {
    10
}
fn default_status_poll_delay_ms() -> u64 {
    1000
}
fn default_namespace() -> String {
    "/chart".to_string()
}
fn default_reconnection_attempts() -> usize {
    5
}
fn default_reconnection_delay_ms() -> u64 {
    2000
}
fn default_event_buffer() -> usize {
    256
}
fn default_page_size() -> u32 {
    10
}
fn default_page_sizes() -> Vec<u32> {
    vec![10, 20, 30, 50]
}
fn default_lookback_days() -> i64 {
    7
}
fn default_page_size_u() -> usize {
    10
}
fn default_candle_type() -> String {
    "day".to_string()
}
fn default_export_file() -> PathBuf {
    PathBuf::from("live_chart_ranking.csv")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            status_poll_attempts: default_status_poll_attempts(),
            status_poll_delay_ms: default_status_poll_delay_ms(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            reconnection_attempts: default_reconnection_attempts(),
            reconnection_delay_ms: default_reconnection_delay_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_sizes: default_page_sizes(),
        }
    }
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            page_size: default_page_size_u(),
            candle_type: default_candle_type(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            file_name: default_export_file(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            socket: SocketConfig::default(),
            table: TableConfig::default(),
            detail: DetailConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("LIVE_CHART").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Config invalid ({}), falling back to defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg)
    }

    /// True when `size` is one of the offered page sizes.
    pub fn is_allowed_page_size(&self, size: u32) -> bool {
        self.table.page_sizes.contains(&size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_backend_contract() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.socket.namespace, "/chart");
        assert_eq!(cfg.socket.reconnection_attempts, 5);
        assert_eq!(cfg.socket.reconnection_delay_ms, 2000);
        assert_eq!(cfg.table.page_size, 10);
        assert!(cfg.is_allowed_page_size(50));
        assert!(!cfg.is_allowed_page_size(15));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[api]\nbase_url = \"https://rank.example.com\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.api.base_url, "https://rank.example.com");
        assert_eq!(cfg.api.timeout_secs, 10);
        assert_eq!(cfg.detail.lookback_days, 7);
    }
}
