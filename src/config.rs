// =============================================================================
// Engine configuration — load/save/validate with atomic persistence
// =============================================================================
//
// One struct covering every tunable in SPEC_FULL §4.8/§6.3: event bus queue
// capacity, rate limiter, WebSocket pool placement/heartbeat/reconnection,
// pump detector thresholds, and the six risk limits plus margin severity
// tiers. Grounded on the host's `runtime_config.rs`: every field carries a
// `#[serde(default = "...")]` so older config files keep loading, and `save`
// uses the same write-tmp-then-rename atomic pattern. Env override follows
// the host's single-hook pattern (`AURORA_SYMBOLS` there, `ENGINE_SYMBOLS`
// here).
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::risk::RiskConfig;

fn default_exchange_name() -> String {
    "mexc".to_string()
}

fn default_ws_url() -> String {
    "wss://contract.mexc.com/edge".to_string()
}

fn default_rest_base_url() -> String {
    "https://contract.mexc.com".to_string()
}

fn default_symbols() -> Vec<String> {
    vec!["BTC_USDT".to_string(), "ETH_USDT".to_string()]
}

fn default_event_bus_queue_capacity() -> usize {
    1024
}

fn default_rate_limiter_capacity() -> u32 {
    30
}

fn default_rate_limiter_refill_per_sec() -> u32 {
    5
}

fn default_max_connections() -> usize {
    5
}

fn default_max_subs_per_connection() -> usize {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_pong_warn_threshold_secs() -> u64 {
    60
}

fn default_pong_reconnect_threshold_secs() -> u64 {
    120
}

fn default_pre_close_health_check_timeout_secs() -> u64 {
    10
}

fn default_snapshot_refresh_interval_secs() -> u64 {
    300
}

fn default_activity_threshold_high_secs() -> u64 {
    60
}

fn default_activity_threshold_medium_secs() -> u64 {
    120
}

fn default_activity_threshold_low_secs() -> u64 {
    300
}

fn default_baseline_window_minutes() -> u64 {
    10
}

fn default_velocity_window_seconds() -> u64 {
    30
}

fn default_min_pump_magnitude_pct() -> f64 {
    7.0
}

fn default_volume_surge_multiplier() -> f64 {
    3.5
}

fn default_velocity_threshold() -> f64 {
    0.5
}

fn default_min_volume_24h_usdt() -> Decimal {
    Decimal::from(100_000)
}

fn default_peak_confirmation_window_secs() -> u64 {
    30
}

fn default_min_confidence_threshold() -> f64 {
    60.0
}

fn default_min_retracement_pct() -> f64 {
    2.0
}

fn default_ring_buffer_capacity() -> usize {
    1000
}

fn default_initial_capital() -> Decimal {
    Decimal::from(10_000)
}

/// Per-volume-category data-staleness thresholds (SPEC_FULL §4.8,
/// spec §4.2's "optionally per-symbol-category" note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityThresholds {
    #[serde(default = "default_activity_threshold_high_secs")]
    pub high_volume_secs: u64,
    #[serde(default = "default_activity_threshold_medium_secs")]
    pub medium_volume_secs: u64,
    #[serde(default = "default_activity_threshold_low_secs")]
    pub low_volume_secs: u64,
    #[serde(default)]
    pub high_volume_symbols: Vec<String>,
    #[serde(default)]
    pub medium_volume_symbols: Vec<String>,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self {
            high_volume_secs: default_activity_threshold_high_secs(),
            medium_volume_secs: default_activity_threshold_medium_secs(),
            low_volume_secs: default_activity_threshold_low_secs(),
            high_volume_symbols: Vec::new(),
            medium_volume_symbols: Vec::new(),
        }
    }
}

/// A symbol's data-staleness classification, used to pick the right member
/// of [`ActivityThresholds`] (§6.3, open question 4: static set membership,
/// no dynamic reclassification from observed throughput).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeCategory {
    High,
    Medium,
    Low,
}

impl ActivityThresholds {
    pub fn classify(&self, symbol: &str) -> VolumeCategory {
        if self.high_volume_symbols.iter().any(|s| s == symbol) {
            VolumeCategory::High
        } else if self.medium_volume_symbols.iter().any(|s| s == symbol) {
            VolumeCategory::Medium
        } else {
            VolumeCategory::Low
        }
    }

    pub fn staleness_limit(&self, category: VolumeCategory) -> Duration {
        match category {
            VolumeCategory::High => Duration::from_secs(self.high_volume_secs),
            VolumeCategory::Medium => Duration::from_secs(self.medium_volume_secs),
            VolumeCategory::Low => Duration::from_secs(self.low_volume_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_event_bus_queue_capacity")]
    pub event_bus_queue_capacity: usize,

    #[serde(default = "default_rate_limiter_capacity")]
    pub rate_limiter_capacity: u32,
    #[serde(default = "default_rate_limiter_refill_per_sec")]
    pub rate_limiter_refill_per_sec: u32,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_subs_per_connection")]
    pub max_subs_per_connection: usize,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_pong_warn_threshold_secs")]
    pub pong_warn_threshold_secs: u64,
    #[serde(default = "default_pong_reconnect_threshold_secs")]
    pub pong_reconnect_threshold_secs: u64,
    #[serde(default = "default_pre_close_health_check_timeout_secs")]
    pub pre_close_health_check_timeout_secs: u64,
    #[serde(default = "default_snapshot_refresh_interval_secs")]
    pub snapshot_refresh_interval_secs: u64,
    #[serde(default)]
    pub activity_thresholds: ActivityThresholds,

    #[serde(default = "default_baseline_window_minutes")]
    pub baseline_window_minutes: u64,
    #[serde(default = "default_velocity_window_seconds")]
    pub velocity_window_seconds: u64,
    #[serde(default = "default_min_pump_magnitude_pct")]
    pub min_pump_magnitude_pct: f64,
    #[serde(default = "default_volume_surge_multiplier")]
    pub volume_surge_multiplier: f64,
    #[serde(default = "default_velocity_threshold")]
    pub velocity_threshold: f64,
    #[serde(default = "default_min_volume_24h_usdt")]
    pub min_volume_24h_usdt: Decimal,
    #[serde(default = "default_peak_confirmation_window_secs")]
    pub peak_confirmation_window_secs: u64,
    #[serde(default = "default_min_confidence_threshold")]
    pub min_confidence_threshold: f64,
    #[serde(default = "default_min_retracement_pct")]
    pub min_retracement_pct: f64,
    #[serde(default = "default_ring_buffer_capacity")]
    pub ring_buffer_capacity: usize,

    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    #[serde(default)]
    pub risk: RiskConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exchange_name: default_exchange_name(),
            ws_url: default_ws_url(),
            rest_base_url: default_rest_base_url(),
            symbols: default_symbols(),
            event_bus_queue_capacity: default_event_bus_queue_capacity(),
            rate_limiter_capacity: default_rate_limiter_capacity(),
            rate_limiter_refill_per_sec: default_rate_limiter_refill_per_sec(),
            max_connections: default_max_connections(),
            max_subs_per_connection: default_max_subs_per_connection(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            pong_warn_threshold_secs: default_pong_warn_threshold_secs(),
            pong_reconnect_threshold_secs: default_pong_reconnect_threshold_secs(),
            pre_close_health_check_timeout_secs: default_pre_close_health_check_timeout_secs(),
            snapshot_refresh_interval_secs: default_snapshot_refresh_interval_secs(),
            activity_thresholds: ActivityThresholds::default(),
            baseline_window_minutes: default_baseline_window_minutes(),
            velocity_window_seconds: default_velocity_window_seconds(),
            min_pump_magnitude_pct: default_min_pump_magnitude_pct(),
            volume_surge_multiplier: default_volume_surge_multiplier(),
            velocity_threshold: default_velocity_threshold(),
            min_volume_24h_usdt: default_min_volume_24h_usdt(),
            peak_confirmation_window_secs: default_peak_confirmation_window_secs(),
            min_confidence_threshold: default_min_confidence_threshold(),
            min_retracement_pct: default_min_retracement_pct(),
            ring_buffer_capacity: default_ring_buffer_capacity(),
            initial_capital: default_initial_capital(),
            risk: RiskConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`, falling back to defaults (with a warning logged by
    /// the caller) if the file is missing or unparseable.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let mut config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        if let Ok(syms) = std::env::var("ENGINE_SYMBOLS") {
            config.symbols = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        info!(path = %path.display(), symbols = ?config.symbols, "engine config loaded");
        Ok(config)
    }

    /// Persist to `path` using an atomic write-tmp-then-rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialize engine config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    pub fn baseline_window(&self) -> Duration {
        Duration::from_secs(self.baseline_window_minutes * 60)
    }

    pub fn velocity_window(&self) -> Duration {
        Duration::from_secs(self.velocity_window_seconds)
    }

    pub fn peak_confirmation_window(&self) -> Duration {
        Duration::from_secs(self.peak_confirmation_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.ws_url, default_ws_url());
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.rate_limiter_capacity, 30);
        assert_eq!(cfg.min_confidence_threshold, 60.0);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ETH_USDT"], "max_connections": 2 }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETH_USDT"]);
        assert_eq!(cfg.max_connections, 2);
        assert_eq!(cfg.max_subs_per_connection, 30);
    }

    #[test]
    fn roundtrip_save_and_load() {
        let dir = std::env::temp_dir().join(format!("engine_config_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine_config.json");

        let cfg = EngineConfig::default();
        cfg.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, cfg.symbols);
        assert_eq!(loaded.ws_url, cfg.ws_url);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn activity_thresholds_classify_by_static_membership() {
        let thresholds = ActivityThresholds {
            high_volume_symbols: vec!["BTC_USDT".to_string()],
            medium_volume_symbols: vec!["ETH_USDT".to_string()],
            ..ActivityThresholds::default()
        };
        assert_eq!(thresholds.classify("BTC_USDT"), VolumeCategory::High);
        assert_eq!(thresholds.classify("ETH_USDT"), VolumeCategory::Medium);
        assert_eq!(thresholds.classify("XRP_USDT"), VolumeCategory::Low);
        assert_eq!(thresholds.staleness_limit(VolumeCategory::Low), Duration::from_secs(300));
    }
}
