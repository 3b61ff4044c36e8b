// =============================================================================
// Runtime Configuration — scanner settings with atomic save
// =============================================================================
//
// Central configuration hub for the scanner service. Persistence uses an
// atomic tmp + rename pattern to prevent corruption on crash. All fields
// carry serde defaults so that adding new fields never breaks loading an
// older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::redis_store::StoreTtls;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_db_path() -> String {
    "scanner_filters.db".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_cycle_interval_ms() -> u64 {
    250
}

fn default_idle_interval_ms() -> u64 {
    1000
}

fn default_io_timeout_secs() -> u64 {
    10
}

fn default_safety_reload_interval_secs() -> u64 {
    300
}

fn default_enriched_ttl_secs() -> i64 {
    600
}

fn default_last_close_ttl_secs() -> i64 {
    604_800
}

fn default_rvol_ttl_secs() -> i64 {
    300
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the scanner.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- External stores -----------------------------------------------------

    /// Redis URL for the shared snapshot store and pub/sub channels.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Path to the SQLite database holding user scanner filters.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Bind address for the status/WebSocket HTTP server.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // --- Cycle pacing --------------------------------------------------------

    /// Pause between enrichment cycles when the last snapshot was processed.
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,

    /// Pause when the snapshot is empty or unchanged.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,

    // --- I/O bounds ----------------------------------------------------------

    /// Timeout applied to every external I/O operation.
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,

    /// Interval of the rule-count safety reload.
    #[serde(default = "default_safety_reload_interval_secs")]
    pub safety_reload_interval_secs: u64,

    // --- TTLs ----------------------------------------------------------------

    /// TTL of the enriched hash, refreshed on every write.
    #[serde(default = "default_enriched_ttl_secs")]
    pub enriched_ttl_secs: i64,

    /// TTL of the last-close hash written on session-closed.
    #[serde(default = "default_last_close_ttl_secs")]
    pub last_close_ttl_secs: i64,

    /// TTL of the current-slot RVOL hash.
    #[serde(default = "default_rvol_ttl_secs")]
    pub rvol_ttl_secs: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
            cycle_interval_ms: default_cycle_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            io_timeout_secs: default_io_timeout_secs(),
            safety_reload_interval_secs: default_safety_reload_interval_secs(),
            enriched_ttl_secs: default_enriched_ttl_secs(),
            last_close_ttl_secs: default_last_close_ttl_secs(),
            rvol_ttl_secs: default_rvol_ttl_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            redis_url = %config.redis_url,
            bind_addr = %config.bind_addr,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn safety_reload_interval(&self) -> Duration {
        Duration::from_secs(self.safety_reload_interval_secs)
    }

    pub fn store_ttls(&self) -> StoreTtls {
        StoreTtls {
            enriched: self.enriched_ttl_secs,
            last_close: self.last_close_ttl_secs,
            rvol: self.rvol_ttl_secs,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(cfg.bind_addr, "0.0.0.0:3001");
        assert_eq!(cfg.cycle_interval_ms, 250);
        assert_eq!(cfg.io_timeout_secs, 10);
        assert_eq!(cfg.safety_reload_interval_secs, 300);
        assert_eq!(cfg.enriched_ttl_secs, 600);
        assert_eq!(cfg.last_close_ttl_secs, 604_800);
        assert_eq!(cfg.rvol_ttl_secs, 300);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(cfg.idle_interval_ms, 1000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "redis_url": "redis://cache:6379", "cycle_interval_ms": 100 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.redis_url, "redis://cache:6379");
        assert_eq!(cfg.cycle_interval_ms, 100);
        assert_eq!(cfg.db_path, "scanner_filters.db");
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.bind_addr = "127.0.0.1:9000".into();
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.bind_addr, "127.0.0.1:9000");
        assert_eq!(loaded.redis_url, cfg.redis_url);
    }

    #[test]
    fn ttls_flow_into_store_settings() {
        let cfg = RuntimeConfig::default();
        let ttls = cfg.store_ttls();
        assert_eq!(ttls.enriched, 600);
        assert_eq!(ttls.last_close, 604_800);
        assert_eq!(ttls.rvol, 300);
    }
}
