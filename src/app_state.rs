// =============================================================================
// Central Application State — Vantage Market Scanner
// =============================================================================
//
// Ties the subsystems together and provides the snapshot served by the
// status API. The enrichment pipeline exclusively owns its per-ticker state
// and change-detector cache; only their statistics surface here.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - Arc wrappers for subsystem engines that manage their own interior
//     mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::enrichment::change_detector::DetectorStats;
use crate::publish::delta::PublisherStats;
use crate::publish::DeltaPublisher;
use crate::rete::manager::ManagerStats;
use crate::rete::ReteManager;
use crate::runtime_config::RuntimeConfig;

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event for the status error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Enrichment-cycle statistics, updated by the pipeline after every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub cycle_count: u64,
    pub last_processed_timestamp: Option<String>,
    pub last_total: usize,
    pub last_changed: usize,
    pub skipped_tickers: u64,
    pub detector: DetectorStats,
}

/// Central application state shared across all async tasks via
/// `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, incremented on every
    /// meaningful state mutation.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub rete: Arc<ReteManager>,
    pub publisher: Arc<DeltaPublisher>,

    pub pipeline_stats: RwLock<PipelineStats>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Instant when the service was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        rete: Arc<ReteManager>,
        publisher: Arc<DeltaPublisher>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            rete,
            publisher,
            pipeline_stats: RwLock::new(PipelineStats::default()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message. The ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted when the limit is
    /// reached.
    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Status Snapshot ─────────────────────────────────────────────────

    /// Build the status payload served by `GET /api/v1/status`.
    pub fn build_status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            pipeline: self.pipeline_stats.read().clone(),
            rules: self.rete.stats(),
            publisher: self.publisher.stats(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

/// Full service status for the dashboard and health tooling.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub pipeline: PipelineStats,
    pub rules: ManagerStats,
    pub publisher: PublisherStats,
    pub recent_errors: Vec<ErrorRecord>,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(
            RuntimeConfig::default(),
            Arc::new(ReteManager::new(None)),
            Arc::new(DeltaPublisher::new()),
        )
    }

    #[test]
    fn version_increments() {
        let s = state();
        let v0 = s.current_state_version();
        s.increment_version();
        assert_eq!(s.current_state_version(), v0 + 1);
    }

    #[test]
    fn error_ring_is_capped() {
        let s = state();
        for i in 0..(MAX_RECENT_ERRORS + 10) {
            s.push_error(format!("error {i}"));
        }
        let errors = s.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors.last().unwrap().message, "error 59");
    }

    #[test]
    fn status_snapshot_serializes() {
        let s = state();
        s.push_error("boom".into());
        let snapshot = s.build_status();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"pipeline\""));
        assert!(json.contains("\"rules\""));
        assert!(json.contains("\"publisher\""));
        assert!(json.contains("boom"));
    }
}
