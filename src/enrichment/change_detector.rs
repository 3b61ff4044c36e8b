// =============================================================================
// Change Detector — byte-level dedup between enrichment cycles
// =============================================================================
//
// Keeps the previous cycle's canonical-JSON bytes per symbol and marks a
// ticker changed only when its bytes differ. Unchanged tickers are never
// rewritten to the shared hash, which cuts the steady-state write volume to
// the handful of symbols that actually moved.
//
// Contract:
//   - No false negatives: a symbol absent from the returned delta has bytes
//     bitwise-equal to the last written bytes.
//   - Symbols missing from the current input are pruned from the cache.
//   - `clear()` on day-change forces a full write on the next cycle.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::market_data::EnrichedTicker;

/// Detector statistics for the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectorStats {
    pub cycles: u64,
    pub cache_size: usize,
    pub total_compared: u64,
    pub total_changed: u64,
    pub avg_change_rate_pct: f64,
}

#[derive(Debug, Default)]
pub struct ChangeDetector {
    prev_bytes: HashMap<String, Vec<u8>>,
    cycles: u64,
    total_compared: u64,
    total_changed: u64,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// True before the first write (or after `clear()`), when no previous
    /// bytes exist and the caller should force a full write.
    pub fn is_first_cycle(&self) -> bool {
        self.prev_bytes.is_empty()
    }

    /// Compare the current enriched set against the previous cycle.
    ///
    /// Returns `(changed, total_count, changed_count)` where `changed` maps
    /// symbol to its serialized JSON for the hash write. Tickers that fail to
    /// serialize are skipped with a warning.
    pub fn detect_changes(
        &mut self,
        enriched: &HashMap<String, EnrichedTicker>,
    ) -> (HashMap<String, String>, usize, usize) {
        let mut changed = HashMap::new();
        let total = enriched.len();

        for (symbol, ticker) in enriched {
            let current = match serde_json::to_vec(ticker) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "failed to serialize enriched ticker — skipping");
                    continue;
                }
            };
            if self.prev_bytes.get(symbol).map(Vec::as_slice) != Some(current.as_slice()) {
                changed.insert(symbol.clone(), String::from_utf8_lossy(&current).into_owned());
                self.prev_bytes.insert(symbol.clone(), current);
            }
        }

        // Prune symbols that disappeared from the snapshot.
        self.prev_bytes.retain(|symbol, _| enriched.contains_key(symbol));

        self.cycles += 1;
        self.total_compared += total as u64;
        let changed_count = changed.len();
        self.total_changed += changed_count as u64;

        (changed, total, changed_count)
    }

    /// Serialize and return every ticker, seeding the cache. Used for the
    /// first cycle and after a day-change reset.
    pub fn force_full_write(
        &mut self,
        enriched: &HashMap<String, EnrichedTicker>,
    ) -> HashMap<String, String> {
        let mut result = HashMap::with_capacity(enriched.len());

        for (symbol, ticker) in enriched {
            let bytes = match serde_json::to_vec(ticker) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "failed to serialize enriched ticker — skipping");
                    continue;
                }
            };
            result.insert(symbol.clone(), String::from_utf8_lossy(&bytes).into_owned());
            self.prev_bytes.insert(symbol.clone(), bytes);
        }

        self.cycles += 1;
        self.total_compared += enriched.len() as u64;
        self.total_changed += result.len() as u64;

        result
    }

    /// Drop the entire cache. Called on day-change so the next cycle writes
    /// every ticker fresh.
    pub fn clear(&mut self) {
        let prev_cache_size = self.prev_bytes.len();
        self.prev_bytes.clear();
        info!(prev_cache_size, "change detector cleared");
    }

    /// Bytes cached for a symbol, if any. Test and diagnostics hook.
    pub fn cached_bytes(&self, symbol: &str) -> Option<&[u8]> {
        self.prev_bytes.get(symbol).map(Vec::as_slice)
    }

    pub fn stats(&self) -> DetectorStats {
        let avg_change_rate_pct = if self.total_compared > 0 {
            self.total_changed as f64 / self.total_compared as f64 * 100.0
        } else {
            0.0
        };
        DetectorStats {
            cycles: self.cycles,
            cache_size: self.prev_bytes.len(),
            total_compared: self.total_compared,
            total_changed: self.total_changed,
            avg_change_rate_pct,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, price: f64) -> EnrichedTicker {
        EnrichedTicker {
            symbol: symbol.to_string(),
            price: Some(price),
            ..Default::default()
        }
    }

    fn set(tickers: &[(&str, f64)]) -> HashMap<String, EnrichedTicker> {
        tickers
            .iter()
            .map(|(s, p)| (s.to_string(), ticker(s, *p)))
            .collect()
    }

    #[test]
    fn first_cycle_full_write_seeds_cache() {
        let mut detector = ChangeDetector::new();
        assert!(detector.is_first_cycle());

        let written = detector.force_full_write(&set(&[("AAA", 10.0), ("BBB", 20.0)]));
        assert_eq!(written.len(), 2);
        assert!(!detector.is_first_cycle());
        assert!(detector.cached_bytes("AAA").is_some());
    }

    #[test]
    fn identical_second_cycle_is_empty_delta() {
        let mut detector = ChangeDetector::new();
        let tickers = set(&[("AAA", 10.0), ("BBB", 20.0)]);
        detector.force_full_write(&tickers);

        let (changed, total, changed_count) = detector.detect_changes(&tickers);
        assert!(changed.is_empty());
        assert_eq!(total, 2);
        assert_eq!(changed_count, 0);
    }

    #[test]
    fn only_moved_tickers_appear_in_delta() {
        let mut detector = ChangeDetector::new();
        detector.force_full_write(&set(&[("AAA", 10.0), ("BBB", 20.0)]));

        let (changed, _, changed_count) =
            detector.detect_changes(&set(&[("AAA", 10.5), ("BBB", 20.0)]));
        assert_eq!(changed_count, 1);
        assert!(changed.contains_key("AAA"));
        assert!(!changed.contains_key("BBB"));
    }

    #[test]
    fn delta_membership_matches_byte_inequality() {
        let mut detector = ChangeDetector::new();
        let first = set(&[("AAA", 10.0), ("BBB", 20.0), ("CCC", 30.0)]);
        detector.force_full_write(&first);

        let second = set(&[("AAA", 11.0), ("BBB", 20.0), ("CCC", 30.0)]);
        let (changed, _, _) = detector.detect_changes(&second);

        for (symbol, ticker) in &second {
            let bytes = serde_json::to_vec(ticker).unwrap();
            // Post-detection, every cached entry equals the latest bytes.
            assert_eq!(detector.cached_bytes(symbol), Some(bytes.as_slice()));
            // And membership in the delta mirrors whether bytes moved.
            if changed.contains_key(symbol) {
                assert_eq!(symbol, "AAA");
            }
        }
    }

    #[test]
    fn vanished_symbols_are_pruned() {
        let mut detector = ChangeDetector::new();
        detector.force_full_write(&set(&[("AAA", 10.0), ("BBB", 20.0)]));

        let (_, total, _) = detector.detect_changes(&set(&[("AAA", 10.0)]));
        assert_eq!(total, 1);
        assert!(detector.cached_bytes("BBB").is_none());
        assert_eq!(detector.stats().cache_size, 1);
    }

    #[test]
    fn reappearing_symbol_is_changed_again() {
        let mut detector = ChangeDetector::new();
        detector.force_full_write(&set(&[("AAA", 10.0), ("BBB", 20.0)]));
        detector.detect_changes(&set(&[("AAA", 10.0)]));

        let (changed, _, _) = detector.detect_changes(&set(&[("AAA", 10.0), ("BBB", 20.0)]));
        assert!(changed.contains_key("BBB"));
        assert!(!changed.contains_key("AAA"));
    }

    #[test]
    fn clear_forces_next_full_write() {
        let mut detector = ChangeDetector::new();
        detector.force_full_write(&set(&[("AAA", 10.0)]));
        detector.clear();
        assert!(detector.is_first_cycle());
        assert!(detector.cached_bytes("AAA").is_none());
    }

    #[test]
    fn stats_track_change_rate() {
        let mut detector = ChangeDetector::new();
        let tickers = set(&[("AAA", 10.0), ("BBB", 20.0)]);
        detector.force_full_write(&tickers);
        detector.detect_changes(&tickers);

        let stats = detector.stats();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.total_compared, 4);
        assert_eq!(stats.total_changed, 2);
        assert_eq!(stats.avg_change_rate_pct, 50.0);
    }
}
