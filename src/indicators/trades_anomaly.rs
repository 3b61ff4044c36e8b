// =============================================================================
// Trade Anomaly — Z-score of today's trade count against 5-day stats
// =============================================================================
//
//   z = (trades_today - mean_5d) / stddev_5d
//
// A ticker is flagged anomalous when z >= 3. The (mean, stddev) pair comes
// from the historical reference cache; missing stats or a degenerate stddev
// simply yield no score.
// =============================================================================

use serde::Deserialize;

/// Z-score threshold at or above which a ticker is flagged anomalous.
pub const ANOMALY_Z_THRESHOLD: f64 = 3.0;

/// 5-day trade-count statistics for one symbol, from the reference cache.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TradeStats {
    pub mean_5d: f64,
    pub stddev_5d: f64,
}

/// Anomaly detection result merged into the enriched record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeAnomaly {
    pub trades_today: u64,
    pub avg_trades_5d: f64,
    pub z_score: f64,
    pub is_anomaly: bool,
}

/// Score today's trade count against the cached stats.
///
/// `None` when stats are missing, the stddev is non-positive, or any
/// intermediate is non-finite.
pub fn detect(trades_today: u64, stats: Option<&TradeStats>) -> Option<TradeAnomaly> {
    let stats = stats?;
    if !stats.mean_5d.is_finite() || !stats.stddev_5d.is_finite() || stats.stddev_5d <= 0.0 {
        return None;
    }
    let z = (trades_today as f64 - stats.mean_5d) / stats.stddev_5d;
    if !z.is_finite() {
        return None;
    }
    Some(TradeAnomaly {
        trades_today,
        avg_trades_5d: stats.mean_5d,
        z_score: z,
        is_anomaly: z >= ANOMALY_Z_THRESHOLD,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn z_score_computation() {
        let stats = TradeStats {
            mean_5d: 2000.0,
            stddev_5d: 1000.0,
        };
        let result = detect(8000, Some(&stats)).unwrap();
        assert_eq!(result.z_score, 6.0);
        assert!(result.is_anomaly);
        assert_eq!(result.avg_trades_5d, 2000.0);
        assert_eq!(result.trades_today, 8000);
    }

    #[test]
    fn threshold_is_inclusive() {
        let stats = TradeStats {
            mean_5d: 1000.0,
            stddev_5d: 500.0,
        };
        // z = exactly 3.0
        assert!(detect(2500, Some(&stats)).unwrap().is_anomaly);
        // z just under 3.0
        assert!(!detect(2499, Some(&stats)).unwrap().is_anomaly);
    }

    #[test]
    fn negative_z_for_quiet_tickers() {
        let stats = TradeStats {
            mean_5d: 5000.0,
            stddev_5d: 1000.0,
        };
        let result = detect(2000, Some(&stats)).unwrap();
        assert_eq!(result.z_score, -3.0);
        assert!(!result.is_anomaly);
    }

    #[test]
    fn missing_or_degenerate_stats_yield_none() {
        assert!(detect(8000, None).is_none());
        assert!(detect(
            8000,
            Some(&TradeStats {
                mean_5d: 2000.0,
                stddev_5d: 0.0
            })
        )
        .is_none());
        assert!(detect(
            8000,
            Some(&TradeStats {
                mean_5d: f64::NAN,
                stddev_5d: 1000.0
            })
        )
        .is_none());
    }
}
