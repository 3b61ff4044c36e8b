// =============================================================================
// VWAP — resolution of the session volume-weighted average price
// =============================================================================
//
// Preference order:
//   1. VWAP carried by the raw snapshot's day bar.
//   2. Live VWAP maintained by the external trade-feed consumer.
//   3. None.
//
// Zero and negative values are treated as absent at every step.
// =============================================================================

/// Resolve the session VWAP for a symbol.
pub fn resolve(snapshot_vwap: Option<f64>, live_vwap: Option<f64>) -> Option<f64> {
    snapshot_vwap
        .filter(|v| v.is_finite() && *v > 0.0)
        .or(live_vwap.filter(|v| v.is_finite() && *v > 0.0))
}

/// Percent distance of the current price from VWAP:
/// `(price - vwap) / vwap * 100`. Positive above VWAP, negative below.
pub fn price_vs_vwap(price: Option<f64>, vwap: Option<f64>) -> Option<f64> {
    let price = price.filter(|p| p.is_finite() && *p > 0.0)?;
    let vwap = vwap.filter(|v| v.is_finite() && *v > 0.0)?;
    let pct = (price - vwap) / vwap * 100.0;
    pct.is_finite().then_some(pct)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_vwap_wins() {
        assert_eq!(resolve(Some(11.3), Some(11.5)), Some(11.3));
    }

    #[test]
    fn live_vwap_fills_gaps() {
        assert_eq!(resolve(None, Some(11.5)), Some(11.5));
        assert_eq!(resolve(Some(0.0), Some(11.5)), Some(11.5));
    }

    #[test]
    fn absent_everywhere_is_none() {
        assert_eq!(resolve(None, None), None);
        assert_eq!(resolve(Some(0.0), Some(-1.0)), None);
    }

    #[test]
    fn distance_is_percent() {
        let d = price_vs_vwap(Some(12.0), Some(11.8)).unwrap();
        assert!((d - 1.694_915).abs() < 1e-4);
        assert!(price_vs_vwap(Some(11.0), Some(11.8)).unwrap() < 0.0);
        assert_eq!(price_vs_vwap(Some(12.0), None), None);
    }
}
