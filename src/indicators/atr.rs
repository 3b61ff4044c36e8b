// =============================================================================
// ATR — Average True Range from the historical cache
// =============================================================================
//
// ATR itself is pre-computed per symbol by the historical service (Wilder's
// smoothing over daily bars) and consumed here from the reference cache.
// ATR% is re-evaluated every cycle from the live price:
//
//   atr_percent = atr / current_price * 100
//
// Useful for comparing volatility across assets with different price scales.
// =============================================================================

/// ATR as a percentage of the current price.
///
/// `None` when either input is missing, non-positive, or non-finite.
pub fn atr_percent(atr: Option<f64>, current_price: Option<f64>) -> Option<f64> {
    let atr = atr.filter(|a| a.is_finite() && *a > 0.0)?;
    let price = current_price.filter(|p| p.is_finite() && *p > 0.0)?;
    let pct = atr / price * 100.0;
    pct.is_finite().then_some(pct)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atr_percent_scales_by_price() {
        assert_eq!(atr_percent(Some(0.5), Some(10.0)), Some(5.0));
        assert_eq!(atr_percent(Some(2.0), Some(100.0)), Some(2.0));
    }

    #[test]
    fn atr_percent_none_on_missing_inputs() {
        assert_eq!(atr_percent(None, Some(10.0)), None);
        assert_eq!(atr_percent(Some(0.5), None), None);
        assert_eq!(atr_percent(Some(0.5), Some(0.0)), None);
        assert_eq!(atr_percent(Some(0.0), Some(10.0)), None);
        assert_eq!(atr_percent(Some(f64::NAN), Some(10.0)), None);
    }
}
