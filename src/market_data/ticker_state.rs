// =============================================================================
// TickerState — per-symbol rolling session state
// =============================================================================
//
// One instance per observed symbol, owned exclusively by the enrichment task.
// Holds the running intraday extremes, the cumulative trade count, and two
// minute-bucketed ring buffers:
//
//   minute_volumes — latest cumulative session volume seen in each minute
//   minute_closes  — latest price seen in each minute
//
// Rolling windows are computed on read as `cum(now) - cum(now - W)`. A
// missing earlier sample yields `None`, never zero, so early-session windows
// do not masquerade as flat activity.
//
// Observations within one symbol are serialized by the pipeline; no interior
// locking is needed here.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Ring capacity for per-minute close samples. Sized past the widest price
/// window (60 min) with headroom for bucket coalescing at the boundary.
const PRICE_RING_MINUTES: usize = 75;

/// Ring capacity for per-minute cumulative-volume samples. Sized past the
/// widest volume window (30 min).
const VOLUME_RING_MINUTES: usize = 40;

/// One sample in a minute-bucketed ring.
#[derive(Debug, Clone, Copy)]
struct MinuteSample {
    minute: i64,
    value: f64,
}

/// Rolling volume windows, in shares. `None` when the window's earlier
/// sample has not been observed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VolumeWindows {
    pub vol_1min: Option<f64>,
    pub vol_5min: Option<f64>,
    pub vol_10min: Option<f64>,
    pub vol_15min: Option<f64>,
    pub vol_30min: Option<f64>,
}

/// Rolling price-change windows, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceWindows {
    pub chg_1min: Option<f64>,
    pub chg_5min: Option<f64>,
    pub chg_10min: Option<f64>,
    pub chg_15min: Option<f64>,
    pub chg_30min: Option<f64>,
    pub chg_60min: Option<f64>,
}

/// Per-symbol session state backing the indicator calculations.
#[derive(Debug, Default)]
pub struct TickerState {
    intraday_high: Option<f64>,
    intraday_low: Option<f64>,
    trades_today: Option<u64>,
    minute_volumes: VecDeque<MinuteSample>,
    minute_closes: VecDeque<MinuteSample>,
}

fn minute_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

/// Coalesce within the current minute bucket: replace the newest sample when
/// it shares the bucket, append otherwise, and trim the front to capacity.
fn push_sample(ring: &mut VecDeque<MinuteSample>, minute: i64, value: f64, capacity: usize) {
    if let Some(last) = ring.back_mut() {
        if last.minute == minute {
            last.value = value;
            return;
        }
        // Out-of-order observation for an older bucket: ignore rather than
        // corrupt the monotonic minute ordering.
        if last.minute > minute {
            return;
        }
    }
    ring.push_back(MinuteSample { minute, value });
    while ring.len() > capacity {
        ring.pop_front();
    }
}

/// Newest sample at or before the given minute bucket.
fn sample_at_or_before(ring: &VecDeque<MinuteSample>, minute: i64) -> Option<f64> {
    ring.iter()
        .rev()
        .find(|s| s.minute <= minute)
        .map(|s| s.value)
}

impl TickerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed trade price: update intraday extremes and the
    /// per-minute close ring.
    pub fn observe_price(&mut self, price: f64, at: DateTime<Utc>) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }

        self.intraday_high = Some(match self.intraday_high {
            Some(h) => h.max(price),
            None => price,
        });
        self.intraday_low = Some(match self.intraday_low {
            Some(l) => l.min(price),
            None => price,
        });

        push_sample(
            &mut self.minute_closes,
            minute_bucket(at),
            price,
            PRICE_RING_MINUTES,
        );
    }

    /// Record the latest cumulative session volume for the current minute.
    pub fn observe_volume(&mut self, cumulative_volume: f64, at: DateTime<Utc>) {
        if !cumulative_volume.is_finite() || cumulative_volume < 0.0 {
            return;
        }
        push_sample(
            &mut self.minute_volumes,
            minute_bucket(at),
            cumulative_volume,
            VOLUME_RING_MINUTES,
        );
    }

    /// Set the cumulative trade count for the session.
    pub fn observe_trade_count(&mut self, count: u64) {
        self.trades_today = Some(count);
    }

    pub fn intraday_high(&self) -> Option<f64> {
        self.intraday_high
    }

    pub fn intraday_low(&self) -> Option<f64> {
        self.intraday_low
    }

    pub fn trades_today(&self) -> Option<u64> {
        self.trades_today
    }

    /// Current rolling windows as of `now`.
    pub fn windows(&self, now: DateTime<Utc>) -> (VolumeWindows, PriceWindows) {
        let now_min = minute_bucket(now);

        let vol = |width: i64| -> Option<f64> {
            let current = self.minute_volumes.back().map(|s| s.value)?;
            let earlier = sample_at_or_before(&self.minute_volumes, now_min - width)?;
            Some((current - earlier).max(0.0))
        };

        let chg = |width: i64| -> Option<f64> {
            let current = self.minute_closes.back().map(|s| s.value)?;
            let earlier = sample_at_or_before(&self.minute_closes, now_min - width)?;
            if earlier <= 0.0 {
                return None;
            }
            Some((current - earlier) / earlier * 100.0)
        };

        let volumes = VolumeWindows {
            vol_1min: vol(1),
            vol_5min: vol(5),
            vol_10min: vol(10),
            vol_15min: vol(15),
            vol_30min: vol(30),
        };
        let prices = PriceWindows {
            chg_1min: chg(1),
            chg_5min: chg(5),
            chg_10min: chg(10),
            chg_15min: chg(15),
            chg_30min: chg(30),
            chg_60min: chg(60),
        };
        (volumes, prices)
    }

    /// Clear all session state. Called from the day-change handler before
    /// the next enrichment cycle.
    pub fn reset(&mut self) {
        self.intraday_high = None;
        self.intraday_low = None;
        self.trades_today = None;
        self.minute_volumes.clear();
        self.minute_closes.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(minute * 60, 0).unwrap()
    }

    #[test]
    fn extremes_track_observed_prices() {
        let mut s = TickerState::new();
        s.observe_price(10.0, at(0));
        s.observe_price(12.0, at(1));
        s.observe_price(9.5, at(2));
        assert_eq!(s.intraday_high(), Some(12.0));
        assert_eq!(s.intraday_low(), Some(9.5));
        assert!(s.intraday_high().unwrap() >= s.intraday_low().unwrap());
    }

    #[test]
    fn same_minute_observations_coalesce() {
        let mut s = TickerState::new();
        let t = at(100);
        s.observe_volume(1000.0, t);
        s.observe_volume(1500.0, t);
        assert_eq!(s.minute_volumes.len(), 1);
        assert_eq!(s.minute_volumes.back().unwrap().value, 1500.0);
    }

    #[test]
    fn volume_windows_from_cumulative_samples() {
        let mut s = TickerState::new();
        for i in 0..=10 {
            s.observe_volume(1000.0 * i as f64, at(i));
        }
        let (vols, _) = s.windows(at(10));
        assert_eq!(vols.vol_1min, Some(1000.0));
        assert_eq!(vols.vol_5min, Some(5000.0));
        assert_eq!(vols.vol_10min, Some(10_000.0));
        // No sample 15 minutes back yet.
        assert_eq!(vols.vol_15min, None);
        assert_eq!(vols.vol_30min, None);
    }

    #[test]
    fn missing_earlier_sample_is_none_not_zero() {
        let mut s = TickerState::new();
        s.observe_volume(5000.0, at(0));
        let (vols, _) = s.windows(at(0));
        assert_eq!(vols.vol_1min, None);
        assert_eq!(vols.vol_30min, None);
    }

    #[test]
    fn price_windows_are_percent_changes() {
        let mut s = TickerState::new();
        s.observe_price(100.0, at(0));
        s.observe_price(105.0, at(5));
        let (_, chgs) = s.windows(at(5));
        assert_eq!(chgs.chg_5min, Some(5.0));
        assert_eq!(chgs.chg_1min, Some(5.0)); // sample at minute 0 <= 5-1
        assert_eq!(chgs.chg_60min, None);
    }

    #[test]
    fn sixty_minute_window_survives_ring_trim() {
        let mut s = TickerState::new();
        for i in 0..=60 {
            s.observe_price(100.0 + i as f64, at(i));
        }
        let (_, chgs) = s.windows(at(60));
        // close(0) = 100, close(60) = 160 -> +60%
        assert_eq!(chgs.chg_60min, Some(60.0));
    }

    #[test]
    fn gaps_use_newest_sample_at_or_before() {
        let mut s = TickerState::new();
        s.observe_volume(1000.0, at(0));
        s.observe_volume(8000.0, at(9)); // minutes 1..=8 missing
        let (vols, _) = s.windows(at(9));
        // 5-minute window looks back to minute 4; newest sample <= 4 is minute 0.
        assert_eq!(vols.vol_5min, Some(7000.0));
    }

    #[test]
    fn out_of_order_observation_is_ignored() {
        let mut s = TickerState::new();
        s.observe_volume(5000.0, at(10));
        s.observe_volume(1000.0, at(8));
        assert_eq!(s.minute_volumes.len(), 1);
        assert_eq!(s.minute_volumes.back().unwrap().value, 5000.0);
    }

    #[test]
    fn reset_clears_all_session_state() {
        let mut s = TickerState::new();
        s.observe_price(10.0, at(0));
        s.observe_volume(1000.0, at(0));
        s.observe_trade_count(500);
        s.reset();
        assert_eq!(s.intraday_high(), None);
        assert_eq!(s.intraday_low(), None);
        assert_eq!(s.trades_today(), None);
        let (vols, chgs) = s.windows(at(1));
        assert_eq!(vols, VolumeWindows::default());
        assert_eq!(chgs, PriceWindows::default());
    }

    #[test]
    fn non_finite_observations_are_rejected() {
        let mut s = TickerState::new();
        s.observe_price(f64::NAN, at(0));
        s.observe_price(-5.0, at(0));
        s.observe_volume(f64::INFINITY, at(0));
        assert_eq!(s.intraday_high(), None);
        assert!(s.minute_volumes.is_empty());
    }
}
