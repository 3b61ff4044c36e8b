// =============================================================================
// RVOL — relative volume against the historical slot average
// =============================================================================
//
// The regular session (09:30–16:00 America/New_York) is partitioned into
// fixed 5-minute slots, 78 per day. The historical service maintains the
// average cumulative volume per (symbol, slot); RVOL is the ratio of today's
// cumulative volume to that average at the current slot.
//
// Slot indices derive solely from wall-clock time in the market's canonical
// timezone (DST included) — never from local time.
// =============================================================================

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::America::New_York;

/// Width of one RVOL slot in minutes.
pub const SLOT_MINUTES: u32 = 5;

/// Regular session open, minutes after midnight ET (09:30).
const SESSION_OPEN_MINUTES: u32 = 9 * 60 + 30;

/// Regular session length in minutes (09:30–16:00).
const SESSION_LENGTH_MINUTES: u32 = 390;

/// Number of slots in a regular session.
pub const SLOTS_PER_SESSION: u32 = SESSION_LENGTH_MINUTES / SLOT_MINUTES;

/// Slot index for an instant, or `None` outside the regular session.
pub fn current_slot(now: DateTime<Utc>) -> Option<u32> {
    let local = now.with_timezone(&New_York);
    let minutes = local.hour() * 60 + local.minute();
    if minutes < SESSION_OPEN_MINUTES {
        return None;
    }
    let elapsed = minutes - SESSION_OPEN_MINUTES;
    if elapsed >= SESSION_LENGTH_MINUTES {
        return None;
    }
    Some(elapsed / SLOT_MINUTES)
}

/// Human-readable slot window, e.g. `"09:30-09:35 ET"`. Used by the
/// slot-entry log event.
pub fn slot_label(slot: u32) -> String {
    let start = SESSION_OPEN_MINUTES + slot * SLOT_MINUTES;
    let end = start + SLOT_MINUTES;
    format!(
        "{:02}:{:02}-{:02}:{:02} ET",
        start / 60,
        start % 60,
        end / 60,
        end % 60
    )
}

/// RVOL = cumulative session volume / historical average at the same slot.
///
/// `None` whenever either term is missing, zero, or non-finite — a missing
/// reference datum never fails the pipeline.
pub fn calculate(cumulative_volume: Option<f64>, slot_average: Option<f64>) -> Option<f64> {
    let volume = cumulative_volume.filter(|v| v.is_finite() && *v > 0.0)?;
    let average = slot_average.filter(|a| a.is_finite() && *a > 0.0)?;
    let rvol = volume / average;
    rvol.is_finite().then_some(rvol)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn et(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn slot_zero_at_open() {
        assert_eq!(current_slot(et(2026, 2, 3, 9, 30)), Some(0));
        assert_eq!(current_slot(et(2026, 2, 3, 9, 34)), Some(0));
        assert_eq!(current_slot(et(2026, 2, 3, 9, 35)), Some(1));
    }

    #[test]
    fn last_slot_before_close() {
        assert_eq!(
            current_slot(et(2026, 2, 3, 15, 55)),
            Some(SLOTS_PER_SESSION - 1)
        );
        assert_eq!(current_slot(et(2026, 2, 3, 15, 59)), Some(77));
    }

    #[test]
    fn outside_session_is_none() {
        assert_eq!(current_slot(et(2026, 2, 3, 9, 29)), None);
        assert_eq!(current_slot(et(2026, 2, 3, 16, 0)), None);
        assert_eq!(current_slot(et(2026, 2, 3, 20, 0)), None);
    }

    #[test]
    fn slot_index_tracks_market_timezone_across_dst() {
        // 14:30 UTC is 09:30 ET in winter (UTC-5) but 10:30 ET in summer
        // (UTC-4) — the slot must follow the market clock.
        let winter = Utc.with_ymd_and_hms(2026, 2, 3, 14, 30, 0).unwrap();
        let summer = Utc.with_ymd_and_hms(2026, 7, 3, 14, 30, 0).unwrap();
        assert_eq!(current_slot(winter), Some(0));
        assert_eq!(current_slot(summer), Some(12));
    }

    #[test]
    fn slot_labels() {
        assert_eq!(slot_label(0), "09:30-09:35 ET");
        assert_eq!(slot_label(12), "10:30-10:35 ET");
        assert_eq!(slot_label(77), "15:55-16:00 ET");
    }

    #[test]
    fn rvol_ratio() {
        assert_eq!(calculate(Some(300_000.0), Some(150_000.0)), Some(2.0));
        assert_eq!(calculate(Some(75_000.0), Some(100_000.0)), Some(0.75));
    }

    #[test]
    fn rvol_none_on_missing_or_zero_terms() {
        assert_eq!(calculate(None, Some(100.0)), None);
        assert_eq!(calculate(Some(100.0), None), None);
        assert_eq!(calculate(Some(0.0), Some(100.0)), None);
        assert_eq!(calculate(Some(100.0), Some(0.0)), None);
        assert_eq!(calculate(Some(f64::NAN), Some(100.0)), None);
        assert_eq!(calculate(Some(100.0), Some(f64::INFINITY)), None);
    }
}
