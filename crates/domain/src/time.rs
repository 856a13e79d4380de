//! Time and timestamp helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// UTC timestamp used for task etas, record entries, rollout changes, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Shift a timestamp forward, saturating instead of overflowing.
#[must_use]
pub fn after(ts: Timestamp, delay: Duration) -> Timestamp {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| ts.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Shift a timestamp backward, saturating at the earliest representable time.
#[must_use]
pub fn before(ts: Timestamp, delay: Duration) -> Timestamp {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| ts.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Elapsed time between two timestamps, zero when `later` precedes `earlier`.
#[must_use]
pub fn elapsed(earlier: Timestamp, later: Timestamp) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_shift_timestamp_forward() {
        let ts = now();
        let later = after(ts, Duration::from_secs(90));
        assert_eq!(elapsed(ts, later), Duration::from_secs(90));
    }

    #[test]
    fn should_saturate_when_shifting_far_back() {
        let ts = now();
        assert_eq!(before(ts, Duration::from_secs(60)), ts - chrono::Duration::seconds(60));
        assert_eq!(before(ts, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn should_clamp_negative_elapsed_to_zero() {
        let ts = now();
        let earlier = ts - chrono::Duration::seconds(5);
        assert_eq!(elapsed(ts, earlier), Duration::ZERO);
    }
}
