//! Elapsed reading time.
//!
//! Elapsed time is never stored. It is recomputed from the session record and
//! the wall clock, so every tab shows the same value for the same record.

use chrono::{DateTime, Utc};
use reading_sync_core::{SessionRecord, SessionStatus};

/// Whole seconds of reading time in `record` as of `now`.
///
/// - Paused with a valid `paused_at`: frozen at `paused_at`.
/// - Stopped with a valid `end_time`: frozen at `end_time`, otherwise 0.
/// - Otherwise measured up to `now`.
///
/// Excluded time is subtracted, the result is floored to whole seconds and
/// never negative. A malformed `start_time` or no record yields 0.
#[must_use]
pub fn elapsed_seconds(record: Option<&SessionRecord>, now: DateTime<Utc>) -> u64 {
    let Some(record) = record else {
        return 0;
    };
    let Some(start) = record.start_instant() else {
        return 0;
    };

    let until = match record.status {
        SessionStatus::Paused => record.paused_instant().unwrap_or(now),
        SessionStatus::Active => now,
        SessionStatus::Stopped => match record.end_instant() {
            Some(end) => end,
            None => return 0,
        },
    };

    let millis = (until - start)
        .num_milliseconds()
        .saturating_sub(record.paused_millis());
    if millis <= 0 {
        return 0;
    }
    u64::try_from(millis / 1000).unwrap_or(0)
}

/// Whether elapsed time for `record` changes as the clock moves.
#[must_use]
pub fn is_running(record: Option<&SessionRecord>) -> bool {
    record.is_some_and(|r| r.status == SessionStatus::Active)
}

/// `"{h}h {m}m {s}s"` when there is at least one hour, else `"{m}m {s}s"`.
#[must_use]
pub fn format_elapsed(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else {
        format!("{m}m {s}s")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, SecondsFormat};

    use super::*;

    fn iso(t: DateTime<Utc>) -> String {
        t.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn record(start: &str, status: SessionStatus) -> SessionRecord {
        SessionRecord {
            id: 1,
            book_id: 1,
            start_time: start.to_string(),
            end_time: None,
            status,
            end_page: None,
            paused_millis: Some(0),
            paused_at: None,
        }
    }

    #[test]
    fn test_active_hour() {
        let now = Utc::now();
        let r = record(&iso(now - Duration::seconds(3600)), SessionStatus::Active);
        let elapsed = elapsed_seconds(Some(&r), now);
        assert!((3599..=3601).contains(&elapsed), "elapsed {elapsed}");
    }

    #[test]
    fn test_paused_is_frozen() {
        let now = Utc::now();
        let mut r = record(&iso(now - Duration::seconds(60)), SessionStatus::Paused);
        r.paused_at = Some(iso(now - Duration::seconds(30)));

        assert_eq!(elapsed_seconds(Some(&r), now), 30);
        assert_eq!(elapsed_seconds(Some(&r), now + Duration::seconds(1)), 30);
        assert_eq!(elapsed_seconds(Some(&r), now + Duration::seconds(2)), 30);
    }

    #[test]
    fn test_paused_millis_subtracted() {
        let now = Utc::now();
        let mut r = record(&iso(now - Duration::seconds(100)), SessionStatus::Active);
        r.paused_millis = Some(40_500);
        assert_eq!(elapsed_seconds(Some(&r), now), 59);
    }

    #[test]
    fn test_invalid_start_is_zero() {
        let r = record("not-a-date", SessionStatus::Active);
        assert_eq!(elapsed_seconds(Some(&r), Utc::now()), 0);
    }

    #[test]
    fn test_no_record_is_zero() {
        assert_eq!(elapsed_seconds(None, Utc::now()), 0);
        assert!(!is_running(None));
    }

    #[test]
    fn test_future_start_floors_at_zero() {
        let now = Utc::now();
        let r = record(&iso(now + Duration::seconds(10)), SessionStatus::Active);
        assert_eq!(elapsed_seconds(Some(&r), now), 0);
    }

    #[test]
    fn test_stopped_frozen_at_end() {
        let now = Utc::now();
        let mut r = record(&iso(now - Duration::seconds(600)), SessionStatus::Stopped);
        assert_eq!(elapsed_seconds(Some(&r), now), 0);
        r.end_time = Some(iso(now - Duration::seconds(300)));
        assert_eq!(elapsed_seconds(Some(&r), now), 300);
    }

    #[test]
    fn test_format_boundaries() {
        assert_eq!(format_elapsed(0), "0m 0s");
        assert_eq!(format_elapsed(59), "0m 59s");
        assert_eq!(format_elapsed(3599), "59m 59s");
        assert_eq!(format_elapsed(3600), "1h 0m 0s");
        assert_eq!(format_elapsed(3661), "1h 1m 1s");
    }
}
