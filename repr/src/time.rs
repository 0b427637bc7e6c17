use chrono::{DateTime, TimeZone, Utc};

/// 100-nanosecond intervals per second.
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Seconds between the Windows epoch (1601-01-01) and the Unix epoch.
const EPOCH_DELTA_SECS: i64 = 11_644_473_600;

/// A WIM timestamp: 100-nanosecond intervals since 1601-01-01 00:00 UTC,
/// matching the values returned by `GetFileTime()` on Windows.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(pub u64);

impl Time {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }
}

impl From<DateTime<Utc>> for Time {
    fn from(dt: DateTime<Utc>) -> Self {
        let secs = dt.timestamp() + EPOCH_DELTA_SECS;
        if secs < 0 {
            return Time(0);
        }
        let ticks = secs as u64 * TICKS_PER_SECOND + u64::from(dt.timestamp_subsec_nanos() / 100);
        Time(ticks)
    }
}

impl From<Time> for DateTime<Utc> {
    fn from(t: Time) -> Self {
        let secs = (t.0 / TICKS_PER_SECOND) as i64 - EPOCH_DELTA_SECS;
        let nanos = (t.0 % TICKS_PER_SECOND) as u32 * 100;
        Utc.timestamp(secs, nanos)
    }
}
