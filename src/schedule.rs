use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Zone in which "midnight" is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClock {
    /// Host local time.
    Local,
    Zone(Tz),
}

impl FrameClock {
    pub fn new(timezone: Option<Tz>) -> Self {
        timezone.map_or(Self::Local, Self::Zone)
    }

    /// The first local midnight strictly after `now`.
    pub fn next_midnight_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Local => next_midnight(&now.with_timezone(&Local)),
            Self::Zone(tz) => next_midnight(&now.with_timezone(tz)),
        }
    }
}

/// Tomorrow's 00:00 in `now`'s zone, as a UTC instant.
///
/// When midnight falls inside a DST gap the first valid local instant of the
/// day is used; when it is repeated, the earlier of the two.
pub fn next_midnight<Z: TimeZone>(now: &DateTime<Z>) -> Option<DateTime<Utc>> {
    let tz = now.timezone();
    let midnight = now.date_naive().succ_opt()?.and_time(NaiveTime::MIN);
    let mut candidate = midnight;
    while candidate - midnight < ChronoDuration::days(1) {
        if let Some(instant) = tz.from_local_datetime(&candidate).earliest() {
            return Some(instant.with_timezone(&Utc));
        }
        candidate += ChronoDuration::minutes(1);
    }
    None
}
