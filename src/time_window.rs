/// Wall-clock time arithmetic in the shop's timezone
/// Every time-of-day string is anchored to *today* in Indian Standard Time before comparing with "now".

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use chrono_tz::Tz;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::clock::{Clock, FixedClock, SystemClock};

/// The zone all shop times are expressed in. Resolved through the tz database, never a fixed offset.
pub const SHOP_TIMEZONE: Tz = chrono_tz::Asia::Kolkata;

/// What an unparseable time resolves to: earlier than any "now", so it always counts as past
pub const ALWAYS_PAST: NaiveDateTime = NaiveDateTime::MIN;

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{2})(?:\s*([AaPp][Mm]))?$").expect("time-of-day pattern compiles")
});

/// AM/PM suffix of a 12-hour time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meridiem {
    Am,
    Pm,
}

/// Convert a clock-face hour to 24-hour form.
/// PM adds 12 below noon, 12 AM becomes 0, no suffix leaves the hour alone.
pub fn to_24_hour(hour: u32, meridiem: Option<Meridiem>) -> u32 {
    match meridiem {
        Some(Meridiem::Pm) if hour < 12 => hour + 12,
        Some(Meridiem::Am) if hour == 12 => 0,
        _ => hour,
    }
}

/// A minute-precision time of day (hour 0-23, minute 0-59)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    /// Parse a human-entered time such as "9:00 AM", "09:00 pm" or "21:30".
    ///
    /// Total: anything that is not one of those shapes yields None rather than an error,
    /// and callers treat None as "always in the past".
    pub fn parse(s: &str) -> Option<Self> {
        let caps = TIME_PATTERN.captures(s.trim())?;
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;

        let meridiem = match caps.get(3).map(|m| m.as_str().to_ascii_uppercase()) {
            Some(suffix) if suffix == "PM" => Some(Meridiem::Pm),
            Some(_) => Some(Meridiem::Am),
            None => None,
        };

        // A suffix on an hour past noon ("13:00 PM") leaves the hour as written
        Self::new(to_24_hour(hour, meridiem), minute)
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// True for strings that carry no time at all
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Combine today's date (taken from `now`) with a time of day, seconds zeroed
pub fn anchor_to_today(now: NaiveDateTime, time: Option<TimeOfDay>) -> NaiveDateTime {
    match time {
        Some(t) => now.date().and_time(t.as_naive_time()),
        None => ALWAYS_PAST,
    }
}

/// [start, end) containment with midnight wrap when end < start
pub fn window_contains(now: NaiveDateTime, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    if end < start {
        now >= start || now < end
    } else {
        now >= start && now < end
    }
}

/// Time-of-day queries against the injected clock, in the shop timezone
#[derive(Clone)]
pub struct TimeWindow {
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeWindow")
            .field("now", &self.clock.now())
            .finish()
    }
}

impl TimeWindow {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// A copy pinned to the current instant, so several queries agree on "now"
    pub fn freeze(&self) -> Self {
        Self::new(Arc::new(FixedClock::new(self.clock.now())))
    }

    /// Current civil date and time in the shop timezone, to the second
    pub fn now_in_zone(&self) -> NaiveDateTime {
        let local = self.clock.now().with_timezone(&SHOP_TIMEZONE).naive_local();
        local.with_nanosecond(0).unwrap_or(local)
    }

    /// Today's date in the shop timezone at the given time; None resolves to ALWAYS_PAST
    pub fn resolve_today(&self, time: Option<TimeOfDay>) -> NaiveDateTime {
        anchor_to_today(self.now_in_zone(), time)
    }

    /// Is "now" inside [start, end)? Windows whose end is before their start wrap past midnight.
    pub fn is_within_range(&self, start: &str, end: &str) -> bool {
        if is_blank(start) || is_blank(end) {
            return false;
        }

        let now = self.now_in_zone();
        let start = anchor_to_today(now, TimeOfDay::parse(start));
        let end = anchor_to_today(now, TimeOfDay::parse(end));
        window_contains(now, start, end)
    }

    /// Has today's occurrence of `time` been reached?
    pub fn is_past(&self, time: &str) -> bool {
        if is_blank(time) {
            return false;
        }

        let now = self.now_in_zone();
        now >= anchor_to_today(now, TimeOfDay::parse(time))
    }
}




/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn twelve_hour_conversion_in_range() {
        let hour: u32 = kani::any();
        kani::assume(hour <= 12);
        let pm: bool = kani::any();
        let meridiem = if pm { Meridiem::Pm } else { Meridiem::Am };

        let converted = to_24_hour(hour, Some(meridiem));
        kani::assert(converted < 24, "converted hour must be a valid 24-hour value");
    }
}
