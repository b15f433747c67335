//! Repeat patterns and next-fire resolution.
//!
//! `next_fire` is a pure function of the pattern, the configured local time
//! of day, the item's timezone, and a reference instant. Candidate dates are
//! walked in the item's zone and each candidate is resolved to a UTC instant
//! with explicit offset arithmetic:
//!
//! - an ambiguous local time (clocks fall back) resolves to the earlier
//!   instant, so the date fires once;
//! - a nonexistent local time (clocks spring forward) is shifted by the
//!   offset in force before the gap, so the date still fires.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime};
use chrono::{Offset, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Errors raised while building or validating a repeat pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Custom pattern requires at least one weekday")]
    EmptyCustom,
    #[error("Unknown weekday: {0}")]
    UnknownWeekday(String),
}

// =============================================================================
// DaySet
// =============================================================================

/// A set of weekdays stored as a bitmask (Monday is bit 0).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DaySet(u8);

impl DaySet {
    pub const EMPTY: DaySet = DaySet(0);

    pub fn from_days<I: IntoIterator<Item = Weekday>>(days: I) -> Self {
        let mut set = DaySet::EMPTY;
        for day in days {
            set.insert(day);
        }
        set
    }

    /// Monday through Friday.
    pub fn weekdays() -> Self {
        DaySet(0b0001_1111)
    }

    /// Saturday and Sunday.
    pub fn weekends() -> Self {
        DaySet(0b0110_0000)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Days in the set, Monday first.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        ALL_DAYS.into_iter().filter(move |d| self.contains(*d))
    }
}

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

impl TryFrom<Vec<String>> for DaySet {
    type Error = PatternError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        let mut set = DaySet::EMPTY;
        for name in &names {
            set.insert(parse_weekday(name)?);
        }
        Ok(set)
    }
}

impl From<DaySet> for Vec<String> {
    fn from(set: DaySet) -> Self {
        set.iter().map(|d| short_name(d).to_string()).collect()
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(short_name).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Parse a weekday name. Accepts short and long forms plus the common
/// `tues`/`thurs` spellings, case-insensitively.
pub fn parse_weekday(name: &str) -> Result<Weekday, PatternError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tues" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "weds" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thur" | "thurs" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        _ => Err(PatternError::UnknownWeekday(name.to_string())),
    }
}

fn short_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

// =============================================================================
// RepeatPattern
// =============================================================================

/// When an item repeats. Replaced wholesale on edit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepeatPattern {
    /// Fires once on the given local date.
    Once { date: NaiveDate },
    Daily,
    Weekdays,
    Weekends,
    Custom { days: DaySet },
}

impl RepeatPattern {
    pub fn validate(&self) -> Result<(), PatternError> {
        match self {
            RepeatPattern::Custom { days } if days.is_empty() => Err(PatternError::EmptyCustom),
            _ => Ok(()),
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, RepeatPattern::Once { .. })
    }

    /// Days on which a recurring pattern fires. Empty for `Once`.
    pub fn days(&self) -> DaySet {
        match self {
            RepeatPattern::Once { .. } => DaySet::EMPTY,
            RepeatPattern::Daily => DaySet::from_days(ALL_DAYS),
            RepeatPattern::Weekdays => DaySet::weekdays(),
            RepeatPattern::Weekends => DaySet::weekends(),
            RepeatPattern::Custom { days } => *days,
        }
    }
}

impl fmt::Display for RepeatPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatPattern::Once { date } => write!(f, "once ({})", date),
            RepeatPattern::Daily => write!(f, "daily"),
            RepeatPattern::Weekdays => write!(f, "weekdays"),
            RepeatPattern::Weekends => write!(f, "weekends"),
            RepeatPattern::Custom { days } => write!(f, "custom ({})", days),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Outcome of a next-fire computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextFire {
    At(DateTime<Utc>),
    /// A one-shot pattern whose instant is not after the reference instant.
    Expired,
}

impl NextFire {
    pub fn instant(self) -> Option<DateTime<Utc>> {
        match self {
            NextFire::At(at) => Some(at),
            NextFire::Expired => None,
        }
    }
}

/// Compute the next fire instant strictly after `after`.
pub fn next_fire(
    pattern: &RepeatPattern,
    time_of_day: NaiveTime,
    zone: Tz,
    after: DateTime<Utc>,
) -> Result<NextFire, PatternError> {
    pattern.validate()?;

    if let RepeatPattern::Once { date } = pattern {
        let at = resolve_local(zone, date.and_time(time_of_day));
        return Ok(if at > after {
            NextFire::At(at)
        } else {
            NextFire::Expired
        });
    }

    let days = pattern.days();
    let start = after.with_timezone(&zone).date_naive();
    // Eight candidates cover a full week even when today's slot has passed.
    for offset in 0..8 {
        let date = start + Duration::days(offset);
        if !days.contains(date.weekday()) {
            continue;
        }
        let at = resolve_local(zone, date.and_time(time_of_day));
        if at > after {
            return Ok(NextFire::At(at));
        }
    }

    Err(PatternError::EmptyCustom)
}

/// Resolve a local wall-clock time in `zone` to a UTC instant.
pub fn resolve_local(zone: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let before_gap = local - Duration::hours(24);
            let offset = zone.offset_from_utc_datetime(&before_gap).fix();
            let utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
            Utc.from_utc_datetime(&utc)
        }
    }
}
