//! Date / time / duration grammar.
//!
//! Scans the token stream left to right; at each position the matchers are tried
//! in order and the first hit consumes its tokens. Relative phrases resolve against
//! the supplied `ReferenceClock` only.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{Entity, EntitySource, EntityValue};
use crate::kernel::normalizer::NormalizedText;
use crate::kernel::time::ReferenceClock;

static CLOCK_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})(?::(\d{2}))?(am|pm|a\.m|p\.m)?$").expect("clock token regex"));
static COMPACT_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3})(m|min|mins|h|hr|hrs)$").expect("compact duration regex"));
static SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})(?:/(\d{4}|\d{2}))?$").expect("slash date regex"));
static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("iso date regex"));
static ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})(?:st|nd|rd|th)?$").expect("ordinal regex"));

const EXPLICIT: f32 = 0.95;
const RELATIVE: f32 = 0.9;
const DURATION: f32 = 0.85;
const GUESSED_HOUR: f32 = 0.6;
const WEEK_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

/// `hour_hint` admits a bare number as an hour (the user was just asked for a time).
pub(crate) fn scan(text: &NormalizedText, clock: &ReferenceClock, hour_hint: bool) -> Vec<Entity> {
    let mut scanner = Scanner {
        text,
        clock,
        hour_hint,
        out: Vec::new(),
    };

    let mut i = 0;
    while i < text.len() {
        let consumed = scanner
            .relative_offset(i)
            .or_else(|| scanner.duration(i))
            .or_else(|| scanner.relative_day(i))
            .or_else(|| scanner.weekday(i))
            .or_else(|| scanner.month_day(i))
            .or_else(|| scanner.numeric_date(i))
            .or_else(|| scanner.clock_time(i));
        i += consumed.unwrap_or(1);
    }
    scanner.out
}

struct Scanner<'a> {
    text: &'a NormalizedText,
    clock: &'a ReferenceClock,
    hour_hint: bool,
    out: Vec<Entity>,
}

impl<'a> Scanner<'a> {
    fn word(&self, i: usize) -> Option<&'a str> {
        self.text.word(i)
    }

    fn push(&mut self, value: EntityValue, first: usize, last: usize, confidence: f32) {
        if let Some(span) = self.text.span_of(first, last) {
            self.out.push(Entity::new(value, span, confidence, EntitySource::Temporal));
        }
    }

    /// "in 20 minutes", "in 2 hours", "in 3 days", "in a week"
    fn relative_offset(&mut self, i: usize) -> Option<usize> {
        if self.word(i)? != "in" {
            return None;
        }
        let count = parse_count(self.word(i + 1)?)?;
        let unit = parse_unit(self.word(i + 2)?)?;

        match unit {
            Unit::Minutes | Unit::Hours => {
                let minutes = if unit == Unit::Hours { count.checked_mul(60)? } else { count };
                let at = self
                    .clock
                    .now
                    .checked_add_signed(Duration::minutes(i64::from(minutes)))?
                    .with_timezone(&self.clock.tz);
                let time = NaiveTime::from_hms_opt(at.hour(), at.minute(), 0)?;
                self.push(EntityValue::Date(at.date_naive()), i, i + 2, RELATIVE);
                self.push(EntityValue::Time(time), i, i + 2, RELATIVE);
            }
            Unit::Days | Unit::Weeks => {
                let days = if unit == Unit::Weeks { count.checked_mul(7)? } else { count };
                let date = self.clock.today().checked_add_signed(Duration::days(i64::from(days)))?;
                self.push(EntityValue::Date(date), i, i + 2, RELATIVE);
            }
        }
        Some(3)
    }

    /// "for 2 hours", "30 minutes", "90mins"
    fn duration(&mut self, i: usize) -> Option<usize> {
        let word = self.word(i)?;

        if let Some(caps) = COMPACT_DURATION.captures(word) {
            let count: u32 = caps[1].parse().ok()?;
            let minutes = match &caps[2] {
                "h" | "hr" | "hrs" => count.checked_mul(60)?,
                _ => count,
            };
            self.push(EntityValue::Duration { minutes }, i, i, DURATION);
            return Some(1);
        }

        let (start, at) = if word == "for" { (i, i + 1) } else { (i, i) };
        let count = parse_count(self.word(at)?)?;
        let minutes = match parse_unit(self.word(at + 1)?)? {
            Unit::Minutes => count,
            Unit::Hours => count.checked_mul(60)?,
            Unit::Days | Unit::Weeks => return None,
        };
        self.push(EntityValue::Duration { minutes }, start, at + 1, DURATION);
        Some(at + 2 - start)
    }

    /// "today", "tomorrow", "day after tomorrow", "this week", "next week"
    fn relative_day(&mut self, i: usize) -> Option<usize> {
        let today = self.clock.today();

        if self.text.matches_at(i, &["day", "after", "tomorrow"]) {
            self.push(EntityValue::Date(today + Duration::days(2)), i, i + 2, RELATIVE);
            return Some(3);
        }
        // "next week" is also a single day for reminders and posters
        if self.text.matches_at(i, &["next", "week"]) {
            let monday = today + Duration::days(7 - i64::from(today.weekday().num_days_from_monday()));
            self.push(EntityValue::Date(today + Duration::days(7)), i, i + 1, RELATIVE);
            self.push(EntityValue::DateRange { start: monday, days: WEEK_DAYS }, i, i + 1, RELATIVE);
            return Some(2);
        }
        if ["this", "coming", "upcoming"]
            .iter()
            .any(|lead| self.text.matches_at(i, &[*lead, "week"]))
        {
            self.push(EntityValue::DateRange { start: today, days: WEEK_DAYS }, i, i + 1, RELATIVE);
            return Some(2);
        }

        let offset = match self.word(i)? {
            "today" | "tonight" => 0,
            "tomorrow" | "tmrw" | "tmr" | "tomorow" => 1,
            "yesterday" => -1,
            _ => return None,
        };
        self.push(EntityValue::Date(today + Duration::days(offset)), i, i, RELATIVE);
        Some(1)
    }

    /// "friday", "next friday", "this fri". Always the next occurrence strictly
    /// after the reference date.
    fn weekday(&mut self, i: usize) -> Option<usize> {
        let prefixed = matches!(self.word(i)?, "this" | "next" | "coming");
        let at = if prefixed { i + 1 } else { i };
        let after_on = i > 0 && self.word(i - 1) == Some("on");

        let weekday = parse_weekday(self.word(at)?, prefixed || after_on)?;
        let date = self.clock.next_weekday(weekday);
        self.push(EntityValue::Date(date), i, at, RELATIVE);
        Some(at + 1 - i)
    }

    /// "march 14", "mar 14th 2025", "14th march", "14 of march"
    fn month_day(&mut self, i: usize) -> Option<usize> {
        if let Some(month) = parse_month(self.word(i)?) {
            let day = parse_ordinal(self.word(i + 1)?)?;
            let year = self.word(i + 2).and_then(parse_year);
            let date = self.calendar_date(month, day, year)?;
            let last = if year.is_some() { i + 2 } else { i + 1 };
            self.push(EntityValue::Date(date), i, last, EXPLICIT);
            return Some(last + 1 - i);
        }

        let day = parse_ordinal(self.word(i)?)?;
        let at = if self.word(i + 1) == Some("of") { i + 2 } else { i + 1 };
        let month = parse_month(self.word(at)?)?;
        let year = self.word(at + 1).and_then(parse_year);
        let date = self.calendar_date(month, day, year)?;
        let last = if year.is_some() { at + 1 } else { at };
        self.push(EntityValue::Date(date), i, last, EXPLICIT);
        Some(last + 1 - i)
    }

    /// "3/14", "3/14/2024", "2024-03-14"
    fn numeric_date(&mut self, i: usize) -> Option<usize> {
        let word = self.word(i)?;

        let date = if let Some(caps) = ISO_DATE.captures(word) {
            NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)?
        } else if let Some(caps) = SLASH_DATE.captures(word) {
            let month: u32 = caps[1].parse().ok()?;
            let day: u32 = caps[2].parse().ok()?;
            let year = match caps.get(3) {
                Some(y) if y.as_str().len() == 2 => Some(2000 + y.as_str().parse::<i32>().ok()?),
                Some(y) => Some(y.as_str().parse().ok()?),
                None => None,
            };
            self.calendar_date(month, day, year)?
        } else {
            return None;
        };

        self.push(EntityValue::Date(date), i, i, EXPLICIT);
        Some(1)
    }

    /// "5pm", "5 pm", "5:30 p.m.", "17:00", "noon", "at 5", "5 o'clock"
    fn clock_time(&mut self, i: usize) -> Option<usize> {
        let word = self.word(i)?;

        match word {
            "noon" | "midday" => {
                self.push(EntityValue::Time(NaiveTime::from_hms_opt(12, 0, 0)?), i, i, EXPLICIT);
                return Some(1);
            }
            "midnight" => {
                self.push(EntityValue::Time(NaiveTime::MIN), i, i, EXPLICIT);
                return Some(1);
            }
            _ => {}
        }

        let caps = CLOCK_TOKEN.captures(word)?;
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };

        // Suffix glued to the number
        if let Some(suffix) = caps.get(3) {
            let time = with_meridiem(hour, minute, suffix.as_str())?;
            self.push(EntityValue::Time(time), i, i, EXPLICIT);
            return Some(1);
        }

        // Suffix as its own word
        if let Some(next) = self.word(i + 1) {
            if is_meridiem(next) {
                let time = with_meridiem(hour, minute, next)?;
                self.push(EntityValue::Time(time), i, i + 1, EXPLICIT);
                return Some(2);
            }
            if caps.get(2).is_none() && matches!(next, "o'clock" | "oclock") {
                let time = guess_hour(hour)?;
                self.push(EntityValue::Time(time), i, i + 1, GUESSED_HOUR);
                return Some(2);
            }
        }

        // 24h clock
        if caps.get(2).is_some() {
            let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
            let confidence = if hour > 12 { EXPLICIT } else { RELATIVE };
            self.push(EntityValue::Time(time), i, i, confidence);
            return Some(1);
        }

        let after_at = i > 0 && self.word(i - 1) == Some("at");
        if after_at || self.hour_hint {
            let time = guess_hour(hour)?;
            self.push(EntityValue::Time(time), i, i, GUESSED_HOUR);
            return Some(1);
        }
        None
    }

    /// Month/day with an optional year; without a year, the next occurrence on or
    /// after the reference date.
    fn calendar_date(&self, month: u32, day: u32, year: Option<i32>) -> Option<NaiveDate> {
        if let Some(year) = year {
            return NaiveDate::from_ymd_opt(year, month, day);
        }
        let today = self.clock.today();
        let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
        match this_year {
            Some(date) if date >= today => Some(date),
            _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
        }
    }
}

fn parse_count(word: &str) -> Option<u32> {
    if let Ok(n) = word.parse::<u32>() {
        return Some(n);
    }
    let n = match word {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "fifteen" => 15,
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "fifty" => 50,
        _ => return None,
    };
    Some(n)
}

fn parse_unit(word: &str) -> Option<Unit> {
    match word {
        "min" | "mins" | "minute" | "minutes" => Some(Unit::Minutes),
        "hr" | "hrs" | "hour" | "hours" => Some(Unit::Hours),
        "day" | "days" => Some(Unit::Days),
        "week" | "weeks" => Some(Unit::Weeks),
        _ => None,
    }
}

/// Short forms that double as ordinary words only count when `loose` (after
/// "on"/"this"/"next").
fn parse_weekday(word: &str, loose: bool) -> Option<Weekday> {
    let weekday = match word {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" | "tues" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" | "thu" | "thur" | "thurs" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        "sunday" => Weekday::Sun,
        "wed" if loose => Weekday::Wed,
        "sat" if loose => Weekday::Sat,
        "sun" if loose => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

fn parse_month(word: &str) -> Option<u32> {
    let month = match word {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn parse_ordinal(word: &str) -> Option<u32> {
    let caps = ORDINAL.captures(word)?;
    let day: u32 = caps[1].parse().ok()?;
    (1..=31).contains(&day).then_some(day)
}

fn parse_year(word: &str) -> Option<i32> {
    if word.len() != 4 {
        return None;
    }
    word.parse().ok().filter(|y| (1900..=2999).contains(y))
}

fn is_meridiem(word: &str) -> bool {
    matches!(word, "am" | "pm" | "a.m" | "p.m")
}

fn with_meridiem(hour: u32, minute: u32, suffix: &str) -> Option<NaiveTime> {
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match (suffix.starts_with('p'), hour) {
        (false, 12) => 0,
        (false, h) => h,
        (true, 12) => 12,
        (true, h) => h + 12,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Bare hour without am/pm. 1-7 read as afternoon/evening, the hours a student
/// means when they say "at 5".
fn guess_hour(hour: u32) -> Option<NaiveTime> {
    let hour = match hour {
        1..=7 => hour + 12,
        8..=23 => hour,
        _ => return None,
    };
    NaiveTime::from_hms_opt(hour, 0, 0)
}
