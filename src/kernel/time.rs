use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// Caller-supplied "now" plus the user's timezone.
///
/// **KERNEL LAW**: entity resolution never reads the wall clock. Every relative
/// phrase ("tomorrow", "next friday", "in 2 hours") is resolved against this value,
/// so replaying a turn with the same clock reproduces the same entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceClock {
    pub now: DateTime<Utc>,
    pub tz: Tz,
}

impl ReferenceClock {
    pub fn new(now: DateTime<Utc>, tz: Tz) -> Self {
        Self { now, tz }
    }

    /// Build a clock from a wall-clock reading in the user's own zone.
    /// Returns `None` when the local time falls into a DST gap.
    pub fn from_local(tz: Tz, local: NaiveDateTime) -> Option<Self> {
        let now = tz.from_local_datetime(&local).earliest()?;
        Some(Self { now: now.with_timezone(&Utc), tz })
    }

    pub fn local_now(&self) -> DateTime<Tz> {
        self.now.with_timezone(&self.tz)
    }

    pub fn today(&self) -> NaiveDate {
        self.local_now().date_naive()
    }

    pub fn weekday(&self) -> Weekday {
        self.today().weekday()
    }

    /// Local (date, time) in the user's zone -> absolute instant.
    /// Ambiguous local times (DST fall-back) take the earlier instant; times inside a
    /// spring-forward gap are pushed one hour later, matching what a wall clock shows.
    pub fn resolve(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        let naive = date.and_time(time);
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| self.tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Next instant strictly after `now` whose local wall time is `time`.
    pub fn next_occurrence(&self, time: NaiveTime) -> Option<DateTime<Utc>> {
        let today = self.today();
        let candidate = self.resolve(today, time)?;
        if candidate > self.now {
            return Some(candidate);
        }
        self.resolve(today.succ_opt()?, time)
    }

    /// Local midnight-to-midnight range of `date`, as absolute instants.
    pub fn day_bounds(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.days_bounds(date, 1)
    }

    /// From local midnight of `first` to local midnight `days` later.
    pub fn days_bounds(&self, first: NaiveDate, days: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let last = first.checked_add_days(Days::new(u64::from(days.max(1))))?;
        let start = self.resolve(first, NaiveTime::MIN)?;
        let end = self.resolve(last, NaiveTime::MIN)?;
        Some((start, end))
    }

    /// Next date strictly after today falling on `weekday`.
    pub fn next_weekday(&self, weekday: Weekday) -> NaiveDate {
        let today = self.today();
        let current = today.weekday().num_days_from_monday() as i64;
        let target = weekday.num_days_from_monday() as i64;
        let mut ahead = (target - current).rem_euclid(7);
        if ahead == 0 {
            ahead = 7;
        }
        today + Duration::days(ahead)
    }
}
