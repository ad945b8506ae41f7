use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// Business-hours policy. Hours are business-local, `[open_hour, close_hour)`
/// with `[break_start, break_end)` removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPolicy {
    pub open_hour: u32,
    pub close_hour: u32,
    pub break_start: u32,
    pub break_end: u32,
    pub interval_minutes: u32,
    pub time_zone: Tz,
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 17,
            break_start: 12,
            break_end: 13,
            interval_minutes: 30,
            time_zone: chrono_tz::America::New_York,
        }
    }
}

impl SlotPolicy {
    fn in_break(&self, minute_of_day: u32) -> bool {
        self.break_start * 60 <= minute_of_day && minute_of_day < self.break_end * 60
    }
}

/// The business-local calendar date of `instant`.
pub fn business_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Bookable slot instants for one business-local date, ascending.
///
/// The UTC offset is resolved per slot from the zone rules, so a day on which
/// DST changes still yields correct instants. Weekends and dates before the
/// business-local "today" yield nothing. With `hide_past`, slots at or before
/// `now` are dropped too. Local times that do not exist (spring-forward gap)
/// are skipped; ambiguous ones resolve to the earlier instant.
pub fn generate_slots(
    date: NaiveDate,
    policy: &SlotPolicy,
    now: DateTime<Utc>,
    hide_past: bool,
) -> Vec<DateTime<Utc>> {
    let tz = policy.time_zone;
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return Vec::new();
    }
    if date < business_date(now, tz) {
        return Vec::new();
    }
    let step = policy.interval_minutes.max(1);
    let mut slots = Vec::new();
    let mut minute = policy.open_hour * 60;
    while minute < policy.close_hour * 60 {
        if !policy.in_break(minute) {
            let local = date
                .and_hms_opt(minute / 60, minute % 60, 0)
                .and_then(|naive| tz.from_local_datetime(&naive).earliest());
            if let Some(local) = local {
                let utc = local.with_timezone(&Utc);
                if !hide_past || utc > now {
                    slots.push(utc);
                }
            }
        }
        minute += step;
    }
    slots
}
