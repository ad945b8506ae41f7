use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::*;

/// Legacy rows were written as a localized business-local wall time.
const LEGACY_FORMATS: [&str; 2] = ["%m/%d/%Y, %I:%M:%S %p", "%m/%d/%Y %I:%M:%S %p"];

/// Slot identity: the business-local minute an instant falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl SlotKey {
    pub fn from_instant(instant: DateTime<Utc>, tz: Tz) -> Self {
        Self::from_naive(&instant.with_timezone(&tz).naive_local())
    }

    fn from_naive(local: &NaiveDateTime) -> Self {
        Self {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TimestampParseError {
    pub input: String,
}

impl std::fmt::Display for TimestampParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unrecognized timestamp: {:?}", self.input)
    }
}

impl std::error::Error for TimestampParseError {}

/// ICU output uses narrow/no-break spaces before the meridiem.
fn clean(raw: &str) -> String {
    raw.replace(['\u{202f}', '\u{a0}'], " ").trim().to_string()
}

fn parse_legacy(raw: &str) -> Option<NaiveDateTime> {
    LEGACY_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Parse an ISO-8601 instant with an explicit offset.
pub fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Parse a stored timestamp in either encoding into a UTC instant.
pub(crate) fn parse_stored_time(raw: &str, tz: Tz) -> Result<DateTime<Utc>, TimestampParseError> {
    let cleaned = clean(raw);
    if let Some(t) = parse_iso(&cleaned) {
        return Ok(t);
    }
    parse_legacy(&cleaned)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| TimestampParseError { input: raw.to_string() })
}

/// Normalize a stored timestamp to its business-local slot key.
///
/// Legacy strings already name the business-local wall time, so they map to a
/// key without a zone round trip (this keeps gap/overlap times matchable).
pub(crate) fn slot_key_of(raw: &str, tz: Tz) -> Result<SlotKey, TimestampParseError> {
    let cleaned = clean(raw);
    if let Some(t) = parse_iso(&cleaned) {
        return Ok(SlotKey::from_instant(t, tz));
    }
    parse_legacy(&cleaned)
        .map(|naive| SlotKey::from_naive(&naive))
        .ok_or_else(|| TimestampParseError { input: raw.to_string() })
}

/// Slot key of a booking. Unparseable rows are logged and yield `None`.
pub fn booking_key(booking: &Booking, tz: Tz) -> Option<SlotKey> {
    match slot_key_of(&booking.appointment_time, tz) {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!(booking_id = %booking.id, "skipping booking in availability scan: {e}");
            metrics::counter!(crate::observability::TIMESTAMP_PARSE_FAILURES_TOTAL).increment(1);
            None
        }
    }
}

/// First booking occupying the same business-local slot, ignoring `exclude_id`.
pub fn find_collision<'a>(
    key: SlotKey,
    bookings: &'a [Booking],
    tz: Tz,
    exclude_id: Option<&str>,
) -> Option<&'a Booking> {
    bookings
        .iter()
        .filter(|b| exclude_id != Some(b.id.as_str()))
        .find(|b| booking_key(b, tz) == Some(key))
}

/// True when no booking occupies the candidate's slot.
pub fn is_available(candidate: DateTime<Utc>, bookings: &[Booking], tz: Tz) -> bool {
    find_collision(SlotKey::from_instant(candidate, tz), bookings, tz, None).is_none()
}

/// All occupied slot keys, for marking a whole day in one pass.
pub fn booked_keys(bookings: &[Booking], tz: Tz) -> HashSet<SlotKey> {
    bookings.iter().filter_map(|b| booking_key(b, tz)).collect()
}
