use chrono_tz::Tz;

use crate::model::*;

use super::availability::{booking_key, SlotKey};
use super::BookingError;

/// Loose form of an id: trimmed, unquoted, case-folded, and numbers written
/// canonically so `"7"`, `7.0` and `" 7 "` agree.
fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('"').trim();
    if let Ok(n) = trimmed.parse::<f64>()
        && n.is_finite()
        && n.fract() == 0.0
        && n.abs() < 1e15
    {
        return format!("{}", n as i64);
    }
    trimmed.to_ascii_lowercase()
}

fn unique<'a>(mut hits: impl Iterator<Item = &'a Booking>) -> Option<&'a Booking> {
    let first = hits.next()?;
    if hits.next().is_some() { None } else { Some(first) }
}

/// Find one booking by id: exact equality first, then normalized equality.
/// The first method yielding exactly one match wins.
pub fn find_by_id<'a>(bookings: &'a [Booking], id: &str) -> Result<&'a Booking, BookingError> {
    if let Some(b) = unique(bookings.iter().filter(|b| b.id == id)) {
        return Ok(b);
    }
    let wanted = normalize_id(id);
    let mut loose = bookings.iter().filter(|b| normalize_id(&b.id) == wanted).peekable();
    if loose.peek().is_some() {
        let hit = unique(loose);
        if hit.is_none() {
            tracing::warn!(id, "booking id matches several records after normalization");
        }
        return hit.ok_or_else(|| BookingError::NotFound(id.to_string()));
    }
    Err(BookingError::NotFound(id.to_string()))
}

/// Find the booking at a business-local slot owned by `email` (exact match).
pub fn find_by_slot_and_email<'a>(
    bookings: &'a [Booking],
    key: SlotKey,
    email: &str,
    tz: Tz,
) -> Option<&'a Booking> {
    bookings
        .iter()
        .filter(|b| b.email == email)
        .find(|b| booking_key(b, tz) == Some(key))
}
