use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::parse_iso;
use super::BookingError;

/// Same shape as legacy stored strings: `4/21/2025, 10:00:00 AM`.
pub const DATE_TIME_PATTERN: &str = "%-m/%-d/%Y, %-I:%M:%S %p";
pub const TIME_PATTERN: &str = "%-I:%M %p";
pub const DATE_PATTERN: &str = "%Y-%m-%d";

/// Canonical wire/storage form, e.g. `2025-04-21T14:00:00.000Z`.
pub fn format_iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn required(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), BookingError> {
    if value.chars().count() > max {
        return Err(BookingError::LimitExceeded(what));
    }
    Ok(())
}

/// Build the persisted record from a wire submission.
///
/// Reports every missing field at once. Assigns a fresh id when `id` is
/// `None`, stamps `request_time` with `now`, defaults the language to `zh`
/// and rewrites the appointment in canonical ISO form.
pub fn to_persisted(
    req: &BookingRequest,
    id: Option<String>,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    let fields = [
        ("datetime", required(&req.datetime)),
        ("name", required(&req.name)),
        ("email", required(&req.email)),
        ("wechatId", required(&req.wechat_id)),
        ("topic", required(&req.topic)),
    ];
    let missing: Vec<&'static str> = fields
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(BookingError::Validation(missing));
    }
    let [datetime, name, email, wechat_id, topic] = fields.map(|(_, v)| v.unwrap_or_default());

    check_len(name, MAX_NAME_LEN, "name too long")?;
    check_len(email, MAX_EMAIL_LEN, "email too long")?;
    check_len(wechat_id, MAX_WECHAT_ID_LEN, "wechatId too long")?;
    check_len(topic, MAX_TOPIC_LEN, "topic too long")?;

    let appointment = parse_iso(datetime)
        .ok_or_else(|| BookingError::InvalidTime(format!("not an ISO-8601 instant: {datetime}")))?;

    Ok(Booking {
        id: id.unwrap_or_else(|| Ulid::new().to_string()),
        appointment_time: format_iso(appointment),
        request_time: format_iso(now),
        name: name.to_string(),
        email: email.to_string(),
        wechat_id: wechat_id.to_string(),
        topic: topic.to_string(),
        language: req.language.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTimeZone(pub String);

impl std::fmt::Display for UnknownTimeZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown time zone: {}", self.0)
    }
}

impl std::error::Error for UnknownTimeZone {}

pub fn parse_time_zone(name: &str) -> Result<Tz, UnknownTimeZone> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| UnknownTimeZone(name.to_string()))
}

pub fn render_in(instant: DateTime<Utc>, tz: Tz, pattern: &str) -> String {
    instant.with_timezone(&tz).format(pattern).to_string()
}

/// Format `instant` as wall time in the named zone.
pub fn render(instant: DateTime<Utc>, time_zone: &str, pattern: &str) -> Result<String, UnknownTimeZone> {
    Ok(render_in(instant, parse_time_zone(time_zone)?, pattern))
}

/// Inverse of [`render_in`] for patterns carrying a full date and time.
pub fn parse_local(display: &str, tz: Tz, pattern: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(display, &pattern.replace("%-", "%")).ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

/// Display zone for a customer: Chinese-speaking customers read Shanghai time.
pub fn customer_time_zone(language: Language, business: Tz) -> Tz {
    match language {
        Language::Zh => chrono_tz::Asia::Shanghai,
        Language::En => business,
    }
}
