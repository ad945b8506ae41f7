use chrono::NaiveDate;

use crate::model::*;

use super::availability::{booked_keys, parse_stored_time, SlotKey};
use super::slots::{business_date, generate_slots};
use super::{Engine, BookingError};

impl Engine {
    /// Slots for one business-local date, each flagged booked or free.
    pub async fn list_slots(&self, date: NaiveDate) -> Result<Vec<SlotStatus>, BookingError> {
        let tz = self.time_zone();
        let slots = generate_slots(date, &self.policy, self.now(), self.hide_past_slots);
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        let taken = booked_keys(&self.read_all().await?, tz);
        Ok(slots
            .into_iter()
            .map(|time| SlotStatus {
                time,
                is_booked: taken.contains(&SlotKey::from_instant(time, tz)),
            })
            .collect())
    }

    /// Every booking in appointment order. Rows with unreadable times go last.
    pub async fn list_bookings(&self) -> Result<Vec<Booking>, BookingError> {
        let tz = self.time_zone();
        let mut keyed: Vec<_> = self
            .read_all()
            .await?
            .into_iter()
            .map(|b| (parse_stored_time(&b.appointment_time, tz).ok(), b))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(keyed.into_iter().map(|(_, b)| b).collect())
    }

    /// Bookings whose appointment falls on `date` in business-local time.
    pub async fn bookings_on(&self, date: NaiveDate) -> Result<Vec<Booking>, BookingError> {
        let tz = self.time_zone();
        Ok(self
            .list_bookings()
            .await?
            .into_iter()
            .filter(|b| {
                parse_stored_time(&b.appointment_time, tz)
                    .is_ok_and(|at| business_date(at, tz) == date)
            })
            .collect())
    }
}
