use tracing::info;

use crate::model::*;
use crate::observability::*;

use super::availability::{booking_key, is_available, parse_iso, parse_stored_time, SlotKey};
use super::lookup::find_by_id;
use super::queue::WriteOp;
use super::serializer::to_persisted;
use super::{Engine, BookingError};

impl Engine {
    /// Validate, pre-check, then admit through the queue.
    ///
    /// A collision seen before queueing is `SlotConflict`; one only seen by
    /// the queue's authoritative re-check is `SlotConflictDuringProcessing`.
    pub async fn create_booking(&self, req: &BookingRequest) -> Result<Booking, BookingError> {
        let now = self.now();
        let booking = to_persisted(req, None, now)?;
        let tz = self.time_zone();
        let at = parse_iso(&booking.appointment_time)
            .ok_or_else(|| BookingError::InvalidTime(booking.appointment_time.clone()))?;
        self.check_bookable(at, now)?;

        let existing = self.read_all().await?;
        if !is_available(at, &existing, tz) {
            info!(at = %booking.appointment_time, "slot already booked");
            metrics::counter!(BOOKING_CONFLICTS_TOTAL, "stage" => "precheck").increment(1);
            return Err(BookingError::SlotConflict(at));
        }

        let created = self.queue.submit(booking).await?;
        info!(booking_id = %created.id, at = %created.appointment_time, "booking created");
        Ok(created)
    }

    /// Replace every field of booking `id` except the id and request time.
    /// The language is kept when the update leaves it out.
    pub async fn update_booking(&self, id: &str, req: &BookingRequest) -> Result<Booking, BookingError> {
        let now = self.now();
        let tz = self.time_zone();
        let draft = to_persisted(req, Some(id.to_string()), now)?;
        let at = parse_iso(&draft.appointment_time)
            .ok_or_else(|| BookingError::InvalidTime(draft.appointment_time.clone()))?;

        let existing = self.read_all().await?;
        let current = find_by_id(&existing, id)?;
        if booking_key(current, tz) != Some(SlotKey::from_instant(at, tz)) {
            self.check_bookable(at, now)?;
        }

        let updated = self
            .queue
            .enqueue(WriteOp::Update {
                id: id.to_string(),
                draft,
                keep_language: req.language.is_none(),
            })
            .await?;
        info!(booking_id = %updated.id, "booking updated");
        Ok(updated)
    }

    /// Remove one booking by id. Deleting twice yields `NotFound`.
    pub async fn delete_booking(&self, id: &str) -> Result<Booking, BookingError> {
        let removed = self
            .queue
            .enqueue(WriteOp::Delete { id: id.to_string() })
            .await?;
        info!(booking_id = %removed.id, "booking deleted");
        metrics::counter!(BOOKINGS_REMOVED_TOTAL, "via" => "id").increment(1);
        Ok(removed)
    }

    /// Cancel the booking at `datetime` (ISO or legacy form) owned by `email`.
    pub async fn cancel_booking(&self, datetime: &str, email: &str) -> Result<Booking, BookingError> {
        let tz = self.time_zone();
        let at = parse_stored_time(datetime, tz)
            .map_err(|e| BookingError::InvalidTime(e.to_string()))?;
        let removed = self
            .queue
            .enqueue(WriteOp::Cancel {
                key: SlotKey::from_instant(at, tz),
                email: email.trim().to_string(),
            })
            .await?;
        info!(booking_id = %removed.id, "booking cancelled");
        metrics::counter!(BOOKINGS_REMOVED_TOTAL, "via" => "cancel").increment(1);
        Ok(removed)
    }
}
