mod availability;
mod error;
mod lookup;
mod mutations;
mod queries;
mod queue;
mod serializer;
mod slots;
mod store;

pub use availability::{booked_keys, find_collision, is_available, parse_iso, SlotKey};
pub(crate) use availability::parse_stored_time;
pub use error::BookingError;
pub use lookup::{find_by_id, find_by_slot_and_email};
pub use queue::{BookingQueue, JobState, Outcome};
pub use serializer::{
    customer_time_zone, format_iso, parse_local, parse_time_zone, render, render_in, to_persisted,
    UnknownTimeZone, DATE_PATTERN, DATE_TIME_PATTERN, TIME_PATTERN,
};
pub use slots::{business_date, generate_slots, SlotPolicy};
pub use store::{BookingStore, CsvStore, InMemoryStore};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::clock::Clock;
use crate::model::*;

/// Booking engine: slot generation and availability reads against the
/// store, with every mutation funneled through one [`BookingQueue`].
pub struct Engine {
    pub(super) store: Arc<dyn BookingStore>,
    pub(super) queue: BookingQueue,
    pub(super) policy: SlotPolicy,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) hide_past_slots: bool,
}

impl Engine {
    /// Spawns the queue's writer task, so this must run inside a tokio runtime.
    pub fn new(
        store: Arc<dyn BookingStore>,
        policy: SlotPolicy,
        clock: Arc<dyn Clock>,
        hide_past_slots: bool,
    ) -> Self {
        let queue = BookingQueue::spawn(store.clone(), policy.time_zone);
        Self {
            store,
            queue,
            policy,
            clock,
            hide_past_slots,
        }
    }

    pub fn policy(&self) -> &SlotPolicy {
        &self.policy
    }

    pub fn time_zone(&self) -> Tz {
        self.policy.time_zone
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn queue(&self) -> &BookingQueue {
        &self.queue
    }

    /// A bookable instant is in the future and exactly on one of its
    /// business day's slot boundaries.
    pub(super) fn check_bookable(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), BookingError> {
        if at <= now {
            return Err(BookingError::InvalidTime(format!(
                "{} is in the past",
                format_iso(at)
            )));
        }
        let day = business_date(at, self.policy.time_zone);
        if !generate_slots(day, &self.policy, now, false).contains(&at) {
            return Err(BookingError::InvalidTime(format!(
                "{} is not a bookable slot",
                format_iso(at)
            )));
        }
        Ok(())
    }

    pub(super) async fn read_all(&self) -> Result<Vec<Booking>, BookingError> {
        self.store.list().await.map_err(BookingError::storage)
    }
}
