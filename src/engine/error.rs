use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Every required field that was missing or empty.
    Validation(Vec<&'static str>),
    InvalidTime(String),
    LimitExceeded(&'static str),
    SlotConflict(DateTime<Utc>),
    SlotConflictDuringProcessing(DateTime<Utc>),
    NotFound(String),
    Storage(String),
    QueueClosed,
}

impl BookingError {
    /// Stable machine-checkable code.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation_error",
            BookingError::InvalidTime(_) => "invalid_time",
            BookingError::LimitExceeded(_) => "limit_exceeded",
            BookingError::SlotConflict(_) => "slot_conflict",
            BookingError::SlotConflictDuringProcessing(_) => "slot_conflict_during_processing",
            BookingError::NotFound(_) => "not_found",
            BookingError::Storage(_) => "storage_error",
            BookingError::QueueClosed => "queue_closed",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            BookingError::Validation(_)
            | BookingError::InvalidTime(_)
            | BookingError::LimitExceeded(_) => 400,
            BookingError::SlotConflict(_) | BookingError::SlotConflictDuringProcessing(_) => 409,
            BookingError::NotFound(_) => 404,
            BookingError::Storage(_) | BookingError::QueueClosed => 500,
        }
    }

    pub(crate) fn storage(e: std::io::Error) -> Self {
        BookingError::Storage(e.to_string())
    }
}

fn iso(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Validation(fields) => {
                write!(f, "missing required fields: {}", fields.join(", "))
            }
            BookingError::InvalidTime(msg) => write!(f, "invalid appointment time: {msg}"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::SlotConflict(t) => write!(f, "time slot already booked: {}", iso(t)),
            BookingError::SlotConflictDuringProcessing(t) => write!(
                f,
                "time slot {} was booked by someone else while your request was processing",
                iso(t)
            ),
            BookingError::NotFound(id) => write!(f, "booking not found: {id}"),
            BookingError::Storage(e) => write!(f, "storage error: {e}"),
            BookingError::QueueClosed => write!(f, "booking queue is shut down"),
        }
    }
}

impl std::error::Error for BookingError {}
