use async_trait::async_trait;
use chrono_tz::Tz;

use crate::engine::{customer_time_zone, parse_stored_time, render_in, DATE_TIME_PATTERN};
use crate::model::*;
use crate::observability::NOTICES_TOTAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Created,
    Updated,
    Cancelled,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Created => "created",
            NoticeKind::Updated => "updated",
            NoticeKind::Cancelled => "cancelled",
        }
    }
}

/// Everything a mailer needs to tell people about one booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub booking: Booking,
    /// Appointment as business-local wall time.
    pub business_time: String,
    /// Appointment in the customer's zone, chosen by language.
    pub customer_time: String,
    pub bcc: Vec<String>,
}

impl Notice {
    pub fn new(kind: NoticeKind, booking: Booking, business: Tz, bcc: &[String]) -> Self {
        let (business_time, customer_time) = match parse_stored_time(&booking.appointment_time, business) {
            Ok(at) => (
                render_in(at, business, DATE_TIME_PATTERN),
                render_in(at, customer_time_zone(booking.language, business), DATE_TIME_PATTERN),
            ),
            Err(_) => (booking.appointment_time.clone(), booking.appointment_time.clone()),
        };
        Self {
            kind,
            booking,
            business_time,
            customer_time,
            bcc: bcc.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Outbound notification collaborator (email in production).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notice: &Notice) -> Result<Delivery, NotifyError>;
}

/// Logs notices instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notice: &Notice) -> Result<Delivery, NotifyError> {
        tracing::info!(
            kind = notice.kind.as_str(),
            booking_id = %notice.booking.id,
            language = %notice.booking.language,
            business_time = %notice.business_time,
            customer_time = %notice.customer_time,
            "notice not sent: no mailer configured"
        );
        Ok(Delivery::Skipped)
    }
}

/// Deliver and report whether a message actually went out. Never fails.
pub async fn dispatch(notifier: &dyn Notifier, notice: &Notice) -> bool {
    match notifier.deliver(notice).await {
        Ok(Delivery::Sent) => {
            metrics::counter!(NOTICES_TOTAL, "result" => "sent").increment(1);
            true
        }
        Ok(Delivery::Skipped) => {
            metrics::counter!(NOTICES_TOTAL, "result" => "skipped").increment(1);
            false
        }
        Err(e) => {
            tracing::warn!(booking_id = %notice.booking.id, "{e}");
            metrics::counter!(NOTICES_TOTAL, "result" => "failed").increment(1);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn deliver(&self, _notice: &Notice) -> Result<Delivery, NotifyError> {
            Err(NotifyError("smtp down".into()))
        }
    }

    fn booking(language: Language) -> Booking {
        Booking {
            id: "a".into(),
            appointment_time: "2025-04-25T01:00:00.000Z".into(),
            request_time: String::new(),
            name: "n".into(),
            email: "e@example.com".into(),
            wechat_id: "w".into(),
            topic: "t".into(),
            language,
        }
    }

    #[test]
    fn notice_renders_both_zones() {
        let zh = Notice::new(NoticeKind::Created, booking(Language::Zh), New_York, &["bcc@example.com".into()]);
        assert_eq!(zh.business_time, "4/24/2025, 9:00:00 PM");
        assert_eq!(zh.customer_time, "4/25/2025, 9:00:00 AM");
        assert_eq!(zh.bcc, vec!["bcc@example.com"]);

        let en = Notice::new(NoticeKind::Created, booking(Language::En), New_York, &[]);
        assert_eq!(en.customer_time, en.business_time);
    }

    #[tokio::test]
    async fn dispatch_never_fails() {
        let notice = Notice::new(NoticeKind::Cancelled, booking(Language::En), New_York, &[]);
        assert!(!dispatch(&Failing, &notice).await);
        assert!(!dispatch(&LogNotifier, &notice).await);
    }
}
