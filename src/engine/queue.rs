use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono_tz::Tz;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::model::*;
use crate::observability::*;

use super::availability::{find_collision, parse_stored_time, SlotKey};
use super::lookup::{find_by_id, find_by_slot_and_email};
use super::store::BookingStore;
use super::BookingError;

/// A mutation waiting for the single writer.
pub(super) enum WriteOp {
    Create(Booking),
    Update {
        id: String,
        draft: Booking,
        keep_language: bool,
    },
    Delete {
        id: String,
    },
    Cancel {
        key: SlotKey,
        email: String,
    },
}

impl WriteOp {
    fn label(&self) -> &'static str {
        match self {
            WriteOp::Create(_) => "create",
            WriteOp::Update { .. } => "update",
            WriteOp::Delete { .. } => "delete",
            WriteOp::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Conflict,
    Error,
}

impl Outcome {
    fn of(result: &Result<Booking, BookingError>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(BookingError::SlotConflict(_) | BookingError::SlotConflictDuringProcessing(_)) => {
                Outcome::Conflict
            }
            Err(_) => Outcome::Error,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Conflict => "conflict",
            Outcome::Error => "error",
        }
    }
}

/// Lifecycle of one queued request. Resolved states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Processing,
    Resolved(Outcome),
}

impl JobState {
    pub fn advance(self, next: JobState) -> JobState {
        debug_assert!(
            matches!(
                (self, next),
                (JobState::Pending, JobState::Processing)
                    | (JobState::Processing, JobState::Resolved(_))
            ),
            "illegal job transition {self:?} -> {next:?}"
        );
        next
    }
}

struct Job {
    op: WriteOp,
    state: JobState,
    enqueued_at: Instant,
    response: oneshot::Sender<Result<Booking, BookingError>>,
}

/// Single-writer FIFO for every mutation of the booking set.
///
/// One background task owns the write path. Jobs are admitted in call order
/// and processed one at a time: re-read the store, re-check, write. A failing
/// or panicking job resolves with an error and the loop moves on.
pub struct BookingQueue {
    tx: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
}

impl BookingQueue {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn BookingStore>, tz: Tz) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        tokio::spawn(writer_loop(store, tz, rx, depth.clone()));
        Self { tx, depth }
    }

    /// Number of jobs admitted but not yet processing.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Queue a new booking. The job is admitted when this is called, not when
    /// the returned future is first polled, so call order is queue order.
    pub fn submit(
        &self,
        booking: Booking,
    ) -> impl Future<Output = Result<Booking, BookingError>> + Send + 'static {
        self.enqueue(WriteOp::Create(booking))
    }

    pub(super) fn enqueue(
        &self,
        op: WriteOp,
    ) -> impl Future<Output = Result<Booking, BookingError>> + Send + 'static {
        let (response, rx) = oneshot::channel();
        let label = op.label();
        self.depth.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            op,
            state: JobState::Pending,
            enqueued_at: Instant::now(),
            response,
        };
        let admitted = self.tx.send(job).is_ok();
        if admitted {
            metrics::gauge!(QUEUE_DEPTH).increment(1.0);
            debug!(op = label, "job pending");
        } else {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        async move {
            if !admitted {
                return Err(BookingError::QueueClosed);
            }
            rx.await.unwrap_or(Err(BookingError::QueueClosed))
        }
    }
}

async fn writer_loop(
    store: Arc<dyn BookingStore>,
    tz: Tz,
    mut rx: mpsc::UnboundedReceiver<Job>,
    depth: Arc<AtomicUsize>,
) {
    while let Some(mut job) = rx.recv().await {
        depth.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!(QUEUE_DEPTH).decrement(1.0);
        metrics::histogram!(QUEUE_WAIT_DURATION_SECONDS)
            .record(job.enqueued_at.elapsed().as_secs_f64());

        let label = job.op.label();
        job.state = job.state.advance(JobState::Processing);
        debug!(op = label, "job processing");

        let started = Instant::now();
        let result = match AssertUnwindSafe(process(store.as_ref(), tz, job.op))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(op = label, "booking write panicked");
                Err(BookingError::Storage("write failed unexpectedly".into()))
            }
        };
        metrics::histogram!(QUEUE_PROCESS_DURATION_SECONDS, "op" => label)
            .record(started.elapsed().as_secs_f64());

        let outcome = Outcome::of(&result);
        job.state = job.state.advance(JobState::Resolved(outcome));
        metrics::counter!(QUEUE_JOBS_TOTAL, "op" => label, "outcome" => outcome.label()).increment(1);
        match &result {
            Ok(b) => debug!(op = label, booking_id = %b.id, state = ?job.state, "job resolved"),
            Err(e) if outcome == Outcome::Conflict => info!(op = label, "job resolved: {e}"),
            Err(BookingError::Storage(e)) => error!(op = label, "job failed: {e}"),
            Err(e) => debug!(op = label, "job resolved: {e}"),
        }
        // The caller may have gone away; its result is simply dropped.
        let _ = job.response.send(result);
    }
    debug!("booking queue closed");
}

fn appointment_of(booking: &Booking, tz: Tz) -> Result<chrono::DateTime<chrono::Utc>, BookingError> {
    parse_stored_time(&booking.appointment_time, tz)
        .map_err(|e| BookingError::InvalidTime(e.to_string()))
}

async fn process(store: &dyn BookingStore, tz: Tz, op: WriteOp) -> Result<Booking, BookingError> {
    let bookings = store.list().await.map_err(BookingError::storage)?;
    match op {
        WriteOp::Create(booking) => {
            let at = appointment_of(&booking, tz)?;
            if let Some(taken) = find_collision(SlotKey::from_instant(at, tz), &bookings, tz, None) {
                debug!(booking_id = %taken.id, "slot taken before write");
                metrics::counter!(BOOKING_CONFLICTS_TOTAL, "stage" => "queue").increment(1);
                return Err(BookingError::SlotConflictDuringProcessing(at));
            }
            store.append(&booking).await.map_err(BookingError::storage)?;
            metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
            Ok(booking)
        }
        WriteOp::Update { id, mut draft, keep_language } => {
            let existing = find_by_id(&bookings, &id)?;
            draft.id = existing.id.clone();
            draft.request_time = existing.request_time.clone();
            if keep_language {
                draft.language = existing.language;
            }
            let at = appointment_of(&draft, tz)?;
            let key = SlotKey::from_instant(at, tz);
            if find_collision(key, &bookings, tz, Some(&existing.id)).is_some() {
                metrics::counter!(BOOKING_CONFLICTS_TOTAL, "stage" => "queue").increment(1);
                return Err(BookingError::SlotConflict(at));
            }
            store
                .replace(&draft)
                .await
                .map_err(BookingError::storage)?
                .ok_or(BookingError::NotFound(id))?;
            Ok(draft)
        }
        WriteOp::Delete { id } => {
            let target = find_by_id(&bookings, &id)?.id.clone();
            store
                .remove(&target)
                .await
                .map_err(BookingError::storage)?
                .ok_or(BookingError::NotFound(id))
        }
        WriteOp::Cancel { key, email } => {
            let target = find_by_slot_and_email(&bookings, key, &email, tz)
                .map(|b| b.id.clone())
                .ok_or_else(|| BookingError::NotFound(format!("{email} at {key:?}")))?;
            store
                .remove(&target)
                .await
                .map_err(BookingError::storage)?
                .ok_or(BookingError::NotFound(target))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono_tz::America::New_York;

    use crate::engine::store::InMemoryStore;

    fn booking(id: &str, at: &str) -> Booking {
        Booking {
            id: id.into(),
            appointment_time: at.into(),
            request_time: "2025-04-01T00:00:00.000Z".into(),
            name: id.into(),
            email: format!("{id}@example.com"),
            wechat_id: "w".into(),
            topic: "t".into(),
            language: Language::Zh,
        }
    }

    /// Records append order; fails or panics for chosen names.
    #[derive(Default)]
    struct ScriptedStore {
        inner: InMemoryStore,
        appended: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BookingStore for ScriptedStore {
        async fn list(&self) -> io::Result<Vec<Booking>> {
            self.inner.list().await
        }

        async fn append(&self, booking: &Booking) -> io::Result<()> {
            match booking.name.as_str() {
                "fail" => return Err(io::Error::other("disk full")),
                "panic" => panic!("store exploded"),
                _ => {}
            }
            self.appended.lock().unwrap().push(booking.id.clone());
            self.inner.append(booking).await
        }

        async fn remove(&self, id: &str) -> io::Result<Option<Booking>> {
            self.inner.remove(id).await
        }

        async fn replace(&self, booking: &Booking) -> io::Result<Option<Booking>> {
            self.inner.replace(booking).await
        }
    }

    fn slot(i: usize) -> String {
        // distinct half-hour slots on one day
        format!("2025-04-21T{:02}:{:02}:00.000Z", 13 + i / 2, (i % 2) * 30)
    }

    #[tokio::test]
    async fn drains_in_submission_order() {
        let store = Arc::new(ScriptedStore::default());
        let queue = BookingQueue::spawn(store.clone(), New_York);
        let pending: Vec<_> = (0..8)
            .map(|i| queue.submit(booking(&format!("b{i}"), &slot(i))))
            .collect();
        for result in futures::future::join_all(pending).await {
            result.unwrap();
        }
        let expected: Vec<String> = (0..8).map(|i| format!("b{i}")).collect();
        assert_eq!(*store.appended.lock().unwrap(), expected);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn same_slot_twice_second_conflicts() {
        let queue = BookingQueue::spawn(Arc::new(InMemoryStore::new()), New_York);
        let first = queue.submit(booking("a", "2025-04-21T14:00:00.000Z"));
        let second = queue.submit(booking("b", "2025-04-21T14:00:00.000Z"));
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().id, "a");
        assert!(matches!(second, Err(BookingError::SlotConflictDuringProcessing(_))));
    }

    #[tokio::test]
    async fn storage_failure_is_isolated() {
        let store = Arc::new(ScriptedStore::default());
        let queue = BookingQueue::spawn(store.clone(), New_York);
        let mut bad = booking("x", &slot(1));
        bad.name = "fail".into();
        let a = queue.submit(booking("a", &slot(0)));
        let x = queue.submit(bad);
        let c = queue.submit(booking("c", &slot(2)));
        let (a, x, c) = tokio::join!(a, x, c);
        assert!(a.is_ok());
        assert!(matches!(x, Err(BookingError::Storage(_))));
        assert!(c.is_ok());
        assert_eq!(*store.appended.lock().unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn panicking_write_does_not_stall_queue() {
        let store = Arc::new(ScriptedStore::default());
        let queue = BookingQueue::spawn(store.clone(), New_York);
        let mut bad = booking("p", &slot(0));
        bad.name = "panic".into();
        let p = queue.submit(bad);
        let ok = queue.submit(booking("ok", &slot(1)));
        let (p, ok) = tokio::join!(p, ok);
        assert!(matches!(p, Err(BookingError::Storage(_))));
        assert_eq!(ok.unwrap().id, "ok");
    }

    #[tokio::test]
    async fn delete_twice_is_not_found() {
        let store = Arc::new(InMemoryStore::with_bookings([booking("a", &slot(0))]));
        let queue = BookingQueue::spawn(store, New_York);
        let first = queue.enqueue(WriteOp::Delete { id: "a".into() }).await;
        let second = queue.enqueue(WriteOp::Delete { id: "a".into() }).await;
        assert_eq!(first.unwrap().id, "a");
        assert_eq!(second, Err(BookingError::NotFound("a".into())));
    }

    #[test]
    fn job_state_walks_forward() {
        let s = JobState::Pending
            .advance(JobState::Processing)
            .advance(JobState::Resolved(Outcome::Conflict));
        assert_eq!(s, JobState::Resolved(Outcome::Conflict));
    }

    #[test]
    #[should_panic(expected = "illegal job transition")]
    #[cfg(debug_assertions)]
    fn resolved_is_terminal() {
        JobState::Resolved(Outcome::Success).advance(JobState::Processing);
    }
}
