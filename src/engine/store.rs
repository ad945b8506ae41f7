use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::*;

/// Durable owner of the booking set. The engine re-reads it before every
/// decision and never caches it across requests.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn list(&self) -> io::Result<Vec<Booking>>;
    async fn append(&self, booking: &Booking) -> io::Result<()>;
    /// Remove by exact id, returning the removed record.
    async fn remove(&self, id: &str) -> io::Result<Option<Booking>>;
    /// Replace the record with the same exact id, returning the previous one.
    async fn replace(&self, booking: &Booking) -> io::Result<Option<Booking>>;
}

// ── In-memory ────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryStore {
    bookings: DashMap<String, Booking>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bookings(bookings: impl IntoIterator<Item = Booking>) -> Self {
        let store = Self::new();
        for b in bookings {
            store.bookings.insert(b.id.clone(), b);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn list(&self) -> io::Result<Vec<Booking>> {
        Ok(self.bookings.iter().map(|e| e.value().clone()).collect())
    }

    async fn append(&self, booking: &Booking) -> io::Result<()> {
        self.bookings.insert(booking.id.clone(), booking.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> io::Result<Option<Booking>> {
        Ok(self.bookings.remove(id).map(|(_, b)| b))
    }

    async fn replace(&self, booking: &Booking) -> io::Result<Option<Booking>> {
        match self.bookings.get_mut(&booking.id) {
            Some(mut entry) => Ok(Some(std::mem::replace(entry.value_mut(), booking.clone()))),
            None => Ok(None),
        }
    }
}

// ── CSV file ─────────────────────────────────────────────

/// Current column order. Older files lack `language`.
const HEADER: [&str; 8] = [
    "id",
    "appointmentTime",
    "requestTime",
    "name",
    "email",
    "wechatId",
    "topic",
    "language",
];

/// One CSV row, all text so odd legacy rows still decode.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CsvRow {
    id: String,
    appointment_time: String,
    request_time: String,
    name: String,
    email: String,
    wechat_id: String,
    topic: String,
    language: String,
}

impl From<CsvRow> for Booking {
    fn from(row: CsvRow) -> Self {
        Booking {
            language: row.language.parse().unwrap_or_default(),
            id: row.id,
            appointment_time: row.appointment_time,
            request_time: row.request_time,
            name: row.name,
            email: row.email,
            wechat_id: row.wechat_id,
            topic: row.topic,
        }
    }
}

impl From<&Booking> for CsvRow {
    fn from(b: &Booking) -> Self {
        CsvRow {
            id: b.id.clone(),
            appointment_time: b.appointment_time.clone(),
            request_time: b.request_time.clone(),
            name: b.name.clone(),
            email: b.email.clone(),
            wechat_id: b.wechat_id.clone(),
            topic: b.topic.clone(),
            language: b.language.as_str().to_string(),
        }
    }
}

/// Flat CSV file, one row per booking.
///
/// Appends go to the end of the file; removals and replacements rewrite the
/// whole file into `<path>.tmp` and rename it over the original.
pub struct CsvStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl CsvStore {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        Ok(Self { path, lock: RwLock::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> io::Result<Vec<Booking>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let mut bookings = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            match row {
                Ok(row) if !row.id.trim().is_empty() => bookings.push(row.into()),
                Ok(_) => tracing::warn!(line = line + 2, "skipping booking row without id"),
                Err(e) => tracing::warn!(line = line + 2, "skipping undecodable booking row: {e}"),
            }
        }
        Ok(bookings)
    }

    /// Whether the file starts with [`HEADER`]. `None` when it is missing or empty.
    fn has_current_header(&self) -> io::Result<Option<bool>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let headers = reader.headers()?;
        Ok(Some(headers.iter().eq(HEADER)))
    }

    fn write_all(&self, bookings: &[Booking]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("csv.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = csv::Writer::from_writer(BufWriter::new(file));
            for b in bookings {
                writer.serialize(CsvRow::from(b))?;
            }
            let mut inner = writer.into_inner().map_err(|e| e.into_error())?;
            inner.flush()?;
            inner.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)
    }
}

#[async_trait]
impl BookingStore for CsvStore {
    async fn list(&self) -> io::Result<Vec<Booking>> {
        let _guard = self.lock.read().await;
        self.read_all()
    }

    async fn append(&self, booking: &Booking) -> io::Result<()> {
        let _guard = self.lock.write().await;
        let needs_header = match self.has_current_header()? {
            None => true,
            Some(true) => false,
            // Appending under an older header would drop the extra columns.
            Some(false) => {
                tracing::info!(path = %self.path.display(), "rewriting booking file with current header");
                let mut bookings = self.read_all()?;
                bookings.push(booking.clone());
                return self.write_all(&bookings);
            }
        };
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(BufWriter::new(file));
        writer.serialize(CsvRow::from(booking))?;
        let mut inner = writer.into_inner().map_err(|e| e.into_error())?;
        inner.flush()?;
        inner.get_ref().sync_all()
    }

    async fn remove(&self, id: &str) -> io::Result<Option<Booking>> {
        let _guard = self.lock.write().await;
        let mut bookings = self.read_all()?;
        let Some(pos) = bookings.iter().position(|b| b.id == id) else {
            return Ok(None);
        };
        let removed = bookings.remove(pos);
        self.write_all(&bookings)?;
        Ok(Some(removed))
    }

    async fn replace(&self, booking: &Booking) -> io::Result<Option<Booking>> {
        let _guard = self.lock.write().await;
        let mut bookings = self.read_all()?;
        let Some(slot) = bookings.iter_mut().find(|b| b.id == booking.id) else {
            return Ok(None);
        };
        let previous = std::mem::replace(slot, booking.clone());
        self.write_all(&bookings)?;
        Ok(Some(previous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_store");
        fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{name}_{}.csv", Ulid::new()))
    }

    fn booking(id: &str, at: &str) -> Booking {
        Booking {
            id: id.into(),
            appointment_time: at.into(),
            request_time: "2025-04-01T00:00:00.000Z".into(),
            name: "Wang, Fang".into(),
            email: "wf@example.com".into(),
            wechat_id: "wf".into(),
            topic: "line one\nline \"two\"".into(),
            language: Language::En,
        }
    }

    #[tokio::test]
    async fn append_writes_header_once() {
        let path = tmp_path("header");
        let store = CsvStore::open(&path).unwrap();
        store.append(&booking("a", "2025-04-21T14:00:00.000Z")).await.unwrap();
        store.append(&booking("b", "2025-04-21T14:30:00.000Z")).await.unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,appointmentTime,requestTime,name,email,wechatId,topic,language"));
        assert_eq!(text.matches("appointmentTime").count(), 1);

        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec![booking("a", "2025-04-21T14:00:00.000Z"), booking("b", "2025-04-21T14:30:00.000Z")]);
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_file_lists_empty() {
        let store = CsvStore::open(tmp_path("missing")).unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn legacy_rows_are_read_and_preserved() {
        let path = tmp_path("legacy");
        fs::write(
            &path,
            "id,appointmentTime,requestTime,name,email,wechatId,topic\n\
             1,\"4/21/2025, 10:00:00 AM\",\"4/1/2025, 8:00:00 AM\",Old,o@example.com,old,intro\n\
             2,2025-04-21T15:00:00.000Z,2025-04-01T00:00:00.000Z,New,n@example.com,new,visa\n",
        )
        .unwrap();
        let store = CsvStore::open(&path).unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].appointment_time, "4/21/2025, 10:00:00 AM");
        assert_eq!(listed[0].language, Language::Zh);

        let removed = store.remove("2").await.unwrap().unwrap();
        assert_eq!(removed.name, "New");
        let after = store.list().await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].appointment_time, "4/21/2025, 10:00:00 AM");
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn append_to_legacy_file_keeps_language() {
        let path = tmp_path("legacy_append");
        fs::write(
            &path,
            "id,appointmentTime,requestTime,name,email,wechatId,topic\n\
             1,\"4/21/2025, 10:00:00 AM\",\"4/1/2025, 8:00:00 AM\",Old,o@example.com,old,intro\n",
        )
        .unwrap();
        let store = CsvStore::open(&path).unwrap();
        store.append(&booking("new", "2025-04-22T14:00:00.000Z")).await.unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,appointmentTime,requestTime,name,email,wechatId,topic,language\n"));

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].appointment_time, "4/21/2025, 10:00:00 AM");
        assert_eq!(listed[0].request_time, "4/1/2025, 8:00:00 AM");
        assert_eq!(listed[0].language, Language::Zh);
        assert_eq!(listed[1], booking("new", "2025-04-22T14:00:00.000Z"));

        // Later appends go straight to the end again.
        store.append(&booking("newer", "2025-04-23T14:00:00.000Z")).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[2].language, Language::En);
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn remove_unknown_id_is_none() {
        let path = tmp_path("remove_none");
        let store = CsvStore::open(&path).unwrap();
        store.append(&booking("a", "2025-04-21T14:00:00.000Z")).await.unwrap();
        assert_eq!(store.remove("zzz").await.unwrap(), None);
        assert_eq!(store.list().await.unwrap().len(), 1);
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn replace_swaps_record_in_place() {
        let path = tmp_path("replace");
        let store = CsvStore::open(&path).unwrap();
        store.append(&booking("a", "2025-04-21T14:00:00.000Z")).await.unwrap();
        store.append(&booking("b", "2025-04-21T15:00:00.000Z")).await.unwrap();

        let mut updated = booking("a", "2025-04-22T14:00:00.000Z");
        updated.topic = "moved".into();
        let previous = store.replace(&updated).await.unwrap().unwrap();
        assert_eq!(previous.appointment_time, "2025-04-21T14:00:00.000Z");

        let listed = store.list().await.unwrap();
        assert_eq!(listed[0], updated);
        assert_eq!(listed[1].id, "b");
        assert!(store.replace(&booking("nope", "x")).await.unwrap().is_none());
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn undecodable_rows_are_skipped() {
        let path = tmp_path("garbage");
        fs::write(
            &path,
            "id,appointmentTime,requestTime,name,email,wechatId,topic,language\n\
             ,2025-04-21T15:00:00.000Z,,,,,,\n\
             ok,2025-04-21T16:00:00.000Z,2025-04-01T00:00:00.000Z,A,a@example.com,a,t,en\n",
        )
        .unwrap();
        let store = CsvStore::open(&path).unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "ok");
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemoryStore::new();
        store.append(&booking("a", "2025-04-21T14:00:00.000Z")).await.unwrap();
        assert_eq!(store.len(), 1);
        let mut moved = booking("a", "2025-04-21T15:00:00.000Z");
        moved.name = "x".into();
        assert!(store.replace(&moved).await.unwrap().is_some());
        assert_eq!(store.list().await.unwrap(), vec![moved.clone()]);
        assert_eq!(store.remove("a").await.unwrap(), Some(moved));
        assert!(store.is_empty());
    }
}
