//! Per-hymn usage statistics persisted as a single JSON document.
//!
//! The document holds `[queries, launches, last_accessed]` for every hymn
//! number up to the hymnal's capacity, plus a creation timestamp, a file type
//! tag and a checksum taken when the document was generated. Every change
//! rewrites the whole document. A file that is missing, unparsable, or lacks
//! any entry is thrown away and regenerated with zeroed counters; there is no
//! partial repair. Counters stored as JSON floats are accepted and truncated.
//!
//! The checksum is written for compatibility but not checked on load.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use crate::catalog::HymnNumber;
use crate::config::STATS_FILE_TYPE;
use crate::error::StatsError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64, f64)", into = "(u64, u64, f64)")]
pub struct StatEntry {
    pub queries: u64,
    pub launches: u64,
    pub last_accessed: f64,
}

/// Counters written as floats (`1.0`) are accepted; `as` saturates negatives to zero.
impl From<(f64, f64, f64)> for StatEntry {
    fn from((queries, launches, last_accessed): (f64, f64, f64)) -> Self {
        Self {
            queries: queries as u64,
            launches: launches as u64,
            last_accessed,
        }
    }
}

impl From<StatEntry> for (u64, u64, f64) {
    fn from(entry: StatEntry) -> Self {
        (entry.queries, entry.launches, entry.last_accessed)
    }
}

/// Zero-padded hymn number → counters.
pub type StatRecord = BTreeMap<String, StatEntry>;

/// On-disk layout. Field order keeps the serialized keys sorted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsDocument {
    #[serde(rename = "DATA")]
    pub data: StatRecord,
    #[serde(rename = "__CHECKSUM__", default)]
    pub checksum: Option<String>,
    #[serde(rename = "__DATECREATED", default)]
    pub date_created: f64,
    #[serde(rename = "__FILETYPE__", default)]
    pub file_type: String,
}

impl StatsDocument {
    pub fn generate(max_hymns: u16, created_at: f64) -> Self {
        let data = (1..=max_hymns)
            .map(|n| (HymnNumber(n).to_string(), StatEntry::default()))
            .collect();
        let mut document = Self {
            data,
            checksum: None,
            date_created: created_at,
            file_type: STATS_FILE_TYPE.to_string(),
        };
        document.checksum = Some(document_checksum(&document));
        document
    }
}

/// SHA-256 over the document serialized with an empty checksum field.
pub fn document_checksum(document: &StatsDocument) -> String {
    let mut unsigned = document.clone();
    unsigned.checksum = None;
    let payload = serde_json::to_vec(&unsigned).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&payload);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aggregate {
    pub total_queries: u64,
    pub total_launches: u64,
    pub most_recent_access: f64,
    pub least_recent_access: f64,
}

/// Reads and validates a statistics file without repairing it.
pub fn read_document(path: &Path, max_hymns: u16) -> Result<StatsDocument, StatsError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StatsError::CorruptData("statistics file is missing".to_string()));
        }
        Err(source) => {
            return Err(StatsError::Unreadable {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| StatsError::CorruptData(format!("unparsable statistics file: {e}")))?;
    validate_entries(&value, max_hymns)?;
    serde_json::from_value(value)
        .map_err(|e| StatsError::CorruptData(format!("unexpected statistics layout: {e}")))
}

fn validate_entries(value: &Value, max_hymns: u16) -> Result<(), StatsError> {
    let data = value
        .get("DATA")
        .and_then(Value::as_object)
        .ok_or_else(|| StatsError::CorruptData("missing DATA section".to_string()))?;

    for number in (1..=max_hymns).map(HymnNumber) {
        let key = number.to_string();
        let valid = data
            .get(&key)
            .and_then(Value::as_array)
            .is_some_and(|fields| {
                fields.len() == 3 && fields.iter().all(Value::is_number)
            });
        if !valid {
            return Err(StatsError::CorruptData(format!(
                "corrupted \"{key}\" entry"
            )));
        }
    }
    Ok(())
}

#[derive(Debug)]
struct StoreState {
    document: StatsDocument,
    dirty: bool,
}

/// Owner of the statistics file. All reads and writes go through one mutex,
/// so a background recorder and a foreground launch never interleave.
#[derive(Debug)]
pub struct StatisticsStore {
    path: PathBuf,
    max_hymns: u16,
    state: Mutex<StoreState>,
}

impl StatisticsStore {
    /// Opens (and if needed regenerates) the statistics file.
    pub fn open(path: PathBuf, max_hymns: u16) -> Self {
        let store = Self {
            path,
            max_hymns,
            state: Mutex::new(StoreState {
                document: StatsDocument::generate(max_hymns, now_secs()),
                dirty: true,
            }),
        };
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_hymns(&self) -> u16 {
        self.max_hymns
    }

    /// Re-reads the backing file. Corrupt or missing data is replaced by a
    /// freshly generated default record, which is persisted before returning.
    /// A file that exists but cannot be read is left on disk untouched.
    pub fn load(&self) -> StatRecord {
        let mut state = self.lock();
        match read_document(&self.path, self.max_hymns) {
            Ok(document) => {
                debug!("Loaded statistics from {}", self.path.display());
                state.document = document;
                state.dirty = false;
            }
            Err(err @ StatsError::Unreadable { .. }) => {
                warn!("{err}. Using default statistics without touching the file");
                state.document = StatsDocument::generate(self.max_hymns, now_secs());
                state.dirty = false;
            }
            Err(err) => {
                warn!("{err}. Regenerating statistics with default values");
                self.regenerate(&mut state);
            }
        }
        state.document.data.clone()
    }

    pub fn record_access(
        &self,
        number: HymnNumber,
        increment_queries: bool,
        increment_launches: bool,
    ) -> Result<StatEntry, StatsError> {
        if number.is_sentinel() || number.get() > self.max_hymns {
            return Err(StatsError::UnknownItem(number));
        }

        let mut state = self.lock();
        let entry = state.document.data.entry(number.to_string()).or_default();
        if increment_queries {
            entry.queries = entry.queries.saturating_add(1);
        }
        if increment_launches {
            entry.launches = entry.launches.saturating_add(1);
        }
        entry.last_accessed = now_secs();
        let updated = *entry;

        state.dirty = true;
        self.persist_logged(&mut state);
        Ok(updated)
    }

    pub fn entry(&self, number: HymnNumber) -> StatEntry {
        self.lock()
            .document
            .data
            .get(&number.to_string())
            .copied()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> StatRecord {
        self.lock().document.data.clone()
    }

    pub fn aggregate(&self) -> Aggregate {
        let state = self.lock();
        let mut total_queries = 0u64;
        let mut total_launches = 0u64;
        let mut most_recent = f64::MIN;
        let mut least_recent = f64::MAX;

        for number in (1..=self.max_hymns).map(HymnNumber) {
            let entry = state
                .document
                .data
                .get(&number.to_string())
                .copied()
                .unwrap_or_default();
            total_queries = total_queries.saturating_add(entry.queries);
            total_launches = total_launches.saturating_add(entry.launches);
            most_recent = most_recent.max(entry.last_accessed);
            least_recent = least_recent.min(entry.last_accessed);
        }

        if self.max_hymns == 0 {
            most_recent = 0.0;
            least_recent = 0.0;
        }

        Aggregate {
            total_queries,
            total_launches,
            most_recent_access: most_recent,
            least_recent_access: least_recent,
        }
    }

    /// Deletes the file and starts over with zeroed counters.
    pub fn reset(&self) {
        let mut state = self.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Removed statistics file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove statistics file {}: {e}", self.path.display()),
        }
        self.regenerate(&mut state);
    }

    /// Writes the document if an earlier write failed.
    pub fn flush(&self) -> Result<(), StatsError> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }
        self.persist(&mut state)
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn checksum(&self) -> Option<String> {
        self.lock().document.checksum.clone()
    }

    pub fn created_at(&self) -> f64 {
        self.lock().document.date_created
    }

    fn regenerate(&self, state: &mut StoreState) {
        state.document = StatsDocument::generate(self.max_hymns, now_secs());
        state.dirty = true;
        self.persist_logged(state);
        info!(
            "Default statistics generated | Hash: {}",
            state.document.checksum.as_deref().unwrap_or("-")
        );
    }

    fn persist_logged(&self, state: &mut StoreState) {
        if let Err(err) = self.persist(state) {
            error!("{err}. The write will be retried on the next change");
        }
    }

    fn persist(&self, state: &mut StoreState) -> Result<(), StatsError> {
        let fail = |source: std::io::Error| StatsError::PersistenceWriteFailure {
            path: self.path.clone(),
            source,
        };

        let payload =
            serde_json::to_vec(&state.document).map_err(|e| fail(std::io::Error::other(e)))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(fail)?;
        }

        let mut tmp_os = self.path.as_os_str().to_os_string();
        tmp_os.push(".tmp");
        let tmp = PathBuf::from(tmp_os);
        std::fs::write(&tmp, &payload).map_err(fail)?;
        std::fs::rename(&tmp, &self.path).map_err(fail)?;

        state.dirty = false;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Arc;

    const MAX: u16 = 474;

    fn store_in(dir: &Path) -> StatisticsStore {
        StatisticsStore::open(dir.join("data.json"), MAX)
    }

    fn rewrite(path: &Path, edit: impl FnOnce(&mut Value)) -> Result<()> {
        let mut value: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        edit(&mut value);
        std::fs::write(path, serde_json::to_vec(&value)?)?;
        Ok(())
    }

    #[test]
    fn open_creates_zeroed_document_for_every_number() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        let document = read_document(store.path(), MAX)?;
        assert_eq!(document.data.len(), MAX as usize);
        assert_eq!(document.file_type, STATS_FILE_TYPE);
        assert!(document.data.values().all(|e| *e == StatEntry::default()));
        assert!(!store.is_dirty());
        Ok(())
    }

    #[test]
    fn document_is_written_with_sorted_keys_and_array_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.record_access(HymnNumber(3), true, false)?;

        let text = std::fs::read_to_string(store.path())?;
        assert!(text.starts_with("{\"DATA\":{\"001\":[0,0,0.0]"));
        let value: Value = serde_json::from_str(&text)?;
        let keys: Vec<&String> = value.as_object().map(|o| o.keys().collect()).unwrap_or_default();
        assert_eq!(keys, ["DATA", "__CHECKSUM__", "__DATECREATED", "__FILETYPE__"]);
        assert_eq!(value["DATA"]["003"][0], Value::from(1));
        Ok(())
    }

    #[test]
    fn reset_then_load_yields_all_zero_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.record_access(HymnNumber(10), true, true)?;
        store.record_access(HymnNumber(474), false, true)?;

        store.reset();
        let record = store.load();
        assert_eq!(record.len(), MAX as usize);
        assert!(record.values().all(|e| *e == StatEntry::default()));
        Ok(())
    }

    #[test]
    fn record_access_twice_counts_queries_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        let first = store.record_access(HymnNumber(123), true, false)?;
        let second = store.record_access(HymnNumber(123), true, false)?;

        let entry = store.entry(HymnNumber(123));
        assert_eq!(entry.queries, 2);
        assert_eq!(entry.launches, 0);
        assert_eq!(entry.last_accessed, second.last_accessed);
        assert!(second.last_accessed >= first.last_accessed);

        let reloaded = store.load();
        assert_eq!(reloaded["123"], entry);
        Ok(())
    }

    #[test]
    fn missing_key_regenerates_the_whole_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.record_access(HymnNumber(1), true, true)?;

        rewrite(store.path(), |value| {
            if let Some(data) = value["DATA"].as_object_mut() {
                data.remove("317");
            }
        })?;
        assert!(matches!(
            read_document(store.path(), MAX),
            Err(StatsError::CorruptData(_))
        ));

        let record = store.load();
        assert_eq!(record["001"], StatEntry::default());
        assert_eq!(record["317"], StatEntry::default());
        assert!(read_document(store.path(), MAX).is_ok());
        Ok(())
    }

    #[test]
    fn malformed_entries_and_garbage_files_regenerate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.record_access(HymnNumber(5), true, false)?;

        rewrite(store.path(), |value| {
            value["DATA"]["042"] = serde_json::json!([1, 2]);
        })?;
        let record = store.load();
        assert_eq!(record["005"].queries, 0);

        store.record_access(HymnNumber(5), true, false)?;
        rewrite(store.path(), |value| {
            value["DATA"]["042"] = serde_json::json!(["1", 0, 0]);
        })?;
        assert_eq!(store.load()["005"].queries, 0);

        std::fs::write(store.path(), b"{not json")?;
        let record = store.load();
        assert_eq!(record.len(), MAX as usize);
        Ok(())
    }

    #[test]
    fn checksum_is_stored_but_not_verified_on_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        let checksum = store.checksum().unwrap_or_default();
        assert_eq!(checksum.len(), 64);
        assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));

        store.record_access(HymnNumber(7), true, false)?;
        rewrite(store.path(), |value| {
            value["__CHECKSUM__"] = Value::from("tampered");
        })?;
        let record = store.load();
        assert_eq!(record["007"].queries, 1);
        assert_eq!(store.checksum().as_deref(), Some("tampered"));
        Ok(())
    }

    #[test]
    fn aggregate_sums_and_is_stable_between_calls() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.record_access(HymnNumber(1), true, true)?;
        store.record_access(HymnNumber(2), true, false)?;
        let last = store.record_access(HymnNumber(2), false, true)?;

        let first = store.aggregate();
        let second = store.aggregate();
        assert_eq!(first, second);
        assert_eq!(first.total_queries, 2);
        assert_eq!(first.total_launches, 2);
        assert_eq!(first.most_recent_access, last.last_accessed);
        assert_eq!(first.least_recent_access, 0.0);
        Ok(())
    }

    #[test]
    fn out_of_range_numbers_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        assert!(matches!(
            store.record_access(HymnNumber(0), true, false),
            Err(StatsError::UnknownItem(_))
        ));
        assert!(matches!(
            store.record_access(HymnNumber(MAX + 1), true, false),
            Err(StatsError::UnknownItem(_))
        ));
        assert_eq!(store.aggregate().total_queries, 0);
        Ok(())
    }

    #[test]
    fn failed_writes_stay_dirty_without_failing_the_update() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"")?;

        let store = StatisticsStore::open(blocker.join("data.json"), MAX);
        assert!(store.is_dirty());
        let updated = store.record_access(HymnNumber(9), true, false)?;
        assert_eq!(updated.queries, 1);
        assert!(store.is_dirty());
        assert!(matches!(
            store.flush(),
            Err(StatsError::PersistenceWriteFailure { .. })
        ));

        std::fs::remove_file(&blocker)?;
        store.record_access(HymnNumber(10), true, false)?;
        assert!(!store.is_dirty());
        let document = read_document(store.path(), MAX)?;
        assert_eq!(document.data["009"].queries, 1);
        assert_eq!(document.data["010"].queries, 1);
        Ok(())
    }

    #[test]
    fn float_and_negative_counters_load_without_regeneration() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.record_access(HymnNumber(5), true, false)?;

        rewrite(store.path(), |value| {
            value["DATA"]["042"] = serde_json::json!([1.0, 0, 0]);
            value["DATA"]["043"] = serde_json::json!([-1, 2.5, 17]);
        })?;
        assert!(read_document(store.path(), MAX).is_ok());

        let record = store.load();
        assert_eq!(record["005"].queries, 1);
        assert_eq!(record["042"].queries, 1);
        assert_eq!(record["043"].queries, 0);
        assert_eq!(record["043"].launches, 2);
        assert_eq!(record["043"].last_accessed, 17.0);
        Ok(())
    }

    #[test]
    fn unreadable_file_is_left_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.json");
        std::fs::create_dir(&path)?;

        assert!(matches!(
            read_document(&path, MAX),
            Err(StatsError::Unreadable { .. })
        ));
        let store = StatisticsStore::open(path.clone(), MAX);
        assert_eq!(store.snapshot().len(), MAX as usize);
        assert!(!store.is_dirty());
        assert!(path.is_dir());
        Ok(())
    }

    #[test]
    fn concurrent_updates_are_not_lost() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(store_in(dir.path()));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for _ in 0..10 {
                        let _ = store.record_access(HymnNumber(50), true, false);
                    }
                });
            }
        });

        assert_eq!(store.entry(HymnNumber(50)).queries, 40);
        assert_eq!(store.load()["050"].queries, 40);
        Ok(())
    }
}
