// Persistence layer: the snapshot document and per-bridge history files.
//
// All writes go through one primitive: serialize to a sibling temp file,
// fsync, rename over the target. Readers therefore see either the old or the
// new complete bytes, never a torn file. A crash mid-rename loses at most the
// latest write; an orphaned temp file is harmless.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::model::{HistoryEntry, Snapshot, TrackedStatus, MAX_HISTORY_ENTRIES};

/// Atomically replace `path` with the JSON serialization of `value`.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let nonce: u32 = rand::thread_rng().gen();
    let temp_path = dir.join(format!(".{file_name}.{nonce:08x}.tmp"));

    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        io::Write::write_all(&mut file, &bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Read and parse a JSON file; missing or unparsable files yield None.
fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Unparsable JSON in {}: {}", path.display(), e);
            None
        }
    }
}

/// The snapshot document with its in-memory mirror.
///
/// One process-wide writer mutex serializes commits; readers take the
/// current Arc without locking against writers.
pub struct SnapshotStore {
    path: PathBuf,
    writer: Mutex<()>,
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotStore {
    /// Load the snapshot from disk. Missing or unparsable files start empty.
    pub fn load(path: impl Into<PathBuf>, available: Vec<crate::model::AvailableBridge>) -> Self {
        let path = path.into();
        let mut snapshot: Snapshot = read_json(&path).unwrap_or_else(|| {
            debug!("No usable snapshot at {}, starting empty", path.display());
            Snapshot::default()
        });
        snapshot.available_bridges = available;
        SnapshotStore {
            path,
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot. Cheap; callers never hold a lock afterwards.
    pub async fn current(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    /// Apply `mutate` to a copy of the snapshot, write the result to disk,
    /// then swap the in-memory mirror. The disk rename completes before the
    /// new snapshot becomes visible to readers or broadcasts.
    pub async fn commit<F>(&self, mutate: F) -> io::Result<Arc<Snapshot>>
    where
        F: FnOnce(&mut Snapshot),
    {
        let _guard = self.writer.lock().await;
        let mut next = (*self.current.read().await.clone()).clone();
        mutate(&mut next);
        atomic_write_json(&self.path, &next)?;
        let next = Arc::new(next);
        *self.current.write().await = next.clone();
        Ok(next)
    }
}

/// Per-bridge append-only history files, newest first, capped at 300.
pub struct HistoryStore {
    dir: PathBuf,
    writer: Mutex<()>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        HistoryStore {
            dir: dir.into(),
            writer: Mutex::new(()),
        }
    }

    fn path_for(&self, bridge_id: &str) -> PathBuf {
        self.dir.join(format!("{bridge_id}.json"))
    }

    /// Full history for a bridge, newest first. Missing files are empty.
    pub fn read(&self, bridge_id: &str) -> Vec<HistoryEntry> {
        read_json(&self.path_for(bridge_id)).unwrap_or_default()
    }

    /// Record that `bridge_id` is now in `status`.
    ///
    /// If the newest entry already carries `status` this is a no-op.
    /// Otherwise the open entry is closed (end_time set, duration computed)
    /// and a fresh open entry for `status` is prepended.
    pub async fn record_transition(
        &self,
        bridge_id: &str,
        status: TrackedStatus,
        now: DateTime<FixedOffset>,
    ) -> io::Result<()> {
        let _guard = self.writer.lock().await;
        let mut history = self.read(bridge_id);

        if let Some(head) = history.first_mut() {
            if head.status == status {
                return Ok(());
            }
            if head.end_time.is_none() {
                head.end_time = Some(now);
                head.duration = Some((now - head.start_time).num_seconds());
            }
        }

        history.insert(0, HistoryEntry {
            id: generate_entry_id(now),
            start_time: now,
            end_time: None,
            status,
            duration: None,
        });
        history.truncate(MAX_HISTORY_ENTRIES);

        atomic_write_json(&self.path_for(bridge_id), &history)
    }

    /// Replace a bridge's history wholesale (statistics trim).
    pub async fn rewrite(&self, bridge_id: &str, mut history: Vec<HistoryEntry>) -> io::Result<()> {
        let _guard = self.writer.lock().await;
        history.truncate(MAX_HISTORY_ENTRIES);
        atomic_write_json(&self.path_for(bridge_id), &history)
    }
}

/// History entry id: timestamp prefix plus a short random suffix,
/// e.g. "Jun01-1430-qkzr".
fn generate_entry_id(now: DateTime<FixedOffset>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    format!("{}-{}", now.format("%b%d-%H%M"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 1, 12, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_atomic_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let snapshot = Snapshot::default();

        atomic_write_json(&path, &snapshot).unwrap();
        let loaded: Option<Snapshot> = read_json(&path);
        assert_eq!(loaded.unwrap(), snapshot);

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_unparsable_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridges.json");
        fs::write(&path, b"{ not json").unwrap();

        let store = SnapshotStore::load(&path, vec![]);
        let snapshot = futures_block(store.current());
        assert!(snapshot.bridges.is_empty());
    }

    #[tokio::test]
    async fn test_transition_sequence_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());

        store
            .record_transition("SCT_CarltonSt", TrackedStatus::Available, t(0))
            .await
            .unwrap();
        store
            .record_transition("SCT_CarltonSt", TrackedStatus::RaisingSoon, t(5))
            .await
            .unwrap();
        store
            .record_transition("SCT_CarltonSt", TrackedStatus::Closed, t(10))
            .await
            .unwrap();

        let history = store.read("SCT_CarltonSt");
        assert_eq!(history.len(), 3);

        // Newest first; each closed entry's end_time matches the next
        // (newer) entry's start_time
        assert_eq!(history[0].status, TrackedStatus::Closed);
        assert_eq!(history[1].status, TrackedStatus::RaisingSoon);
        assert_eq!(history[2].status, TrackedStatus::Available);
        assert!(history[0].end_time.is_none());
        assert_eq!(history[1].end_time, Some(t(10)));
        assert_eq!(history[2].end_time, Some(t(5)));
        assert_eq!(history[1].duration, Some(300));
        assert_eq!(history[2].duration, Some(300));
        assert!(history[0].start_time >= history[1].start_time);
        assert!(history[1].start_time >= history[2].start_time);
    }

    #[tokio::test]
    async fn test_same_status_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());

        store
            .record_transition("PC_MainSt", TrackedStatus::Closed, t(0))
            .await
            .unwrap();
        store
            .record_transition("PC_MainSt", TrackedStatus::Closed, t(5))
            .await
            .unwrap();

        assert_eq!(store.read("PC_MainSt").len(), 1);
    }

    #[tokio::test]
    async fn test_history_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let base = t(0);

        for i in 0..320 {
            let status = if i % 2 == 0 {
                TrackedStatus::Closed
            } else {
                TrackedStatus::Available
            };
            store
                .record_transition("K_CPRailwayA", status, base + Duration::minutes(i))
                .await
                .unwrap();
        }

        assert_eq!(store.read("K_CPRailwayA").len(), MAX_HISTORY_ENTRIES);
    }

    #[test]
    fn test_missing_history_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        assert!(store.read("SBS_Larocque").is_empty());
    }

    #[test]
    fn test_entry_id_shape() {
        let id = generate_entry_id(t(30));
        assert!(id.starts_with("Jun01-1230-"));
        assert_eq!(id.len(), "Jun01-1230-".len() + 4);
    }

    /// Minimal block_on for the one sync test that touches async state.
    fn futures_block<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
