use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{ensure_persistable, recent_first, GeneratedImage, HistoryStore};
use crate::error::StudioError;

pub const HISTORY_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    schema_version: u64,
    #[serde(default)]
    records: BTreeMap<String, GeneratedImage>,
}

/// History store backed by a single versioned JSON document.
///
/// Nothing is cached between calls: each operation reads the file, and each
/// mutation rewrites it through a uniquely named sibling temp file and a
/// rename. Mutations hold an exclusive lock on `<file>.lock`, so handles in
/// other threads or processes never lose each other's writes.
#[derive(Debug)]
pub struct JsonHistoryStore {
    path: PathBuf,
    lock_path: PathBuf,
    held: Option<File>,
}

impl JsonHistoryStore {
    /// Open the store, creating the backing file on first use.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StudioError> {
        let path = path.into();
        let unavailable =
            |err: String| StudioError::StorageUnavailable(format!("{}: {err}", path.display()));

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| unavailable(err.to_string()))?;
        }
        let store = Self {
            lock_path: path.with_extension("json.lock"),
            path: path.clone(),
            held: None,
        };
        let _guard = store.lock().map_err(|err| unavailable(err.to_string()))?;
        if path.exists() {
            let file = store
                .read()
                .map_err(|err| unavailable(err.to_string()))?;
            if file.schema_version > HISTORY_SCHEMA_VERSION {
                return Err(unavailable(format!(
                    "schema version {} is newer than supported {}",
                    file.schema_version, HISTORY_SCHEMA_VERSION
                )));
            }
        } else {
            store
                .write(&HistoryFile {
                    schema_version: HISTORY_SCHEMA_VERSION,
                    records: BTreeMap::new(),
                })
                .map_err(|err| unavailable(err.to_string()))?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<HistoryFile, StudioError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|err| {
            StudioError::Storage(format!("failed reading {}: {err}", self.path.display()))
        })?;
        if raw.trim().is_empty() {
            return Ok(HistoryFile {
                schema_version: HISTORY_SCHEMA_VERSION,
                records: BTreeMap::new(),
            });
        }
        serde_json::from_str(&raw).map_err(|err| {
            StudioError::Storage(format!("failed parsing {}: {err}", self.path.display()))
        })
    }

    fn write(&self, file: &HistoryFile) -> Result<(), StudioError> {
        let serialized = serde_json::to_string_pretty(file).map_err(StudioError::storage)?;
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staging = NamedTempFile::new_in(dir).map_err(|err| {
            StudioError::Storage(format!("failed staging in {}: {err}", dir.display()))
        })?;
        staging.write_all(serialized.as_bytes()).map_err(|err| {
            StudioError::Storage(format!(
                "failed writing {}: {err}",
                staging.path().display()
            ))
        })?;
        staging.persist(&self.path).map_err(|err| {
            StudioError::Storage(format!(
                "failed replacing {}: {}",
                self.path.display(),
                err.error
            ))
        })?;
        Ok(())
    }

    /// Exclusive lock on the sibling lock file; released when the handle drops.
    fn lock(&self) -> Result<File, StudioError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|err| {
                StudioError::Storage(format!(
                    "failed opening {}: {err}",
                    self.lock_path.display()
                ))
            })?;
        file.lock().map_err(|err| {
            StudioError::Storage(format!(
                "failed locking {}: {err}",
                self.lock_path.display()
            ))
        })?;
        Ok(file)
    }

    fn mutate(&self, apply: impl FnOnce(&mut HistoryFile) -> bool) -> Result<(), StudioError> {
        let _guard = match self.held {
            Some(_) => None,
            None => Some(self.lock()?),
        };
        let mut file = self.read()?;
        if !apply(&mut file) {
            return Ok(());
        }
        file.schema_version = HISTORY_SCHEMA_VERSION;
        self.write(&file)
    }
}

impl HistoryStore for JsonHistoryStore {
    fn put(&mut self, record: &GeneratedImage) -> Result<(), StudioError> {
        ensure_persistable(record)?;
        self.mutate(|file| {
            if file.records.get(&record.id) == Some(record) {
                return false;
            }
            file.records.insert(record.id.clone(), record.clone());
            true
        })
    }

    fn list_all(&self) -> Result<Vec<GeneratedImage>, StudioError> {
        let mut records: Vec<GeneratedImage> = self.read()?.records.into_values().collect();
        records.sort_by(recent_first);
        Ok(records)
    }

    fn delete_by_id(&mut self, id: &str) -> Result<(), StudioError> {
        self.mutate(|file| file.records.remove(id).is_some())
    }

    fn clear(&mut self) -> Result<(), StudioError> {
        self.mutate(|file| {
            if file.records.is_empty() {
                return false;
            }
            file.records.clear();
            true
        })
    }

    fn begin_exclusive(&mut self) -> Result<(), StudioError> {
        if self.held.is_none() {
            self.held = Some(self.lock()?);
        }
        Ok(())
    }

    fn end_exclusive(&mut self) {
        self.held = None;
    }

    fn get(&self, id: &str) -> Result<Option<GeneratedImage>, StudioError> {
        Ok(self.read()?.records.remove(id))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::super::test_support::succeeded;
    use super::*;

    fn ids(records: &[GeneratedImage]) -> Vec<&str> {
        records.iter().map(|record| record.id.as_str()).collect()
    }

    #[test]
    fn open_creates_versioned_file_and_is_idempotent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("history.json");
        let mut store = JsonHistoryStore::open(&path)?;
        store.put(&succeeded("a", 1))?;

        let reopened = JsonHistoryStore::open(&path)?;
        assert_eq!(ids(&reopened.list_all()?), vec!["a"]);

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["schema_version"], HISTORY_SCHEMA_VERSION);
        assert_eq!(raw["records"]["a"]["status"], "succeeded");
        Ok(())
    }

    #[test]
    fn put_then_delete_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = JsonHistoryStore::open(temp.path().join("history.json"))?;
        let record = succeeded("r1", 42);
        store.put(&record)?;
        assert_eq!(store.list_all()?, vec![record.clone()]);
        assert_eq!(store.get("r1")?, Some(record));

        store.delete_by_id("r1")?;
        assert!(store.list_all()?.is_empty());
        store.delete_by_id("r1")?;
        Ok(())
    }

    #[test]
    fn put_with_existing_id_overwrites() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = JsonHistoryStore::open(temp.path().join("history.json"))?;
        store.put(&succeeded("same", 1))?;
        let mut newer = succeeded("same", 5);
        newer.url = "data:image/png;base64,AAAA".to_string();
        store.put(&newer)?;
        assert_eq!(store.list_all()?, vec![newer]);
        Ok(())
    }

    #[test]
    fn listing_is_newest_first_regardless_of_insert_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = JsonHistoryStore::open(temp.path().join("history.json"))?;
        store.put(&succeeded("t2", 200))?;
        store.put(&succeeded("t1", 100))?;
        store.put(&succeeded("t3", 300))?;
        assert_eq!(ids(&store.list_all()?), vec!["t3", "t2", "t1"]);
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn listing_is_strictly_newest_first_for_any_insert_order(
            order in Just((0..12i64).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let temp = tempfile::tempdir().map_err(|err| TestCaseError::fail(err.to_string()))?;
            let mut store = JsonHistoryStore::open(temp.path().join("history.json"))
                .map_err(|err| TestCaseError::fail(err.to_string()))?;
            for slot in &order {
                store
                    .put(&succeeded(&format!("r{slot}"), slot * 1_000))
                    .map_err(|err| TestCaseError::fail(err.to_string()))?;
            }
            let listed = store
                .list_all()
                .map_err(|err| TestCaseError::fail(err.to_string()))?;
            prop_assert_eq!(listed.len(), order.len());
            for pair in listed.windows(2) {
                prop_assert!(pair[0].timestamp > pair[1].timestamp);
            }
        }
    }

    #[test]
    fn clear_twice_leaves_store_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = JsonHistoryStore::open(temp.path().join("history.json"))?;
        store.put(&succeeded("a", 1))?;
        store.clear()?;
        assert!(store.list_all()?.is_empty());
        store.clear()?;
        assert!(store.list_all()?.is_empty());
        Ok(())
    }

    #[test]
    fn reads_reflect_other_handles() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let mut store_a = JsonHistoryStore::open(&path)?;
        let mut store_b = JsonHistoryStore::open(&path)?;

        store_a.put(&succeeded("a", 1))?;
        store_b.put(&succeeded("b", 2))?;
        assert_eq!(ids(&store_a.list_all()?), vec!["b", "a"]);

        store_a.delete_by_id("b")?;
        assert_eq!(ids(&store_b.list_all()?), vec!["a"]);
        Ok(())
    }

    #[test]
    fn concurrent_handles_keep_every_put() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        JsonHistoryStore::open(&path)?;

        std::thread::scope(|scope| -> anyhow::Result<()> {
            let writers: Vec<_> = (0..4)
                .map(|writer| {
                    let path = path.clone();
                    scope.spawn(move || -> Result<(), StudioError> {
                        let mut store = JsonHistoryStore::open(&path)?;
                        for n in 0..25 {
                            store.put(&succeeded(&format!("w{writer}-{n:02}"), n))?;
                        }
                        Ok(())
                    })
                })
                .collect();
            for writer in writers {
                writer
                    .join()
                    .map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
            }
            Ok(())
        })?;

        let store = JsonHistoryStore::open(&path)?;
        assert_eq!(store.list_all()?.len(), 100);
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "history.json" && name != "history.json.lock")
            .collect();
        assert!(leftovers.is_empty(), "stray staging files: {leftovers:?}");
        Ok(())
    }

    #[test]
    fn exclusive_section_blocks_other_writers_until_released() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let mut holder = JsonHistoryStore::open(&path)?;
        holder.begin_exclusive()?;
        holder.put(&succeeded("held", 1))?;

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let other_path = path.clone();
        let writer = std::thread::spawn(move || -> Result<(), StudioError> {
            let mut other = JsonHistoryStore::open(&other_path)?;
            other.put(&succeeded("waiting", 2))?;
            let _ = done_tx.send(());
            Ok(())
        });

        assert!(done_rx
            .recv_timeout(std::time::Duration::from_millis(200))
            .is_err());
        assert_eq!(ids(&holder.list_all()?), vec!["held"]);

        holder.end_exclusive();
        writer
            .join()
            .map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
        assert_eq!(ids(&holder.list_all()?), vec!["waiting", "held"]);
        Ok(())
    }

    #[test]
    fn rejects_non_succeeded_records() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = JsonHistoryStore::open(temp.path().join("history.json"))?;
        let mut failed = succeeded("x", 1);
        failed.status = crate::modes::ItemStatus::Failed;
        assert!(matches!(store.put(&failed), Err(StudioError::Storage(_))));
        assert!(store.list_all()?.is_empty());
        Ok(())
    }

    #[test]
    fn open_reports_unavailable_for_corrupt_or_future_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let corrupt = temp.path().join("corrupt.json");
        std::fs::write(&corrupt, "{not json")?;
        assert!(matches!(
            JsonHistoryStore::open(&corrupt),
            Err(StudioError::StorageUnavailable(_))
        ));

        let future = temp.path().join("future.json");
        std::fs::write(&future, r#"{"schema_version": 99, "records": {}}"#)?;
        assert!(matches!(
            JsonHistoryStore::open(&future),
            Err(StudioError::StorageUnavailable(_))
        ));
        Ok(())
    }

    #[test]
    fn operations_fail_with_storage_error_when_file_breaks() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let mut store = JsonHistoryStore::open(&path)?;
        std::fs::write(&path, "[broken")?;
        assert!(matches!(store.list_all(), Err(StudioError::Storage(_))));
        assert!(matches!(
            store.put(&succeeded("a", 1)),
            Err(StudioError::Storage(_))
        ));
        Ok(())
    }
}
