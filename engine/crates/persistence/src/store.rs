use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::PersistenceError;
use crate::record::{EffectFile, RestorableEffectRecord, RECORD_VERSION};

/// Records read back for one owner.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadedRecords {
    pub records: Vec<RestorableEffectRecord>,
    /// Stored entries that could not be decoded (other version, corrupt).
    /// They stay in the store until `delete_all`.
    pub unreadable: usize,
}

impl LoadedRecords {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.unreadable == 0
    }
}

impl From<Vec<RestorableEffectRecord>> for LoadedRecords {
    fn from(records: Vec<RestorableEffectRecord>) -> Self {
        Self { records, unreadable: 0 }
    }
}

/// Where restorable effects live between sessions.
///
/// Entries a store can no longer decode are skipped by `load_records` and
/// counted in [`LoadedRecords::unreadable`]; errors are reserved for failures
/// of the store itself.
pub trait EffectStore: Send + Sync {
    fn load_records(&self, owner: &str) -> Result<LoadedRecords, PersistenceError>;
    fn save_record(&self, owner: &str, record: &RestorableEffectRecord) -> Result<(), PersistenceError>;
    fn delete_record(&self, owner: &str, key: u32) -> Result<(), PersistenceError>;
    /// Drop every record of `owner`; returns how many were removed.
    fn delete_all(&self, owner: &str) -> Result<usize, PersistenceError>;
}

impl<S: EffectStore + ?Sized> EffectStore for Arc<S> {
    fn load_records(&self, owner: &str) -> Result<LoadedRecords, PersistenceError> {
        (**self).load_records(owner)
    }

    fn save_record(&self, owner: &str, record: &RestorableEffectRecord) -> Result<(), PersistenceError> {
        (**self).save_record(owner, record)
    }

    fn delete_record(&self, owner: &str, key: u32) -> Result<(), PersistenceError> {
        (**self).delete_record(owner, key)
    }

    fn delete_all(&self, owner: &str) -> Result<usize, PersistenceError> {
        (**self).delete_all(owner)
    }
}

/// Volatile store, for tests and servers without a database.
#[derive(Debug, Default)]
pub struct MemoryEffectStore {
    records: Mutex<BTreeMap<String, Vec<RestorableEffectRecord>>>,
}

impl MemoryEffectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EffectStore for MemoryEffectStore {
    fn load_records(&self, owner: &str) -> Result<LoadedRecords, PersistenceError> {
        Ok(self.records.lock().get(owner).cloned().unwrap_or_default().into())
    }

    fn save_record(&self, owner: &str, record: &RestorableEffectRecord) -> Result<(), PersistenceError> {
        let mut records = self.records.lock();
        let entry = records.entry(owner.to_string()).or_default();
        entry.retain(|r| r.key != record.key);
        entry.push(record.clone());
        Ok(())
    }

    fn delete_record(&self, owner: &str, key: u32) -> Result<(), PersistenceError> {
        if let Some(entry) = self.records.lock().get_mut(owner) {
            entry.retain(|r| r.key != key);
        }
        Ok(())
    }

    fn delete_all(&self, owner: &str) -> Result<usize, PersistenceError> {
        Ok(self.records.lock().remove(owner).map(|r| r.len()).unwrap_or(0))
    }
}

/// One bincode file per owner under a directory, replaced atomically.
pub struct FileEffectStore {
    dir: PathBuf,
    // serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileEffectStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, owner: &str) -> PathBuf {
        let encoded: String = owner.bytes().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{encoded}.effects.bin"))
    }

    /// The owner's file, or an empty one if missing. A file that cannot be
    /// decoded reads as empty with `unreadable` set; I/O failures are errors.
    fn read(&self, owner: &str) -> Result<(EffectFile, usize), PersistenceError> {
        let path = self.path_for(owner);
        if !path.exists() {
            return Ok((EffectFile::new(owner), 0));
        }
        let bytes = std::fs::read(&path)?;
        match Self::decode(owner, &bytes) {
            Ok(file) => Ok((file, 0)),
            Err(err) => {
                tracing::debug!(owner, path = %path.display(), error = %err, "skipping unreadable effect file");
                Ok((EffectFile::new(owner), 1))
            }
        }
    }

    fn decode(owner: &str, bytes: &[u8]) -> Result<EffectFile, PersistenceError> {
        let file: EffectFile = bincode::deserialize(bytes)?;
        if file.version != RECORD_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: RECORD_VERSION,
                got: file.version,
            });
        }
        if file.owner != owner {
            return Err(PersistenceError::Corrupt(format!(
                "file belongs to {}, not {}",
                file.owner, owner
            )));
        }
        Ok(file)
    }

    fn write(&self, file: &EffectFile) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&file.owner);
        if file.records.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            return Ok(());
        }

        let bytes = bincode::serialize(file)?;
        // Write to temp file first, then rename for atomicity
        let tmp_path = path.with_extension("bin.tmp");
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, &path)?;

        tracing::debug!(
            owner = %file.owner,
            records = file.records.len(),
            bytes = bytes.len(),
            path = %path.display(),
            "effect file saved"
        );
        Ok(())
    }
}

impl EffectStore for FileEffectStore {
    fn load_records(&self, owner: &str) -> Result<LoadedRecords, PersistenceError> {
        let (file, unreadable) = self.read(owner)?;
        Ok(LoadedRecords {
            records: file.records,
            unreadable,
        })
    }

    fn save_record(&self, owner: &str, record: &RestorableEffectRecord) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock();
        // an unreadable file is replaced
        let (mut file, _) = self.read(owner)?;
        file.records.retain(|r| r.key != record.key);
        file.records.push(record.clone());
        self.write(&file)
    }

    fn delete_record(&self, owner: &str, key: u32) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock();
        let (mut file, _) = self.read(owner)?;
        file.records.retain(|r| r.key != key);
        self.write(&file)
    }

    fn delete_all(&self, owner: &str) -> Result<usize, PersistenceError> {
        let _guard = self.write_lock.lock();
        let path = self.path_for(owner);
        if !path.exists() {
            return Ok(0);
        }
        let count = self
            .read(owner)
            .map(|(file, unreadable)| file.records.len() + unreadable)
            .unwrap_or(1);
        std::fs::remove_file(&path)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use effects::{RestoreVars, SpellId};

    fn record(key: u32, spell: u32) -> RestorableEffectRecord {
        RestorableEffectRecord {
            key,
            spell_id: SpellId(spell),
            line: "enhancements".to_string(),
            remaining_ms: 12_000,
            vars: RestoreVars([spell as i32, 10, 0, 0, 0, 0]),
        }
    }

    fn records_of(store: &dyn EffectStore, owner: &str) -> Vec<RestorableEffectRecord> {
        let loaded = store.load_records(owner).unwrap();
        assert_eq!(loaded.unreadable, 0);
        loaded.records
    }

    fn exercise(store: &dyn EffectStore) {
        assert!(store.load_records("aldric").unwrap().is_empty());

        store.save_record("aldric", &record(0, 1)).unwrap();
        store.save_record("aldric", &record(1, 2)).unwrap();
        store.save_record("brenna", &record(0, 3)).unwrap();
        assert_eq!(records_of(store, "aldric").len(), 2);

        // same key replaces
        store.save_record("aldric", &record(1, 4)).unwrap();
        let records = records_of(store, "aldric");
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.spell_id == SpellId(4)));

        store.delete_record("aldric", 0).unwrap();
        assert_eq!(records_of(store, "aldric"), vec![record(1, 4)]);

        assert_eq!(store.delete_all("aldric").unwrap(), 1);
        assert!(store.load_records("aldric").unwrap().is_empty());
        assert_eq!(store.delete_all("aldric").unwrap(), 0);
        assert_eq!(records_of(store, "brenna").len(), 1);
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryEffectStore::new());
    }

    #[test]
    fn file_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileEffectStore::new(dir.path()));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileEffectStore::new(dir.path())
            .save_record("Sir Aldric", &record(0, 1))
            .unwrap();

        let reopened = FileEffectStore::new(dir.path());
        assert_eq!(records_of(&reopened, "Sir Aldric"), vec![record(0, 1)]);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn file_of_other_version_is_skipped_until_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEffectStore::new(dir.path());
        let mut file = EffectFile::new("aldric");
        file.version = RECORD_VERSION + 1;
        file.records.push(record(0, 1));
        std::fs::write(store.path_for("aldric"), bincode::serialize(&file).unwrap()).unwrap();

        let loaded = store.load_records("aldric").unwrap();
        assert!(loaded.records.is_empty());
        assert_eq!(loaded.unreadable, 1);

        assert_eq!(store.delete_all("aldric").unwrap(), 1);
        assert!(store.load_records("aldric").unwrap().is_empty());
    }

    #[test]
    fn garbage_file_is_replaced_by_next_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEffectStore::new(dir.path());
        std::fs::write(store.path_for("aldric"), b"\x01").unwrap();
        assert_eq!(store.load_records("aldric").unwrap().unreadable, 1);

        store.save_record("aldric", &record(0, 1)).unwrap();
        assert_eq!(records_of(&store, "aldric"), vec![record(0, 1)]);
    }
}
