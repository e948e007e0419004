//! SQLite-backed storage for restorable effect records.

pub mod db;
pub mod error;
pub mod records;
mod schema;

use persistence::{EffectStore, LoadedRecords, PersistenceError, RestorableEffectRecord};

pub use db::EffectDb;
pub use error::EffectDbError;
pub use records::EffectRecordRepo;

impl From<EffectDbError> for PersistenceError {
    fn from(e: EffectDbError) -> Self {
        match e {
            EffectDbError::VersionMismatch { expected, found, .. } => PersistenceError::VersionMismatch {
                expected,
                got: found,
            },
            EffectDbError::CorruptVars { .. } => PersistenceError::Corrupt(e.to_string()),
            other => PersistenceError::Storage(other.to_string()),
        }
    }
}

impl EffectStore for EffectDb {
    fn load_records(&self, owner: &str) -> Result<LoadedRecords, PersistenceError> {
        Ok(self.records().load_for_owner(owner)?)
    }

    fn save_record(&self, owner: &str, record: &RestorableEffectRecord) -> Result<(), PersistenceError> {
        Ok(self.records().save(owner, record)?)
    }

    fn delete_record(&self, owner: &str, key: u32) -> Result<(), PersistenceError> {
        self.records().delete(owner, key)?;
        Ok(())
    }

    fn delete_all(&self, owner: &str) -> Result<usize, PersistenceError> {
        Ok(self.records().delete_for_owner(owner)?)
    }
}
