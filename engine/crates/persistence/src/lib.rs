//! Session-boundary persistence of status effects.

pub mod bridge;
pub mod error;
pub mod record;
pub mod store;

pub use bridge::{PersistenceBridge, RestoreReport};
pub use error::PersistenceError;
pub use record::{RestorableEffectRecord, RECORD_VERSION};
pub use store::{EffectStore, FileEffectStore, LoadedRecords, MemoryEffectStore};
