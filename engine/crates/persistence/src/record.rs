use effects::{RestoreVars, SpellId};
use serde::{Deserialize, Serialize};

pub const RECORD_VERSION: u32 = 1;

/// Snapshot of one restorable effect, taken at session end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorableEffectRecord {
    /// Position in the owner's save, unique per owner.
    pub key: u32,
    pub spell_id: SpellId,
    /// Spell line the spell belonged to when saved.
    pub line: String,
    pub remaining_ms: u32,
    pub vars: RestoreVars,
}

/// On-disk container for one owner's records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectFile {
    pub version: u32,
    pub owner: String,
    pub records: Vec<RestorableEffectRecord>,
}

impl EffectFile {
    pub fn new(owner: &str) -> Self {
        Self {
            version: RECORD_VERSION,
            owner: owner.to_string(),
            records: Vec::new(),
        }
    }
}
