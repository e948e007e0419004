use effects::{RestoreVars, SpellId};
use parking_lot::MutexGuard;
use persistence::{LoadedRecords, RestorableEffectRecord, RECORD_VERSION};
use rusqlite::{params, Connection, Row};

use crate::error::EffectDbError;

/// Repository for persisted effect records.
pub struct EffectRecordRepo<'a> {
    conn: MutexGuard<'a, Connection>,
}

struct RawRecord {
    owner: String,
    key: u32,
    spell_id: u32,
    line: String,
    remaining_ms: u32,
    vars: String,
    version: u32,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner: row.get(0)?,
            key: row.get(1)?,
            spell_id: row.get(2)?,
            line: row.get(3)?,
            remaining_ms: row.get(4)?,
            vars: row.get(5)?,
            version: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<RestorableEffectRecord, EffectDbError> {
        if self.version != RECORD_VERSION {
            return Err(EffectDbError::VersionMismatch {
                owner: self.owner,
                key: self.key,
                expected: RECORD_VERSION,
                found: self.version,
            });
        }
        let vars: RestoreVars = serde_json::from_str(&self.vars).map_err(|e| EffectDbError::CorruptVars {
            owner: self.owner.clone(),
            key: self.key,
            message: e.to_string(),
        })?;
        Ok(RestorableEffectRecord {
            key: self.key,
            spell_id: SpellId(self.spell_id),
            line: self.line,
            remaining_ms: self.remaining_ms,
            vars,
        })
    }
}

impl<'a> EffectRecordRepo<'a> {
    pub(crate) fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    /// Insert or replace one record of `owner`.
    pub fn save(&self, owner: &str, record: &RestorableEffectRecord) -> Result<(), EffectDbError> {
        let vars = serde_json::to_string(&record.vars).map_err(|e| EffectDbError::CorruptVars {
            owner: owner.to_string(),
            key: record.key,
            message: e.to_string(),
        })?;
        self.conn.execute(
            "INSERT OR REPLACE INTO effect_records
                (owner, record_key, spell_id, line, remaining_ms, vars, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                owner,
                record.key,
                record.spell_id.0,
                record.line,
                record.remaining_ms,
                vars,
                RECORD_VERSION
            ],
        )?;
        Ok(())
    }

    /// All records of `owner`, ordered by key. Rows of another record
    /// version or with corrupt vars are skipped and counted.
    pub fn load_for_owner(&self, owner: &str) -> Result<LoadedRecords, EffectDbError> {
        let mut stmt = self.conn.prepare(
            "SELECT owner, record_key, spell_id, line, remaining_ms, vars, version
             FROM effect_records WHERE owner = ?1 ORDER BY record_key",
        )?;
        let raw = stmt
            .query_map(params![owner], RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut loaded = LoadedRecords::default();
        for row in raw {
            match row.into_record() {
                Ok(record) => loaded.records.push(record),
                Err(err) => {
                    tracing::debug!(owner, error = %err, "skipping unreadable effect record");
                    loaded.unreadable += 1;
                }
            }
        }
        Ok(loaded)
    }

    /// Returns whether a record was deleted.
    pub fn delete(&self, owner: &str, key: u32) -> Result<bool, EffectDbError> {
        let rows = self.conn.execute(
            "DELETE FROM effect_records WHERE owner = ?1 AND record_key = ?2",
            params![owner, key],
        )?;
        Ok(rows > 0)
    }

    /// Delete every record of `owner`, returning how many there were.
    pub fn delete_for_owner(&self, owner: &str) -> Result<usize, EffectDbError> {
        let rows = self
            .conn
            .execute("DELETE FROM effect_records WHERE owner = ?1", params![owner])?;
        Ok(rows)
    }

    pub fn count(&self) -> Result<usize, EffectDbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM effect_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
