use rusqlite::Connection;

use crate::error::EffectDbError;

pub fn create_tables(conn: &Connection) -> Result<(), EffectDbError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS effect_records (
            owner        TEXT NOT NULL COLLATE NOCASE,
            record_key   INTEGER NOT NULL,
            spell_id     INTEGER NOT NULL,
            line         TEXT NOT NULL,
            remaining_ms INTEGER NOT NULL,
            vars         TEXT NOT NULL DEFAULT '[0,0,0,0,0,0]',
            version      INTEGER NOT NULL,
            saved_at     TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (owner, record_key)
        );
        ",
    )?;
    Ok(())
}
