use thiserror::Error;

#[derive(Debug, Error)]
pub enum EffectDbError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to create database directory: {0}")]
    Directory(#[from] std::io::Error),

    #[error("corrupt restore vars for {owner}/{key}: {message}")]
    CorruptVars {
        owner: String,
        key: u32,
        message: String,
    },

    #[error("record {owner}/{key} has version {found}, expected {expected}")]
    VersionMismatch {
        owner: String,
        key: u32,
        expected: u32,
        found: u32,
    },
}
