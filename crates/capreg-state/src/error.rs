//! Error types for capreg-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a database backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Filesystem layout could not be prepared
    #[error("Storage root unusable: {0}")]
    Root(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("record not found: {id}")]
    RecordNotFound { id: String },

    #[error("record already exists: {id}")]
    RecordExists { id: String },

    #[error("record id has been retired and cannot be reused: {id}")]
    IdRetired { id: String },

    #[error("invalid record id: {id:?}")]
    InvalidId { id: String },

    #[error("version mismatch for {id}: expected {expected}, found {actual}")]
    VersionMismatch {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("no champion recorded for domain: {domain}")]
    ChampionNotFound { domain: String },

    #[error("no previous champion for domain: {domain}")]
    NoPreviousChampion { domain: String },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
