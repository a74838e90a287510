//! capreg-state: Persistence Layer for the Capability Registry
//!
//! This crate owns every byte the registry writes. It defines the record
//! schema shared by all backends and the storage traits the domain layer
//! (`capreg-core`) is written against.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: atomic writes, optimistic version checks, append-only logs.
//!
//! ## Key Components
//!
//! - `CapabilityRecord` / `EvaluationEvent` / `ChampionRecord`: the schema
//! - `RecordStore`: records, evaluations, retired ids
//! - `ChampionStore`: per-domain champion pointer with append-only history
//! - `FsRecordStore`: one JSON document per record on disk
//! - `SurrealHandle` / `SurrealRecordStore`: SurrealDB backend
//! - `fakes`: in-memory backends for tests

mod error;
pub mod fakes;
pub mod fs_store;
mod handle;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use fs_store::FsRecordStore;
pub use handle::{CloudConfig, SurrealHandle};
pub use schema::{
    CapabilityContent, CapabilityRecord, ChampionMetadata, ChampionRecord, EvaluationEvent,
    RecordId, RecordKind,
};
pub use storage_traits::{ChampionStore, RecordStore, RegistryBackend, StorageResult};
pub use surreal_store::SurrealRecordStore;

/// Result type for connection-level operations
pub type Result<T> = std::result::Result<T, StateError>;
