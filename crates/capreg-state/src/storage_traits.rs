//! Storage trait definitions for capreg
//!
//! These traits define the persistence abstractions:
//! - `RecordStore`: capability records, their evaluation log, retired ids
//! - `ChampionStore`: per-domain champion pointer (promote/rollback)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module. Validation of lineage, scores and
//! soft-delete visibility lives one layer up; stores only guarantee
//! atomicity and the version check.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::schema::{CapabilityRecord, ChampionMetadata, ChampionRecord, EvaluationEvent, RecordId};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// RecordStore: capability records and evaluation log
// ---------------------------------------------------------------------------

/// Record persistence.
///
/// Guarantees:
/// - `insert` never overwrites: existing ids (live or soft-deleted) fail with
///   `RecordExists`, purged ids fail with `IdRetired`.
/// - `compare_and_swap` writes only when the stored version equals
///   `expected_version`; otherwise `VersionMismatch`. The store-owned
///   evaluation cache (`performance_score`, `optimized_at`) is kept from the
///   stored record, never taken from the caller.
/// - `append_evaluation` appends the event and refreshes the cached score in
///   one atomic step: no reader sees one without the other. The store assigns
///   `seq` and `timestamp` inside that step, so timestamp order matches
///   append order and the cached score is always the latest event's.
/// - `scan` returns every stored record, soft-deleted ones included, ordered
///   by `created_at` ascending with ties broken by id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record.
    async fn insert(&self, record: CapabilityRecord) -> StorageResult<()>;

    /// Load a record, soft-deleted or not. `None` when never created or purged.
    async fn load(&self, id: &RecordId) -> StorageResult<Option<CapabilityRecord>>;

    /// Replace a record if the stored version matches. Returns what was stored.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: CapabilityRecord,
    ) -> StorageResult<CapabilityRecord>;

    /// All records in creation order.
    async fn scan(&self) -> StorageResult<Vec<CapabilityRecord>>;

    /// Append an evaluation and update the cached score. The stored event
    /// (with its assigned `seq` and `timestamp`) is returned.
    async fn append_evaluation(&self, event: EvaluationEvent) -> StorageResult<EvaluationEvent>;

    /// Evaluations for a record, ordered by timestamp then seq.
    async fn evaluations(&self, id: &RecordId) -> StorageResult<Vec<EvaluationEvent>>;

    /// Physically remove a record and its evaluations; the id is retired.
    async fn purge(&self, id: &RecordId) -> StorageResult<()>;

    /// Whether an id was purged and can never be issued again.
    async fn is_retired(&self, id: &RecordId) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// ChampionStore: per-domain champion pointer
// ---------------------------------------------------------------------------

/// Champion registry.
///
/// Semantics:
/// - `promote` appends a new entry that becomes the current champion.
/// - `rollback` re-appends the previous entry, preserving the full audit
///   trail (history is append-only).
/// - `history` returns the chain newest first.
#[async_trait]
pub trait ChampionStore: Send + Sync {
    /// Make `record_id` the champion of `domain`.
    async fn promote(
        &self,
        domain: &str,
        record_id: &RecordId,
        metadata: ChampionMetadata,
    ) -> StorageResult<ChampionRecord>;

    /// Revert to the previous champion. Fails if there is none.
    async fn rollback(&self, domain: &str) -> StorageResult<ChampionRecord>;

    /// The current champion for a domain, if any.
    async fn current(&self, domain: &str) -> StorageResult<Option<ChampionRecord>>;

    /// Full champion history for a domain (newest first).
    async fn history(&self, domain: &str) -> StorageResult<Vec<ChampionRecord>>;
}

/// A complete backend: records plus champions.
pub trait RegistryBackend: RecordStore + ChampionStore {}

impl<T> RegistryBackend for T where T: RecordStore + ChampionStore {}

/// Ordering used by `scan` in every backend.
pub(crate) fn sort_by_creation(records: &mut [CapabilityRecord]) {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Stamp `event` with the current time, never earlier than `latest`.
pub(crate) fn stamp_after(event: &mut EvaluationEvent, latest: Option<&EvaluationEvent>) {
    let now = Utc::now();
    event.timestamp = match latest {
        Some(last) if last.timestamp > now => last.timestamp,
        _ => now,
    };
}

/// Ordering used by `evaluations` in every backend.
pub(crate) fn sort_evaluations(events: &mut [EvaluationEvent]) {
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));
}
