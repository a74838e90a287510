use std::sync::Arc;

use async_trait::async_trait;

use crate::schema::{CapabilityRecord, ChampionMetadata, ChampionRecord, EvaluationEvent, RecordId};
use crate::storage_traits::{ChampionStore, RecordStore, StorageResult};
use crate::SurrealHandle;

/// SurrealDB-backed implementation of the storage traits.
#[derive(Clone)]
pub struct SurrealRecordStore {
    handle: Arc<SurrealHandle>,
}

impl SurrealRecordStore {
    pub fn new(handle: Arc<SurrealHandle>) -> Self {
        Self { handle }
    }

    /// Connect according to the `SURREALDB_*` environment variables.
    pub async fn from_env() -> crate::Result<Self> {
        let handle = SurrealHandle::setup_from_env().await?;
        Ok(Self::new(Arc::new(handle)))
    }
}

#[async_trait]
impl RecordStore for SurrealRecordStore {
    async fn insert(&self, record: CapabilityRecord) -> StorageResult<()> {
        self.handle.record_insert(&record).await
    }

    async fn load(&self, id: &RecordId) -> StorageResult<Option<CapabilityRecord>> {
        self.handle.record_load(id).await
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: CapabilityRecord,
    ) -> StorageResult<CapabilityRecord> {
        self.handle.record_swap(expected_version, &record).await
    }

    async fn scan(&self) -> StorageResult<Vec<CapabilityRecord>> {
        self.handle.record_scan().await
    }

    async fn append_evaluation(&self, event: EvaluationEvent) -> StorageResult<EvaluationEvent> {
        self.handle.evaluation_append(&event).await
    }

    async fn evaluations(&self, id: &RecordId) -> StorageResult<Vec<EvaluationEvent>> {
        if self.handle.record_load(id).await?.is_none() {
            return Err(crate::StorageError::RecordNotFound { id: id.to_string() });
        }
        self.handle.evaluation_list(id).await
    }

    async fn purge(&self, id: &RecordId) -> StorageResult<()> {
        self.handle.record_purge(id).await
    }

    async fn is_retired(&self, id: &RecordId) -> StorageResult<bool> {
        self.handle.record_is_retired(id).await
    }
}

#[async_trait]
impl ChampionStore for SurrealRecordStore {
    async fn promote(
        &self,
        domain: &str,
        record_id: &RecordId,
        metadata: ChampionMetadata,
    ) -> StorageResult<ChampionRecord> {
        self.handle
            .champion_promote(domain, record_id, metadata)
            .await
    }

    async fn rollback(&self, domain: &str) -> StorageResult<ChampionRecord> {
        self.handle.champion_rollback(domain).await
    }

    async fn current(&self, domain: &str) -> StorageResult<Option<ChampionRecord>> {
        self.handle.champion_current(domain).await
    }

    async fn history(&self, domain: &str) -> StorageResult<Vec<ChampionRecord>> {
        self.handle.champion_history(domain).await
    }
}
