//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryRecordStore` satisfies both `RecordStore` and `ChampionStore`
//! without any external dependencies. Each call takes the mutex once, which
//! is what makes event append + score refresh atomic here.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::schema::{CapabilityRecord, ChampionMetadata, ChampionRecord, EvaluationEvent, RecordId};
use crate::storage_traits::*;

#[derive(Debug)]
struct Entry {
    record: CapabilityRecord,
    evaluations: Vec<EvaluationEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<RecordId, Entry>,
    retired: HashSet<RecordId>,
    champions: HashMap<String, Vec<ChampionRecord>>,
}

/// In-memory registry backend.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: &RecordId) -> StorageError {
    StorageError::RecordNotFound {
        id: id.to_string(),
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: CapabilityRecord) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.retired.contains(&record.id) {
            return Err(StorageError::IdRetired {
                id: record.id.to_string(),
            });
        }
        if inner.entries.contains_key(&record.id) {
            return Err(StorageError::RecordExists {
                id: record.id.to_string(),
            });
        }
        inner.entries.insert(
            record.id.clone(),
            Entry {
                record,
                evaluations: Vec::new(),
            },
        );
        Ok(())
    }

    async fn load(&self, id: &RecordId) -> StorageResult<Option<CapabilityRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.entries.get(id).map(|e| e.record.clone()))
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        mut record: CapabilityRecord,
    ) -> StorageResult<CapabilityRecord> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entries
            .get_mut(&record.id)
            .ok_or_else(|| not_found(&record.id))?;
        if entry.record.version != expected_version {
            return Err(StorageError::VersionMismatch {
                id: record.id.to_string(),
                expected: expected_version,
                actual: entry.record.version,
            });
        }
        record.inherit_evaluation_cache(&entry.record);
        entry.record = record.clone();
        Ok(record)
    }

    async fn scan(&self) -> StorageResult<Vec<CapabilityRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<CapabilityRecord> =
            inner.entries.values().map(|e| e.record.clone()).collect();
        sort_by_creation(&mut records);
        Ok(records)
    }

    async fn append_evaluation(&self, mut event: EvaluationEvent) -> StorageResult<EvaluationEvent> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entries
            .get_mut(&event.record_id)
            .ok_or_else(|| not_found(&event.record_id))?;
        event.seq = entry.evaluations.len() as u64 + 1;
        stamp_after(&mut event, entry.evaluations.last());
        entry.record.performance_score = Some(event.score);
        entry.record.optimized_at = Some(event.timestamp);
        entry.evaluations.push(event.clone());
        Ok(event)
    }

    async fn evaluations(&self, id: &RecordId) -> StorageResult<Vec<EvaluationEvent>> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.entries.get(id).ok_or_else(|| not_found(id))?;
        let mut events = entry.evaluations.clone();
        sort_evaluations(&mut events);
        Ok(events)
    }

    async fn purge(&self, id: &RecordId) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(id).ok_or_else(|| not_found(id))?;
        inner.retired.insert(id.clone());
        Ok(())
    }

    async fn is_retired(&self, id: &RecordId) -> StorageResult<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.retired.contains(id))
    }
}

#[async_trait]
impl ChampionStore for MemoryRecordStore {
    async fn promote(
        &self,
        domain: &str,
        record_id: &RecordId,
        metadata: ChampionMetadata,
    ) -> StorageResult<ChampionRecord> {
        let mut inner = self.inner.lock().unwrap();
        let history = inner.champions.entry(domain.to_string()).or_default();
        let record = ChampionRecord {
            domain: domain.to_string(),
            record_id: record_id.clone(),
            seq: history.len() as u64 + 1,
            metadata,
            created_at: Utc::now(),
        };
        history.push(record.clone());
        Ok(record)
    }

    async fn rollback(&self, domain: &str) -> StorageResult<ChampionRecord> {
        let mut inner = self.inner.lock().unwrap();
        let history = inner
            .champions
            .get_mut(domain)
            .ok_or_else(|| StorageError::ChampionNotFound {
                domain: domain.to_string(),
            })?;
        if history.len() < 2 {
            return Err(StorageError::NoPreviousChampion {
                domain: domain.to_string(),
            });
        }
        // Append-only: re-append the previous champion as a new entry.
        let previous = &history[history.len() - 2];
        let record = ChampionRecord {
            domain: domain.to_string(),
            record_id: previous.record_id.clone(),
            seq: history.len() as u64 + 1,
            metadata: previous.metadata.clone(),
            created_at: Utc::now(),
        };
        history.push(record.clone());
        Ok(record)
    }

    async fn current(&self, domain: &str) -> StorageResult<Option<ChampionRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.champions.get(domain).and_then(|h| h.last().cloned()))
    }

    async fn history(&self, domain: &str) -> StorageResult<Vec<ChampionRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut history = inner.champions.get(domain).cloned().unwrap_or_default();
        history.reverse(); // newest first
        Ok(history)
    }
}
