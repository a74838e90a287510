//! The registry API: create, read, update, delete and list capability
//! records over any [`RegistryBackend`].
//!
//! Lineage validation, soft-delete visibility and patch rules live here;
//! backends only guarantee atomic writes and the version check.

use std::sync::Arc;

use capreg_state::fakes::MemoryRecordStore;
use capreg_state::{CapabilityRecord, ChampionStore, RecordId, RecordStore, RegistryBackend};
use chrono::Utc;
use tracing::instrument;

use crate::domain::request::require_non_empty;
use crate::domain::{
    CapabilityPatch, DeleteMode, DeriveRequest, LineageViolation, NewCapability, RecordFilter,
    RegistryError, Result,
};
use crate::lineage::{self, Ancestors, LineagePlan};
use crate::metrics::METRICS;
use crate::obs;

/// Versioned capability records with lineage, history and champions.
///
/// Cheap to clone; clones share the backend.
pub struct CapabilityRegistry<B: ?Sized> {
    pub(crate) backend: Arc<B>,
}

impl<B: ?Sized> Clone for CapabilityRegistry<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl CapabilityRegistry<MemoryRecordStore> {
    /// A registry over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRecordStore::new()))
    }
}

impl<B> CapabilityRegistry<B>
where
    B: RegistryBackend + ?Sized,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Store a new record and return its id.
    ///
    /// The id is generated when not supplied. Parents, if any, are validated
    /// first and determine the generation.
    #[instrument(skip_all, fields(name = %new.name))]
    pub async fn create(&self, new: NewCapability) -> Result<RecordId> {
        require_non_empty("name", &new.name)?;
        require_non_empty("domain", &new.domain)?;
        require_non_empty("instruction", &new.content.instruction)?;

        let id = new.id.unwrap_or_else(RecordId::generate);
        self.ensure_unused(&id).await?;
        let plan = lineage::validate(&*self.backend, &id, &new.parent_ids).await?;

        let mut record = CapabilityRecord::new(
            id.clone(),
            new.kind,
            new.name,
            new.domain,
            new.content,
            new.parent_ids,
            plan.generation,
        );
        record.created_at = plan.child_created_at(record.created_at);
        record.updated_at = record.created_at;

        self.backend.insert(record).await?;
        METRICS.inc_records_created();
        obs::emit_record_created(id.as_str(), plan.generation, plan.parents.len());
        Ok(id)
    }

    /// Create a child of one or more parents. Kind, domain and name default
    /// to the first parent's.
    #[instrument(skip_all, fields(parents = request.parent_ids.len()))]
    pub async fn derive(&self, request: DeriveRequest) -> Result<RecordId> {
        let child = request
            .id
            .as_ref()
            .map_or_else(|| "(new)".to_string(), ToString::to_string);
        let first = request.parent_ids.first().ok_or_else(|| {
            RegistryError::InvalidRecord("derive needs at least one parent".to_string())
        })?;
        let template = self.backend.load(first).await?.ok_or_else(|| {
            RegistryError::InvalidLineage {
                child,
                violation: LineageViolation::UnknownParent(first.to_string()),
            }
        })?;

        self.create(NewCapability {
            id: request.id,
            kind: request.kind.unwrap_or(template.kind),
            name: request.name.unwrap_or(template.name),
            domain: request.domain.unwrap_or(template.domain),
            content: request.content,
            parent_ids: request.parent_ids,
        })
        .await
    }

    /// A live record. Soft-deleted records read as `NotFound`.
    pub async fn get(&self, id: &RecordId) -> Result<CapabilityRecord> {
        match self.backend.load(id).await? {
            Some(record) if !record.is_deleted() => Ok(record),
            _ => Err(RegistryError::NotFound(id.to_string())),
        }
    }

    /// Like [`get`](Self::get) but soft-deleted records are returned too.
    pub async fn get_including_deleted(&self, id: &RecordId) -> Result<CapabilityRecord> {
        self.backend
            .load(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Apply `patch` if the record is still at `expected_version`.
    ///
    /// A patch that changes nothing returns the current record untouched.
    #[instrument(skip_all, fields(id = %id, expected_version = expected_version))]
    pub async fn update(
        &self,
        id: &RecordId,
        expected_version: u64,
        patch: CapabilityPatch,
    ) -> Result<CapabilityRecord> {
        if patch.is_empty() {
            return Err(RegistryError::InvalidRecord("empty patch".to_string()));
        }
        let current = self.get(id).await?;
        if current.version != expected_version {
            return Err(conflict(id, expected_version, current.version));
        }

        let mut next = current.clone();
        if !patch.apply(&mut next)? {
            return Ok(current);
        }
        next.version = expected_version + 1;
        next.updated_at = Utc::now();

        let stored = self.swap(expected_version, next).await?;
        obs::emit_record_updated(id.as_str(), stored.version);
        Ok(stored)
    }

    /// Mark a record deleted. Returns every id deleted, target last.
    ///
    /// With [`DeleteMode::Restrict`] a live descendant blocks the delete.
    /// With [`DeleteMode::Cascade`] live descendants go first, highest
    /// generation first.
    ///
    /// Cascade is not atomic: records are deleted one at a time. A record
    /// that moved to a newer version meanwhile is re-read and deleted at
    /// that version; one already deleted by someone else is skipped. If the
    /// call still fails partway, the records deleted so far stay deleted and
    /// calling it again finishes the job.
    #[instrument(skip_all, fields(id = %id, mode = ?mode))]
    pub async fn soft_delete(&self, id: &RecordId, mode: DeleteMode) -> Result<Vec<RecordId>> {
        let target = self.get(id).await?;
        let snapshot = self.backend.scan().await?;
        let mut live: Vec<CapabilityRecord> = lineage::descendants_in(&snapshot, id)
            .into_iter()
            .filter(|r| !r.is_deleted())
            .collect();

        if !live.is_empty() && mode == DeleteMode::Restrict {
            return Err(RegistryError::HasActiveDescendants {
                id: id.to_string(),
                descendants: live.iter().map(|r| r.id.to_string()).collect(),
            });
        }

        live.sort_by(|a, b| b.generation.cmp(&a.generation));
        let mut deleted = Vec::with_capacity(live.len() + 1);
        for record in live {
            if let Some(id) = self.delete_latest(record).await? {
                deleted.push(id);
            }
        }
        match self.delete_latest(target).await? {
            Some(id) => deleted.push(id),
            None => return Err(RegistryError::NotFound(id.to_string())),
        }

        obs::emit_record_deleted(id.as_str(), deleted.len() - 1);
        Ok(deleted)
    }

    /// Physically remove a soft-deleted record. Its id stays retired.
    ///
    /// Refused while any stored record, deleted or not, names it as a parent,
    /// or while the champion history of its domain references it.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn purge(&self, id: &RecordId) -> Result<()> {
        let record = self.get_including_deleted(id).await?;
        if !record.is_deleted() {
            return Err(RegistryError::InvalidRecord(format!(
                "{id} must be soft-deleted before purge"
            )));
        }
        let children: Vec<String> = self
            .backend
            .scan()
            .await?
            .into_iter()
            .filter(|r| r.parent_ids.contains(id))
            .map(|r| r.id.to_string())
            .collect();
        if !children.is_empty() {
            return Err(RegistryError::HasActiveDescendants {
                id: id.to_string(),
                descendants: children,
            });
        }
        let champion_history = ChampionStore::history(&*self.backend, &record.domain).await?;
        if champion_history.iter().any(|c| &c.record_id == id) {
            return Err(RegistryError::InvalidRecord(format!(
                "{id} is in the champion history of {}",
                record.domain
            )));
        }

        self.backend.purge(id).await?;
        obs::emit_record_purged(id.as_str());
        Ok(())
    }

    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<CapabilityRecord>> {
        Ok(filter.apply(self.backend.scan().await?))
    }

    /// Check whether `child_id` may name `parent_ids` as parents.
    pub async fn record_lineage(
        &self,
        child_id: &RecordId,
        parent_ids: &[RecordId],
    ) -> Result<LineagePlan> {
        lineage::validate(&*self.backend, child_id, parent_ids).await
    }

    /// Lazy breadth-first walk over `id`'s ancestors.
    pub fn ancestors(&self, id: &RecordId, max_depth: Option<usize>) -> Ancestors<'_, B> {
        Ancestors::new(&*self.backend, id.clone(), max_depth)
    }

    /// Records descending from `id`, breadth-first, deleted ones included.
    pub async fn descendants(&self, id: &RecordId) -> Result<Vec<CapabilityRecord>> {
        self.get_including_deleted(id).await?;
        let snapshot = self.backend.scan().await?;
        Ok(lineage::descendants_in(&snapshot, id))
    }

    async fn ensure_unused(&self, id: &RecordId) -> Result<()> {
        if self.backend.is_retired(id).await? || self.backend.load(id).await?.is_some() {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }
        Ok(())
    }

    /// Soft-delete `record`, re-reading it once if its version moved.
    /// `None` when it is already deleted or gone.
    async fn delete_latest(&self, record: CapabilityRecord) -> Result<Option<RecordId>> {
        let id = record.id.clone();
        match self.mark_deleted(record).await {
            Ok(id) => Ok(Some(id)),
            Err(RegistryError::VersionConflict { .. }) => match self.backend.load(&id).await? {
                Some(fresh) if !fresh.is_deleted() => self.mark_deleted(fresh).await.map(Some),
                _ => Ok(None),
            },
            Err(err) => Err(err),
        }
    }

    async fn mark_deleted(&self, record: CapabilityRecord) -> Result<RecordId> {
        let now = Utc::now();
        let expected = record.version;
        let mut next = record;
        next.deleted_at = Some(now);
        next.updated_at = now;
        next.version = expected + 1;
        Ok(self.swap(expected, next).await?.id)
    }

    async fn swap(&self, expected: u64, next: CapabilityRecord) -> Result<CapabilityRecord> {
        match self.backend.compare_and_swap(expected, next).await {
            Ok(stored) => {
                METRICS.inc_updates();
                Ok(stored)
            }
            Err(err) => match RegistryError::from(err) {
                RegistryError::VersionConflict {
                    id,
                    expected,
                    actual,
                } => {
                    METRICS.inc_conflicts();
                    obs::emit_update_conflict(&id, expected, actual);
                    Err(RegistryError::VersionConflict {
                        id,
                        expected,
                        actual,
                    })
                }
                other => Err(other),
            },
        }
    }
}

fn conflict(id: &RecordId, expected: u64, actual: u64) -> RegistryError {
    METRICS.inc_conflicts();
    obs::emit_update_conflict(id.as_str(), expected, actual);
    RegistryError::VersionConflict {
        id: id.to_string(),
        expected,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capreg_state::CapabilityContent;

    fn rid(raw: &str) -> RecordId {
        RecordId::parse(raw).unwrap()
    }

    fn skill(id: &str) -> NewCapability {
        NewCapability::new(id, "support", CapabilityContent::new("Answer tickets"))
            .with_id(rid(id))
    }

    #[tokio::test]
    async fn create_rejects_blank_fields() {
        let registry = CapabilityRegistry::in_memory();
        let mut bad = skill("skill-1");
        bad.content.instruction = "   ".to_string();
        let err = registry.create(bad).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn create_generates_ids() {
        let registry = CapabilityRegistry::in_memory();
        let a = registry
            .create(NewCapability::new("a", "support", CapabilityContent::new("x")))
            .await
            .unwrap();
        let b = registry
            .create(NewCapability::new("b", "support", CapabilityContent::new("x")))
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn derive_inherits_from_first_parent() {
        let registry = CapabilityRegistry::in_memory();
        registry
            .create(skill("skill-1").with_kind(capreg_state::RecordKind::Agent))
            .await
            .unwrap();
        let child = registry
            .derive(DeriveRequest::mutation(
                rid("skill-1"),
                CapabilityContent::new("Answer tickets quickly"),
            ))
            .await
            .unwrap();

        let record = registry.get(&child).await.unwrap();
        assert_eq!(record.kind, capreg_state::RecordKind::Agent);
        assert_eq!(record.domain, "support");
        assert_eq!(record.name, "skill-1");
        assert_eq!(record.generation, 1);
        assert_eq!(record.parent_ids, vec![rid("skill-1")]);
    }

    #[tokio::test]
    async fn derive_without_parents_is_invalid() {
        let registry = CapabilityRegistry::in_memory();
        let err = registry
            .derive(DeriveRequest::crossover(vec![], CapabilityContent::new("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn noop_patch_keeps_version() {
        let registry = CapabilityRegistry::in_memory();
        let id = registry.create(skill("skill-1")).await.unwrap();
        let same = registry
            .update(&id, 1, CapabilityPatch::default().name("skill-1"))
            .await
            .unwrap();
        assert_eq!(same.version, 1);
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let registry = CapabilityRegistry::in_memory();
        let id = registry.create(skill("skill-1")).await.unwrap();
        let err = registry
            .update(&id, 1, CapabilityPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn purge_requires_soft_delete() {
        let registry = CapabilityRegistry::in_memory();
        let id = registry.create(skill("skill-1")).await.unwrap();
        let err = registry.purge(&id).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRecord(_)));

        registry.soft_delete(&id, DeleteMode::Restrict).await.unwrap();
        registry.purge(&id).await.unwrap();
        let err = registry.get_including_deleted(&id).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    /// Renames `victim` behind the caller's back on its first swap.
    struct RacingStore {
        inner: MemoryRecordStore,
        victim: RecordId,
        raced: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl RecordStore for RacingStore {
        async fn insert(&self, record: CapabilityRecord) -> capreg_state::StorageResult<()> {
            self.inner.insert(record).await
        }

        async fn load(
            &self,
            id: &RecordId,
        ) -> capreg_state::StorageResult<Option<CapabilityRecord>> {
            self.inner.load(id).await
        }

        async fn compare_and_swap(
            &self,
            expected_version: u64,
            record: CapabilityRecord,
        ) -> capreg_state::StorageResult<CapabilityRecord> {
            use std::sync::atomic::Ordering;
            if record.id == self.victim && !self.raced.swap(true, Ordering::SeqCst) {
                let mut renamed = self.inner.load(&record.id).await?.unwrap();
                renamed.name = "renamed elsewhere".to_string();
                renamed.version += 1;
                self.inner
                    .compare_and_swap(renamed.version - 1, renamed)
                    .await?;
            }
            self.inner.compare_and_swap(expected_version, record).await
        }

        async fn scan(&self) -> capreg_state::StorageResult<Vec<CapabilityRecord>> {
            self.inner.scan().await
        }

        async fn append_evaluation(
            &self,
            event: capreg_state::EvaluationEvent,
        ) -> capreg_state::StorageResult<capreg_state::EvaluationEvent> {
            self.inner.append_evaluation(event).await
        }

        async fn evaluations(
            &self,
            id: &RecordId,
        ) -> capreg_state::StorageResult<Vec<capreg_state::EvaluationEvent>> {
            self.inner.evaluations(id).await
        }

        async fn purge(&self, id: &RecordId) -> capreg_state::StorageResult<()> {
            self.inner.purge(id).await
        }

        async fn is_retired(&self, id: &RecordId) -> capreg_state::StorageResult<bool> {
            self.inner.is_retired(id).await
        }
    }

    #[async_trait::async_trait]
    impl ChampionStore for RacingStore {
        async fn promote(
            &self,
            domain: &str,
            record_id: &RecordId,
            metadata: capreg_state::ChampionMetadata,
        ) -> capreg_state::StorageResult<capreg_state::ChampionRecord> {
            self.inner.promote(domain, record_id, metadata).await
        }

        async fn rollback(
            &self,
            domain: &str,
        ) -> capreg_state::StorageResult<capreg_state::ChampionRecord> {
            self.inner.rollback(domain).await
        }

        async fn current(
            &self,
            domain: &str,
        ) -> capreg_state::StorageResult<Option<capreg_state::ChampionRecord>> {
            self.inner.current(domain).await
        }

        async fn history(
            &self,
            domain: &str,
        ) -> capreg_state::StorageResult<Vec<capreg_state::ChampionRecord>> {
            ChampionStore::history(&self.inner, domain).await
        }
    }

    #[tokio::test]
    async fn cascade_rereads_a_descendant_that_moved() {
        let registry = CapabilityRegistry::new(Arc::new(RacingStore {
            inner: MemoryRecordStore::new(),
            victim: rid("skill-2"),
            raced: std::sync::atomic::AtomicBool::new(false),
        }));
        registry.create(skill("skill-1")).await.unwrap();
        registry
            .create(skill("skill-2").with_parents(vec![rid("skill-1")]))
            .await
            .unwrap();

        let deleted = registry
            .soft_delete(&rid("skill-1"), DeleteMode::Cascade)
            .await
            .unwrap();
        assert_eq!(deleted, vec![rid("skill-2"), rid("skill-1")]);

        let child = registry.get_including_deleted(&rid("skill-2")).await.unwrap();
        assert!(child.is_deleted());
        assert_eq!(child.name, "renamed elsewhere");
        assert_eq!(child.version, 3);
        assert!(registry.get(&rid("skill-1")).await.is_err());
    }
}
