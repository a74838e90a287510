//! Trait contract tests for RecordStore and ChampionStore.
//!
//! Every backend runs the same contract suite: the in-memory fake, the
//! filesystem store (in a temp dir) and SurrealDB in-memory. Any conforming
//! implementation must pass these.

use std::sync::Arc;

use chrono::{Duration, Utc};
use capreg_state::fakes::MemoryRecordStore;
use capreg_state::storage_traits::*;
use capreg_state::{
    CapabilityContent, CapabilityRecord, ChampionMetadata, EvaluationEvent, FsRecordStore,
    RecordId, RecordKind, StorageError, SurrealHandle, SurrealRecordStore,
};

fn id(raw: &str) -> RecordId {
    RecordId::parse(raw).unwrap()
}

fn sample(raw: &str) -> CapabilityRecord {
    CapabilityRecord::new(
        id(raw),
        RecordKind::Skill,
        format!("{raw}-name"),
        "support",
        CapabilityContent::new("Answer politely").with_rules(["cite the docs"]),
        vec![],
        0,
    )
}

fn metadata(by: &str) -> ChampionMetadata {
    ChampionMetadata {
        promoted_by: by.to_string(),
        note: None,
        score_at_promotion: None,
    }
}

// ===========================================================================
// RecordStore contracts
// ===========================================================================

async fn insert_then_load_round_trips(store: &dyn RegistryBackend) {
    let record = sample("skill-1");
    store.insert(record.clone()).await.unwrap();

    let loaded = store.load(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, record.id);
    assert_eq!(loaded.name, record.name);
    assert_eq!(loaded.content, record.content);
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.generation, 0);
    assert!(loaded.performance_score.is_none());
}

async fn insert_duplicate_fails(store: &dyn RegistryBackend) {
    store.insert(sample("skill-1")).await.unwrap();
    let err = store.insert(sample("skill-1")).await.unwrap_err();
    assert!(matches!(err, StorageError::RecordExists { .. }));
}

async fn load_missing_is_none(store: &dyn RegistryBackend) {
    assert!(store.load(&id("nope")).await.unwrap().is_none());
}

async fn swap_with_current_version_succeeds(store: &dyn RegistryBackend) {
    let record = sample("skill-1");
    store.insert(record.clone()).await.unwrap();

    let mut next = record.clone();
    next.name = "renamed".to_string();
    next.version = 2;
    let stored = store.compare_and_swap(1, next).await.unwrap();
    assert_eq!(stored.version, 2);

    let loaded = store.load(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "renamed");
    assert_eq!(loaded.version, 2);
}

async fn swap_with_stale_version_fails(store: &dyn RegistryBackend) {
    let record = sample("skill-1");
    store.insert(record.clone()).await.unwrap();

    let mut next = record.clone();
    next.version = 2;
    store.compare_and_swap(1, next.clone()).await.unwrap();

    let err = store.compare_and_swap(1, next).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::VersionMismatch {
            expected: 1,
            actual: 2,
            ..
        }
    ));
}

async fn swap_missing_record_fails(store: &dyn RegistryBackend) {
    let err = store.compare_and_swap(1, sample("ghost")).await.unwrap_err();
    assert!(matches!(err, StorageError::RecordNotFound { .. }));
}

async fn swap_never_overwrites_cached_score(store: &dyn RegistryBackend) {
    let record = sample("skill-1");
    store.insert(record.clone()).await.unwrap();
    store
        .append_evaluation(EvaluationEvent::new(record.id.clone(), 0.9))
        .await
        .unwrap();

    // Caller holds a stale copy without the score.
    let mut stale = record.clone();
    stale.name = "edited".to_string();
    stale.version = 2;
    assert!(stale.performance_score.is_none());
    store.compare_and_swap(1, stale).await.unwrap();

    let loaded = store.load(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded.performance_score, Some(0.9));
    assert_eq!(loaded.name, "edited");
}

async fn scan_orders_by_creation(store: &dyn RegistryBackend) {
    let base = Utc::now();
    let mut late = sample("a-late");
    late.created_at = base + Duration::seconds(10);
    let mut early = sample("z-early");
    early.created_at = base;
    let mut tie = sample("b-tie");
    tie.created_at = base + Duration::seconds(10);

    store.insert(late).await.unwrap();
    store.insert(early).await.unwrap();
    store.insert(tie).await.unwrap();

    let ids: Vec<String> = store
        .scan()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id.to_string())
        .collect();
    assert_eq!(ids, vec!["z-early", "a-late", "b-tie"]);
}

async fn evaluations_append_in_order_and_refresh_score(store: &dyn RegistryBackend) {
    let record = sample("skill-1");
    store.insert(record.clone()).await.unwrap();

    let first = store
        .append_evaluation(EvaluationEvent::new(record.id.clone(), 0.65))
        .await
        .unwrap();
    let second = store
        .append_evaluation(
            EvaluationEvent::new(record.id.clone(), 0.79)
                .with_baseline(Some(0.65))
                .with_note(Some("prompt tweak".to_string())),
        )
        .await
        .unwrap();
    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);

    let events = store.evaluations(&record.id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].score, 0.65);
    assert_eq!(events[1].score, 0.79);
    assert_eq!(events[1].baseline_score, Some(0.65));
    assert_eq!(events[1].note.as_deref(), Some("prompt tweak"));

    let loaded = store.load(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded.performance_score, Some(0.79));
    assert!(loaded.optimized_at.is_some());
}

async fn store_assigns_evaluation_timestamps_in_append_order(store: &dyn RegistryBackend) {
    let record = sample("skill-1");
    store.insert(record.clone()).await.unwrap();

    let first = store
        .append_evaluation(EvaluationEvent::new(record.id.clone(), 0.3))
        .await
        .unwrap();

    // A caller-side timestamp from before the first append is not kept.
    let mut backdated = EvaluationEvent::new(record.id.clone(), 0.6);
    backdated.timestamp = first.timestamp - Duration::hours(1);
    let second = store.append_evaluation(backdated).await.unwrap();
    assert!(second.timestamp >= first.timestamp);

    let events = store.evaluations(&record.id).await.unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
    let loaded = store.load(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded.performance_score, Some(events[1].score));
}

async fn evaluation_for_missing_record_fails(store: &dyn RegistryBackend) {
    let err = store
        .append_evaluation(EvaluationEvent::new(id("ghost"), 0.5))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RecordNotFound { .. }));
}

async fn purge_removes_and_retires(store: &dyn RegistryBackend) {
    let record = sample("skill-1");
    store.insert(record.clone()).await.unwrap();
    store
        .append_evaluation(EvaluationEvent::new(record.id.clone(), 0.4))
        .await
        .unwrap();

    store.purge(&record.id).await.unwrap();
    assert!(store.load(&record.id).await.unwrap().is_none());
    assert!(store.is_retired(&record.id).await.unwrap());

    let err = store.insert(sample("skill-1")).await.unwrap_err();
    assert!(matches!(err, StorageError::IdRetired { .. }));
}

async fn purge_missing_fails(store: &dyn RegistryBackend) {
    let err = store.purge(&id("ghost")).await.unwrap_err();
    assert!(matches!(err, StorageError::RecordNotFound { .. }));
    assert!(!store.is_retired(&id("ghost")).await.unwrap());
}

// ===========================================================================
// ChampionStore contracts
// ===========================================================================

async fn champion_promote_sets_current(store: &dyn RegistryBackend) {
    let promoted = store
        .promote("support", &id("skill-1"), metadata("ci"))
        .await
        .unwrap();
    assert_eq!(promoted.seq, 1);

    let current = store.current("support").await.unwrap().unwrap();
    assert_eq!(current.record_id, id("skill-1"));
    assert!(store.current("sales").await.unwrap().is_none());
}

async fn champion_rollback_is_append_only(store: &dyn RegistryBackend) {
    store
        .promote("support", &id("skill-1"), metadata("ci"))
        .await
        .unwrap();
    store
        .promote("support", &id("skill-2"), metadata("ci"))
        .await
        .unwrap();

    let rolled = store.rollback("support").await.unwrap();
    assert_eq!(rolled.record_id, id("skill-1"));
    assert_eq!(rolled.seq, 3);

    let history = store.history("support").await.unwrap();
    let ids: Vec<String> = history.iter().map(|c| c.record_id.to_string()).collect();
    assert_eq!(ids, vec!["skill-1", "skill-2", "skill-1"]);
    assert_eq!(history[0].seq, 3);
    assert_eq!(
        store.current("support").await.unwrap().unwrap().record_id,
        id("skill-1")
    );
}

async fn champion_rollback_without_history_fails(store: &dyn RegistryBackend) {
    let err = store.rollback("support").await.unwrap_err();
    assert!(matches!(err, StorageError::ChampionNotFound { .. }));

    store
        .promote("support", &id("skill-1"), metadata("ci"))
        .await
        .unwrap();
    let err = store.rollback("support").await.unwrap_err();
    assert!(matches!(err, StorageError::NoPreviousChampion { .. }));
}

// ===========================================================================
// Backend matrix
// ===========================================================================

macro_rules! contract_suite {
    ($backend:ident, $make:expr) => {
        mod $backend {
            use super::*;

            macro_rules! contract {
                ($name:ident) => {
                    #[tokio::test]
                    async fn $name() {
                        let (_guard, store) = $make.await;
                        super::$name(store.as_ref()).await;
                    }
                };
            }

            contract!(insert_then_load_round_trips);
            contract!(insert_duplicate_fails);
            contract!(load_missing_is_none);
            contract!(swap_with_current_version_succeeds);
            contract!(swap_with_stale_version_fails);
            contract!(swap_missing_record_fails);
            contract!(swap_never_overwrites_cached_score);
            contract!(scan_orders_by_creation);
            contract!(evaluations_append_in_order_and_refresh_score);
            contract!(store_assigns_evaluation_timestamps_in_append_order);
            contract!(evaluation_for_missing_record_fails);
            contract!(purge_removes_and_retires);
            contract!(purge_missing_fails);
            contract!(champion_promote_sets_current);
            contract!(champion_rollback_is_append_only);
            contract!(champion_rollback_without_history_fails);
        }
    };
}

async fn memory_backend() -> ((), Arc<dyn RegistryBackend>) {
    ((), Arc::new(MemoryRecordStore::new()))
}

async fn fs_backend() -> (tempfile::TempDir, Arc<dyn RegistryBackend>) {
    let dir = tempfile::tempdir().unwrap();
    let store = FsRecordStore::open(dir.path()).unwrap();
    (dir, Arc::new(store))
}

async fn surreal_backend() -> ((), Arc<dyn RegistryBackend>) {
    let handle = SurrealHandle::setup_db().await.unwrap();
    ((), Arc::new(SurrealRecordStore::new(Arc::new(handle))))
}

contract_suite!(memory, memory_backend());
contract_suite!(filesystem, fs_backend());
contract_suite!(surreal, surreal_backend());
