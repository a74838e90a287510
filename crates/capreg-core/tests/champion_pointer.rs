//! Champion promotion and rollback through the registry API.

use capreg_core::{
    CapabilityContent, CapabilityPatch, CapabilityRegistry, DeleteMode, NewCapability, RecordId,
    RegistryError,
};

fn rid(raw: &str) -> RecordId {
    RecordId::parse(raw).unwrap()
}

async fn registry_with(ids: &[(&str, &str)]) -> CapabilityRegistry<capreg_state::fakes::MemoryRecordStore> {
    let registry = CapabilityRegistry::in_memory();
    for (id, domain) in ids {
        registry
            .create(
                NewCapability::new(*id, *domain, CapabilityContent::new("instructions"))
                    .with_id(rid(id)),
            )
            .await
            .unwrap();
    }
    registry
}

#[tokio::test]
async fn promote_records_score_and_sets_champion() {
    let registry = registry_with(&[("skill-1", "support")]).await;
    registry
        .record_evaluation(&rid("skill-1"), 0.8, None, None)
        .await
        .unwrap();

    let champion = registry
        .promote("support", &rid("skill-1"), "ci", Some("first".to_string()))
        .await
        .unwrap();
    assert_eq!(champion.seq, 1);
    assert_eq!(champion.metadata.score_at_promotion, Some(0.8));
    assert_eq!(champion.metadata.promoted_by, "ci");

    let current = registry.champion("support").await.unwrap().unwrap();
    assert_eq!(current.record_id, rid("skill-1"));
    assert!(registry.champion("sales").await.unwrap().is_none());
}

#[tokio::test]
async fn promote_promote_rollback_keeps_append_only_history() {
    let registry = registry_with(&[("skill-1", "support"), ("skill-2", "support")]).await;
    registry
        .promote("support", &rid("skill-1"), "ci", None)
        .await
        .unwrap();
    registry
        .promote("support", &rid("skill-2"), "ci", None)
        .await
        .unwrap();

    let rolled_back = registry.rollback_champion("support").await.unwrap();
    assert_eq!(rolled_back.record_id, rid("skill-1"));
    assert_eq!(rolled_back.seq, 3);

    let history = registry.champion_history("support").await.unwrap();
    let seqs: Vec<u64> = history.iter().map(|c| c.seq).collect();
    assert_eq!(seqs, vec![3, 2, 1]);
    assert_eq!(history[1].record_id, rid("skill-2"));
}

#[tokio::test]
async fn promotion_requires_matching_live_record() {
    let registry = registry_with(&[("skill-1", "support"), ("sales-1", "sales")]).await;

    let err = registry
        .promote("support", &rid("sales-1"), "ci", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPromotion(_)));

    let err = registry
        .promote("support", &rid("ghost"), "ci", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPromotion(_)));

    let err = registry
        .promote("support", &rid("skill-1"), " ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPromotion(_)));

    registry
        .soft_delete(&rid("skill-1"), DeleteMode::Restrict)
        .await
        .unwrap();
    let err = registry
        .promote("support", &rid("skill-1"), "ci", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPromotion(_)));
}

#[tokio::test]
async fn rollback_errors_are_mapped() {
    let registry = registry_with(&[("skill-1", "support")]).await;
    let err = registry.rollback_champion("support").await.unwrap_err();
    assert!(matches!(err, RegistryError::NoChampion(_)));

    registry
        .promote("support", &rid("skill-1"), "ci", None)
        .await
        .unwrap();
    let err = registry.rollback_champion("support").await.unwrap_err();
    assert!(matches!(err, RegistryError::NoPreviousChampion(_)));
}

#[tokio::test]
async fn evaluation_never_moves_the_champion() {
    let registry = registry_with(&[("skill-1", "support"), ("skill-2", "support")]).await;
    registry
        .promote("support", &rid("skill-1"), "ci", None)
        .await
        .unwrap();
    registry
        .record_evaluation(&rid("skill-2"), 1.0, None, None)
        .await
        .unwrap();

    let current = registry.champion("support").await.unwrap().unwrap();
    assert_eq!(current.record_id, rid("skill-1"));
}

#[tokio::test]
async fn rollback_refuses_a_previous_champion_that_was_deleted() {
    let registry = registry_with(&[("skill-1", "support"), ("skill-2", "support")]).await;
    registry
        .promote("support", &rid("skill-1"), "ci", None)
        .await
        .unwrap();
    registry
        .promote("support", &rid("skill-2"), "ci", None)
        .await
        .unwrap();
    registry
        .soft_delete(&rid("skill-1"), DeleteMode::Restrict)
        .await
        .unwrap();

    let err = registry.rollback_champion("support").await.unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPromotion(_)));

    let current = registry.champion("support").await.unwrap().unwrap();
    assert_eq!(current.record_id, rid("skill-2"));
    assert_eq!(registry.champion_history("support").await.unwrap().len(), 2);
}

#[tokio::test]
async fn purge_refuses_records_in_champion_history() {
    let registry = registry_with(&[("skill-1", "support"), ("skill-2", "support")]).await;
    registry
        .promote("support", &rid("skill-1"), "ci", None)
        .await
        .unwrap();
    registry
        .promote("support", &rid("skill-2"), "ci", None)
        .await
        .unwrap();
    registry
        .soft_delete(&rid("skill-1"), DeleteMode::Restrict)
        .await
        .unwrap();

    let err = registry.purge(&rid("skill-1")).await.unwrap_err();
    assert!(matches!(err, RegistryError::InvalidRecord(ref msg) if msg.contains("champion")));
    assert!(registry.get_including_deleted(&rid("skill-1")).await.is_ok());
}

#[tokio::test]
async fn rollback_refuses_a_previous_champion_that_changed_domain() {
    let registry = registry_with(&[("skill-1", "support"), ("skill-2", "support")]).await;
    registry
        .promote("support", &rid("skill-1"), "ci", None)
        .await
        .unwrap();
    registry
        .promote("support", &rid("skill-2"), "ci", None)
        .await
        .unwrap();
    registry
        .update(&rid("skill-1"), 1, CapabilityPatch::default().domain("sales"))
        .await
        .unwrap();

    let err = registry.rollback_champion("support").await.unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPromotion(_)));
    assert_eq!(
        registry.champion("support").await.unwrap().unwrap().record_id,
        rid("skill-2")
    );
}
