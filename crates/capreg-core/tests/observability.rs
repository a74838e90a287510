//! Structured tracing events emitted by registry operations.

use capreg_core::obs::{
    emit_champion_promoted, emit_evaluation_recorded, emit_record_created, emit_update_conflict,
};
use capreg_core::{CapabilityContent, CapabilityPatch, CapabilityRegistry, NewCapability, RecordId};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn emit_record_created_logs_generation() {
    emit_record_created("skill-1", 2, 1);
    assert!(logs_contain("record.created"));
    assert!(logs_contain("generation=2"));
}

#[traced_test]
#[test]
fn emit_evaluation_recorded_logs_score_and_seq() {
    emit_evaluation_recorded("skill-1", 0.79, 2);
    assert!(logs_contain("evaluation.recorded"));
    assert!(logs_contain("seq=2"));
}

#[traced_test]
#[test]
fn emit_update_conflict_logs_versions() {
    emit_update_conflict("skill-1", 3, 4);
    assert!(logs_contain("update.conflict"));
    assert!(logs_contain("expected=3"));
    assert!(logs_contain("actual=4"));
}

#[traced_test]
#[test]
fn emit_champion_promoted_logs_domain() {
    emit_champion_promoted("support", "skill-1", 1);
    assert!(logs_contain("champion.promoted"));
    assert!(logs_contain("support"));
}

#[tokio::test]
#[traced_test]
async fn registry_operations_emit_events() {
    let registry = CapabilityRegistry::in_memory();
    let id = RecordId::parse("skill-1").unwrap();
    registry
        .create(
            NewCapability::new("triage", "support", CapabilityContent::new("Sort"))
                .with_id(id.clone()),
        )
        .await
        .unwrap();
    registry
        .update(&id, 1, CapabilityPatch::default().name("triage-v2"))
        .await
        .unwrap();
    registry
        .update(&id, 1, CapabilityPatch::default().name("stale"))
        .await
        .unwrap_err();
    registry.record_evaluation(&id, 0.5, None, None).await.unwrap();

    assert!(logs_contain("record.created"));
    assert!(logs_contain("record.updated"));
    assert!(logs_contain("update.conflict"));
    assert!(logs_contain("evaluation.recorded"));
}
