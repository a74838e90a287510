//! Structured observability hooks for registry lifecycle events.
//!
//! Each `emit_*` function logs one `info!` event per state change, keyed by
//! `event`. Record-scoped spans come from `#[instrument]` on the registry
//! operations themselves.
//!
//! Verbosity follows `RUST_LOG`; set `CAPREG_LOG_FORMAT=json` for JSON lines.

use tracing::info;

/// A record was stored for the first time.
pub fn emit_record_created(record_id: &str, generation: u32, parents: usize) {
    info!(
        event = "record.created",
        record_id = %record_id,
        generation = generation,
        parents = parents,
    );
}

pub fn emit_record_updated(record_id: &str, version: u64) {
    info!(event = "record.updated", record_id = %record_id, version = version);
}

/// `cascaded` counts descendants deleted along with the record.
pub fn emit_record_deleted(record_id: &str, cascaded: usize) {
    info!(event = "record.deleted", record_id = %record_id, cascaded = cascaded);
}

pub fn emit_record_purged(record_id: &str) {
    info!(event = "record.purged", record_id = %record_id);
}

pub fn emit_evaluation_recorded(record_id: &str, score: f64, seq: u64) {
    info!(
        event = "evaluation.recorded",
        record_id = %record_id,
        score = score,
        seq = seq,
    );
}

pub fn emit_champion_promoted(domain: &str, record_id: &str, seq: u64) {
    info!(
        event = "champion.promoted",
        domain = %domain,
        record_id = %record_id,
        seq = seq,
    );
}

pub fn emit_champion_rolled_back(domain: &str, record_id: &str, seq: u64) {
    info!(
        event = "champion.rolled_back",
        domain = %domain,
        record_id = %record_id,
        seq = seq,
    );
}

/// Lost an optimistic update race (warning level).
pub fn emit_update_conflict(record_id: &str, expected: u64, actual: u64) {
    tracing::warn!(
        event = "update.conflict",
        record_id = %record_id,
        expected = expected,
        actual = actual,
    );
}
