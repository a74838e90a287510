//! Evaluation history: append-only scored measurements per record.

use capreg_state::{EvaluationEvent, RecordId, RecordStore, RegistryBackend};
use tracing::instrument;

use crate::domain::{RegistryError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::registry::CapabilityRegistry;

/// Scores are normalized to `[0, 1]`.
pub fn validate_score(score: f64) -> Result<()> {
    if !score.is_finite() {
        return Err(RegistryError::InvalidScore {
            score,
            reason: "not a finite number".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&score) {
        return Err(RegistryError::InvalidScore {
            score,
            reason: "outside [0, 1]".to_string(),
        });
    }
    Ok(())
}

impl<B> CapabilityRegistry<B>
where
    B: RegistryBackend + ?Sized,
{
    /// Append an evaluation for a live record.
    ///
    /// The cached `performance_score` moves to `score` in the same write.
    /// The store assigns `seq` and `timestamp` when it appends.
    #[instrument(skip_all, fields(id = %id, score = score))]
    pub async fn record_evaluation(
        &self,
        id: &RecordId,
        score: f64,
        baseline: Option<f64>,
        note: Option<String>,
    ) -> Result<EvaluationEvent> {
        validate_score(score)?;
        if let Some(baseline) = baseline {
            validate_score(baseline)?;
        }
        self.get(id).await?;

        let event = EvaluationEvent::new(id.clone(), score)
            .with_baseline(baseline)
            .with_note(note);
        let event = self.backend.append_evaluation(event).await?;

        METRICS.inc_evaluations();
        obs::emit_evaluation_recorded(id.as_str(), event.score, event.seq);
        Ok(event)
    }

    /// Every evaluation of `id`, oldest first. Soft-deleted records keep
    /// their history.
    pub async fn history(&self, id: &RecordId) -> Result<Vec<EvaluationEvent>> {
        Ok(self.backend.evaluations(id).await?)
    }

    /// Highest score ever recorded for `id`.
    pub async fn best_score(&self, id: &RecordId) -> Result<Option<f64>> {
        Ok(self
            .history(id)
            .await?
            .iter()
            .map(|e| e.score)
            .max_by(f64::total_cmp))
    }
}
