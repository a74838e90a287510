//! Glue between the registry and an external optimization engine.
//!
//! The engine implements [`VariantSource`]: it proposes content variants
//! and scores records. [`evolve`] stores every proposal as a new derived
//! record, logs each score and keeps track of the best record seen. The
//! search strategy itself stays with the engine.

use std::collections::HashSet;

use async_trait::async_trait;
use capreg_state::{CapabilityContent, CapabilityRecord, ChampionRecord, RecordId, RegistryBackend};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::domain::{DeriveRequest, RegistryError};
use crate::metrics::METRICS;
use crate::registry::CapabilityRegistry;

/// A candidate child of the record being evolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedVariant {
    pub content: CapabilityContent,
    pub name: Option<String>,
    /// Additional parents for crossover; the evolved record is always first.
    pub co_parents: Vec<RecordId>,
}

impl ProposedVariant {
    pub fn mutation(content: CapabilityContent) -> Self {
        Self {
            content,
            name: None,
            co_parents: Vec::new(),
        }
    }
}

/// A score produced by the engine, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub note: Option<String>,
}

/// The external engine.
#[async_trait]
pub trait VariantSource: Send + Sync {
    async fn propose(&self, parent: &CapabilityRecord) -> anyhow::Result<Vec<ProposedVariant>>;

    async fn evaluate(&self, record: &CapabilityRecord) -> anyhow::Result<Evaluation>;
}

#[derive(Debug, thiserror::Error)]
pub enum EvolutionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("variant source failed: {0}")]
    Source(String),
}

fn source_error(err: anyhow::Error) -> EvolutionError {
    EvolutionError::Source(format!("{err:#}"))
}

#[derive(Debug, Clone)]
pub struct EvolveOptions {
    pub generations: u32,
    /// Proposals beyond this count are ignored.
    pub max_variants: usize,
    /// A variant replaces the best only when it beats it by more than this.
    pub min_improvement: f64,
    /// Promote the final best in its domain, attributed to this name.
    pub promote_as: Option<String>,
}

impl Default for EvolveOptions {
    fn default() -> Self {
        Self {
            generations: 3,
            max_variants: 4,
            min_improvement: 0.0,
            promote_as: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvolveReport {
    pub seed: RecordId,
    pub best: RecordId,
    pub best_score: f64,
    pub generations_run: u32,
    /// Every record created, in creation order.
    pub created: Vec<RecordId>,
    /// Proposals dropped because their content matched the parent or an
    /// earlier proposal of the same round.
    pub duplicates_skipped: usize,
    pub promoted: Option<ChampionRecord>,
}

/// Run `options.generations` rounds of propose, store, evaluate.
///
/// Each round proposes variants of the current best. The seed starts at the
/// highest score ever recorded for it, and is evaluated first if it has none. A round with no new variants ends the run.
#[instrument(skip_all, fields(seed = %seed, generations = options.generations))]
pub async fn evolve<B, S>(
    registry: &CapabilityRegistry<B>,
    source: &S,
    seed: &RecordId,
    options: EvolveOptions,
) -> Result<EvolveReport, EvolutionError>
where
    B: RegistryBackend + ?Sized,
    S: VariantSource + ?Sized,
{
    let mut best = registry.get(seed).await?;
    let mut best_score = match registry.best_score(&best.id).await? {
        Some(score) => score,
        None => {
            let eval = source.evaluate(&best).await.map_err(source_error)?;
            registry
                .record_evaluation(&best.id, eval.score, None, eval.note)
                .await?;
            eval.score
        }
    };

    let mut created = Vec::new();
    let mut duplicates_skipped = 0;
    let mut generations_run = 0;

    for round in 1..=options.generations {
        let proposals = source.propose(&best).await.map_err(source_error)?;
        let mut digests = HashSet::from([best.content_digest.clone()]);
        let mut round_best: Option<(CapabilityRecord, f64)> = None;
        let mut stored = 0usize;

        for proposal in proposals.into_iter().take(options.max_variants) {
            if !digests.insert(proposal.content.digest()) {
                duplicates_skipped += 1;
                continue;
            }

            let mut parents = vec![best.id.clone()];
            parents.extend(proposal.co_parents);
            let mut request = DeriveRequest::crossover(parents, proposal.content);
            request.name = proposal.name;
            let id = registry.derive(request).await?;
            created.push(id.clone());
            stored += 1;

            let child = registry.get(&id).await?;
            let eval = source.evaluate(&child).await.map_err(source_error)?;
            registry
                .record_evaluation(&id, eval.score, Some(best_score), eval.note)
                .await?;
            debug!(variant = %id, score = eval.score, round, "variant evaluated");

            if round_best.as_ref().map_or(true, |(_, s)| eval.score > *s) {
                round_best = Some((child, eval.score));
            }
        }

        if stored == 0 {
            break;
        }
        generations_run = round;

        if let Some((candidate, score)) = round_best {
            if score > best_score + options.min_improvement {
                info!(from = %best.id, to = %candidate.id, score, round, "new best variant");
                best = registry.get(&candidate.id).await?;
                best_score = score;
            }
        }
    }

    let promoted = match &options.promote_as {
        Some(by) => Some(
            registry
                .promote(
                    &best.domain,
                    &best.id,
                    by,
                    Some(format!("evolved from {seed}")),
                )
                .await?,
        ),
        None => None,
    };

    METRICS.flush();
    Ok(EvolveReport {
        seed: seed.clone(),
        best: best.id,
        best_score,
        generations_run,
        created,
        duplicates_skipped,
        promoted,
    })
}
