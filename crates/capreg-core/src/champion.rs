//! Per-domain champion pointer.
//!
//! The champion only moves through an explicit promote or rollback; each
//! move appends to the domain's history.

use capreg_state::{CapabilityRecord, ChampionMetadata, ChampionRecord, ChampionStore, RecordId, RegistryBackend};
use tracing::instrument;

use crate::domain::{RegistryError, Result};
use crate::obs;
use crate::registry::CapabilityRegistry;

impl<B> CapabilityRegistry<B>
where
    B: RegistryBackend + ?Sized,
{
    /// Make `id` the champion of `domain`. The record must be live and
    /// belong to that domain.
    #[instrument(skip_all, fields(domain = %domain, id = %id))]
    pub async fn promote(
        &self,
        domain: &str,
        id: &RecordId,
        promoted_by: &str,
        note: Option<String>,
    ) -> Result<ChampionRecord> {
        if promoted_by.trim().is_empty() {
            return Err(RegistryError::InvalidPromotion(
                "promoted_by must not be empty".to_string(),
            ));
        }
        let record = self.eligible_champion(domain, id).await?;
        let metadata = ChampionMetadata {
            promoted_by: promoted_by.to_string(),
            note,
            score_at_promotion: record.performance_score,
        };
        let champion = self.backend.promote(domain, id, metadata).await?;
        obs::emit_champion_promoted(domain, id.as_str(), champion.seq);
        Ok(champion)
    }

    /// Re-appoint the previous champion of `domain` as a new history entry.
    ///
    /// The previous champion must still be a live record of `domain`.
    #[instrument(skip_all, fields(domain = %domain))]
    pub async fn rollback_champion(&self, domain: &str) -> Result<ChampionRecord> {
        let history = self.champion_history(domain).await?;
        if let Some(previous) = history.get(1) {
            self.eligible_champion(domain, &previous.record_id).await?;
        }
        let champion = self.backend.rollback(domain).await?;
        obs::emit_champion_rolled_back(domain, champion.record_id.as_str(), champion.seq);
        Ok(champion)
    }

    pub async fn champion(&self, domain: &str) -> Result<Option<ChampionRecord>> {
        Ok(self.backend.current(domain).await?)
    }

    /// Champion history for `domain`, newest first.
    pub async fn champion_history(&self, domain: &str) -> Result<Vec<ChampionRecord>> {
        Ok(ChampionStore::history(&*self.backend, domain).await?)
    }

    async fn eligible_champion(&self, domain: &str, id: &RecordId) -> Result<CapabilityRecord> {
        let record = match self.get(id).await {
            Ok(record) => record,
            Err(RegistryError::NotFound(_)) => {
                return Err(RegistryError::InvalidPromotion(format!(
                    "{id} is not a live record"
                )))
            }
            Err(err) => return Err(err),
        };
        if record.domain != domain {
            return Err(RegistryError::InvalidPromotion(format!(
                "{id} belongs to domain {}, not {domain}",
                record.domain
            )));
        }
        Ok(record)
    }
}
