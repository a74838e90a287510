//! Inputs to the registry API.

use capreg_state::{CapabilityContent, CapabilityRecord, RecordId, RecordKind};
use serde::{Deserialize, Serialize};

use super::error::{RegistryError, Result};

/// A record to be created. System fields (version, generation, timestamps,
/// digest) are assigned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCapability {
    /// Generated when omitted.
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub kind: RecordKind,
    pub name: String,
    pub domain: String,
    #[serde(flatten)]
    pub content: CapabilityContent,
    #[serde(default, alias = "parent_skills")]
    pub parent_ids: Vec<RecordId>,
}

impl NewCapability {
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        content: CapabilityContent,
    ) -> Self {
        Self {
            id: None,
            kind: RecordKind::default(),
            name: name.into(),
            domain: domain.into(),
            content,
            parent_ids: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = RecordId>) -> Self {
        self.parent_ids = parents.into_iter().collect();
        self
    }
}

/// A child produced from one (mutation) or more (crossover) parents.
///
/// `kind`, `domain` and `name` default to the first parent's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeriveRequest {
    #[serde(default)]
    pub id: Option<RecordId>,
    pub parent_ids: Vec<RecordId>,
    pub content: CapabilityContent,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub kind: Option<RecordKind>,
}

impl DeriveRequest {
    pub fn mutation(parent: RecordId, content: CapabilityContent) -> Self {
        Self::crossover(vec![parent], content)
    }

    pub fn crossover(parent_ids: Vec<RecordId>, content: CapabilityContent) -> Self {
        Self {
            id: None,
            parent_ids,
            content,
            name: None,
            domain: None,
            kind: None,
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Mutable fields of a record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub content: Option<CapabilityContent>,
}

impl CapabilityPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.domain.is_none() && self.content.is_none()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn content(mut self, content: CapabilityContent) -> Self {
        self.content = Some(content);
        self
    }

    /// Apply onto `record`, returning whether anything changed.
    pub(crate) fn apply(&self, record: &mut CapabilityRecord) -> Result<bool> {
        let mut changed = false;
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
            changed |= record.name != *name;
            record.name = name.clone();
        }
        if let Some(domain) = &self.domain {
            require_non_empty("domain", domain)?;
            changed |= record.domain != *domain;
            record.domain = domain.clone();
        }
        if let Some(content) = &self.content {
            require_non_empty("instruction", &content.instruction)?;
            let digest = content.digest();
            changed |= record.content_digest != digest;
            record.content = content.clone();
            record.content_digest = digest;
        }
        Ok(changed)
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RegistryError::InvalidRecord(format!("{field} must not be empty")));
    }
    Ok(())
}

/// What to do with live descendants when soft-deleting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteMode {
    /// Refuse while any live record descends from the target.
    #[default]
    Restrict,
    /// Soft-delete every live descendant first, deepest first.
    Cascade,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListOrder {
    /// Oldest first, ties by id.
    #[default]
    CreatedAsc,
    CreatedDesc,
    /// Highest score first; unevaluated records last.
    ScoreDesc,
}

impl std::str::FromStr for ListOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" | "created-asc" | "asc" => Ok(ListOrder::CreatedAsc),
            "created-desc" | "desc" => Ok(ListOrder::CreatedDesc),
            "score" | "score-desc" => Ok(ListOrder::ScoreDesc),
            other => Err(format!("unknown list order: {other}")),
        }
    }
}

/// Query for [`crate::CapabilityRegistry::list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub domain: Option<String>,
    pub kind: Option<RecordKind>,
    /// Excludes unevaluated records when set.
    pub min_score: Option<f64>,
    pub min_generation: Option<u32>,
    pub max_generation: Option<u32>,
    pub include_deleted: bool,
    pub order: ListOrder,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn min_score(mut self, score: f64) -> Self {
        self.min_score = Some(score);
        self
    }

    pub fn generations(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_generation = min;
        self.max_generation = max;
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    pub fn order(mut self, order: ListOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &CapabilityRecord) -> bool {
        if record.is_deleted() && !self.include_deleted {
            return false;
        }
        if let Some(domain) = &self.domain {
            if record.domain != *domain {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(min) = self.min_score {
            match record.performance_score {
                Some(score) if score >= min => {}
                _ => return false,
            }
        }
        if self.min_generation.is_some_and(|min| record.generation < min) {
            return false;
        }
        if self.max_generation.is_some_and(|max| record.generation > max) {
            return false;
        }
        true
    }

    /// Filter, order and truncate a creation-ordered scan.
    pub(crate) fn apply(&self, records: Vec<CapabilityRecord>) -> Vec<CapabilityRecord> {
        let mut out: Vec<CapabilityRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();
        match self.order {
            ListOrder::CreatedAsc => {}
            ListOrder::CreatedDesc => out.reverse(),
            ListOrder::ScoreDesc => out.sort_by(|a, b| {
                let a = a.performance_score.unwrap_or(f64::NEG_INFINITY);
                let b = b.performance_score.unwrap_or(f64::NEG_INFINITY);
                b.total_cmp(&a)
            }),
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}
