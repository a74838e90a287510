//! Record schema shared by every backend
//!
//! Serialized field names are part of the on-disk contract and must not
//! change: `id, kind, name, domain, instruction, rules, tools, knowledge,
//! content_digest, version, generation, performance_score, parent_skills,
//! created_at, optimized_at, updated_at, deleted_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Stable identifier of a capability record.
///
/// Ids are restricted to ASCII letters, digits, `-`, `_` and `.` so that
/// they can double as file names. They are never reused once issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Maximum accepted id length.
    pub const MAX_LEN: usize = 128;

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        RecordId(uuid::Uuid::new_v4().to_string())
    }

    /// Validate and wrap an id supplied by a caller.
    pub fn parse(raw: impl Into<String>) -> Result<Self, StorageError> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= Self::MAX_LEN
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::InvalidId { id: raw });
        }
        Ok(RecordId(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecordId {
    type Error = StorageError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        RecordId::parse(raw)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl std::str::FromStr for RecordId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordId::parse(s)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a record describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[default]
    Skill,
    Agent,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Skill => write!(f, "skill"),
            RecordKind::Agent => write!(f, "agent"),
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skill" => Ok(RecordKind::Skill),
            "agent" => Ok(RecordKind::Agent),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// The instructional payload of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityContent {
    /// Free-text instructions
    pub instruction: String,
    /// Behavioural rules, one per entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
    /// Tool references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Knowledge references (documents, URLs, datasets)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge: Vec<String>,
}

impl CapabilityContent {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Default::default()
        }
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.rules = rules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_knowledge(
        mut self,
        knowledge: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.knowledge = knowledge.into_iter().map(Into::into).collect();
        self
    }

    /// SHA-256 hex digest over the canonical JSON form of the content.
    ///
    /// Field order is fixed by the struct declaration, so equal content
    /// always yields the same digest.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

/// A versioned Skill or Agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub id: RecordId,
    #[serde(default)]
    pub kind: RecordKind,
    pub name: String,
    pub domain: String,
    #[serde(flatten)]
    pub content: CapabilityContent,
    #[serde(default)]
    pub content_digest: String,
    /// Bumped by one on every successful update; starts at 1.
    pub version: u64,
    /// 0 for authored records, `max(parent.generation) + 1` otherwise.
    pub generation: u32,
    #[serde(rename = "parent_skills", alias = "parent_ids", default)]
    pub parent_ids: Vec<RecordId>,
    /// Score of the most recent evaluation; owned by the store.
    #[serde(default)]
    pub performance_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent evaluation; owned by the store.
    #[serde(default)]
    pub optimized_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CapabilityRecord {
    /// Build a fresh version-1 record with no evaluations.
    pub fn new(
        id: RecordId,
        kind: RecordKind,
        name: impl Into<String>,
        domain: impl Into<String>,
        content: CapabilityContent,
        parent_ids: Vec<RecordId>,
        generation: u32,
    ) -> Self {
        let now = Utc::now();
        let content_digest = content.digest();
        Self {
            id,
            kind,
            name: name.into(),
            domain: domain.into(),
            content,
            content_digest,
            version: 1,
            generation,
            parent_ids,
            performance_score: None,
            created_at: now,
            optimized_at: None,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    /// Copy the store-owned evaluation cache from `other`.
    pub fn inherit_evaluation_cache(&mut self, other: &CapabilityRecord) {
        self.performance_score = other.performance_score;
        self.optimized_at = other.optimized_at;
    }
}

/// One scored measurement of a record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationEvent {
    pub record_id: RecordId,
    /// Per-record sequence number, assigned by the store (1-based).
    #[serde(default)]
    pub seq: u64,
    pub score: f64,
    #[serde(default)]
    pub baseline_score: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EvaluationEvent {
    pub fn new(record_id: RecordId, score: f64) -> Self {
        Self {
            record_id,
            seq: 0,
            score,
            baseline_score: None,
            note: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_baseline(mut self, baseline: Option<f64>) -> Self {
        self.baseline_score = baseline;
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    /// Score delta over the baseline, when a baseline was recorded.
    pub fn improvement(&self) -> Option<f64> {
        self.baseline_score.map(|b| self.score - b)
    }
}

/// Metadata attached to a champion promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChampionMetadata {
    /// Who or what promoted the record
    pub promoted_by: String,
    pub note: Option<String>,
    /// The record's cached score when it was promoted
    pub score_at_promotion: Option<f64>,
}

/// One entry of a domain's champion history (pointer domain -> record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChampionRecord {
    pub domain: String,
    pub record_id: RecordId,
    /// Per-domain sequence number, 1-based
    pub seq: u64,
    pub metadata: ChampionMetadata,
    pub created_at: DateTime<Utc>,
}
