//! Domain-level error taxonomy for the capability registry.

use capreg_state::StorageError;

/// Reasons a proposed parent/child link is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineageViolation {
    #[error("a record cannot be its own parent")]
    SelfReference,

    #[error("parent {0} listed more than once")]
    DuplicateParent(String),

    #[error("parent {0} does not exist")]
    UnknownParent(String),

    #[error("parent {0} is deleted")]
    DeletedParent(String),

    #[error("parent {parent} was not created before the child")]
    ParentNotOlder { parent: String },

    #[error("linking to {parent} would create a cycle")]
    Cycle { parent: String },
}

/// Registry domain errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record id: {0}")]
    DuplicateId(String),

    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid lineage for {child}: {violation}")]
    InvalidLineage {
        child: String,
        violation: LineageViolation,
    },

    #[error("{id} has active descendants: {}", descendants.join(", "))]
    HasActiveDescendants {
        id: String,
        descendants: Vec<String>,
    },

    #[error("invalid score {score}: {reason}")]
    InvalidScore { score: f64, reason: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid promotion: {0}")]
    InvalidPromotion(String),

    #[error("no champion for domain {0}")]
    NoChampion(String),

    #[error("no previous champion for domain {0}")]
    NoPreviousChampion(String),

    /// Stored data could not be decoded. Retrying will not help.
    #[error("corrupt stored data: {0}")]
    CorruptRecord(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl RegistryError {
    /// Whether the caller may retry the operation after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::VersionConflict { .. } | RegistryError::StorageUnavailable(_)
        )
    }
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RecordNotFound { id } => RegistryError::NotFound(id),
            StorageError::RecordExists { id } | StorageError::IdRetired { id } => {
                RegistryError::DuplicateId(id)
            }
            StorageError::InvalidId { id } => {
                RegistryError::InvalidRecord(format!("invalid id {id:?}"))
            }
            StorageError::VersionMismatch {
                id,
                expected,
                actual,
            } => RegistryError::VersionConflict {
                id,
                expected,
                actual,
            },
            StorageError::ChampionNotFound { domain } => RegistryError::NoChampion(domain),
            StorageError::NoPreviousChampion { domain } => {
                RegistryError::NoPreviousChampion(domain)
            }
            StorageError::Serialization(err) => RegistryError::CorruptRecord(err.to_string()),
            other => RegistryError::StorageUnavailable(other.to_string()),
        }
    }
}

/// Result type for registry domain operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
