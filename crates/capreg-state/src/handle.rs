//! SurrealDB Handle - Connection and Operations
//!
//! Manages connection and provides methods for:
//! - capability record insert / load / conditional update / scan / purge
//! - evaluation append (transactional with the cached score)
//! - champion promote / rollback / current / history
//!
//! Supports both local (in-memory) and cloud (WebSocket) connections.

use crate::error::StateError;
use crate::schema::{
    CapabilityContent, CapabilityRecord, ChampionMetadata, ChampionRecord, EvaluationEvent,
    RecordId, RecordKind,
};
use crate::storage_traits::{sort_by_creation, sort_evaluations, stamp_after, StorageResult};
use crate::Result;
use crate::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

/// Configuration for SurrealDB Cloud connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "capreg")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create a new cloud configuration for a database user
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: "capreg".to_string(),
            database: "main".to_string(),
            is_root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "capreg")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false") - set to "true" for root users
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace =
            std::env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "capreg".to_string());
        let database = std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "main".to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// SurrealDB connection handle for capreg
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

// Table rows. Field names avoid SurrealQL keywords (`content`, `version`)
// and the reserved `id` field; conversion happens at this boundary only.

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbCapabilityRecord {
    record_id: String,
    kind: RecordKind,
    name: String,
    domain: String,
    payload: CapabilityContent,
    content_digest: String,
    revision: u64,
    generation: u32,
    parent_ids: Vec<String>,
    performance_score: Option<f64>,
    created_at: SurrealDatetime,
    optimized_at: Option<SurrealDatetime>,
    updated_at: SurrealDatetime,
    deleted_at: Option<SurrealDatetime>,
}

impl DbCapabilityRecord {
    fn from_record(record: &CapabilityRecord) -> Self {
        Self {
            record_id: record.id.to_string(),
            kind: record.kind,
            name: record.name.clone(),
            domain: record.domain.clone(),
            payload: record.content.clone(),
            content_digest: record.content_digest.clone(),
            revision: record.version,
            generation: record.generation,
            parent_ids: record.parent_ids.iter().map(ToString::to_string).collect(),
            performance_score: record.performance_score,
            created_at: SurrealDatetime::from(record.created_at),
            optimized_at: record.optimized_at.map(SurrealDatetime::from),
            updated_at: SurrealDatetime::from(record.updated_at),
            deleted_at: record.deleted_at.map(SurrealDatetime::from),
        }
    }

    fn into_record(self) -> StorageResult<CapabilityRecord> {
        let parent_ids = self
            .parent_ids
            .into_iter()
            .map(RecordId::parse)
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(CapabilityRecord {
            id: RecordId::parse(self.record_id)?,
            kind: self.kind,
            name: self.name,
            domain: self.domain,
            content: self.payload,
            content_digest: self.content_digest,
            version: self.revision,
            generation: self.generation,
            parent_ids,
            performance_score: self.performance_score,
            created_at: DateTime::<Utc>::from(self.created_at),
            optimized_at: self.optimized_at.map(DateTime::<Utc>::from),
            updated_at: DateTime::<Utc>::from(self.updated_at),
            deleted_at: self.deleted_at.map(DateTime::<Utc>::from),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbEvaluation {
    record_id: String,
    seq: u64,
    score: f64,
    baseline_score: Option<f64>,
    note: Option<String>,
    recorded_at: SurrealDatetime,
}

impl DbEvaluation {
    fn into_event(self) -> StorageResult<EvaluationEvent> {
        Ok(EvaluationEvent {
            record_id: RecordId::parse(self.record_id)?,
            seq: self.seq,
            score: self.score,
            baseline_score: self.baseline_score,
            note: self.note,
            timestamp: DateTime::<Utc>::from(self.recorded_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbChampionRecord {
    domain: String,
    record_id: String,
    seq: u64,
    metadata: ChampionMetadata,
    created_at: SurrealDatetime,
}

impl DbChampionRecord {
    fn into_champion_record(self) -> StorageResult<ChampionRecord> {
        Ok(ChampionRecord {
            domain: self.domain,
            record_id: RecordId::parse(self.record_id)?,
            seq: self.seq,
            metadata: self.metadata,
            created_at: DateTime::<Utc>::from(self.created_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbRetiredId {
    record_id: String,
}

impl SurrealHandle {
    /// Connect to SurrealDB in-memory and set up schema
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        info!("Connecting to SurrealDB (in-memory)");

        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        db.use_ns("capreg")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        let handle = SurrealHandle { db };
        handle.init_schema().await?;

        info!("SurrealDB connected and schema initialized");
        Ok(handle)
    }

    /// Connect to SurrealDB Cloud
    ///
    /// # Example
    /// ```ignore
    /// let config = CloudConfig::new(
    ///     "wss://xxx.aws-use1.surrealdb.cloud",
    ///     "your_username",
    ///     "your_password",
    /// );
    /// let handle = SurrealHandle::setup_cloud(config).await?;
    /// ```
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn setup_cloud(config: CloudConfig) -> Result<Self> {
        info!("Connecting to SurrealDB Cloud (root={})", config.is_root);

        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Root authentication failed: {}", e)))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| {
                StateError::Connection(format!("Database authentication failed: {}", e))
            })?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        let handle = SurrealHandle { db };
        handle.init_schema().await?;

        info!("SurrealDB Cloud connected and schema initialized");
        Ok(handle)
    }

    /// Connect using environment variables
    ///
    /// If SURREALDB_ENDPOINT is set, connects to cloud.
    /// If SURREALDB_URL is set, connects to that URL.
    /// Otherwise, falls back to in-memory.
    #[instrument(skip_all)]
    pub async fn setup_from_env() -> Result<Self> {
        if let Ok(config) = CloudConfig::from_env() {
            info!("Cloud config found, connecting to SurrealDB Cloud");
            return Self::setup_cloud(config).await;
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            info!("SURREALDB_URL found, connecting to {}", url);
            let db = surrealdb::engine::any::connect(&url)
                .await
                .map_err(|e| StateError::Connection(e.to_string()))?;

            db.use_ns("capreg")
                .use_db("main")
                .await
                .map_err(|e| StateError::Connection(e.to_string()))?;

            let handle = SurrealHandle { db };
            handle.init_schema().await?;
            return Ok(handle);
        }

        info!("No cloud config found, using in-memory database");
        Self::setup_db().await
    }

    /// Initialize the database schema
    async fn init_schema(&self) -> Result<()> {
        debug!("Initializing capreg schema");

        let schema = r#"
            -- Capability records
            DEFINE TABLE IF NOT EXISTS capabilities SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_capability_id ON capabilities FIELDS record_id UNIQUE;
            DEFINE INDEX IF NOT EXISTS idx_capability_domain ON capabilities FIELDS domain;

            -- Evaluation log (append-only)
            DEFINE TABLE IF NOT EXISTS evaluations SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_evaluation_record ON evaluations FIELDS record_id;
            DEFINE INDEX IF NOT EXISTS idx_evaluation_record_seq ON evaluations FIELDS record_id, seq UNIQUE;

            -- Champion history per domain
            DEFINE TABLE IF NOT EXISTS champions SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_champion_domain_seq ON champions FIELDS domain, seq UNIQUE;

            -- Ids that may never be issued again
            DEFINE TABLE IF NOT EXISTS retired_ids SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_retired_id ON retired_ids FIELDS record_id UNIQUE;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| StateError::SchemaSetup(e.to_string()))?
            .check()
            .map_err(|e| StateError::SchemaSetup(e.to_string()))?;

        debug!("Schema initialized successfully");
        Ok(())
    }

    // ========== Record Operations ==========

    /// Insert a new capability record
    #[instrument(skip(self, record), fields(id = %record.id))]
    pub async fn record_insert(&self, record: &CapabilityRecord) -> StorageResult<()> {
        debug!("Inserting record");

        if self.record_is_retired(&record.id).await? {
            return Err(StorageError::IdRetired {
                id: record.id.to_string(),
            });
        }
        if self.record_load(&record.id).await?.is_some() {
            return Err(StorageError::RecordExists {
                id: record.id.to_string(),
            });
        }

        let row = DbCapabilityRecord::from_record(record);
        let created: Option<DbCapabilityRecord> =
            self.db.create("capabilities").content(row).await?;

        created
            .map(|_| ())
            .ok_or_else(|| StorageError::Backend("failed to create capability record".to_string()))
    }

    /// Load a capability record by id (soft-deleted included)
    #[instrument(skip(self), fields(id = %id))]
    pub async fn record_load(&self, id: &RecordId) -> StorageResult<Option<CapabilityRecord>> {
        let id_owned = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM capabilities WHERE record_id = $id")
            .bind(("id", id_owned))
            .await?;

        let rows: Vec<DbCapabilityRecord> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(DbCapabilityRecord::into_record)
            .transpose()
    }

    /// Conditionally replace the mutable fields of a record.
    ///
    /// The `WHERE revision = $expected` clause makes the check and the write
    /// a single statement. The cached score fields are never written here.
    #[instrument(skip(self, record), fields(id = %record.id, expected = expected_version))]
    pub async fn record_swap(
        &self,
        expected_version: u64,
        record: &CapabilityRecord,
    ) -> StorageResult<CapabilityRecord> {
        let row = DbCapabilityRecord::from_record(record);

        let mut result = self
            .db
            .query(
                "UPDATE capabilities SET \
                    name = $name, \
                    domain = $domain, \
                    kind = $kind, \
                    payload = $payload, \
                    content_digest = $digest, \
                    revision = $revision, \
                    updated_at = $updated_at, \
                    deleted_at = $deleted_at \
                 WHERE record_id = $id AND revision = $expected \
                 RETURN AFTER",
            )
            .bind(("name", row.name))
            .bind(("domain", row.domain))
            .bind(("kind", row.kind))
            .bind(("payload", row.payload))
            .bind(("digest", row.content_digest))
            .bind(("revision", row.revision))
            .bind(("updated_at", row.updated_at))
            .bind(("deleted_at", row.deleted_at))
            .bind(("id", row.record_id))
            .bind(("expected", expected_version))
            .await?;

        let updated: Vec<DbCapabilityRecord> = result.take(0)?;
        if let Some(row) = updated.into_iter().next() {
            return row.into_record();
        }

        // Nothing matched: either the record is gone or the version moved.
        match self.record_load(&record.id).await? {
            None => Err(StorageError::RecordNotFound {
                id: record.id.to_string(),
            }),
            Some(current) => Err(StorageError::VersionMismatch {
                id: record.id.to_string(),
                expected: expected_version,
                actual: current.version,
            }),
        }
    }

    /// All records ordered by creation time
    #[instrument(skip(self))]
    pub async fn record_scan(&self) -> StorageResult<Vec<CapabilityRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM capabilities ORDER BY created_at ASC")
            .await?;

        let rows: Vec<DbCapabilityRecord> = result.take(0)?;
        let mut records = rows
            .into_iter()
            .map(DbCapabilityRecord::into_record)
            .collect::<StorageResult<Vec<_>>>()?;
        sort_by_creation(&mut records);
        Ok(records)
    }

    /// Physically delete a record and its evaluations, retiring the id
    #[instrument(skip(self), fields(id = %id))]
    pub async fn record_purge(&self, id: &RecordId) -> StorageResult<()> {
        if self.record_load(id).await?.is_none() {
            return Err(StorageError::RecordNotFound { id: id.to_string() });
        }

        let retired = DbRetiredId {
            record_id: id.to_string(),
        };

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE retired_ids CONTENT $retired; \
                 DELETE capabilities WHERE record_id = $id; \
                 DELETE evaluations WHERE record_id = $id; \
                 COMMIT TRANSACTION;",
            )
            .bind(("retired", retired))
            .bind(("id", id.to_string()))
            .await?
            .check()?;

        info!("Record purged and id retired");
        Ok(())
    }

    /// Whether an id has been retired by a purge
    pub async fn record_is_retired(&self, id: &RecordId) -> StorageResult<bool> {
        let mut result = self
            .db
            .query("SELECT * FROM retired_ids WHERE record_id = $id")
            .bind(("id", id.to_string()))
            .await?;

        let rows: Vec<DbRetiredId> = result.take(0)?;
        Ok(!rows.is_empty())
    }

    // ========== Evaluation Operations ==========

    /// Append an evaluation and refresh the cached score in one transaction
    #[instrument(skip(self, event), fields(id = %event.record_id, score = event.score))]
    pub async fn evaluation_append(&self, event: &EvaluationEvent) -> StorageResult<EvaluationEvent> {
        if self.record_load(&event.record_id).await?.is_none() {
            return Err(StorageError::RecordNotFound {
                id: event.record_id.to_string(),
            });
        }

        // seq and timestamp come from the same read: an append that saw
        // event n stamps no earlier than it, and two appends that saw the
        // same history collide on the unique (record_id, seq) index, which
        // aborts the losing transaction.
        let existing = self.evaluation_list(&event.record_id).await?;
        let mut stamped = event.clone();
        stamped.seq = existing.len() as u64 + 1;
        stamp_after(&mut stamped, existing.last());
        let row = DbEvaluation {
            record_id: stamped.record_id.to_string(),
            seq: stamped.seq,
            score: stamped.score,
            baseline_score: stamped.baseline_score,
            note: stamped.note.clone(),
            recorded_at: SurrealDatetime::from(stamped.timestamp),
        };

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE evaluations CONTENT $event; \
                 UPDATE capabilities SET performance_score = $score, optimized_at = $at \
                    WHERE record_id = $id; \
                 COMMIT TRANSACTION;",
            )
            .bind(("event", row.clone()))
            .bind(("score", row.score))
            .bind(("at", row.recorded_at.clone()))
            .bind(("id", row.record_id.clone()))
            .await?
            .check()?;

        row.into_event()
    }

    /// Evaluations for a record ordered by time
    #[instrument(skip(self), fields(id = %id))]
    pub async fn evaluation_list(&self, id: &RecordId) -> StorageResult<Vec<EvaluationEvent>> {
        let mut result = self
            .db
            .query("SELECT * FROM evaluations WHERE record_id = $id ORDER BY seq ASC")
            .bind(("id", id.to_string()))
            .await?;

        let rows: Vec<DbEvaluation> = result.take(0)?;
        let mut events = rows
            .into_iter()
            .map(DbEvaluation::into_event)
            .collect::<StorageResult<Vec<_>>>()?;
        sort_evaluations(&mut events);
        Ok(events)
    }

    // ========== Champion Operations ==========

    /// Append a champion entry for a domain.
    #[instrument(skip(self, metadata), fields(domain = %domain, record = %record_id))]
    pub async fn champion_promote(
        &self,
        domain: &str,
        record_id: &RecordId,
        metadata: ChampionMetadata,
    ) -> StorageResult<ChampionRecord> {
        let seq = self.champion_history(domain).await?.len() as u64 + 1;
        let row = DbChampionRecord {
            domain: domain.to_string(),
            record_id: record_id.to_string(),
            seq,
            metadata,
            created_at: SurrealDatetime::from(Utc::now()),
        };

        let created: Option<DbChampionRecord> =
            self.db.create("champions").content(row).await?;

        created
            .ok_or_else(|| StorageError::Backend("failed to create champion record".to_string()))?
            .into_champion_record()
    }

    /// Re-append the previous champion for a domain.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn champion_rollback(&self, domain: &str) -> StorageResult<ChampionRecord> {
        let history = self.champion_history(domain).await?;
        if history.is_empty() {
            return Err(StorageError::ChampionNotFound {
                domain: domain.to_string(),
            });
        }
        if history.len() < 2 {
            return Err(StorageError::NoPreviousChampion {
                domain: domain.to_string(),
            });
        }

        let previous = &history[1];
        self.champion_promote(domain, &previous.record_id, previous.metadata.clone())
            .await
    }

    /// Current champion (highest seq) for a domain.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn champion_current(&self, domain: &str) -> StorageResult<Option<ChampionRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM champions WHERE domain = $domain ORDER BY seq DESC LIMIT 1")
            .bind(("domain", domain.to_string()))
            .await?;

        let rows: Vec<DbChampionRecord> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(DbChampionRecord::into_champion_record)
            .transpose()
    }

    /// Champion history for a domain (newest first).
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn champion_history(&self, domain: &str) -> StorageResult<Vec<ChampionRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM champions WHERE domain = $domain ORDER BY seq DESC")
            .bind(("domain", domain.to_string()))
            .await?;

        let rows: Vec<DbChampionRecord> = result.take(0)?;
        rows.into_iter()
            .map(DbChampionRecord::into_champion_record)
            .collect()
    }
}
