use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{StateError, StorageError};
use crate::schema::{CapabilityRecord, ChampionMetadata, ChampionRecord, EvaluationEvent, RecordId};
use crate::storage_traits::*;

/// Filesystem-backed registry: one JSON document per record.
///
/// Layout:
/// - `<root>/records/<id>.json`: the record plus its embedded evaluation log
/// - `<root>/champions/<domain>.json`: champion history, oldest first
/// - `<root>/retired/<id>`: empty marker for purged ids
///
/// Every write goes to a temp file in the target directory and is renamed
/// into place, so a reader sees either the old or the new document. Writes
/// are serialized by an in-process lock; separate processes sharing a root
/// are not coordinated.
pub struct FsRecordStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

/// On-disk document. The evaluation log lives next to the cached score so
/// both change in the same rename.
#[derive(Debug, Serialize, Deserialize)]
struct RecordDocument {
    #[serde(flatten)]
    record: CapabilityRecord,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    history: Vec<EvaluationEvent>,
}

impl FsRecordStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StateError> {
        let root = root.as_ref().to_path_buf();
        for dir in ["records", "champions", "retired"] {
            fs::create_dir_all(root.join(dir))
                .map_err(|e| StateError::Root(format!("{}: {}", root.display(), e)))?;
        }
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &RecordId) -> PathBuf {
        self.root.join("records").join(format!("{}.json", id.as_str()))
    }

    fn retired_path(&self, id: &RecordId) -> PathBuf {
        self.root.join("retired").join(id.as_str())
    }

    fn champion_path(&self, domain: &str) -> PathBuf {
        let safe = !domain.is_empty()
            && !domain.starts_with('.')
            && domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        let stem = if safe {
            domain.to_string()
        } else {
            // `~` never appears in a plain name, so encoded stems cannot collide.
            format!("~{}", hex::encode(domain.as_bytes()))
        };
        self.root.join("champions").join(format!("{stem}.json"))
    }

    fn read_document(&self, id: &RecordId) -> StorageResult<Option<RecordDocument>> {
        read_json(&self.record_path(id))
    }

    fn write_document(&self, doc: &RecordDocument) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        write_atomic(&self.record_path(&doc.record.id), &bytes)
    }

    fn read_champions(&self, domain: &str) -> StorageResult<Vec<ChampionRecord>> {
        Ok(read_json(&self.champion_path(domain))?.unwrap_or_default())
    }

    fn write_champions(&self, domain: &str, history: &[ChampionRecord]) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(history)?;
        write_atomic(&self.champion_path(domain), &bytes)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

/// Write to a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::Backend(format!("no parent for {}", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn not_found(id: &RecordId) -> StorageError {
    StorageError::RecordNotFound {
        id: id.to_string(),
    }
}

#[async_trait]
impl RecordStore for FsRecordStore {
    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn insert(&self, record: CapabilityRecord) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.retired_path(&record.id).exists() {
            return Err(StorageError::IdRetired {
                id: record.id.to_string(),
            });
        }
        if self.record_path(&record.id).exists() {
            return Err(StorageError::RecordExists {
                id: record.id.to_string(),
            });
        }
        self.write_document(&RecordDocument {
            record,
            history: Vec::new(),
        })?;
        debug!("record written");
        Ok(())
    }

    async fn load(&self, id: &RecordId) -> StorageResult<Option<CapabilityRecord>> {
        Ok(self.read_document(id)?.map(|doc| doc.record))
    }

    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        mut record: CapabilityRecord,
    ) -> StorageResult<CapabilityRecord> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read_document(&record.id)?
            .ok_or_else(|| not_found(&record.id))?;
        if current.record.version != expected_version {
            return Err(StorageError::VersionMismatch {
                id: record.id.to_string(),
                expected: expected_version,
                actual: current.record.version,
            });
        }
        record.inherit_evaluation_cache(&current.record);
        self.write_document(&RecordDocument {
            record: record.clone(),
            history: current.history,
        })?;
        Ok(record)
    }

    async fn scan(&self) -> StorageResult<Vec<CapabilityRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join("records"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(doc) = read_json::<RecordDocument>(&path)? {
                records.push(doc.record);
            }
        }
        sort_by_creation(&mut records);
        Ok(records)
    }

    #[instrument(skip(self, event), fields(id = %event.record_id, score = event.score))]
    async fn append_evaluation(&self, mut event: EvaluationEvent) -> StorageResult<EvaluationEvent> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self
            .read_document(&event.record_id)?
            .ok_or_else(|| not_found(&event.record_id))?;
        event.seq = doc.history.len() as u64 + 1;
        stamp_after(&mut event, doc.history.last());
        doc.record.performance_score = Some(event.score);
        doc.record.optimized_at = Some(event.timestamp);
        doc.history.push(event.clone());
        self.write_document(&doc)?;
        Ok(event)
    }

    async fn evaluations(&self, id: &RecordId) -> StorageResult<Vec<EvaluationEvent>> {
        let mut events = self.read_document(id)?.ok_or_else(|| not_found(id))?.history;
        sort_evaluations(&mut events);
        Ok(events)
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn purge(&self, id: &RecordId) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(id);
        if !path.exists() {
            return Err(not_found(id));
        }
        // Retire first: a crash between the two steps leaves the id unusable
        // rather than reusable.
        write_atomic(&self.retired_path(id), b"")?;
        fs::remove_file(&path)?;
        Ok(())
    }

    async fn is_retired(&self, id: &RecordId) -> StorageResult<bool> {
        Ok(self.retired_path(id).exists())
    }
}

#[async_trait]
impl ChampionStore for FsRecordStore {
    #[instrument(skip(self, metadata), fields(domain = %domain, record = %record_id))]
    async fn promote(
        &self,
        domain: &str,
        record_id: &RecordId,
        metadata: ChampionMetadata,
    ) -> StorageResult<ChampionRecord> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.read_champions(domain)?;
        let record = ChampionRecord {
            domain: domain.to_string(),
            record_id: record_id.clone(),
            seq: history.len() as u64 + 1,
            metadata,
            created_at: Utc::now(),
        };
        history.push(record.clone());
        self.write_champions(domain, &history)?;
        Ok(record)
    }

    #[instrument(skip(self), fields(domain = %domain))]
    async fn rollback(&self, domain: &str) -> StorageResult<ChampionRecord> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.read_champions(domain)?;
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
        let previous = &history[history.len() - 2];
        let record = ChampionRecord {
            domain: domain.to_string(),
            record_id: previous.record_id.clone(),
            seq: history.len() as u64 + 1,
            metadata: previous.metadata.clone(),
            created_at: Utc::now(),
        };
        history.push(record.clone());
        self.write_champions(domain, &history)?;
        Ok(record)
    }

    async fn current(&self, domain: &str) -> StorageResult<Option<ChampionRecord>> {
        Ok(self.read_champions(domain)?.pop())
    }

    async fn history(&self, domain: &str) -> StorageResult<Vec<ChampionRecord>> {
        let mut history = self.read_champions(domain)?;
        history.reverse(); // newest first
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CapabilityContent, RecordKind};

    fn make_store() -> (tempfile::TempDir, FsRecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn record(id: &str) -> CapabilityRecord {
        CapabilityRecord::new(
            RecordId::parse(id).unwrap(),
            RecordKind::Skill,
            "writer",
            "content",
            CapabilityContent::new("Write release notes"),
            vec![],
            0,
        )
    }

    #[tokio::test]
    async fn one_json_file_per_record() {
        let (dir, store) = make_store();
        store.insert(record("skill-1")).await.unwrap();
        store.insert(record("skill-2")).await.unwrap();

        let files: Vec<_> = fs::read_dir(dir.path().join("records"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files.len(), 2);
        assert!(files.contains(&"skill-1.json".to_string()));

        let raw = fs::read_to_string(dir.path().join("records/skill-1.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["id"], "skill-1");
        assert_eq!(json["instruction"], "Write release notes");
        assert!(json.get("history").is_none());
    }

    #[tokio::test]
    async fn evaluation_is_embedded_with_cached_score() {
        let (dir, store) = make_store();
        store.insert(record("skill-1")).await.unwrap();
        let id = RecordId::parse("skill-1").unwrap();
        store
            .append_evaluation(EvaluationEvent::new(id, 0.7))
            .await
            .unwrap();

        let raw = fs::read_to_string(dir.path().join("records/skill-1.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["performance_score"], 0.7);
        assert_eq!(json["history"][0]["score"], 0.7);
        assert_eq!(json["history"][0]["seq"], 1);
    }

    #[tokio::test]
    async fn reopen_sees_previous_writes() {
        let (dir, store) = make_store();
        store.insert(record("skill-1")).await.unwrap();
        drop(store);

        let reopened = FsRecordStore::open(dir.path()).unwrap();
        let loaded = reopened
            .load(&RecordId::parse("skill-1").unwrap())
            .await
            .unwrap()
            .expect("record survives reopen");
        assert_eq!(loaded.name, "writer");
    }

    #[tokio::test]
    async fn unsafe_domain_names_are_hex_encoded() {
        let (dir, store) = make_store();
        let id = RecordId::parse("skill-1").unwrap();
        let metadata = ChampionMetadata {
            promoted_by: "test".to_string(),
            note: None,
            score_at_promotion: None,
        };
        store.promote("a/b", &id, metadata).await.unwrap();

        let expected = dir
            .path()
            .join("champions")
            .join(format!("~{}.json", hex::encode("a/b")));
        assert!(expected.exists());
        assert_eq!(store.current("a/b").await.unwrap().unwrap().record_id, id);
    }

    #[tokio::test]
    async fn plain_domain_that_looks_encoded_keeps_its_own_history() {
        let (_dir, store) = make_store();
        let metadata = || ChampionMetadata {
            promoted_by: "test".to_string(),
            note: None,
            score_at_promotion: None,
        };
        let encoded_lookalike = format!("hex-{}", hex::encode("a/b"));
        let slash = RecordId::parse("skill-1").unwrap();
        let lookalike = RecordId::parse("skill-2").unwrap();

        store.promote("a/b", &slash, metadata()).await.unwrap();
        store
            .promote(&encoded_lookalike, &lookalike, metadata())
            .await
            .unwrap();

        assert_eq!(store.history("a/b").await.unwrap().len(), 1);
        assert_eq!(store.current("a/b").await.unwrap().unwrap().record_id, slash);
        assert_eq!(
            store
                .current(&encoded_lookalike)
                .await
                .unwrap()
                .unwrap()
                .record_id,
            lookalike
        );
        let tilde = format!("~{}", hex::encode("a/b"));
        assert!(store.current(&tilde).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_leaves_retired_marker() {
        let (dir, store) = make_store();
        store.insert(record("skill-1")).await.unwrap();
        let id = RecordId::parse("skill-1").unwrap();
        store.purge(&id).await.unwrap();

        assert!(!dir.path().join("records/skill-1.json").exists());
        assert!(dir.path().join("retired/skill-1").exists());
        assert!(store.is_retired(&id).await.unwrap());
    }
}
