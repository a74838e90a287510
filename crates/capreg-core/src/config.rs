//! Runtime configuration from `CAPREG_*` environment variables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use capreg_state::{FsRecordStore, RegistryBackend, SurrealRecordStore};
use tracing::info;

use crate::domain::{RegistryError, Result};

pub const DEFAULT_ROOT: &str = ".capreg";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// One JSON document per record under the registry root.
    #[default]
    Fs,
    /// SurrealDB, configured through `SURREALDB_*`.
    Surreal,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fs" | "file" | "filesystem" => Ok(BackendKind::Fs),
            "surreal" | "surrealdb" => Ok(BackendKind::Surreal),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub backend: BackendKind,
    /// Filesystem backend root.
    pub root: PathBuf,
    pub json_logs: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fs,
            root: PathBuf::from(DEFAULT_ROOT),
            json_logs: false,
        }
    }
}

impl RegistryConfig {
    /// Reads:
    /// - CAPREG_BACKEND (optional, `fs` | `surreal`, default: `fs`)
    /// - CAPREG_ROOT (optional, default: `.capreg`)
    /// - CAPREG_LOG_FORMAT (optional, `json` switches log output to JSON)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup("CAPREG_BACKEND").filter(|v| !v.is_empty()) {
            config.backend = raw.parse().map_err(RegistryError::InvalidRecord)?;
        }
        if let Some(root) = lookup("CAPREG_ROOT").filter(|v| !v.is_empty()) {
            config.root = PathBuf::from(root);
        }
        config.json_logs = lookup("CAPREG_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        Ok(config)
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }
}

/// Open the configured backend.
pub async fn open_backend(config: &RegistryConfig) -> Result<Arc<dyn RegistryBackend>> {
    match config.backend {
        BackendKind::Fs => {
            info!(root = %config.root.display(), "opening filesystem registry");
            let store = FsRecordStore::open(&config.root)
                .map_err(|e| RegistryError::StorageUnavailable(e.to_string()))?;
            Ok(Arc::new(store))
        }
        BackendKind::Surreal => {
            info!("opening SurrealDB registry");
            let store = SurrealRecordStore::from_env()
                .await
                .map_err(|e| RegistryError::StorageUnavailable(e.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}
