use crate::logic::{AggregateState, recompute_totals};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state document {path} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of the aggregate document
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The stored document as-is, `None` if nothing was ever persisted
    async fn read(&self) -> Result<Option<AggregateState>, CheckpointError>;

    /// Replace the stored document as a whole. Readers see either the old or the
    /// new document, never a mix.
    async fn persist(&self, state: &AggregateState) -> Result<(), CheckpointError>;

    /// State to resume from: the stored document with its totals recomputed, or
    /// an empty state
    async fn load(&self) -> Result<AggregateState, CheckpointError> {
        match self.read().await? {
            Some(state) => {
                info!("Loaded existing data with chains: {:?}", state.chains.keys().collect::<Vec<_>>());
                Ok(recompute_totals(state))
            }
            None => {
                info!("No existing data found, starting fresh");
                Ok(AggregateState::default())
            }
        }
    }
}

/// Pretty-printed JSON file, replaced through a temp file and a rename
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut file_name = self.path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
        file_name.push(".tmp");
        self.path.with_file_name(file_name)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io { path: path.to_path_buf(), source }
    }
}

#[async_trait]
impl CheckpointStore for JsonFileStore {
    async fn read(&self) -> Result<Option<AggregateState>, CheckpointError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(&self.path, e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| CheckpointError::Corrupt { path: self.path.clone(), source })
    }

    async fn persist(&self, state: &AggregateState) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(state)?;
        let temp_path = self.temp_path();

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| self.io_error(parent, e))?;
        }

        let mut file = tokio::fs::File::create(&temp_path).await.map_err(|e| self.io_error(&temp_path, e))?;
        file.write_all(json.as_bytes()).await.map_err(|e| self.io_error(&temp_path, e))?;
        file.sync_all().await.map_err(|e| self.io_error(&temp_path, e))?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| self.io_error(&self.path, e))?;
        info!("Data saved to {}", self.path.display());
        Ok(())
    }
}

/// Keeps the serialized document in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<String>>,
    persist_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: &AggregateState) -> Result<Self, CheckpointError> {
        let store = Self::new();
        *store.lock()? = Some(serde_json::to_string_pretty(state)?);
        Ok(store)
    }

    /// Serialized document as last persisted
    pub fn document(&self) -> Option<String> {
        self.document.lock().ok().and_then(|document| document.clone())
    }

    pub fn persist_count(&self) -> usize {
        self.persist_count.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>, CheckpointError> {
        self.document.lock().map_err(|e| CheckpointError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn read(&self) -> Result<Option<AggregateState>, CheckpointError> {
        let document = self.lock()?.clone();
        match document {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn persist(&self, state: &AggregateState) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(state)?;
        *self.lock()? = Some(json);
        self.persist_count.fetch_add(1, Ordering::SeqCst);
        debug!("State persisted in memory");
        Ok(())
    }
}
