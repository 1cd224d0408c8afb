//! Chunk stores.
//!
//! Two read paths sit behind the same [`ChunkDataStore`] contract:
//! ```text
//! files:    <root>/gid_XXXX_YYYY.bytes          raw payload
//! catalog:  <root>/catalog.json                 key -> blob, sha256, raw length
//!           <root>/blobs/gid_XXXX_YYYY.bin.zst  zstd-compressed payload
//! ```
//! Loads never surface errors to the caller: failures are logged and the
//! future yields `None`, which callers treat like a cancelled load.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;

use async_channel::Receiver;
use serde::{Deserialize, Serialize};
use verdant_common::{CancellationToken, ChunkId};

use crate::format::{ChunkPayload, FormatError, asset_key};
use crate::worker::IoWorker;

/// Errors from chunk store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed chunk payload: {0}")]
    Format(#[from] FormatError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("asset {0} is not in the catalog")]
    NotInCatalog(String),
    #[error("integrity check failed for {key}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("I/O worker stopped")]
    WorkerClosed,
}

impl StoreError {
    /// True for failures of the bytes themselves rather than of reading them.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            StoreError::Format(_) | StoreError::IntegrityMismatch { .. }
        )
    }
}

/// Pending chunk read. Resolves to `None` on cancellation or failure.
pub type LoadFuture = Pin<Box<dyn Future<Output = Option<ChunkPayload>> + Send>>;

/// Reads and writes persisted chunk payloads.
pub trait ChunkDataStore {
    /// Write `payload` under the location derived from `id`.
    fn save(&mut self, id: ChunkId, payload: &ChunkPayload) -> Result<(), StoreError>;

    /// Start reading the payload for `id`.
    ///
    /// `None` means "unavailable this attempt", never "permanently absent".
    fn load(&self, id: ChunkId, cancel: CancellationToken) -> LoadFuture;
}

/// Which read path a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One raw file per chunk; what authoring tools write during development.
    #[default]
    Files,
    /// Packed, hashed asset catalog; what shipped builds read.
    Catalog,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "files" => Ok(StorageMode::Files),
            "catalog" => Ok(StorageMode::Catalog),
            other => Err(format!("unknown storage mode {other:?}, expected files or catalog")),
        }
    }
}

/// Where chunk payloads live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Files,
            root: PathBuf::from("chunks"),
        }
    }
}

/// Open the store selected by `config`.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn ChunkDataStore>, StoreError> {
    tracing::info!(mode = ?config.mode, root = %config.root.display(), "opening chunk store");
    Ok(match config.mode {
        StorageMode::Files => Box::new(FileChunkStore::open(&config.root)?),
        StorageMode::Catalog => Box::new(crate::catalog::CatalogChunkStore::open(&config.root)?),
    })
}

/// One raw payload file per chunk.
pub struct FileChunkStore {
    root: PathBuf,
    worker: IoWorker,
}

impl FileChunkStore {
    /// Open (creating if needed) a directory of chunk files.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            worker: IoWorker::spawn("verdant-chunk-io")?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the payload file for `id`.
    pub fn file_path(&self, id: ChunkId) -> PathBuf {
        self.root.join(format!("{}.bytes", asset_key(id)))
    }
}

impl ChunkDataStore for FileChunkStore {
    fn save(&mut self, id: ChunkId, payload: &ChunkPayload) -> Result<(), StoreError> {
        let bytes = payload.encode()?;
        std::fs::write(self.file_path(id), bytes)?;
        tracing::debug!(%id, instances = payload.instance_count(), "saved chunk file");
        Ok(())
    }

    fn load(&self, id: ChunkId, cancel: CancellationToken) -> LoadFuture {
        if cancel.is_cancelled() {
            return Box::pin(std::future::ready(None));
        }
        let path = self.file_path(id);
        let job_cancel = cancel.clone();
        let reply = self.worker.submit(move || {
            if job_cancel.is_cancelled() {
                return None;
            }
            Some(read_payload_file(&path))
        });
        Box::pin(await_payload(id, cancel, reply))
    }
}

fn read_payload_file(path: &Path) -> Result<ChunkPayload, StoreError> {
    let bytes = std::fs::read(path)?;
    Ok(ChunkPayload::decode(&bytes)?)
}

/// Await a worker reply and fold every failure into `None`.
pub(crate) async fn await_payload(
    id: ChunkId,
    cancel: CancellationToken,
    reply: Receiver<Option<Result<ChunkPayload, StoreError>>>,
) -> Option<ChunkPayload> {
    let result = reply.recv().await;
    if cancel.is_cancelled() {
        tracing::debug!(%id, "chunk load cancelled");
        return None;
    }
    match result {
        Ok(Some(Ok(payload))) => Some(payload),
        Ok(Some(Err(error))) => {
            if error.is_data_error() {
                tracing::warn!(%id, %error, "chunk data rejected");
            } else {
                tracing::warn!(%id, %error, "chunk read failed");
            }
            None
        }
        Ok(None) => None,
        Err(_) => {
            tracing::warn!(%id, error = %StoreError::WorkerClosed, "chunk read failed");
            None
        }
    }
}
