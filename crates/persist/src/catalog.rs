//! Named-asset catalog of chunk payloads.
//!
//! Blobs are addressed by asset key, compressed with zstd and verified
//! against the SHA-256 recorded in the catalog before they are decoded.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use verdant_common::{CancellationToken, ChunkId};

use crate::format::{ChunkPayload, asset_key};
use crate::store::{ChunkDataStore, LoadFuture, StoreError, await_payload};
use crate::worker::IoWorker;

const CATALOG_FILE: &str = "catalog.json";
const BLOB_DIR: &str = "blobs";

/// One catalog record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Blob path relative to the catalog root.
    pub file: String,
    /// SHA-256 of the compressed blob, lowercase hex.
    pub sha256: String,
    /// Length of the decompressed payload.
    pub raw_len: u64,
}

/// Asset key to blob mapping, persisted as `catalog.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCatalog {
    pub entries: BTreeMap<String, CatalogEntry>,
}

impl AssetCatalog {
    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Chunk store backed by an [`AssetCatalog`].
pub struct CatalogChunkStore {
    root: PathBuf,
    catalog: AssetCatalog,
    worker: IoWorker,
}

impl CatalogChunkStore {
    /// Open (creating if needed) a catalog directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(BLOB_DIR))?;
        let catalog_path = root.join(CATALOG_FILE);
        let catalog = if catalog_path.exists() {
            AssetCatalog::load(&catalog_path)?
        } else {
            AssetCatalog::default()
        };
        tracing::debug!(root = %root.display(), assets = catalog.len(), "opened asset catalog");
        Ok(Self {
            root,
            catalog,
            worker: IoWorker::spawn("verdant-catalog-io")?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }
}

impl ChunkDataStore for CatalogChunkStore {
    fn save(&mut self, id: ChunkId, payload: &ChunkPayload) -> Result<(), StoreError> {
        let key = asset_key(id);
        let raw = payload.encode()?;
        let blob = zstd_compress(&raw)?;
        let file = format!("{BLOB_DIR}/{key}.bin.zst");
        std::fs::write(self.root.join(&file), &blob)?;

        self.catalog.entries.insert(
            key,
            CatalogEntry {
                file,
                sha256: sha256_hex(&blob),
                raw_len: raw.len() as u64,
            },
        );
        self.catalog.save(self.root.join(CATALOG_FILE))?;
        tracing::debug!(%id, compressed = blob.len(), raw = raw.len(), "saved catalog blob");
        Ok(())
    }

    fn load(&self, id: ChunkId, cancel: CancellationToken) -> LoadFuture {
        if cancel.is_cancelled() {
            return Box::pin(std::future::ready(None));
        }
        let key = asset_key(id);
        let Some(entry) = self.catalog.get(&key).cloned() else {
            tracing::warn!(%id, error = %StoreError::NotInCatalog(key), "chunk read failed");
            return Box::pin(std::future::ready(None));
        };
        let path = self.root.join(&entry.file);
        let job_cancel = cancel.clone();
        let reply = self.worker.submit(move || {
            if job_cancel.is_cancelled() {
                return None;
            }
            Some(read_blob(&key, &path, &entry))
        });
        Box::pin(await_payload(id, cancel, reply))
    }
}

fn read_blob(key: &str, path: &Path, entry: &CatalogEntry) -> Result<ChunkPayload, StoreError> {
    let blob = std::fs::read(path)?;
    let actual = sha256_hex(&blob);
    if actual != entry.sha256 {
        return Err(StoreError::IntegrityMismatch {
            key: key.to_string(),
            expected: entry.sha256.clone(),
            actual,
        });
    }
    let raw = zstd_decompress(&blob)?;
    if raw.len() as u64 != entry.raw_len {
        return Err(StoreError::IntegrityMismatch {
            key: key.to_string(),
            expected: format!("{} bytes", entry.raw_len),
            actual: format!("{} bytes", raw.len()),
        });
    }
    Ok(ChunkPayload::decode(&raw)?)
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use verdant_common::{Aabb, GrassInstance};

    fn payload(count: usize) -> ChunkPayload {
        ChunkPayload {
            bounds: Aabb::new(Vec3::ZERO, Vec3::ONE),
            division_min: vec![Vec3::ZERO; 2],
            division_max: vec![Vec3::ONE; 2],
            instances: (0..count)
                .map(|i| GrassInstance {
                    position: [i as f32, 0.0, 0.0],
                    division_id: (i % 2) as u32,
                    ..GrassInstance::default()
                })
                .collect(),
        }
    }

    #[test]
    fn catalog_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = CatalogChunkStore::open(tmp.path()).unwrap();
        let id = ChunkId::new(2, 7);
        store.save(id, &payload(10)).unwrap();

        let entry = store.catalog().get("gid_0002_0007").unwrap();
        assert_eq!(entry.file, "blobs/gid_0002_0007.bin.zst");
        assert_eq!(entry.raw_len, payload(10).encoded_len() as u64);

        let loaded = pollster::block_on(store.load(id, CancellationToken::new()));
        assert_eq!(loaded, Some(payload(10)));
    }

    #[test]
    fn catalog_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut store = CatalogChunkStore::open(tmp.path()).unwrap();
            store.save(ChunkId::new(0, 0), &payload(1)).unwrap();
            store.save(ChunkId::new(0, 1), &payload(2)).unwrap();
        }
        let store = CatalogChunkStore::open(tmp.path()).unwrap();
        assert_eq!(store.catalog().len(), 2);
        let loaded = pollster::block_on(store.load(ChunkId::new(0, 1), CancellationToken::new()));
        assert_eq!(loaded.map(|p| p.instance_count()), Some(2));
    }

    #[test]
    fn unknown_key_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CatalogChunkStore::open(tmp.path()).unwrap();
        assert!(pollster::block_on(store.load(ChunkId::new(5, 5), CancellationToken::new())).is_none());
    }

    #[test]
    fn tampered_blob_fails_integrity_check() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = CatalogChunkStore::open(tmp.path()).unwrap();
        let id = ChunkId::new(1, 0);
        store.save(id, &payload(4)).unwrap();

        let entry = store.catalog().get(&asset_key(id)).unwrap().clone();
        let path = tmp.path().join(&entry.file);
        let mut blob = std::fs::read(&path).unwrap();
        if let Some(byte) = blob.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&path, &blob).unwrap();

        match read_blob(&asset_key(id), &path, &entry) {
            Err(StoreError::IntegrityMismatch { key, .. }) => assert_eq!(key, "gid_0001_0000"),
            other => panic!("expected IntegrityMismatch, got {other:?}"),
        }
        assert!(pollster::block_on(store.load(id, CancellationToken::new())).is_none());
    }
}
