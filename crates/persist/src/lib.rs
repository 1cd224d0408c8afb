//! Persistence: the binary chunk format and the stores that read and write it.
//!
//! # Invariants
//! - Encoding is deterministic: the same payload always yields the same bytes.
//! - Decoding validates sizes before allocating and rejects anything the
//!   GPU kernels could index out of bounds.
//! - Loads run on a background I/O thread and never report errors across the
//!   async boundary; they log and resolve to `None`.

mod catalog;
mod format;
mod store;
mod worker;

pub use catalog::{AssetCatalog, CatalogChunkStore, CatalogEntry};
pub use format::{ChunkPayload, FormatError, asset_key};
pub use store::{
    ChunkDataStore, FileChunkStore, LoadFuture, StorageConfig, StorageMode, StoreError,
    open_store,
};

pub fn crate_info() -> &'static str {
    "verdant-persist v0.1.0"
}
