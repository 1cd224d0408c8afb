//! Streaming: chunk grid, chunk lifecycle and per-frame GPU culling orchestration.
//!
//! # Invariants
//! - One in-flight load or dispose per chunk id, gated by the state map.
//! - The load queue and the loading, loaded and disposing sets are pairwise
//!   disjoint at every frame boundary and agree with the state map.
//! - Dispatches only touch chunks in the loaded set; disposal only happens
//!   after removal from it.
//! - The frame loop never blocks on I/O.

mod budget;
mod chunk;
mod config;
mod grid;
mod manager;
mod pool;
mod states;

#[cfg(test)]
mod testing;

pub use budget::{FrameTimer, StreamStats};
pub use chunk::{Chunk, ChunkBuffers};
pub use config::{ConfigError, GridConfig, StreamConfig};
pub use grid::ChunkGrid;
pub use manager::{
    FrameInput, InvariantError, LodMeshes, StreamError, StreamingManager, VisibleChunk,
};
pub use pool::ChunkPool;
pub use states::ChunkStates;

pub fn crate_info() -> &'static str {
    "verdant-stream v0.1.0"
}
