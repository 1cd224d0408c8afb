//! Authoring: scatter grass blades over a terrain and write chunk payloads.
//!
//! # Invariants
//! - Generation is deterministic for a given seed and chunk id, whatever
//!   order chunks are produced in.
//! - Every payload has exactly one bounds pair per division, and every blade's
//!   division id indexes into it.

mod generate;
mod terrain;

pub use generate::{
    BOUNDS_PADDING, GenerateReport, GenerateSettings, assign_divisions, division_of,
    generate_chunk, generate_world,
};
pub use terrain::{FlatTerrain, Terrain, WaveTerrain};

pub fn crate_info() -> &'static str {
    "verdant-author v0.1.0"
}
