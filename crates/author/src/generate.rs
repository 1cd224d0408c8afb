use glam::{Vec2, Vec3, Vec3Swizzles};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use verdant_common::{Aabb, ChunkId, DIVISION_COUNT, DIVISION_SIDE, GrassInstance};
use verdant_persist::{ChunkDataStore, ChunkPayload, StoreError};
use verdant_stream::ChunkGrid;

use crate::terrain::Terrain;

/// Padding added around every blade when growing bounds.
pub const BOUNDS_PADDING: f32 = 1.0;

/// Blade placement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateSettings {
    /// Blades per square world unit.
    pub density: f32,
    /// Horizontal scale range, inclusive.
    pub scale_xz: [f32; 2],
    /// Vertical scale range, inclusive.
    pub scale_y: [f32; 2],
    /// Fade fraction range, inside (0, 1).
    pub fade: [f32; 2],
}

impl Default for GenerateSettings {
    fn default() -> Self {
        Self {
            density: 0.5,
            scale_xz: [0.8, 1.2],
            scale_y: [0.6, 1.4],
            fade: [0.05, 0.95],
        }
    }
}

/// Summary of a [`generate_world`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateReport {
    pub chunks: usize,
    pub instances: usize,
    pub empty_chunks: usize,
}

/// Seed for one chunk, independent of generation order.
fn chunk_seed(seed: u64, id: ChunkId) -> u64 {
    let packed = ((id.x as u32 as u64) << 32) | id.y as u32 as u64;
    seed ^ packed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Division index of `point` by inverse lerp over `[area_min, area_max]`.
pub fn division_of(point: Vec2, area_min: Vec2, area_max: Vec2) -> u32 {
    let t = (point - area_min) / (area_max - area_min);
    let side = DIVISION_SIDE as f32;
    let cell = (t * side).floor().clamp(Vec2::ZERO, Vec2::splat(side - 1.0));
    cell.y as u32 * DIVISION_SIDE + cell.x as u32
}

/// Assign each blade its division over the XZ extent of `bounds` and compute
/// padded per-division bounds.
///
/// Divisions without blades keep inverted bounds so they never pass a
/// frustum test.
pub fn assign_divisions(blades: &mut [GrassInstance], bounds: &Aabb) -> (Vec<Vec3>, Vec<Vec3>) {
    let (area_min, area_max) = (bounds.min.xz(), bounds.max.xz());
    let mut divisions = vec![Aabb::empty(); DIVISION_COUNT as usize];
    for blade in blades.iter_mut() {
        let p = blade.position();
        blade.division_id = division_of(p.xz(), area_min, area_max);
        divisions[blade.division_id as usize].grow(p, BOUNDS_PADDING);
    }
    divisions.iter().map(|b| (b.min, b.max)).unzip()
}

/// Padded union of the blades, or the flat chunk rectangle when there are none.
fn chunk_bounds(blades: &[GrassInstance], rect_min: Vec2, rect_max: Vec2) -> Aabb {
    let mut bounds = Aabb::empty();
    for blade in blades {
        bounds.grow(blade.position(), BOUNDS_PADDING);
    }
    if bounds.is_valid() {
        return bounds;
    }
    Aabb::new(
        Vec3::new(rect_min.x, -BOUNDS_PADDING, rect_min.y),
        Vec3::new(rect_max.x, BOUNDS_PADDING, rect_max.y),
    )
}

/// Generate one chunk's payload.
pub fn generate_chunk(
    grid: &ChunkGrid,
    id: ChunkId,
    terrain: &dyn Terrain,
    settings: &GenerateSettings,
    seed: u64,
) -> ChunkPayload {
    let mut rng = StdRng::seed_from_u64(chunk_seed(seed, id));
    let (rect_min, rect_max) = grid.chunk_rect(id);
    let area = (rect_max - rect_min).x * (rect_max - rect_min).y;
    let attempts = (area * settings.density.max(0.0)).round() as usize;

    let mut blades = Vec::with_capacity(attempts);
    for _ in 0..attempts {
        let x = rng.random_range(rect_min.x..rect_max.x);
        let z = rng.random_range(rect_min.y..rect_max.y);
        let Some(y) = terrain.height_at(x, z) else {
            continue;
        };
        blades.push(GrassInstance {
            position: [x, y, z],
            angle_y: rng.random_range(0.0..360.0),
            scale: [
                rng.random_range(settings.scale_xz[0]..=settings.scale_xz[1]),
                rng.random_range(settings.scale_y[0]..=settings.scale_y[1]),
            ],
            fade_distance: rng.random_range(settings.fade[0]..=settings.fade[1]),
            division_id: 0,
        });
    }

    let bounds = chunk_bounds(&blades, rect_min, rect_max);
    let (division_min, division_max) = assign_divisions(&mut blades, &bounds);
    ChunkPayload {
        bounds,
        division_min,
        division_max,
        instances: blades,
    }
}

/// Generate and save every chunk of `grid`.
pub fn generate_world(
    store: &mut dyn ChunkDataStore,
    grid: &ChunkGrid,
    terrain: &dyn Terrain,
    settings: &GenerateSettings,
    seed: u64,
) -> Result<GenerateReport, StoreError> {
    let mut report = GenerateReport::default();
    for id in grid.ids() {
        let payload = generate_chunk(grid, id, terrain, settings, seed);
        store.save(id, &payload)?;
        report.chunks += 1;
        report.instances += payload.instance_count();
        if payload.instances.is_empty() {
            report.empty_chunks += 1;
        }
        tracing::debug!(%id, instances = payload.instance_count(), "generated chunk");
    }
    tracing::info!(
        chunks = report.chunks,
        instances = report.instances,
        empty = report.empty_chunks,
        "world generated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::{FlatTerrain, WaveTerrain};
    use verdant_common::CancellationToken;
    use verdant_persist::FileChunkStore;
    use verdant_stream::GridConfig;

    fn grid() -> ChunkGrid {
        ChunkGrid::new(&GridConfig {
            chunk_count: [3, 2],
            origin: Vec2::ZERO,
            chunk_size: Vec2::splat(16.0),
        })
    }

    #[test]
    fn division_index_by_inverse_lerp() {
        let min = Vec2::ZERO;
        let max = Vec2::splat(16.0);
        assert_eq!(division_of(Vec2::new(0.5, 0.5), min, max), 0);
        assert_eq!(division_of(Vec2::new(15.5, 0.5), min, max), 15);
        assert_eq!(division_of(Vec2::new(0.5, 1.5), min, max), 16);
        // The far edge clamps into the last division.
        assert_eq!(division_of(Vec2::new(16.0, 16.0), min, max), 255);
    }

    #[test]
    fn divisions_span_the_padded_bounds() {
        let blade = |x: f32, z: f32| GrassInstance {
            position: [x, 0.0, z],
            ..GrassInstance::default()
        };
        let mut blades = vec![blade(0.0, 0.0), blade(2.0, 2.0)];
        let bounds = chunk_bounds(&blades, Vec2::ZERO, Vec2::splat(16.0));
        assert_eq!(bounds.min, Vec3::splat(-1.0));
        assert_eq!(bounds.max, Vec3::new(3.0, 1.0, 3.0));

        let (min, max) = assign_divisions(&mut blades, &bounds);
        // A quarter and three quarters across the [-1, 3] extent.
        assert_eq!(blades[0].division_id, 4 * 16 + 4);
        assert_eq!(blades[1].division_id, 12 * 16 + 12);
        assert_eq!(min[68], Vec3::splat(-1.0));
        assert_eq!(max[204], Vec3::new(3.0, 1.0, 3.0));
        assert!(!Aabb::new(min[0], max[0]).is_valid());
    }

    #[test]
    fn chunk_is_valid_and_deterministic() {
        let grid = grid();
        let id = ChunkId::new(1, 1);
        let terrain = FlatTerrain { height: 2.0 };
        let settings = GenerateSettings::default();
        let a = generate_chunk(&grid, id, &terrain, &settings, 7);
        let b = generate_chunk(&grid, id, &terrain, &settings, 7);
        assert_eq!(a, b);
        assert!(a.validate().is_ok());
        assert_eq!(a.division_count(), DIVISION_COUNT as usize);
        assert_eq!(a.instance_count(), 128);

        let (rect_min, rect_max) = grid.chunk_rect(id);
        for blade in &a.instances {
            let p = blade.position();
            assert!(p.x >= rect_min.x && p.x < rect_max.x);
            assert!(p.z >= rect_min.y && p.z < rect_max.y);
            assert_eq!(p.y, 2.0);
            assert!(blade.fade_distance > 0.0 && blade.fade_distance < 1.0);
            assert!(a.bounds.contains(p));
            let d = blade.division_id as usize;
            assert!(Aabb::new(a.division_min[d], a.division_max[d]).contains(p));
        }
        assert_eq!(a.bounds.min.y, 1.0);
        assert_eq!(a.bounds.max.y, 3.0);

        let other = generate_chunk(&grid, id, &terrain, &settings, 8);
        assert_ne!(a, other);
    }

    #[test]
    fn empty_divisions_keep_inverted_bounds() {
        let grid = grid();
        let settings = GenerateSettings {
            density: 0.01,
            ..GenerateSettings::default()
        };
        let payload = generate_chunk(&grid, ChunkId::new(0, 0), &FlatTerrain { height: 0.0 }, &settings, 1);
        let empty = (0..payload.division_count())
            .filter(|d| !Aabb::new(payload.division_min[*d], payload.division_max[*d]).is_valid())
            .count();
        assert!(empty >= DIVISION_COUNT as usize - payload.instance_count());
    }

    #[test]
    fn all_water_chunk_is_empty() {
        let grid = grid();
        let terrain = WaveTerrain {
            water_level: Some(100.0),
            ..WaveTerrain::default()
        };
        let payload = generate_chunk(&grid, ChunkId::new(0, 0), &terrain, &GenerateSettings::default(), 3);
        assert!(payload.instances.is_empty());
        assert!(payload.bounds.is_valid());
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn world_round_trips_through_store() {
        let tmp = tempfile::tempdir().unwrap();
        let grid = grid();
        let mut store = FileChunkStore::open(tmp.path()).unwrap();
        let terrain = WaveTerrain::default();
        let settings = GenerateSettings {
            density: 0.1,
            ..GenerateSettings::default()
        };
        let report = generate_world(&mut store, &grid, &terrain, &settings, 42).unwrap();
        assert_eq!(report.chunks, 6);

        let id = ChunkId::new(2, 1);
        let loaded = pollster::block_on(store.load(id, CancellationToken::new())).unwrap();
        assert_eq!(loaded, generate_chunk(&grid, id, &terrain, &settings, 42));
    }
}
