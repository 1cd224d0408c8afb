use glam::{IVec2, Vec2, Vec3};
use verdant_common::ChunkId;

use crate::config::GridConfig;

/// Fixed-size grid of chunks on the XZ plane.
///
/// Valid ids are `[0, count_x) × [0, count_y)`. Position to id is one affine
/// transform, never a search.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkGrid {
    count: [u32; 2],
    origin: Vec2,
    chunk_size: Vec2,
}

impl ChunkGrid {
    pub fn new(config: &GridConfig) -> Self {
        assert!(
            config.chunk_size.x > 0.0 && config.chunk_size.y > 0.0,
            "chunk_size must be positive"
        );
        Self {
            count: config.chunk_count,
            origin: config.origin,
            chunk_size: config.chunk_size,
        }
    }

    pub fn chunk_count(&self) -> [u32; 2] {
        self.count
    }

    pub fn chunk_size(&self) -> Vec2 {
        self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.count[0] as usize * self.count[1] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// World XZ of the corner of chunk (0, 0).
    fn min_corner(&self) -> Vec2 {
        let extent = Vec2::new(self.count[0] as f32, self.count[1] as f32) * self.chunk_size;
        self.origin - extent * 0.5
    }

    /// Chunk containing `position`. May lie outside the grid.
    pub fn locate(&self, position: Vec3) -> ChunkId {
        let local = (Vec2::new(position.x, position.z) - self.min_corner()) / self.chunk_size;
        let cell: IVec2 = local.floor().as_ivec2();
        ChunkId::new(cell.x, cell.y)
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        id.x >= 0 && id.y >= 0 && (id.x as u32) < self.count[0] && (id.y as u32) < self.count[1]
    }

    /// World XZ rectangle covered by `id`, as `(min, max)`.
    pub fn chunk_rect(&self, id: ChunkId) -> (Vec2, Vec2) {
        let min = self.min_corner() + Vec2::new(id.x as f32, id.y as f32) * self.chunk_size;
        (min, min + self.chunk_size)
    }

    pub fn chunk_center(&self, id: ChunkId) -> Vec3 {
        let (min, max) = self.chunk_rect(id);
        let c = (min + max) * 0.5;
        Vec3::new(c.x, 0.0, c.y)
    }

    /// Every valid id, row by row.
    pub fn ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        (0..self.count[1] as i32)
            .flat_map(move |y| (0..self.count[0] as i32).map(move |x| ChunkId::new(x, y)))
    }

    /// Ids within Manhattan `radius` of `center`, clipped to the grid.
    ///
    /// Ordered nearest first, ties by id, so load order is reproducible.
    pub fn target_set(&self, center: ChunkId, radius: u32) -> Vec<ChunkId> {
        // Walk only the part of the diamond that overlaps the grid.
        let r = i64::from(radius);
        let (cx, cy) = (i64::from(center.x), i64::from(center.y));
        let last_x = i64::from(self.count[0]) - 1;
        let last_y = i64::from(self.count[1]) - 1;
        let mut ids = Vec::new();
        for dy in (-r).max(-cy)..=r.min(last_y - cy) {
            let span = r - dy.abs();
            for dx in (-span).max(-cx)..=span.min(last_x - cx) {
                ids.push(ChunkId::new((cx + dx) as i32, (cy + dy) as i32));
            }
        }
        ids.sort_by_key(|id| (id.manhattan_distance(center), *id));
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(count: [u32; 2]) -> ChunkGrid {
        ChunkGrid::new(&GridConfig {
            chunk_count: count,
            origin: Vec2::ZERO,
            chunk_size: Vec2::splat(10.0),
        })
    }

    #[test]
    fn locate_is_affine() {
        let grid = grid([4, 4]);
        // Grid spans [-20, 20) on both axes.
        assert_eq!(grid.locate(Vec3::new(-20.0, 5.0, -20.0)), ChunkId::new(0, 0));
        assert_eq!(grid.locate(Vec3::new(-0.5, 0.0, 0.5)), ChunkId::new(1, 2));
        assert_eq!(grid.locate(Vec3::new(19.9, 0.0, 19.9)), ChunkId::new(3, 3));
        assert_eq!(grid.locate(Vec3::new(-25.0, 0.0, 45.0)), ChunkId::new(-1, 6));
    }

    #[test]
    fn locate_honours_origin() {
        let grid = ChunkGrid::new(&GridConfig {
            chunk_count: [2, 2],
            origin: Vec2::new(100.0, -50.0),
            chunk_size: Vec2::new(8.0, 4.0),
        });
        assert_eq!(grid.locate(Vec3::new(100.0, 0.0, -50.0)), ChunkId::new(1, 1));
        assert_eq!(grid.locate(Vec3::new(93.0, 0.0, -53.0)), ChunkId::new(0, 0));
        let (min, max) = grid.chunk_rect(ChunkId::new(0, 0));
        assert_eq!(min, Vec2::new(92.0, -54.0));
        assert_eq!(max, Vec2::new(100.0, -50.0));
    }

    #[test]
    fn target_set_at_corner_is_clipped_diamond() {
        let grid = grid([8, 8]);
        let ids = grid.target_set(ChunkId::new(0, 0), 1);
        assert_eq!(ids, vec![ChunkId::new(0, 0), ChunkId::new(0, 1), ChunkId::new(1, 0)]);
    }

    #[test]
    fn target_set_is_a_diamond_not_a_square() {
        let grid = grid([16, 16]);
        let center = ChunkId::new(8, 8);
        let ids = grid.target_set(center, 2);
        assert_eq!(ids.len(), 13);
        assert!(ids.iter().all(|id| id.manhattan_distance(center) <= 2));
        assert!(!ids.contains(&ChunkId::new(10, 10)));
        assert_eq!(ids[0], center);
    }

    #[test]
    fn target_set_is_symmetric_and_in_bounds() {
        let grid = grid([5, 7]);
        for radius in 0..5 {
            for center in [ChunkId::new(2, 3), ChunkId::new(0, 6), ChunkId::new(-2, 1)] {
                let ids = grid.target_set(center, radius);
                assert!(ids.iter().all(|id| grid.contains(*id)));
                for id in &ids {
                    let mirrored = ChunkId::new(2 * center.x - id.x, 2 * center.y - id.y);
                    if grid.contains(mirrored) {
                        assert!(ids.contains(&mirrored), "{mirrored} missing for r={radius}");
                    }
                }
            }
        }
    }

    #[test]
    fn off_grid_viewer_still_reaches_edge() {
        let grid = grid([4, 4]);
        assert!(grid.target_set(ChunkId::new(-3, 0), 2).is_empty());
        assert_eq!(grid.target_set(ChunkId::new(-2, 0), 2), vec![ChunkId::new(0, 0)]);
    }

    #[test]
    fn huge_radius_is_bounded_by_grid() {
        let grid = grid([4, 4]);
        let ids = grid.target_set(ChunkId::new(1, 1), u32::MAX);
        assert_eq!(ids.len(), 16);
        assert_eq!(ids[0], ChunkId::new(1, 1));
        assert_eq!(grid.target_set(ChunkId::new(-50_000, 2), 20_000), Vec::new());
    }

    #[test]
    fn ids_cover_grid() {
        let grid = grid([3, 2]);
        let ids: Vec<_> = grid.ids().collect();
        assert_eq!(ids.len(), grid.len());
        assert!(ids.iter().all(|id| grid.contains(*id)));
    }
}
