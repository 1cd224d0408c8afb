//! In-memory store with per-id gates for driving load timing from tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::Poll;

use glam::Vec3;
use verdant_common::{Aabb, CancellationToken, ChunkId, GrassInstance};
use verdant_persist::{ChunkDataStore, ChunkPayload, LoadFuture, StoreError};

#[derive(Default)]
struct Inner {
    payloads: HashMap<ChunkId, ChunkPayload>,
    held: HashSet<ChunkId>,
    requests: Vec<ChunkId>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn insert(&self, id: ChunkId, payload: ChunkPayload) {
        self.inner.lock().unwrap().payloads.insert(id, payload);
    }

    /// Keep loads of `id` pending until [`release`](Self::release).
    pub fn hold(&self, id: ChunkId) {
        self.inner.lock().unwrap().held.insert(id);
    }

    pub fn release(&self, id: ChunkId) {
        self.inner.lock().unwrap().held.remove(&id);
    }

    pub fn requests(&self) -> Vec<ChunkId> {
        self.inner.lock().unwrap().requests.clone()
    }
}

impl ChunkDataStore for MemoryStore {
    fn save(&mut self, id: ChunkId, payload: &ChunkPayload) -> Result<(), StoreError> {
        self.insert(id, payload.clone());
        Ok(())
    }

    fn load(&self, id: ChunkId, cancel: CancellationToken) -> LoadFuture {
        self.inner.lock().unwrap().requests.push(id);
        let inner = Arc::clone(&self.inner);
        Box::pin(std::future::poll_fn(move |_| {
            if cancel.is_cancelled() {
                return Poll::Ready(None);
            }
            let inner = inner.lock().unwrap();
            if inner.held.contains(&id) {
                return Poll::Pending;
            }
            Poll::Ready(inner.payloads.get(&id).cloned())
        }))
    }
}

/// `instances` blades spread over `divisions` unit divisions along +X.
pub fn payload(instances: usize, divisions: usize) -> ChunkPayload {
    let extent = instances.max(divisions).max(1) as f32;
    ChunkPayload {
        bounds: Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(extent, 1.0, 1.0)),
        division_min: vec![Vec3::new(-1.0, -1.0, -1.0); divisions],
        division_max: vec![Vec3::new(extent, 1.0, 1.0); divisions],
        instances: (0..instances)
            .map(|i| GrassInstance {
                position: [i as f32, 0.0, 0.0],
                scale: [1.0, 1.0],
                fade_distance: 0.5,
                division_id: (i % divisions.max(1)) as u32,
                ..GrassInstance::default()
            })
            .collect(),
    }
}

/// `instances` blades clustered around `center` in a single division.
pub fn payload_at(center: Vec3, instances: usize) -> ChunkPayload {
    let min = center - Vec3::new(4.0, 1.0, 4.0);
    let max = center + Vec3::new(4.0, 1.0, 4.0);
    ChunkPayload {
        bounds: Aabb::new(min, max),
        division_min: vec![min],
        division_max: vec![max],
        instances: (0..instances)
            .map(|i| GrassInstance {
                position: (center + Vec3::new(i as f32 * 0.1, 0.0, 0.0)).to_array(),
                scale: [1.0, 1.0],
                fade_distance: 1.0,
                division_id: 0,
                ..GrassInstance::default()
            })
            .collect(),
    }
}
