use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::task::Poll;
use std::time::Instant;

use glam::{Mat4, Vec3};
use verdant_common::{Aabb, CancellationToken, ChunkId, ChunkState, Frustum, LodMesh, ViewerCamera};
use verdant_persist::{ChunkDataStore, StoreError, open_store};
use verdant_render::{BufferDesc, BufferHandle, ComputeBackend, FrameParams, IndirectArgs, Lod};

use crate::budget::{FrameTimer, StreamStats};
use crate::chunk::Chunk;
use crate::config::{ConfigError, StreamConfig};
use crate::grid::ChunkGrid;
use crate::pool::ChunkPool;
use crate::states::ChunkStates;

const TIMER_WINDOW: usize = 120;

/// Errors from constructing a [`StreamingManager`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A broken working-set invariant. Always a manager defect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantError {
    #[error("chunk {0} is tracked in more than one working set")]
    Duplicate(ChunkId),
    #[error("chunk tracked as {key} is bound to {bound:?}")]
    Misfiled { key: ChunkId, bound: Option<ChunkId> },
    #[error("chunk {id} in the {set} set has state {state:?}")]
    StateMismatch {
        id: ChunkId,
        set: &'static str,
        state: ChunkState,
    },
    #[error("chunk {id} holds buffers: {holds}, but is empty: {empty}")]
    BufferMismatch { id: ChunkId, holds: bool, empty: bool },
}

/// Camera inputs for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput {
    pub view_projection: Mat4,
    pub viewer_position: Vec3,
}

impl FrameInput {
    pub fn from_camera(camera: &ViewerCamera) -> Self {
        Self {
            view_projection: camera.view_projection(),
            viewer_position: camera.position,
        }
    }
}

/// Index metadata of the two blade meshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LodMeshes {
    pub near: LodMesh,
    pub mid: LodMesh,
}

/// One entry of the frame's output, in draw order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleChunk {
    pub id: ChunkId,
    pub bounds: Aabb,
    /// Manhattan distance in chunks from the viewer's chunk.
    pub distance: u32,
    pub instance_count: u32,
    pub transforms: BufferHandle,
    pub near: BufferHandle,
    pub mid: BufferHandle,
}

impl VisibleChunk {
    pub fn index_list(&self, lod: Lod) -> BufferHandle {
        match lod {
            Lod::Near => self.near,
            Lod::Mid => self.mid,
        }
    }
}

/// Streams chunks around a moving viewer and drives their culling dispatches.
///
/// Owned by the application root and driven once per frame through
/// [`update`](Self::update). Tracks every chunk in exactly one of four places:
/// the load queue, or the loading, loaded or disposing working set.
pub struct StreamingManager<B: ComputeBackend> {
    config: StreamConfig,
    grid: ChunkGrid,
    backend: B,
    store: Box<dyn ChunkDataStore>,
    states: ChunkStates,
    pool: ChunkPool,
    queue: VecDeque<Chunk>,
    loading: BTreeMap<ChunkId, Chunk>,
    loaded: BTreeMap<ChunkId, Chunk>,
    disposing: BTreeMap<ChunkId, Chunk>,
    cancel: CancellationToken,
    frame_params: BufferHandle,
    draw_args: IndirectArgs,
    visible: Vec<VisibleChunk>,
    stats: StreamStats,
    timer: FrameTimer,
    frame: u64,
    shut_down: bool,
}

impl<B: ComputeBackend> StreamingManager<B> {
    pub fn new(
        config: StreamConfig,
        mut backend: B,
        store: Box<dyn ChunkDataStore>,
        meshes: LodMeshes,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let grid = ChunkGrid::new(&config.grid);
        let frame_params = backend.create_buffer(&BufferDesc::uniform(
            "frame_params",
            std::mem::size_of::<FrameParams>() as u64,
        ));
        let draw_args = IndirectArgs::seed(&mut backend, &meshes.near, &meshes.mid);
        tracing::info!(
            chunks = grid.len(),
            radius = config.load_radius,
            budget = config.load_budget,
            "streaming manager ready"
        );
        Ok(Self {
            pool: ChunkPool::new(config.pool_capacity),
            config,
            grid,
            backend,
            store,
            states: ChunkStates::new(),
            queue: VecDeque::new(),
            loading: BTreeMap::new(),
            loaded: BTreeMap::new(),
            disposing: BTreeMap::new(),
            cancel: CancellationToken::new(),
            frame_params,
            draw_args,
            visible: Vec::new(),
            stats: StreamStats::default(),
            timer: FrameTimer::new(TIMER_WINDOW),
            frame: 0,
            shut_down: false,
        })
    }

    /// Construct with the store selected by `config.storage`.
    pub fn open(config: StreamConfig, backend: B, meshes: LodMeshes) -> Result<Self, StreamError> {
        config.validate()?;
        let store = open_store(&config.storage)?;
        Self::new(config, backend, store, meshes)
    }

    /// Advance one frame and return the visible chunks in draw order.
    pub fn update(&mut self, input: &FrameInput) -> &[VisibleChunk] {
        assert!(!self.shut_down, "update after shutdown");
        self.frame += 1;
        let _span = tracing::info_span!("stream_update", frame = self.frame).entered();
        let started = Instant::now();
        let mut stats = StreamStats {
            frame: self.frame,
            ..StreamStats::default()
        };

        let viewer = self.grid.locate(input.viewer_position);
        let target_order = self.grid.target_set(viewer, self.config.load_radius);
        let target: BTreeSet<ChunkId> = target_order.iter().copied().collect();
        stats.viewer_chunk = viewer;
        stats.target_chunks = target.len();

        self.enqueue(&target_order);
        self.poll_loading(&target, &mut stats);
        self.retire_out_of_range(&target, &mut stats);
        self.recycle_disposed();
        self.start_loads(&mut stats);

        self.visible.clear();
        if !self.loaded.is_empty() {
            let frustum = Frustum::from_view_projection(input.view_projection);
            self.collect_visible(&frustum, viewer);
            self.dispatch_culling(&frustum, input.viewer_position);
        }
        self.backend.submit();

        stats.queued = self.queue.len();
        stats.loading = self.loading.len();
        stats.loaded = self.loaded.len();
        stats.disposing = self.disposing.len();
        stats.pooled = self.pool.len();
        stats.visible_chunks = self.visible.len();
        stats.update_time = started.elapsed();
        self.timer.record(stats.update_time);
        tracing::trace!(
            viewer = %viewer,
            queued = stats.queued,
            loading = stats.loading,
            loaded = stats.loaded,
            visible = stats.visible_chunks,
            "stream update complete"
        );
        self.stats = stats;
        &self.visible
    }

    /// Queue every retryable target id, nearest first.
    fn enqueue(&mut self, target: &[ChunkId]) {
        for &id in target {
            if !self.states.get(id).is_retryable() {
                continue;
            }
            let mut chunk = self.pool.acquire();
            chunk.assign(&self.states, id);
            self.states.set(id, ChunkState::Loading);
            self.queue.push_back(chunk);
        }
    }

    /// Settle finished loads: promote, retire at once if out of range, or
    /// recycle a failed attempt so the id is retried next frame.
    fn poll_loading(&mut self, target: &BTreeSet<ChunkId>, stats: &mut StreamStats) {
        let mut still_loading = BTreeMap::new();
        for (id, mut chunk) in std::mem::take(&mut self.loading) {
            match chunk.poll_load(&mut self.states, &mut self.backend) {
                Poll::Pending => {
                    still_loading.insert(id, chunk);
                }
                Poll::Ready(ChunkState::Loaded) if target.contains(&id) => {
                    stats.loads_completed += 1;
                    self.loaded.insert(id, chunk);
                }
                Poll::Ready(ChunkState::Loaded) => {
                    stats.loads_completed += 1;
                    stats.chunks_disposed += 1;
                    tracing::debug!(%id, "loaded out of range, disposing");
                    chunk.dispose(&mut self.states, &mut self.backend, false);
                    self.disposing.insert(id, chunk);
                }
                Poll::Ready(state) => {
                    stats.loads_failed += 1;
                    tracing::debug!(%id, ?state, "load ended without data");
                    self.pool.release(chunk);
                }
            }
        }
        self.loading = still_loading;
    }

    fn retire_out_of_range(&mut self, target: &BTreeSet<ChunkId>, stats: &mut StreamStats) {
        let leaving: Vec<ChunkId> = self
            .loaded
            .keys()
            .filter(|id| !target.contains(id))
            .copied()
            .collect();
        for id in leaving {
            if let Some(mut chunk) = self.loaded.remove(&id) {
                chunk.dispose(&mut self.states, &mut self.backend, false);
                self.disposing.insert(id, chunk);
                stats.chunks_disposed += 1;
            }
        }
    }

    fn recycle_disposed(&mut self) {
        let done: Vec<ChunkId> = self
            .disposing
            .iter()
            .filter(|(_, chunk)| chunk.state(&self.states) == ChunkState::Disposed)
            .map(|(id, _)| *id)
            .collect();
        for id in done {
            if let Some(chunk) = self.disposing.remove(&id) {
                self.pool.release(chunk);
            }
        }
    }

    /// Start at most `load_budget` queued loads.
    fn start_loads(&mut self, stats: &mut StreamStats) {
        for _ in 0..self.config.load_budget {
            let Some(mut chunk) = self.queue.pop_front() else {
                break;
            };
            let Some(id) = chunk.id() else {
                self.pool.release(chunk);
                continue;
            };
            if chunk.load(&mut self.states, &*self.store, &self.cancel) {
                stats.loads_started += 1;
                self.loading.insert(id, chunk);
            } else {
                tracing::warn!(%id, state = ?self.states.peek(id), "queued chunk refused to load");
                self.pool.release(chunk);
            }
        }
    }

    /// Non-empty loaded chunks inside the frustum, nearest first.
    fn collect_visible(&mut self, frustum: &Frustum, viewer: ChunkId) {
        self.visible.extend(self.loaded.iter().filter_map(|(id, chunk)| {
            let buffers = chunk.buffers()?;
            if chunk.is_empty() || !frustum.intersects_aabb(&chunk.bounds()) {
                return None;
            }
            Some(VisibleChunk {
                id: *id,
                bounds: chunk.bounds(),
                distance: id.manhattan_distance(viewer),
                instance_count: chunk.instance_count(),
                transforms: buffers.transforms,
                near: buffers.near,
                mid: buffers.mid,
            })
        }));
        self.visible.sort_by_key(|v| (v.distance, v.id));
    }

    /// Upload frame constants once, then cull and resolve each visible chunk.
    fn dispatch_culling(&mut self, frustum: &Frustum, viewer_position: Vec3) {
        if self.visible.is_empty() {
            return;
        }
        let params = FrameParams::new(frustum, viewer_position, &self.config.cull);
        self.backend
            .write_buffer(self.frame_params, 0, bytemuck::bytes_of(&params));
        for visible in &self.visible {
            let Some(chunk) = self.loaded.get(&visible.id) else {
                continue;
            };
            chunk.cull_divisions(&self.states, &mut self.backend, self.frame_params);
            chunk.resolve_visible_instances(&self.states, &mut self.backend, self.frame_params);
        }
    }

    /// Copy a visible chunk's live `lod` count into the shared draw args and
    /// return the args buffer to draw with.
    pub fn prepare_draw(&mut self, chunk: &VisibleChunk, lod: Lod) -> BufferHandle {
        self.draw_args
            .materialize(&mut self.backend, lod, chunk.index_list(lod));
        self.draw_args.buffer(lod)
    }

    pub fn draw_args(&self) -> IndirectArgs {
        self.draw_args
    }

    /// Output of the last update.
    pub fn visible(&self) -> &[VisibleChunk] {
        &self.visible
    }

    /// Cancel every read in flight. The ids settle as `Disposed` on the next
    /// update and are queued again while still in range.
    pub fn cancel_in_flight_loads(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }

    pub fn state_of(&self, id: ChunkId) -> ChunkState {
        self.states.peek(id)
    }

    pub fn states(&self) -> &ChunkStates {
        &self.states
    }

    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn frame_timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn loaded_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.loaded.keys().copied()
    }

    pub fn loaded_chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.loaded.get(&id)
    }

    pub fn queued_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.queue.iter().filter_map(Chunk::id)
    }

    pub fn loading_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.loading.keys().copied()
    }

    /// Verify the working sets are disjoint and agree with the state map.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut seen = BTreeSet::new();
        let queued = self.queue.iter().map(|chunk| (chunk.id().unwrap_or_default(), chunk));
        let sets: [(&'static str, Box<dyn Iterator<Item = (ChunkId, &Chunk)> + '_>); 4] = [
            ("queued", Box::new(queued)),
            ("loading", Box::new(self.loading.iter().map(|(id, c)| (*id, c)))),
            ("loaded", Box::new(self.loaded.iter().map(|(id, c)| (*id, c)))),
            ("disposing", Box::new(self.disposing.iter().map(|(id, c)| (*id, c)))),
        ];
        for (set, chunks) in sets {
            for (key, chunk) in chunks {
                if chunk.id() != Some(key) {
                    return Err(InvariantError::Misfiled {
                        key,
                        bound: chunk.id(),
                    });
                }
                if !seen.insert(key) {
                    return Err(InvariantError::Duplicate(key));
                }
                let state = self.states.peek(key);
                let expected = match set {
                    "queued" | "loading" => state == ChunkState::Loading,
                    "loaded" => state == ChunkState::Loaded,
                    _ => matches!(state, ChunkState::Disposing | ChunkState::Disposed),
                };
                if !expected {
                    return Err(InvariantError::StateMismatch { id: key, set, state });
                }
                let holds = chunk.buffers().is_some();
                let should_hold = set == "loaded" && !chunk.is_empty();
                if holds != should_hold {
                    return Err(InvariantError::BufferMismatch {
                        id: key,
                        holds,
                        empty: chunk.is_empty(),
                    });
                }
            }
        }
        // Every id the map calls in-flight must be tracked somewhere.
        for (id, state) in self.states.iter() {
            if matches!(state, ChunkState::Loading | ChunkState::Loaded) && !seen.contains(&id) {
                return Err(InvariantError::StateMismatch {
                    id,
                    set: "untracked",
                    state,
                });
            }
        }
        Ok(())
    }

    /// Cancel loads, release every chunk's buffers and the shared buffers.
    /// Runs once; later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.cancel.cancel();
        let chunks: Vec<Chunk> = self
            .queue
            .drain(..)
            .chain(std::mem::take(&mut self.loading).into_values())
            .chain(std::mem::take(&mut self.loaded).into_values())
            .chain(std::mem::take(&mut self.disposing).into_values())
            .collect();
        let released = chunks.len();
        for mut chunk in chunks {
            chunk.dispose(&mut self.states, &mut self.backend, true);
            self.pool.release(chunk);
        }
        self.visible.clear();
        self.backend.release_buffer(self.frame_params);
        self.draw_args.release(&mut self.backend);
        self.backend.submit();
        tracing::info!(chunks = released, frames = self.frame, "streaming manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl<B: ComputeBackend> Drop for StreamingManager<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
