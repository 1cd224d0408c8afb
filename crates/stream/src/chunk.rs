use std::task::{Context, Poll, Waker};

use verdant_common::{Aabb, CancellationToken, ChunkId, ChunkState, GrassInstance, workgroups_for};
use verdant_persist::{ChunkDataStore, ChunkPayload, LoadFuture};
use verdant_render::layout::{PACKED_VEC3_SIZE, RESULT_SIZE, TRANSFORM_SIZE, pack_bounds};
use verdant_render::{BufferDesc, BufferHandle, ComputeBackend, Dispatch};

use crate::states::ChunkStates;

/// Device buffers of one loaded, non-empty chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBuffers {
    pub instances: BufferHandle,
    pub bounds_min: BufferHandle,
    pub bounds_max: BufferHandle,
    pub division_results: BufferHandle,
    pub transforms: BufferHandle,
    pub near: BufferHandle,
    pub mid: BufferHandle,
}

impl ChunkBuffers {
    fn allocate(backend: &mut dyn ComputeBackend, instances: u32, divisions: u32) -> Self {
        let n = instances as u64;
        let d = divisions as u64;
        Self {
            instances: backend.create_buffer(&BufferDesc::storage(
                "chunk_instances",
                n * GrassInstance::BYTE_SIZE as u64,
            )),
            bounds_min: backend.create_buffer(&BufferDesc::storage("division_min", d * PACKED_VEC3_SIZE)),
            bounds_max: backend.create_buffer(&BufferDesc::storage("division_max", d * PACKED_VEC3_SIZE)),
            division_results: backend.create_buffer(&BufferDesc::storage("division_results", d * RESULT_SIZE)),
            transforms: backend.create_buffer(&BufferDesc::storage("instance_transforms", n * TRANSFORM_SIZE)),
            near: backend.create_buffer(&BufferDesc::append_list("near_indices", instances)),
            mid: backend.create_buffer(&BufferDesc::append_list("mid_indices", instances)),
        }
    }

    fn release(self, backend: &mut dyn ComputeBackend) {
        for handle in [
            self.instances,
            self.bounds_min,
            self.bounds_max,
            self.division_results,
            self.transforms,
            self.near,
            self.mid,
        ] {
            backend.release_buffer(handle);
        }
    }
}

/// An in-flight payload read, polled once per frame.
struct LoadTask {
    future: LoadFuture,
    cancel: CancellationToken,
}

impl LoadTask {
    fn poll(&mut self) -> Poll<Option<ChunkPayload>> {
        let mut cx = Context::from_waker(Waker::noop());
        match self.future.as_mut().poll(&mut cx) {
            Poll::Pending if self.cancel.is_cancelled() => Poll::Ready(None),
            other => other,
        }
    }
}

/// One chunk's device-resident data.
///
/// A chunk is bound to at most one id at a time. Its lifecycle state lives in
/// [`ChunkStates`]; every transition goes through that map.
#[derive(Default)]
pub struct Chunk {
    id: Option<ChunkId>,
    bounds: Aabb,
    instance_count: u32,
    division_count: u32,
    buffers: Option<ChunkBuffers>,
    task: Option<LoadTask>,
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("instance_count", &self.instance_count)
            .field("division_count", &self.division_count)
            .field("buffers", &self.buffers)
            .field("loading", &self.task.is_some())
            .finish()
    }
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<ChunkId> {
        self.id
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn division_count(&self) -> u32 {
        self.division_count
    }

    pub fn buffers(&self) -> Option<&ChunkBuffers> {
        self.buffers.as_ref()
    }

    /// True for a chunk with no instances; it skips every GPU step.
    pub fn is_empty(&self) -> bool {
        self.instance_count == 0
    }

    pub fn is_load_in_flight(&self) -> bool {
        self.task.is_some()
    }

    /// State of the bound id, or `None` when unbound.
    pub fn state(&self, states: &ChunkStates) -> ChunkState {
        self.id.map_or(ChunkState::None, |id| states.peek(id))
    }

    /// Bind to `id`. The state map is left untouched.
    pub fn assign(&mut self, states: &ChunkStates, id: ChunkId) {
        let state = self.state(states);
        assert!(
            !matches!(state, ChunkState::Loading | ChunkState::Disposing),
            "cannot reassign chunk {:?} while {state:?}",
            self.id
        );
        self.id = Some(id);
    }

    /// Forget the bound id before returning to a pool.
    pub(crate) fn unbind(&mut self) {
        assert!(self.buffers.is_none(), "chunk {:?} unbound while holding buffers", self.id);
        assert!(self.task.is_none(), "chunk {:?} unbound with a load in flight", self.id);
        self.id = None;
    }

    /// Start reading this chunk's payload.
    ///
    /// A no-op returning `false` when the chunk is already loaded, being
    /// disposed, or has a read in flight.
    pub fn load(
        &mut self,
        states: &mut ChunkStates,
        store: &dyn ChunkDataStore,
        cancel: &CancellationToken,
    ) -> bool {
        let id = self.bound_id();
        let state = states.get(id);
        if matches!(state, ChunkState::Loaded | ChunkState::Disposing) || self.task.is_some() {
            return false;
        }
        states.set(id, ChunkState::Loading);
        self.task = Some(LoadTask {
            future: store.load(id, cancel.clone()),
            cancel: cancel.clone(),
        });
        true
    }

    /// Drive an in-flight read; on completion upload it and settle the state.
    ///
    /// Returns `Ready` with the settled state, which is `Loaded` on success
    /// and `Disposed` when the read was cancelled or produced nothing.
    pub fn poll_load(
        &mut self,
        states: &mut ChunkStates,
        backend: &mut dyn ComputeBackend,
    ) -> Poll<ChunkState> {
        let Some(task) = self.task.as_mut() else {
            return Poll::Ready(self.state(states));
        };
        let payload = match task.poll() {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(payload) => payload,
        };
        let cancel = task.cancel.clone();
        self.task = None;
        self.finish_load(states, backend, payload, &cancel);
        Poll::Ready(self.state(states))
    }

    fn finish_load(
        &mut self,
        states: &mut ChunkStates,
        backend: &mut dyn ComputeBackend,
        payload: Option<ChunkPayload>,
        cancel: &CancellationToken,
    ) {
        let id = self.bound_id();
        let payload = match payload {
            Some(payload) if !cancel.is_cancelled() => payload,
            _ => {
                states.set(id, ChunkState::Disposed);
                return;
            }
        };

        self.bounds = payload.bounds;
        self.instance_count = payload.instance_count() as u32;
        self.division_count = payload.division_count() as u32;
        if let Some(stale) = self.buffers.take() {
            stale.release(backend);
        }

        if self.is_empty() {
            tracing::debug!(%id, "empty chunk loaded");
            states.set(id, ChunkState::Loaded);
            return;
        }

        let buffers = ChunkBuffers::allocate(backend, self.instance_count, self.division_count);
        backend.write_buffer(buffers.instances, 0, bytemuck::cast_slice(&payload.instances));
        backend.write_buffer(
            buffers.bounds_min,
            0,
            bytemuck::cast_slice(&pack_bounds(&payload.division_min)),
        );
        backend.write_buffer(
            buffers.bounds_max,
            0,
            bytemuck::cast_slice(&pack_bounds(&payload.division_max)),
        );
        backend.dispatch(&Dispatch::ConvertInstances {
            instances: buffers.instances,
            transforms: buffers.transforms,
            workgroups: workgroups_for(self.instance_count),
        });
        self.buffers = Some(buffers);
        tracing::debug!(
            %id,
            instances = self.instance_count,
            divisions = self.division_count,
            "chunk uploaded"
        );
        states.set(id, ChunkState::Loaded);
    }

    /// Release device buffers.
    ///
    /// Does nothing unless the chunk is loaded or `force` is set; calling it
    /// again on a disposed chunk is harmless. Forcing also drops any read in
    /// flight.
    pub fn dispose(&mut self, states: &mut ChunkStates, backend: &mut dyn ComputeBackend, force: bool) {
        let Some(id) = self.id else {
            return;
        };
        if states.get(id) != ChunkState::Loaded && !force {
            return;
        }
        states.set(id, ChunkState::Disposing);
        self.task = None;
        if let Some(buffers) = self.buffers.take() {
            buffers.release(backend);
        }
        self.instance_count = 0;
        self.division_count = 0;
        states.set(id, ChunkState::Disposed);
    }

    /// Frustum-test every division into the division result buffer.
    pub fn cull_divisions(&self, states: &ChunkStates, backend: &mut dyn ComputeBackend, frame: BufferHandle) {
        let buffers = self.dispatchable(states);
        backend.dispatch(&Dispatch::CullDivisions {
            frame,
            bounds_min: buffers.bounds_min,
            bounds_max: buffers.bounds_max,
            results: buffers.division_results,
            workgroups: workgroups_for(self.division_count),
        });
    }

    /// Rebuild the near and mid index lists from the division results.
    pub fn resolve_visible_instances(
        &self,
        states: &ChunkStates,
        backend: &mut dyn ComputeBackend,
        frame: BufferHandle,
    ) {
        let buffers = self.dispatchable(states);
        backend.reset_append_list(buffers.near);
        backend.reset_append_list(buffers.mid);
        backend.dispatch(&Dispatch::ResolveInstances {
            frame,
            instances: buffers.instances,
            division_results: buffers.division_results,
            near: buffers.near,
            mid: buffers.mid,
            workgroups: workgroups_for(self.instance_count),
        });
    }

    fn dispatchable(&self, states: &ChunkStates) -> &ChunkBuffers {
        let state = self.state(states);
        assert_eq!(state, ChunkState::Loaded, "dispatch on chunk {:?} in state {state:?}", self.id);
        match &self.buffers {
            Some(buffers) => buffers,
            None => panic!("dispatch on empty chunk {:?}", self.id),
        }
    }

    fn bound_id(&self) -> ChunkId {
        match self.id {
            Some(id) => id,
            None => panic!("chunk used before assign"),
        }
    }
}
