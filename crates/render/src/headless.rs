//! A [`ComputeBackend`] that keeps buffers in host memory and runs the kernels
//! on the CPU, one simulated invocation per thread of each workgroup.

use std::collections::HashMap;

use glam::{Mat4, Vec3};
use verdant_common::{GrassInstance, WORKGROUP_SIZE};

use crate::backend::{BufferDesc, BufferHandle, BufferUsage, ComputeBackend, Dispatch};
use crate::kernels;
use crate::layout::{DrawIndexedArgs, FrameParams, INSTANCE_COUNT_OFFSET};

/// Allocation and command counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub allocations: u64,
    pub releases: u64,
    pub dispatches: u64,
    pub submits: u64,
}

impl BackendStats {
    pub fn live_buffers(&self) -> u64 {
        self.allocations - self.releases
    }
}

struct HostBuffer {
    desc: BufferDesc,
    // u32 storage keeps every typed view 4-byte aligned.
    words: Vec<u32>,
}

impl HostBuffer {
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }
}

/// CPU backend for tests, tools and machines without a GPU.
#[derive(Default)]
pub struct HeadlessBackend {
    buffers: HashMap<BufferHandle, HostBuffer>,
    next_handle: u32,
    stats: BackendStats,
    log: Vec<Dispatch>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> BackendStats {
        self.stats
    }

    /// Number of buffers created and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Total bytes held by live buffers.
    pub fn live_bytes(&self) -> u64 {
        self.buffers.values().map(|b| b.desc.size).sum()
    }

    /// Every dispatch recorded so far, in order.
    pub fn dispatch_log(&self) -> &[Dispatch] {
        &self.log
    }

    pub fn clear_dispatch_log(&mut self) {
        self.log.clear();
    }

    pub fn is_live(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(&handle)
    }

    pub fn desc(&self, handle: BufferHandle) -> Option<&BufferDesc> {
        self.buffers.get(&handle).map(|b| &b.desc)
    }

    pub fn read_words(&self, handle: BufferHandle) -> &[u32] {
        &self.buffer(handle).words
    }

    /// Entries currently in an append list.
    pub fn append_list_contents(&self, list: BufferHandle) -> Vec<u32> {
        let words = self.read_words(list);
        let (count, entries) = words.split_first().map_or((0, &[][..]), |(c, e)| (*c, e));
        entries[..(count as usize).min(entries.len())].to_vec()
    }

    pub fn read_transforms(&self, handle: BufferHandle) -> Vec<Mat4> {
        let floats: &[f32] = bytemuck::cast_slice(self.read_words(handle));
        floats.chunks_exact(16).map(Mat4::from_cols_slice).collect()
    }

    pub fn read_draw_args(&self, handle: BufferHandle) -> DrawIndexedArgs {
        let bytes = self.buffer(handle).bytes();
        bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<DrawIndexedArgs>()])
    }

    fn buffer(&self, handle: BufferHandle) -> &HostBuffer {
        match self.buffers.get(&handle) {
            Some(buffer) => buffer,
            None => panic!("buffer {handle:?} is not live"),
        }
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> &mut HostBuffer {
        match self.buffers.get_mut(&handle) {
            Some(buffer) => buffer,
            None => panic!("buffer {handle:?} is not live"),
        }
    }

    fn frame_params(&self, handle: BufferHandle) -> FrameParams {
        let bytes = self.buffer(handle).bytes();
        bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<FrameParams>()])
    }

    fn instances(&self, handle: BufferHandle) -> Vec<GrassInstance> {
        let bytes = self.buffer(handle).bytes();
        bytes
            .chunks_exact(GrassInstance::BYTE_SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    fn packed_vec3s(&self, handle: BufferHandle) -> Vec<Vec3> {
        let floats: &[f32] = bytemuck::cast_slice(self.read_words(handle));
        floats
            .chunks_exact(4)
            .map(|v| Vec3::new(v[0], v[1], v[2]))
            .collect()
    }

    fn append(&mut self, list: BufferHandle, value: u32) {
        let words = &mut self.buffer_mut(list).words;
        let slot = words[0] as usize;
        words[0] += 1;
        if let Some(entry) = words.get_mut(1 + slot) {
            *entry = value;
        }
    }

    fn run(&mut self, dispatch: &Dispatch) {
        let threads = (dispatch.workgroups() * WORKGROUP_SIZE) as usize;
        match *dispatch {
            Dispatch::ConvertInstances {
                instances,
                transforms,
                ..
            } => {
                let blades = self.instances(instances);
                let out = &mut self.buffer_mut(transforms).words;
                let n = blades.len().min(out.len() / 16).min(threads);
                for (i, blade) in blades.iter().take(n).enumerate() {
                    let cols = kernels::instance_transform(blade).to_cols_array();
                    out[i * 16..(i + 1) * 16].copy_from_slice(bytemuck::cast_slice(&cols));
                }
            }
            Dispatch::CullDivisions {
                frame,
                bounds_min,
                bounds_max,
                results,
                ..
            } => {
                let frustum = self.frame_params(frame).frustum();
                let mins = self.packed_vec3s(bounds_min);
                let maxs = self.packed_vec3s(bounds_max);
                let out = &mut self.buffer_mut(results).words;
                let n = mins.len().min(maxs.len()).min(out.len()).min(threads);
                for i in 0..n {
                    out[i] = kernels::division_visible(&frustum, mins[i], maxs[i]) as u32;
                }
            }
            Dispatch::ResolveInstances {
                frame,
                instances,
                division_results,
                near,
                mid,
                ..
            } => {
                let params = self.frame_params(frame);
                let (viewer, cull) = (params.viewer(), params.cull());
                let blades = self.instances(instances);
                let visible = self.read_words(division_results).to_vec();
                for (i, blade) in blades.iter().enumerate().take(threads) {
                    let division = visible.get(blade.division_id as usize).copied();
                    if division.unwrap_or(0) == 0 {
                        continue;
                    }
                    let (to_near, to_mid) = kernels::classify(blade, viewer, &cull);
                    if to_near {
                        self.append(near, i as u32);
                    }
                    if to_mid {
                        self.append(mid, i as u32);
                    }
                }
            }
        }
    }
}

impl ComputeBackend for HeadlessBackend {
    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferHandle {
        assert!(desc.size % 4 == 0, "buffer {} size {} is not word aligned", desc.label, desc.size);
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(
            handle,
            HostBuffer {
                desc: *desc,
                words: vec![0; (desc.size / 4) as usize],
            },
        );
        self.stats.allocations += 1;
        handle
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let target = self.buffer_mut(buffer);
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut target.words);
        let start = offset as usize;
        let end = start + data.len();
        assert!(
            end <= bytes.len(),
            "write of {} bytes at {offset} overflows buffer {}",
            data.len(),
            target.desc.label
        );
        bytes[start..end].copy_from_slice(data);
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_none() {
            panic!("double release of buffer {buffer:?}");
        }
        self.stats.releases += 1;
    }

    fn reset_append_list(&mut self, list: BufferHandle) {
        let target = self.buffer_mut(list);
        assert_eq!(target.desc.usage, BufferUsage::AppendList);
        target.words[0] = 0;
    }

    fn dispatch(&mut self, dispatch: &Dispatch) {
        self.stats.dispatches += 1;
        self.log.push(*dispatch);
        self.run(dispatch);
    }

    fn materialize_count(&mut self, list: BufferHandle, args: BufferHandle) {
        let count = self.read_words(list)[0];
        self.write_buffer(args, INSTANCE_COUNT_OFFSET, bytemuck::bytes_of(&count));
    }

    fn submit(&mut self) {
        self.stats.submits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{RESULT_SIZE, TRANSFORM_SIZE, pack_bounds};
    use verdant_common::{CullSettings, Frustum, workgroups_for};

    fn upload<T: bytemuck::Pod>(backend: &mut HeadlessBackend, label: &'static str, data: &[T]) -> BufferHandle {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let handle = backend.create_buffer(&BufferDesc::storage(label, bytes.len() as u64));
        backend.write_buffer(handle, 0, bytes);
        handle
    }

    #[test]
    fn release_tracks_live_buffers() {
        let mut backend = HeadlessBackend::new();
        let a = backend.create_buffer(&BufferDesc::storage("a", 16));
        let b = backend.create_buffer(&BufferDesc::append_list("b", 4));
        assert_eq!(backend.live_buffers(), 2);
        assert_eq!(backend.live_bytes(), 16 + 20);
        backend.release_buffer(a);
        assert!(!backend.is_live(a));
        assert!(backend.is_live(b));
        assert_eq!(backend.stats().live_buffers(), 1);
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn double_release_panics() {
        let mut backend = HeadlessBackend::new();
        let a = backend.create_buffer(&BufferDesc::storage("a", 4));
        backend.release_buffer(a);
        backend.release_buffer(a);
    }

    #[test]
    fn append_list_ignores_writes_past_capacity() {
        let mut backend = HeadlessBackend::new();
        let list = backend.create_buffer(&BufferDesc::append_list("list", 2));
        for value in [7, 8, 9] {
            backend.append(list, value);
        }
        assert_eq!(backend.append_list_contents(list), vec![7, 8]);
        backend.reset_append_list(list);
        assert!(backend.append_list_contents(list).is_empty());
    }

    #[test]
    fn full_pipeline_on_cpu() {
        let mut backend = HeadlessBackend::new();
        let blades = [
            GrassInstance {
                position: [0.0, 0.0, -5.0],
                scale: [1.0, 1.0],
                fade_distance: 0.5,
                division_id: 0,
                ..GrassInstance::default()
            },
            GrassInstance {
                position: [0.0, 0.0, -30.0],
                scale: [1.0, 1.0],
                fade_distance: 0.5,
                division_id: 0,
                ..GrassInstance::default()
            },
            GrassInstance {
                position: [0.0, 0.0, 30.0],
                scale: [1.0, 1.0],
                fade_distance: 0.5,
                division_id: 1,
                ..GrassInstance::default()
            },
        ];
        let instances = upload(&mut backend, "instances", &blades);
        let transforms = backend.create_buffer(&BufferDesc::storage("transforms", 3 * TRANSFORM_SIZE));
        backend.dispatch(&Dispatch::ConvertInstances {
            instances,
            transforms,
            workgroups: workgroups_for(3),
        });
        let mats = backend.read_transforms(transforms);
        assert_eq!(mats.len(), 3);
        assert_eq!(mats[1].w_axis.truncate(), Vec3::new(0.0, 0.0, -30.0));

        let bounds_min = upload(
            &mut backend,
            "min",
            &pack_bounds(&[Vec3::new(-1.0, -1.0, -40.0), Vec3::new(-1.0, -1.0, 20.0)]),
        );
        let bounds_max = upload(
            &mut backend,
            "max",
            &pack_bounds(&[Vec3::new(1.0, 1.0, -1.0), Vec3::new(1.0, 1.0, 40.0)]),
        );
        let results = backend.create_buffer(&BufferDesc::storage("results", 2 * RESULT_SIZE));

        // Camera at the origin looking down -Z.
        let vp = Mat4::perspective_rh(1.2, 1.0, 0.1, 200.0);
        let params = FrameParams::new(
            &Frustum::from_view_projection(vp),
            Vec3::ZERO,
            &CullSettings::default(),
        );
        let frame = backend.create_buffer(&BufferDesc::uniform("frame", 128));
        backend.write_buffer(frame, 0, bytemuck::bytes_of(&params));

        backend.dispatch(&Dispatch::CullDivisions {
            frame,
            bounds_min,
            bounds_max,
            results,
            workgroups: 1,
        });
        assert_eq!(backend.read_words(results), &[1, 0]);

        let near = backend.create_buffer(&BufferDesc::append_list("near", 3));
        let mid = backend.create_buffer(&BufferDesc::append_list("mid", 3));
        backend.dispatch(&Dispatch::ResolveInstances {
            frame,
            instances,
            division_results: results,
            near,
            mid,
            workgroups: 1,
        });
        assert_eq!(backend.append_list_contents(near), vec![0]);
        assert_eq!(backend.append_list_contents(mid), vec![1]);

        let args = backend.create_buffer(&BufferDesc::indirect_args("args"));
        backend.materialize_count(mid, args);
        assert_eq!(backend.read_draw_args(args).instance_count, 1);
        assert_eq!(backend.stats().dispatches, 3);
        assert_eq!(backend.dispatch_log().len(), 3);
    }
}
