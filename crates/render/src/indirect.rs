use verdant_common::LodMesh;

use crate::backend::{BufferDesc, BufferHandle, ComputeBackend};
use crate::layout::DrawIndexedArgs;

/// Detail tier of a blade mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lod {
    Near,
    Mid,
}

impl Lod {
    pub const ALL: [Lod; 2] = [Lod::Near, Lod::Mid];
}

/// The two shared indirect-draw argument records, one per LOD.
///
/// Seeded once from mesh metadata; only the instance-count slot changes
/// afterwards, copied from a chunk's append list right before its draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectArgs {
    near: BufferHandle,
    mid: BufferHandle,
}

impl IndirectArgs {
    pub fn seed(backend: &mut dyn ComputeBackend, near: &LodMesh, mid: &LodMesh) -> Self {
        let args = Self {
            near: backend.create_buffer(&BufferDesc::indirect_args("near_draw_args")),
            mid: backend.create_buffer(&BufferDesc::indirect_args("mid_draw_args")),
        };
        for (buffer, mesh) in [(args.near, near), (args.mid, mid)] {
            let record = DrawIndexedArgs::from_mesh(mesh);
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&record));
        }
        tracing::debug!(
            near_indices = near.index_count,
            mid_indices = mid.index_count,
            "seeded indirect draw args"
        );
        args
    }

    pub fn buffer(&self, lod: Lod) -> BufferHandle {
        match lod {
            Lod::Near => self.near,
            Lod::Mid => self.mid,
        }
    }

    /// Copy `list`'s live length into the `lod` record.
    pub fn materialize(&self, backend: &mut dyn ComputeBackend, lod: Lod, list: BufferHandle) {
        backend.materialize_count(list, self.buffer(lod));
    }

    pub fn release(self, backend: &mut dyn ComputeBackend) {
        backend.release_buffer(self.near);
        backend.release_buffer(self.mid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessBackend;

    #[test]
    fn seeds_both_records() {
        let mut backend = HeadlessBackend::new();
        let near = LodMesh {
            index_count: 120,
            first_index: 0,
            base_vertex: 0,
        };
        let mid = LodMesh {
            index_count: 30,
            first_index: 120,
            base_vertex: 40,
        };
        let args = IndirectArgs::seed(&mut backend, &near, &mid);
        let record = backend.read_draw_args(args.buffer(Lod::Mid));
        assert_eq!(record.index_count, 30);
        assert_eq!(record.first_index, 120);
        assert_eq!(record.base_vertex, 40);
        assert_eq!(record.instance_count, 0);

        let list = backend.create_buffer(&BufferDesc::append_list("list", 8));
        backend.write_buffer(list, 0, bytemuck::bytes_of(&5u32));
        args.materialize(&mut backend, Lod::Near, list);
        assert_eq!(backend.read_draw_args(args.buffer(Lod::Near)).instance_count, 5);
        assert_eq!(backend.read_draw_args(args.buffer(Lod::Near)).index_count, 120);

        args.release(&mut backend);
        assert_eq!(backend.live_buffers(), 1);
    }
}
