/// Opaque handle to a device buffer owned by a [`ComputeBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Read/write storage array.
    Storage,
    /// Small per-frame constant block.
    Uniform,
    /// Capped-capacity output list: a `u32` live length followed by `u32` entries.
    AppendList,
    /// Indirect draw arguments.
    IndirectArgs,
}

/// Parameters for [`ComputeBackend::create_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    /// Size in bytes, a multiple of 4.
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn storage(label: &'static str, size: u64) -> Self {
        Self {
            label,
            size,
            usage: BufferUsage::Storage,
        }
    }

    pub fn uniform(label: &'static str, size: u64) -> Self {
        Self {
            label,
            size,
            usage: BufferUsage::Uniform,
        }
    }

    /// An output list holding at most `capacity` entries.
    pub fn append_list(label: &'static str, capacity: u32) -> Self {
        Self {
            label,
            size: crate::layout::append_list_size(capacity),
            usage: BufferUsage::AppendList,
        }
    }

    pub fn indirect_args(label: &'static str) -> Self {
        Self {
            label,
            size: std::mem::size_of::<crate::layout::DrawIndexedArgs>() as u64,
            usage: BufferUsage::IndirectArgs,
        }
    }
}

/// The three culling-pipeline kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Instance record -> world transform, once per load.
    ConvertInstances,
    /// Frustum test per division.
    CullDivisions,
    /// Distance cull and LOD bucketing per instance.
    ResolveInstances,
}

impl Kernel {
    /// Shader entry point name.
    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::ConvertInstances => "convert_instances",
            Kernel::CullDivisions => "cull_divisions",
            Kernel::ResolveInstances => "resolve_instances",
        }
    }
}

/// One kernel launch with its bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    ConvertInstances {
        instances: BufferHandle,
        transforms: BufferHandle,
        workgroups: u32,
    },
    CullDivisions {
        frame: BufferHandle,
        bounds_min: BufferHandle,
        bounds_max: BufferHandle,
        results: BufferHandle,
        workgroups: u32,
    },
    ResolveInstances {
        frame: BufferHandle,
        instances: BufferHandle,
        division_results: BufferHandle,
        near: BufferHandle,
        mid: BufferHandle,
        workgroups: u32,
    },
}

impl Dispatch {
    pub fn kernel(&self) -> Kernel {
        match self {
            Dispatch::ConvertInstances { .. } => Kernel::ConvertInstances,
            Dispatch::CullDivisions { .. } => Kernel::CullDivisions,
            Dispatch::ResolveInstances { .. } => Kernel::ResolveInstances,
        }
    }

    pub fn workgroups(&self) -> u32 {
        match *self {
            Dispatch::ConvertInstances { workgroups, .. }
            | Dispatch::CullDivisions { workgroups, .. }
            | Dispatch::ResolveInstances { workgroups, .. } => workgroups,
        }
    }
}

/// Device interface the streamer drives.
///
/// Commands are recorded in call order and become visible to the device no
/// later than the next [`submit`](ComputeBackend::submit). Using a handle
/// after releasing it is a caller bug and may panic.
pub trait ComputeBackend {
    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferHandle;

    /// Copy `data` into `buffer` at byte `offset`.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn release_buffer(&mut self, buffer: BufferHandle);

    /// Set an append list's live length to zero.
    fn reset_append_list(&mut self, list: BufferHandle);

    fn dispatch(&mut self, dispatch: &Dispatch);

    /// Copy an append list's live length into the instance-count slot of `args`.
    fn materialize_count(&mut self, list: BufferHandle, args: BufferHandle);

    /// Flush recorded work to the device.
    fn submit(&mut self);
}
