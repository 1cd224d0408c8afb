use std::collections::HashMap;

use verdant_render::{BufferDesc, BufferHandle, BufferUsage, ComputeBackend, Dispatch, Kernel};
use verdant_render::layout::INSTANCE_COUNT_OFFSET;

use crate::shaders;

/// Errors raised while acquiring or reading from a device.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,
    #[error("device request failed: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("buffer readback failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("readback channel closed")]
    ReadbackClosed,
}

struct DeviceBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

/// [`ComputeBackend`] on a wgpu device.
///
/// Commands collect in one encoder until [`submit`](ComputeBackend::submit).
/// Host writes flush the open encoder first so they land after every
/// previously recorded command.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    convert_pipeline: wgpu::ComputePipeline,
    cull_pipeline: wgpu::ComputePipeline,
    resolve_pipeline: wgpu::ComputePipeline,
    buffers: HashMap<BufferHandle, DeviceBuffer>,
    next_handle: u32,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let convert_pipeline =
            Self::create_pipeline(&device, Kernel::ConvertInstances, shaders::convert_instances());
        let cull_pipeline =
            Self::create_pipeline(&device, Kernel::CullDivisions, shaders::cull_divisions());
        let resolve_pipeline =
            Self::create_pipeline(&device, Kernel::ResolveInstances, shaders::resolve_instances());
        tracing::info!("wgpu culling pipelines ready");
        Self {
            device,
            queue,
            convert_pipeline,
            cull_pipeline,
            resolve_pipeline,
            buffers: HashMap::new(),
            next_handle: 0,
            encoder: None,
        }
    }

    /// Acquire a default adapter and device without a surface.
    pub fn request_headless() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuError::NoAdapter)?;
        tracing::info!(adapter = %adapter.get_info().name, "selected GPU adapter");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("verdant_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))?;
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Underlying buffer, for binding by the renderer that draws the output.
    pub fn buffer(&self, handle: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&handle).map(|b| &b.buffer)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Submit pending work and copy a buffer back to the host. Blocks.
    pub fn read_buffer(&mut self, handle: BufferHandle) -> Result<Vec<u8>, GpuError> {
        let source = self.device_buffer(handle);
        let (size, source) = (source.size, source.buffer.clone());
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.encoder()
            .copy_buffer_to_buffer(&source, 0, &staging, 0, size);
        self.submit();

        let (sender, receiver) = std::sync::mpsc::channel();
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver.recv().map_err(|_| GpuError::ReadbackClosed)??;
        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn create_pipeline(
        device: &wgpu::Device,
        kernel: Kernel,
        source: String,
    ) -> wgpu::ComputePipeline {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.entry_point()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.entry_point()),
            layout: None,
            module: &module,
            entry_point: Some(kernel.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        })
    }

    fn pipeline(&self, kernel: Kernel) -> &wgpu::ComputePipeline {
        match kernel {
            Kernel::ConvertInstances => &self.convert_pipeline,
            Kernel::CullDivisions => &self.cull_pipeline,
            Kernel::ResolveInstances => &self.resolve_pipeline,
        }
    }

    fn device_buffer(&self, handle: BufferHandle) -> &DeviceBuffer {
        match self.buffers.get(&handle) {
            Some(buffer) => buffer,
            None => panic!("buffer {handle:?} is not live"),
        }
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("culling_encoder"),
            })
        })
    }

    fn bind_group(&self, kernel: Kernel, bindings: &[BufferHandle]) -> wgpu::BindGroup {
        let layout = self.pipeline(kernel).get_bind_group_layout(0);
        let entries: Vec<wgpu::BindGroupEntry<'_>> = bindings
            .iter()
            .enumerate()
            .map(|(binding, handle)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: self.device_buffer(*handle).buffer.as_entire_binding(),
            })
            .collect();
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.entry_point()),
            layout: &layout,
            entries: &entries,
        })
    }
}

fn usages(usage: BufferUsage) -> wgpu::BufferUsages {
    let copy = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
    match usage {
        BufferUsage::Storage | BufferUsage::AppendList => wgpu::BufferUsages::STORAGE | copy,
        BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        BufferUsage::IndirectArgs => wgpu::BufferUsages::INDIRECT | copy,
    }
}

impl ComputeBackend for WgpuBackend {
    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferHandle {
        // Zero-sized bindings are invalid; keep one word.
        let size = desc.size.max(4);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: usages(desc.usage),
            mapped_at_creation: false,
        });
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(handle, DeviceBuffer { buffer, size });
        handle
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if self.encoder.is_some() {
            self.submit();
        }
        self.queue
            .write_buffer(&self.device_buffer(buffer).buffer, offset, data);
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_none() {
            panic!("double release of buffer {buffer:?}");
        }
    }

    fn reset_append_list(&mut self, list: BufferHandle) {
        let target = self.device_buffer(list).buffer.clone();
        self.encoder().clear_buffer(&target, 0, Some(4));
    }

    fn dispatch(&mut self, dispatch: &Dispatch) {
        let kernel = dispatch.kernel();
        let bind_group = match *dispatch {
            Dispatch::ConvertInstances {
                instances,
                transforms,
                ..
            } => self.bind_group(kernel, &[instances, transforms]),
            Dispatch::CullDivisions {
                frame,
                bounds_min,
                bounds_max,
                results,
                ..
            } => self.bind_group(kernel, &[frame, bounds_min, bounds_max, results]),
            Dispatch::ResolveInstances {
                frame,
                instances,
                division_results,
                near,
                mid,
                ..
            } => self.bind_group(kernel, &[frame, instances, division_results, near, mid]),
        };
        let pipeline = self.pipeline(kernel).clone();
        let mut pass = self.encoder().begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.entry_point()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(dispatch.workgroups(), 1, 1);
    }

    fn materialize_count(&mut self, list: BufferHandle, args: BufferHandle) {
        let source = self.device_buffer(list).buffer.clone();
        let target = self.device_buffer(args).buffer.clone();
        self.encoder()
            .copy_buffer_to_buffer(&source, 0, &target, INSTANCE_COUNT_OFFSET, 4);
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdant_common::GrassInstance;

    #[test]
    fn converts_on_device_when_available() {
        let Ok(mut backend) = WgpuBackend::request_headless() else {
            eprintln!("no GPU adapter; skipping");
            return;
        };
        let blade = GrassInstance {
            position: [3.0, 0.0, 4.0],
            scale: [1.0, 2.0],
            ..GrassInstance::default()
        };
        let instances = backend.create_buffer(&BufferDesc::storage("instances", 32));
        backend.write_buffer(instances, 0, bytemuck::bytes_of(&blade));
        let transforms = backend.create_buffer(&BufferDesc::storage("transforms", 64));
        backend.dispatch(&Dispatch::ConvertInstances {
            instances,
            transforms,
            workgroups: 1,
        });
        let bytes = backend.read_buffer(transforms).unwrap();
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(&floats[12..15], &[3.0, 0.0, 4.0]);
        assert_eq!(floats[5], 2.0);
    }

    #[test]
    fn append_counter_copies_into_args() {
        let Ok(mut backend) = WgpuBackend::request_headless() else {
            return;
        };
        let list = backend.create_buffer(&BufferDesc::append_list("list", 4));
        backend.write_buffer(list, 0, bytemuck::bytes_of(&3u32));
        let args = backend.create_buffer(&BufferDesc::indirect_args("args"));
        backend.materialize_count(list, args);
        let bytes = backend.read_buffer(args).unwrap();
        assert_eq!(&bytes[4..8], &3u32.to_le_bytes());

        backend.reset_append_list(list);
        let bytes = backend.read_buffer(list).unwrap();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
    }
}
