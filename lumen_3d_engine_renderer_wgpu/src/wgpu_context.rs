/// WgpuContext - device-level state shared by every wgpu object
///
/// wgpu reports invalid object descriptions through error scopes rather than
/// return values; `scoped` turns them into `Error::InvalidResource` and
/// `Error::OutOfMemory` so creation failures reach the caller as `Result`s.

use lumen_3d_engine::lumen3d::{Error, Result};
use lumen_3d_engine::{engine_err, engine_error};
use std::sync::atomic::{AtomicU64, Ordering};

/// 1x1 textures bound to sampler bindings that have no texture yet
pub(crate) struct Placeholders {
    pub color: wgpu::TextureView,
    pub depth: wgpu::TextureView,
}

pub struct WgpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,

    /// `min_uniform_buffer_offset_alignment` of the adapter
    pub min_uniform_alignment: u64,

    /// `Features::PUSH_CONSTANTS` was granted, with this many bytes
    pub max_push_constant_size: Option<u32>,

    /// `Features::ADDRESS_MODE_CLAMP_TO_BORDER` was granted
    pub clamp_to_border: bool,

    pub(crate) placeholders: Placeholders,

    /// Bytes of buffers and textures currently alive
    memory_used: AtomicU64,
}

impl WgpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        // Errors outside a scope (recording replay, queue writes) are logged, not fatal
        device.on_uncaptured_error(Box::new(|e| {
            engine_error!("lumen3d::wgpu", "Uncaptured wgpu error: {}", e);
        }));

        let limits = device.limits();
        let features = device.features();
        let placeholders = Self::create_placeholders(&device, &queue);
        Self {
            min_uniform_alignment: limits.min_uniform_buffer_offset_alignment as u64,
            max_push_constant_size: features
                .contains(wgpu::Features::PUSH_CONSTANTS)
                .then_some(limits.max_push_constant_size),
            clamp_to_border: features.contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER),
            placeholders,
            memory_used: AtomicU64::new(0),
            device,
            queue,
        }
    }

    fn create_placeholders(device: &wgpu::Device, queue: &wgpu::Queue) -> Placeholders {
        let texture = |label, format| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        };

        let color = texture("placeholder color", wgpu::TextureFormat::Rgba8Unorm);
        queue.write_texture(
            color.as_image_copy(),
            &[255, 255, 255, 255],
            wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(4), rows_per_image: Some(1) },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
        let depth = texture("placeholder depth", wgpu::TextureFormat::Depth32Float);

        Placeholders {
            color: color.create_view(&wgpu::TextureViewDescriptor::default()),
            depth: depth.create_view(&wgpu::TextureViewDescriptor::default()),
        }
    }

    /// Run `create` inside validation and out-of-memory error scopes
    pub fn scoped<T>(&self, what: &str, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        if let Some(e) = out_of_memory {
            engine_error!("lumen3d::wgpu", "Out of GPU memory in {}: {}", what, e);
            return Err(Error::OutOfMemory);
        }
        if let Some(e) = validation {
            engine_error!("lumen3d::wgpu", "{} rejected: {}", what, e);
            return Err(Error::InvalidResource(format!("{}: {}", what, e)));
        }
        Ok(value)
    }

    /// Block until `index` (or all submitted work, with `None`) has executed
    pub fn wait_for(&self, index: Option<wgpu::SubmissionIndex>) -> Result<()> {
        let poll = match index {
            Some(index) => wgpu::PollType::WaitForSubmissionIndex(index),
            None => wgpu::PollType::Wait,
        };
        self.device
            .poll(poll)
            .map(|_| ())
            .map_err(|e| {
                engine_error!("lumen3d::wgpu", "Device poll failed: {}", e);
                Error::Timeout(e.to_string())
            })
    }

    /// Submit `buffers` and block until they have executed
    pub fn submit_and_wait(&self, buffers: Vec<wgpu::CommandBuffer>) -> Result<()> {
        let index = self.queue.submit(buffers);
        self.wait_for(Some(index))
    }

    pub(crate) fn track_alloc(&self, bytes: u64) {
        self.memory_used.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn track_free(&self, bytes: u64) {
        self.memory_used.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used.load(Ordering::Relaxed)
    }
}

/// Build an `Error::BackendError` for a failed wgpu request
pub(crate) fn wgpu_error(what: &str, e: impl std::fmt::Display) -> Error {
    engine_err!("lumen3d::wgpu", "{} failed: {}", what, e)
}
