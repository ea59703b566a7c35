/// WgpuGeometry - vertex buffers per binding plus an optional index buffer
///
/// Static geometry is filled through staging copies recorded into the
/// caller's command buffer (or queue writes when there is none); dynamic
/// geometry is always written through the queue.

use lumen_3d_engine::engine_debug;
use lumen_3d_engine::lumen3d::render::{
    lock, CommandBuffer, FrameCounter, Geometry, GeometryDesc, IndexType, StagingQueue, VertexLayout,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::wgpu_buffer::GpuBuffer;
use crate::wgpu_command_buffer::{Command, WgpuCommandBuffer};
use crate::wgpu_context::WgpuContext;
use crate::wgpu_format::index_type_to_wgpu;

struct GeometryBuffer {
    buffer: GpuBuffer,
    count: u32,
}

pub struct WgpuGeometry {
    ctx: Arc<WgpuContext>,
    frames: Arc<FrameCounter>,
    layout: VertexLayout,
    index_type: IndexType,
    dynamic: bool,
    vertex_buffers: Mutex<FxHashMap<u32, GeometryBuffer>>,
    index_buffer: Mutex<Option<GeometryBuffer>>,
    staging: Mutex<StagingQueue<GpuBuffer>>,
}

impl WgpuGeometry {
    pub fn new(ctx: Arc<WgpuContext>, frames: Arc<FrameCounter>, desc: &GeometryDesc) -> Self {
        Self {
            ctx,
            frames,
            layout: desc.layout.clone(),
            index_type: desc.index_type(),
            dynamic: desc.dynamic,
            vertex_buffers: Mutex::new(FxHashMap::default()),
            index_buffer: Mutex::new(None),
            staging: Mutex::new(StagingQueue::new()),
        }
    }

    pub(crate) fn vertex_buffer(&self, binding: u32) -> Option<wgpu::Buffer> {
        lock(&self.vertex_buffers).get(&binding).map(|b| b.buffer.buffer.clone())
    }

    pub(crate) fn index_buffer(&self) -> Option<wgpu::Buffer> {
        lock(&self.index_buffer).as_ref().map(|b| b.buffer.buffer.clone())
    }

    pub(crate) fn wgpu_index_format(&self) -> wgpu::IndexFormat {
        index_type_to_wgpu(self.index_type)
    }

    fn allocate(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> Result<GpuBuffer> {
        GpuBuffer::new(Arc::clone(&self.ctx), label, size, usage | wgpu::BufferUsages::COPY_DST)
    }

    fn upload(&self, dst: &GpuBuffer, data: &[u8], cmd: Option<&mut dyn CommandBuffer>) -> Result<()> {
        match cmd {
            Some(cmd) if !self.dynamic => {
                let cmd = WgpuCommandBuffer::from_dyn(cmd)?;
                let staging = GpuBuffer::staging(Arc::clone(&self.ctx), "geometry staging", data)?;
                cmd.record_transfer(
                    "geometry upload",
                    Command::CopyBuffer {
                        src: staging.buffer.clone(),
                        dst: dst.buffer.clone(),
                        size: staging.size,
                    },
                )?;
                lock(&self.staging).push(staging, &self.frames);
            }
            _ => dst.write(0, data),
        }
        Ok(())
    }

    fn check_size(what: &str, data: &[u8], capacity: u64) -> Result<()> {
        if data.len() as u64 > capacity {
            return Err(Error::InvalidResource(format!(
                "{} data ({} bytes) larger than the buffer ({} bytes)",
                what,
                data.len(),
                capacity
            )));
        }
        Ok(())
    }
}

impl Geometry for WgpuGeometry {
    fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    fn create_vertex_buffer(&self, count: u32, binding: u32) -> Result<()> {
        let Some(desc) = self.layout.binding(binding) else {
            return Err(Error::InvalidResource(format!("vertex binding {} not in layout", binding)));
        };
        let size = count as u64 * desc.stride as u64;
        let buffer = self.allocate("vertex buffer", size, wgpu::BufferUsages::VERTEX)?;

        let replaced = lock(&self.vertex_buffers).insert(binding, GeometryBuffer { buffer, count });
        if let Some(old) = replaced {
            engine_debug!("lumen3d::wgpu", "Vertex buffer {} replaced ({} -> {} elements)", binding, old.count, count);
            lock(&self.staging).push(old.buffer, &self.frames);
        }
        Ok(())
    }

    fn update_vertex_buffer(&self, data: &[u8], binding: u32, cmd: Option<&mut dyn CommandBuffer>) -> Result<()> {
        let buffers = lock(&self.vertex_buffers);
        let Some(target) = buffers.get(&binding) else {
            return Err(Error::InvalidResource(format!("vertex buffer {} not created", binding)));
        };
        Self::check_size("vertex", data, target.buffer.size)?;
        self.upload(&target.buffer, data, cmd)
    }

    fn create_index_buffer(&self, count: u32) -> Result<()> {
        let size = count as u64 * self.index_type.size_bytes() as u64;
        let buffer = self.allocate("index buffer", size, wgpu::BufferUsages::INDEX)?;

        if let Some(old) = lock(&self.index_buffer).replace(GeometryBuffer { buffer, count }) {
            lock(&self.staging).push(old.buffer, &self.frames);
        }
        Ok(())
    }

    fn update_index_buffer(&self, data: &[u8], cmd: Option<&mut dyn CommandBuffer>) -> Result<()> {
        let index_buffer = lock(&self.index_buffer);
        let Some(target) = index_buffer.as_ref() else {
            return Err(Error::InvalidResource("index buffer not created".to_string()));
        };
        Self::check_size("index", data, target.buffer.size)?;
        self.upload(&target.buffer, data, cmd)
    }

    fn destroy_staging_buffers(&self, frames: &FrameCounter) {
        let freed = lock(&self.staging).take_allowed(frames);
        drop(freed);
    }

    fn has_32bit_indices(&self) -> bool {
        self.index_type == IndexType::U32
    }

    fn index_count(&self) -> u32 {
        lock(&self.index_buffer).as_ref().map_or(0, |b| b.count)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
