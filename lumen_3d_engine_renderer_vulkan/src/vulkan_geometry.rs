/// VulkanGeometry - vertex buffers per binding plus an optional index buffer
///
/// Static geometry lives in device-local memory and is filled through
/// staging buffers; dynamic geometry is host-visible and written in place.

use ash::vk;
use gpu_allocator::MemoryLocation;
use lumen_3d_engine::engine_debug;
use lumen_3d_engine::lumen3d::render::{
    lock, CommandBuffer, FrameCounter, Geometry, GeometryDesc, IndexType, StagingQueue, VertexLayout,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::vulkan_buffer::Buffer;
use crate::vulkan_command_buffer::VulkanCommandBuffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_format::index_type_to_vk;

struct GeometryBuffer {
    buffer: Buffer,
    count: u32,
}

pub struct VulkanGeometry {
    ctx: Arc<GpuContext>,
    frames: Arc<FrameCounter>,
    layout: VertexLayout,
    index_type: IndexType,
    dynamic: bool,
    vertex_buffers: Mutex<FxHashMap<u32, GeometryBuffer>>,
    index_buffer: Mutex<Option<GeometryBuffer>>,
    /// Staging copies and replaced buffers, freed once out of flight
    staging: Mutex<StagingQueue<Buffer>>,
}

impl VulkanGeometry {
    pub fn new(ctx: Arc<GpuContext>, frames: Arc<FrameCounter>, desc: &GeometryDesc) -> Self {
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

    pub(crate) fn vertex_buffer(&self, binding: u32) -> Option<vk::Buffer> {
        lock(&self.vertex_buffers).get(&binding).map(|b| b.buffer.buffer)
    }

    pub(crate) fn index_buffer(&self) -> Option<vk::Buffer> {
        lock(&self.index_buffer).as_ref().map(|b| b.buffer.buffer)
    }

    pub(crate) fn vk_index_type(&self) -> vk::IndexType {
        index_type_to_vk(self.index_type)
    }

    fn allocate(&self, name: &str, size: u64, usage: vk::BufferUsageFlags) -> Result<Buffer> {
        let location = if self.dynamic {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };
        Buffer::new(
            Arc::clone(&self.ctx),
            name,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            location,
        )
    }

    /// Fill `dst` with `data`, in place for dynamic geometry, through a
    /// staging copy otherwise
    fn upload(
        &self,
        dst: &Buffer,
        data: &[u8],
        dst_access: vk::AccessFlags,
        cmd: Option<&mut dyn CommandBuffer>,
    ) -> Result<()> {
        if self.dynamic {
            return dst.write(0, data);
        }

        let staging = Buffer::staging(Arc::clone(&self.ctx), "geometry staging", data)?;
        let size = data.len() as u64;
        let (src, dst) = (staging.buffer, dst.buffer);
        let record = |device: &ash::Device, cb: vk::CommandBuffer| unsafe {
            let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
            device.cmd_copy_buffer(cb, src, dst, &[region]);

            let barrier = vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(dst_access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(dst)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        };

        match cmd {
            Some(cmd) => {
                let cb = VulkanCommandBuffer::from_dyn(cmd)?.transfer_handle("geometry upload")?;
                record(&self.ctx.device, cb);
                lock(&self.staging).push(staging, &self.frames);
            }
            None => {
                self.ctx.submit_one_time(record)?;
                lock(&self.staging).push_completed(staging);
            }
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

impl Geometry for VulkanGeometry {
    fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    fn create_vertex_buffer(&self, count: u32, binding: u32) -> Result<()> {
        let Some(desc) = self.layout.binding(binding) else {
            return Err(Error::InvalidResource(format!("vertex binding {} not in layout", binding)));
        };
        let size = count as u64 * desc.stride as u64;
        let buffer = self.allocate("vertex buffer", size, vk::BufferUsageFlags::VERTEX_BUFFER)?;

        let replaced = lock(&self.vertex_buffers).insert(binding, GeometryBuffer { buffer, count });
        if let Some(old) = replaced {
            engine_debug!("lumen3d::vulkan", "Vertex buffer {} replaced ({} -> {} elements)", binding, old.count, count);
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
        self.upload(&target.buffer, data, vk::AccessFlags::VERTEX_ATTRIBUTE_READ, cmd)
    }

    fn create_index_buffer(&self, count: u32) -> Result<()> {
        let size = count as u64 * self.index_type.size_bytes() as u64;
        let buffer = self.allocate("index buffer", size, vk::BufferUsageFlags::INDEX_BUFFER)?;

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
        self.upload(&target.buffer, data, vk::AccessFlags::INDEX_READ, cmd)
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
