/// Buffer - VkBuffer with its gpu-allocator memory

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use lumen_3d_engine::engine_error;
use lumen_3d_engine::lumen3d::render::lock;
use lumen_3d_engine::lumen3d::{Error, Result};
use std::sync::Arc;

use crate::vulkan_context::{vk_error, GpuContext};

/// Vulkan buffer, freed on drop
///
/// Callers decide when dropping is safe: staging and replaced buffers go
/// through a `StagingQueue` first.
pub struct Buffer {
    ctx: Arc<GpuContext>,
    pub(crate) buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pub(crate) size: u64,
}

impl Buffer {
    /// Create a buffer of `size` bytes and bind freshly allocated memory to it
    ///
    /// # Arguments
    ///
    /// * `name` - Allocation name shown in gpu-allocator reports
    /// * `location` - `CpuToGpu` for mapped buffers, `GpuOnly` for device-local ones
    pub fn new(
        ctx: Arc<GpuContext>,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        unsafe {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size.max(1))
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = ctx
                .device
                .create_buffer(&buffer_info, None)
                .map_err(|e| vk_error("vkCreateBuffer", e))?;

            let requirements = ctx.device.get_buffer_memory_requirements(buffer);

            let allocation = lock(&ctx.allocator).allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    ctx.device.destroy_buffer(buffer, None);
                    engine_error!(
                        "lumen3d::vulkan",
                        "Out of GPU memory allocating '{}' ({:.2} MB): {:?}",
                        name,
                        requirements.size as f64 / (1024.0 * 1024.0),
                        e
                    );
                    return Err(Error::OutOfMemory);
                }
            };

            if let Err(e) = ctx.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                lock(&ctx.allocator).free(allocation).ok();
                ctx.device.destroy_buffer(buffer, None);
                return Err(vk_error("vkBindBufferMemory", e));
            }

            Ok(Self {
                ctx,
                buffer,
                allocation: Some(allocation),
                size,
            })
        }
    }

    /// Host-visible staging buffer holding a copy of `data`
    pub fn staging(ctx: Arc<GpuContext>, name: &str, data: &[u8]) -> Result<Self> {
        let buffer = Self::new(
            ctx,
            name,
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Copy `data` into mapped memory at `offset`
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            return Err(Error::InvalidResource(format!(
                "buffer write of {} bytes at {} overflows {} bytes",
                data.len(),
                offset,
                self.size
            )));
        }
        let Some(allocation) = &self.allocation else {
            engine_error!("lumen3d::vulkan", "Buffer write failed: no GPU allocation");
            return Err(Error::BackendError("Buffer has no allocation".to_string()));
        };
        let mapped_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| Error::BackendError("Buffer is not CPU-accessible".to_string()))?
            .as_ptr() as *mut u8;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped_ptr.add(offset as usize), data.len());
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if let Some(allocation) = self.allocation.take() {
                lock(&self.ctx.allocator).free(allocation).ok();
            }
            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}
