/// GpuContext - device-level state shared by every Vulkan object
///
/// Resources (buffers, textures, shaders, command buffers) hold an
/// `Arc<GpuContext>` instead of separate device/allocator/queue handles.
/// Device and instance destruction belongs to `VulkanBackend::shutdown`.

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use lumen_3d_engine::{engine_err, engine_error};
use lumen_3d_engine::lumen3d::render::lock;
use lumen_3d_engine::lumen3d::{Error, Result};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

/// Fence waits longer than this are reported as `Error::Timeout`
pub(crate) const FENCE_TIMEOUT_NS: u64 = 5_000_000_000;

pub struct GpuContext {
    pub device: ash::Device,

    /// Wrapped in ManuallyDrop so it is released BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,

    /// Queue submission is externally synchronized; streaming threads share the queue
    pub queue_lock: Mutex<()>,

    /// Command pool for blocking one-shot uploads (TRANSIENT + RESET_COMMAND_BUFFER)
    pub upload_command_pool: Mutex<vk::CommandPool>,

    /// `minUniformBufferOffsetAlignment` of the physical device
    pub min_uniform_alignment: u64,

    pub max_sampler_anisotropy: f32,
}

impl GpuContext {
    pub fn new(
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        graphics_queue: vk::Queue,
        graphics_queue_family: u32,
        upload_command_pool: vk::CommandPool,
        limits: &vk::PhysicalDeviceLimits,
    ) -> Self {
        Self {
            device,
            allocator: ManuallyDrop::new(allocator),
            graphics_queue,
            graphics_queue_family,
            queue_lock: Mutex::new(()),
            upload_command_pool: Mutex::new(upload_command_pool),
            min_uniform_alignment: limits.min_uniform_buffer_offset_alignment,
            max_sampler_anisotropy: limits.max_sampler_anisotropy,
        }
    }

    /// Record with `record`, submit on the graphics queue and block until done
    ///
    /// Used when an upload is requested without a command buffer.
    pub fn submit_one_time<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let pool = lock(&self.upload_command_pool);

        unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(*pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = self
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| vk_error("allocate upload command buffer", e))?[0];

            let result = self.record_and_wait(command_buffer, record);
            self.device.free_command_buffers(*pool, &[command_buffer]);
            result
        }
    }

    unsafe fn record_and_wait<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(|e| vk_error("begin upload command buffer", e))?;

        record(&self.device, command_buffer);

        self.device
            .end_command_buffer(command_buffer)
            .map_err(|e| vk_error("end upload command buffer", e))?;

        self.submit_and_wait(command_buffer)
    }

    /// Submit one command buffer with a private fence and wait for it
    pub fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        unsafe {
            let fence = self
                .device
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(|e| vk_error("create upload fence", e))?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            let submitted = {
                let _queue = lock(&self.queue_lock);
                self.device.queue_submit(self.graphics_queue, &[submit_info], fence)
            };

            let result = submitted
                .map_err(|e| vk_error("queue_submit (one-time)", e))
                .and_then(|_| {
                    self.device
                        .wait_for_fences(&[fence], true, FENCE_TIMEOUT_NS)
                        .map_err(|e| vk_error("wait for one-time submit", e))
                });
            self.device.destroy_fence(fence, None);
            result
        }
    }
}

/// Map a failed Vulkan call onto the engine error type
///
/// Device loss, fence timeouts and memory exhaustion keep their own
/// variants; everything else is a logged `BackendError`.
pub(crate) fn vk_error(op: &str, result: vk::Result) -> Error {
    match result {
        vk::Result::ERROR_DEVICE_LOST => {
            engine_error!("lumen3d::vulkan", "{}: device lost", op);
            Error::DeviceLost(op.to_string())
        }
        vk::Result::TIMEOUT => {
            engine_error!("lumen3d::vulkan", "{}: timed out", op);
            Error::Timeout(op.to_string())
        }
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            engine_error!("lumen3d::vulkan", "{}: {:?}", op, result);
            Error::OutOfMemory
        }
        _ => engine_err!("lumen3d::vulkan", "{} failed: {:?}", op, result),
    }
}
