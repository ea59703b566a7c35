/// VulkanBackend - Vulkan implementation of the RenderBackend trait
///
/// Owns the instance, device, surface and swapchain, the per-slot fences of
/// the frame ring and the objects every resource shares (GpuContext, render
/// targets, sampler cache).

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use lumen_3d_engine::lumen3d::render::{
    lock, BackendKind, CommandBuffer, CommandBufferDesc, Config, FrameCounter, FramebufferDesc,
    FramebufferId, Geometry, GeometryDesc, Pipeline, PipelineDesc, RenderBackend, RenderPassDesc,
    RenderPassId, RendererStats, Shader, ShaderDesc, Texture, TextureDesc, TextureFormat,
    RING_BUFFER_SIZE,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use lumen_3d_engine::{engine_bail, engine_debug, engine_error, engine_info, engine_warn};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use winit::window::Window;

use crate::debug;
use crate::vulkan_command_buffer::VulkanCommandBuffer;
use crate::vulkan_context::{vk_error, GpuContext, FENCE_TIMEOUT_NS};
use crate::vulkan_geometry::VulkanGeometry;
use crate::vulkan_pipeline::VulkanPipeline;
use crate::vulkan_render_pass::RenderTargets;
use crate::vulkan_sampler::SamplerCache;
use crate::vulkan_shader::VulkanShader;
use crate::vulkan_swapchain::VulkanSwapchain;
use crate::vulkan_texture::VulkanTexture;

const SOURCE: &str = "lumen3d::vulkan";

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Everything created from the logical device, released together at shutdown
struct DeviceObjects {
    ctx: Arc<GpuContext>,
    targets: Arc<RenderTargets>,
    samplers: Arc<Mutex<SamplerCache>>,
    swapchain: VulkanSwapchain,
    /// One fence per ring slot, created signaled
    in_flight: Vec<vk::Fence>,
}

/// Vulkan backend
///
/// Build one from a window, hand it to `Renderer::new`. Every resource the
/// backend created must be dropped before `shutdown`; resources still alive
/// at that point keep the device (and instance) alive and are reported.
pub struct VulkanBackend {
    /// Loader; must outlive the instance
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device_name: String,

    /// None once shut down
    device: Option<DeviceObjects>,
    frames: Option<Arc<FrameCounter>>,

    /// Image acquired by the current presenting frame
    acquired_image: Option<u32>,
    last_image: u32,
    /// Set by suboptimal acquires/presents and zero-sized resizes
    needs_recreate: bool,
    requested_extent: (u32, u32),

    stats: RendererStats,
}

/// Preference order when several GPUs can render to the surface
pub(crate) fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

pub(crate) fn pack_version((major, minor, patch): (u32, u32, u32)) -> u32 {
    vk::make_api_version(0, major, minor, patch)
}

impl VulkanBackend {
    /// Create a Vulkan backend rendering to `window`
    ///
    /// # Arguments
    ///
    /// * `window` - Window the surface and swapchain are created for
    /// * `config` - Application name/version, vsync, validation and debug settings
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        let validation = config.enable_validation || cfg!(feature = "vulkan-validation");

        unsafe {
            let entry = ash::Entry::load().map_err(|e| {
                engine_error!(SOURCE, "Failed to load the Vulkan loader: {}", e);
                Error::InitializationFailed(format!("Vulkan loader: {}", e))
            })?;

            // ===== INSTANCE =====

            let validation = validation && Self::validation_layer_available(&entry);

            let app_name = CString::new(config.app_name.as_str())
                .map_err(|_| Error::InitializationFailed("app_name contains a NUL byte".to_string()))?;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(pack_version(config.app_version))
                .engine_name(c"Lumen3D")
                .engine_version(pack_version((0, 1, 0)))
                .api_version(vk::API_VERSION_1_3);

            let display_handle = window
                .display_handle()
                .map_err(|e| Error::InitializationFailed(format!("display handle: {}", e)))?;
            let window_handle = window
                .window_handle()
                .map_err(|e| Error::InitializationFailed(format!("window handle: {}", e)))?;

            let mut extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
                .map_err(|e| vk_error("enumerate surface extensions", e))?
                .to_vec();
            let mut layers = Vec::new();
            if validation {
                extensions.push(ash::ext::debug_utils::NAME.as_ptr());
                layers.push(VALIDATION_LAYER.as_ptr());
            }

            let instance_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_extension_names(&extensions)
                .enabled_layer_names(&layers);
            let instance = entry.create_instance(&instance_info, None).map_err(|e| {
                engine_error!(SOURCE, "vkCreateInstance failed: {:?}", e);
                Error::InitializationFailed(format!("vkCreateInstance: {:?}", e))
            })?;

            let debug_messenger = if validation {
                Some(Self::create_debug_messenger(&entry, &instance, config)?)
            } else {
                None
            };

            // ===== SURFACE / PHYSICAL DEVICE =====

            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| vk_error("create surface", e))?;
            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            let (physical_device, queue_family) =
                Self::pick_physical_device(&instance, &surface_loader, surface)?;
            let properties = instance.get_physical_device_properties(physical_device);
            let device_name = properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string());
            engine_info!(
                SOURCE,
                "Using GPU '{}' ({:?}), queue family {}",
                device_name,
                properties.device_type,
                queue_family
            );

            // ===== LOGICAL DEVICE =====

            let supported = instance.get_physical_device_features(physical_device);
            let features = vk::PhysicalDeviceFeatures::default()
                .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
                .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE);

            let priorities = [1.0f32];
            let queue_info = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(queue_family)
                .queue_priorities(&priorities)];
            let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];
            let device_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_info)
                .enabled_extension_names(&device_extensions)
                .enabled_features(&features);
            let device = instance
                .create_device(physical_device, &device_info, None)
                .map_err(|e| vk_error("vkCreateDevice", e))?;
            let graphics_queue = device.get_device_queue(queue_family, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| {
                engine_error!(SOURCE, "Failed to create GPU allocator: {:?}", e);
                Error::InitializationFailed(format!("gpu-allocator: {:?}", e))
            })?;

            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(queue_family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let upload_pool = device
                .create_command_pool(&pool_info, None)
                .map_err(|e| vk_error("vkCreateCommandPool (upload)", e))?;

            let mut limits = properties.limits;
            if supported.sampler_anisotropy != vk::TRUE {
                limits.max_sampler_anisotropy = 1.0;
            }
            let ctx = Arc::new(GpuContext::new(
                device,
                Arc::new(Mutex::new(allocator)),
                graphics_queue,
                queue_family,
                upload_pool,
                &limits,
            ));

            // ===== SWAPCHAIN / FRAME SYNC =====

            let size = window.inner_size();
            let requested_extent = if size.width > 0 && size.height > 0 {
                (size.width, size.height)
            } else {
                config.initial_extent
            };
            let swapchain = VulkanSwapchain::new(
                Arc::clone(&ctx),
                &instance,
                physical_device,
                surface,
                surface_loader.clone(),
                requested_extent,
                config.vsync,
            )?;

            let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            let mut in_flight = Vec::with_capacity(RING_BUFFER_SIZE);
            for _ in 0..RING_BUFFER_SIZE {
                in_flight.push(
                    ctx.device
                        .create_fence(&fence_info, None)
                        .map_err(|e| vk_error("vkCreateFence", e))?,
                );
            }

            let device = DeviceObjects {
                targets: Arc::new(RenderTargets::new(Arc::clone(&ctx))),
                samplers: Arc::new(Mutex::new(SamplerCache::new(Arc::clone(&ctx)))),
                ctx,
                swapchain,
                in_flight,
            };

            engine_info!(
                SOURCE,
                "Vulkan backend ready (validation {})",
                if validation { "on" } else { "off" }
            );

            Ok(Self {
                _entry: entry,
                instance,
                debug_messenger,
                surface_loader,
                surface,
                device_name,
                device: Some(device),
                frames: None,
                acquired_image: None,
                last_image: 0,
                needs_recreate: false,
                requested_extent,
                stats: RendererStats::default(),
            })
        }
    }

    /// Name of the selected physical device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Number of live render passes and framebuffers
    pub fn render_target_counts(&self) -> (usize, usize) {
        match &self.device {
            Some(device) => (device.targets.render_pass_count(), device.targets.framebuffer_count()),
            None => (0, 0),
        }
    }

    unsafe fn validation_layer_available(entry: &ash::Entry) -> bool {
        let available = entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER))
            })
            .unwrap_or(false);
        if !available {
            engine_warn!(SOURCE, "Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        available
    }

    unsafe fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
        config: &Config,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        debug::init_debug_config(debug::Config {
            severity: config.debug_severity,
            output: config.debug_output.clone(),
            message_filter: config.debug_message_filter,
            panic_on_error: config.panic_on_validation_error,
            enable_stats: config.enable_validation_stats,
        });

        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(debug::severity_flags(config.debug_severity))
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug::vulkan_debug_callback));
        let messenger = loader
            .create_debug_utils_messenger(&messenger_info, None)
            .map_err(|e| vk_error("vkCreateDebugUtilsMessengerEXT", e))?;
        Ok((loader, messenger))
    }

    /// Best-scoring device with a queue family that does graphics and presents to `surface`
    unsafe fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = instance
            .enumerate_physical_devices()
            .map_err(|e| vk_error("vkEnumeratePhysicalDevices", e))?;

        let mut best: Option<(u32, vk::PhysicalDevice, u32)> = None;
        for device in devices {
            let families = instance.get_physical_device_queue_family_properties(device);
            let family = families.iter().enumerate().find_map(|(index, family)| {
                let index = index as u32;
                let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                let present = surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false);
                (graphics && present).then_some(index)
            });
            let Some(family) = family else {
                continue;
            };
            let score = device_type_score(instance.get_physical_device_properties(device).device_type);
            if best.is_none_or(|(best_score, _, _)| score > best_score) {
                best = Some((score, device, family));
            }
        }

        match best {
            Some((_, device, family)) => Ok((device, family)),
            None => engine_bail!(SOURCE, "No GPU with a graphics queue that can present to the window"),
        }
    }

    fn device(&self) -> Result<&DeviceObjects> {
        self.device
            .as_ref()
            .ok_or_else(|| Error::BackendError("Vulkan backend used after shutdown".to_string()))
    }

    fn frames(&self) -> Result<Arc<FrameCounter>> {
        self.frames
            .clone()
            .ok_or_else(|| Error::BackendError("Vulkan backend used before init".to_string()))
    }

    /// Rebuild the swapchain at the last requested extent, with the framebuffers built on it
    fn recreate_swapchain(&mut self) -> Result<()> {
        let (width, height) = self.requested_extent;
        if width == 0 || height == 0 {
            return Ok(());
        }
        let Some(device) = self.device.as_mut() else {
            return Ok(());
        };
        unsafe {
            let _queue = lock(&device.ctx.queue_lock);
            device
                .ctx
                .device
                .device_wait_idle()
                .map_err(|e| vk_error("vkDeviceWaitIdle", e))?;
        }
        device.swapchain.recreate(self.requested_extent)?;
        device
            .targets
            .rebuild_swapchain_framebuffers(device.swapchain.views(), device.swapchain.extent())?;
        self.needs_recreate = false;
        engine_debug!(
            SOURCE,
            "Swapchain recreated at {}x{}",
            device.swapchain.extent().0,
            device.swapchain.extent().1
        );
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> Result<u32> {
        for _ in 0..2 {
            if self.needs_recreate {
                self.recreate_swapchain()?;
            }
            let device = self.device.as_mut().ok_or_else(|| Error::BackendError("acquire after shutdown".to_string()))?;
            match device.swapchain.acquire(slot)? {
                Some((index, suboptimal)) => {
                    // Suboptimal images are still usable; rebuild on the next frame
                    self.needs_recreate |= suboptimal;
                    return Ok(index);
                }
                None => self.needs_recreate = true,
            }
        }
        engine_bail!(SOURCE, "Swapchain stayed out of date after recreation")
    }
}

impl RenderBackend for VulkanBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn init(&mut self, frames: Arc<FrameCounter>) -> Result<()> {
        if self.frames.is_some() {
            engine_bail!(SOURCE, "Vulkan backend initialized twice");
        }
        self.frames = Some(frames);
        Ok(())
    }

    fn create_geometry(&self, desc: &GeometryDesc) -> Result<Arc<dyn Geometry>> {
        let device = self.device()?;
        Ok(Arc::new(VulkanGeometry::new(Arc::clone(&device.ctx), self.frames()?, desc)))
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>> {
        let device = self.device()?;
        Ok(Arc::new(VulkanShader::new(
            Arc::clone(&device.ctx),
            self.frames()?,
            Arc::clone(&device.samplers),
            desc,
        )?))
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<Arc<dyn Pipeline>> {
        let device = self.device()?;
        Ok(Arc::new(VulkanPipeline::new(Arc::clone(&device.ctx), &device.targets, desc)?))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn Texture>> {
        let device = self.device()?;
        Ok(Arc::new(VulkanTexture::new(Arc::clone(&device.ctx), self.frames()?, desc)?))
    }

    fn create_command_buffer(&self, desc: &CommandBufferDesc) -> Result<Arc<Mutex<dyn CommandBuffer>>> {
        let device = self.device()?;
        let cmd = VulkanCommandBuffer::new(
            Arc::clone(&device.ctx),
            self.frames()?,
            Arc::clone(&device.targets),
            desc.one_time_submit,
        )?;
        Ok(Arc::new(Mutex::new(cmd)))
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId> {
        self.device()?.targets.create_render_pass(desc)
    }

    fn delete_render_pass(&self, id: RenderPassId) {
        if let Some(device) = &self.device {
            device.targets.delete_render_pass(id);
        }
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> Result<FramebufferId> {
        let device = self.device()?;
        device
            .targets
            .create_framebuffer(desc, device.swapchain.views(), device.swapchain.extent())
    }

    fn delete_framebuffer(&self, id: FramebufferId) {
        if let Some(device) = &self.device {
            device.targets.delete_framebuffer(id);
        }
    }

    fn begin_frame(&mut self, slot: usize, present: bool) -> Result<()> {
        {
            let device = self.device()?;
            let fence = device.in_flight[slot % RING_BUFFER_SIZE];
            unsafe {
                device
                    .ctx
                    .device
                    .wait_for_fences(&[fence], true, FENCE_TIMEOUT_NS)
                    .map_err(|e| vk_error("wait for frame fence", e))?;
            }
        }
        self.stats.draw_calls = 0;
        self.stats.triangles = 0;
        self.acquired_image = None;

        if present {
            let image = self.acquire(slot % RING_BUFFER_SIZE)?;
            self.device()?.targets.set_current_image(image);
            self.acquired_image = Some(image);
            self.last_image = image;
        }
        Ok(())
    }

    fn submit(
        &mut self,
        slot: usize,
        command_buffers: &[Arc<Mutex<dyn CommandBuffer>>],
        present: bool,
    ) -> Result<()> {
        let mut handles = Vec::with_capacity(command_buffers.len());
        for cmd in command_buffers {
            let cmd = lock(cmd);
            let Some(vk_cmd) = cmd.as_any().downcast_ref::<VulkanCommandBuffer>() else {
                engine_bail!(SOURCE, "submit: command buffer is not a Vulkan command buffer");
            };
            handles.push(vk_cmd.submit_handle()?);
            let (draw_calls, triangles) = vk_cmd.counters();
            self.stats.draw_calls += draw_calls;
            self.stats.triangles += triangles;
        }

        let device = self.device()?;
        let slot = slot % RING_BUFFER_SIZE;
        let fence = device.in_flight[slot];

        let mut wait_semaphores = Vec::new();
        let mut signal_semaphores = Vec::new();
        if present {
            let Some(image) = self.acquired_image else {
                engine_bail!(SOURCE, "submit: no swapchain image acquired for slot {}", slot);
            };
            wait_semaphores.push(device.swapchain.image_available(slot));
            signal_semaphores.push(device.swapchain.render_finished(image));
        }
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&handles)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            let _queue = lock(&device.ctx.queue_lock);
            device
                .ctx
                .device
                .reset_fences(&[fence])
                .map_err(|e| vk_error("vkResetFences", e))?;
            device
                .ctx
                .device
                .queue_submit(device.ctx.graphics_queue, &[submit_info], fence)
                .map_err(|e| vk_error("vkQueueSubmit", e))?;
        }
        Ok(())
    }

    fn present(&mut self, _slot: usize) -> Result<()> {
        let Some(image) = self.acquired_image.take() else {
            engine_bail!(SOURCE, "present: no swapchain image acquired");
        };
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| Error::BackendError("present after shutdown".to_string()))?;
        if device.swapchain.present(image)? {
            self.needs_recreate = true;
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let device = self.device()?;
        unsafe {
            let _queue = lock(&device.ctx.queue_lock);
            device
                .ctx
                .device
                .device_wait_idle()
                .map_err(|e| vk_error("vkDeviceWaitIdle", e))
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.requested_extent = (width, height);
        if width == 0 || height == 0 {
            // Minimized; rebuilt once a real size comes back
            engine_debug!(SOURCE, "Resize to {}x{} deferred", width, height);
            self.needs_recreate = true;
            return Ok(());
        }
        self.recreate_swapchain()
    }

    fn swapchain_extent(&self) -> (u32, u32) {
        self.device
            .as_ref()
            .map(|device| device.swapchain.extent())
            .unwrap_or((0, 0))
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.device
            .as_ref()
            .map(|device| device.swapchain.format())
            .unwrap_or(TextureFormat::B8G8R8A8_SRGB)
    }

    fn swapchain_buffer_index(&self) -> u32 {
        self.last_image
    }

    fn num_swapchain_buffers(&self) -> u32 {
        self.device
            .as_ref()
            .map(|device| device.swapchain.len() as u32)
            .unwrap_or(0)
    }

    fn stats(&self) -> RendererStats {
        let gpu_memory_used = self
            .device
            .as_ref()
            .map(|device| lock(&device.ctx.allocator).generate_report().total_allocated_bytes)
            .unwrap_or(0);
        RendererStats {
            gpu_memory_used,
            ..self.stats
        }
    }

    fn shutdown(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };

        unsafe {
            {
                let _queue = lock(&device.ctx.queue_lock);
                if let Err(e) = device.ctx.device.device_wait_idle() {
                    engine_warn!(SOURCE, "vkDeviceWaitIdle at shutdown: {:?}", e);
                }
            }
            for fence in device.in_flight.drain(..) {
                device.ctx.device.destroy_fence(fence, None);
            }
            device.targets.clear();
            device.swapchain.destroy();
            lock(&device.samplers).shutdown();

            let DeviceObjects {
                ctx,
                targets,
                samplers,
                swapchain,
                ..
            } = device;
            drop(swapchain);
            drop(samplers);
            drop(targets);

            match Arc::try_unwrap(ctx) {
                Ok(mut ctx) => {
                    let upload_pool = *lock(&ctx.upload_command_pool);
                    ctx.device.destroy_command_pool(upload_pool, None);
                    // Allocator before device
                    ManuallyDrop::drop(&mut ctx.allocator);
                    ctx.device.destroy_device(None);

                    self.surface_loader.destroy_surface(self.surface, None);
                    if let Some((loader, messenger)) = self.debug_messenger.take() {
                        loader.destroy_debug_utils_messenger(messenger, None);
                        debug::cleanup_debug_config();
                    }
                    self.instance.destroy_instance(None);
                    engine_info!(SOURCE, "Vulkan backend shut down");
                }
                Err(ctx) => {
                    engine_error!(
                        SOURCE,
                        "{} GPU resource(s) still alive at shutdown; device and instance leaked",
                        Arc::strong_count(&ctx) - 1
                    );
                }
            }
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discrete_gpu_preferred() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
        assert_eq!(device_type_score(vk::PhysicalDeviceType::OTHER), 0);
    }

    #[test]
    fn test_pack_version() {
        let packed = pack_version((1, 2, 3));
        assert_eq!(vk::api_version_major(packed), 1);
        assert_eq!(vk::api_version_minor(packed), 2);
        assert_eq!(vk::api_version_patch(packed), 3);
    }
}
