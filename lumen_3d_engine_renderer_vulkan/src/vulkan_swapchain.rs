/// VulkanSwapchain - presentation images, acquire/present and recreation on resize
///
/// One image-available semaphore per ring slot, one render-finished
/// semaphore per swapchain image. Out-of-date and suboptimal results are
/// reported to the caller, which recreates the swapchain.

use ash::vk;
use lumen_3d_engine::lumen3d::render::{lock, SwapchainImages, TextureFormat, RING_BUFFER_SIZE};
use lumen_3d_engine::lumen3d::{Error, Result};
use lumen_3d_engine::{engine_debug, engine_error, engine_info};
use std::sync::Arc;

use crate::vulkan_context::{vk_error, GpuContext};
use crate::vulkan_format::texture_format_from_vk;

/// Surface format: sRGB BGRA first, then any format the engine knows
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<(vk::SurfaceFormatKHR, TextureFormat)> {
    let preferred = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];
    let known = |f: &vk::SurfaceFormatKHR| texture_format_from_vk(f.format).map(|t| (*f, t));

    preferred
        .iter()
        .find_map(|&want| {
            formats
                .iter()
                .filter(|f| f.format == want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
                .find_map(known)
        })
        .or_else(|| formats.iter().find_map(known))
}

/// FIFO with vsync; otherwise MAILBOX, then IMMEDIATE, when supported
pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface extent, or the requested size clamped to the surface limits
pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, (width, height): (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

pub struct VulkanSwapchain {
    ctx: Arc<GpuContext>,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    /// None between destruction and the next successful build
    images: Option<SwapchainImages<vk::Image, vk::ImageView>>,
    vk_format: vk::SurfaceFormatKHR,
    format: TextureFormat,
    present_mode: vk::PresentModeKHR,
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
}

impl VulkanSwapchain {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        extent: (u32, u32),
        vsync: bool,
    ) -> Result<Self> {
        let (formats, modes) = unsafe {
            let formats = surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(|e| vk_error("vkGetPhysicalDeviceSurfaceFormatsKHR", e))?;
            let modes = surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(|e| vk_error("vkGetPhysicalDeviceSurfacePresentModesKHR", e))?;
            (formats, modes)
        };
        let Some((vk_format, format)) = choose_surface_format(&formats) else {
            engine_error!("lumen3d::vulkan", "No usable surface format among {:?}", formats);
            return Err(Error::InitializationFailed("no usable surface format".to_string()));
        };
        let present_mode = choose_present_mode(&modes, vsync);

        let loader = ash::khr::swapchain::Device::new(instance, &ctx.device);
        let mut swapchain = Self {
            ctx,
            physical_device,
            surface,
            surface_loader,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: None,
            vk_format,
            format,
            present_mode,
            image_available: Vec::with_capacity(RING_BUFFER_SIZE),
            render_finished: Vec::new(),
        };
        for _ in 0..RING_BUFFER_SIZE {
            let semaphore = swapchain.create_semaphore()?;
            swapchain.image_available.push(semaphore);
        }
        swapchain.recreate(extent)?;

        engine_info!(
            "lumen3d::vulkan",
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            swapchain.extent().0,
            swapchain.extent().1,
            swapchain.len(),
            format,
            present_mode
        );
        Ok(swapchain)
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        unsafe {
            self.ctx
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(|e| vk_error("vkCreateSemaphore", e))
        }
    }

    fn create_view(&self, image: vk::Image) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.vk_format.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe {
            self.ctx
                .device
                .create_image_view(&create_info, None)
                .map_err(|e| vk_error("vkCreateImageView (swapchain)", e))
        }
    }

    /// Build a new swapchain from the old one; the device must be idle
    pub(crate) fn recreate(&mut self, requested: (u32, u32)) -> Result<()> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(|e| vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?
        };
        let extent = choose_extent(&caps, requested);
        if extent.width == 0 || extent.height == 0 {
            return Err(Error::InvalidResource(format!(
                "cannot create a {}x{} swapchain",
                extent.width, extent.height
            )));
        }
        let composite_alpha = if caps.supported_composite_alpha.contains(vk::CompositeAlphaFlagsKHR::OPAQUE) {
            vk::CompositeAlphaFlagsKHR::OPAQUE
        } else {
            vk::CompositeAlphaFlagsKHR::INHERIT
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(choose_image_count(&caps))
            .image_format(self.vk_format.format)
            .image_color_space(self.vk_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .map_err(|e| vk_error("vkCreateSwapchainKHR", e))?
        };

        self.destroy_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        let images = unsafe {
            self.loader
                .get_swapchain_images(swapchain)
                .map_err(|e| vk_error("vkGetSwapchainImagesKHR", e))?
        };
        let images = SwapchainImages::new(images, (extent.width, extent.height), |&image| self.create_view(image))?;
        self.images = Some(images);

        while self.render_finished.len() < self.len() {
            let semaphore = self.create_semaphore()?;
            self.render_finished.push(semaphore);
        }

        engine_debug!(
            "lumen3d::vulkan",
            "Swapchain (re)built: {}x{}, {} images",
            extent.width,
            extent.height,
            self.len()
        );
        Ok(())
    }

    fn destroy_views(&mut self) {
        let Some(images) = self.images.take() else {
            return;
        };
        for view in images.into_views() {
            unsafe { self.ctx.device.destroy_image_view(view, None) };
        }
    }

    /// Acquire the next image, signalling the image-available semaphore of `slot`
    ///
    /// `Ok(None)` when the swapchain is out of date.
    pub(crate) fn acquire(&mut self, slot: usize) -> Result<Option<(u32, bool)>> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.image_available[slot],
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(Some((index, suboptimal))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(vk_error("vkAcquireNextImageKHR", e)),
        }
    }

    /// Queue `image` for presentation; `Ok(true)` when the swapchain needs recreation
    pub(crate) fn present(&mut self, image: u32) -> Result<bool> {
        let swapchains = [self.swapchain];
        let indices = [image];
        let wait = [self.render_finished[image as usize]];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let _queue = lock(&self.ctx.queue_lock);
        match unsafe { self.loader.queue_present(self.ctx.graphics_queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(vk_error("vkQueuePresentKHR", e)),
        }
    }

    pub(crate) fn image_available(&self, slot: usize) -> vk::Semaphore {
        self.image_available[slot]
    }

    pub(crate) fn render_finished(&self, image: u32) -> vk::Semaphore {
        self.render_finished[image as usize]
    }

    pub(crate) fn views(&self) -> &[vk::ImageView] {
        self.images.as_ref().map_or(&[], |images| images.views())
    }

    pub fn extent(&self) -> (u32, u32) {
        self.images.as_ref().map_or((0, 0), |images| images.extent())
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.images.as_ref().map_or(0, |images| images.len())
    }

    /// Destroy views, semaphores and the swapchain; the device must be idle
    pub(crate) fn destroy(&mut self) {
        self.destroy_views();
        unsafe {
            for semaphore in self.image_available.drain(..).chain(self.render_finished.drain(..)) {
                self.ctx.device.destroy_semaphore(semaphore, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}
