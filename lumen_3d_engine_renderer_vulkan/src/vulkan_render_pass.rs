/// RenderTargets - Vulkan render passes and framebuffers, addressed by id
///
/// Swapchain framebuffers keep one native framebuffer per swapchain image;
/// `begin_render_pass` picks the one of the image acquired this frame.

use ash::vk;
use lumen_3d_engine::lumen3d::render::{
    lock, FramebufferDesc, FramebufferId, ImageLayout, RenderPassDesc, RenderPassId, Texture,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use lumen_3d_engine::{engine_debug, engine_warn};
use slotmap::SlotMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::vulkan_context::{vk_error, GpuContext};
use crate::vulkan_format::{
    image_layout_to_vk, load_op_to_vk, sample_count_to_vk, store_op_to_vk, texture_format_to_vk,
};
use crate::vulkan_texture::VulkanTexture;

pub(crate) struct VulkanRenderPass {
    pub render_pass: vk::RenderPass,
    pub desc: RenderPassDesc,
}

struct VulkanFramebuffer {
    render_pass: RenderPassId,
    swapchain: bool,
    /// Views after the swapchain image, with the size of their texture
    attachments: Vec<(vk::ImageView, (u32, u32))>,
    /// One per swapchain image, or a single one
    framebuffers: Vec<vk::Framebuffer>,
    extent: (u32, u32),
    /// Swapchain resized past the size of an attachment
    stale: bool,
}

/// Framebuffer resolved for `cmd_begin_render_pass`
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedFramebuffer {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub color_count: usize,
}

pub struct RenderTargets {
    ctx: Arc<GpuContext>,
    render_passes: Mutex<SlotMap<RenderPassId, VulkanRenderPass>>,
    framebuffers: Mutex<SlotMap<FramebufferId, VulkanFramebuffer>>,
    /// Swapchain image acquired by the current frame
    current_image: AtomicU32,
}

impl RenderTargets {
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self {
            ctx,
            render_passes: Mutex::new(SlotMap::with_key()),
            framebuffers: Mutex::new(SlotMap::with_key()),
            current_image: AtomicU32::new(0),
        }
    }

    pub(crate) fn set_current_image(&self, index: u32) {
        self.current_image.store(index, Ordering::Release);
    }

    pub(crate) fn current_image(&self) -> u32 {
        self.current_image.load(Ordering::Acquire)
    }

    pub fn render_pass_count(&self) -> usize {
        lock(&self.render_passes).len()
    }

    pub fn framebuffer_count(&self) -> usize {
        lock(&self.framebuffers).len()
    }

    /// Native render pass and color attachment count of `id`
    pub(crate) fn render_pass(&self, id: RenderPassId) -> Result<(vk::RenderPass, usize)> {
        lock(&self.render_passes)
            .get(id)
            .map(|rp| (rp.render_pass, rp.desc.color_attachments.len()))
            .ok_or_else(|| Error::InvalidResource(format!("unknown render pass {:?}", id)))
    }

    pub(crate) fn has_depth_attachment(&self, id: RenderPassId) -> bool {
        lock(&self.render_passes)
            .get(id)
            .is_some_and(|rp| rp.desc.depth_attachment.is_some())
    }

    // ===== RENDER PASSES =====

    pub fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId> {
        if desc.attachment_count() == 0 {
            return Err(Error::InvalidResource("render pass without attachments".to_string()));
        }

        let mut attachments = Vec::with_capacity(desc.attachment_count());
        let mut color_refs = Vec::with_capacity(desc.color_attachments.len());
        for (i, color) in desc.color_attachments.iter().enumerate() {
            if color.format.is_depth() {
                return Err(Error::InvalidResource(format!(
                    "color attachment {} has depth format {:?}",
                    i, color.format
                )));
            }
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(texture_format_to_vk(color.format))
                    .samples(sample_count_to_vk(color.samples))
                    .load_op(load_op_to_vk(color.load_op))
                    .store_op(store_op_to_vk(color.store_op))
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(image_layout_to_vk(color.initial_layout))
                    .final_layout(image_layout_to_vk(color.final_layout)),
            );
            color_refs.push(
                vk::AttachmentReference::default()
                    .attachment(i as u32)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
        }

        let depth_ref = match &desc.depth_attachment {
            Some(depth) => {
                if !depth.format.is_depth() {
                    return Err(Error::InvalidResource(format!(
                        "depth attachment has color format {:?}",
                        depth.format
                    )));
                }
                let (stencil_load, stencil_store) = if depth.format.has_stencil() {
                    (load_op_to_vk(depth.load_op), store_op_to_vk(depth.store_op))
                } else {
                    (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
                };
                attachments.push(
                    vk::AttachmentDescription::default()
                        .format(texture_format_to_vk(depth.format))
                        .samples(sample_count_to_vk(depth.samples))
                        .load_op(load_op_to_vk(depth.load_op))
                        .store_op(store_op_to_vk(depth.store_op))
                        .stencil_load_op(stencil_load)
                        .stencil_store_op(stencil_store)
                        .initial_layout(image_layout_to_vk(depth.initial_layout))
                        .final_layout(image_layout_to_vk(depth.final_layout)),
                );
                Some(
                    vk::AttachmentReference::default()
                        .attachment(desc.color_attachments.len() as u32)
                        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
                )
            }
            None => None,
        };

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let (stage_mask, access_mask) = subpass_dependency_masks(depth_ref.is_some());
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stage_mask)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stage_mask)
            .dst_access_mask(access_mask);

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));
        let render_pass = unsafe {
            self.ctx
                .device
                .create_render_pass(&create_info, None)
                .map_err(|e| vk_error("vkCreateRenderPass", e))?
        };

        let id = lock(&self.render_passes).insert(VulkanRenderPass {
            render_pass,
            desc: desc.clone(),
        });
        engine_debug!(
            "lumen3d::vulkan",
            "Render pass {:?} created ({} attachment(s))",
            id,
            desc.attachment_count()
        );
        Ok(id)
    }

    pub fn delete_render_pass(&self, id: RenderPassId) {
        let Some(rp) = lock(&self.render_passes).remove(id) else {
            engine_warn!("lumen3d::vulkan", "delete_render_pass: unknown render pass {:?}", id);
            return;
        };
        unsafe { self.ctx.device.destroy_render_pass(rp.render_pass, None) };
    }

    // ===== FRAMEBUFFERS =====

    fn texture_view(texture: &dyn Texture) -> Result<(vk::ImageView, (u32, u32))> {
        let Some(vk_texture) = texture.as_any().downcast_ref::<VulkanTexture>() else {
            return Err(Error::InvalidResource("attachment is not a Vulkan texture".to_string()));
        };
        let info = texture.info();
        if !info.usage.is_attachment() {
            return Err(Error::InvalidResource(format!(
                "texture {}x{} ({:?}) cannot be used as an attachment",
                info.width, info.height, info.usage
            )));
        }
        Ok((vk_texture.view, (info.width, info.height)))
    }

    fn build(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        (width, height): (u32, u32),
    ) -> Result<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(views)
            .width(width)
            .height(height)
            .layers(1);
        unsafe {
            self.ctx
                .device
                .create_framebuffer(&create_info, None)
                .map_err(|e| vk_error("vkCreateFramebuffer", e))
        }
    }

    /// One framebuffer per swapchain image, swapchain view first
    fn build_per_image(
        &self,
        render_pass: vk::RenderPass,
        swapchain_views: &[vk::ImageView],
        attachments: &[(vk::ImageView, (u32, u32))],
        extent: (u32, u32),
    ) -> Result<Vec<vk::Framebuffer>> {
        let mut framebuffers = Vec::with_capacity(swapchain_views.len());
        for &swapchain_view in swapchain_views {
            let views: Vec<vk::ImageView> = std::iter::once(swapchain_view)
                .chain(attachments.iter().map(|(view, _)| *view))
                .collect();
            match self.build(render_pass, &views, extent) {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    self.destroy_framebuffers(&framebuffers);
                    return Err(e);
                }
            }
        }
        Ok(framebuffers)
    }

    fn destroy_framebuffers(&self, framebuffers: &[vk::Framebuffer]) {
        for &fb in framebuffers {
            unsafe { self.ctx.device.destroy_framebuffer(fb, None) };
        }
    }

    pub fn create_framebuffer(
        &self,
        desc: &FramebufferDesc<'_>,
        swapchain_views: &[vk::ImageView],
        swapchain_extent: (u32, u32),
    ) -> Result<FramebufferId> {
        let (render_pass, color_count) = self.render_pass(desc.render_pass)?;
        let provided = desc.color_attachments.len() + usize::from(desc.swapchain);
        if provided != color_count {
            return Err(Error::InvalidResource(format!(
                "framebuffer has {} color attachment(s), render pass expects {}",
                provided, color_count
            )));
        }

        if desc.swapchain {
            let final_layout = lock(&self.render_passes)
                .get(desc.render_pass)
                .and_then(|rp| rp.desc.color_attachments.first().map(|a| a.final_layout));
            if let Some(layout) = final_layout.filter(|&l| !presentable(l)) {
                engine_warn!(
                    "lumen3d::vulkan",
                    "Swapchain framebuffer on a render pass ending in {:?}; presenting needs PresentSrc",
                    layout
                );
            }
        }

        let mut attachments = Vec::with_capacity(desc.color_attachments.len() + 1);
        for &texture in desc.color_attachments {
            attachments.push(Self::texture_view(texture)?);
        }
        if let Some(depth) = desc.depth_attachment {
            if !depth.info().format.is_depth() {
                return Err(Error::InvalidResource("depth attachment without a depth format".to_string()));
            }
            attachments.push(Self::texture_view(depth)?);
        }

        let extent = if desc.swapchain { swapchain_extent } else { (desc.width, desc.height) };
        if let Some((_, size)) = attachments.iter().find(|(_, (w, h))| *w < extent.0 || *h < extent.1) {
            return Err(Error::InvalidResource(format!(
                "attachment {}x{} smaller than framebuffer {}x{}",
                size.0, size.1, extent.0, extent.1
            )));
        }

        let framebuffers = if desc.swapchain {
            self.build_per_image(render_pass, swapchain_views, &attachments, extent)?
        } else {
            let views: Vec<vk::ImageView> = attachments.iter().map(|(view, _)| *view).collect();
            vec![self.build(render_pass, &views, extent)?]
        };

        Ok(lock(&self.framebuffers).insert(VulkanFramebuffer {
            render_pass: desc.render_pass,
            swapchain: desc.swapchain,
            attachments,
            framebuffers,
            extent,
            stale: false,
        }))
    }

    pub fn delete_framebuffer(&self, id: FramebufferId) {
        let Some(fb) = lock(&self.framebuffers).remove(id) else {
            engine_warn!("lumen3d::vulkan", "delete_framebuffer: unknown framebuffer {:?}", id);
            return;
        };
        self.destroy_framebuffers(&fb.framebuffers);
    }

    /// Rebuild every swapchain framebuffer against new swapchain views
    ///
    /// A framebuffer whose extra attachments are smaller than the new extent
    /// is marked stale; beginning a pass on it fails until it is recreated.
    pub fn rebuild_swapchain_framebuffers(&self, swapchain_views: &[vk::ImageView], extent: (u32, u32)) -> Result<()> {
        let render_passes = lock(&self.render_passes);
        let mut framebuffers = lock(&self.framebuffers);
        for (id, fb) in framebuffers.iter_mut().filter(|(_, fb)| fb.swapchain) {
            self.destroy_framebuffers(&fb.framebuffers);
            fb.framebuffers.clear();

            let fits = fb.attachments.iter().all(|(_, (w, h))| *w >= extent.0 && *h >= extent.1);
            let Some(rp) = render_passes.get(fb.render_pass).filter(|_| fits) else {
                engine_warn!(
                    "lumen3d::vulkan",
                    "Swapchain framebuffer {:?} is stale after resize to {}x{}; recreate it",
                    id,
                    extent.0,
                    extent.1
                );
                fb.stale = true;
                continue;
            };
            fb.framebuffers = self.build_per_image(rp.render_pass, swapchain_views, &fb.attachments, extent)?;
            fb.extent = extent;
            fb.stale = false;
        }
        Ok(())
    }

    /// Native objects for beginning `render_pass` on `framebuffer`
    pub(crate) fn resolve(&self, render_pass: RenderPassId, framebuffer: FramebufferId) -> Result<ResolvedFramebuffer> {
        let (vk_render_pass, color_count) = self.render_pass(render_pass)?;
        let framebuffers = lock(&self.framebuffers);
        let Some(fb) = framebuffers.get(framebuffer) else {
            return Err(Error::InvalidResource(format!("unknown framebuffer {:?}", framebuffer)));
        };
        if fb.stale {
            return Err(Error::InvalidResource(format!(
                "framebuffer {:?} was invalidated by a swapchain resize",
                framebuffer
            )));
        }
        if fb.render_pass != render_pass {
            engine_debug!(
                "lumen3d::vulkan",
                "Framebuffer {:?} used with render pass {:?} (created for {:?})",
                framebuffer,
                render_pass,
                fb.render_pass
            );
        }

        let index = if fb.swapchain { self.current_image() as usize } else { 0 };
        let Some(&native) = fb.framebuffers.get(index) else {
            return Err(Error::InvalidResource(format!(
                "framebuffer {:?} has no image {}",
                framebuffer, index
            )));
        };
        Ok(ResolvedFramebuffer {
            render_pass: vk_render_pass,
            framebuffer: native,
            extent: vk::Extent2D { width: fb.extent.0, height: fb.extent.1 },
            color_count,
        })
    }

    /// Destroy everything; called by `VulkanBackend::shutdown`
    pub fn clear(&self) {
        for (_, fb) in lock(&self.framebuffers).drain() {
            self.destroy_framebuffers(&fb.framebuffers);
        }
        for (_, rp) in lock(&self.render_passes).drain() {
            unsafe { self.ctx.device.destroy_render_pass(rp.render_pass, None) };
        }
    }
}

/// Stages and accesses of the EXTERNAL -> 0 dependency
pub(crate) fn subpass_dependency_masks(has_depth: bool) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    if has_depth {
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
    } else {
        (vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
    }
}

/// Layout a swapchain image is left in by a presenting pass
pub(crate) fn presentable(layout: ImageLayout) -> bool {
    image_layout_to_vk(layout) == vk::ImageLayout::PRESENT_SRC_KHR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_masks_include_depth_stage() {
        let (stages, access) = subpass_dependency_masks(true);
        assert!(stages.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));

        let (stages, access) = subpass_dependency_masks(false);
        assert_eq!(stages, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_presentable_layout() {
        assert!(presentable(ImageLayout::PresentSrc));
        assert!(!presentable(ImageLayout::ColorAttachment));
    }
}
