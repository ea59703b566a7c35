/// RenderTargets - render pass descriptions and framebuffers, addressed by id
///
/// wgpu has no render pass or framebuffer objects: a render pass here is
/// its validated description, a framebuffer the set of views it renders
/// to. Swapchain framebuffers take the surface texture acquired this frame
/// as color attachment 0.

use lumen_3d_engine::lumen3d::render::{
    lock, FramebufferDesc, FramebufferId, ImageLayout, RenderPassDesc, RenderPassId, Texture, TextureFormat,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use lumen_3d_engine::{engine_debug, engine_warn};
use slotmap::SlotMap;
use std::sync::Mutex;

use crate::wgpu_texture::WgpuTexture;

struct WgpuFramebuffer {
    render_pass: RenderPassId,
    swapchain: bool,
    /// Color views after the swapchain image, with the size of their texture
    colors: Vec<(wgpu::TextureView, (u32, u32))>,
    depth: Option<(wgpu::TextureView, (u32, u32))>,
    extent: (u32, u32),
    stale: bool,
}

/// Views and operations for one `begin_render_pass`
#[derive(Debug, Clone)]
pub(crate) struct ResolvedPass {
    pub desc: RenderPassDesc,
    pub color_views: Vec<wgpu::TextureView>,
    pub depth_view: Option<wgpu::TextureView>,
    pub extent: (u32, u32),
}

pub struct RenderTargets {
    render_passes: Mutex<SlotMap<RenderPassId, RenderPassDesc>>,
    framebuffers: Mutex<SlotMap<FramebufferId, WgpuFramebuffer>>,
    /// View of the surface texture acquired by the current frame
    surface_view: Mutex<Option<wgpu::TextureView>>,
}

impl Default for RenderTargets {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTargets {
    pub fn new() -> Self {
        Self {
            render_passes: Mutex::new(SlotMap::with_key()),
            framebuffers: Mutex::new(SlotMap::with_key()),
            surface_view: Mutex::new(None),
        }
    }

    pub(crate) fn set_surface_view(&self, view: Option<wgpu::TextureView>) {
        *lock(&self.surface_view) = view;
    }

    pub fn render_pass_count(&self) -> usize {
        lock(&self.render_passes).len()
    }

    pub fn framebuffer_count(&self) -> usize {
        lock(&self.framebuffers).len()
    }

    pub(crate) fn render_pass(&self, id: RenderPassId) -> Result<RenderPassDesc> {
        lock(&self.render_passes)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidResource(format!("unknown render pass {:?}", id)))
    }

    // ===== RENDER PASSES =====

    pub fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId> {
        validate_render_pass(desc)?;
        let id = lock(&self.render_passes).insert(desc.clone());
        engine_debug!(
            "lumen3d::wgpu",
            "Render pass {:?} created ({} attachment(s))",
            id,
            desc.attachment_count()
        );
        Ok(id)
    }

    pub fn delete_render_pass(&self, id: RenderPassId) {
        if lock(&self.render_passes).remove(id).is_none() {
            engine_warn!("lumen3d::wgpu", "delete_render_pass: unknown render pass {:?}", id);
        }
    }

    // ===== FRAMEBUFFERS =====

    fn texture_view(texture: &dyn Texture) -> Result<(wgpu::TextureView, (u32, u32))> {
        let Some(wgpu_texture) = texture.as_any().downcast_ref::<WgpuTexture>() else {
            return Err(Error::InvalidResource("attachment is not a wgpu texture".to_string()));
        };
        let info = texture.info();
        if !info.usage.is_attachment() {
            return Err(Error::InvalidResource(format!(
                "texture {}x{} ({:?}) cannot be used as an attachment",
                info.width, info.height, info.usage
            )));
        }
        Ok((wgpu_texture.attachment_view.clone(), (info.width, info.height)))
    }

    pub fn create_framebuffer(&self, desc: &FramebufferDesc<'_>, swapchain_extent: (u32, u32)) -> Result<FramebufferId> {
        let rp = self.render_pass(desc.render_pass)?;
        let provided = desc.color_attachments.len() + usize::from(desc.swapchain);
        if provided != rp.color_attachments.len() {
            return Err(Error::InvalidResource(format!(
                "framebuffer has {} color attachment(s), render pass expects {}",
                provided,
                rp.color_attachments.len()
            )));
        }
        if desc.depth_attachment.is_some() != rp.depth_attachment.is_some() {
            return Err(Error::InvalidResource(
                "framebuffer and render pass disagree on the depth attachment".to_string(),
            ));
        }
        if desc.swapchain {
            if let Some(layout) = rp.color_attachments.first().map(|a| a.final_layout) {
                if layout != ImageLayout::PresentSrc {
                    engine_warn!(
                        "lumen3d::wgpu",
                        "Swapchain framebuffer on a render pass ending in {:?}; presenting needs PresentSrc",
                        layout
                    );
                }
            }
        }

        let colors = desc
            .color_attachments
            .iter()
            .map(|&texture| Self::texture_view(texture))
            .collect::<Result<Vec<_>>>()?;
        let depth = match desc.depth_attachment {
            Some(texture) if !texture.info().format.is_depth() => {
                return Err(Error::InvalidResource("depth attachment without a depth format".to_string()));
            }
            Some(texture) => Some(Self::texture_view(texture)?),
            None => None,
        };

        let extent = if desc.swapchain { swapchain_extent } else { (desc.width, desc.height) };
        // wgpu renders to whole views, so every attachment matches the framebuffer
        let mut sizes = colors.iter().chain(depth.iter()).map(|(_, size)| *size);
        if let Some(size) = sizes.find(|&size| size != extent) {
            return Err(Error::InvalidResource(format!(
                "attachment {}x{} differs from framebuffer {}x{}",
                size.0, size.1, extent.0, extent.1
            )));
        }

        Ok(lock(&self.framebuffers).insert(WgpuFramebuffer {
            render_pass: desc.render_pass,
            swapchain: desc.swapchain,
            colors,
            depth,
            extent,
            stale: false,
        }))
    }

    pub fn delete_framebuffer(&self, id: FramebufferId) {
        if lock(&self.framebuffers).remove(id).is_none() {
            engine_warn!("lumen3d::wgpu", "delete_framebuffer: unknown framebuffer {:?}", id);
        }
    }

    /// Follow a surface resize
    ///
    /// Swapchain framebuffers whose extra attachments match the new extent
    /// follow it; the others are marked stale until recreated.
    pub fn resize_swapchain_framebuffers(&self, extent: (u32, u32)) {
        let mut framebuffers = lock(&self.framebuffers);
        for (id, fb) in framebuffers.iter_mut().filter(|(_, fb)| fb.swapchain) {
            let fits = fb.colors.iter().chain(fb.depth.iter()).all(|(_, size)| *size == extent);
            if fits {
                fb.extent = extent;
                fb.stale = false;
            } else {
                engine_warn!(
                    "lumen3d::wgpu",
                    "Swapchain framebuffer {:?} is stale after resize to {}x{}; recreate it",
                    id,
                    extent.0,
                    extent.1
                );
                fb.stale = true;
            }
        }
    }

    /// Views for beginning `render_pass` on `framebuffer`
    pub(crate) fn resolve(&self, render_pass: RenderPassId, framebuffer: FramebufferId) -> Result<ResolvedPass> {
        let desc = self.render_pass(render_pass)?;
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
                "lumen3d::wgpu",
                "Framebuffer {:?} used with render pass {:?} (created for {:?})",
                framebuffer,
                render_pass,
                fb.render_pass
            );
        }

        let mut color_views = Vec::with_capacity(fb.colors.len() + 1);
        if fb.swapchain {
            let Some(view) = lock(&self.surface_view).clone() else {
                return Err(Error::InvalidResource(format!(
                    "framebuffer {:?} needs a swapchain image; begin the frame with present = true",
                    framebuffer
                )));
            };
            color_views.push(view);
        }
        color_views.extend(fb.colors.iter().map(|(view, _)| view.clone()));

        Ok(ResolvedPass {
            desc,
            color_views,
            depth_view: fb.depth.as_ref().map(|(view, _)| view.clone()),
            extent: fb.extent,
        })
    }

    /// Drop everything; called by `WgpuBackend::shutdown`
    pub fn clear(&self) {
        lock(&self.framebuffers).clear();
        lock(&self.render_passes).clear();
        self.set_surface_view(None);
    }
}

/// Check a render pass description against what wgpu can express
pub(crate) fn validate_render_pass(desc: &RenderPassDesc) -> Result<()> {
    if desc.attachment_count() == 0 {
        return Err(Error::InvalidResource("render pass without attachments".to_string()));
    }
    for (i, color) in desc.color_attachments.iter().enumerate() {
        if color.format.is_depth() {
            return Err(Error::InvalidResource(format!(
                "color attachment {} has depth format {:?}",
                i, color.format
            )));
        }
    }
    if let Some(depth) = &desc.depth_attachment {
        if !depth.format.is_depth() {
            return Err(Error::InvalidResource(format!(
                "depth attachment has color format {:?}",
                depth.format
            )));
        }
    }
    let samples = desc
        .color_attachments
        .iter()
        .chain(desc.depth_attachment.iter())
        .map(|a| a.samples);
    for s in samples.clone() {
        if s != 1 && s != 4 {
            return Err(Error::InvalidResource(format!("wgpu supports 1 or 4 samples, not {}", s)));
        }
    }
    if samples.clone().any(|s| s != desc.color_attachments.first().map_or(s, |a| a.samples)) {
        return Err(Error::InvalidResource("attachments with different sample counts".to_string()));
    }
    Ok(())
}

/// Color formats of `desc`, in attachment order
pub(crate) fn color_formats(desc: &RenderPassDesc) -> Vec<TextureFormat> {
    desc.color_attachments.iter().map(|a| a.format).collect()
}
