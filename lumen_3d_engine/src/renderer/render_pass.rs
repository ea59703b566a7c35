/// Render pass and framebuffer descriptors
///
/// Render passes and framebuffers live in the backend and are referred to by
/// id; the renderer defers their deletion like any other GPU resource.

use slotmap::new_key_type;

use crate::renderer::texture::{ImageLayout, Texture, TextureFormat};

new_key_type! {
    /// Render pass created with `Renderer::create_render_pass`
    pub struct RenderPassId;
    /// Framebuffer created with `Renderer::create_framebuffer`
    pub struct FramebufferId;
}

/// Load operation for an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

/// Store operation for an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// One attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: TextureFormat,
    /// 1 = no MSAA
    pub samples: u32,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
}

impl AttachmentDesc {
    /// Cleared color attachment presented at the end of the pass
    pub fn present(format: TextureFormat) -> Self {
        Self {
            format,
            samples: 1,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::PresentSrc,
        }
    }

    /// Cleared depth attachment whose content is dropped after the pass
    pub fn depth(format: TextureFormat) -> Self {
        Self {
            format,
            samples: 1,
            load_op: LoadOp::Clear,
            store_op: StoreOp::DontCare,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::DepthStencilAttachment,
        }
    }

    /// Cleared color attachment sampled afterwards
    pub fn offscreen(format: TextureFormat) -> Self {
        Self {
            format,
            samples: 1,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::ShaderReadOnly,
        }
    }
}

/// Descriptor for creating a render pass (one subpass using every attachment)
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    pub color_attachments: Vec<AttachmentDesc>,
    pub depth_attachment: Option<AttachmentDesc>,
}

impl RenderPassDesc {
    pub fn attachment_count(&self) -> usize {
        self.color_attachments.len() + usize::from(self.depth_attachment.is_some())
    }
}

/// Descriptor for creating a framebuffer
///
/// With `swapchain` set, color attachment 0 is the acquired swapchain image
/// and `color_attachments` follow it; the backend keeps one native
/// framebuffer per swapchain image.
#[derive(Clone, Copy)]
pub struct FramebufferDesc<'a> {
    pub render_pass: RenderPassId,
    pub swapchain: bool,
    pub color_attachments: &'a [&'a dyn Texture],
    pub depth_attachment: Option<&'a dyn Texture>,
    pub width: u32,
    pub height: u32,
}

impl<'a> FramebufferDesc<'a> {
    /// Framebuffer over the swapchain images (plus an optional depth buffer)
    pub fn swapchain(
        render_pass: RenderPassId,
        depth_attachment: Option<&'a dyn Texture>,
        (width, height): (u32, u32),
    ) -> Self {
        Self {
            render_pass,
            swapchain: true,
            color_attachments: &[],
            depth_attachment,
            width,
            height,
        }
    }
}
