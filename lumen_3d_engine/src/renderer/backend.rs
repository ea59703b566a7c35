/// RenderBackend trait - what a graphics API implementation provides to the renderer

use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::renderer::command_buffer::{CommandBuffer, CommandBufferDesc};
use crate::renderer::frame::FrameCounter;
use crate::renderer::geometry::{Geometry, GeometryDesc};
use crate::renderer::pipeline::{Pipeline, PipelineDesc};
use crate::renderer::render_pass::{FramebufferDesc, FramebufferId, RenderPassDesc, RenderPassId};
use crate::renderer::shader::{Shader, ShaderDesc};
use crate::renderer::texture::{Texture, TextureDesc, TextureFormat};

/// Which backend a renderer runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Vulkan,
    Wgpu,
    Mock,
}

/// Renderer statistics, reset at every `begin_frame`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub draw_calls: u32,
    pub triangles: u32,
    /// GPU memory used (bytes)
    pub gpu_memory_used: u64,
}

/// Graphics backend
///
/// Implemented once per graphics API. The application builds one (from a
/// window and a [`Config`](crate::renderer::Config)) and hands it to
/// [`Renderer::new`](crate::renderer::Renderer::new), which drives it.
///
/// Creation methods take `&self` and may run on streaming threads; frame
/// methods take `&mut self` and run on the presenting thread only.
pub trait RenderBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Called once by the renderer before anything else
    ///
    /// # Arguments
    ///
    /// * `frames` - Frame counter shared with the renderer, used by the
    ///   backend to schedule deferred destruction of staging memory
    fn init(&mut self, frames: Arc<FrameCounter>) -> Result<()>;

    // ===== RESOURCES =====

    fn create_geometry(&self, desc: &GeometryDesc) -> Result<Arc<dyn Geometry>>;

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>>;

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<Arc<dyn Pipeline>>;

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn Texture>>;

    fn create_command_buffer(&self, desc: &CommandBufferDesc) -> Result<Arc<Mutex<dyn CommandBuffer>>>;

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId>;

    /// Destroy immediately; the renderer only calls this once the pass is out of flight
    fn delete_render_pass(&self, id: RenderPassId);

    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> Result<FramebufferId>;

    /// Destroy immediately; the renderer only calls this once the framebuffer is out of flight
    fn delete_framebuffer(&self, id: FramebufferId);

    // ===== FRAME =====

    /// Wait on `slot`'s fence, reset its command pool and, when presenting,
    /// acquire the next swapchain image
    fn begin_frame(&mut self, slot: usize, present: bool) -> Result<()>;

    /// Submit `command_buffers` (ended, in order) for `slot`, signalling the
    /// slot fence; waits on image acquisition when presenting
    fn submit(
        &mut self,
        slot: usize,
        command_buffers: &[Arc<Mutex<dyn CommandBuffer>>],
        present: bool,
    ) -> Result<()>;

    fn present(&mut self, slot: usize) -> Result<()>;

    fn wait_idle(&self) -> Result<()>;

    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    // ===== SWAPCHAIN =====

    fn swapchain_extent(&self) -> (u32, u32);

    fn swapchain_format(&self) -> TextureFormat;

    /// Image acquired by the last presenting `begin_frame`
    fn swapchain_buffer_index(&self) -> u32;

    fn num_swapchain_buffers(&self) -> u32;

    fn stats(&self) -> RendererStats;

    /// Release every backend-owned object; called after `wait_idle`
    fn shutdown(&mut self);
}
