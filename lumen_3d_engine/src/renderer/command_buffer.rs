/// CommandBuffer trait - backend-agnostic command recording

use std::any::Any;
use std::ops::Range;

use crate::engine_err;
use crate::error::Result;
use crate::renderer::descriptors::ShaderStageFlags;
use crate::renderer::geometry::Geometry;
use crate::renderer::pipeline::Pipeline;
use crate::renderer::render_pass::{FramebufferId, RenderPassId};
use crate::renderer::shader::{ComplexSetHandle, Shader};
use crate::renderer::texture::{ImageLayout, Texture};

/// Descriptor for creating a command buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandBufferDesc {
    /// Recorded once, submitted with `submit_and_wait`, then discarded.
    /// Otherwise one native buffer per ring slot, reused every frame.
    pub one_time_submit: bool,
}

/// Viewport dimensions and depth range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Whole `width x height` area, depth 0..1
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 2D rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2D {
    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }
}

/// Clear value for an attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl From<glam::Vec4> for ClearValue {
    fn from(color: glam::Vec4) -> Self {
        ClearValue::Color(color.to_array())
    }
}

/// Command buffer for recording rendering commands
///
/// Not internally synchronized: the renderer hands command buffers out
/// behind a `Mutex` and a caller keeps it locked while recording.
pub trait CommandBuffer: Send {
    /// Begin recording into the buffer of the current ring slot
    fn begin(&mut self) -> Result<()>;

    /// End recording
    fn end(&mut self) -> Result<()>;

    /// Begin a render pass
    ///
    /// # Arguments
    ///
    /// * `render_pass` - Render pass to begin
    /// * `framebuffer` - Framebuffer created for that render pass (swapchain
    ///   framebuffers resolve to the acquired image)
    /// * `clear_values` - One per attachment, in attachment order
    /// * `set_viewport_and_scissor` - Also set both to the full framebuffer
    fn begin_render_pass(
        &mut self,
        render_pass: RenderPassId,
        framebuffer: FramebufferId,
        clear_values: &[ClearValue],
        set_viewport_and_scissor: bool,
    ) -> Result<()>;

    /// Advance to the next subpass
    fn next_subpass(&mut self) -> Result<()>;

    fn end_render_pass(&mut self) -> Result<()>;

    /// Bind the vertex buffers of `geometry` whose binding bit is set in `bindings_filter`
    fn bind_vertex_buffers(&mut self, geometry: &dyn Geometry, bindings_filter: u32) -> Result<()>;

    fn bind_index_buffer(&mut self, geometry: &dyn Geometry) -> Result<()>;

    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> Result<()>;

    fn set_viewport(&mut self, viewports: &[Viewport]) -> Result<()>;

    fn set_scissor(&mut self, rects: &[Rect2D]) -> Result<()>;

    fn set_blend_constants(&mut self, constants: [f32; 4]) -> Result<()>;

    /// Write `uniform_data` into the shader's uniform ring and bind set `set_number`
    ///
    /// Binds `complex_set` when given, the set's default set otherwise.
    /// Returns `Ok(false)` when the set's uniform capacity is exhausted for
    /// this frame (nothing is bound).
    ///
    /// # Panics
    ///
    /// If the shader is not between `begin_bind_descriptors` and
    /// `end_bind_descriptors`.
    fn bind_descriptors(
        &mut self,
        shader: &dyn Shader,
        set_number: u32,
        uniform_data: &[u8],
        complex_set: Option<ComplexSetHandle>,
    ) -> Result<bool>;

    fn push_constants(
        &mut self,
        shader: &dyn Shader,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Result<()>;

    /// Transition `mip_levels` of one array layer of `texture`
    fn pipeline_image_memory_barrier(
        &mut self,
        texture: &dyn Texture,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        mip_levels: Range<u32>,
        array_layer: u32,
    ) -> Result<()>;

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()>;

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()>;

    /// Submit a one-time command buffer and block until the GPU is done with it
    fn submit_and_wait(&mut self) -> Result<()>;

    fn is_one_time_submit(&self) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Recording-state bookkeeping shared by the backend command buffers
///
/// Misuse (begin twice, end inside a render pass, draw outside one) is
/// logged and returned as `Error::BackendError`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingState {
    recording: bool,
    render_pass: Option<(RenderPassId, FramebufferId)>,
    subpass: u32,
    submitted: bool,
}

impl RecordingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn in_render_pass(&self) -> bool {
        self.render_pass.is_some()
    }

    /// Render pass and framebuffer currently open
    pub fn render_pass(&self) -> Option<(RenderPassId, FramebufferId)> {
        self.render_pass
    }

    pub fn subpass(&self) -> u32 {
        self.subpass
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.recording {
            return Err(engine_err!("lumen3d::CommandBuffer", "begin() while already recording"));
        }
        self.recording = true;
        self.submitted = false;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        self.require_recording("end")?;
        if self.render_pass.is_some() {
            return Err(engine_err!("lumen3d::CommandBuffer", "end() inside a render pass"));
        }
        self.recording = false;
        Ok(())
    }

    pub fn begin_render_pass(&mut self, render_pass: RenderPassId, framebuffer: FramebufferId) -> Result<()> {
        self.require_outside_render_pass("begin_render_pass")?;
        self.render_pass = Some((render_pass, framebuffer));
        self.subpass = 0;
        Ok(())
    }

    pub fn next_subpass(&mut self) -> Result<()> {
        self.require_render_pass("next_subpass")?;
        self.subpass += 1;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        self.require_render_pass("end_render_pass")?;
        self.render_pass = None;
        self.subpass = 0;
        Ok(())
    }

    pub fn require_recording(&self, op: &str) -> Result<()> {
        if !self.recording {
            return Err(engine_err!("lumen3d::CommandBuffer", "{}() outside begin/end", op));
        }
        Ok(())
    }

    pub fn require_render_pass(&self, op: &str) -> Result<()> {
        self.require_recording(op)?;
        if self.render_pass.is_none() {
            return Err(engine_err!("lumen3d::CommandBuffer", "{}() outside a render pass", op));
        }
        Ok(())
    }

    pub fn require_outside_render_pass(&self, op: &str) -> Result<()> {
        self.require_recording(op)?;
        if self.render_pass.is_some() {
            return Err(engine_err!("lumen3d::CommandBuffer", "{}() inside a render pass", op));
        }
        Ok(())
    }

    /// One-time submit bookkeeping: recording must be finished and not yet submitted
    pub fn mark_submitted(&mut self) -> Result<()> {
        if self.recording {
            return Err(engine_err!("lumen3d::CommandBuffer", "submit_and_wait() before end()"));
        }
        if self.submitted {
            return Err(engine_err!("lumen3d::CommandBuffer", "one-time command buffer submitted twice"));
        }
        self.submitted = true;
        Ok(())
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }
}

#[cfg(test)]
#[path = "command_buffer_tests.rs"]
mod tests;
