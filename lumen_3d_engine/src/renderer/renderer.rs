/// Renderer - explicit rendering context driving one backend
///
/// Owns the frame counter, the resource registries with their
/// deferred-destruction queue, the scheduled-update list, the primary
/// command buffer and the unit quad, and runs the frame loop:
///
/// ```text
/// begin_frame(present) -> record into command_buffer() -> end_frame(present) -> present()
/// ```

use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::error::Result;
use crate::renderer::backend::{BackendKind, RenderBackend, RendererStats};
use crate::renderer::command_buffer::{CommandBuffer, CommandBufferDesc};
use crate::renderer::frame::{FrameCounter, FrameState, RING_BUFFER_SIZE};
use crate::renderer::geometry::{
    GeometryDesc, VertexAttribute, VertexBinding, VertexFormat, VertexInputRate, VertexLayout,
    ALL_BINDINGS,
};
use crate::renderer::handle::{
    lock, CommandBufferKind, CommandBufferPtr, CommandBufferPwn, GeometryKind, GeometryPwn,
    PendingObject, Registries, TextureKind,
};
use crate::renderer::render_pass::{FramebufferDesc, FramebufferId, RenderPassDesc, RenderPassId};
use crate::renderer::scheduled::{Scheduled, ScheduledList};
use crate::renderer::texture::TextureFormat;
use crate::{engine_debug, engine_error, engine_info, engine_warn};

/// Vertex of the renderer-owned unit quad
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: Vec3,
    pub tex_coord: Vec2,
}

const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: Vec3::new(-1.0, -1.0, 0.0), tex_coord: Vec2::new(0.0, 0.0) },
    QuadVertex { position: Vec3::new(1.0, -1.0, 0.0), tex_coord: Vec2::new(1.0, 0.0) },
    QuadVertex { position: Vec3::new(1.0, 1.0, 0.0), tex_coord: Vec2::new(1.0, 1.0) },
    QuadVertex { position: Vec3::new(-1.0, 1.0, 0.0), tex_coord: Vec2::new(0.0, 1.0) },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

pub struct Renderer {
    backend: Box<dyn RenderBackend>,
    frames: Arc<FrameCounter>,
    registries: Arc<Registries>,
    scheduled: Mutex<ScheduledList>,
    state: FrameState,
    presenting: bool,
    command_buffer: CommandBufferPwn,
    queued: Vec<Arc<Mutex<dyn CommandBuffer>>>,
    quad: GeometryPwn,
}

impl Renderer {
    /// Take ownership of `backend`, initialize it and create the renderer-owned resources
    pub fn new(mut backend: Box<dyn RenderBackend>) -> Result<Self> {
        let frames = Arc::new(FrameCounter::new());
        backend.init(Arc::clone(&frames))?;

        let mut renderer = Self {
            backend,
            registries: Arc::new(Registries::new(Arc::clone(&frames))),
            frames,
            scheduled: Mutex::new(ScheduledList::new()),
            state: FrameState::Initialized,
            presenting: false,
            command_buffer: CommandBufferPwn::new(),
            queued: Vec::new(),
            quad: GeometryPwn::new(),
        };

        let mut command_buffer = CommandBufferPwn::new();
        command_buffer.init(&renderer, &CommandBufferDesc::default())?;
        renderer.command_buffer = command_buffer;

        let mut quad = GeometryPwn::new();
        quad.init(&renderer, &GeometryDesc { layout: Self::quad_vertex_layout(), ..Default::default() })?;
        if let Some(geometry) = quad.get() {
            geometry.create_vertex_buffer(QUAD_VERTICES.len() as u32, 0)?;
            geometry.update_vertex_buffer(bytemuck::cast_slice(&QUAD_VERTICES), 0, None)?;
            geometry.create_index_buffer(QUAD_INDICES.len() as u32)?;
            geometry.update_index_buffer(bytemuck::cast_slice(&QUAD_INDICES), None)?;
        }
        renderer.quad = quad;

        engine_info!(
            "lumen3d::Renderer",
            "Renderer initialized ({:?}, {} frames in flight, swapchain {}x{})",
            renderer.backend.kind(),
            RING_BUFFER_SIZE,
            renderer.backend.swapchain_extent().0,
            renderer.backend.swapchain_extent().1
        );
        Ok(renderer)
    }

    /// Layout of the unit quad drawn by [`draw_quad`](Self::draw_quad):
    /// position (location 0) and texture coordinate (location 1)
    pub fn quad_vertex_layout() -> VertexLayout {
        VertexLayout {
            bindings: vec![VertexBinding {
                binding: 0,
                stride: std::mem::size_of::<QuadVertex>() as u32,
                input_rate: VertexInputRate::Vertex,
            }],
            attributes: vec![
                VertexAttribute { location: 0, binding: 0, format: VertexFormat::R32G32B32_SFLOAT, offset: 0 },
                VertexAttribute { location: 1, binding: 0, format: VertexFormat::R32G32_SFLOAT, offset: 12 },
            ],
        }
    }

    pub fn backend(&self) -> &dyn RenderBackend {
        self.backend.as_ref()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub(crate) fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    // ===== FRAME LOOP =====

    fn assert_state(&self, expected: &[FrameState], op: &str) {
        assert!(
            expected.contains(&self.state),
            "Renderer::{}() called in state {:?} (expected one of {:?})",
            op,
            self.state,
            expected
        );
    }

    /// Wait for this ring slot, acquire a swapchain image when presenting and
    /// begin the primary command buffer
    ///
    /// Deferred destructions run here, once the slot fence has been waited:
    /// the frame that last used this slot is then known to be complete.
    pub fn begin_frame(&mut self, present: bool) -> Result<()> {
        assert!(
            self.state.can_begin_frame(),
            "Renderer::begin_frame() called in state {:?}",
            self.state
        );
        let slot = self.frames.ring_buffer_index();
        self.backend.begin_frame(slot, present)?;
        self.collect_garbage();
        self.command_buffer.lock().begin()?;

        self.presenting = present;
        self.state = FrameState::Recording;
        Ok(())
    }

    /// Primary command buffer, valid between `begin_frame` and `end_frame`
    pub fn command_buffer(&self) -> CommandBufferPtr<'_> {
        self.command_buffer.ptr()
    }

    /// Submit `cmd` after the primary command buffer at `end_frame`
    ///
    /// `cmd` must be a ring command buffer that has been ended.
    pub fn enqueue(&mut self, cmd: CommandBufferPtr<'_>) {
        self.assert_state(&[FrameState::Recording], "enqueue");
        let Some(shared) = cmd.shared() else {
            panic!("Renderer::enqueue() with a null CommandBufferPtr");
        };
        assert!(
            !lock(&shared).is_one_time_submit(),
            "one-time command buffers are submitted with submit_and_wait()"
        );
        self.queued.push(shared);
    }

    /// End the primary command buffer and submit it with every enqueued one
    ///
    /// Without `present` the frame is complete here: the counter advances and
    /// scheduled objects are polled (offscreen rendering).
    pub fn end_frame(&mut self, present: bool) -> Result<()> {
        self.assert_state(&[FrameState::Recording], "end_frame");
        assert_eq!(
            present, self.presenting,
            "end_frame(present) must match begin_frame(present)"
        );

        let Some(primary) = self.command_buffer.ptr().shared() else {
            unreachable!("primary command buffer released before shutdown");
        };
        lock(&primary).end()?;

        let mut submission = Vec::with_capacity(1 + self.queued.len());
        submission.push(primary);
        submission.append(&mut self.queued);

        let slot = self.frames.ring_buffer_index();
        self.backend.submit(slot, &submission, present)?;
        self.state = FrameState::Submitted;

        if !present {
            self.finish_frame();
        }
        Ok(())
    }

    /// Present the acquired image and advance to the next frame
    pub fn present(&mut self) -> Result<()> {
        self.assert_state(&[FrameState::Submitted], "present");
        assert!(self.presenting, "present() after end_frame(false)");

        let slot = self.frames.ring_buffer_index();
        self.backend.present(slot)?;
        self.finish_frame();
        Ok(())
    }

    fn finish_frame(&mut self) {
        self.frames.advance();
        self.state = FrameState::Presented;
        self.update_scheduled();
    }

    /// Destroy pending objects whose frame has passed and release finished staging buffers
    fn collect_garbage(&self) {
        for (kind, object) in self.registries.take_allowed() {
            self.destroy_pending(kind, object);
        }
        for geometry in self.registries.snapshot::<GeometryKind>() {
            geometry.destroy_staging_buffers(&self.frames);
        }
        for texture in self.registries.snapshot::<TextureKind>() {
            texture.destroy_staging_buffers(&self.frames);
        }
    }

    fn destroy_pending(&self, kind: &'static str, object: PendingObject) {
        match object {
            PendingObject::Resource(resource) => {
                engine_debug!("lumen3d::Renderer", "Destroying deferred {}", kind);
                drop(resource);
            }
            PendingObject::RenderPass(id) => self.backend.delete_render_pass(id),
            PendingObject::Framebuffer(id) => self.backend.delete_framebuffer(id),
        }
    }

    /// Poll every registered scheduled object now
    pub fn update_scheduled(&self) {
        lock(&self.scheduled).update_all(&self.frames);
    }

    /// Poll `object` once per presented frame until its update breaks
    pub fn register_scheduled(&self, object: &Arc<Mutex<dyn Scheduled>>) {
        lock(&self.scheduled).register(object);
    }

    pub fn unregister_scheduled(&self, object: &Arc<Mutex<dyn Scheduled>>) {
        lock(&self.scheduled).unregister(object);
    }

    pub fn scheduled_count(&self) -> usize {
        lock(&self.scheduled).len()
    }

    // ===== HELPERS =====

    /// Record a one-time command buffer, submit it and wait for completion
    pub fn one_time_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&mut dyn CommandBuffer) -> Result<()>,
    {
        let mut cmd = CommandBufferPwn::new();
        cmd.init(self, &CommandBufferDesc { one_time_submit: true })?;
        {
            let mut guard = cmd.lock();
            guard.begin()?;
            record(&mut *guard)?;
            guard.end()?;
            guard.submit_and_wait()?;
        }
        cmd.done();
        Ok(())
    }

    /// Draw the unit quad (two triangles covering clip space)
    pub fn draw_quad(&self, cmd: &mut dyn CommandBuffer) -> Result<()> {
        let Some(quad) = self.quad.get() else {
            panic!("Renderer::draw_quad() after shutdown");
        };
        cmd.bind_vertex_buffers(quad, ALL_BINDINGS)?;
        cmd.bind_index_buffer(quad)?;
        cmd.draw_indexed(QUAD_INDICES.len() as u32, 1, 0, 0, 0)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.backend.wait_idle()
    }

    /// Recreate the swapchain (and swapchain framebuffers) after a window resize
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        assert!(
            self.state != FrameState::Recording && self.state != FrameState::Shutdown,
            "Renderer::resize() called in state {:?}",
            self.state
        );
        self.backend.wait_idle()?;
        self.backend.resize(width, height)
    }

    pub fn stats(&self) -> RendererStats {
        self.backend.stats()
    }

    // ===== RENDER PASSES / FRAMEBUFFERS =====

    pub fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId> {
        self.backend.create_render_pass(desc)
    }

    /// Deferred like resource handles
    pub fn delete_render_pass(&self, id: RenderPassId) {
        self.registries.defer("RenderPass", PendingObject::RenderPass(id), false);
    }

    pub fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> Result<FramebufferId> {
        self.backend.create_framebuffer(desc)
    }

    /// Deferred like resource handles
    pub fn delete_framebuffer(&self, id: FramebufferId) {
        self.registries.defer("Framebuffer", PendingObject::Framebuffer(id), false);
    }

    // ===== ACCESSORS =====

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frame_count(&self) -> u64 {
        self.frames.frame_count()
    }

    /// Shared counter, for objects that schedule their own deferred work
    pub fn frame_counter(&self) -> &Arc<FrameCounter> {
        &self.frames
    }

    /// Frames in flight
    pub fn num_frames(&self) -> usize {
        RING_BUFFER_SIZE
    }

    pub fn ring_buffer_index(&self) -> usize {
        self.frames.ring_buffer_index()
    }

    pub fn swapchain_buffer_index(&self) -> u32 {
        self.backend.swapchain_buffer_index()
    }

    pub fn num_swapchain_buffers(&self) -> u32 {
        self.backend.num_swapchain_buffers()
    }

    pub fn swapchain_extent(&self) -> (u32, u32) {
        self.backend.swapchain_extent()
    }

    pub fn swapchain_format(&self) -> TextureFormat {
        self.backend.swapchain_format()
    }

    /// Resources still owned by a `Pwn`
    pub fn live_resources(&self) -> usize {
        self.registries.live_resources()
    }

    /// Released resources waiting for their frame
    pub fn pending_destructions(&self) -> usize {
        self.registries.pending_destructions()
    }

    // ===== SHUTDOWN =====

    /// Drain the GPU, destroy everything pending and tear the backend down
    ///
    /// Returns the number of resources still owned by a `Pwn` (leaks), each
    /// reported with an error log.
    pub fn shutdown(&mut self) -> usize {
        self.assert_state(
            &[FrameState::Initialized, FrameState::Submitted, FrameState::Presented],
            "shutdown",
        );

        if let Err(e) = self.backend.wait_idle() {
            engine_warn!("lumen3d::Renderer", "wait_idle failed during shutdown: {}", e);
        }

        self.queued.clear();
        self.command_buffer.done();
        self.quad.done();
        lock(&self.scheduled).update_all(&self.frames);

        for (kind, object) in self.registries.take_all() {
            self.destroy_pending(kind, object);
        }

        let mut leaks = 0;
        for (kind, count) in self.registries.live_by_kind() {
            if count > 0 {
                engine_error!("lumen3d::Renderer", "{} {} resource(s) still alive at shutdown", count, kind);
                leaks += count;
            }
        }

        self.backend.shutdown();
        self.state = FrameState::Shutdown;
        engine_info!(
            "lumen3d::Renderer",
            "Renderer shut down after {} frames ({} leak(s))",
            self.frames.frame_count(),
            leaks
        );
        leaks
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        match self.state {
            FrameState::Shutdown | FrameState::Uninitialized => {}
            FrameState::Recording => {
                engine_warn!("lumen3d::Renderer", "Renderer dropped while recording a frame");
                self.backend.shutdown();
            }
            _ => {
                self.shutdown();
            }
        }
    }
}

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;
