/// VulkanCommandBuffer - command recording on per-slot command pools
///
/// A frame command buffer owns one pool and one primary buffer per ring
/// slot; `begin` resets the pool of the current slot, whose previous
/// submission the slot fence has already waited for. A one-time command
/// buffer has a single pool and is submitted with `submit_and_wait`.

use ash::vk;
use lumen_3d_engine::lumen3d::render::{
    ClearValue, CommandBuffer, FrameCounter, FramebufferId, Geometry, ImageLayout, Pipeline,
    PrimitiveTopology, Rect2D, RecordingState, RenderPassId, Shader, ShaderStageFlags, Texture, Viewport,
    ComplexSetHandle, RING_BUFFER_SIZE,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use crate::vulkan_context::{vk_error, GpuContext};
use crate::vulkan_format::{clear_value_to_vk, rect_to_vk, shader_stages_to_vk, viewport_to_vk};
use crate::vulkan_geometry::VulkanGeometry;
use crate::vulkan_pipeline::VulkanPipeline;
use crate::vulkan_render_pass::RenderTargets;
use crate::vulkan_shader::VulkanShader;
use crate::vulkan_texture::{cmd_transition, VulkanTexture};

/// Triangles produced by `vertex_count` vertices of `topology`
pub(crate) fn triangle_count(topology: PrimitiveTopology, vertex_count: u32) -> u32 {
    match topology {
        PrimitiveTopology::TriangleList => vertex_count / 3,
        PrimitiveTopology::TriangleStrip => vertex_count.saturating_sub(2),
        PrimitiveTopology::LineList | PrimitiveTopology::PointList => 0,
    }
}

pub struct VulkanCommandBuffer {
    ctx: Arc<GpuContext>,
    frames: Arc<FrameCounter>,
    targets: Arc<RenderTargets>,
    pools: Vec<vk::CommandPool>,
    buffers: Vec<vk::CommandBuffer>,
    /// Pool/buffer index recorded into since the last `begin`
    current: usize,
    state: RecordingState,
    one_time: bool,
    topology: Option<PrimitiveTopology>,
    draw_calls: u32,
    triangles: u32,
}

impl VulkanCommandBuffer {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        frames: Arc<FrameCounter>,
        targets: Arc<RenderTargets>,
        one_time: bool,
    ) -> Result<Self> {
        let count = if one_time { 1 } else { RING_BUFFER_SIZE };
        let mut cmd = Self {
            ctx,
            frames,
            targets,
            pools: Vec::with_capacity(count),
            buffers: Vec::with_capacity(count),
            current: 0,
            state: RecordingState::new(),
            one_time,
            topology: None,
            draw_calls: 0,
            triangles: 0,
        };

        for _ in 0..count {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(cmd.ctx.graphics_queue_family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT);
            // Drop releases whatever was created before a failure
            let pool = unsafe {
                cmd.ctx
                    .device
                    .create_command_pool(&pool_info, None)
                    .map_err(|e| vk_error("vkCreateCommandPool", e))?
            };
            cmd.pools.push(pool);

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let buffer = unsafe {
                cmd.ctx
                    .device
                    .allocate_command_buffers(&alloc_info)
                    .map_err(|e| vk_error("vkAllocateCommandBuffers", e))?[0]
            };
            cmd.buffers.push(buffer);
        }
        Ok(cmd)
    }

    /// Downcast a recording command buffer handed to an upload
    pub(crate) fn from_dyn(cmd: &mut dyn CommandBuffer) -> Result<&mut VulkanCommandBuffer> {
        cmd.as_any_mut()
            .downcast_mut::<VulkanCommandBuffer>()
            .ok_or_else(|| Error::InvalidResource("command buffer is not a Vulkan command buffer".to_string()))
    }

    /// Native buffer for transfer commands; recording and outside a render pass
    pub(crate) fn transfer_handle(&mut self, op: &str) -> Result<vk::CommandBuffer> {
        self.state.require_outside_render_pass(op)?;
        Ok(self.buffers[self.current])
    }

    /// Native buffer of the last recording, for queue submission
    pub(crate) fn submit_handle(&self) -> Result<vk::CommandBuffer> {
        if self.state.is_recording() {
            return Err(Error::InvalidResource("command buffer submitted while recording".to_string()));
        }
        Ok(self.buffers[self.current])
    }

    /// Draw calls and triangles recorded since `begin`
    pub(crate) fn counters(&self) -> (u32, u32) {
        (self.draw_calls, self.triangles)
    }

    fn handle(&self) -> vk::CommandBuffer {
        self.buffers[self.current]
    }

    fn count_draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.draw_calls += 1;
        if let Some(topology) = self.topology {
            self.triangles += triangle_count(topology, vertex_count) * instance_count;
        }
    }
}

impl CommandBuffer for VulkanCommandBuffer {
    fn begin(&mut self) -> Result<()> {
        self.state.begin()?;
        self.current = if self.one_time { 0 } else { self.frames.ring_buffer_index() };
        self.topology = None;
        self.draw_calls = 0;
        self.triangles = 0;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let result = unsafe {
            self.ctx
                .device
                .reset_command_pool(self.pools[self.current], vk::CommandPoolResetFlags::empty())
                .and_then(|_| self.ctx.device.begin_command_buffer(self.handle(), &begin_info))
        };
        if let Err(e) = result {
            // Back to idle so a later begin can retry
            let _ = self.state.end();
            return Err(vk_error("vkBeginCommandBuffer", e));
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.state.end()?;
        unsafe {
            self.ctx
                .device
                .end_command_buffer(self.handle())
                .map_err(|e| vk_error("vkEndCommandBuffer", e))
        }
    }

    fn begin_render_pass(
        &mut self,
        render_pass: RenderPassId,
        framebuffer: FramebufferId,
        clear_values: &[ClearValue],
        set_viewport_and_scissor: bool,
    ) -> Result<()> {
        self.state.require_outside_render_pass("begin_render_pass")?;
        let resolved = self.targets.resolve(render_pass, framebuffer)?;
        self.state.begin_render_pass(render_pass, framebuffer)?;

        let clear_values: Vec<vk::ClearValue> = clear_values.iter().map(|&v| clear_value_to_vk(v)).collect();
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: resolved.extent,
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(resolved.render_pass)
            .framebuffer(resolved.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        let cb = self.handle();
        unsafe {
            self.ctx.device.cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
            if set_viewport_and_scissor {
                let viewport = viewport_to_vk(&Viewport::full(resolved.extent.width, resolved.extent.height));
                self.ctx.device.cmd_set_viewport(cb, 0, &[viewport]);
                self.ctx.device.cmd_set_scissor(cb, 0, &[render_area]);
            }
        }
        Ok(())
    }

    fn next_subpass(&mut self) -> Result<()> {
        self.state.next_subpass()?;
        unsafe {
            self.ctx.device.cmd_next_subpass(self.handle(), vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.state.end_render_pass()?;
        unsafe { self.ctx.device.cmd_end_render_pass(self.handle()) };
        Ok(())
    }

    fn bind_vertex_buffers(&mut self, geometry: &dyn Geometry, bindings_filter: u32) -> Result<()> {
        self.state.require_recording("bind_vertex_buffers")?;
        let Some(geometry) = geometry.as_any().downcast_ref::<VulkanGeometry>() else {
            return Err(Error::InvalidResource("geometry is not a Vulkan geometry".to_string()));
        };

        let cb = self.handle();
        for binding in geometry.layout().filtered(bindings_filter) {
            let Some(buffer) = geometry.vertex_buffer(binding.binding) else {
                return Err(Error::InvalidResource(format!(
                    "vertex buffer {} not created",
                    binding.binding
                )));
            };
            unsafe {
                self.ctx.device.cmd_bind_vertex_buffers(cb, binding.binding, &[buffer], &[0]);
            }
        }
        Ok(())
    }

    fn bind_index_buffer(&mut self, geometry: &dyn Geometry) -> Result<()> {
        self.state.require_recording("bind_index_buffer")?;
        let Some(geometry) = geometry.as_any().downcast_ref::<VulkanGeometry>() else {
            return Err(Error::InvalidResource("geometry is not a Vulkan geometry".to_string()));
        };
        let Some(buffer) = geometry.index_buffer() else {
            return Err(Error::InvalidResource("index buffer not created".to_string()));
        };
        unsafe {
            self.ctx
                .device
                .cmd_bind_index_buffer(self.handle(), buffer, 0, geometry.vk_index_type());
        }
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> Result<()> {
        self.state.require_recording("bind_pipeline")?;
        let Some(vk_pipeline) = pipeline.as_any().downcast_ref::<VulkanPipeline>() else {
            return Err(Error::InvalidResource("pipeline is not a Vulkan pipeline".to_string()));
        };
        unsafe {
            self.ctx
                .device
                .cmd_bind_pipeline(self.handle(), vk::PipelineBindPoint::GRAPHICS, vk_pipeline.pipeline);
        }
        self.topology = Some(pipeline.topology());
        Ok(())
    }

    fn set_viewport(&mut self, viewports: &[Viewport]) -> Result<()> {
        self.state.require_recording("set_viewport")?;
        let viewports: Vec<vk::Viewport> = viewports.iter().map(viewport_to_vk).collect();
        unsafe { self.ctx.device.cmd_set_viewport(self.handle(), 0, &viewports) };
        Ok(())
    }

    fn set_scissor(&mut self, rects: &[Rect2D]) -> Result<()> {
        self.state.require_recording("set_scissor")?;
        let rects: Vec<vk::Rect2D> = rects.iter().map(rect_to_vk).collect();
        unsafe { self.ctx.device.cmd_set_scissor(self.handle(), 0, &rects) };
        Ok(())
    }

    fn set_blend_constants(&mut self, constants: [f32; 4]) -> Result<()> {
        self.state.require_recording("set_blend_constants")?;
        unsafe { self.ctx.device.cmd_set_blend_constants(self.handle(), &constants) };
        Ok(())
    }

    fn bind_descriptors(
        &mut self,
        shader: &dyn Shader,
        set_number: u32,
        uniform_data: &[u8],
        complex_set: Option<ComplexSetHandle>,
    ) -> Result<bool> {
        self.state.require_recording("bind_descriptors")?;
        let Some(vk_shader) = shader.as_any().downcast_ref::<VulkanShader>() else {
            return Err(Error::InvalidResource("shader is not a Vulkan shader".to_string()));
        };
        if set_number >= shader.set_count() {
            return Err(Error::InvalidResource(format!(
                "bind_descriptors: set {} not declared ({} sets)",
                set_number,
                shader.set_count()
            )));
        }
        if let Some(handle) = complex_set.filter(|h| h.set_number != set_number) {
            return Err(Error::InvalidResource(format!(
                "complex set {} belongs to set {}, bound as set {}",
                handle.id, handle.set_number, set_number
            )));
        }

        let Some(offset) = vk_shader.update_uniform_buffer(set_number, uniform_data) else {
            return Ok(false);
        };
        let set = vk_shader.descriptor_set(set_number, complex_set)?;
        unsafe {
            self.ctx.device.cmd_bind_descriptor_sets(
                self.handle(),
                vk::PipelineBindPoint::GRAPHICS,
                vk_shader.pipeline_layout(),
                set_number,
                &[set],
                &[offset],
            );
        }
        Ok(true)
    }

    fn push_constants(&mut self, shader: &dyn Shader, stages: ShaderStageFlags, offset: u32, data: &[u8]) -> Result<()> {
        self.state.require_recording("push_constants")?;
        let Some(vk_shader) = shader.as_any().downcast_ref::<VulkanShader>() else {
            return Err(Error::InvalidResource("shader is not a Vulkan shader".to_string()));
        };
        unsafe {
            self.ctx.device.cmd_push_constants(
                self.handle(),
                vk_shader.pipeline_layout(),
                shader_stages_to_vk(stages),
                offset,
                data,
            );
        }
        Ok(())
    }

    fn pipeline_image_memory_barrier(
        &mut self,
        texture: &dyn Texture,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        mip_levels: Range<u32>,
        array_layer: u32,
    ) -> Result<()> {
        self.state.require_outside_render_pass("pipeline_image_memory_barrier")?;
        let Some(vk_texture) = texture.as_any().downcast_ref::<VulkanTexture>() else {
            return Err(Error::InvalidResource("texture is not a Vulkan texture".to_string()));
        };
        let info = texture.info();
        if mip_levels.is_empty() || mip_levels.end > info.mip_levels || array_layer >= info.array_layers {
            return Err(Error::InvalidResource(format!(
                "barrier on mips {:?} layer {} of a texture with {} mips and {} layers",
                mip_levels, array_layer, info.mip_levels, info.array_layers
            )));
        }
        unsafe {
            cmd_transition(
                &self.ctx.device,
                self.handle(),
                vk_texture.image,
                vk_texture.aspect,
                mip_levels,
                array_layer..array_layer + 1,
                old_layout,
                new_layout,
            );
        }
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        self.state.require_render_pass("draw")?;
        unsafe {
            self.ctx
                .device
                .cmd_draw(self.handle(), vertex_count, instance_count, first_vertex, first_instance);
        }
        self.count_draw(vertex_count, instance_count);
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.state.require_render_pass("draw_indexed")?;
        unsafe {
            self.ctx.device.cmd_draw_indexed(
                self.handle(),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        self.count_draw(index_count, instance_count);
        Ok(())
    }

    fn submit_and_wait(&mut self) -> Result<()> {
        if !self.one_time {
            return Err(Error::InvalidResource(
                "submit_and_wait() on a frame command buffer; enqueue it instead".to_string(),
            ));
        }
        self.state.mark_submitted()?;
        self.ctx.submit_and_wait(self.handle())
    }

    fn is_one_time_submit(&self) -> bool {
        self.one_time
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for VulkanCommandBuffer {
    fn drop(&mut self) {
        // Destroying a pool frees its buffers
        for &pool in &self.pools {
            unsafe { self.ctx.device.destroy_command_pool(pool, None) };
        }
    }
}
