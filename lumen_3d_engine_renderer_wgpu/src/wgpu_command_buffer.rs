/// WgpuCommandBuffer - deferred command recording replayed into a wgpu encoder
///
/// wgpu render passes borrow their encoder and keep bound state per pass,
/// while the engine API binds state freely between passes. Commands are
/// therefore recorded as a list and encoded at submission: state bound
/// outside a pass is cached and applied when the next pass begins.

use lumen_3d_engine::{engine_trace, engine_warn};
use lumen_3d_engine::lumen3d::render::{
    ClearValue, CommandBuffer, ComplexSetHandle, FramebufferId, Geometry, ImageLayout, Pipeline, PrimitiveTopology,
    Rect2D, RecordingState, RenderPassId, Shader, ShaderStageFlags, Texture, Viewport,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use crate::wgpu_context::WgpuContext;
use crate::wgpu_format::{color_load_op, depth_load_op, store_op_to_wgpu};
use crate::wgpu_geometry::WgpuGeometry;
use crate::wgpu_pipeline::WgpuPipeline;
use crate::wgpu_render_pass::{RenderTargets, ResolvedPass};
use crate::wgpu_shader::WgpuShader;
use crate::wgpu_texture::WgpuTexture;

/// Triangles produced by `vertex_count` vertices of `topology`
pub(crate) fn triangle_count(topology: PrimitiveTopology, vertex_count: u32) -> u32 {
    match topology {
        PrimitiveTopology::TriangleList => vertex_count / 3,
        PrimitiveTopology::TriangleStrip => vertex_count.saturating_sub(2),
        PrimitiveTopology::LineList | PrimitiveTopology::PointList => 0,
    }
}

/// Scissor rectangle clipped to a `extent` render target, as wgpu's `(x, y, width, height)`
pub(crate) fn clamp_scissor(rect: Rect2D, extent: (u32, u32)) -> (u32, u32, u32, u32) {
    let x0 = (rect.x.max(0) as u32).min(extent.0);
    let y0 = (rect.y.max(0) as u32).min(extent.1);
    let x1 = (rect.x as i64 + rect.width as i64).clamp(0, extent.0 as i64) as u32;
    let y1 = (rect.y as i64 + rect.height as i64).clamp(0, extent.1 as i64) as u32;
    (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}

pub(crate) enum Command {
    CopyBuffer {
        src: wgpu::Buffer,
        dst: wgpu::Buffer,
        size: u64,
    },
    CopyBufferToTexture {
        src: wgpu::Buffer,
        bytes_per_row: u32,
        rows: u32,
        dst: wgpu::Texture,
        mip_level: u32,
        array_layer: u32,
        extent: wgpu::Extent3d,
    },
    BeginRenderPass {
        pass: ResolvedPass,
        clear_values: Vec<ClearValue>,
    },
    EndRenderPass,
    SetPipeline(wgpu::RenderPipeline),
    SetVertexBuffer {
        slot: u32,
        buffer: wgpu::Buffer,
    },
    SetIndexBuffer {
        buffer: wgpu::Buffer,
        format: wgpu::IndexFormat,
    },
    SetViewport(Viewport),
    SetScissor(Rect2D),
    SetBlendConstant([f32; 4]),
    SetBindGroup {
        index: u32,
        group: wgpu::BindGroup,
        offsets: Vec<u32>,
    },
    PushConstants {
        stages: wgpu::ShaderStages,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

/// Pass-independent state, re-applied at the start of every pass
#[derive(Default)]
struct BoundState {
    pipeline: Option<wgpu::RenderPipeline>,
    vertex_buffers: BTreeMap<u32, wgpu::Buffer>,
    index_buffer: Option<(wgpu::Buffer, wgpu::IndexFormat)>,
    bind_groups: BTreeMap<u32, (wgpu::BindGroup, Vec<u32>)>,
    viewport: Option<Viewport>,
    scissor: Option<Rect2D>,
    blend_constant: Option<[f32; 4]>,
    /// Stages, first offset and bytes from that offset
    push_constants: Option<(wgpu::ShaderStages, u32, Vec<u8>)>,
}

impl BoundState {
    fn record_push_constants(&mut self, stages: wgpu::ShaderStages, offset: u32, data: &[u8]) {
        let (start, mut bytes) = match self.push_constants.take() {
            Some((old_stages, start, bytes)) if old_stages == stages => (start, bytes),
            _ => (offset, Vec::new()),
        };
        let new_start = start.min(offset);
        if new_start < start {
            let mut grown = vec![0; (start - new_start) as usize];
            grown.extend_from_slice(&bytes);
            bytes = grown;
        }
        let at = (offset - new_start) as usize;
        if bytes.len() < at + data.len() {
            bytes.resize(at + data.len(), 0);
        }
        bytes[at..at + data.len()].copy_from_slice(data);
        self.push_constants = Some((stages, new_start, bytes));
    }

    fn apply(&self, pass: &mut wgpu::RenderPass<'static>, extent: (u32, u32)) {
        if let Some(pipeline) = &self.pipeline {
            pass.set_pipeline(pipeline);
        }
        for (&slot, buffer) in &self.vertex_buffers {
            pass.set_vertex_buffer(slot, buffer.slice(..));
        }
        if let Some((buffer, format)) = &self.index_buffer {
            pass.set_index_buffer(buffer.slice(..), *format);
        }
        for (&index, (group, offsets)) in &self.bind_groups {
            pass.set_bind_group(index, group, offsets);
        }
        if let Some(v) = self.viewport {
            pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
        }
        if let Some(rect) = self.scissor {
            let (x, y, w, h) = clamp_scissor(rect, extent);
            pass.set_scissor_rect(x, y, w, h);
        }
        if let Some([r, g, b, a]) = self.blend_constant {
            pass.set_blend_constant(wgpu::Color { r: r as f64, g: g as f64, b: b as f64, a: a as f64 });
        }
        if let Some((stages, offset, data)) = &self.push_constants {
            pass.set_push_constants(*stages, *offset, data);
        }
    }
}

fn begin_pass(encoder: &mut wgpu::CommandEncoder, resolved: &ResolvedPass, clear_values: &[ClearValue]) -> wgpu::RenderPass<'static> {
    let desc = &resolved.desc;
    let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = resolved
        .color_views
        .iter()
        .zip(&desc.color_attachments)
        .enumerate()
        .map(|(i, (view, attachment))| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load_op(attachment.load_op, clear_values.get(i).copied()),
                    store: store_op_to_wgpu(attachment.store_op),
                },
            })
        })
        .collect();

    let depth_stencil_attachment = match (&resolved.depth_view, &desc.depth_attachment) {
        (Some(view), Some(attachment)) => {
            let (depth_load, stencil_load) =
                depth_load_op(attachment.load_op, clear_values.get(desc.color_attachments.len()).copied());
            let store = store_op_to_wgpu(attachment.store_op);
            Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations { load: depth_load, store }),
                stencil_ops: attachment
                    .format
                    .has_stencil()
                    .then_some(wgpu::Operations { load: stencil_load, store }),
            })
        }
        _ => None,
    };

    encoder
        .begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("engine render pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        })
        .forget_lifetime()
}

/// Encode `commands` into one wgpu command buffer
pub(crate) fn encode(device: &wgpu::Device, commands: &[Command]) -> wgpu::CommandBuffer {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("engine commands"),
    });
    let mut state = BoundState::default();
    let mut pass: Option<(wgpu::RenderPass<'static>, (u32, u32))> = None;

    for command in commands {
        match command {
            Command::CopyBuffer { src, dst, size } => {
                encoder.copy_buffer_to_buffer(src, 0, dst, 0, *size);
            }
            Command::CopyBufferToTexture {
                src,
                bytes_per_row,
                rows,
                dst,
                mip_level,
                array_layer,
                extent,
            } => {
                encoder.copy_buffer_to_texture(
                    wgpu::TexelCopyBufferInfo {
                        buffer: src,
                        layout: wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(*bytes_per_row),
                            rows_per_image: Some(*rows),
                        },
                    },
                    wgpu::TexelCopyTextureInfo {
                        texture: dst,
                        mip_level: *mip_level,
                        origin: wgpu::Origin3d { x: 0, y: 0, z: *array_layer },
                        aspect: wgpu::TextureAspect::All,
                    },
                    *extent,
                );
            }
            Command::BeginRenderPass { pass: resolved, clear_values } => {
                let mut render_pass = begin_pass(&mut encoder, resolved, clear_values);
                state.apply(&mut render_pass, resolved.extent);
                pass = Some((render_pass, resolved.extent));
            }
            Command::EndRenderPass => pass = None,
            Command::SetPipeline(pipeline) => {
                if let Some((p, _)) = pass.as_mut() {
                    p.set_pipeline(pipeline);
                }
                state.pipeline = Some(pipeline.clone());
            }
            Command::SetVertexBuffer { slot, buffer } => {
                if let Some((p, _)) = pass.as_mut() {
                    p.set_vertex_buffer(*slot, buffer.slice(..));
                }
                state.vertex_buffers.insert(*slot, buffer.clone());
            }
            Command::SetIndexBuffer { buffer, format } => {
                if let Some((p, _)) = pass.as_mut() {
                    p.set_index_buffer(buffer.slice(..), *format);
                }
                state.index_buffer = Some((buffer.clone(), *format));
            }
            Command::SetViewport(v) => {
                if let Some((p, _)) = pass.as_mut() {
                    p.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
                }
                state.viewport = Some(*v);
            }
            Command::SetScissor(rect) => {
                if let Some((p, extent)) = pass.as_mut() {
                    let (x, y, w, h) = clamp_scissor(*rect, *extent);
                    p.set_scissor_rect(x, y, w, h);
                }
                state.scissor = Some(*rect);
            }
            Command::SetBlendConstant(c) => {
                if let Some((p, _)) = pass.as_mut() {
                    let [r, g, b, a] = *c;
                    p.set_blend_constant(wgpu::Color { r: r as f64, g: g as f64, b: b as f64, a: a as f64 });
                }
                state.blend_constant = Some(*c);
            }
            Command::SetBindGroup { index, group, offsets } => {
                if let Some((p, _)) = pass.as_mut() {
                    p.set_bind_group(*index, group, offsets);
                }
                state.bind_groups.insert(*index, (group.clone(), offsets.clone()));
            }
            Command::PushConstants { stages, offset, data } => {
                if let Some((p, _)) = pass.as_mut() {
                    p.set_push_constants(*stages, *offset, data);
                }
                state.record_push_constants(*stages, *offset, data);
            }
            Command::Draw { vertices, instances } => {
                if let Some((p, _)) = pass.as_mut() {
                    p.draw(vertices.clone(), instances.clone());
                }
            }
            Command::DrawIndexed {
                indices,
                base_vertex,
                instances,
            } => {
                if let Some((p, _)) = pass.as_mut() {
                    p.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                }
            }
        }
    }
    drop(pass);
    encoder.finish()
}

pub struct WgpuCommandBuffer {
    ctx: Arc<WgpuContext>,
    targets: Arc<RenderTargets>,
    commands: Vec<Command>,
    state: RecordingState,
    one_time: bool,
    /// Extent of the open render pass
    pass_extent: Option<(u32, u32)>,
    topology: Option<PrimitiveTopology>,
    draw_calls: u32,
    triangles: u32,
}

impl WgpuCommandBuffer {
    pub(crate) fn new(ctx: Arc<WgpuContext>, targets: Arc<RenderTargets>, one_time: bool) -> Self {
        Self {
            ctx,
            targets,
            commands: Vec::new(),
            state: RecordingState::new(),
            one_time,
            pass_extent: None,
            topology: None,
            draw_calls: 0,
            triangles: 0,
        }
    }

    /// Downcast a recording command buffer handed to an upload
    pub(crate) fn from_dyn(cmd: &mut dyn CommandBuffer) -> Result<&mut WgpuCommandBuffer> {
        cmd.as_any_mut()
            .downcast_mut::<WgpuCommandBuffer>()
            .ok_or_else(|| Error::InvalidResource("command buffer is not a wgpu command buffer".to_string()))
    }

    /// Record a copy; recording and outside a render pass
    pub(crate) fn record_transfer(&mut self, op: &str, command: Command) -> Result<()> {
        self.state.require_outside_render_pass(op)?;
        self.commands.push(command);
        Ok(())
    }

    /// Encode the last recording for queue submission
    pub(crate) fn finish(&self) -> Result<wgpu::CommandBuffer> {
        if self.state.is_recording() {
            return Err(Error::InvalidResource("command buffer submitted while recording".to_string()));
        }
        Ok(encode(&self.ctx.device, &self.commands))
    }

    /// Draw calls and triangles recorded since `begin`
    pub(crate) fn counters(&self) -> (u32, u32) {
        (self.draw_calls, self.triangles)
    }

    pub(crate) fn command_count(&self) -> usize {
        self.commands.len()
    }

    fn count_draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.draw_calls += 1;
        if let Some(topology) = self.topology {
            self.triangles += triangle_count(topology, vertex_count) * instance_count;
        }
    }

    fn downcast_geometry(geometry: &dyn Geometry) -> Result<&WgpuGeometry> {
        geometry
            .as_any()
            .downcast_ref::<WgpuGeometry>()
            .ok_or_else(|| Error::InvalidResource("geometry is not a wgpu geometry".to_string()))
    }

    fn downcast_shader(shader: &dyn Shader) -> Result<&WgpuShader> {
        shader
            .as_any()
            .downcast_ref::<WgpuShader>()
            .ok_or_else(|| Error::InvalidResource("shader is not a wgpu shader".to_string()))
    }
}

impl CommandBuffer for WgpuCommandBuffer {
    fn begin(&mut self) -> Result<()> {
        self.state.begin()?;
        self.commands.clear();
        self.pass_extent = None;
        self.topology = None;
        self.draw_calls = 0;
        self.triangles = 0;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.state.end()
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

        let (width, height) = resolved.extent;
        self.pass_extent = Some(resolved.extent);
        self.commands.push(Command::BeginRenderPass {
            pass: resolved,
            clear_values: clear_values.to_vec(),
        });
        if set_viewport_and_scissor {
            self.commands.push(Command::SetViewport(Viewport::full(width, height)));
            self.commands.push(Command::SetScissor(Rect2D::full(width, height)));
        }
        Ok(())
    }

    fn next_subpass(&mut self) -> Result<()> {
        self.state.require_render_pass("next_subpass")?;
        Err(Error::InvalidResource(
            "next_subpass: render passes have a single subpass".to_string(),
        ))
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.state.end_render_pass()?;
        self.pass_extent = None;
        self.commands.push(Command::EndRenderPass);
        Ok(())
    }

    fn bind_vertex_buffers(&mut self, geometry: &dyn Geometry, bindings_filter: u32) -> Result<()> {
        self.state.require_recording("bind_vertex_buffers")?;
        let geometry = Self::downcast_geometry(geometry)?;

        for binding in geometry.layout().filtered(bindings_filter) {
            let Some(buffer) = geometry.vertex_buffer(binding.binding) else {
                return Err(Error::InvalidResource(format!(
                    "vertex buffer {} not created",
                    binding.binding
                )));
            };
            self.commands.push(Command::SetVertexBuffer {
                slot: binding.binding,
                buffer,
            });
        }
        Ok(())
    }

    fn bind_index_buffer(&mut self, geometry: &dyn Geometry) -> Result<()> {
        self.state.require_recording("bind_index_buffer")?;
        let geometry = Self::downcast_geometry(geometry)?;
        let Some(buffer) = geometry.index_buffer() else {
            return Err(Error::InvalidResource("index buffer not created".to_string()));
        };
        self.commands.push(Command::SetIndexBuffer {
            buffer,
            format: geometry.wgpu_index_format(),
        });
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> Result<()> {
        self.state.require_recording("bind_pipeline")?;
        let Some(wgpu_pipeline) = pipeline.as_any().downcast_ref::<WgpuPipeline>() else {
            return Err(Error::InvalidResource("pipeline is not a wgpu pipeline".to_string()));
        };
        self.commands.push(Command::SetPipeline(wgpu_pipeline.pipeline.clone()));
        self.topology = Some(pipeline.topology());
        Ok(())
    }

    fn set_viewport(&mut self, viewports: &[Viewport]) -> Result<()> {
        self.state.require_recording("set_viewport")?;
        let Some(&first) = viewports.first() else {
            return Ok(());
        };
        if viewports.len() > 1 {
            engine_warn!("lumen3d::wgpu", "set_viewport: {} viewports given, wgpu uses the first", viewports.len());
        }
        self.commands.push(Command::SetViewport(first));
        Ok(())
    }

    fn set_scissor(&mut self, rects: &[Rect2D]) -> Result<()> {
        self.state.require_recording("set_scissor")?;
        let Some(&first) = rects.first() else {
            return Ok(());
        };
        if rects.len() > 1 {
            engine_warn!("lumen3d::wgpu", "set_scissor: {} rectangles given, wgpu uses the first", rects.len());
        }
        self.commands.push(Command::SetScissor(first));
        Ok(())
    }

    fn set_blend_constants(&mut self, constants: [f32; 4]) -> Result<()> {
        self.state.require_recording("set_blend_constants")?;
        self.commands.push(Command::SetBlendConstant(constants));
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
        let wgpu_shader = Self::downcast_shader(shader)?;
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

        let Some(offset) = wgpu_shader.update_uniform_buffer(set_number, uniform_data) else {
            return Ok(false);
        };
        let group = wgpu_shader.bind_group(set_number, complex_set)?;
        self.commands.push(Command::SetBindGroup {
            index: set_number,
            group,
            offsets: vec![offset],
        });
        Ok(true)
    }

    fn push_constants(&mut self, shader: &dyn Shader, stages: ShaderStageFlags, offset: u32, data: &[u8]) -> Result<()> {
        self.state.require_recording("push_constants")?;
        let wgpu_shader = Self::downcast_shader(shader)?;
        let declared = wgpu_shader.push_constant_stages(offset, data.len() as u32)?;
        engine_trace!(
            "lumen3d::wgpu",
            "push_constants {:?} widened to the merged range stages {:?}",
            stages,
            declared
        );
        self.commands.push(Command::PushConstants {
            stages: declared,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// wgpu tracks layouts itself; only the arguments are checked
    fn pipeline_image_memory_barrier(
        &mut self,
        texture: &dyn Texture,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        mip_levels: Range<u32>,
        array_layer: u32,
    ) -> Result<()> {
        self.state.require_outside_render_pass("pipeline_image_memory_barrier")?;
        if texture.as_any().downcast_ref::<WgpuTexture>().is_none() {
            return Err(Error::InvalidResource("texture is not a wgpu texture".to_string()));
        }
        let info = texture.info();
        if mip_levels.is_empty() || mip_levels.end > info.mip_levels || array_layer >= info.array_layers {
            return Err(Error::InvalidResource(format!(
                "barrier on mips {:?} layer {} of a texture with {} mips and {} layers",
                mip_levels, array_layer, info.mip_levels, info.array_layers
            )));
        }
        engine_trace!("lumen3d::wgpu", "barrier {:?} -> {:?} left to wgpu", old_layout, new_layout);
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        self.state.require_render_pass("draw")?;
        self.commands.push(Command::Draw {
            vertices: first_vertex..first_vertex + vertex_count,
            instances: first_instance..first_instance + instance_count,
        });
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
        self.commands.push(Command::DrawIndexed {
            indices: first_index..first_index + index_count,
            base_vertex: vertex_offset,
            instances: first_instance..first_instance + instance_count,
        });
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
        let buffer = encode(&self.ctx.device, &self.commands);
        self.ctx.submit_and_wait(vec![buffer])
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
