/// WgpuPipeline - render pipeline built against a render pass description and a shader's layout

use lumen_3d_engine::engine_debug;
use lumen_3d_engine::lumen3d::render::{
    ColorBlendState, Pipeline, PipelineDesc, PolygonMode, PrimitiveTopology, RenderPassId, Shader, VertexLayout,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use std::any::Any;
use std::sync::Arc;

use crate::wgpu_context::WgpuContext;
use crate::wgpu_format::{
    blend_factor_to_wgpu, blend_op_to_wgpu, compare_op_to_wgpu, cull_mode_to_wgpu, front_face_to_wgpu,
    input_rate_to_wgpu, polygon_mode_to_wgpu, texture_format_to_wgpu, topology_to_wgpu, vertex_format_to_wgpu,
};
use crate::wgpu_render_pass::{color_formats, RenderTargets};
use crate::wgpu_shader::WgpuShader;

pub struct WgpuPipeline {
    pub(crate) pipeline: wgpu::RenderPipeline,
    topology: PrimitiveTopology,
    render_pass: RenderPassId,
}

fn blend_state(state: ColorBlendState) -> Option<wgpu::BlendState> {
    state.blend_enable.then(|| wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: blend_factor_to_wgpu(state.src_color_factor),
            dst_factor: blend_factor_to_wgpu(state.dst_color_factor),
            operation: blend_op_to_wgpu(state.color_blend_op),
        },
        alpha: wgpu::BlendComponent {
            src_factor: blend_factor_to_wgpu(state.src_alpha_factor),
            dst_factor: blend_factor_to_wgpu(state.dst_alpha_factor),
            operation: blend_op_to_wgpu(state.alpha_blend_op),
        },
    })
}

/// Owned vertex buffer layout; wgpu's borrows its attributes
pub(crate) struct VertexBuffer {
    pub stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

/// One buffer layout per binding, slot = binding
///
/// wgpu addresses vertex buffers by slot index, so bindings must be 0..n.
pub(crate) fn vertex_buffers(layout: &VertexLayout) -> Result<Vec<VertexBuffer>> {
    let mut bindings: Vec<_> = layout.bindings.iter().collect();
    bindings.sort_by_key(|b| b.binding);
    if let Some((slot, b)) = bindings.iter().enumerate().find(|(slot, b)| b.binding != *slot as u32) {
        return Err(Error::InvalidResource(format!(
            "vertex binding {} at slot {}; wgpu needs bindings numbered 0..n",
            b.binding, slot
        )));
    }

    let mut buffers: Vec<VertexBuffer> = bindings
        .iter()
        .map(|b| VertexBuffer {
            stride: b.stride as u64,
            step_mode: input_rate_to_wgpu(b.input_rate),
            attributes: Vec::new(),
        })
        .collect();
    for a in &layout.attributes {
        let Some(buffer) = buffers.get_mut(a.binding as usize) else {
            return Err(Error::InvalidResource(format!(
                "attribute at location {} uses undeclared binding {}",
                a.location, a.binding
            )));
        };
        buffer.attributes.push(wgpu::VertexAttribute {
            format: vertex_format_to_wgpu(a.format),
            offset: a.offset as u64,
            shader_location: a.location,
        });
    }
    Ok(buffers)
}

impl WgpuPipeline {
    pub fn new(ctx: Arc<WgpuContext>, targets: &RenderTargets, desc: &PipelineDesc<'_>) -> Result<Self> {
        let Some(shader) = desc.shader.as_any().downcast_ref::<WgpuShader>() else {
            return Err(Error::InvalidResource("pipeline shader is not a wgpu shader".to_string()));
        };
        let Some(layout) = shader.pipeline_layout() else {
            return Err(Error::InvalidResource(format!(
                "shader '{}' has no pipeline layout; call create_pipeline_layout first",
                shader.name()
            )));
        };
        if desc.subpass != 0 {
            return Err(Error::InvalidResource(format!(
                "subpass {} requested; render passes have a single subpass",
                desc.subpass
            )));
        }
        let features = ctx.device.features();
        let polygon_feature = match desc.rasterization.polygon_mode {
            PolygonMode::Fill => None,
            PolygonMode::Line => Some(wgpu::Features::POLYGON_MODE_LINE),
            PolygonMode::Point => Some(wgpu::Features::POLYGON_MODE_POINT),
        };
        if let Some(feature) = polygon_feature.filter(|&f| !features.contains(f)) {
            return Err(Error::InvalidResource(format!(
                "{:?} rasterization needs {:?}",
                desc.rasterization.polygon_mode, feature
            )));
        }

        let rp = targets.render_pass(desc.render_pass)?;
        let owned_buffers = vertex_buffers(&desc.vertex_layout)?;
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = owned_buffers
            .iter()
            .map(|b| wgpu::VertexBufferLayout {
                array_stride: b.stride,
                step_mode: b.step_mode,
                attributes: &b.attributes,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = color_formats(&rp)
            .into_iter()
            .enumerate()
            .map(|(i, format)| {
                Some(wgpu::ColorTargetState {
                    format: texture_format_to_wgpu(format),
                    blend: blend_state(desc.blend_for(i)),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let raster = &desc.rasterization;
        let depth = &desc.depth_stencil;
        let depth_stencil = rp.depth_attachment.map(|attachment| wgpu::DepthStencilState {
            format: texture_format_to_wgpu(attachment.format),
            depth_write_enabled: depth.depth_write_enable,
            depth_compare: if depth.depth_test_enable {
                compare_op_to_wgpu(depth.depth_compare_op)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: raster.depth_bias.map_or_else(wgpu::DepthBiasState::default, |bias| wgpu::DepthBiasState {
                constant: bias.constant_factor.round() as i32,
                slope_scale: bias.slope_factor,
                clamp: bias.clamp,
            }),
        });

        let pipeline = ctx.scoped(&format!("pipeline for shader '{}'", shader.name()), |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(shader.name()),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader.vertex.module,
                    entry_point: Some(&shader.vertex.entry_point),
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                primitive: wgpu::PrimitiveState {
                    topology: topology_to_wgpu(desc.topology),
                    strip_index_format: None,
                    front_face: front_face_to_wgpu(raster.front_face),
                    cull_mode: cull_mode_to_wgpu(raster.cull_mode),
                    unclipped_depth: false,
                    polygon_mode: polygon_mode_to_wgpu(raster.polygon_mode),
                    conservative: false,
                },
                depth_stencil,
                multisample: wgpu::MultisampleState {
                    count: desc.sample_count,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                fragment: shader.fragment.as_ref().map(|fragment| wgpu::FragmentState {
                    module: &fragment.module,
                    entry_point: Some(&fragment.entry_point),
                    compilation_options: Default::default(),
                    targets: &color_targets,
                }),
                multiview: None,
                cache: None,
            })
        })?;

        engine_debug!(
            "lumen3d::wgpu",
            "Pipeline created for shader '{}' ({:?}, {} color attachment(s))",
            shader.name(),
            desc.topology,
            color_targets.len()
        );
        Ok(Self {
            pipeline,
            topology: desc.topology,
            render_pass: desc.render_pass,
        })
    }
}

impl Pipeline for WgpuPipeline {
    fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    fn render_pass(&self) -> RenderPassId {
        self.render_pass
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
