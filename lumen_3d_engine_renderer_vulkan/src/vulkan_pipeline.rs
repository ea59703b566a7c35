/// VulkanPipeline - graphics pipeline built against a render pass and a shader's layout

use ash::vk;
use lumen_3d_engine::engine_debug;
use lumen_3d_engine::lumen3d::render::{
    ColorBlendState, Pipeline, PipelineDesc, PrimitiveTopology, RenderPassId, Shader,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::{vk_error, GpuContext};
use crate::vulkan_format::{
    blend_factor_to_vk, blend_op_to_vk, compare_op_to_vk, cull_mode_to_vk, front_face_to_vk,
    input_rate_to_vk, polygon_mode_to_vk, sample_count_to_vk, topology_to_vk, vertex_format_to_vk,
};
use crate::vulkan_render_pass::RenderTargets;
use crate::vulkan_shader::VulkanShader;

/// Viewport, scissor and blend constants are set while recording
pub(crate) const DYNAMIC_STATES: [vk::DynamicState; 3] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::BLEND_CONSTANTS,
];

pub struct VulkanPipeline {
    ctx: Arc<GpuContext>,
    pub(crate) pipeline: vk::Pipeline,
    topology: PrimitiveTopology,
    render_pass: RenderPassId,
}

fn blend_attachment(state: ColorBlendState) -> vk::PipelineColorBlendAttachmentState {
    let attachment = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(state.blend_enable);
    if !state.blend_enable {
        return attachment;
    }
    attachment
        .src_color_blend_factor(blend_factor_to_vk(state.src_color_factor))
        .dst_color_blend_factor(blend_factor_to_vk(state.dst_color_factor))
        .color_blend_op(blend_op_to_vk(state.color_blend_op))
        .src_alpha_blend_factor(blend_factor_to_vk(state.src_alpha_factor))
        .dst_alpha_blend_factor(blend_factor_to_vk(state.dst_alpha_factor))
        .alpha_blend_op(blend_op_to_vk(state.alpha_blend_op))
}

impl VulkanPipeline {
    pub fn new(ctx: Arc<GpuContext>, targets: &RenderTargets, desc: &PipelineDesc<'_>) -> Result<Self> {
        let Some(shader) = desc.shader.as_any().downcast_ref::<VulkanShader>() else {
            return Err(Error::InvalidResource("pipeline shader is not a Vulkan shader".to_string()));
        };
        let layout = shader.pipeline_layout();
        if layout == vk::PipelineLayout::null() {
            return Err(Error::InvalidResource(format!(
                "shader '{}' has no pipeline layout; call create_pipeline_layout first",
                shader.name()
            )));
        }
        if desc.subpass != 0 {
            return Err(Error::InvalidResource(format!(
                "subpass {} requested; render passes have a single subpass",
                desc.subpass
            )));
        }
        let (render_pass, color_count) = targets.render_pass(desc.render_pass)?;
        let has_depth = targets.has_depth_attachment(desc.render_pass);

        let stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> = shader
            .stages
            .iter()
            .map(|s| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(s.stage)
                    .module(s.module)
                    .name(&s.entry_point)
            })
            .collect();

        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_layout
            .bindings
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: input_rate_to_vk(b.input_rate),
            })
            .collect();
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_layout
            .attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: vertex_format_to_vk(a.format),
                offset: a.offset,
            })
            .collect();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(desc.topology))
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let raster = &desc.rasterization;
        let mut rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(polygon_mode_to_vk(raster.polygon_mode))
            .line_width(1.0)
            .cull_mode(cull_mode_to_vk(raster.cull_mode))
            .front_face(front_face_to_vk(raster.front_face))
            .depth_bias_enable(raster.depth_bias.is_some());
        if let Some(bias) = raster.depth_bias {
            rasterization_state = rasterization_state
                .depth_bias_constant_factor(bias.constant_factor)
                .depth_bias_slope_factor(bias.slope_factor)
                .depth_bias_clamp(bias.clamp);
        }

        let depth = &desc.depth_stencil;
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth && depth.depth_test_enable)
            .depth_write_enable(has_depth && depth.depth_write_enable)
            .depth_compare_op(compare_op_to_vk(depth.depth_compare_op))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(sample_count_to_vk(desc.sample_count));

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> =
            (0..color_count).map(|i| blend_attachment(desc.blend_for(i))).collect();
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(desc.subpass);

        let pipeline = unsafe {
            ctx.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
                .map_err(|(_, e)| vk_error("vkCreateGraphicsPipelines", e))?[0]
        };

        engine_debug!(
            "lumen3d::vulkan",
            "Pipeline created for shader '{}' ({:?}, {} color attachment(s))",
            shader.name(),
            desc.topology,
            color_count
        );
        Ok(Self {
            ctx,
            pipeline,
            topology: desc.topology,
            render_pass: desc.render_pass,
        })
    }
}

impl Pipeline for VulkanPipeline {
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

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_pipeline(self.pipeline, None) };
    }
}
