/// Pipeline trait and pipeline descriptor

use std::any::Any;

use crate::renderer::geometry::VertexLayout;
use crate::renderer::render_pass::RenderPassId;
use crate::renderer::shader::Shader;

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

// ===== RASTERIZATION =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    Fill,
    Line,
    Point,
}

/// Depth bias parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub slope_factor: f32,
    pub clamp: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub polygon_mode: PolygonMode,
    /// `None` = disabled
    pub depth_bias: Option<DepthBias>,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            polygon_mode: PolygonMode::Fill,
            depth_bias: None,
        }
    }
}

// ===== DEPTH/STENCIL =====

/// Comparison operator for depth and stencil tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareOp,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: CompareOp::Less,
        }
    }
}

impl DepthStencilState {
    /// No depth test, no depth write (full-screen quads, UI)
    pub fn disabled() -> Self {
        Self {
            depth_test_enable: false,
            depth_write_enable: false,
            depth_compare_op: CompareOp::Always,
        }
    }
}

// ===== COLOR BLEND =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Blend state of one color attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBlendState {
    pub blend_enable: bool,
    pub src_color_factor: BlendFactor,
    pub dst_color_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
}

impl Default for ColorBlendState {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_factor: BlendFactor::One,
            dst_color_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
        }
    }
}

impl ColorBlendState {
    /// Classic `src * a + dst * (1 - a)`
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color_factor: BlendFactor::SrcAlpha,
            dst_color_factor: BlendFactor::OneMinusSrcAlpha,
            color_blend_op: BlendOp::Add,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::OneMinusSrcAlpha,
            alpha_blend_op: BlendOp::Add,
        }
    }
}

// ===== PIPELINE DESCRIPTOR =====

/// Descriptor for creating a graphics pipeline
///
/// The pipeline layout comes from `shader` (its descriptor sets and push
/// constant ranges); viewport, scissor and blend constants are dynamic state.
#[derive(Clone)]
pub struct PipelineDesc<'a> {
    pub shader: &'a dyn Shader,
    pub vertex_layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub render_pass: RenderPassId,
    pub subpass: u32,
    pub rasterization: RasterizationState,
    pub depth_stencil: DepthStencilState,
    /// One entry per color attachment; an empty list means default state for all
    pub color_blend: Vec<ColorBlendState>,
    pub sample_count: u32,
}

impl<'a> PipelineDesc<'a> {
    pub fn new(shader: &'a dyn Shader, render_pass: RenderPassId, vertex_layout: VertexLayout) -> Self {
        Self {
            shader,
            vertex_layout,
            topology: PrimitiveTopology::TriangleList,
            render_pass,
            subpass: 0,
            rasterization: RasterizationState::default(),
            depth_stencil: DepthStencilState::default(),
            color_blend: Vec::new(),
            sample_count: 1,
        }
    }

    /// Blend state of color attachment `index`
    pub fn blend_for(&self, index: usize) -> ColorBlendState {
        self.color_blend.get(index).copied().unwrap_or_default()
    }
}

/// Pipeline resource trait
pub trait Pipeline: Send + Sync {
    fn topology(&self) -> PrimitiveTopology;

    fn render_pass(&self) -> RenderPassId;

    fn as_any(&self) -> &dyn Any;
}
