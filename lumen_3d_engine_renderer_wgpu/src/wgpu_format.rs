/// Engine enums to wgpu enums

use lumen_3d_engine::lumen3d::render::{
    BlendFactor, BlendOp, ClearValue, CompareOp, CullMode, FrontFace, IndexType, LoadOp, PolygonMode,
    PrimitiveTopology, ShaderStageFlags, StoreOp, TextureFormat, VertexFormat, VertexInputRate,
};

pub(crate) fn texture_format_to_wgpu(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8_UNORM => wgpu::TextureFormat::R8Unorm,
        TextureFormat::R8G8B8A8_SRGB => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::R8G8B8A8_UNORM => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::B8G8R8A8_SRGB => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::B8G8R8A8_UNORM => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::R16G16B16A16_SFLOAT => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::R32_SFLOAT => wgpu::TextureFormat::R32Float,
        TextureFormat::D16_UNORM => wgpu::TextureFormat::Depth16Unorm,
        TextureFormat::D32_FLOAT => wgpu::TextureFormat::Depth32Float,
        // Closest portable format; wgpu picks the depth bits
        TextureFormat::D24_UNORM_S8_UINT => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

/// Surface formats the engine can name
pub(crate) fn texture_format_from_wgpu(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    match format {
        wgpu::TextureFormat::Bgra8UnormSrgb => Some(TextureFormat::B8G8R8A8_SRGB),
        wgpu::TextureFormat::Bgra8Unorm => Some(TextureFormat::B8G8R8A8_UNORM),
        wgpu::TextureFormat::Rgba8UnormSrgb => Some(TextureFormat::R8G8B8A8_SRGB),
        wgpu::TextureFormat::Rgba8Unorm => Some(TextureFormat::R8G8B8A8_UNORM),
        wgpu::TextureFormat::Rgba16Float => Some(TextureFormat::R16G16B16A16_SFLOAT),
        _ => None,
    }
}

pub(crate) fn vertex_format_to_wgpu(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::R32_SFLOAT => wgpu::VertexFormat::Float32,
        VertexFormat::R32G32_SFLOAT => wgpu::VertexFormat::Float32x2,
        VertexFormat::R32G32B32_SFLOAT => wgpu::VertexFormat::Float32x3,
        VertexFormat::R32G32B32A32_SFLOAT => wgpu::VertexFormat::Float32x4,
        VertexFormat::R32_UINT => wgpu::VertexFormat::Uint32,
        VertexFormat::R32G32_UINT => wgpu::VertexFormat::Uint32x2,
        VertexFormat::R16G16_SINT => wgpu::VertexFormat::Sint16x2,
        VertexFormat::R16G16B16A16_SINT => wgpu::VertexFormat::Sint16x4,
        VertexFormat::R8G8B8A8_UNORM => wgpu::VertexFormat::Unorm8x4,
        VertexFormat::R8G8B8A8_UINT => wgpu::VertexFormat::Uint8x4,
    }
}

pub(crate) fn input_rate_to_wgpu(rate: VertexInputRate) -> wgpu::VertexStepMode {
    match rate {
        VertexInputRate::Vertex => wgpu::VertexStepMode::Vertex,
        VertexInputRate::Instance => wgpu::VertexStepMode::Instance,
    }
}

pub(crate) fn index_type_to_wgpu(index_type: IndexType) -> wgpu::IndexFormat {
    match index_type {
        IndexType::U16 => wgpu::IndexFormat::Uint16,
        IndexType::U32 => wgpu::IndexFormat::Uint32,
    }
}

pub(crate) fn topology_to_wgpu(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
    }
}

pub(crate) fn cull_mode_to_wgpu(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

pub(crate) fn front_face_to_wgpu(face: FrontFace) -> wgpu::FrontFace {
    match face {
        FrontFace::CounterClockwise => wgpu::FrontFace::Ccw,
        FrontFace::Clockwise => wgpu::FrontFace::Cw,
    }
}

pub(crate) fn polygon_mode_to_wgpu(mode: PolygonMode) -> wgpu::PolygonMode {
    match mode {
        PolygonMode::Fill => wgpu::PolygonMode::Fill,
        PolygonMode::Line => wgpu::PolygonMode::Line,
        PolygonMode::Point => wgpu::PolygonMode::Point,
    }
}

pub(crate) fn compare_op_to_wgpu(op: CompareOp) -> wgpu::CompareFunction {
    match op {
        CompareOp::Never => wgpu::CompareFunction::Never,
        CompareOp::Less => wgpu::CompareFunction::Less,
        CompareOp::Equal => wgpu::CompareFunction::Equal,
        CompareOp::LessOrEqual => wgpu::CompareFunction::LessEqual,
        CompareOp::Greater => wgpu::CompareFunction::Greater,
        CompareOp::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareOp::GreaterOrEqual => wgpu::CompareFunction::GreaterEqual,
        CompareOp::Always => wgpu::CompareFunction::Always,
    }
}

pub(crate) fn blend_factor_to_wgpu(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendFactor::ConstantColor => wgpu::BlendFactor::Constant,
        BlendFactor::OneMinusConstantColor => wgpu::BlendFactor::OneMinusConstant,
    }
}

pub(crate) fn blend_op_to_wgpu(op: BlendOp) -> wgpu::BlendOperation {
    match op {
        BlendOp::Add => wgpu::BlendOperation::Add,
        BlendOp::Subtract => wgpu::BlendOperation::Subtract,
        BlendOp::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOp::Min => wgpu::BlendOperation::Min,
        BlendOp::Max => wgpu::BlendOperation::Max,
    }
}

/// Tessellation and geometry stages have no wgpu counterpart and are dropped
pub(crate) fn shader_stages_to_wgpu(stages: ShaderStageFlags) -> wgpu::ShaderStages {
    let mut out = wgpu::ShaderStages::NONE;
    if stages.contains(ShaderStageFlags::VERTEX) {
        out |= wgpu::ShaderStages::VERTEX;
    }
    if stages.contains(ShaderStageFlags::FRAGMENT) {
        out |= wgpu::ShaderStages::FRAGMENT;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        out |= wgpu::ShaderStages::COMPUTE;
    }
    out
}

/// wgpu has no don't-care load; the attachment is cleared instead
pub(crate) fn color_load_op(op: LoadOp, clear: Option<ClearValue>) -> wgpu::LoadOp<wgpu::Color> {
    match op {
        LoadOp::Load => wgpu::LoadOp::Load,
        LoadOp::Clear | LoadOp::DontCare => {
            let [r, g, b, a] = match clear {
                Some(ClearValue::Color(color)) => color,
                _ => [0.0; 4],
            };
            wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            })
        }
    }
}

pub(crate) fn depth_load_op(op: LoadOp, clear: Option<ClearValue>) -> (wgpu::LoadOp<f32>, wgpu::LoadOp<u32>) {
    match op {
        LoadOp::Load => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
        LoadOp::Clear | LoadOp::DontCare => match clear {
            Some(ClearValue::DepthStencil { depth, stencil }) => {
                (wgpu::LoadOp::Clear(depth), wgpu::LoadOp::Clear(stencil))
            }
            _ => (wgpu::LoadOp::Clear(1.0), wgpu::LoadOp::Clear(0)),
        },
    }
}

pub(crate) fn store_op_to_wgpu(op: StoreOp) -> wgpu::StoreOp {
    match op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::DontCare => wgpu::StoreOp::Discard,
    }
}

#[cfg(test)]
#[path = "wgpu_format_tests.rs"]
mod tests;
