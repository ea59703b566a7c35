//! Unit tests for the engine-to-Vulkan conversions
//!
//! Pure mappings, no GPU required.

use super::*;
use crate::vulkan_sampler::SamplerCache;
use lumen_3d_engine::lumen3d::render::SamplerKind;

// ============================================================================
// TEXTURE FORMATS
// ============================================================================

#[test]
fn test_texture_format_to_vk_color_formats() {
    assert_eq!(texture_format_to_vk(TextureFormat::R8_UNORM), vk::Format::R8_UNORM);
    assert_eq!(texture_format_to_vk(TextureFormat::R8G8B8A8_SRGB), vk::Format::R8G8B8A8_SRGB);
    assert_eq!(texture_format_to_vk(TextureFormat::B8G8R8A8_UNORM), vk::Format::B8G8R8A8_UNORM);
    assert_eq!(
        texture_format_to_vk(TextureFormat::R16G16B16A16_SFLOAT),
        vk::Format::R16G16B16A16_SFLOAT
    );
}

#[test]
fn test_texture_format_to_vk_depth_formats() {
    assert_eq!(texture_format_to_vk(TextureFormat::D16_UNORM), vk::Format::D16_UNORM);
    assert_eq!(texture_format_to_vk(TextureFormat::D32_FLOAT), vk::Format::D32_SFLOAT);
    assert_eq!(
        texture_format_to_vk(TextureFormat::D24_UNORM_S8_UINT),
        vk::Format::D24_UNORM_S8_UINT
    );
}

#[test]
fn test_surface_formats_round_trip() {
    for format in [
        TextureFormat::B8G8R8A8_SRGB,
        TextureFormat::B8G8R8A8_UNORM,
        TextureFormat::R8G8B8A8_SRGB,
    ] {
        assert_eq!(texture_format_from_vk(texture_format_to_vk(format)), Some(format));
    }
    assert_eq!(texture_format_from_vk(vk::Format::A2B10G10R10_UNORM_PACK32), None);
}

#[test]
fn test_aspect_for_depth_and_stencil() {
    assert_eq!(aspect_for(TextureFormat::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    assert_eq!(aspect_for(TextureFormat::D32_FLOAT), vk::ImageAspectFlags::DEPTH);
    assert_eq!(
        aspect_for(TextureFormat::D24_UNORM_S8_UINT),
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    );
}

// ============================================================================
// VERTEX INPUT
// ============================================================================

#[test]
fn test_vertex_format_to_vk() {
    assert_eq!(vertex_format_to_vk(VertexFormat::R32G32B32_SFLOAT), vk::Format::R32G32B32_SFLOAT);
    assert_eq!(vertex_format_to_vk(VertexFormat::R32G32_UINT), vk::Format::R32G32_UINT);
    assert_eq!(vertex_format_to_vk(VertexFormat::R16G16B16A16_SINT), vk::Format::R16G16B16A16_SINT);
    assert_eq!(vertex_format_to_vk(VertexFormat::R8G8B8A8_UNORM), vk::Format::R8G8B8A8_UNORM);
}

#[test]
fn test_input_rate_and_index_type() {
    assert_eq!(input_rate_to_vk(VertexInputRate::Instance), vk::VertexInputRate::INSTANCE);
    assert_eq!(index_type_to_vk(IndexType::U16), vk::IndexType::UINT16);
    assert_eq!(index_type_to_vk(IndexType::U32), vk::IndexType::UINT32);
}

// ============================================================================
// DESCRIPTORS AND STAGES
// ============================================================================

#[test]
fn test_shader_stages_to_vk() {
    assert_eq!(
        shader_stages_to_vk(ShaderStageFlags::VERTEX_FRAGMENT),
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
    );
    assert_eq!(shader_stages_to_vk(ShaderStageFlags::empty()), vk::ShaderStageFlags::empty());
    assert!(shader_stages_to_vk(ShaderStageFlags::ALL_GRAPHICS).contains(vk::ShaderStageFlags::GEOMETRY));
    assert!(!shader_stages_to_vk(ShaderStageFlags::ALL_GRAPHICS).contains(vk::ShaderStageFlags::COMPUTE));
}

#[test]
fn test_descriptor_type_to_vk() {
    assert_eq!(
        descriptor_type_to_vk(DescriptorType::UniformBufferDynamic),
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
    );
    assert_eq!(
        descriptor_type_to_vk(DescriptorType::CombinedImageSampler),
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
    );
    assert_eq!(descriptor_type_to_vk(DescriptorType::StorageImage), vk::DescriptorType::STORAGE_IMAGE);
}

// ============================================================================
// LAYOUTS AND BARRIERS
// ============================================================================

#[test]
fn test_image_layout_to_vk() {
    assert_eq!(image_layout_to_vk(ImageLayout::Undefined), vk::ImageLayout::UNDEFINED);
    assert_eq!(image_layout_to_vk(ImageLayout::ShaderReadOnly), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(image_layout_to_vk(ImageLayout::PresentSrc), vk::ImageLayout::PRESENT_SRC_KHR);
}

#[test]
fn test_layout_access_for_upload_transitions() {
    let (src_access, src_stage) = layout_access(ImageLayout::Undefined);
    let (dst_access, dst_stage) = layout_access(ImageLayout::TransferDst);
    assert_eq!(src_access, vk::AccessFlags::empty());
    assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    assert_eq!(dst_access, vk::AccessFlags::TRANSFER_WRITE);
    assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

    let (read_access, read_stage) = layout_access(ImageLayout::ShaderReadOnly);
    assert_eq!(read_access, vk::AccessFlags::SHADER_READ);
    assert_eq!(read_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
}

// ============================================================================
// PIPELINE STATE
// ============================================================================

#[test]
fn test_rasterization_mappings() {
    assert_eq!(topology_to_vk(PrimitiveTopology::TriangleStrip), vk::PrimitiveTopology::TRIANGLE_STRIP);
    assert_eq!(cull_mode_to_vk(CullMode::None), vk::CullModeFlags::NONE);
    assert_eq!(front_face_to_vk(FrontFace::Clockwise), vk::FrontFace::CLOCKWISE);
    assert_eq!(polygon_mode_to_vk(PolygonMode::Line), vk::PolygonMode::LINE);
    assert_eq!(compare_op_to_vk(CompareOp::LessOrEqual), vk::CompareOp::LESS_OR_EQUAL);
}

#[test]
fn test_blend_mappings() {
    assert_eq!(blend_factor_to_vk(BlendFactor::OneMinusSrcAlpha), vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    assert_eq!(blend_factor_to_vk(BlendFactor::ConstantColor), vk::BlendFactor::CONSTANT_COLOR);
    assert_eq!(blend_op_to_vk(BlendOp::ReverseSubtract), vk::BlendOp::REVERSE_SUBTRACT);
}

#[test]
fn test_attachment_ops_and_samples() {
    assert_eq!(load_op_to_vk(LoadOp::Clear), vk::AttachmentLoadOp::CLEAR);
    assert_eq!(store_op_to_vk(StoreOp::DontCare), vk::AttachmentStoreOp::DONT_CARE);
    assert_eq!(sample_count_to_vk(4), vk::SampleCountFlags::TYPE_4);
    assert_eq!(sample_count_to_vk(3), vk::SampleCountFlags::TYPE_1);
}

#[test]
fn test_clear_values() {
    let color = clear_value_to_vk(ClearValue::Color([0.1, 0.2, 0.3, 1.0]));
    let depth = clear_value_to_vk(ClearValue::DepthStencil { depth: 1.0, stencil: 7 });

    unsafe {
        assert_eq!(color.color.float32, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(depth.depth_stencil.depth, 1.0);
        assert_eq!(depth.depth_stencil.stencil, 7);
    }
}

#[test]
fn test_viewport_and_scissor() {
    let viewport = viewport_to_vk(&Viewport::full(800, 600));
    let scissor = rect_to_vk(&Rect2D { x: 10, y: 20, width: 30, height: 40 });

    assert_eq!((viewport.width, viewport.height, viewport.max_depth), (800.0, 600.0, 1.0));
    assert_eq!(scissor.offset.x, 10);
    assert_eq!(scissor.extent.height, 40);
}

// ============================================================================
// SAMPLERS
// ============================================================================

#[test]
fn test_sampler_params() {
    let Some((filter, _, address, anisotropy, border, compare)) = SamplerCache::params(SamplerKind::Shadow) else {
        panic!("shadow sampler has parameters");
    };
    assert_eq!(filter, vk::Filter::LINEAR);
    assert_eq!(address, vk::SamplerAddressMode::CLAMP_TO_BORDER);
    assert_eq!(anisotropy, None);
    assert_eq!(border, vk::BorderColor::FLOAT_OPAQUE_WHITE);
    assert!(compare);

    let anisotropic = SamplerCache::params(SamplerKind::Anisotropic).map(|p| p.3);
    assert_eq!(anisotropic, Some(Some(16.0)));
    assert!(SamplerCache::params(SamplerKind::Custom).is_none());
}
