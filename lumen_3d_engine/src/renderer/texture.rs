/// Texture trait, texture descriptor, formats, layouts and sampler kinds

use std::any::Any;

use crate::error::Result;
use crate::renderer::command_buffer::CommandBuffer;
use crate::renderer::frame::FrameCounter;

/// Texture and render target format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum TextureFormat {
    R8_UNORM,
    R8G8B8A8_SRGB,
    R8G8B8A8_UNORM,
    B8G8R8A8_SRGB,
    B8G8R8A8_UNORM,
    R16G16B16A16_SFLOAT,
    R32_SFLOAT,
    D16_UNORM,
    D32_FLOAT,
    D24_UNORM_S8_UINT,
}

impl TextureFormat {
    /// Size of one texel in bytes
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::R8_UNORM => 1,
            TextureFormat::D16_UNORM => 2,
            TextureFormat::R16G16B16A16_SFLOAT => 8,
            _ => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::D16_UNORM | TextureFormat::D32_FLOAT | TextureFormat::D24_UNORM_S8_UINT
        )
    }

    pub fn has_stencil(self) -> bool {
        self == TextureFormat::D24_UNORM_S8_UINT
    }
}

/// Texture usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    /// Sampled in shaders
    Sampled,
    /// Color attachment
    RenderTarget,
    /// Color attachment later sampled
    SampledAndRenderTarget,
    /// Depth/stencil attachment
    DepthStencil,
}

impl TextureUsage {
    pub fn is_sampled(self) -> bool {
        matches!(self, TextureUsage::Sampled | TextureUsage::SampledAndRenderTarget)
    }

    pub fn is_attachment(self) -> bool {
        !matches!(self, TextureUsage::Sampled)
    }
}

/// Image layout, used by render passes, barriers and descriptor writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

/// Predefined samplers, created once per device and shared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerKind {
    LinearRepeat,
    LinearClamp,
    NearestRepeat,
    NearestClamp,
    /// Depth comparison (LESS_OR_EQUAL), white border
    Shadow,
    /// Linear, repeat, 16x anisotropy
    Anisotropic,
    /// No immutable sampler; the sampler is supplied with the texture at bind time
    Custom,
}

// ===== TEXTURE DATA =====

/// Data for a single layer of a texture array
#[derive(Debug, Clone)]
pub struct TextureLayerData {
    pub layer: u32,
    pub data: Vec<u8>,
}

/// Data to upload at creation time (mip level 0)
#[derive(Debug, Clone)]
pub enum TextureData {
    /// Layer 0
    Single(Vec<u8>),
    /// Only the listed layers are uploaded
    Layers(Vec<TextureLayerData>),
}

// ===== TEXTURE DESC =====

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    /// 1 = plain 2D texture
    pub array_layers: u32,
    /// 0 = full chain down to 1x1
    pub mip_levels: u32,
    pub data: Option<TextureData>,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::R8G8B8A8_UNORM,
            usage: TextureUsage::Sampled,
            array_layers: 1,
            mip_levels: 1,
            data: None,
        }
    }
}

impl TextureDesc {
    /// Mip count after resolving `mip_levels == 0`
    pub fn resolved_mip_levels(&self) -> u32 {
        if self.mip_levels == 0 {
            max_mip_levels(self.width, self.height)
        } else {
            self.mip_levels.min(max_mip_levels(self.width, self.height))
        }
    }

    /// Byte size of mip 0 of one layer
    pub fn layer_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }
}

/// Number of mips in a full chain for a `width x height` image
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

// ===== TEXTURE INFO =====

/// Read-only properties of a created texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub array_layers: u32,
    pub mip_levels: u32,
}

impl TextureInfo {
    pub fn from_desc(desc: &TextureDesc) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            usage: desc.usage,
            array_layers: desc.array_layers.max(1),
            mip_levels: desc.resolved_mip_levels(),
        }
    }

    pub fn is_array(&self) -> bool {
        self.array_layers > 1
    }
}

// ===== TEXTURE TRAIT =====

/// Texture resource trait
///
/// Implemented by backend-specific texture types. Destruction goes through
/// [`TexturePwn`](crate::renderer::TexturePwn), never through a direct drop
/// while the GPU may still sample it.
pub trait Texture: Send + Sync {
    /// Read-only properties of this texture
    fn info(&self) -> &TextureInfo;

    /// Upload `data` into one mip level of one layer
    ///
    /// With `cmd` the copy is recorded into that command buffer (which must
    /// be recording, outside a render pass); without it the backend uses a
    /// one-time submit and waits. Staging memory is released through the
    /// texture's deferred-destruction token.
    fn update_image(
        &self,
        mip_level: u32,
        array_layer: u32,
        data: &[u8],
        cmd: Option<&mut dyn CommandBuffer>,
    ) -> Result<()>;

    /// Free staging buffers whose frame has passed
    fn destroy_staging_buffers(&self, frames: &FrameCounter);

    fn as_any(&self) -> &dyn Any;
}
