/// Shader trait, shader descriptor and the per-set binding model

use std::any::Any;

use crate::error::{Error, Result};
use crate::renderer::descriptors::{DescriptorBackend, DescriptorType, Descriptors, ShaderStageFlags};
use crate::renderer::texture::{SamplerKind, Texture};

/// Shader byte code, already compiled for the target backend
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderCode {
    /// SPIR-V words (Vulkan)
    SpirV(Vec<u32>),
    /// WGSL source (wgpu)
    Wgsl(String),
}

impl ShaderCode {
    /// Build SPIR-V code from a little-endian byte stream (a `.spv` file)
    pub fn spirv_from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::InvalidResource(format!(
                "SPIR-V byte length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        let words = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect::<Vec<_>>();
        if words.first() != Some(&0x0723_0203) {
            return Err(Error::InvalidResource("missing SPIR-V magic number".to_string()));
        }
        Ok(ShaderCode::SpirV(words))
    }
}

/// Code and entry point of one stage
#[derive(Debug, Clone)]
pub struct ShaderStageCode {
    pub code: ShaderCode,
    pub entry_point: String,
}

/// Push constant range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// Descriptor for creating a shader
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub name: String,
    pub vertex: ShaderStageCode,
    pub fragment: Option<ShaderStageCode>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

/// Declaration of one descriptor set of a shader
///
/// Binding 0 is a dynamic uniform buffer of `uniform_size` bytes with room
/// for `capacity` entries per frame; bindings 1.. are combined image
/// samplers, one per entry of `samplers`.
///
/// One default set is allocated per declared set; `complex_capacity` extra
/// sets are reserved for [`Shader::bind_descriptor_set_textures`].
#[derive(Debug, Clone)]
pub struct DescriptorSetDesc {
    pub set_number: u32,
    pub uniform_size: u32,
    pub capacity: u32,
    pub samplers: Vec<SamplerKind>,
    pub stage_flags: ShaderStageFlags,
    pub complex_capacity: u32,
}

impl DescriptorSetDesc {
    pub fn uniform(set_number: u32, uniform_size: u32, capacity: u32) -> Self {
        Self {
            set_number,
            uniform_size,
            capacity,
            samplers: Vec::new(),
            stage_flags: ShaderStageFlags::VERTEX_FRAGMENT,
            complex_capacity: 0,
        }
    }

    pub fn with_complex_capacity(mut self, complex_capacity: u32) -> Self {
        self.complex_capacity = complex_capacity;
        self
    }

    pub fn with_samplers(mut self, samplers: Vec<SamplerKind>) -> Self {
        self.samplers = samplers;
        self
    }

    pub fn with_stage_flags(mut self, stage_flags: ShaderStageFlags) -> Self {
        self.stage_flags = stage_flags;
        self
    }
}

/// Declare `desc` on `descriptors`: a dynamic uniform buffer at binding 0,
/// then one combined image sampler per listed sampler
///
/// `immutable_sampler` maps a predefined kind to the backend sampler baked
/// into the layout (`None` for `SamplerKind::Custom`).
pub fn declare_descriptor_set<B, F>(
    descriptors: &mut Descriptors<B>,
    desc: &DescriptorSetDesc,
    mut immutable_sampler: F,
) -> Result<()>
where
    B: DescriptorBackend,
    F: FnMut(SamplerKind) -> Option<B::Sampler>,
{
    descriptors.begin_create_set_layout(desc.set_number, 1);
    descriptors.set_layout_binding(0, DescriptorType::UniformBufferDynamic, 1, desc.stage_flags, None);
    for (i, &kind) in desc.samplers.iter().enumerate() {
        let sampler = match kind {
            SamplerKind::Custom => None,
            kind => immutable_sampler(kind),
        };
        descriptors.set_layout_binding(
            i as u32 + 1,
            DescriptorType::CombinedImageSampler,
            1,
            ShaderStageFlags::FRAGMENT,
            sampler,
        );
    }
    descriptors.end_create_set_layout()?;
    descriptors.increase_complex_capacity_by(desc.complex_capacity);
    Ok(())
}

/// Set allocated by [`Shader::bind_descriptor_set_textures`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComplexSetHandle {
    pub set_number: u32,
    pub id: u64,
}

/// Texture written into a complex set
#[derive(Clone, Copy)]
pub struct TextureBinding<'a> {
    pub texture: &'a dyn Texture,
    /// Required for `SamplerKind::Custom` bindings, ignored otherwise
    pub sampler: Option<SamplerKind>,
}

impl<'a> TextureBinding<'a> {
    pub fn new(texture: &'a dyn Texture) -> Self {
        Self { texture, sampler: None }
    }

    pub fn with_sampler(mut self, sampler: SamplerKind) -> Self {
        self.sampler = Some(sampler);
        self
    }
}

/// Shader resource trait
///
/// A shader owns its descriptor set layouts, its descriptor pool and one
/// uniform ring per set. Usage:
///
/// 1. `create_descriptor_set` for each set, in order
/// 2. `create_pipeline_layout` once
/// 3. every frame: `begin_bind_descriptors`, bind through the command buffer,
///    `end_bind_descriptors`
pub trait Shader: Send + Sync {
    fn name(&self) -> &str;

    /// Declare the layout of one set
    fn create_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<()>;

    /// Create the pool and pipeline layout, and allocate one default set per declared set
    fn create_pipeline_layout(&self) -> Result<()>;

    /// Number of declared sets
    fn set_count(&self) -> u32;

    /// Open the per-frame uniform writing window
    fn begin_bind_descriptors(&self);

    fn end_bind_descriptors(&self);

    fn is_binding_descriptors(&self) -> bool;

    /// Copy `data` into the next free uniform entry of `set_number`
    ///
    /// Returns the dynamic offset, or `None` once the set's capacity is used
    /// up for this frame.
    ///
    /// # Panics
    ///
    /// Outside `begin_bind_descriptors`/`end_bind_descriptors`.
    fn update_uniform_buffer(&self, set_number: u32, data: &[u8]) -> Option<u32>;

    /// Allocate a set holding per-material textures (one per declared sampler)
    fn bind_descriptor_set_textures(
        &self,
        set_number: u32,
        textures: &[TextureBinding<'_>],
    ) -> Result<ComplexSetHandle>;

    fn free_descriptor_set(&self, handle: ComplexSetHandle) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}
