/// VulkanShader - shader modules, descriptor sets, uniform rings and the pipeline layout
///
/// Stages are SPIR-V modules reflected with spirq. Declared descriptor sets
/// are checked against the reflected ones; push constant ranges default to
/// what the stages declare.

use ash::vk;
use gpu_allocator::MemoryLocation;
use lumen_3d_engine::lumen3d::render::{
    declare_descriptor_set, lock, ComplexSetHandle, DescriptorSetDesc, DescriptorType, Descriptors,
    FrameCounter, ImageLayout, PushConstantRange, SamplerKind, Shader, ShaderCode, ShaderDesc,
    ShaderStageCode, ShaderStageFlags, TextureBinding, UniformRing,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use lumen_3d_engine::{engine_bail, engine_debug, engine_err, engine_warn};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::vulkan_buffer::Buffer;
use crate::vulkan_context::{vk_error, GpuContext};
use crate::vulkan_descriptors::VulkanDescriptorBackend;
use crate::vulkan_format::shader_stages_to_vk;
use crate::vulkan_sampler::SamplerCache;
use crate::vulkan_texture::VulkanTexture;

/// Descriptor binding found in a stage's SPIR-V
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReflectedBinding {
    pub set: u32,
    pub binding: u32,
    pub ty: DescriptorType,
    pub stages: ShaderStageFlags,
}

pub(crate) struct ShaderStage {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    pub entry_point: CString,
}

struct ShaderState {
    descriptors: Descriptors<VulkanDescriptorBackend>,
    rings: Vec<UniformRing>,
    uniform_buffers: Vec<Buffer>,
    default_sets: Vec<vk::DescriptorSet>,
    complex: FxHashMap<u64, vk::DescriptorSet>,
    next_complex: u64,
    pipeline_layout: vk::PipelineLayout,
}

pub struct VulkanShader {
    ctx: Arc<GpuContext>,
    frames: Arc<FrameCounter>,
    name: String,
    pub(crate) stages: Vec<ShaderStage>,
    push_constant_ranges: Vec<PushConstantRange>,
    reflected: Vec<ReflectedBinding>,
    samplers: Arc<Mutex<SamplerCache>>,
    binding: AtomicBool,
    state: Mutex<ShaderState>,
}

fn spirq_descriptor_type(desc_ty: &spirq::ty::DescriptorType) -> Option<DescriptorType> {
    use spirq::ty::DescriptorType as Spv;
    match desc_ty {
        Spv::UniformBuffer() => Some(DescriptorType::UniformBuffer),
        Spv::StorageBuffer(..) => Some(DescriptorType::StorageBuffer),
        Spv::CombinedImageSampler() => Some(DescriptorType::CombinedImageSampler),
        Spv::SampledImage() => Some(DescriptorType::SampledImage),
        Spv::Sampler() => Some(DescriptorType::Sampler),
        Spv::StorageImage(..) => Some(DescriptorType::StorageImage),
        _ => None,
    }
}

/// Descriptor bindings and push constant block size of one stage
pub(crate) fn reflect_stage(
    code: &[u32],
    stages: ShaderStageFlags,
) -> Result<(Vec<ReflectedBinding>, Option<u32>)> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| engine_err!("lumen3d::vulkan", "SPIR-V reflection failed: {:?}", e))?;

    let mut bindings = Vec::new();
    let mut push_constant_size = None;
    for entry_point in &entry_points {
        for var in entry_point.vars.iter() {
            match var {
                spirq::var::Variable::Descriptor { desc_bind, desc_ty, .. } => {
                    let Some(ty) = spirq_descriptor_type(desc_ty) else {
                        engine_warn!(
                            "lumen3d::vulkan",
                            "Ignoring unsupported descriptor {:?} at set {} binding {}",
                            desc_ty,
                            desc_bind.set(),
                            desc_bind.bind()
                        );
                        continue;
                    };
                    let reflected = ReflectedBinding {
                        set: desc_bind.set(),
                        binding: desc_bind.bind(),
                        ty,
                        stages,
                    };
                    if !bindings.contains(&reflected) {
                        bindings.push(reflected);
                    }
                }
                spirq::var::Variable::PushConstant { ty, .. } => {
                    let size = ty.nbyte().unwrap_or(0) as u32;
                    push_constant_size = Some(push_constant_size.unwrap_or(0).max(size));
                }
                _ => {}
            }
        }
    }
    Ok((bindings, push_constant_size))
}

/// Union the bindings of several stages; a binding seen twice must keep its type
pub(crate) fn merge_reflections(stages: Vec<Vec<ReflectedBinding>>) -> Result<Vec<ReflectedBinding>> {
    let mut merged: Vec<ReflectedBinding> = Vec::new();
    for binding in stages.into_iter().flatten() {
        match merged.iter_mut().find(|b| b.set == binding.set && b.binding == binding.binding) {
            Some(existing) if existing.ty != binding.ty => {
                engine_bail!(
                    "lumen3d::vulkan",
                    "set {} binding {} is {:?} in one stage and {:?} in another",
                    binding.set,
                    binding.binding,
                    existing.ty,
                    binding.ty
                );
            }
            Some(existing) => existing.stages |= binding.stages,
            None => merged.push(binding),
        }
    }
    Ok(merged)
}

/// Type a declared binding of `DescriptorSetDesc` accepts from the shader source
fn declared_type_matches(binding: u32, reflected: DescriptorType) -> bool {
    if binding == 0 {
        matches!(reflected, DescriptorType::UniformBuffer | DescriptorType::UniformBufferDynamic)
    } else {
        reflected == DescriptorType::CombinedImageSampler
    }
}

impl VulkanShader {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        frames: Arc<FrameCounter>,
        samplers: Arc<Mutex<SamplerCache>>,
        desc: &ShaderDesc,
    ) -> Result<Self> {
        let mut shader = Self {
            ctx: Arc::clone(&ctx),
            frames,
            name: desc.name.clone(),
            stages: Vec::with_capacity(2),
            push_constant_ranges: Vec::new(),
            reflected: Vec::new(),
            samplers,
            binding: AtomicBool::new(false),
            state: Mutex::new(ShaderState {
                descriptors: Descriptors::new(VulkanDescriptorBackend::new(ctx)),
                rings: Vec::new(),
                uniform_buffers: Vec::new(),
                default_sets: Vec::new(),
                complex: FxHashMap::default(),
                next_complex: 0,
                pipeline_layout: vk::PipelineLayout::null(),
            }),
        };

        let mut reflections = Vec::with_capacity(2);
        let mut reflected_push: Option<(ShaderStageFlags, u32)> = None;
        let stages = std::iter::once((&desc.vertex, ShaderStageFlags::VERTEX))
            .chain(desc.fragment.as_ref().map(|f| (f, ShaderStageFlags::FRAGMENT)));
        for (code, stage) in stages {
            // Drop destroys the modules created so far on error
            let (bindings, push_size) = shader.add_stage(code, stage)?;
            reflections.push(bindings);
            if let Some(size) = push_size {
                let (stages, max) = reflected_push.unwrap_or((ShaderStageFlags::empty(), 0));
                reflected_push = Some((stages | stage, max.max(size)));
            }
        }
        shader.reflected = merge_reflections(reflections)?;

        shader.push_constant_ranges = if desc.push_constant_ranges.is_empty() {
            reflected_push
                .filter(|&(_, size)| size > 0)
                .map(|(stages, size)| vec![PushConstantRange { stages, offset: 0, size }])
                .unwrap_or_default()
        } else {
            desc.push_constant_ranges.clone()
        };

        engine_debug!(
            "lumen3d::vulkan",
            "Shader '{}': {} stage(s), {} reflected binding(s), {} push constant range(s)",
            shader.name,
            shader.stages.len(),
            shader.reflected.len(),
            shader.push_constant_ranges.len()
        );
        Ok(shader)
    }

    fn add_stage(&mut self, code: &ShaderStageCode, stage: ShaderStageFlags) -> Result<(Vec<ReflectedBinding>, Option<u32>)> {
        let ShaderCode::SpirV(words) = &code.code else {
            return Err(Error::InvalidResource(format!(
                "shader '{}': the Vulkan backend takes SPIR-V stages",
                self.name
            )));
        };
        let entry_point = CString::new(code.entry_point.as_str())
            .map_err(|e| Error::InvalidResource(format!("entry point '{}': {}", code.entry_point, e)))?;
        let reflection = reflect_stage(words, stage)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(words);
        let module = unsafe {
            self.ctx
                .device
                .create_shader_module(&create_info, None)
                .map_err(|e| vk_error("vkCreateShaderModule", e))?
        };
        self.stages.push(ShaderStage {
            module,
            stage: shader_stages_to_vk(stage),
            entry_point,
        });
        Ok(reflection)
    }

    pub(crate) fn pipeline_layout(&self) -> vk::PipelineLayout {
        lock(&self.state).pipeline_layout
    }

    /// Default set of `set_number`, or the complex set behind `complex`
    pub(crate) fn descriptor_set(&self, set_number: u32, complex: Option<ComplexSetHandle>) -> Result<vk::DescriptorSet> {
        let state = lock(&self.state);
        let set = match complex {
            Some(handle) => state.complex.get(&handle.id).copied(),
            None => state.default_sets.get(set_number as usize).copied(),
        };
        set.ok_or_else(|| {
            Error::InvalidResource(format!(
                "shader '{}': no descriptor set {} ({:?}); was create_pipeline_layout called?",
                self.name, set_number, complex
            ))
        })
    }

    fn check_against_reflection(&self, desc: &DescriptorSetDesc) {
        for reflected in self.reflected.iter().filter(|b| b.set == desc.set_number) {
            let declared = reflected.binding <= desc.samplers.len() as u32;
            if !declared || !declared_type_matches(reflected.binding, reflected.ty) {
                engine_warn!(
                    "lumen3d::vulkan",
                    "Shader '{}': set {} binding {} ({:?}) does not match the declared set",
                    self.name,
                    reflected.set,
                    reflected.binding,
                    reflected.ty
                );
            }
        }
    }

    fn create_vk_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> Result<vk::PipelineLayout> {
        let push_constant_ranges: Vec<vk::PushConstantRange> = self
            .push_constant_ranges
            .iter()
            .map(|r| vk::PushConstantRange {
                stage_flags: shader_stages_to_vk(r.stages),
                offset: r.offset,
                size: r.size,
            })
            .collect();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        unsafe {
            self.ctx
                .device
                .create_pipeline_layout(&create_info, None)
                .map_err(|e| vk_error("vkCreatePipelineLayout", e))
        }
    }
}

impl Shader for VulkanShader {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<()> {
        let mut state = lock(&self.state);
        if state.pipeline_layout != vk::PipelineLayout::null() {
            return Err(Error::InvalidResource(format!(
                "shader '{}': descriptor set {} declared after create_pipeline_layout",
                self.name, desc.set_number
            )));
        }
        self.check_against_reflection(desc);

        let immutable: FxHashMap<SamplerKind, vk::Sampler> = {
            let mut cache = lock(&self.samplers);
            desc.samplers
                .iter()
                .filter(|&&kind| kind != SamplerKind::Custom)
                .map(|&kind| Ok((kind, cache.get(kind)?)))
                .collect::<Result<_>>()?
        };
        declare_descriptor_set(&mut state.descriptors, desc, |kind| immutable.get(&kind).copied())?;
        state.rings.push(UniformRing::new(
            desc.uniform_size as u64,
            desc.capacity,
            self.ctx.min_uniform_alignment,
        ));
        Ok(())
    }

    fn create_pipeline_layout(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.pipeline_layout != vk::PipelineLayout::null() {
            return Err(Error::InvalidResource(format!(
                "shader '{}': create_pipeline_layout called twice",
                self.name
            )));
        }

        if !state.rings.is_empty() {
            state.descriptors.create_pool(true)?;
        }
        for set_number in 0..state.rings.len() as u32 {
            let ring = &state.rings[set_number as usize];
            let (size, stride) = (ring.total_size(), ring.stride());
            let buffer = Buffer::new(
                Arc::clone(&self.ctx),
                "uniform ring",
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
            )?;

            state.descriptors.begin_allocate_set(set_number)?;
            state.descriptors.buffer_info(0, buffer.buffer, stride, 0);
            let set = state.descriptors.end_allocate_set()?;

            state.uniform_buffers.push(buffer);
            state.default_sets.push(set);
        }

        let layout = self.create_vk_pipeline_layout(state.descriptors.set_layouts())?;
        state.pipeline_layout = layout;
        Ok(())
    }

    fn set_count(&self) -> u32 {
        lock(&self.state).rings.len() as u32
    }

    fn begin_bind_descriptors(&self) {
        let mut state = lock(&self.state);
        for ring in &mut state.rings {
            ring.begin(&self.frames);
        }
        self.binding.store(true, Ordering::Relaxed);
    }

    fn end_bind_descriptors(&self) {
        let mut state = lock(&self.state);
        for ring in &mut state.rings {
            ring.end();
        }
        self.binding.store(false, Ordering::Relaxed);
    }

    fn is_binding_descriptors(&self) -> bool {
        self.binding.load(Ordering::Relaxed)
    }

    fn update_uniform_buffer(&self, set_number: u32, data: &[u8]) -> Option<u32> {
        let mut state = lock(&self.state);
        let ring = state.rings.get_mut(set_number as usize)?;
        assert!(data.len() as u64 <= ring.stride(), "uniform data larger than the declared size");
        let offset = ring.next_offset()?;

        let buffer = state.uniform_buffers.get(set_number as usize)?;
        match buffer.write(offset as u64, data) {
            Ok(()) => Some(offset),
            Err(e) => {
                engine_warn!("lumen3d::vulkan", "Shader '{}': uniform write failed: {}", self.name, e);
                None
            }
        }
    }

    fn bind_descriptor_set_textures(&self, set_number: u32, textures: &[TextureBinding<'_>]) -> Result<ComplexSetHandle> {
        let mut state = lock(&self.state);
        let Some(layout) = state.descriptors.layout_desc(set_number) else {
            return Err(Error::InvalidResource(format!("set {} not declared", set_number)));
        };
        if layout.bindings.len() != textures.len() + 1 {
            return Err(Error::InvalidResource(format!(
                "set {} expects {} textures, got {}",
                set_number,
                layout.bindings.len() - 1,
                textures.len()
            )));
        }
        let immutable: Vec<bool> = layout.bindings[1..].iter().map(|b| b.immutable_sampler.is_some()).collect();
        let Some(buffer) = state.uniform_buffers.get(set_number as usize) else {
            return Err(Error::InvalidResource(format!(
                "shader '{}': bind_descriptor_set_textures before create_pipeline_layout",
                self.name
            )));
        };
        let (uniform_buffer, stride) = (buffer.buffer, state.rings[set_number as usize].stride());

        let mut writes = Vec::with_capacity(textures.len());
        for (i, binding) in textures.iter().enumerate() {
            let Some(texture) = binding.texture.as_any().downcast_ref::<VulkanTexture>() else {
                return Err(Error::InvalidResource("texture is not a Vulkan texture".to_string()));
            };
            let sampler = if immutable[i] {
                None
            } else {
                let Some(kind) = binding.sampler else {
                    return Err(Error::InvalidResource(format!(
                        "set {} binding {} has no immutable sampler; pass one with the texture",
                        set_number,
                        i + 1
                    )));
                };
                Some(lock(&self.samplers).get(kind)?)
            };
            writes.push((i as u32 + 1, sampler, texture.view));
        }

        state.descriptors.begin_allocate_set(set_number)?;
        state.descriptors.buffer_info(0, uniform_buffer, stride, 0);
        for (binding, sampler, view) in writes {
            state.descriptors.image_info(binding, sampler, view, ImageLayout::ShaderReadOnly);
        }
        let set = state.descriptors.end_allocate_set()?;

        let id = state.next_complex;
        state.next_complex += 1;
        state.complex.insert(id, set);
        Ok(ComplexSetHandle { set_number, id })
    }

    fn free_descriptor_set(&self, handle: ComplexSetHandle) -> Result<()> {
        let mut state = lock(&self.state);
        let Some(set) = state.complex.remove(&handle.id) else {
            return Err(Error::InvalidResource(format!("unknown complex set {}", handle.id)));
        };
        state.descriptors.free_set(set)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        let state = lock(&self.state);
        unsafe {
            if state.pipeline_layout != vk::PipelineLayout::null() {
                self.ctx.device.destroy_pipeline_layout(state.pipeline_layout, None);
            }
            for stage in &self.stages {
                self.ctx.device.destroy_shader_module(stage.module, None);
            }
        }
    }
}
