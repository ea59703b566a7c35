/// WgpuShader - shader modules, bind groups, uniform rings and the pipeline layout
///
/// Stages are WGSL (or SPIR-V through naga). There is no reflection: the
/// declared descriptor sets are the layout, and wgpu validates the shader
/// against it when a pipeline is built.
///
/// Every declared set gets a default bind group at `create_pipeline_layout`.
/// Sampler bindings of the default group point at 1x1 placeholder textures
/// until a complex set supplies real ones.

use lumen_3d_engine::lumen3d::render::{
    declare_descriptor_set, lock, ComplexSetHandle, DescriptorSetDesc, Descriptors, FrameCounter,
    ImageLayout, PushConstantRange, SamplerKind, Shader, ShaderCode, ShaderDesc, ShaderStageCode,
    ShaderStageFlags, Texture, TextureBinding, UniformRing,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use lumen_3d_engine::{engine_debug, engine_warn};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::wgpu_buffer::GpuBuffer;
use crate::wgpu_context::WgpuContext;
use crate::wgpu_descriptors::{WgpuBindGroup, WgpuDescriptorBackend, WgpuSampler};
use crate::wgpu_format::shader_stages_to_wgpu;
use crate::wgpu_sampler::SamplerCache;
use crate::wgpu_texture::WgpuTexture;

pub(crate) struct ShaderStage {
    pub module: wgpu::ShaderModule,
    pub entry_point: String,
}

struct ShaderState {
    descriptors: Descriptors<WgpuDescriptorBackend>,
    rings: Vec<UniformRing>,
    /// Sampler kinds of every declared set, binding 1 first
    sampler_kinds: Vec<Vec<SamplerKind>>,
    uniform_buffers: Vec<GpuBuffer>,
    default_sets: Vec<WgpuBindGroup>,
    complex: FxHashMap<u64, WgpuBindGroup>,
    next_complex: u64,
    pipeline_layout: Option<wgpu::PipelineLayout>,
}

pub struct WgpuShader {
    ctx: Arc<WgpuContext>,
    frames: Arc<FrameCounter>,
    name: String,
    pub(crate) vertex: ShaderStage,
    pub(crate) fragment: Option<ShaderStage>,
    push_constant_range: Option<PushConstantRange>,
    samplers: Arc<Mutex<SamplerCache>>,
    binding: AtomicBool,
    state: Mutex<ShaderState>,
}

/// Fold every range into one covering them all
///
/// wgpu accepts each stage in a single range only.
pub(crate) fn merge_push_constant_ranges(ranges: &[PushConstantRange]) -> Option<PushConstantRange> {
    ranges.iter().copied().reduce(|a, b| {
        let start = a.offset.min(b.offset);
        let end = (a.offset + a.size).max(b.offset + b.size);
        PushConstantRange {
            stages: a.stages | b.stages,
            offset: start,
            size: end - start,
        }
    })
}

fn create_stage(ctx: &WgpuContext, shader_name: &str, code: &ShaderStageCode) -> Result<ShaderStage> {
    if code.entry_point.is_empty() {
        return Err(Error::InvalidResource(format!("shader '{}': empty entry point", shader_name)));
    }
    let source = match &code.code {
        ShaderCode::Wgsl(text) if !text.is_empty() => wgpu::ShaderSource::Wgsl(Cow::Borrowed(text)),
        ShaderCode::SpirV(words) if !words.is_empty() => wgpu::ShaderSource::SpirV(Cow::Borrowed(words)),
        _ => {
            return Err(Error::InvalidResource(format!("shader '{}': empty stage code", shader_name)));
        }
    };
    let module = ctx.scoped(&format!("shader '{}'", shader_name), |device| {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(shader_name),
            source,
        })
    })?;
    Ok(ShaderStage {
        module,
        entry_point: code.entry_point.clone(),
    })
}

impl WgpuShader {
    pub(crate) fn new(
        ctx: Arc<WgpuContext>,
        frames: Arc<FrameCounter>,
        samplers: Arc<Mutex<SamplerCache>>,
        desc: &ShaderDesc,
    ) -> Result<Self> {
        let push_constant_range = merge_push_constant_ranges(&desc.push_constant_ranges);
        if let Some(range) = push_constant_range {
            match ctx.max_push_constant_size {
                Some(max) if range.offset + range.size <= max => {}
                Some(max) => {
                    return Err(Error::InvalidResource(format!(
                        "shader '{}': push constants end at {} bytes, device allows {}",
                        desc.name,
                        range.offset + range.size,
                        max
                    )));
                }
                None => {
                    return Err(Error::InvalidResource(format!(
                        "shader '{}': push constants need the PUSH_CONSTANTS feature",
                        desc.name
                    )));
                }
            }
        }

        let vertex = create_stage(&ctx, &desc.name, &desc.vertex)?;
        let fragment = desc
            .fragment
            .as_ref()
            .map(|code| create_stage(&ctx, &desc.name, code))
            .transpose()?;

        engine_debug!(
            "lumen3d::wgpu",
            "Shader '{}': {} stage(s), push constants {:?}",
            desc.name,
            1 + usize::from(fragment.is_some()),
            push_constant_range
        );
        Ok(Self {
            ctx: Arc::clone(&ctx),
            frames,
            name: desc.name.clone(),
            vertex,
            fragment,
            push_constant_range,
            samplers,
            binding: AtomicBool::new(false),
            state: Mutex::new(ShaderState {
                descriptors: Descriptors::new(WgpuDescriptorBackend::new(ctx)),
                rings: Vec::new(),
                sampler_kinds: Vec::new(),
                uniform_buffers: Vec::new(),
                default_sets: Vec::new(),
                complex: FxHashMap::default(),
                next_complex: 0,
                pipeline_layout: None,
            }),
        })
    }

    pub(crate) fn pipeline_layout(&self) -> Option<wgpu::PipelineLayout> {
        lock(&self.state).pipeline_layout.clone()
    }

    /// Default group of `set_number`, or the complex group behind `complex`
    pub(crate) fn bind_group(&self, set_number: u32, complex: Option<ComplexSetHandle>) -> Result<wgpu::BindGroup> {
        let state = lock(&self.state);
        let set = match complex {
            Some(handle) => state.complex.get(&handle.id),
            None => state.default_sets.get(set_number as usize),
        };
        set.map(|s| s.group.clone()).ok_or_else(|| {
            Error::InvalidResource(format!(
                "shader '{}': no bind group {} ({:?}); was create_pipeline_layout called?",
                self.name, set_number, complex
            ))
        })
    }

    /// Stages of the merged push constant range, once `offset..offset + size` is checked against it
    pub(crate) fn push_constant_stages(&self, offset: u32, size: u32) -> Result<wgpu::ShaderStages> {
        let Some(range) = self.push_constant_range else {
            return Err(Error::InvalidResource(format!("shader '{}' declares no push constants", self.name)));
        };
        if offset % wgpu::PUSH_CONSTANT_ALIGNMENT != 0 || size % wgpu::PUSH_CONSTANT_ALIGNMENT != 0 {
            return Err(Error::InvalidResource(format!(
                "push constants {}+{} not aligned to {} bytes",
                offset,
                size,
                wgpu::PUSH_CONSTANT_ALIGNMENT
            )));
        }
        if offset < range.offset || offset + size > range.offset + range.size {
            return Err(Error::InvalidResource(format!(
                "push constants {}..{} outside the declared range {}..{}",
                offset,
                offset + size,
                range.offset,
                range.offset + range.size
            )));
        }
        Ok(shader_stages_to_wgpu(range.stages))
    }

    /// Sampler for a binding without an immutable one, and the matching placeholder view
    fn placeholder_binding(&self, kind: SamplerKind) -> Result<(Option<WgpuSampler>, wgpu::TextureView)> {
        let placeholders = &self.ctx.placeholders;
        match kind {
            SamplerKind::Shadow => Ok((None, placeholders.depth.clone())),
            SamplerKind::Custom => {
                let sampler = lock(&self.samplers).get(SamplerKind::LinearClamp)?;
                Ok((Some(sampler), placeholders.color.clone()))
            }
            _ => Ok((None, placeholders.color.clone())),
        }
    }
}

impl Shader for WgpuShader {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<()> {
        let mut state = lock(&self.state);
        if state.pipeline_layout.is_some() {
            return Err(Error::InvalidResource(format!(
                "shader '{}': descriptor set {} declared after create_pipeline_layout",
                self.name, desc.set_number
            )));
        }

        let immutable: FxHashMap<SamplerKind, _> = {
            let mut cache = lock(&self.samplers);
            desc.samplers
                .iter()
                .filter(|&&kind| kind != SamplerKind::Custom)
                .map(|&kind| Ok((kind, cache.get(kind)?)))
                .collect::<Result<_>>()?
        };
        declare_descriptor_set(&mut state.descriptors, desc, |kind| immutable.get(&kind).cloned())?;
        state.rings.push(UniformRing::new(
            desc.uniform_size as u64,
            desc.capacity,
            self.ctx.min_uniform_alignment,
        ));
        state.sampler_kinds.push(desc.samplers.clone());
        Ok(())
    }

    fn create_pipeline_layout(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.pipeline_layout.is_some() {
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
            let buffer = GpuBuffer::new(
                Arc::clone(&self.ctx),
                "uniform ring",
                size,
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            )?;

            let placeholders = state.sampler_kinds[set_number as usize]
                .iter()
                .map(|&kind| self.placeholder_binding(kind))
                .collect::<Result<Vec<_>>>()?;

            state.descriptors.begin_allocate_set(set_number)?;
            state.descriptors.buffer_info(0, buffer.buffer.clone(), stride, 0);
            for (i, (sampler, view)) in placeholders.into_iter().enumerate() {
                state.descriptors.image_info(i as u32 + 1, sampler, view, ImageLayout::ShaderReadOnly);
            }
            let set = state.descriptors.end_allocate_set()?;

            state.uniform_buffers.push(buffer);
            state.default_sets.push(set);
        }

        let push_constant_ranges: Vec<wgpu::PushConstantRange> = self
            .push_constant_range
            .iter()
            .map(|r| wgpu::PushConstantRange {
                stages: shader_stages_to_wgpu(r.stages),
                range: r.offset..r.offset + r.size,
            })
            .collect();
        let layout = {
            let bind_group_layouts: Vec<&wgpu::BindGroupLayout> = state.descriptors.set_layouts().iter().collect();
            self.ctx.scoped("pipeline layout", |device| {
                device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(&self.name),
                    bind_group_layouts: &bind_group_layouts,
                    push_constant_ranges: &push_constant_ranges,
                })
            })?
        };
        state.pipeline_layout = Some(layout);
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

        let Some(buffer) = state.uniform_buffers.get(set_number as usize) else {
            engine_warn!("lumen3d::wgpu", "Shader '{}': uniform write before create_pipeline_layout", self.name);
            return None;
        };
        buffer.write(offset as u64, data);
        Some(offset)
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
        let (uniform_buffer, stride) = (buffer.buffer.clone(), state.rings[set_number as usize].stride());

        let mut writes = Vec::with_capacity(textures.len());
        for (i, binding) in textures.iter().enumerate() {
            let Some(texture) = binding.texture.as_any().downcast_ref::<WgpuTexture>() else {
                return Err(Error::InvalidResource("texture is not a wgpu texture".to_string()));
            };
            if texture.info().is_array() {
                return Err(Error::InvalidResource(format!(
                    "set {} binding {}: array textures cannot fill a 2D sampler binding",
                    set_number,
                    i + 1
                )));
            }
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
            writes.push((i as u32 + 1, sampler, texture.sample_view.clone()));
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
