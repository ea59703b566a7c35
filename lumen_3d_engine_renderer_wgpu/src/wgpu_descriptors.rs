/// WgpuDescriptorBackend - descriptor sets as wgpu bind groups
///
/// wgpu has no descriptor pools: bind groups are created on demand. The pool
/// is emulated as a budget of descriptors per type plus a set count, so that
/// sizing and exhaustion behave the same on every backend.
///
/// A combined image sampler occupies two wgpu bindings: the texture at
/// `binding` and the sampler at `binding + SAMPLER_BINDING_OFFSET`.

use lumen_3d_engine::lumen3d::render::{
    DescriptorBackend, DescriptorType, DescriptorWrite, PoolDesc, SamplerKind, SetLayoutBinding,
    WriteResource,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use crate::wgpu_context::WgpuContext;
use crate::wgpu_format::shader_stages_to_wgpu;

/// WGSL binding of the sampler half of a combined image sampler
pub const SAMPLER_BINDING_OFFSET: u32 = 16;

/// Sampler plus whether it compares depth (needs a comparison binding)
#[derive(Debug, Clone)]
pub struct WgpuSampler {
    pub sampler: wgpu::Sampler,
    pub kind: SamplerKind,
}

impl WgpuSampler {
    pub fn is_comparison(&self) -> bool {
        self.kind == SamplerKind::Shadow
    }
}

/// Remaining descriptors per type and remaining sets of one emulated pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindGroupBudget {
    remaining: BTreeMap<DescriptorType, u32>,
    sets_remaining: u32,
}

impl BindGroupBudget {
    pub fn new(desc: &PoolDesc) -> Self {
        Self {
            remaining: desc.pool_sizes.iter().copied().collect(),
            sets_remaining: desc.max_sets,
        }
    }

    /// Descriptors one set of `bindings` takes, per type
    pub fn cost<S>(bindings: &[SetLayoutBinding<S>]) -> Vec<(DescriptorType, u32)> {
        let mut cost: BTreeMap<DescriptorType, u32> = BTreeMap::new();
        for binding in bindings {
            *cost.entry(binding.ty).or_insert(0) += binding.count;
        }
        cost.into_iter().collect()
    }

    pub fn fits(&self, cost: &[(DescriptorType, u32)]) -> bool {
        self.sets_remaining > 0
            && cost
                .iter()
                .all(|(ty, n)| self.remaining.get(ty).copied().unwrap_or(0) >= *n)
    }

    /// Callers check `fits` first
    pub fn take(&mut self, cost: &[(DescriptorType, u32)]) {
        self.sets_remaining -= 1;
        for (ty, n) in cost {
            if let Some(left) = self.remaining.get_mut(ty) {
                *left -= n;
            }
        }
    }

    pub fn give_back(&mut self, cost: &[(DescriptorType, u32)]) {
        self.sets_remaining += 1;
        for (ty, n) in cost {
            *self.remaining.entry(*ty).or_insert(0) += n;
        }
    }

    pub fn sets_remaining(&self) -> u32 {
        self.sets_remaining
    }
}

pub struct WgpuBindGroup {
    pub group: wgpu::BindGroup,
    cost: Vec<(DescriptorType, u32)>,
}

pub struct WgpuDescriptorBackend {
    ctx: Arc<WgpuContext>,
}

impl WgpuDescriptorBackend {
    pub fn new(ctx: Arc<WgpuContext>) -> Self {
        Self { ctx }
    }
}

/// Layout entries of `bindings`; two entries per combined image sampler
pub(crate) fn layout_entries(bindings: &[SetLayoutBinding<WgpuSampler>]) -> Result<Vec<wgpu::BindGroupLayoutEntry>> {
    let mut entries = Vec::with_capacity(bindings.len() + 1);
    for b in bindings {
        if b.count != 1 {
            return Err(Error::InvalidResource(format!(
                "binding {}: descriptor arrays ({} elements) are not supported on wgpu",
                b.binding, b.count
            )));
        }
        let visibility = shader_stages_to_wgpu(b.stage_flags);
        let comparison = b.immutable_sampler.as_ref().is_some_and(WgpuSampler::is_comparison);
        let entry = |binding, ty| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty,
            count: None,
        };
        let texture = wgpu::BindingType::Texture {
            sample_type: if comparison {
                wgpu::TextureSampleType::Depth
            } else {
                wgpu::TextureSampleType::Float { filterable: true }
            },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        };
        let sampler = wgpu::BindingType::Sampler(if comparison {
            wgpu::SamplerBindingType::Comparison
        } else {
            wgpu::SamplerBindingType::Filtering
        });

        match b.ty {
            DescriptorType::UniformBuffer | DescriptorType::UniformBufferDynamic => entries.push(entry(
                b.binding,
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: b.ty.is_dynamic(),
                    min_binding_size: None,
                },
            )),
            DescriptorType::StorageBuffer | DescriptorType::StorageBufferDynamic => entries.push(entry(
                b.binding,
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: b.ty.is_dynamic(),
                    min_binding_size: None,
                },
            )),
            DescriptorType::SampledImage => entries.push(entry(b.binding, texture)),
            DescriptorType::Sampler => entries.push(entry(b.binding, sampler)),
            DescriptorType::CombinedImageSampler => {
                if b.binding >= SAMPLER_BINDING_OFFSET {
                    return Err(Error::InvalidResource(format!(
                        "combined image sampler at binding {}; wgpu sets keep them below {}",
                        b.binding, SAMPLER_BINDING_OFFSET
                    )));
                }
                entries.push(entry(b.binding, texture));
                entries.push(entry(b.binding + SAMPLER_BINDING_OFFSET, sampler));
            }
            DescriptorType::StorageImage => {
                return Err(Error::InvalidResource(format!(
                    "binding {}: storage images are not supported on wgpu",
                    b.binding
                )));
            }
        }
    }
    Ok(entries)
}

impl DescriptorBackend for WgpuDescriptorBackend {
    type SetLayout = wgpu::BindGroupLayout;
    type Pool = BindGroupBudget;
    type Set = WgpuBindGroup;
    type Buffer = wgpu::Buffer;
    type ImageView = wgpu::TextureView;
    type Sampler = WgpuSampler;

    fn create_set_layout(
        &self,
        set_number: u32,
        bindings: &[SetLayoutBinding<WgpuSampler>],
    ) -> Result<wgpu::BindGroupLayout> {
        let entries = layout_entries(bindings)?;
        let label = format!("set {} layout", set_number);
        self.ctx.scoped(&label, |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&label),
                entries: &entries,
            })
        })
    }

    fn destroy_set_layout(&self, layout: wgpu::BindGroupLayout) {
        drop(layout);
    }

    fn create_pool(&self, desc: &PoolDesc) -> Result<BindGroupBudget> {
        if desc.max_sets == 0 {
            return Err(Error::InitializationFailed("descriptor pool with no sets".to_string()));
        }
        Ok(BindGroupBudget::new(desc))
    }

    fn destroy_pool(&self, pool: BindGroupBudget) {
        drop(pool);
    }

    fn allocate_set(
        &self,
        pool: &mut BindGroupBudget,
        layout: &wgpu::BindGroupLayout,
        bindings: &[SetLayoutBinding<WgpuSampler>],
        writes: &[DescriptorWrite<'_, Self>],
    ) -> Result<WgpuBindGroup> {
        let cost = BindGroupBudget::cost(bindings);
        if !pool.fits(&cost) {
            return Err(Error::PoolExhausted(format!(
                "{} set(s) left, set needs {:?}",
                pool.sets_remaining(),
                cost
            )));
        }

        let mut entries = Vec::with_capacity(writes.len() + 1);
        for write in writes {
            let immutable = bindings
                .iter()
                .find(|b| b.binding == write.binding)
                .and_then(|b| b.immutable_sampler.as_ref());
            match (&write.resource, write.ty) {
                (WriteResource::Buffer(info), _) => entries.push(wgpu::BindGroupEntry {
                    binding: write.binding,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &info.buffer,
                        offset: info.offset,
                        size: NonZeroU64::new(info.range),
                    }),
                }),
                (WriteResource::Image(info), DescriptorType::SampledImage) => entries.push(wgpu::BindGroupEntry {
                    binding: write.binding,
                    resource: wgpu::BindingResource::TextureView(&info.view),
                }),
                (WriteResource::Image(info), DescriptorType::Sampler | DescriptorType::CombinedImageSampler) => {
                    let Some(sampler) = info.sampler.as_ref().or(immutable) else {
                        return Err(Error::InvalidResource(format!(
                            "binding {} written without a sampler",
                            write.binding
                        )));
                    };
                    let sampler_binding = if write.ty == DescriptorType::Sampler {
                        write.binding
                    } else {
                        entries.push(wgpu::BindGroupEntry {
                            binding: write.binding,
                            resource: wgpu::BindingResource::TextureView(&info.view),
                        });
                        write.binding + SAMPLER_BINDING_OFFSET
                    };
                    entries.push(wgpu::BindGroupEntry {
                        binding: sampler_binding,
                        resource: wgpu::BindingResource::Sampler(&sampler.sampler),
                    });
                }
                (WriteResource::Image(_), ty) => {
                    return Err(Error::InvalidResource(format!(
                        "binding {}: {:?} cannot be written on wgpu",
                        write.binding, ty
                    )));
                }
            }
        }

        let group = self.ctx.scoped("bind group", |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout,
                entries: &entries,
            })
        })?;
        pool.take(&cost);
        Ok(WgpuBindGroup { group, cost })
    }

    fn free_set(&self, pool: &mut BindGroupBudget, set: WgpuBindGroup) -> Result<()> {
        pool.give_back(&set.cost);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_3d_engine::lumen3d::render::ShaderStageFlags;

    fn binding(binding: u32, ty: DescriptorType, count: u32) -> SetLayoutBinding<WgpuSampler> {
        SetLayoutBinding {
            binding,
            ty,
            count,
            stage_flags: ShaderStageFlags::FRAGMENT,
            immutable_sampler: None,
        }
    }

    #[test]
    fn test_budget_exhausts_after_declared_sets() {
        let bindings = [
            binding(0, DescriptorType::UniformBufferDynamic, 1),
            binding(1, DescriptorType::CombinedImageSampler, 1),
        ];
        let mut budget = BindGroupBudget::new(&PoolDesc {
            pool_sizes: vec![
                (DescriptorType::UniformBufferDynamic, 2),
                (DescriptorType::CombinedImageSampler, 2),
            ],
            max_sets: 2,
            free_descriptor_set: true,
        });

        let cost = BindGroupBudget::cost(&bindings);
        for _ in 0..2 {
            assert!(budget.fits(&cost));
            budget.take(&cost);
        }
        assert!(!budget.fits(&cost));

        budget.give_back(&cost);
        assert!(budget.fits(&cost));
    }

    #[test]
    fn test_budget_checks_every_type() {
        let budget = BindGroupBudget::new(&PoolDesc {
            pool_sizes: vec![(DescriptorType::UniformBufferDynamic, 8)],
            max_sets: 8,
            free_descriptor_set: false,
        });
        let cost = BindGroupBudget::cost(&[binding(3, DescriptorType::SampledImage, 1)]);
        assert!(!budget.fits(&cost));
    }

    #[test]
    fn test_combined_image_sampler_takes_two_entries() {
        let entries = layout_entries(&[
            binding(0, DescriptorType::UniformBufferDynamic, 1),
            binding(1, DescriptorType::CombinedImageSampler, 1),
        ])
        .unwrap();

        let numbers: Vec<u32> = entries.iter().map(|e| e.binding).collect();
        assert_eq!(numbers, vec![0, 1, 1 + SAMPLER_BINDING_OFFSET]);
        assert!(matches!(
            entries[0].ty,
            wgpu::BindingType::Buffer { has_dynamic_offset: true, .. }
        ));
    }

    #[test]
    fn test_unsupported_bindings_rejected() {
        assert!(layout_entries(&[binding(0, DescriptorType::StorageImage, 1)]).is_err());
        assert!(layout_entries(&[binding(1, DescriptorType::CombinedImageSampler, 4)]).is_err());
        assert!(layout_entries(&[binding(SAMPLER_BINDING_OFFSET, DescriptorType::CombinedImageSampler, 1)]).is_err());
    }
}
