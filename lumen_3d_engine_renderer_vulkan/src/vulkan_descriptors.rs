/// VulkanDescriptorBackend - native side of the engine descriptor allocator
///
/// Set layouts, pools and sets map one to one onto Vulkan objects; all the
/// bookkeeping (pool sizing, buffered writes) lives in `Descriptors`.

use ash::vk;
use lumen_3d_engine::lumen3d::render::{
    DescriptorBackend, DescriptorWrite, PoolDesc, SetLayoutBinding, WriteResource,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use std::sync::Arc;

use crate::vulkan_context::{vk_error, GpuContext};
use crate::vulkan_format::{descriptor_type_to_vk, image_layout_to_vk, shader_stages_to_vk};

pub struct VulkanDescriptorBackend {
    ctx: Arc<GpuContext>,
}

impl VulkanDescriptorBackend {
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self { ctx }
    }
}

enum WriteInfo {
    Buffer(usize),
    Image(usize),
}

impl DescriptorBackend for VulkanDescriptorBackend {
    type SetLayout = vk::DescriptorSetLayout;
    type Pool = vk::DescriptorPool;
    type Set = vk::DescriptorSet;
    type Buffer = vk::Buffer;
    type ImageView = vk::ImageView;
    type Sampler = vk::Sampler;

    fn create_set_layout(
        &self,
        set_number: u32,
        bindings: &[SetLayoutBinding<vk::Sampler>],
    ) -> Result<vk::DescriptorSetLayout> {
        // Immutable samplers need one handle per descriptor of the binding
        let immutable: Vec<Vec<vk::Sampler>> = bindings
            .iter()
            .map(|b| match b.immutable_sampler {
                Some(sampler) => vec![sampler; b.count as usize],
                None => Vec::new(),
            })
            .collect();

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = bindings
            .iter()
            .zip(&immutable)
            .map(|(b, samplers)| {
                let binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(descriptor_type_to_vk(b.ty))
                    .stage_flags(shader_stages_to_vk(b.stage_flags));
                if samplers.is_empty() {
                    binding.descriptor_count(b.count)
                } else {
                    binding.immutable_samplers(samplers)
                }
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        unsafe {
            self.ctx
                .device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(|e| vk_error(&format!("vkCreateDescriptorSetLayout (set {})", set_number), e))
        }
    }

    fn destroy_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.ctx.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_pool(&self, desc: &PoolDesc) -> Result<vk::DescriptorPool> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = desc
            .pool_sizes
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|&(ty, count)| vk::DescriptorPoolSize {
                ty: descriptor_type_to_vk(ty),
                descriptor_count: count,
            })
            .collect();

        let flags = if desc.free_descriptor_set {
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(desc.max_sets.max(1))
            .pool_sizes(&pool_sizes);

        unsafe {
            self.ctx
                .device
                .create_descriptor_pool(&create_info, None)
                .map_err(|e| vk_error("vkCreateDescriptorPool", e))
        }
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.ctx.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_set(
        &self,
        pool: &mut vk::DescriptorPool,
        layout: &vk::DescriptorSetLayout,
        _bindings: &[SetLayoutBinding<vk::Sampler>],
        writes: &[DescriptorWrite<'_, Self>],
    ) -> Result<vk::DescriptorSet> {
        let layouts = [*layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);

        let set = unsafe {
            match self.ctx.device.allocate_descriptor_sets(&alloc_info) {
                Ok(sets) => sets[0],
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                    return Err(Error::PoolExhausted("vkAllocateDescriptorSets".to_string()));
                }
                Err(e) => return Err(vk_error("vkAllocateDescriptorSets", e)),
            }
        };

        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        let sources: Vec<WriteInfo> = writes
            .iter()
            .map(|write| match write.resource {
                WriteResource::Buffer(info) => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: info.buffer,
                        offset: info.offset,
                        range: info.range,
                    });
                    WriteInfo::Buffer(buffer_infos.len() - 1)
                }
                WriteResource::Image(info) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: info.sampler.unwrap_or(vk::Sampler::null()),
                        image_view: info.view,
                        image_layout: image_layout_to_vk(info.layout),
                    });
                    WriteInfo::Image(image_infos.len() - 1)
                }
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet<'_>> = writes
            .iter()
            .zip(&sources)
            .map(|(write, source)| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .descriptor_type(descriptor_type_to_vk(write.ty));
                match *source {
                    WriteInfo::Buffer(i) => vk_write.buffer_info(std::slice::from_ref(&buffer_infos[i])),
                    WriteInfo::Image(i) => vk_write.image_info(std::slice::from_ref(&image_infos[i])),
                }
            })
            .collect();

        if !vk_writes.is_empty() {
            unsafe { self.ctx.device.update_descriptor_sets(&vk_writes, &[]) };
        }
        Ok(set)
    }

    fn free_set(&self, pool: &mut vk::DescriptorPool, set: vk::DescriptorSet) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .free_descriptor_sets(*pool, &[set])
                .map_err(|e| vk_error("vkFreeDescriptorSets", e))
        }
    }
}
