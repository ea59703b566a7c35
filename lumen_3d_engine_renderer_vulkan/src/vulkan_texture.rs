/// VulkanTexture - VkImage, its view and memory
///
/// Sampled textures are kept in SHADER_READ_ONLY_OPTIMAL between uploads:
/// creation leaves them there (with or without initial data) and every
/// `update_image` transitions the touched subresource out and back.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use lumen_3d_engine::engine_error;
use lumen_3d_engine::lumen3d::render::{
    lock, CommandBuffer, FrameCounter, ImageLayout, StagingQueue, Texture, TextureData, TextureDesc,
    TextureInfo, TextureUsage,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use std::any::Any;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use crate::vulkan_buffer::Buffer;
use crate::vulkan_command_buffer::VulkanCommandBuffer;
use crate::vulkan_context::{vk_error, GpuContext};
use crate::vulkan_format::{aspect_for, image_layout_to_vk, layout_access, texture_format_to_vk};

pub struct VulkanTexture {
    ctx: Arc<GpuContext>,
    frames: Arc<FrameCounter>,
    info: TextureInfo,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) aspect: vk::ImageAspectFlags,
    allocation: Option<Allocation>,
    staging: Mutex<StagingQueue<Buffer>>,
}

/// Record a layout transition of `mips` x `layers` of `image`
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn cmd_transition(
    device: &ash::Device,
    cb: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    mips: Range<u32>,
    layers: Range<u32>,
    old_layout: ImageLayout,
    new_layout: ImageLayout,
) {
    let (src_access, src_stage) = layout_access(old_layout);
    let (dst_access, dst_stage) = layout_access(new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(image_layout_to_vk(old_layout))
        .new_layout(image_layout_to_vk(new_layout))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: mips.start,
            level_count: mips.end - mips.start,
            base_array_layer: layers.start,
            layer_count: layers.end - layers.start,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    device.cmd_pipeline_barrier(
        cb,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

fn usage_flags(usage: TextureUsage, mip_levels: u32) -> vk::ImageUsageFlags {
    let sampled = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    let flags = match usage {
        TextureUsage::Sampled => sampled,
        TextureUsage::RenderTarget => vk::ImageUsageFlags::COLOR_ATTACHMENT,
        TextureUsage::SampledAndRenderTarget => sampled | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        // Sampled as well, for shadow maps
        TextureUsage::DepthStencil => {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        }
    };
    if mip_levels > 1 && usage.is_sampled() {
        flags | vk::ImageUsageFlags::TRANSFER_SRC
    } else {
        flags
    }
}

fn mip_extent(size: u32, mip: u32) -> u32 {
    (size >> mip).max(1)
}

impl VulkanTexture {
    pub fn new(ctx: Arc<GpuContext>, frames: Arc<FrameCounter>, desc: &TextureDesc) -> Result<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidResource(format!(
                "texture size {}x{} is empty",
                desc.width, desc.height
            )));
        }
        if (desc.usage == TextureUsage::DepthStencil) != desc.format.is_depth() {
            return Err(Error::InvalidResource(format!(
                "format {:?} does not match usage {:?}",
                desc.format, desc.usage
            )));
        }

        let info = TextureInfo::from_desc(desc);
        let format = texture_format_to_vk(info.format);
        let aspect = aspect_for(info.format);

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width: info.width, height: info.height, depth: 1 })
            .mip_levels(info.mip_levels)
            .array_layers(info.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage_flags(info.usage, info.mip_levels))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            ctx.device
                .create_image(&image_info, None)
                .map_err(|e| vk_error("vkCreateImage", e))?
        };

        let mut texture = Self {
            ctx,
            frames,
            info,
            image,
            view: vk::ImageView::null(),
            aspect,
            allocation: None,
            staging: Mutex::new(StagingQueue::new()),
        };
        // From here on, Drop releases whatever was created
        texture.bind_memory()?;
        texture.create_view(format)?;
        texture.initialize(desc.data.as_ref())?;
        Ok(texture)
    }

    fn bind_memory(&mut self) -> Result<()> {
        unsafe {
            let requirements = self.ctx.device.get_image_memory_requirements(self.image);
            let allocation = lock(&self.ctx.allocator)
                .allocate(&AllocationCreateDesc {
                    name: "texture",
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| {
                    engine_error!(
                        "lumen3d::vulkan",
                        "Out of GPU memory for a {}x{} texture ({:.2} MB): {:?}",
                        self.info.width,
                        self.info.height,
                        requirements.size as f64 / (1024.0 * 1024.0),
                        e
                    );
                    Error::OutOfMemory
                })?;

            let bound = self
                .ctx
                .device
                .bind_image_memory(self.image, allocation.memory(), allocation.offset());
            self.allocation = Some(allocation);
            bound.map_err(|e| vk_error("vkBindImageMemory", e))
        }
    }

    fn create_view(&mut self, format: vk::Format) -> Result<()> {
        let view_type = if self.info.is_array() {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(view_type)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: self.info.mip_levels,
                base_array_layer: 0,
                layer_count: self.info.array_layers,
            });

        self.view = unsafe {
            self.ctx
                .device
                .create_image_view(&view_info, None)
                .map_err(|e| vk_error("vkCreateImageView", e))?
        };
        Ok(())
    }

    /// Upload the initial layers, build the mip chain and leave sampled
    /// textures in SHADER_READ_ONLY_OPTIMAL
    fn initialize(&self, data: Option<&TextureData>) -> Result<()> {
        if !self.info.usage.is_sampled() {
            if data.is_some() {
                return Err(Error::InvalidResource("initial data on a non-sampled texture".to_string()));
            }
            return Ok(());
        }

        let layer_size = self.info.width as u64 * self.info.height as u64 * self.info.format.bytes_per_pixel() as u64;
        let layers: Vec<(u32, &[u8])> = match data {
            None => Vec::new(),
            Some(TextureData::Single(bytes)) => vec![(0, bytes.as_slice())],
            Some(TextureData::Layers(layers)) => layers.iter().map(|l| (l.layer, l.data.as_slice())).collect(),
        };
        for &(layer, bytes) in &layers {
            if layer >= self.info.array_layers || bytes.len() as u64 != layer_size {
                return Err(Error::InvalidResource(format!(
                    "layer {}: {} bytes, expected {} bytes for one of {} layers",
                    layer,
                    bytes.len(),
                    layer_size,
                    self.info.array_layers
                )));
            }
        }

        let all_mips = 0..self.info.mip_levels;
        let all_layers = 0..self.info.array_layers;

        if layers.is_empty() {
            return self.ctx.submit_one_time(|device, cb| unsafe {
                cmd_transition(device, cb, self.image, self.aspect, all_mips, all_layers,
                    ImageLayout::Undefined, ImageLayout::ShaderReadOnly);
            });
        }

        let packed: Vec<u8> = layers.iter().flat_map(|(_, bytes)| bytes.iter().copied()).collect();
        let staging = Buffer::staging(Arc::clone(&self.ctx), "texture staging", &packed)?;
        let regions: Vec<vk::BufferImageCopy> = layers
            .iter()
            .enumerate()
            .map(|(i, &(layer, _))| self.copy_region(i as u64 * layer_size, 0, layer))
            .collect();

        self.ctx.submit_one_time(|device, cb| unsafe {
            cmd_transition(device, cb, self.image, self.aspect, all_mips.clone(), all_layers.clone(),
                ImageLayout::Undefined, ImageLayout::TransferDst);
            device.cmd_copy_buffer_to_image(
                cb,
                staging.buffer,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
            self.cmd_generate_mips(device, cb);
        })
    }

    fn copy_region(&self, buffer_offset: u64, mip: u32, layer: u32) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: self.aspect,
                mip_level: mip,
                base_array_layer: layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: mip_extent(self.info.width, mip),
                height: mip_extent(self.info.height, mip),
                depth: 1,
            },
        }
    }

    /// Blit mip 0 down the chain; every level ends in SHADER_READ_ONLY_OPTIMAL
    unsafe fn cmd_generate_mips(&self, device: &ash::Device, cb: vk::CommandBuffer) {
        let layers = 0..self.info.array_layers;
        for mip in 1..self.info.mip_levels {
            let src = mip - 1;
            cmd_transition(device, cb, self.image, self.aspect, src..mip, layers.clone(),
                ImageLayout::TransferDst, ImageLayout::TransferSrc);

            let offsets = |level: u32| {
                [
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: mip_extent(self.info.width, level) as i32,
                        y: mip_extent(self.info.height, level) as i32,
                        z: 1,
                    },
                ]
            };
            let subresource = |level: u32| vk::ImageSubresourceLayers {
                aspect_mask: self.aspect,
                mip_level: level,
                base_array_layer: 0,
                layer_count: self.info.array_layers,
            };
            let blit = vk::ImageBlit::default()
                .src_subresource(subresource(src))
                .src_offsets(offsets(src))
                .dst_subresource(subresource(mip))
                .dst_offsets(offsets(mip));

            device.cmd_blit_image(
                cb,
                self.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );

            cmd_transition(device, cb, self.image, self.aspect, src..mip, layers.clone(),
                ImageLayout::TransferSrc, ImageLayout::ShaderReadOnly);
        }
        let last = self.info.mip_levels - 1;
        cmd_transition(device, cb, self.image, self.aspect, last..last + 1, layers,
            ImageLayout::TransferDst, ImageLayout::ShaderReadOnly);
    }
}

impl Texture for VulkanTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }

    fn update_image(
        &self,
        mip_level: u32,
        array_layer: u32,
        data: &[u8],
        cmd: Option<&mut dyn CommandBuffer>,
    ) -> Result<()> {
        if mip_level >= self.info.mip_levels || array_layer >= self.info.array_layers {
            return Err(Error::InvalidResource(format!(
                "mip {} / layer {} out of range ({} mips, {} layers)",
                mip_level, array_layer, self.info.mip_levels, self.info.array_layers
            )));
        }
        if !self.info.usage.is_sampled() {
            return Err(Error::InvalidResource(format!("update_image on a {:?} texture", self.info.usage)));
        }
        let expected = mip_extent(self.info.width, mip_level) as u64
            * mip_extent(self.info.height, mip_level) as u64
            * self.info.format.bytes_per_pixel() as u64;
        if data.len() as u64 != expected {
            return Err(Error::InvalidResource(format!(
                "mip {} expects {} bytes, got {}",
                mip_level,
                expected,
                data.len()
            )));
        }

        let staging = Buffer::staging(Arc::clone(&self.ctx), "texture staging", data)?;
        let region = self.copy_region(0, mip_level, array_layer);
        let src = staging.buffer;
        let mips = mip_level..mip_level + 1;
        let layers = array_layer..array_layer + 1;
        let record = |device: &ash::Device, cb: vk::CommandBuffer| unsafe {
            cmd_transition(device, cb, self.image, self.aspect, mips.clone(), layers.clone(),
                ImageLayout::ShaderReadOnly, ImageLayout::TransferDst);
            device.cmd_copy_buffer_to_image(cb, src, self.image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);
            cmd_transition(device, cb, self.image, self.aspect, mips.clone(), layers.clone(),
                ImageLayout::TransferDst, ImageLayout::ShaderReadOnly);
        };

        match cmd {
            Some(cmd) => {
                let cb = VulkanCommandBuffer::from_dyn(cmd)?.transfer_handle("update_image")?;
                record(&self.ctx.device, cb);
                lock(&self.staging).push(staging, &self.frames);
            }
            None => {
                self.ctx.submit_one_time(record)?;
                lock(&self.staging).push_completed(staging);
            }
        }
        Ok(())
    }

    fn destroy_staging_buffers(&self, frames: &FrameCounter) {
        let freed = lock(&self.staging).take_allowed(frames);
        drop(freed);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.ctx.device.destroy_image_view(self.view, None);
            }
            self.ctx.device.destroy_image(self.image, None);
            if let Some(allocation) = self.allocation.take() {
                lock(&self.ctx.allocator).free(allocation).ok();
            }
        }
    }
}
