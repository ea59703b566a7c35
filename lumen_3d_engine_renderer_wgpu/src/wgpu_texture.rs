/// WgpuTexture - wgpu texture with a sampling view and an attachment view
///
/// wgpu tracks image layouts itself. Mip chains of 8-bit formats are
/// generated on the CPU at creation; other formats only get mip 0 there and
/// take the remaining levels through `update_image`.

use lumen_3d_engine::engine_warn;
use lumen_3d_engine::lumen3d::render::{
    lock, CommandBuffer, FrameCounter, StagingQueue, Texture, TextureData, TextureDesc, TextureFormat,
    TextureInfo, TextureUsage,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::wgpu_buffer::GpuBuffer;
use crate::wgpu_command_buffer::{Command, WgpuCommandBuffer};
use crate::wgpu_context::WgpuContext;
use crate::wgpu_format::texture_format_to_wgpu;

pub struct WgpuTexture {
    ctx: Arc<WgpuContext>,
    frames: Arc<FrameCounter>,
    info: TextureInfo,
    pub(crate) texture: wgpu::Texture,
    /// Every mip and layer, for descriptor sets
    pub(crate) sample_view: wgpu::TextureView,
    /// Mip 0 of layer 0, for framebuffers
    pub(crate) attachment_view: wgpu::TextureView,
    size_bytes: u64,
    staging: Mutex<StagingQueue<GpuBuffer>>,
}

fn mip_extent(size: u32, mip: u32) -> u32 {
    (size >> mip).max(1)
}

fn usage_flags(usage: TextureUsage) -> wgpu::TextureUsages {
    let sampled = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
    match usage {
        TextureUsage::Sampled => sampled,
        TextureUsage::RenderTarget => wgpu::TextureUsages::RENDER_ATTACHMENT,
        TextureUsage::SampledAndRenderTarget => sampled | wgpu::TextureUsages::RENDER_ATTACHMENT,
        // Sampled as well, for shadow maps
        TextureUsage::DepthStencil => {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        }
    }
}

/// Channels of a format whose mips can be averaged byte-wise
fn byte_channels(format: TextureFormat) -> Option<usize> {
    match format {
        TextureFormat::R8_UNORM => Some(1),
        TextureFormat::R8G8B8A8_SRGB
        | TextureFormat::R8G8B8A8_UNORM
        | TextureFormat::B8G8R8A8_SRGB
        | TextureFormat::B8G8R8A8_UNORM => Some(4),
        _ => None,
    }
}

/// Box-filter `src` (`width x height`, `channels` bytes per texel) to the next mip
pub(crate) fn downsample(src: &[u8], width: u32, height: u32, channels: usize) -> Vec<u8> {
    let (dst_w, dst_h) = (mip_extent(width, 1), mip_extent(height, 1));
    let texel = |x: u32, y: u32, c: usize| {
        let (x, y) = (x.min(width - 1), y.min(height - 1));
        src[(y as usize * width as usize + x as usize) * channels + c] as u32
    };

    let mut dst = Vec::with_capacity(dst_w as usize * dst_h as usize * channels);
    for y in 0..dst_h {
        for x in 0..dst_w {
            for c in 0..channels {
                let (sx, sy) = (x * 2, y * 2);
                let sum = texel(sx, sy, c) + texel(sx + 1, sy, c) + texel(sx, sy + 1, c) + texel(sx + 1, sy + 1, c);
                dst.push(((sum + 2) / 4) as u8);
            }
        }
    }
    dst
}

/// Rows of `data` padded to the 256-byte row pitch buffer-to-texture copies need
///
/// Returns the padded bytes and the padded row pitch.
pub(crate) fn pad_rows(data: &[u8], row_bytes: u32, rows: u32) -> (Vec<u8>, u32) {
    let pitch = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let mut padded = vec![0u8; pitch as usize * rows as usize];
    for (row, chunk) in data.chunks(row_bytes as usize).take(rows as usize).enumerate() {
        let start = row * pitch as usize;
        padded[start..start + chunk.len()].copy_from_slice(chunk);
    }
    (padded, pitch)
}

impl WgpuTexture {
    pub fn new(ctx: Arc<WgpuContext>, frames: Arc<FrameCounter>, desc: &TextureDesc) -> Result<Self> {
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
        let texture = ctx.scoped("texture", |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("texture"),
                size: wgpu::Extent3d {
                    width: info.width,
                    height: info.height,
                    depth_or_array_layers: info.array_layers,
                },
                mip_level_count: info.mip_levels,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format_to_wgpu(info.format),
                usage: usage_flags(info.usage),
                view_formats: &[],
            })
        })?;

        let sample_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("texture view"),
            dimension: Some(if info.is_array() {
                wgpu::TextureViewDimension::D2Array
            } else {
                wgpu::TextureViewDimension::D2
            }),
            ..Default::default()
        });
        let attachment_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("attachment view"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: 0,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(1),
            ..Default::default()
        });

        let bytes_per_layer: u64 = (0..info.mip_levels)
            .map(|mip| {
                mip_extent(info.width, mip) as u64
                    * mip_extent(info.height, mip) as u64
                    * info.format.bytes_per_pixel() as u64
            })
            .sum();
        let size_bytes = bytes_per_layer * info.array_layers as u64;
        ctx.track_alloc(size_bytes);

        let texture = Self {
            ctx,
            frames,
            info,
            texture,
            sample_view,
            attachment_view,
            size_bytes,
            staging: Mutex::new(StagingQueue::new()),
        };
        texture.initialize(desc.data.as_ref())?;
        Ok(texture)
    }

    fn initialize(&self, data: Option<&TextureData>) -> Result<()> {
        let Some(data) = data else {
            return Ok(());
        };
        if !self.info.usage.is_sampled() {
            return Err(Error::InvalidResource("initial data on a non-sampled texture".to_string()));
        }

        let layer_size = self.info.width as u64 * self.info.height as u64 * self.info.format.bytes_per_pixel() as u64;
        let layers: Vec<(u32, &[u8])> = match data {
            TextureData::Single(bytes) => vec![(0, bytes.as_slice())],
            TextureData::Layers(layers) => layers.iter().map(|l| (l.layer, l.data.as_slice())).collect(),
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

        let channels = byte_channels(self.info.format);
        if channels.is_none() && self.info.mip_levels > 1 {
            engine_warn!(
                "lumen3d::wgpu",
                "No mip generation for {:?}; levels 1..{} stay empty",
                self.info.format,
                self.info.mip_levels
            );
        }

        for (layer, bytes) in layers {
            self.write_level(0, layer, bytes);
            let Some(channels) = channels else {
                continue;
            };
            let mut level = bytes.to_vec();
            for mip in 1..self.info.mip_levels {
                level = downsample(
                    &level,
                    mip_extent(self.info.width, mip - 1),
                    mip_extent(self.info.height, mip - 1),
                    channels,
                );
                self.write_level(mip, layer, &level);
            }
        }
        Ok(())
    }

    fn copy_target(&self, mip_level: u32, array_layer: u32) -> wgpu::TexelCopyTextureInfo<'_> {
        wgpu::TexelCopyTextureInfo {
            texture: &self.texture,
            mip_level,
            origin: wgpu::Origin3d { x: 0, y: 0, z: array_layer },
            aspect: wgpu::TextureAspect::All,
        }
    }

    fn level_extent(&self, mip_level: u32) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: mip_extent(self.info.width, mip_level),
            height: mip_extent(self.info.height, mip_level),
            depth_or_array_layers: 1,
        }
    }

    /// Queue write of one whole level; lands before the next submission
    fn write_level(&self, mip_level: u32, array_layer: u32, data: &[u8]) {
        let extent = self.level_extent(mip_level);
        self.ctx.queue.write_texture(
            self.copy_target(mip_level, array_layer),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(extent.width * self.info.format.bytes_per_pixel()),
                rows_per_image: Some(extent.height),
            },
            extent,
        );
    }
}

impl Texture for WgpuTexture {
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
        let extent = self.level_extent(mip_level);
        let row_bytes = extent.width * self.info.format.bytes_per_pixel();
        let expected = row_bytes as u64 * extent.height as u64;
        if data.len() as u64 != expected {
            return Err(Error::InvalidResource(format!(
                "mip {} expects {} bytes, got {}",
                mip_level,
                expected,
                data.len()
            )));
        }

        let Some(cmd) = cmd else {
            self.write_level(mip_level, array_layer, data);
            return Ok(());
        };
        let cmd = WgpuCommandBuffer::from_dyn(cmd)?;
        let (rows, pitch) = pad_rows(data, row_bytes, extent.height);
        let staging = GpuBuffer::staging(Arc::clone(&self.ctx), "texture staging", &rows)?;
        cmd.record_transfer(
            "update_image",
            Command::CopyBufferToTexture {
                src: staging.buffer.clone(),
                bytes_per_row: pitch,
                rows: extent.height,
                dst: self.texture.clone(),
                mip_level,
                array_layer,
                extent,
            },
        )?;
        lock(&self.staging).push(staging, &self.frames);
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

impl Drop for WgpuTexture {
    fn drop(&mut self) {
        self.ctx.track_free(self.size_bytes);
    }
}
