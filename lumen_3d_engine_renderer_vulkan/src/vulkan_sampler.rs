/// SamplerCache - predefined VkSamplers, created on first use and shared
///
/// Shaders bake these into their set layouts as immutable samplers, so the
/// cache outlives every shader and is only emptied at backend shutdown.

use ash::vk;
use lumen_3d_engine::lumen3d::render::SamplerKind;
use lumen_3d_engine::lumen3d::{Error, Result};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::vulkan_context::{vk_error, GpuContext};

pub(crate) struct SamplerCache {
    ctx: Option<Arc<GpuContext>>,
    cache: FxHashMap<SamplerKind, vk::Sampler>,
}

/// Filter, mipmap mode, address mode, anisotropy, border, depth compare
type SamplerParams = (
    vk::Filter,
    vk::SamplerMipmapMode,
    vk::SamplerAddressMode,
    Option<f32>,
    vk::BorderColor,
    bool,
);

impl SamplerCache {
    pub(crate) fn new(ctx: Arc<GpuContext>) -> Self {
        Self {
            ctx: Some(ctx),
            cache: FxHashMap::default(),
        }
    }

    /// Get or create the sampler of `kind`
    ///
    /// `SamplerKind::Custom` has no predefined sampler and is rejected.
    pub(crate) fn get(&mut self, kind: SamplerKind) -> Result<vk::Sampler> {
        if let Some(&sampler) = self.cache.get(&kind) {
            return Ok(sampler);
        }
        let Some(params) = Self::params(kind) else {
            return Err(Error::InvalidResource(
                "SamplerKind::Custom has no predefined sampler".to_string(),
            ));
        };
        let Some(ctx) = self.ctx.as_ref() else {
            return Err(Error::BackendError("SamplerCache used after shutdown".to_string()));
        };

        let sampler = Self::create_vk_sampler(ctx, params)?;
        self.cache.insert(kind, sampler);
        Ok(sampler)
    }

    pub(crate) fn len(&self) -> usize {
        self.cache.len()
    }

    /// Destroy every cached sampler; the device must still be alive
    pub(crate) fn shutdown(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            for (_, sampler) in self.cache.drain() {
                unsafe { ctx.device.destroy_sampler(sampler, None) };
            }
        }
    }

    pub(crate) fn params(kind: SamplerKind) -> Option<SamplerParams> {
        let black = vk::BorderColor::FLOAT_OPAQUE_BLACK;
        let params = match kind {
            SamplerKind::LinearRepeat => (
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::LINEAR,
                vk::SamplerAddressMode::REPEAT,
                None,
                black,
                false,
            ),
            SamplerKind::LinearClamp => (
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::LINEAR,
                vk::SamplerAddressMode::CLAMP_TO_EDGE,
                None,
                black,
                false,
            ),
            SamplerKind::NearestRepeat => (
                vk::Filter::NEAREST,
                vk::SamplerMipmapMode::NEAREST,
                vk::SamplerAddressMode::REPEAT,
                None,
                black,
                false,
            ),
            SamplerKind::NearestClamp => (
                vk::Filter::NEAREST,
                vk::SamplerMipmapMode::NEAREST,
                vk::SamplerAddressMode::CLAMP_TO_EDGE,
                None,
                black,
                false,
            ),
            SamplerKind::Shadow => (
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::NEAREST,
                vk::SamplerAddressMode::CLAMP_TO_BORDER,
                None,
                vk::BorderColor::FLOAT_OPAQUE_WHITE,
                true,
            ),
            SamplerKind::Anisotropic => (
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::LINEAR,
                vk::SamplerAddressMode::REPEAT,
                Some(16.0),
                black,
                false,
            ),
            SamplerKind::Custom => return None,
        };
        Some(params)
    }

    fn create_vk_sampler(ctx: &GpuContext, params: SamplerParams) -> Result<vk::Sampler> {
        let (filter, mipmap, address, anisotropy, border, compare) = params;

        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(border)
            .unnormalized_coordinates(false);

        create_info = if compare {
            create_info.compare_enable(true).compare_op(vk::CompareOp::LESS_OR_EQUAL)
        } else {
            create_info.compare_enable(false).compare_op(vk::CompareOp::ALWAYS)
        };

        create_info = match anisotropy {
            Some(max_aniso) => create_info
                .anisotropy_enable(true)
                .max_anisotropy(max_aniso.min(ctx.max_sampler_anisotropy)),
            None => create_info.anisotropy_enable(false).max_anisotropy(1.0),
        };

        unsafe {
            ctx.device
                .create_sampler(&create_info, None)
                .map_err(|e| vk_error("vkCreateSampler", e))
        }
    }
}

impl Drop for SamplerCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}
