/// SamplerCache - predefined wgpu samplers, created on first use and shared

use lumen_3d_engine::lumen3d::render::SamplerKind;
use lumen_3d_engine::lumen3d::{Error, Result};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::wgpu_context::WgpuContext;
use crate::wgpu_descriptors::WgpuSampler;

pub(crate) struct SamplerCache {
    ctx: Arc<WgpuContext>,
    cache: FxHashMap<SamplerKind, WgpuSampler>,
}

/// Sampler description of a predefined kind; `clamp_to_border` tells
/// whether the device supports border addressing
pub(crate) fn sampler_descriptor(
    kind: SamplerKind,
    clamp_to_border: bool,
) -> Option<wgpu::SamplerDescriptor<'static>> {
    let (filter, mipmap, address) = match kind {
        SamplerKind::LinearRepeat | SamplerKind::Anisotropic => (
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Linear,
            wgpu::AddressMode::Repeat,
        ),
        SamplerKind::LinearClamp => (
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Linear,
            wgpu::AddressMode::ClampToEdge,
        ),
        SamplerKind::NearestRepeat => (
            wgpu::FilterMode::Nearest,
            wgpu::FilterMode::Nearest,
            wgpu::AddressMode::Repeat,
        ),
        SamplerKind::NearestClamp => (
            wgpu::FilterMode::Nearest,
            wgpu::FilterMode::Nearest,
            wgpu::AddressMode::ClampToEdge,
        ),
        SamplerKind::Shadow => (
            wgpu::FilterMode::Linear,
            wgpu::FilterMode::Nearest,
            if clamp_to_border {
                wgpu::AddressMode::ClampToBorder
            } else {
                wgpu::AddressMode::ClampToEdge
            },
        ),
        SamplerKind::Custom => return None,
    };

    let shadow = kind == SamplerKind::Shadow;
    Some(wgpu::SamplerDescriptor {
        label: Some("engine sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: mipmap,
        compare: shadow.then_some(wgpu::CompareFunction::LessEqual),
        // Anisotropy needs linear filtering everywhere, which Anisotropic has
        anisotropy_clamp: if kind == SamplerKind::Anisotropic { 16 } else { 1 },
        border_color: (shadow && clamp_to_border).then_some(wgpu::SamplerBorderColor::OpaqueWhite),
        ..Default::default()
    })
}

impl SamplerCache {
    pub(crate) fn new(ctx: Arc<WgpuContext>) -> Self {
        Self {
            ctx,
            cache: FxHashMap::default(),
        }
    }

    /// Get or create the sampler of `kind`
    pub(crate) fn get(&mut self, kind: SamplerKind) -> Result<WgpuSampler> {
        if let Some(sampler) = self.cache.get(&kind) {
            return Ok(sampler.clone());
        }
        let Some(desc) = sampler_descriptor(kind, self.ctx.clamp_to_border) else {
            return Err(Error::InvalidResource(
                "SamplerKind::Custom has no predefined sampler".to_string(),
            ));
        };

        let sampler = self.ctx.scoped("sampler", |device| device.create_sampler(&desc))?;
        let sampler = WgpuSampler { sampler, kind };
        self.cache.insert(kind, sampler.clone());
        Ok(sampler)
    }

    pub(crate) fn len(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_has_no_descriptor() {
        assert!(sampler_descriptor(SamplerKind::Custom, true).is_none());
    }

    #[test]
    fn test_shadow_compares_less_equal() {
        let desc = sampler_descriptor(SamplerKind::Shadow, true).unwrap();
        assert_eq!(desc.compare, Some(wgpu::CompareFunction::LessEqual));
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::ClampToBorder);
        assert_eq!(desc.border_color, Some(wgpu::SamplerBorderColor::OpaqueWhite));
    }

    #[test]
    fn test_shadow_without_border_support_clamps_to_edge() {
        let desc = sampler_descriptor(SamplerKind::Shadow, false).unwrap();
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::ClampToEdge);
        assert_eq!(desc.border_color, None);
    }

    #[test]
    fn test_only_anisotropic_raises_clamp() {
        assert_eq!(sampler_descriptor(SamplerKind::Anisotropic, true).unwrap().anisotropy_clamp, 16);
        assert_eq!(sampler_descriptor(SamplerKind::LinearRepeat, true).unwrap().anisotropy_clamp, 1);
        assert_eq!(
            sampler_descriptor(SamplerKind::NearestClamp, true).unwrap().mag_filter,
            wgpu::FilterMode::Nearest
        );
    }
}
