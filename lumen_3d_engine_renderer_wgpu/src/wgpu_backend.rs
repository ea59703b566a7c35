/// WgpuBackend - wgpu implementation of the RenderBackend trait
///
/// Owns the instance, surface and device, the submission index of every
/// ring slot and the objects every resource shares (WgpuContext, render
/// targets, sampler cache).

use lumen_3d_engine::lumen3d::render::{
    lock, BackendKind, CommandBuffer, CommandBufferDesc, Config, FrameCounter, FramebufferDesc, FramebufferId,
    Geometry, GeometryDesc, Pipeline, PipelineDesc, RenderBackend, RenderPassDesc, RenderPassId, RendererStats,
    Shader, ShaderDesc, Texture, TextureDesc, TextureFormat, RING_BUFFER_SIZE,
};
use lumen_3d_engine::lumen3d::{Error, Result};
use lumen_3d_engine::{engine_bail, engine_debug, engine_error, engine_info, engine_trace, engine_warn};
use std::sync::{Arc, Mutex};
use winit::window::Window;

use crate::wgpu_command_buffer::WgpuCommandBuffer;
use crate::wgpu_context::{wgpu_error, WgpuContext};
use crate::wgpu_format::texture_format_from_wgpu;
use crate::wgpu_geometry::WgpuGeometry;
use crate::wgpu_pipeline::WgpuPipeline;
use crate::wgpu_render_pass::RenderTargets;
use crate::wgpu_sampler::SamplerCache;
use crate::wgpu_shader::WgpuShader;
use crate::wgpu_texture::WgpuTexture;

const SOURCE: &str = "lumen3d::wgpu";

/// Frames the surface may queue ahead of the one being recorded
const FRAME_LATENCY: u32 = 2;

/// Features used when the adapter has them
const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::PUSH_CONSTANTS
    .union(wgpu::Features::POLYGON_MODE_LINE)
    .union(wgpu::Features::POLYGON_MODE_POINT)
    .union(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);

/// Everything created from the device, released together at shutdown
struct DeviceObjects {
    ctx: Arc<WgpuContext>,
    targets: Arc<RenderTargets>,
    samplers: Arc<Mutex<SamplerCache>>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    surface_format: TextureFormat,
}

/// wgpu backend
///
/// Build one from a window, hand it to `Renderer::new`. The window must
/// outlive the backend.
pub struct WgpuBackend {
    _instance: wgpu::Instance,
    adapter_name: String,

    /// None once shut down
    device: Option<DeviceObjects>,
    frames: Option<Arc<FrameCounter>>,

    /// Last submission of every ring slot
    in_flight: [Option<wgpu::SubmissionIndex>; RING_BUFFER_SIZE],

    /// Surface texture acquired by the current presenting frame
    acquired: Option<wgpu::SurfaceTexture>,
    presented_frames: u32,
    last_image: u32,
    /// Set by suboptimal acquires and resizes that could not apply yet
    needs_reconfigure: bool,
    requested_extent: (u32, u32),

    stats: RendererStats,
}

/// First sRGB surface format the engine can name, else the first one it can
pub(crate) fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Option<(wgpu::TextureFormat, TextureFormat)> {
    let known = || formats.iter().filter_map(|&f| texture_format_from_wgpu(f).map(|engine| (f, engine)));
    known().find(|(f, _)| f.is_srgb()).or_else(|| known().next())
}

/// Fifo with vsync; otherwise the lowest-latency mode the surface offers
pub(crate) fn choose_present_mode(vsync: bool, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
    if vsync {
        return wgpu::PresentMode::Fifo;
    }
    [wgpu::PresentMode::Mailbox, wgpu::PresentMode::Immediate]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(wgpu::PresentMode::Fifo)
}

impl WgpuBackend {
    /// Create a wgpu backend rendering to `window`
    ///
    /// # Arguments
    ///
    /// * `window` - Window the surface is created for; must outlive the backend
    /// * `config` - vsync, validation and initial extent
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        let flags = if config.enable_validation {
            wgpu::InstanceFlags::debugging()
        } else {
            wgpu::InstanceFlags::empty()
        };
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            flags: flags.with_env(),
            ..Default::default()
        });

        // ===== SURFACE / ADAPTER =====

        let surface = unsafe {
            let target = wgpu::SurfaceTargetUnsafe::from_window(window)
                .map_err(|e| Error::InitializationFailed(format!("window handle: {}", e)))?;
            instance
                .create_surface_unsafe(target)
                .map_err(|e| Error::InitializationFailed(format!("create surface: {}", e)))?
        };

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        }))
        .map_err(|e| {
            engine_error!(SOURCE, "No adapter can present to the window: {}", e);
            Error::InitializationFailed(format!("request adapter: {}", e))
        })?;
        let info = adapter.get_info();
        engine_info!(SOURCE, "Using GPU '{}' ({:?}, {:?})", info.name, info.device_type, info.backend);

        // ===== DEVICE =====

        let features = adapter.features() & OPTIONAL_FEATURES;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("lumen3d device"),
            required_features: features,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| {
            engine_error!(SOURCE, "request_device failed: {}", e);
            Error::InitializationFailed(format!("request device: {}", e))
        })?;
        engine_debug!(SOURCE, "Optional features enabled: {:?}", features);
        let ctx = Arc::new(WgpuContext::new(device, queue));

        // ===== SURFACE CONFIGURATION =====

        let caps = surface.get_capabilities(&adapter);
        let Some((format, surface_format)) = choose_surface_format(&caps.formats) else {
            return Err(Error::InitializationFailed(format!(
                "no supported surface format among {:?}",
                caps.formats
            )));
        };
        let size = window.inner_size();
        let requested_extent = if size.width > 0 && size.height > 0 {
            (size.width, size.height)
        } else {
            config.initial_extent
        };
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: requested_extent.0.max(1),
            height: requested_extent.1.max(1),
            present_mode: choose_present_mode(config.vsync, &caps.present_modes),
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: FRAME_LATENCY,
        };
        surface.configure(&ctx.device, &surface_config);
        engine_info!(
            SOURCE,
            "Surface configured {}x{} {:?} {:?}",
            surface_config.width,
            surface_config.height,
            format,
            surface_config.present_mode
        );

        let device = DeviceObjects {
            targets: Arc::new(RenderTargets::new()),
            samplers: Arc::new(Mutex::new(SamplerCache::new(Arc::clone(&ctx)))),
            ctx,
            surface,
            surface_config,
            surface_format,
        };

        Ok(Self {
            _instance: instance,
            adapter_name: info.name,
            device: Some(device),
            frames: None,
            in_flight: Default::default(),
            acquired: None,
            presented_frames: 0,
            last_image: 0,
            needs_reconfigure: false,
            requested_extent,
            stats: RendererStats::default(),
        })
    }

    /// Name of the selected adapter
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Number of live render passes and framebuffers
    pub fn render_target_counts(&self) -> (usize, usize) {
        match &self.device {
            Some(device) => (device.targets.render_pass_count(), device.targets.framebuffer_count()),
            None => (0, 0),
        }
    }

    fn device(&self) -> Result<&DeviceObjects> {
        self.device
            .as_ref()
            .ok_or_else(|| Error::BackendError("wgpu backend used after shutdown".to_string()))
    }

    fn frames(&self) -> Result<Arc<FrameCounter>> {
        self.frames
            .clone()
            .ok_or_else(|| Error::BackendError("wgpu backend used before init".to_string()))
    }

    /// Apply the last requested extent to the surface and the framebuffers built on it
    fn reconfigure(&mut self) -> Result<()> {
        let (width, height) = self.requested_extent;
        if width == 0 || height == 0 || self.acquired.is_some() {
            self.needs_reconfigure = true;
            return Ok(());
        }
        let Some(device) = self.device.as_mut() else {
            return Ok(());
        };
        device.ctx.wait_for(None)?;
        device.surface_config.width = width;
        device.surface_config.height = height;
        device.surface.configure(&device.ctx.device, &device.surface_config);
        device.targets.resize_swapchain_framebuffers((width, height));
        self.needs_reconfigure = false;
        engine_debug!(SOURCE, "Surface reconfigured at {}x{}", width, height);
        Ok(())
    }

    fn acquire(&mut self) -> Result<()> {
        for _ in 0..2 {
            if self.needs_reconfigure {
                self.reconfigure()?;
            }
            let acquired = self.device()?.surface.get_current_texture();
            match acquired {
                Ok(frame) => {
                    // Suboptimal frames are still usable; reconfigure on the next one
                    self.needs_reconfigure |= frame.suboptimal;
                    let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
                    self.device()?.targets.set_surface_view(Some(view));
                    self.acquired = Some(frame);
                    self.last_image = self.presented_frames % self.num_swapchain_buffers().max(1);
                    return Ok(());
                }
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    engine_debug!(SOURCE, "Surface lost or outdated; reconfiguring");
                    self.needs_reconfigure = true;
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    return Err(Error::Timeout("surface texture acquire".to_string()));
                }
                Err(wgpu::SurfaceError::OutOfMemory) => return Err(Error::OutOfMemory),
                Err(e) => return Err(wgpu_error("get_current_texture", e)),
            }
        }
        engine_bail!(SOURCE, "Surface stayed outdated after reconfiguration")
    }
}

impl RenderBackend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wgpu
    }

    fn init(&mut self, frames: Arc<FrameCounter>) -> Result<()> {
        if self.frames.is_some() {
            engine_bail!(SOURCE, "wgpu backend initialized twice");
        }
        self.frames = Some(frames);
        Ok(())
    }

    fn create_geometry(&self, desc: &GeometryDesc) -> Result<Arc<dyn Geometry>> {
        let device = self.device()?;
        Ok(Arc::new(WgpuGeometry::new(Arc::clone(&device.ctx), self.frames()?, desc)))
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>> {
        let device = self.device()?;
        Ok(Arc::new(WgpuShader::new(
            Arc::clone(&device.ctx),
            self.frames()?,
            Arc::clone(&device.samplers),
            desc,
        )?))
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<Arc<dyn Pipeline>> {
        let device = self.device()?;
        Ok(Arc::new(WgpuPipeline::new(Arc::clone(&device.ctx), &device.targets, desc)?))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn Texture>> {
        let device = self.device()?;
        Ok(Arc::new(WgpuTexture::new(Arc::clone(&device.ctx), self.frames()?, desc)?))
    }

    fn create_command_buffer(&self, desc: &CommandBufferDesc) -> Result<Arc<Mutex<dyn CommandBuffer>>> {
        let device = self.device()?;
        // Ring buffers are reused per frame slot; no slot exists before init
        self.frames()?;
        let cmd = WgpuCommandBuffer::new(Arc::clone(&device.ctx), Arc::clone(&device.targets), desc.one_time_submit);
        Ok(Arc::new(Mutex::new(cmd)))
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId> {
        self.device()?.targets.create_render_pass(desc)
    }

    fn delete_render_pass(&self, id: RenderPassId) {
        if let Some(device) = &self.device {
            device.targets.delete_render_pass(id);
        }
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> Result<FramebufferId> {
        let device = self.device()?;
        let extent = (device.surface_config.width, device.surface_config.height);
        device.targets.create_framebuffer(desc, extent)
    }

    fn delete_framebuffer(&self, id: FramebufferId) {
        if let Some(device) = &self.device {
            device.targets.delete_framebuffer(id);
        }
    }

    fn begin_frame(&mut self, slot: usize, present: bool) -> Result<()> {
        let slot = slot % RING_BUFFER_SIZE;
        if let Some(index) = self.in_flight[slot].take() {
            self.device()?.ctx.wait_for(Some(index))?;
        }
        self.stats.draw_calls = 0;
        self.stats.triangles = 0;

        if self.acquired.take().is_some() {
            engine_warn!(SOURCE, "begin_frame: previous surface texture was never presented");
            self.device()?.targets.set_surface_view(None);
        }
        if present {
            self.acquire()?;
        }
        Ok(())
    }

    fn submit(
        &mut self,
        slot: usize,
        command_buffers: &[Arc<Mutex<dyn CommandBuffer>>],
        present: bool,
    ) -> Result<()> {
        if present && self.acquired.is_none() {
            engine_bail!(SOURCE, "submit: no surface texture acquired for slot {}", slot);
        }

        let mut encoded = Vec::with_capacity(command_buffers.len());
        for cmd in command_buffers {
            let cmd = lock(cmd);
            let Some(wgpu_cmd) = cmd.as_any().downcast_ref::<WgpuCommandBuffer>() else {
                engine_bail!(SOURCE, "submit: command buffer is not a wgpu command buffer");
            };
            encoded.push(wgpu_cmd.finish()?);
            let (draw_calls, triangles) = wgpu_cmd.counters();
            self.stats.draw_calls += draw_calls;
            self.stats.triangles += triangles;
            engine_trace!(SOURCE, "slot {}: {} recorded command(s)", slot, wgpu_cmd.command_count());
        }

        let index = self.device()?.ctx.queue.submit(encoded);
        self.in_flight[slot % RING_BUFFER_SIZE] = Some(index);
        Ok(())
    }

    fn present(&mut self, _slot: usize) -> Result<()> {
        let Some(frame) = self.acquired.take() else {
            engine_bail!(SOURCE, "present: no surface texture acquired");
        };
        self.device()?.targets.set_surface_view(None);
        frame.present();
        self.presented_frames = self.presented_frames.wrapping_add(1);
        if self.needs_reconfigure {
            self.reconfigure()?;
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.device()?.ctx.wait_for(None)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.requested_extent = (width, height);
        if width == 0 || height == 0 {
            // Minimized; applied once a real size comes back
            engine_debug!(SOURCE, "Resize to {}x{} deferred", width, height);
            self.needs_reconfigure = true;
            return Ok(());
        }
        self.reconfigure()
    }

    fn swapchain_extent(&self) -> (u32, u32) {
        self.device
            .as_ref()
            .map(|device| (device.surface_config.width, device.surface_config.height))
            .unwrap_or((0, 0))
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.device
            .as_ref()
            .map(|device| device.surface_format)
            .unwrap_or(TextureFormat::B8G8R8A8_SRGB)
    }

    fn swapchain_buffer_index(&self) -> u32 {
        self.last_image
    }

    /// wgpu hides the surface images; latency plus the one being drawn
    fn num_swapchain_buffers(&self) -> u32 {
        self.device
            .as_ref()
            .map(|device| device.surface_config.desired_maximum_frame_latency + 1)
            .unwrap_or(0)
    }

    fn stats(&self) -> RendererStats {
        let gpu_memory_used = self.device.as_ref().map(|device| device.ctx.memory_used()).unwrap_or(0);
        RendererStats {
            gpu_memory_used,
            ..self.stats
        }
    }

    fn shutdown(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        drop(self.acquired.take());
        self.in_flight = Default::default();

        if let Err(e) = device.ctx.wait_for(None) {
            engine_warn!(SOURCE, "Device poll at shutdown: {}", e);
        }
        device.targets.clear();
        lock(&device.samplers).clear();

        let DeviceObjects {
            ctx,
            targets,
            samplers,
            surface,
            ..
        } = device;
        drop(surface);
        drop(samplers);
        drop(targets);

        let alive = Arc::strong_count(&ctx) - 1;
        if alive > 0 {
            engine_error!(
                SOURCE,
                "{} GPU resource(s) still alive at shutdown; they keep the device alive",
                alive
            );
        } else {
            engine_info!(SOURCE, "wgpu backend shut down");
        }
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
