/*!
# Lumen 3D Engine - wgpu Backend

Portable implementation of the `RenderBackend` trait of `lumen_3d_engine`
on top of wgpu. Shaders are WGSL, or SPIR-V through naga's front end.

```no_run
use lumen_3d_engine::lumen3d::render::{Config, Renderer};
use lumen_3d_engine_renderer_wgpu::WgpuBackend;
# fn run(window: &winit::window::Window) -> lumen_3d_engine::lumen3d::Result<()> {
let backend = WgpuBackend::new(window, &Config::default())?;
let mut renderer = Renderer::new(Box::new(backend))?;
# Ok(())
# }
```
*/

mod wgpu_backend;
mod wgpu_buffer;
mod wgpu_command_buffer;
mod wgpu_context;
mod wgpu_descriptors;
mod wgpu_format;
mod wgpu_geometry;
mod wgpu_pipeline;
mod wgpu_render_pass;
mod wgpu_sampler;
mod wgpu_shader;
mod wgpu_texture;

pub use wgpu_backend::WgpuBackend;
