/*!
# Lumen 3D Engine - Vulkan Backend

Vulkan implementation of the `RenderBackend` trait of `lumen_3d_engine`,
built on ash for the bindings and gpu-allocator for memory.

```no_run
use lumen_3d_engine::lumen3d::render::{Config, Renderer};
use lumen_3d_engine_renderer_vulkan::VulkanBackend;
# fn run(window: &winit::window::Window) -> lumen_3d_engine::lumen3d::Result<()> {
let backend = VulkanBackend::new(window, &Config::default())?;
let mut renderer = Renderer::new(Box::new(backend))?;
# Ok(())
# }
```
*/

mod debug;
mod vulkan;
mod vulkan_buffer;
mod vulkan_command_buffer;
mod vulkan_context;
mod vulkan_descriptors;
mod vulkan_format;
mod vulkan_geometry;
mod vulkan_pipeline;
mod vulkan_render_pass;
mod vulkan_sampler;
mod vulkan_shader;
mod vulkan_swapchain;
mod vulkan_texture;

pub use vulkan::VulkanBackend;

// Validation layer reporting
pub use debug::{get_validation_stats, print_validation_stats_report};
