/// Renderer module - frame loop, resource handles and the backend-facing traits

// Module declarations
pub mod backend;
pub mod command_buffer;
pub mod config;
pub mod descriptors;
pub mod destroy_staging;
pub mod frame;
pub mod geometry;
pub mod handle;
pub mod pipeline;
pub mod render_pass;
pub mod renderer;
pub mod scheduled;
pub mod shader;
pub mod swapchain;
pub mod texture;
pub mod uniform_ring;

#[cfg(test)]
pub(crate) mod mock_renderer;

// Re-export everything from renderer.rs
pub use renderer::*;

// Re-export from other modules
pub use backend::*;
pub use command_buffer::*;
pub use config::*;
pub use descriptors::*;
pub use destroy_staging::*;
pub use frame::*;
pub use geometry::*;
pub use handle::*;
pub use pipeline::*;
pub use render_pass::*;
pub use scheduled::*;
pub use shader::*;
pub use swapchain::*;
pub use texture::*;
pub use uniform_ring::*;
