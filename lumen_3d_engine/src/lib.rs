/*!
# Lumen 3D Engine

Render resource and command-submission core of the Lumen 3D engine.

This crate provides the backend-agnostic API: resource handles, the frame
loop, the descriptor allocator and deferred destruction of GPU resources.
Backend implementations (Vulkan, wgpu) live in their own crates and are
handed to [`lumen3d::render::Renderer::new`] by the application.

## Architecture

- **Renderer**: explicit context driving one backend through the frame loop
- **RenderBackend**: what a graphics API implementation provides
- **Pwn / Ptr**: owning and borrowed handles to Geometry, Shader, Pipeline,
  Texture and CommandBuffer resources
- **Descriptors**: set layout declaration, pool sizing and set allocation
- **DestroyStaging**: frame-based deferred destruction token

```text
let mut renderer = Renderer::new(Box::new(backend))?;
renderer.begin_frame(true)?;
// record into renderer.command_buffer()
renderer.end_frame(true)?;
renderer.present()?;
```
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod renderer;

// Main lumen3d namespace module
pub mod lumen3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Global log sink
    pub use crate::engine::Engine;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
    }

    // Render sub-module with all rendering types
    pub mod render {
        pub use crate::renderer::*;
    }
}

// Re-export math library at crate root
pub use glam;
