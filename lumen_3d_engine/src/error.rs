//! Error types for the Lumen3D engine
//!
//! Recoverable failures of the rendering core: backend object creation,
//! descriptor pool exhaustion, fence waits and device loss. Contract
//! violations (double init, nested builders, binding before begin) are not
//! represented here, they panic.

use std::fmt;

/// Result type for Lumen3D engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Lumen3D engine errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Backend-specific error (Vulkan, wgpu)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (texture, geometry, shader, descriptor set, ...)
    InvalidResource(String),

    /// Initialization failed (renderer, backend, descriptor pools)
    InitializationFailed(String),

    /// A descriptor pool has no room left for the requested set
    PoolExhausted(String),

    /// A fence or queue wait did not complete
    Timeout(String),

    /// The device was lost, nothing submitted afterwards will execute
    DeviceLost(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::PoolExhausted(msg) => write!(f, "Descriptor pool exhausted: {}", msg),
            Error::Timeout(msg) => write!(f, "Wait timed out: {}", msg),
            Error::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
