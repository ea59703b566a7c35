/// Geometry trait and vertex layout types

use std::any::Any;

use crate::error::Result;
use crate::renderer::command_buffer::CommandBuffer;
use crate::renderer::frame::FrameCounter;

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum VertexFormat {
    R32_SFLOAT,
    R32G32_SFLOAT,
    R32G32B32_SFLOAT,
    R32G32B32A32_SFLOAT,
    R32_UINT,
    R32G32_UINT,
    R16G16_SINT,
    R16G16B16A16_SINT,
    R8G8B8A8_UNORM,
    R8G8B8A8_UINT,
}

impl VertexFormat {
    pub fn size_bytes(self) -> u32 {
        match self {
            VertexFormat::R32_SFLOAT | VertexFormat::R32_UINT => 4,
            VertexFormat::R32G32_SFLOAT | VertexFormat::R32G32_UINT => 8,
            VertexFormat::R32G32B32_SFLOAT => 12,
            VertexFormat::R32G32B32A32_SFLOAT => 16,
            VertexFormat::R16G16_SINT => 4,
            VertexFormat::R16G16B16A16_SINT => 8,
            VertexFormat::R8G8B8A8_UNORM | VertexFormat::R8G8B8A8_UINT => 4,
        }
    }
}

/// Vertex input rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    /// Offset in bytes from the start of the element
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

/// Vertex input layout shared by a geometry and the pipelines drawing it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Bitmask of the bindings stepped per instance
    pub fn instance_mask(&self) -> u32 {
        self.bindings
            .iter()
            .filter(|b| b.input_rate == VertexInputRate::Instance)
            .fold(0, |mask, b| mask | (1 << b.binding))
    }

    pub fn binding(&self, binding: u32) -> Option<&VertexBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    /// Bindings whose bit is set in `filter`, in declaration order
    pub fn filtered(&self, filter: u32) -> impl Iterator<Item = &VertexBinding> {
        self.bindings.iter().filter(move |b| b.binding < 32 && filter & (1 << b.binding) != 0)
    }
}

/// Index buffer element type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size_bytes(self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Every vertex binding
pub const ALL_BINDINGS: u32 = u32::MAX;

#[derive(Debug, Clone, Default)]
pub struct GeometryDesc {
    pub layout: VertexLayout,
    pub index_32bit: bool,
    /// Host-visible buffers rewritten often; no staging copy
    pub dynamic: bool,
}

impl GeometryDesc {
    pub fn index_type(&self) -> IndexType {
        if self.index_32bit { IndexType::U32 } else { IndexType::U16 }
    }
}

/// Geometry resource trait
///
/// Vertex buffers are created per binding, then filled with `update_*`.
/// Static geometry uploads through staging buffers that are released once
/// the copy can no longer be in flight.
pub trait Geometry: Send + Sync {
    fn layout(&self) -> &VertexLayout;

    /// Allocate room for `count` elements of `binding`'s stride
    fn create_vertex_buffer(&self, count: u32, binding: u32) -> Result<()>;

    /// Replace the content of `binding`'s buffer
    ///
    /// # Arguments
    ///
    /// * `data` - Raw vertex bytes, at most `count * stride`
    /// * `binding` - Vertex binding to update
    /// * `cmd` - Record the copy here; `None` uses a one-time submit
    fn update_vertex_buffer(
        &self,
        data: &[u8],
        binding: u32,
        cmd: Option<&mut dyn CommandBuffer>,
    ) -> Result<()>;

    fn create_index_buffer(&self, count: u32) -> Result<()>;

    fn update_index_buffer(&self, data: &[u8], cmd: Option<&mut dyn CommandBuffer>) -> Result<()>;

    /// Free staging buffers whose frame has passed
    fn destroy_staging_buffers(&self, frames: &FrameCounter);

    fn has_32bit_indices(&self) -> bool;

    /// Elements in the index buffer (0 without one)
    fn index_count(&self) -> u32;

    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> VertexLayout {
        VertexLayout {
            bindings: vec![
                VertexBinding { binding: 0, stride: 20, input_rate: VertexInputRate::Vertex },
                VertexBinding { binding: 2, stride: 64, input_rate: VertexInputRate::Instance },
            ],
            attributes: vec![
                VertexAttribute { location: 0, binding: 0, format: VertexFormat::R32G32B32_SFLOAT, offset: 0 },
                VertexAttribute { location: 1, binding: 0, format: VertexFormat::R32G32_SFLOAT, offset: 12 },
            ],
        }
    }

    #[test]
    fn test_instance_mask() {
        assert_eq!(layout().instance_mask(), 0b100);
    }

    #[test]
    fn test_filtered_bindings() {
        let layout = layout();
        let all: Vec<u32> = layout.filtered(ALL_BINDINGS).map(|b| b.binding).collect();
        let per_instance: Vec<u32> = layout.filtered(0b100).map(|b| b.binding).collect();

        assert_eq!(all, vec![0, 2]);
        assert_eq!(per_instance, vec![2]);
        assert_eq!(layout.filtered(0b010).count(), 0);
    }

    #[test]
    fn test_index_type_from_desc() {
        let desc = GeometryDesc { index_32bit: true, ..Default::default() };
        assert_eq!(desc.index_type(), IndexType::U32);
        assert_eq!(GeometryDesc::default().index_type().size_bytes(), 2);
    }
}
