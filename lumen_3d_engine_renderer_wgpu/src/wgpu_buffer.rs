/// GpuBuffer - wgpu buffer accounted in the context's memory counter

use lumen_3d_engine::lumen3d::Result;
use std::sync::Arc;

use crate::wgpu_context::WgpuContext;

/// Copies and queue writes must be multiples of this
pub(crate) const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

pub(crate) fn align_copy_size(size: u64) -> u64 {
    size.div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT
}

/// `data` zero-padded to the copy alignment
pub(crate) fn padded(data: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    let size = align_copy_size(data.len() as u64) as usize;
    if size == data.len() {
        std::borrow::Cow::Borrowed(data)
    } else {
        let mut bytes = data.to_vec();
        bytes.resize(size, 0);
        std::borrow::Cow::Owned(bytes)
    }
}

/// Buffer whose size is released from the memory counter on drop
///
/// Dropping only drops this handle; wgpu keeps the memory alive while a
/// submitted command still references it.
pub struct GpuBuffer {
    ctx: Arc<WgpuContext>,
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) size: u64,
}

impl GpuBuffer {
    /// Create a zeroed buffer of at least `size` bytes
    pub fn new(ctx: Arc<WgpuContext>, label: &str, size: u64, usage: wgpu::BufferUsages) -> Result<Self> {
        let aligned = align_copy_size(size.max(1));
        let buffer = ctx.scoped(label, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: aligned,
                usage,
                mapped_at_creation: false,
            })
        })?;
        ctx.track_alloc(aligned);
        Ok(Self { ctx, buffer, size })
    }

    /// COPY_SRC buffer holding `data`
    pub fn staging(ctx: Arc<WgpuContext>, label: &str, data: &[u8]) -> Result<Self> {
        let bytes = padded(data);
        let buffer = ctx.scoped(label, |device| {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: (bytes.len() as u64).max(COPY_ALIGNMENT),
                usage: wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: true,
            });
            if !bytes.is_empty() {
                buffer.slice(..bytes.len() as u64).get_mapped_range_mut().copy_from_slice(&bytes);
            }
            buffer.unmap();
            buffer
        })?;
        let size = buffer.size();
        ctx.track_alloc(size);
        Ok(Self { ctx, buffer, size })
    }

    /// Queue a write at `offset`; it lands before the next submission executes
    pub fn write(&self, offset: u64, data: &[u8]) {
        self.ctx.queue.write_buffer(&self.buffer, offset, &padded(data));
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.ctx.track_free(align_copy_size(self.size.max(1)));
    }
}
