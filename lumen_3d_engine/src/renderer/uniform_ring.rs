/// Per-frame sub-allocation of a dynamic uniform buffer
///
/// One uniform buffer holds `RING_BUFFER_SIZE` regions of `capacity` aligned
/// entries. Each frame writes into its own region, so data still read by an
/// in-flight frame is never overwritten.

use crate::renderer::frame::{FrameCounter, RING_BUFFER_SIZE};

/// Round `value` up to a multiple of `alignment` (0 or 1 = no alignment)
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

#[derive(Debug, Clone)]
pub struct UniformRing {
    stride: u64,
    capacity: u32,
    cursor: u32,
    frame: Option<u64>,
    slot: usize,
    binding: bool,
}

impl UniformRing {
    /// `uniform_size` bytes per entry, rounded up to `min_alignment`
    pub fn new(uniform_size: u64, capacity: u32, min_alignment: u64) -> Self {
        Self {
            stride: align_up(uniform_size.max(1), min_alignment),
            capacity,
            cursor: 0,
            frame: None,
            slot: 0,
            binding: false,
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Size of the backing buffer (every slot)
    pub fn total_size(&self) -> u64 {
        self.stride * self.capacity as u64 * RING_BUFFER_SIZE as u64
    }

    /// Entries handed out in the current frame
    pub fn used(&self) -> u32 {
        self.cursor
    }

    /// Open the writing window; the cursor restarts on a new frame
    pub fn begin(&mut self, frames: &FrameCounter) {
        let frame = frames.frame_count();
        if self.frame != Some(frame) {
            self.frame = Some(frame);
            self.slot = frames.ring_buffer_index();
            self.cursor = 0;
        }
        self.binding = true;
    }

    pub fn end(&mut self) {
        self.binding = false;
    }

    pub fn is_binding(&self) -> bool {
        self.binding
    }

    /// Byte offset of the next free entry, `None` once this frame's region is full
    ///
    /// # Panics
    ///
    /// Outside `begin`/`end`, or when the offset does not fit the 32-bit
    /// dynamic offset of a bind call.
    pub fn next_offset(&mut self) -> Option<u32> {
        assert!(self.binding, "uniform data bound before begin_bind_descriptors");
        if self.cursor >= self.capacity {
            return None;
        }
        let index = self.slot as u64 * self.capacity as u64 + self.cursor as u64;
        let offset = index * self.stride;
        let Ok(offset) = u32::try_from(offset) else {
            panic!("uniform ring offset {} exceeds the 32-bit dynamic offset range", offset);
        };
        self.cursor += 1;
        Some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(100, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 64), 320);
        assert_eq!(align_up(12, 0), 12);
    }

    #[test]
    fn test_offsets_stay_in_frame_region() {
        let frames = FrameCounter::new();
        frames.set(4);
        let mut ring = UniformRing::new(64, 2, 256);

        ring.begin(&frames);
        assert_eq!(ring.next_offset(), Some(2 * 256));
        assert_eq!(ring.next_offset(), Some(3 * 256));
        assert_eq!(ring.next_offset(), None);
        ring.end();

        assert_eq!(ring.total_size(), 256 * 2 * RING_BUFFER_SIZE as u64);
    }

    #[test]
    fn test_cursor_resets_on_new_frame_only() {
        let frames = FrameCounter::new();
        let mut ring = UniformRing::new(16, 4, 16);

        ring.begin(&frames);
        ring.next_offset();
        ring.end();
        ring.begin(&frames);
        assert_eq!(ring.used(), 1);
        ring.end();

        frames.advance();
        ring.begin(&frames);
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.next_offset(), Some(4 * 16));
    }

    #[test]
    #[should_panic(expected = "before begin_bind_descriptors")]
    fn test_offset_outside_window_panics() {
        let mut ring = UniformRing::new(16, 4, 16);
        ring.next_offset();
    }

    #[test]
    #[should_panic(expected = "32-bit dynamic offset range")]
    fn test_offset_past_u32_panics_instead_of_wrapping() {
        let frames = FrameCounter::new();
        frames.set(1);
        let mut ring = UniformRing::new(1 << 31, 2, 1);

        ring.begin(&frames);
        // slot 1, entry 0 -> index 2 -> 2^32
        ring.next_offset();
    }

    #[test]
    fn test_last_offset_below_u32_max_is_returned() {
        let frames = FrameCounter::new();
        let mut ring = UniformRing::new(1 << 31, 2, 1);

        ring.begin(&frames);
        assert_eq!(ring.next_offset(), Some(0));
        assert_eq!(ring.next_offset(), Some(1 << 31));
        assert_eq!(ring.next_offset(), None);
    }
}
