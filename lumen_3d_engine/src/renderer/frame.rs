/// Frame counter, ring buffer depth and frame-loop states

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of frames the host may record ahead of the GPU.
///
/// Every per-frame resource (fences, semaphores, command pools, uniform ring
/// regions) exists once per slot; slot = frame count mod this value.
pub const RING_BUFFER_SIZE: usize = 3;

/// Monotonic count of presented frames.
///
/// Written only by the presenting thread (through the renderer), read from
/// anywhere with relaxed loads for scheduling decisions.
#[derive(Debug, Default)]
pub struct FrameCounter {
    frame: AtomicU64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self { frame: AtomicU64::new(0) }
    }

    /// Number of frames presented so far
    pub fn frame_count(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    /// Ring-buffer slot used by the frame currently being recorded
    pub fn ring_buffer_index(&self) -> usize {
        (self.frame_count() % RING_BUFFER_SIZE as u64) as usize
    }

    pub(crate) fn advance(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[cfg(test)]
    pub(crate) fn set(&self, frame: u64) {
        self.frame.store(frame, Ordering::Relaxed);
    }
}

/// Frame-loop state machine
///
/// `Uninitialized -> Initialized -> {Recording -> Submitted -> Presented}* -> Shutdown`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Uninitialized,
    Initialized,
    Recording,
    Submitted,
    Presented,
    Shutdown,
}

impl FrameState {
    /// A new frame may begin from this state
    pub fn can_begin_frame(self) -> bool {
        matches!(self, FrameState::Initialized | FrameState::Presented)
    }
}
