//! Deferred destruction of GPU resources
//!
//! A [`DestroyStaging`] token records the earliest frame at which a resource
//! can no longer be referenced by in-flight GPU work. The owner polls
//! [`DestroyStaging::is_allowed`] and frees the resource the one time it
//! returns `true`.

use rand::Rng;

use crate::renderer::frame::{FrameCounter, RING_BUFFER_SIZE};

/// Upper bound (inclusive) of the random delay added by [`DestroyStaging::schedule`]
pub const MAX_JITTER: u64 = 0xFF;

/// Single-shot deferred-destruction token
///
/// - `None`: nothing scheduled
/// - `Some(0)`: destructible immediately
/// - `Some(f)`: destructible once the frame count reaches `f`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyStaging {
    frame: Option<u64>,
}

impl DestroyStaging {
    pub fn new() -> Self {
        Self { frame: None }
    }

    /// Schedule destruction at `frame + RING_BUFFER_SIZE + jitter`, jitter random in `0..=255`.
    ///
    /// The jitter spreads frees of resources scheduled in the same frame.
    pub fn schedule(&mut self, frames: &FrameCounter) {
        let jitter = rand::thread_rng().gen_range(0..=MAX_JITTER);
        self.schedule_with_jitter(frames, jitter);
    }

    /// Same as [`schedule`](Self::schedule) with a caller-chosen delay.
    ///
    /// An already scheduled token keeps the later of both frames.
    pub fn schedule_with_jitter(&mut self, frames: &FrameCounter, jitter: u64) {
        let target = frames.frame_count() + RING_BUFFER_SIZE as u64 + jitter;
        self.frame = Some(match self.frame {
            Some(current) => current.max(target),
            None => target,
        });
    }

    /// Mark the resource destructible right away (it was never submitted, or
    /// the queue has already been waited on)
    pub fn allow(&mut self) {
        self.frame = Some(0);
    }

    /// `true` exactly once when the scheduled frame has been reached, then the
    /// token returns to "nothing scheduled"
    pub fn is_allowed(&mut self, frames: &FrameCounter) -> bool {
        match self.frame {
            Some(frame) if frames.frame_count() >= frame => {
                self.frame = None;
                true
            }
            _ => false,
        }
    }

    /// Whether something is scheduled (including "allowed now")
    pub fn is_scheduled(&self) -> bool {
        self.frame.is_some()
    }

    /// Scheduled frame, if any
    pub fn scheduled_frame(&self) -> Option<u64> {
        self.frame
    }
}

/// Staging objects released together through one [`DestroyStaging`] token
///
/// Backends push the upload buffers of a geometry or texture here; the whole
/// batch becomes free once the latest push is out of reach of the GPU.
#[derive(Debug)]
pub struct StagingQueue<T> {
    items: Vec<T>,
    token: DestroyStaging,
}

impl<T> Default for StagingQueue<T> {
    fn default() -> Self {
        Self { items: Vec::new(), token: DestroyStaging::new() }
    }
}

impl<T> StagingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `item` alive until the ring has moved past the current frame
    pub fn push(&mut self, item: T, frames: &FrameCounter) {
        self.items.push(item);
        self.token.schedule(frames);
    }

    /// Keep `item` until the next poll (its upload was already waited on)
    pub fn push_completed(&mut self, item: T) {
        self.items.push(item);
        if !self.token.is_scheduled() {
            self.token.allow();
        }
    }

    /// Items that may be destroyed now; empty until the token fires
    pub fn take_allowed(&mut self, frames: &FrameCounter) -> Vec<T> {
        if self.token.is_allowed(frames) {
            std::mem::take(&mut self.items)
        } else {
            Vec::new()
        }
    }

    /// Everything, regardless of the token (teardown after wait idle)
    pub fn drain_all(&mut self) -> Vec<T> {
        self.token = DestroyStaging::new();
        std::mem::take(&mut self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
#[path = "destroy_staging_tests.rs"]
mod tests;
