//! Frame-scheduled callbacks
//!
//! Objects that need to run some work once enough frames have passed (staging
//! cleanup, delayed mip generation, ...) implement [`Scheduled`], keep a
//! [`ScheduledToken`], and register with the renderer. The renderer polls the
//! registered objects after every present.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, Weak};

use rand::Rng;

use crate::renderer::frame::{FrameCounter, RING_BUFFER_SIZE};
use crate::renderer::destroy_staging::MAX_JITTER;

/// Work polled once per presented frame
pub trait Scheduled: Send {
    /// Return `ControlFlow::Break(())` to be removed from the renderer's list.
    fn update(&mut self, frames: &FrameCounter) -> ControlFlow<()>;
}

/// Target frame of a scheduled object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduledToken {
    frame: Option<u64>,
}

impl ScheduledToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target `frame + RING_BUFFER_SIZE + delay`; a `None` delay picks a random one in `0..=255`.
    /// Keeps the later target when already scheduled.
    pub fn schedule(&mut self, frames: &FrameCounter, delay: Option<u64>) {
        let add = delay.unwrap_or_else(|| rand::thread_rng().gen_range(0..=MAX_JITTER));
        let target = frames.frame_count() + RING_BUFFER_SIZE as u64 + add;
        self.frame = Some(self.frame.map_or(target, |current| current.max(target)));
    }

    /// Make the next poll fire regardless of the frame count
    pub fn force(&mut self) {
        self.frame = Some(0);
    }

    pub fn unschedule(&mut self) {
        self.frame = None;
    }

    pub fn is_scheduled(&self) -> bool {
        self.frame.is_some()
    }

    /// Single-shot: `true` once the target frame is reached, then unscheduled
    pub fn is_scheduled_allowed(&mut self, frames: &FrameCounter) -> bool {
        match self.frame {
            Some(frame) if frames.frame_count() >= frame => {
                self.frame = None;
                true
            }
            _ => false,
        }
    }
}

/// Registered scheduled objects, held weakly
#[derive(Default)]
pub struct ScheduledList {
    entries: Vec<Weak<Mutex<dyn Scheduled>>>,
}

impl ScheduledList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `object`; registering the same object twice is a no-op
    pub fn register(&mut self, object: &Arc<Mutex<dyn Scheduled>>) {
        let weak = Arc::downgrade(object);
        if !self.entries.iter().any(|e| Weak::ptr_eq(e, &weak)) {
            self.entries.push(weak);
        }
    }

    pub fn unregister(&mut self, object: &Arc<Mutex<dyn Scheduled>>) {
        let weak = Arc::downgrade(object);
        self.entries.retain(|e| !Weak::ptr_eq(e, &weak));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Poll every live object, dropping dead ones and those that return `Break`
    pub fn update_all(&mut self, frames: &FrameCounter) {
        self.entries.retain(|entry| {
            let Some(object) = entry.upgrade() else {
                return false;
            };
            let flow = match object.lock() {
                Ok(mut guard) => guard.update(frames),
                Err(_) => ControlFlow::Break(()),
            };
            flow.is_continue()
        });
    }
}

#[cfg(test)]
#[path = "scheduled_tests.rs"]
mod tests;
