//! State shared between the analysis loop and the compositor.
//!
//! The context lock is distinct from every capture session lock. Masks move
//! in and out by copy under the lock, so a reader never observes a partially
//! written mask. The lock is only ever held for those bounded copies.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Error, Result};

use crate::frame::{Frame, Mask};

struct ContextState {
    mask: Mask,
    background: Option<Arc<Frame>>,
    failure: Option<Error>,
}

pub struct SharedFrameContext {
    width: u32,
    height: u32,
    state: Mutex<ContextState>,
    terminate: AtomicBool,
    mask_updates: AtomicU64,
    frames_written: AtomicU64,
}

impl SharedFrameContext {
    /// Context for `width`x`height` output, starting with an all-background mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            state: Mutex::new(ContextState {
                mask: Mask::new(width, height),
                background: None,
                failure: None,
            }),
            terminate: AtomicBool::new(false),
            mask_updates: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Replace the current mask with a copy of `mask`.
    pub fn publish_mask(&self, mask: &Mask) -> Result<()> {
        if mask.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "mask {}x{} does not match output {}x{}",
                mask.width(),
                mask.height(),
                self.width,
                self.height
            ));
        }
        self.lock().mask.copy_from(mask);
        self.mask_updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Copy the current mask into `out`.
    pub fn read_mask_into(&self, out: &mut Mask) {
        out.copy_from(&self.lock().mask);
    }

    pub fn mask_updates(&self) -> u64 {
        self.mask_updates.load(Ordering::Relaxed)
    }

    /// Current still background, if one is installed.
    pub fn background(&self) -> Option<Arc<Frame>> {
        self.lock().background.clone()
    }

    /// Install a still background, resized to output geometry.
    pub fn replace_background(&self, frame: Frame) {
        let frame = if frame.dimensions() == (self.width, self.height) {
            frame
        } else {
            frame.resized(self.width, self.height)
        };
        self.lock().background = Some(Arc::new(frame));
    }

    pub fn request_stop(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Record a pipeline-fatal failure and request termination.
    ///
    /// Only the first failure is kept.
    pub fn record_failure(&self, err: Error) {
        {
            let mut state = self.lock();
            if state.failure.is_none() {
                state.failure = Some(err);
            }
        }
        self.request_stop();
    }

    pub fn take_failure(&self) -> Option<Error> {
        self.lock().failure.take()
    }

    pub(crate) fn note_frame_written(&self) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }
}
