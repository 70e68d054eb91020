//! Paced capture sessions.
//!
//! A `CaptureSession` owns one capture backend and one dedicated thread that
//! grabs frames at the source's native rate. The newest complete frame sits in
//! a lock-protected slot pool; other threads copy it out with `pull`. A
//! registered `FrameHandler` runs on the capture thread, under the session
//! lock, once per retrieved frame.

pub mod pacing;
mod session;

use anyhow::Result;

use crate::frame::Frame;

pub use pacing::{frame_interval_ns, Deadline, Pacer};
pub use session::{CaptureSession, SessionInfo};

/// Per-frame callback run on a session's capture thread.
///
/// Invoked under the session lock, strictly in capture order, once per
/// successfully retrieved frame. An `Err` is treated like an end of stream:
/// the session rewinds its source and resets its frame counter.
pub trait FrameHandler: Send {
    fn handle(&mut self, frame: &Frame) -> Result<()>;
}

impl<F> FrameHandler for F
where
    F: FnMut(&Frame) -> Result<()> + Send,
{
    fn handle(&mut self, frame: &Frame) -> Result<()> {
        self(frame)
    }
}
