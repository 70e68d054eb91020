use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{RawSignal, SignalKind};
use crate::frame::Frame;

/// Model-free backend: brightness as foreground score.
///
/// Useful for wiring checks and tests; a bright subject in front of a dark
/// wall segments passably.
pub struct StubBackend {
    size: u32,
}

impl StubBackend {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(64)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn signal_kind(&self) -> SignalKind {
        SignalKind::BoundedScore
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        Some((self.size, self.size))
    }

    fn infer(&mut self, frame: &Frame) -> Result<RawSignal> {
        if frame.dimensions() != (self.size, self.size) {
            return Err(anyhow!(
                "frame size {}x{} does not match stub input {}x{}",
                frame.width(),
                frame.height(),
                self.size,
                self.size
            ));
        }
        let scores = frame
            .data()
            .chunks_exact(3)
            .map(|px| {
                (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) / 255.0
            })
            .collect();
        Ok(RawSignal::BoundedScores {
            width: self.size,
            height: self.size,
            scores,
        })
    }
}
