//! Per-frame compositing, run on the foreground capture thread.

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::capture::{CaptureSession, FrameHandler};
use crate::context::SharedFrameContext;
use crate::frame::{Frame, Mask};
use crate::output::{rgb_to_i420, write_frame, OutputSink};

/// Alpha-blend `fg` over `bg` with per-pixel weights from `mask`.
///
/// `out = round(fg * w + bg * (1 - w))` for every channel, `w` clamped to
/// `[0, 1]`. All three inputs must share one geometry.
pub fn blend(fg: &Frame, bg: &Frame, mask: &Mask, out: &mut Frame) -> Result<()> {
    let dims = fg.dimensions();
    if bg.dimensions() != dims || mask.dimensions() != dims {
        return Err(anyhow!(
            "blend geometry mismatch: fg {:?}, bg {:?}, mask {:?}",
            dims,
            bg.dimensions(),
            mask.dimensions()
        ));
    }
    out.reshape(dims.0, dims.1);
    out.sequence = fg.sequence;
    let pixels = out
        .data_mut()
        .chunks_exact_mut(3)
        .zip(fg.data().chunks_exact(3))
        .zip(bg.data().chunks_exact(3))
        .zip(mask.values());
    for (((dst, f), b), &weight) in pixels {
        let w = weight.clamp(0.0, 1.0);
        let inv = 1.0 - w;
        for c in 0..3 {
            dst[c] = (f[c] as f32 * w + b[c] as f32 * inv).round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(())
}

/// Blends each captured frame against the background and writes it out.
///
/// Registered as the foreground session's `FrameHandler`. A sink failure is
/// recorded in the shared context, which ends the pipeline.
pub struct Compositor {
    context: Arc<SharedFrameContext>,
    background_session: Option<Arc<CaptureSession>>,
    sink: Box<dyn OutputSink>,
    background: Frame,
    mask: Mask,
    output: Frame,
    encoded: Vec<u8>,
}

impl Compositor {
    /// With `background_session` set, each frame pulls the newest background
    /// video frame; otherwise the context's still background is used.
    pub fn new(
        context: Arc<SharedFrameContext>,
        background_session: Option<Arc<CaptureSession>>,
        sink: Box<dyn OutputSink>,
    ) -> Self {
        let (width, height) = context.output_size();
        Self {
            context,
            background_session,
            sink,
            background: Frame::new(width, height),
            mask: Mask::new(width, height),
            output: Frame::new(width, height),
            encoded: Vec::new(),
        }
    }

    fn composite(&mut self, frame: &Frame) -> Result<()> {
        let (width, height) = self.context.output_size();
        let foreground = if frame.dimensions() == (width, height) {
            Cow::Borrowed(frame)
        } else {
            Cow::Owned(frame.resized(width, height))
        };

        let still;
        let background: &Frame = match &self.background_session {
            Some(session) => {
                // A stopped background session leaves the last frame in place.
                if session.pull_into(&mut self.background)
                    && self.background.dimensions() != (width, height)
                {
                    self.background = self.background.resized(width, height);
                }
                &self.background
            }
            None => {
                still = self
                    .context
                    .background()
                    .ok_or_else(|| anyhow!("no background installed"))?;
                &still
            }
        };

        self.context.read_mask_into(&mut self.mask);
        blend(&foreground, background, &self.mask, &mut self.output)?;
        rgb_to_i420(&self.output, &mut self.encoded)?;
        Ok(())
    }
}

impl FrameHandler for Compositor {
    fn handle(&mut self, frame: &Frame) -> Result<()> {
        self.composite(frame)?;
        if let Err(err) = write_frame(self.sink.as_mut(), &self.encoded) {
            log::error!("output sink failed: {:#}", err);
            let summary = format!("{:#}", err);
            self.context.record_failure(err);
            return Err(anyhow!(summary));
        }
        self.context.note_frame_written();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let mut frame = Frame::new(width, height);
        for px in frame.data_mut().chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
        frame
    }

    fn uniform_mask(width: u32, height: u32, weight: f32) -> Mask {
        let mut mask = Mask::new(width, height);
        mask.fill(weight);
        mask
    }

    #[test]
    fn full_weight_yields_foreground() -> Result<()> {
        let fg = solid(4, 4, [200, 17, 3]);
        let bg = solid(4, 4, [9, 99, 255]);
        let mut out = Frame::default();
        blend(&fg, &bg, &uniform_mask(4, 4, 1.0), &mut out)?;
        assert_eq!(out.data(), fg.data());
        Ok(())
    }

    #[test]
    fn zero_weight_yields_background() -> Result<()> {
        let fg = solid(4, 4, [200, 17, 3]);
        let bg = solid(4, 4, [9, 99, 255]);
        let mut out = Frame::default();
        blend(&fg, &bg, &uniform_mask(4, 4, 0.0), &mut out)?;
        assert_eq!(out.data(), bg.data());
        Ok(())
    }

    #[test]
    fn half_weight_yields_rounded_average() -> Result<()> {
        let fg = solid(2, 2, [200, 17, 3]);
        let bg = solid(2, 2, [9, 99, 255]);
        let mut out = Frame::default();
        blend(&fg, &bg, &uniform_mask(2, 2, 0.5), &mut out)?;
        // (200+9)/2 = 104.5, (17+99)/2 = 58, (3+255)/2 = 129
        for px in out.data().chunks_exact(3) {
            assert_eq!(px, [105, 58, 129]);
        }
        Ok(())
    }

    #[test]
    fn weight_is_per_pixel() -> Result<()> {
        let fg = solid(2, 1, [255, 255, 255]);
        let bg = solid(2, 1, [0, 0, 0]);
        let mask = Mask::from_values(2, 1, vec![1.0, 0.0])?;
        let mut out = Frame::default();
        blend(&fg, &bg, &mask, &mut out)?;
        assert_eq!(out.data(), &[255, 255, 255, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let mut out = Frame::default();
        let err = blend(
            &Frame::new(2, 2),
            &Frame::new(4, 4),
            &Mask::new(2, 2),
            &mut out,
        );
        assert!(err.is_err());
    }

    #[derive(Clone, Default)]
    struct SharedSink {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        broken: bool,
    }

    impl OutputSink for SharedSink {
        fn describe(&self) -> String {
            "shared".to_string()
        }

        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Ok(0);
            }
            self.frames
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(bytes.to_vec());
            Ok(bytes.len())
        }
    }

    #[test]
    fn compositor_writes_i420_of_blend() -> Result<()> {
        let context = Arc::new(SharedFrameContext::new(4, 2));
        context.replace_background(solid(8, 4, [50, 50, 50]));
        context.publish_mask(&uniform_mask(4, 2, 1.0))?;
        let sink = SharedSink::default();
        let mut compositor = Compositor::new(Arc::clone(&context), None, Box::new(sink.clone()));

        compositor.handle(&solid(4, 2, [200, 200, 200]))?;
        context.publish_mask(&Mask::new(4, 2))?;
        compositor.handle(&solid(4, 2, [200, 200, 200]))?;

        let frames = sink.frames.lock().map_err(|_| anyhow!("poisoned"))?;
        assert_eq!(frames.len(), 2);
        // Limited-range luma: 16 + 219 * v / 255.
        assert!(frames[0][..8].iter().all(|&y| y.abs_diff(188) <= 1));
        assert!(frames[1][..8].iter().all(|&y| y.abs_diff(59) <= 1));
        assert_eq!(context.frames_written(), 2);
        Ok(())
    }

    #[test]
    fn foreground_is_resized_to_output() -> Result<()> {
        let context = Arc::new(SharedFrameContext::new(4, 2));
        context.replace_background(solid(4, 2, [0, 0, 0]));
        context.publish_mask(&uniform_mask(4, 2, 1.0))?;
        let sink = SharedSink::default();
        let mut compositor = Compositor::new(Arc::clone(&context), None, Box::new(sink.clone()));
        compositor.handle(&solid(16, 8, [90, 90, 90]))?;
        let frames = sink.frames.lock().map_err(|_| anyhow!("poisoned"))?;
        assert_eq!(frames[0].len(), 12);
        assert!(frames[0][..8].iter().all(|&y| y.abs_diff(93) <= 1));
        Ok(())
    }

    #[test]
    fn sink_failure_is_recorded_and_stops_pipeline() {
        let context = Arc::new(SharedFrameContext::new(2, 2));
        context.replace_background(Frame::new(2, 2));
        let sink = SharedSink {
            broken: true,
            ..SharedSink::default()
        };
        let mut compositor = Compositor::new(Arc::clone(&context), None, Box::new(sink));
        assert!(compositor.handle(&Frame::new(2, 2)).is_err());
        assert!(context.should_stop());
        assert!(context.take_failure().is_some());
        assert_eq!(context.frames_written(), 0);
    }

    #[test]
    fn missing_background_fails_frame() {
        let context = Arc::new(SharedFrameContext::new(2, 2));
        let mut compositor =
            Compositor::new(Arc::clone(&context), None, Box::new(SharedSink::default()));
        assert!(compositor.handle(&Frame::new(2, 2)).is_err());
        assert!(!context.should_stop());
    }
}
