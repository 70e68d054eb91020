//! Analysis loop and pipeline lifecycle.
//!
//! Threads:
//! - foreground capture: paces the camera and composites every frame
//! - background capture (video backgrounds only)
//! - the caller's thread: runs `Pipeline::run`, which pulls the newest
//!   foreground frame, runs the detector and publishes refined masks
//!
//! The compositor tolerates an arbitrarily stale mask, so the two loops run
//! at independent rates.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::capture::CaptureSession;
use crate::composite::Compositor;
use crate::config::BackdropConfig;
use crate::context::SharedFrameContext;
use crate::detect::DetectorBackend;
use crate::frame::{Frame, Mask, Roi};
use crate::ingest::CaptureHints;
use crate::mask::MaskRefiner;
use crate::output::OutputSink;

const STILL_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Whether `source` names a still image rather than a video source.
pub fn is_still_image(source: &str) -> bool {
    Path::new(source)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            STILL_EXTENSIONS
                .iter()
                .any(|still| ext.eq_ignore_ascii_case(still))
        })
}

/// Decode a still background image into an RGB frame.
pub fn load_still_background(path: &str) -> Result<Frame> {
    let image = image::open(path).with_context(|| format!("load background image {}", path))?;
    Ok(Frame::from_image(image.to_rgb8()))
}

/// Counters for rate telemetry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Foreground frames since the last capture reset.
    pub captured: u64,
    /// Background frames since the last reset (0 for stills).
    pub background: u64,
    /// Frames composited and written to the sink.
    pub written: u64,
    /// Masks published by the analysis loop.
    pub mask_updates: u64,
    /// Analysis iterations skipped because detection failed.
    pub detector_failures: u64,
}

pub struct Pipeline {
    foreground: CaptureSession,
    background: Option<Arc<CaptureSession>>,
    context: Arc<SharedFrameContext>,
    detector: Box<dyn DetectorBackend>,
    refiner: MaskRefiner,
    roi: Roi,
    frame: Frame,
    mask: Mask,
    detector_failures: u64,
    started: Instant,
    last_report: Instant,
    telemetry_interval: std::time::Duration,
}

impl Pipeline {
    /// Open all sources and start compositing into `sink`.
    ///
    /// Compositing begins as soon as the first foreground frame arrives,
    /// against an all-background mask until the first analysis iteration.
    pub fn start(
        config: &BackdropConfig,
        sink: Box<dyn OutputSink>,
        detector: Box<dyn DetectorBackend>,
    ) -> Result<Self> {
        let (width, height) = (config.output.width, config.output.height);
        let context = Arc::new(SharedFrameContext::new(width, height));
        let refiner = MaskRefiner::new(&config.detector, &config.refine)?;

        let background = if is_still_image(&config.background) {
            context.replace_background(load_still_background(&config.background)?);
            log::info!("background: still image {}", config.background);
            None
        } else {
            let session = CaptureSession::open(&config.background, CaptureHints::new(width, height))
                .with_context(|| format!("open background source {}", config.background))?;
            log::info!(
                "background: video {} ({}x{} @ {} fps)",
                config.background,
                session.width(),
                session.height(),
                session.rate()
            );
            Some(Arc::new(session))
        };

        let hints = CaptureHints {
            fps: config.capture.fps,
            ..CaptureHints::new(config.capture.width, config.capture.height)
        };
        let foreground = CaptureSession::open(&config.capture.source, hints)
            .with_context(|| format!("open capture source {}", config.capture.source))?;

        log::info!(
            "compositing {} onto {} -> {} ({}x{})",
            config.capture.source,
            config.background,
            sink.describe(),
            width,
            height
        );
        foreground.set_handler(Compositor::new(
            Arc::clone(&context),
            background.clone(),
            sink,
        ));

        let roi = match detector.input_size() {
            Some(_) => Roi::centered_square(width, height),
            None => Roi::full(width, height),
        };
        let now = Instant::now();
        Ok(Self {
            foreground,
            background,
            context,
            detector,
            refiner,
            roi,
            frame: Frame::default(),
            mask: Mask::new(width, height),
            detector_failures: 0,
            started: now,
            last_report: now,
            telemetry_interval: config.telemetry_interval,
        })
    }

    /// Handle for requesting termination from other threads.
    pub fn context(&self) -> Arc<SharedFrameContext> {
        Arc::clone(&self.context)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            captured: self.foreground.frame_count(),
            background: self
                .background
                .as_ref()
                .map_or(0, |session| session.frame_count()),
            written: self.context.frames_written(),
            mask_updates: self.context.mask_updates(),
            detector_failures: self.detector_failures,
        }
    }

    /// One analysis iteration: pull, detect, refine, publish.
    ///
    /// Detection and refinement failures skip the update and keep the
    /// previous mask live. Returns false once the foreground has stopped.
    pub fn step(&mut self) -> Result<bool> {
        if !self.foreground.pull_into(&mut self.frame) {
            return Ok(false);
        }
        let (width, height) = self.context.output_size();
        if self.frame.dimensions() != (width, height) {
            self.frame = self.frame.resized(width, height);
        }

        let input = match self.detector.input_size() {
            Some((w, h)) => self.frame.crop(self.roi)?.resized(w, h),
            None => self.frame.clone(),
        };
        let signal = match self.detector.infer(&input) {
            Ok(signal) => signal,
            Err(err) => {
                self.detector_failures += 1;
                log::warn!("{} detection failed: {:#}", self.detector.name(), err);
                return Ok(true);
            }
        };
        if let Err(err) = self.refiner.refine_into(&signal, self.roi, &mut self.mask) {
            self.detector_failures += 1;
            log::warn!("mask refinement failed: {:#}", err);
            return Ok(true);
        }
        self.context.publish_mask(&self.mask)?;
        Ok(true)
    }

    /// Run until termination is requested or the sink fails.
    ///
    /// Stops the foreground session before the background session and
    /// returns the recorded sink failure, if any.
    pub fn run(mut self) -> Result<()> {
        while !self.context.should_stop() {
            match self.step() {
                Ok(true) => self.report(),
                Ok(false) => break,
                Err(err) => {
                    self.shutdown();
                    return Err(err);
                }
            }
        }
        self.shutdown();
        match self.context.take_failure() {
            Some(err) => Err(err.context("output sink failed")),
            None => Ok(()),
        }
    }

    fn report(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_report) < self.telemetry_interval {
            return;
        }
        self.last_report = now;
        let elapsed = now.duration_since(self.started).as_secs_f64().max(1e-3);
        let stats = self.stats();
        log::info!(
            "capture={} ({:.1}/s) background={} written={} masks={} ({:.1}/s) detector_failures={}",
            stats.captured,
            stats.captured as f64 / elapsed,
            stats.background,
            stats.written,
            stats.mask_updates,
            stats.mask_updates as f64 / elapsed,
            stats.detector_failures
        );
    }

    /// Stop capture threads, foreground first.
    pub fn shutdown(&self) {
        self.context.request_stop();
        self.foreground.stop();
        if let Some(background) = &self.background {
            background.stop();
        }
        let stats = self.stats();
        log::info!(
            "pipeline stopped: {} frames written, {} masks published",
            stats.written,
            stats.mask_updates
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn still_images_are_detected_by_extension() {
        assert!(is_still_image("background.png"));
        assert!(is_still_image("/tmp/beach.JPG"));
        assert!(is_still_image("b.jpeg"));
        assert!(!is_still_image("loop.mp4"));
        assert!(!is_still_image("/dev/video2"));
        assert!(!is_still_image("stub://bg?width=64&height=48"));
    }

    #[test]
    fn missing_still_background_is_an_error() {
        assert!(load_still_background("/nonexistent/background.png").is_err());
    }

    #[test]
    fn still_background_decodes_to_rgb() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bg.png");
        let image = image::RgbImage::from_pixel(6, 4, image::Rgb([10, 20, 30]));
        image.save(&path)?;
        let frame = load_still_background(&path.to_string_lossy())?;
        assert_eq!(frame.dimensions(), (6, 4));
        assert_eq!(frame.pixel(5, 3), [10, 20, 30]);
        Ok(())
    }
}
