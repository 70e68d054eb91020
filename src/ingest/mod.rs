//! Capture backends.
//!
//! A backend wraps one physical or file source and exposes the primitive
//! operations a capture session drives from its own thread:
//! - `grab`: advance to the next frame without decoding it
//! - `retrieve`: decode the grabbed frame into a caller-owned RGB buffer
//! - `seek_to_start`: rewind finite sources so they loop
//! - `native_rate`: frames per second reported by the source (may be invalid)
//!
//! Sources are selected by name:
//! - `stub://...` synthetic frames (tests, demos)
//! - `/dev/video*` V4L2 devices (feature: ingest-v4l2)
//! - anything else is a file or URL (feature: ingest-ffmpeg)
//!
//! Backends are created on the capture thread and never cross threads, so
//! they do not need to be `Send`.

#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Frame rate used when a source reports none (or nonsense).
pub const DEFAULT_RATE: u32 = 30;

/// Geometry and rate requested from a source.
///
/// Device sources try to honour these exactly; file and URL sources keep
/// their own geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureHints {
    pub width: u32,
    pub height: u32,
    pub fps: Option<u32>,
}

impl CaptureHints {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fps: None,
        }
    }
}

/// The capture collaborator contract.
pub trait CaptureBackend {
    /// Human-readable source name for logs.
    fn describe(&self) -> String;

    /// Geometry of retrieved frames.
    fn geometry(&self) -> (u32, u32);

    /// Frames per second as reported by the source. May be zero, negative or NaN.
    fn native_rate(&self) -> f64;

    /// Advance to the next frame. Returns false at end of stream or on error.
    fn grab(&mut self) -> bool;

    /// Decode the most recently grabbed frame into `frame`.
    fn retrieve(&mut self, frame: &mut Frame) -> Result<()>;

    /// Rewind to the first frame. Live sources treat this as a no-op.
    fn seek_to_start(&mut self) -> Result<()>;
}

/// Broad class of a source name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic,
    Device,
    Stream,
}

pub fn classify(source: &str) -> SourceKind {
    if source.starts_with("stub://") {
        SourceKind::Synthetic
    } else if source.starts_with("/dev/video") {
        SourceKind::Device
    } else {
        SourceKind::Stream
    }
}

/// Open the backend for `source`.
pub fn open(source: &str, hints: CaptureHints) -> Result<Box<dyn CaptureBackend>> {
    if source.trim().is_empty() {
        anyhow::bail!("capture source must not be empty");
    }
    match classify(source) {
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::open(source, hints)?)),
        SourceKind::Device => {
            #[cfg(feature = "ingest-v4l2")]
            {
                Ok(Box::new(V4l2Source::open(source, hints)?))
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                anyhow::bail!("device capture of {} requires the ingest-v4l2 feature", source)
            }
        }
        SourceKind::Stream => {
            #[cfg(feature = "ingest-ffmpeg")]
            {
                Ok(Box::new(file_ffmpeg::FfmpegSource::open(source)?))
            }
            #[cfg(not(feature = "ingest-ffmpeg"))]
            {
                anyhow::bail!("file/URL capture of {} requires the ingest-ffmpeg feature", source)
            }
        }
    }
}

/// Pacing rate for a reported native rate.
pub fn effective_rate(native: f64) -> u32 {
    if native.is_finite() && native >= 1.0 {
        native.round() as u32
    } else {
        DEFAULT_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sources() {
        assert_eq!(classify("stub://cam"), SourceKind::Synthetic);
        assert_eq!(classify("/dev/video2"), SourceKind::Device);
        assert_eq!(classify("clips/beach.mp4"), SourceKind::Stream);
        assert_eq!(classify("rtsp://10.0.0.5/live"), SourceKind::Stream);
    }

    #[test]
    fn invalid_rates_fall_back_to_default() {
        assert_eq!(effective_rate(-1.0), DEFAULT_RATE);
        assert_eq!(effective_rate(0.0), DEFAULT_RATE);
        assert_eq!(effective_rate(f64::NAN), DEFAULT_RATE);
        assert_eq!(effective_rate(25.0), 25);
        assert_eq!(effective_rate(29.97), 30);
    }

    #[test]
    fn empty_source_is_rejected() {
        assert!(open("  ", CaptureHints::new(4, 4)).is_err());
    }

    #[test]
    fn opens_synthetic_source() -> Result<()> {
        let backend = open("stub://cam?width=8&height=6", CaptureHints::new(640, 480))?;
        assert_eq!(backend.geometry(), (8, 6));
        Ok(())
    }
}
