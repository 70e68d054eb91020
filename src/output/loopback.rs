use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};

use super::OutputSink;

/// Writes raw I420 frames to a V4L2 loopback device or a plain file.
pub struct LoopbackSink {
    path: String,
    file: File,
}

impl LoopbackSink {
    /// Open `path` for `width`x`height` I420 output.
    ///
    /// Character devices get their output format negotiated first when V4L2
    /// support is compiled in; regular files are created or truncated.
    pub fn open(path: &str, width: u32, height: u32) -> Result<Self> {
        let is_device = path.starts_with("/dev/");
        if is_device {
            negotiate_format(path, width, height)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(!is_device)
            .truncate(!is_device)
            .open(Path::new(path))
            .with_context(|| format!("open output {}", path))?;
        log::info!("LoopbackSink: writing {}x{} I420 to {}", width, height, path);
        Ok(Self {
            path: path.to_string(),
            file,
        })
    }
}

impl OutputSink for LoopbackSink {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.file.write(bytes)
    }
}

#[cfg(feature = "ingest-v4l2")]
fn negotiate_format(path: &str, width: u32, height: u32) -> Result<()> {
    use v4l::video::Output;
    use v4l::{Format, FourCC};

    let device =
        v4l::Device::with_path(path).with_context(|| format!("open v4l2 output {}", path))?;
    let requested = Format::new(width, height, FourCC::new(b"YU12"));
    let actual = device
        .set_format(&requested)
        .with_context(|| format!("set YU12 output format on {}", path))?;
    if actual.width != width || actual.height != height || actual.fourcc != requested.fourcc {
        anyhow::bail!(
            "{} negotiated {}x{} {} instead of {}x{} YU12",
            path,
            actual.width,
            actual.height,
            actual.fourcc,
            width,
            height
        );
    }
    Ok(())
}

#[cfg(not(feature = "ingest-v4l2"))]
fn negotiate_format(path: &str, _width: u32, _height: u32) -> Result<()> {
    log::warn!(
        "LoopbackSink: V4L2 support not compiled in, writing to {} without format negotiation",
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::write_frame;

    #[test]
    fn file_sink_receives_frames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.yuv");
        let path_str = path.to_string_lossy().to_string();
        let mut sink = LoopbackSink::open(&path_str, 2, 2)?;
        write_frame(&mut sink, &[1, 2, 3, 4, 5, 6])?;
        write_frame(&mut sink, &[7, 8, 9, 10, 11, 12])?;
        drop(sink);
        assert_eq!(std::fs::read(&path)?, (1..=12).collect::<Vec<u8>>());
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_open_error() {
        assert!(LoopbackSink::open("/nonexistent-dir/out.yuv", 2, 2).is_err());
    }
}
