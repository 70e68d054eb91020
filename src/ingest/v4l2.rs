//! V4L2 device backend.
//!
//! Requests the caller's geometry and RGB3 output from the driver, falling
//! back to whatever the driver negotiated (RGB3 or YUYV). `grab` dequeues the
//! next mmap buffer and keeps a copy; `retrieve` converts that copy to RGB.

use anyhow::{anyhow, Context, Result};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::FourCC;

use super::normalize::{normalize_into, PixelFormat};
use super::{CaptureBackend, CaptureHints};
use crate::frame::Frame;

pub struct V4l2Source {
    device_path: String,
    stream: MmapStream<'static>,
    format: PixelFormat,
    width: u32,
    height: u32,
    rate: f64,
    pending: Vec<u8>,
    has_pending: bool,
    // Keeps the device handle open for the stream's lifetime.
    _device: v4l::Device,
}

impl V4l2Source {
    pub fn open(path: &str, hints: CaptureHints) -> Result<Self> {
        let device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = hints.width;
        format.height = hints.height;
        format.fourcc = FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = if format.fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else if format.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else {
            return Err(anyhow!(
                "v4l2 device {} negotiated unsupported format {}",
                path,
                format.fourcc
            ));
        };

        if let Some(fps) = hints.fps {
            let params = v4l::video::capture::Parameters::with_fps(fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", path, err);
            }
        }
        let rate = match device.params() {
            Ok(params) if params.interval.numerator > 0 => {
                params.interval.denominator as f64 / params.interval.numerator as f64
            }
            _ => -1.0,
        };

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, 4)
            .context("create v4l2 buffer stream")?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {} @ {:.2})",
            path,
            format.width,
            format.height,
            format.fourcc,
            rate
        );
        Ok(Self {
            device_path: path.to_string(),
            stream,
            format: pixel_format,
            width: format.width,
            height: format.height,
            rate,
            pending: Vec::new(),
            has_pending: false,
            _device: device,
        })
    }
}

impl CaptureBackend for V4l2Source {
    fn describe(&self) -> String {
        self.device_path.clone()
    }

    fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn native_rate(&self) -> f64 {
        self.rate
    }

    fn grab(&mut self) -> bool {
        match self.stream.next() {
            Ok((buf, _meta)) => {
                self.pending.clear();
                self.pending.extend_from_slice(buf);
                self.has_pending = true;
                true
            }
            Err(err) => {
                log::debug!("V4l2Source: dequeue on {} failed: {}", self.device_path, err);
                self.has_pending = false;
                false
            }
        }
    }

    fn retrieve(&mut self, frame: &mut Frame) -> Result<()> {
        if !std::mem::take(&mut self.has_pending) {
            return Err(anyhow!("retrieve without a grabbed frame"));
        }
        normalize_into(&self.pending, self.width, self.height, self.format, frame)
    }

    fn seek_to_start(&mut self) -> Result<()> {
        // Live devices have no start to return to.
        Ok(())
    }
}
