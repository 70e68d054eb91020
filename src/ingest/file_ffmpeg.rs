//! File and URL backend using FFmpeg.
//!
//! Accepts whatever geometry the container reports. `grab` pulls packets until
//! the decoder yields a frame; `retrieve` scales that frame to RGB24. At end of
//! stream `grab` fails, and the session rewinds with `seek_to_start`.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::CaptureBackend;
use crate::frame::Frame;

pub(crate) struct FfmpegSource {
    location: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    decoded: ffmpeg::frame::Video,
    rgb: ffmpeg::frame::Video,
    has_pending: bool,
    rate: f64,
}

impl FfmpegSource {
    pub(crate) fn open(location: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&location)
            .with_context(|| format!("failed to open '{}' with ffmpeg", location))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video track", location))?;
        let stream_index = input_stream.index();
        let rate = rational_to_f64(input_stream.avg_frame_rate());
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegSource: opened {} ({}x{} @ {:.2})",
            location,
            decoder.width(),
            decoder.height(),
            rate
        );
        Ok(Self {
            location: location.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            decoded: ffmpeg::frame::Video::empty(),
            rgb: ffmpeg::frame::Video::empty(),
            has_pending: false,
            rate,
        })
    }
}

impl CaptureBackend for FfmpegSource {
    fn describe(&self) -> String {
        self.location.clone()
    }

    fn geometry(&self) -> (u32, u32) {
        (self.decoder.width(), self.decoder.height())
    }

    fn native_rate(&self) -> f64 {
        self.rate
    }

    fn grab(&mut self) -> bool {
        self.has_pending = false;
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                self.has_pending = true;
                return true;
            }
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    let _ = self.decoder.send_eof();
                    self.has_pending = self.decoder.receive_frame(&mut self.decoded).is_ok();
                    return self.has_pending;
                }
                Err(err) => {
                    log::debug!("FfmpegSource: read from {} failed: {}", self.location, err);
                    return false;
                }
            }
            if packet.stream() != self.stream_index {
                continue;
            }
            if let Err(err) = self.decoder.send_packet(&packet) {
                log::debug!("FfmpegSource: decode of {} failed: {}", self.location, err);
                return false;
            }
        }
    }

    fn retrieve(&mut self, frame: &mut Frame) -> Result<()> {
        if !std::mem::take(&mut self.has_pending) {
            return Err(anyhow!("retrieve without a grabbed frame"));
        }
        self.scaler
            .run(&self.decoded, &mut self.rgb)
            .context("scale frame to RGB")?;
        copy_rows(&self.rgb, frame)
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .with_context(|| format!("seek {} to start", self.location))?;
        self.decoder.flush();
        self.has_pending = false;
        Ok(())
    }
}

fn rational_to_f64(rate: ffmpeg::Rational) -> f64 {
    if rate.denominator() == 0 {
        return -1.0;
    }
    rate.numerator() as f64 / rate.denominator() as f64
}

fn copy_rows(rgb: &ffmpeg::frame::Video, frame: &mut Frame) -> Result<()> {
    let width = rgb.width();
    let height = rgb.height();
    let row_bytes = width as usize * 3;
    let stride = rgb.stride(0);
    let data = rgb.data(0);

    frame.reshape(width, height);
    for (row, out) in frame.data_mut().chunks_exact_mut(row_bytes).enumerate() {
        let start = row * stride;
        let src = data
            .get(start..start + row_bytes)
            .context("ffmpeg frame row is out of bounds")?;
        out.copy_from_slice(src);
    }
    Ok(())
}
