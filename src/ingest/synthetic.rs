//! Synthetic frame source (`stub://`).
//!
//! Produces a deterministic gradient whose phase is the frame's position in
//! the stream, so every byte of a frame is derivable from its first byte:
//! `data[i] == (data[0] + i) % 256`. Consumers can check that invariant to
//! detect torn frames.
//!
//! Query options (all optional):
//! - `width`, `height`: geometry (defaults to the capture hints)
//! - `fps`: reported native rate (defaults to the requested fps, else 30)
//! - `frames`: finite stream length; `grab` fails past it until rewound

use anyhow::{anyhow, Context, Result};

use super::{CaptureBackend, CaptureHints, DEFAULT_RATE};
use crate::frame::Frame;

pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    rate: f64,
    length: Option<u64>,
    /// Stream position of the next grab.
    position: u64,
    /// Position of the grabbed-but-not-retrieved frame.
    grabbed: Option<u64>,
}

impl SyntheticSource {
    pub fn open(source: &str, hints: CaptureHints) -> Result<Self> {
        let rest = source
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source must start with stub://"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut width = hints.width;
        let mut height = hints.height;
        let mut rate = hints.fps.map(f64::from).unwrap_or(DEFAULT_RATE as f64);
        let mut length = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub option '{}'", pair))?;
            match key {
                "width" => width = value.parse().context("stub width")?,
                "height" => height = value.parse().context("stub height")?,
                "fps" => rate = value.parse().context("stub fps")?,
                "frames" => length = Some(value.parse().context("stub frames")?),
                other => return Err(anyhow!("unknown stub option '{}'", other)),
            }
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("stub geometry must be non-zero"));
        }

        log::info!(
            "SyntheticSource: opened {} ({}x{} @ {})",
            name,
            width,
            height,
            rate
        );
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            rate,
            length,
            position: 0,
            grabbed: None,
        })
    }

    /// Fill `frame` with the gradient for stream position `position`.
    pub fn render(position: u64, frame: &mut Frame) {
        let phase = position % 256;
        for (i, byte) in frame.data_mut().iter_mut().enumerate() {
            *byte = ((i as u64 + phase) % 256) as u8;
        }
    }

    /// True when `frame` holds an intact gradient (no torn writes).
    pub fn is_intact(frame: &Frame) -> bool {
        let data = frame.data();
        let Some(&first) = data.first() else {
            return false;
        };
        data.iter()
            .enumerate()
            .all(|(i, &b)| b as usize == (first as usize + i) % 256)
    }
}

impl CaptureBackend for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn native_rate(&self) -> f64 {
        self.rate
    }

    fn grab(&mut self) -> bool {
        if self.length.is_some_and(|len| self.position >= len) {
            self.grabbed = None;
            return false;
        }
        self.grabbed = Some(self.position);
        self.position += 1;
        true
    }

    fn retrieve(&mut self, frame: &mut Frame) -> Result<()> {
        let position = self
            .grabbed
            .take()
            .ok_or_else(|| anyhow!("retrieve without a grabbed frame"))?;
        frame.reshape(self.width, self.height);
        Self::render(position, frame);
        Ok(())
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.position = 0;
        self.grabbed = None;
        Ok(())
    }
}
