//! Pixel containers shared by every stage of the pipeline.
//!
//! - `Frame`: 3-channel interleaved 8-bit RGB buffer with a capture sequence number.
//! - `Mask`: single-channel `f32` blend weights in `[0.0, 1.0]`.
//! - `Roi`: axis-aligned sub-rectangle used to feed square-input detectors.
//!
//! Resizing goes through `image::imageops` with a bilinear (triangle) filter so
//! frames and masks are scaled the same way.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, RgbImage};

/// Interleaved channels per pixel.
pub const CHANNELS: usize = 3;

/// Byte length of an RGB frame, with overflow checks.
pub fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A captured picture in canonical RGB24 layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    /// Capture counter value when the frame was produced (0 for frames not
    /// produced by a capture session).
    pub sequence: u64,
    data: Vec<u8>,
}

impl Frame {
    /// Black frame of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * CHANNELS;
        Self {
            width,
            height,
            sequence: 0,
            data: vec![0u8; len],
        }
    }

    /// Wrap an existing RGB24 buffer, validating its length.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            sequence: 0,
            data,
        })
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            sequence: 0,
            data: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reshape the frame in place, reusing the allocation when possible.
    ///
    /// Pixel content is unspecified afterwards; callers overwrite it.
    pub fn reshape(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize * CHANNELS;
        self.width = width;
        self.height = height;
        self.data.resize(len, 0);
    }

    /// Copy `other` into `self` without reallocating when sizes agree.
    pub fn copy_from(&mut self, other: &Frame) {
        self.width = other.width;
        self.height = other.height;
        self.sequence = other.sequence;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
    }

    /// Bilinear resize to `width`x`height`. Returns a clone when already sized.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        let view: ImageBuffer<image::Rgb<u8>, &[u8]> =
            match ImageBuffer::from_raw(self.width, self.height, self.data.as_slice()) {
                Some(view) => view,
                None => return Frame::new(width, height),
            };
        let scaled = imageops::resize(&view, width, height, FilterType::Triangle);
        let mut out = Frame::from_image(scaled);
        out.sequence = self.sequence;
        out
    }

    /// Copy of the pixels inside `roi`, which must lie within the frame.
    pub fn crop(&self, roi: Roi) -> Result<Frame> {
        if !roi.fits(self.width, self.height) {
            return Err(anyhow!(
                "roi {:?} exceeds frame {}x{}",
                roi,
                self.width,
                self.height
            ));
        }
        let row_bytes = roi.width as usize * CHANNELS;
        let stride = self.width as usize * CHANNELS;
        let mut data = Vec::with_capacity(row_bytes * roi.height as usize);
        for row in roi.y..roi.y + roi.height {
            let start = row as usize * stride + roi.x as usize * CHANNELS;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        let mut out = Frame::from_rgb(roi.width, roi.height, data)?;
        out.sequence = self.sequence;
        Ok(out)
    }

    /// Pixel at `(x, y)` as `[r, g, b]`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }
}

// ----------------------------------------------------------------------------
// Mask
// ----------------------------------------------------------------------------

/// Per-pixel blend weight. 1.0 is foreground, 0.0 is background.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl Mask {
    /// All-background mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("mask dimensions {}x{} overflow", width, height))?;
        if values.len() != expected {
            return Err(anyhow!(
                "mask length mismatch: expected {}, got {}",
                expected,
                values.len()
            ));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        self.values[y as usize * self.width as usize + x as usize] = value;
    }

    pub fn fill(&mut self, value: f32) {
        self.values.iter_mut().for_each(|v| *v = value);
    }

    /// Copy `other` into `self`, adopting its geometry.
    pub fn copy_from(&mut self, other: &Mask) {
        self.width = other.width;
        self.height = other.height;
        self.values.clear();
        self.values.extend_from_slice(&other.values);
    }

    /// Bilinear resize to `width`x`height`.
    pub fn resized(&self, width: u32, height: u32) -> Mask {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        let view: ImageBuffer<Luma<f32>, &[f32]> =
            match ImageBuffer::from_raw(self.width, self.height, self.values.as_slice()) {
                Some(view) => view,
                None => return Mask::new(width, height),
            };
        let scaled = imageops::resize(&view, width, height, FilterType::Triangle);
        Mask {
            width,
            height,
            values: scaled.into_raw(),
        }
    }
}

// ----------------------------------------------------------------------------
// Region of interest
// ----------------------------------------------------------------------------

/// Sub-rectangle of a frame in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// Largest square centred in a `width`x`height` frame.
    pub fn centered_square(width: u32, height: u32) -> Self {
        let side = width.min(height);
        Self {
            x: (width - side) / 2,
            y: (height - side) / 2,
            width: side,
            height: side,
        }
    }

    /// The whole frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.x
            .checked_add(self.width)
            .is_some_and(|right| right <= width)
            && self
                .y
                .checked_add(self.height)
                .is_some_and(|bottom| bottom <= height)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
