use anyhow::{anyhow, Result};

use crate::frame::{rgb_len, Frame};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
}

/// Convert a raw device buffer into the canonical RGB layout of `frame`.
///
/// Device buffers may be longer than the payload (mmap padding), never shorter.
pub(crate) fn normalize_into(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    frame: &mut Frame,
) -> Result<()> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = rgb_len(width, height)?;
            let payload = pixels.get(..expected).ok_or_else(|| {
                anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                )
            })?;
            frame.reshape(width, height);
            frame.data_mut().copy_from_slice(payload);
            Ok(())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height, frame),
    }
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32, frame: &mut Frame) -> Result<()> {
    let w = width as usize;
    let h = height as usize;
    let expected = w
        .checked_mul(h)
        .and_then(|v| v.checked_mul(2))
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    if pixels.len() < expected || w % 2 != 0 {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    frame.reshape(width, height);
    let rgb = frame.data_mut();
    for (pair, out) in pixels[..expected].chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let u = pair[1] as f32 - 128.0;
        let v = pair[3] as f32 - 128.0;
        for (k, y) in [pair[0], pair[2]].into_iter().enumerate() {
            let y = y as f32;
            out[k * 3] = clamp_to_u8(y + 1.402_f32 * v);
            out[k * 3 + 1] = clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v);
            out[k * 3 + 2] = clamp_to_u8(y + 1.772_f32 * u);
        }
    }
    Ok(())
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
