use anyhow::{anyhow, Result};
use yuv::{
    rgb_to_yuv420, YuvChromaSubsampling, YuvConversionMode, YuvPlanarImageMut, YuvRange,
    YuvStandardMatrix,
};

use crate::frame::Frame;

/// Byte length of an I420 picture: full-size Y plane, quarter-size U and V.
pub fn i420_len(width: u32, height: u32) -> usize {
    let luma = width as usize * height as usize;
    luma + 2 * (luma / 4)
}

/// Convert an RGB24 frame into planar I420 (YU12), limited-range BT.601.
///
/// Luma spans 16..=235 and chroma 16..=240, the default v4l2 consumers
/// assume for YU12. The frame geometry must be even in both directions.
pub fn rgb_to_i420(frame: &Frame, out: &mut Vec<u8>) -> Result<()> {
    let (width, height) = frame.dimensions();
    if width % 2 != 0 || height % 2 != 0 {
        return Err(anyhow!(
            "I420 output requires even geometry, got {}x{}",
            width,
            height
        ));
    }

    let mut planar = YuvPlanarImageMut::<u8>::alloc(width, height, YuvChromaSubsampling::Yuv420);
    rgb_to_yuv420(
        &mut planar,
        frame.data(),
        width * 3,
        YuvRange::Limited,
        YuvStandardMatrix::Bt601,
        YuvConversionMode::Balanced,
    )
    .map_err(|e| anyhow!("RGB to I420 conversion failed: {:?}", e))?;

    out.clear();
    out.reserve(i420_len(width, height));
    out.extend_from_slice(planar.y_plane.borrow());
    out.extend_from_slice(planar.u_plane.borrow());
    out.extend_from_slice(planar.v_plane.borrow());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let mut frame = Frame::new(width, height);
        for px in frame.data_mut().chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
        frame
    }

    fn near(actual: u8, expected: u8) -> bool {
        actual.abs_diff(expected) <= 1
    }

    #[test]
    fn gray_maps_to_neutral_chroma() -> Result<()> {
        let mut out = Vec::new();
        rgb_to_i420(&solid(4, 2, [90, 90, 90]), &mut out)?;
        assert_eq!(out.len(), i420_len(4, 2));
        // 16 + 219 * 90 / 255 = 93.3
        assert!(out[..8].iter().all(|&y| near(y, 93)), "luma {:?}", &out[..8]);
        assert!(out[8..].iter().all(|&c| near(c, 128)), "chroma {:?}", &out[8..]);
        Ok(())
    }

    #[test]
    fn luma_stays_inside_video_range() -> Result<()> {
        let mut out = Vec::new();
        rgb_to_i420(&solid(2, 2, [255, 255, 255]), &mut out)?;
        assert!(out[..4].iter().all(|&y| near(y, 235)), "white {:?}", &out[..4]);
        rgb_to_i420(&solid(2, 2, [0, 0, 0]), &mut out)?;
        assert!(out[..4].iter().all(|&y| near(y, 16)), "black {:?}", &out[..4]);
        Ok(())
    }

    #[test]
    fn primaries_land_on_expected_planes() -> Result<()> {
        let mut out = Vec::new();
        rgb_to_i420(&solid(2, 2, [255, 0, 0]), &mut out)?;
        assert!(near(out[0], 81), "red luma {}", out[0]);
        assert!(near(out[4], 90), "red U {}", out[4]);
        assert!(near(out[5], 240), "red V {}", out[5]);

        rgb_to_i420(&solid(2, 2, [0, 0, 255]), &mut out)?;
        assert!(near(out[0], 41), "blue luma {}", out[0]);
        assert!(near(out[4], 240), "blue U {}", out[4]);
        assert!(near(out[5], 110), "blue V {}", out[5]);
        Ok(())
    }

    #[test]
    fn odd_geometry_is_rejected() {
        let mut out = Vec::new();
        assert!(rgb_to_i420(&Frame::new(3, 2), &mut out).is_err());
    }
}
