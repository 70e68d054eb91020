//! Grayscale morphology and box blur over `Mask` buffers.
//!
//! Masks are quantized to 8-bit gray and handed to `imageproc`. Erosion and
//! dilation take the min/max over an elliptical footprint, ignoring pixels
//! outside the image. The blur is a normalized box filter over a
//! mirror-without-edge (`dcb|abcd|cba`) padded copy of the mask.

use image::{imageops, GrayImage, Luma};
use imageproc::filter::box_filter;
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask as Footprint};

use crate::frame::Mask;

/// Elliptical structuring element, anchored at its centre.
pub struct StructuringElement {
    size: u32,
    offsets: Vec<(i32, i32)>,
    footprint: Footprint,
}

impl StructuringElement {
    /// Filled ellipse inscribed in a `size`x`size` square.
    ///
    /// Row spans are `round(r * sqrt(1 - dy^2 / r^2))` either side of the
    /// centre column, so a 3x3 element is a cross and a 7x7 element is a disc.
    pub fn ellipse(size: u32) -> Self {
        let size = size.clamp(1, 255);
        let r = (size / 2) as i32;
        let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };
        let mut offsets = Vec::new();
        let mut shape = GrayImage::new(size, size);
        for dy in -r..=r {
            let span = (r as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as i32;
            for dx in -span..=span {
                offsets.push((dx, dy));
                shape.put_pixel((dx + r) as u32, (dy + r) as u32, Luma([255]));
            }
        }
        let footprint = Footprint::from_image(&shape, r as u8, r as u8);
        Self {
            size,
            offsets,
            footprint,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn offsets(&self) -> &[(i32, i32)] {
        &self.offsets
    }

    pub fn contains(&self, dx: i32, dy: i32) -> bool {
        self.offsets.contains(&(dx, dy))
    }
}

fn to_gray(mask: &Mask) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([(mask.get(x, y).clamp(0.0, 1.0) * 255.0).round() as u8])
    })
}

fn from_gray(image: &GrayImage) -> Mask {
    let mut mask = Mask::new(image.width(), image.height());
    for (dst, px) in mask.values_mut().iter_mut().zip(image.pixels()) {
        *dst = px[0] as f32 / 255.0;
    }
    mask
}

pub fn erode(mask: &Mask, element: &StructuringElement) -> Mask {
    from_gray(&grayscale_erode(&to_gray(mask), &element.footprint))
}

pub fn dilate(mask: &Mask, element: &StructuringElement) -> Mask {
    from_gray(&grayscale_dilate(&to_gray(mask), &element.footprint))
}

fn close_gray(image: &GrayImage, element: &StructuringElement) -> GrayImage {
    grayscale_erode(&grayscale_dilate(image, &element.footprint), &element.footprint)
}

fn open_gray(image: &GrayImage, element: &StructuringElement) -> GrayImage {
    grayscale_dilate(&grayscale_erode(image, &element.footprint), &element.footprint)
}

/// Dilate then erode: fills holes narrower than the element.
pub fn close(mask: &Mask, element: &StructuringElement) -> Mask {
    from_gray(&close_gray(&to_gray(mask), element))
}

/// Erode then dilate: removes specks narrower than the element.
pub fn open(mask: &Mask, element: &StructuringElement) -> Mask {
    from_gray(&open_gray(&to_gray(mask), element))
}

/// Close/open with `small`, close/open with `large`, then dilate with `large`.
///
/// Small-then-large drops speckle before the large element closes gaps.
pub fn denoise(mask: &Mask, small: &StructuringElement, large: &StructuringElement) -> Mask {
    let image = open_gray(&close_gray(&to_gray(mask), small), small);
    let image = open_gray(&close_gray(&image, large), large);
    from_gray(&grayscale_dilate(&image, &large.footprint))
}

/// Mirror an out-of-range index back into `0..len` without repeating the edge.
fn reflect101(mut i: i64, len: i64) -> u32 {
    if len == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= len {
            i = 2 * len - 2 - i;
        } else {
            return i as u32;
        }
    }
}

/// Normalized `kernel`x`kernel` box blur with reflect-101 borders.
pub fn box_blur(mask: &Mask, kernel: u32) -> Mask {
    let (width, height) = mask.dimensions();
    if kernel <= 1 || width == 0 || height == 0 {
        return mask.clone();
    }
    let radius = kernel / 2;
    let gray = to_gray(mask);
    let pad = radius as i64;
    let padded = GrayImage::from_fn(width + 2 * radius, height + 2 * radius, |x, y| {
        let sx = reflect101(x as i64 - pad, width as i64);
        let sy = reflect101(y as i64 - pad, height as i64);
        *gray.get_pixel(sx, sy)
    });
    let blurred = box_filter(&padded, radius, radius);
    let inner = imageops::crop_imm(&blurred, radius, radius, width, height).to_image();
    from_gray(&inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(width: u32, height: u32, ones: &[(u32, u32)]) -> Mask {
        let mut mask = Mask::new(width, height);
        for &(x, y) in ones {
            mask.set(x, y, 1.0);
        }
        mask
    }

    #[test]
    fn small_ellipse_is_a_cross() {
        let el = StructuringElement::ellipse(3);
        assert_eq!(el.offsets().len(), 5);
        assert!(el.contains(0, -1) && el.contains(-1, 0) && el.contains(1, 0));
        assert!(!el.contains(1, 1));
    }

    #[test]
    fn large_ellipse_row_spans() {
        let el = StructuringElement::ellipse(7);
        let span = |dy: i32| el.offsets().iter().filter(|(_, y)| *y == dy).count();
        assert_eq!(
            [span(-3), span(-2), span(-1), span(0)],
            [1, 5, 7, 7]
        );
        assert_eq!(span(3), 1);
    }

    #[test]
    fn open_removes_isolated_speck() {
        let el = StructuringElement::ellipse(3);
        let mask = mask_from(7, 7, &[(3, 3)]);
        assert!(open(&mask, &el).values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn close_fills_single_pixel_hole() {
        let el = StructuringElement::ellipse(3);
        let mut mask = Mask::new(7, 7);
        mask.fill(1.0);
        mask.set(3, 3, 0.0);
        assert!(close(&mask, &el).values().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn erosion_ignores_outside_pixels() {
        let el = StructuringElement::ellipse(3);
        let mut mask = Mask::new(4, 4);
        mask.fill(1.0);
        assert!(erode(&mask, &el).values().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn dilate_grows_by_element() {
        let el = StructuringElement::ellipse(3);
        let grown = dilate(&mask_from(5, 5, &[(2, 2)]), &el);
        let ones = grown.values().iter().filter(|&&v| v == 1.0).count();
        assert_eq!(ones, 5);
        assert_eq!(grown.get(1, 2), 1.0);
        assert_eq!(grown.get(1, 1), 0.0);
    }

    #[test]
    fn blur_preserves_constant_mask() {
        let mut mask = Mask::new(5, 3);
        mask.fill(0.75);
        let blurred = box_blur(&mask, 7);
        assert!(blurred.values().iter().all(|&v| (v - 0.75).abs() <= 1.0 / 255.0));
    }

    #[test]
    fn blur_averages_with_reflected_border() {
        // Single row [1, 0, 0]; kernel 3 at x=0 reads [0(reflected), 1, 0].
        let mask = mask_from(3, 1, &[(0, 0)]);
        let blurred = box_blur(&mask, 3);
        // One row, so every vertical tap reads the same row.
        assert!((blurred.get(0, 0) - 1.0 / 3.0).abs() <= 1.0 / 255.0);
        assert!((blurred.get(1, 0) - 1.0 / 3.0).abs() <= 1.0 / 255.0);
        assert_eq!(blurred.get(2, 0), 0.0);
    }

    #[test]
    fn denoise_drops_speck_and_closes_hole() {
        let small = StructuringElement::ellipse(3);
        let large = StructuringElement::ellipse(7);
        let mut mask = Mask::new(24, 24);
        for y in 8..16 {
            for x in 8..16 {
                mask.set(x, y, 1.0);
            }
        }
        mask.set(12, 12, 0.0);
        mask.set(1, 1, 1.0);
        let out = denoise(&mask, &small, &large);
        assert_eq!(out.get(1, 1), 0.0);
        assert_eq!(out.get(12, 12), 1.0);
        // Final dilation by the 7x7 disc reaches three pixels past the block.
        assert_eq!(out.get(5, 12), 1.0);
        assert_eq!(out.get(4, 12), 0.0);
    }

    #[test]
    fn reflect101_mirrors_without_edge() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(-7, 3), 1);
    }
}
