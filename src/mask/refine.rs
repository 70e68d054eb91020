use anyhow::{anyhow, Result};

use crate::config::{DetectorSettings, RefineSettings};
use crate::detect::{RawSignal, Region};
use crate::frame::{Mask, Roi};
use crate::mask::morphology::{self, box_blur, StructuringElement};

/// Turns raw detector output into a full-frame blend mask.
///
/// Stateful only for region (face box) signals: the last non-empty raster is
/// held and reused while the detector reports nothing.
pub struct MaskRefiner {
    settings: RefineSettings,
    foreground_class: usize,
    score_cutoff: f32,
    small: StructuringElement,
    large: StructuringElement,
    held: Option<Mask>,
}

impl MaskRefiner {
    pub fn new(detector: &DetectorSettings, settings: &RefineSettings) -> Result<Self> {
        Ok(Self {
            settings: settings.clone(),
            foreground_class: detector.foreground_class()?,
            score_cutoff: detector.score_cutoff,
            small: StructuringElement::ellipse(settings.small_element),
            large: StructuringElement::ellipse(settings.large_element),
            held: None,
        })
    }

    pub fn settings(&self) -> &RefineSettings {
        &self.settings
    }

    /// Refine `signal` into `out`, which keeps its (output) geometry.
    ///
    /// Dense signals are refined at detector resolution, resized to `roi`
    /// and scattered there; everything outside `roi` becomes background.
    /// Region signals are in output pixel coordinates and cover the frame.
    pub fn refine_into(&mut self, signal: &RawSignal, roi: Roi, out: &mut Mask) -> Result<()> {
        signal.validate()?;
        match signal {
            RawSignal::Regions(regions) => {
                let raw = self.hold_regions(regions, out.width(), out.height());
                let smoothed = self.smooth(&raw);
                out.copy_from(&smoothed);
                Ok(())
            }
            dense => {
                let indicator = self.collapse(dense)?;
                let refined = self.smooth(&self.denoise(indicator));
                scatter_roi(&refined, roi, out)
            }
        }
    }

    fn collapse(&self, signal: &RawSignal) -> Result<Mask> {
        match signal {
            RawSignal::ClassScores {
                width,
                height,
                classes,
                scores,
            } => {
                if self.foreground_class >= *classes {
                    return Err(anyhow!(
                        "foreground class {} outside {} detector classes",
                        self.foreground_class,
                        classes
                    ));
                }
                let values = scores
                    .chunks_exact(*classes)
                    .map(|position| {
                        if argmax(position) == self.foreground_class {
                            1.0
                        } else {
                            0.0
                        }
                    })
                    .collect();
                Mask::from_values(*width, *height, values)
            }
            RawSignal::BoundedScores {
                width,
                height,
                scores,
            } => {
                let values = scores
                    .iter()
                    .map(|&s| if s >= self.score_cutoff { 1.0 } else { 0.0 })
                    .collect();
                Mask::from_values(*width, *height, values)
            }
            RawSignal::Regions(_) => Err(anyhow!("region signals are not collapsed")),
        }
    }

    fn hold_regions(&mut self, regions: &[Region], width: u32, height: u32) -> Mask {
        if regions.is_empty() {
            return match &self.held {
                Some(prev) if prev.dimensions() == (width, height) => prev.clone(),
                _ => Mask::new(width, height),
            };
        }
        let mut raster = Mask::new(width, height);
        for region in regions {
            fill_face_ellipse(&mut raster, region);
        }
        self.held = Some(raster.clone());
        raster
    }

    fn denoise(&self, mask: Mask) -> Mask {
        if !self.settings.denoise {
            return mask;
        }
        morphology::denoise(&mask, &self.small, &self.large)
    }

    fn smooth(&self, mask: &Mask) -> Mask {
        if !self.settings.blur {
            return mask.clone();
        }
        box_blur(mask, self.settings.blur_kernel)
    }
}

/// First index of the highest score.
fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (i, &s) in scores.iter().enumerate() {
        if s > scores[best] {
            best = i;
        }
    }
    best
}

/// Resize `refined` into `roi` of `out`; all other pixels become 0.
pub fn scatter_roi(refined: &Mask, roi: Roi, out: &mut Mask) -> Result<()> {
    if !roi.fits(out.width(), out.height()) {
        return Err(anyhow!(
            "roi {:?} exceeds mask {}x{}",
            roi,
            out.width(),
            out.height()
        ));
    }
    out.fill(0.0);
    let scaled = refined.resized(roi.width, roi.height);
    for y in 0..roi.height {
        for x in 0..roi.width {
            out.set(roi.x + x, roi.y + y, scaled.get(x, y));
        }
    }
    Ok(())
}

/// Rasterize a filled ellipse for a face box.
///
/// The centre sits right of the box centre and in its upper third, and the
/// axes are 55% of the width and 70% of the height, covering hair and chin.
pub fn fill_face_ellipse(mask: &mut Mask, region: &Region) {
    let cx = (5 * region.left + 6 * region.right) / 11;
    let cy = (2 * region.top + region.bottom) / 3;
    let ax = ((region.width() as f64 * 0.55) as i32).max(1);
    let ay = ((region.height() as f64 * 0.7) as i32).max(1);

    let (width, height) = (mask.width() as i32, mask.height() as i32);
    let y0 = (cy - ay).max(0);
    let y1 = (cy + ay).min(height - 1);
    let x0 = (cx - ax).max(0);
    let x1 = (cx + ax).min(width - 1);
    for y in y0..=y1 {
        let ny = (y - cy) as f64 / ay as f64;
        for x in x0..=x1 {
            let nx = (x - cx) as f64 / ax as f64;
            if nx * nx + ny * ny <= 1.0 {
                mask.set(x as u32, y as u32, 1.0);
            }
        }
    }
}
