use std::path::Path;

use anyhow::{anyhow, Result};
use rustface::{Detector, ImageData};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{RawSignal, Region, SignalKind};
use crate::frame::Frame;

const MIN_FACE_SIZE: u32 = 20;
const SCORE_THRESHOLD: f64 = 2.0;
const PYRAMID_SCALE: f32 = 0.8;
const WINDOW_STEP: u32 = 4;

/// Full-frame face detector built on a SeetaFace cascade model.
///
/// Receives the frame at output geometry and reports face boxes in the same
/// pixel coordinates.
pub struct FaceBackend {
    detector: Box<dyn Detector>,
    gray: Vec<u8>,
}

impl FaceBackend {
    /// Load the cascade model at `model_path`.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let path = model_path
            .to_str()
            .ok_or_else(|| anyhow!("face model path {} is not UTF-8", model_path.display()))?;
        let mut detector = rustface::create_detector(path).map_err(|e| {
            anyhow!(
                "failed to load face model from {}: {:?}",
                model_path.display(),
                e
            )
        })?;
        detector.set_min_face_size(MIN_FACE_SIZE);
        detector.set_score_thresh(SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(PYRAMID_SCALE);
        detector.set_slide_window_step(WINDOW_STEP, WINDOW_STEP);
        log::info!("FaceBackend: loaded {}", model_path.display());
        Ok(Self {
            detector,
            gray: Vec::new(),
        })
    }
}

/// BT.601 luma of each RGB24 pixel into `out`.
fn to_luma(frame: &Frame, out: &mut Vec<u8>) {
    out.clear();
    out.extend(frame.data().chunks_exact(3).map(|px| {
        (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
            .round()
            .clamp(0.0, 255.0) as u8
    }));
}

impl DetectorBackend for FaceBackend {
    fn name(&self) -> &'static str {
        "face"
    }

    fn signal_kind(&self) -> SignalKind {
        SignalKind::Regions
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        None
    }

    fn infer(&mut self, frame: &Frame) -> Result<RawSignal> {
        if frame.is_empty() {
            return Err(anyhow!("face detection needs a non-empty frame"));
        }
        to_luma(frame, &mut self.gray);
        let mut image = ImageData::new(&self.gray, frame.width(), frame.height());
        let regions = self
            .detector
            .detect(&mut image)
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                let (left, top) = (bbox.x() as i32, bbox.y() as i32);
                Region::new(
                    left,
                    top,
                    left + bbox.width() as i32,
                    top + bbox.height() as i32,
                )
            })
            .collect();
        Ok(RawSignal::Regions(regions))
    }
}
