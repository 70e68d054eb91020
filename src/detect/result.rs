use anyhow::{anyhow, Result};

/// The three shapes of raw foreground signal a detector can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    /// Per-position score for every class; the argmax picks the class.
    ClassProbability,
    /// Per-position foreground score, thresholded to a binary indicator.
    BoundedScore,
    /// Axis-aligned detection boxes (faces) in frame pixel coordinates.
    Regions,
}

/// Raw detector output, before mask refinement.
#[derive(Clone, Debug, PartialEq)]
pub enum RawSignal {
    /// `scores[(y * width + x) * classes + class]`.
    ClassScores {
        width: u32,
        height: u32,
        classes: usize,
        scores: Vec<f32>,
    },
    /// `scores[y * width + x]`.
    BoundedScores {
        width: u32,
        height: u32,
        scores: Vec<f32>,
    },
    Regions(Vec<Region>),
}

impl RawSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            RawSignal::ClassScores { .. } => SignalKind::ClassProbability,
            RawSignal::BoundedScores { .. } => SignalKind::BoundedScore,
            RawSignal::Regions(_) => SignalKind::Regions,
        }
    }

    /// Check that dense buffers match their declared geometry.
    pub fn validate(&self) -> Result<()> {
        let (expected, actual) = match self {
            RawSignal::ClassScores {
                width,
                height,
                classes,
                scores,
            } => (
                (*width as usize) * (*height as usize) * classes,
                scores.len(),
            ),
            RawSignal::BoundedScores {
                width,
                height,
                scores,
            } => ((*width as usize) * (*height as usize), scores.len()),
            RawSignal::Regions(_) => return Ok(()),
        };
        if expected != actual {
            return Err(anyhow!(
                "{:?} signal has {} scores, expected {}",
                self.kind(),
                actual,
                expected
            ));
        }
        Ok(())
    }
}

/// Detection box in pixel coordinates, right/bottom exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Region {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}
