//! Mask refinement: raw detector signal to smooth full-frame blend weights.
//!
//! Pipeline per analysis iteration:
//! 1. Collapse the signal to a 0/1 indicator (class argmax, score cutoff or
//!    rasterized face ellipses with temporal hold).
//! 2. Denoise: close/open with a small element, close/open with a large
//!    element, then dilate with the large element.
//! 3. Box blur the edges.
//! 4. Scatter into the region of interest of the output mask.
//!
//! Stages 2 and 3 are individually switchable through `RefineSettings`.

pub mod morphology;
mod refine;

pub use morphology::{box_blur, close, denoise, dilate, erode, open, StructuringElement};
pub use refine::{fill_face_ellipse, scatter_roi, MaskRefiner};
