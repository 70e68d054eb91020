use anyhow::Result;

use crate::detect::result::{RawSignal, SignalKind};
use crate::frame::Frame;

/// Detector/inference engine contract.
///
/// Backends with an `input_size` receive the centred square region of
/// interest already resized to that geometry. Backends without one receive
/// the full frame at output geometry.
///
/// Backends live on the analysis thread only and need not be `Send`.
pub trait DetectorBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Shape of the signal `infer` returns.
    fn signal_kind(&self) -> SignalKind;

    /// Square input geometry, or `None` for full-frame detectors.
    fn input_size(&self) -> Option<(u32, u32)>;

    /// Run detection on `frame`.
    ///
    /// An `Err` skips this analysis iteration; the previous mask stays live.
    fn infer(&mut self, frame: &Frame) -> Result<RawSignal>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
