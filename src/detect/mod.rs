//! Foreground detectors.
//!
//! Detectors are external collaborators: they turn a frame (or the square
//! region of interest of one) into a raw foreground signal. Mask refinement
//! (`crate::mask`) turns that signal into blend weights.

mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-face")]
pub use backends::FaceBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{RawSignal, Region, SignalKind};

/// Construct the backend named in `settings`.
///
/// Fails when `settings.signal` names a shape the backend does not produce.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend.as_str() {
        "stub" => Box::new(StubBackend::new(settings.input_size)),
        "tract" => {
            #[cfg(feature = "backend-tract")]
            {
                let path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("the tract backend requires a model path"))?;
                Box::new(TractBackend::new(path, settings)?)
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                return Err(anyhow!("the tract backend requires the backend-tract feature"));
            }
        }
        "face" => {
            #[cfg(feature = "backend-face")]
            {
                let path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("the face backend requires a model path"))?;
                Box::new(FaceBackend::new(path)?)
            }
            #[cfg(not(feature = "backend-face"))]
            {
                return Err(anyhow!("the face backend requires the backend-face feature"));
            }
        }
        other => return Err(anyhow!("unknown detector backend '{}'", other)),
    };
    if let Some(wanted) = settings.signal {
        if wanted != backend.signal_kind() {
            return Err(anyhow!(
                "detector backend {} produces {:?}, not the configured {:?}",
                backend.name(),
                backend.signal_kind(),
                wanted
            ));
        }
    }
    backend.warm_up()?;
    log::info!(
        "detector backend {} ({:?})",
        backend.name(),
        backend.signal_kind()
    );
    Ok(backend)
}
