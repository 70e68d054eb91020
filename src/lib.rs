//! Backdrop
//!
//! Live webcam background replacement. A paced capture thread composites
//! every camera frame against a background using the most recent foreground
//! mask, while the caller's thread refines that mask from detector output at
//! whatever rate detection allows.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames, float masks, regions of interest
//! - `ingest`: capture backends (synthetic, V4L2, ffmpeg)
//! - `capture`: paced capture sessions with copy-out `pull` and per-frame handlers
//! - `detect`: detector backends producing raw foreground signals
//! - `mask`: signal collapse, morphological denoise, blur, ROI scatter
//! - `context`: mask/background/termination state shared across threads
//! - `composite`: alpha blending and the per-frame compositor
//! - `output`: I420 conversion and output sinks
//! - `pipeline`: wiring and the analysis loop
//! - `config`: JSON file plus environment configuration

pub mod capture;
pub mod composite;
pub mod config;
pub mod context;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod mask;
pub mod output;
pub mod pipeline;

pub use capture::{CaptureSession, FrameHandler, SessionInfo};
pub use composite::{blend, Compositor};
pub use config::BackdropConfig;
pub use context::SharedFrameContext;
pub use detect::{DetectorBackend, RawSignal, Region, SignalKind};
pub use frame::{Frame, Mask, Roi};
pub use ingest::{CaptureBackend, CaptureHints};
pub use mask::MaskRefiner;
pub use output::{write_frame, LoopbackSink, OutputSink};
pub use pipeline::{Pipeline, PipelineStats};
