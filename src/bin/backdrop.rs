//! backdrop - live background replacement for a virtual camera
//!
//! This daemon:
//! 1. Captures the camera at its native rate on a dedicated thread
//! 2. Composites every frame against a still image or looping video
//! 3. Streams the result as I420 to a V4L2 loopback device
//! 4. Refines the foreground mask on the main thread as fast as detection allows
//!
//! Configuration: `BACKDROP_CONFIG` (JSON) plus `BACKDROP_*` overrides.

use anyhow::{Context, Result};

use backdrop::{detect, BackdropConfig, LoopbackSink, Pipeline};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = BackdropConfig::load()?;
    log::info!(
        "backdrop {}: capture {} -> output {} ({}x{})",
        env!("CARGO_PKG_VERSION"),
        cfg.capture.source,
        cfg.output.device,
        cfg.output.width,
        cfg.output.height
    );

    let detector = detect::build_backend(&cfg.detector)?;
    let sink = LoopbackSink::open(&cfg.output.device, cfg.output.width, cfg.output.height)?;
    let pipeline = Pipeline::start(&cfg, Box::new(sink), detector)?;

    let context = pipeline.context();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        context.request_stop();
    })
    .context("install Ctrl-C handler")?;

    pipeline.run()
}
