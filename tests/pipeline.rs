use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use backdrop::detect::StubBackend;
use backdrop::output::i420_len;
use backdrop::{
    BackdropConfig, DetectorBackend, Frame, Mask, OutputSink, Pipeline, RawSignal, Region,
    SignalKind,
};

#[derive(Clone, Default)]
struct MemorySink {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    broken: bool,
}

impl MemorySink {
    fn count(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl OutputSink for MemorySink {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.frames
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "poisoned"))?
            .push(bytes.to_vec());
        Ok(bytes.len())
    }
}

struct FailingDetector;

impl DetectorBackend for FailingDetector {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn signal_kind(&self) -> SignalKind {
        SignalKind::BoundedScore
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        Some((8, 8))
    }

    fn infer(&mut self, _frame: &Frame) -> Result<RawSignal> {
        Err(anyhow!("inference engine unavailable"))
    }
}

/// Full-frame face detector that reports one box for `hits` calls, then nothing.
struct ScriptedFaces {
    hits: usize,
    calls: usize,
    frame_sizes: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl DetectorBackend for ScriptedFaces {
    fn name(&self) -> &'static str {
        "scripted-faces"
    }

    fn signal_kind(&self) -> SignalKind {
        SignalKind::Regions
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        None
    }

    fn infer(&mut self, frame: &Frame) -> Result<RawSignal> {
        self.calls += 1;
        if let Ok(mut sizes) = self.frame_sizes.lock() {
            sizes.push(frame.dimensions());
        }
        if self.calls <= self.hits {
            Ok(RawSignal::Regions(vec![Region::new(20, 10, 40, 30)]))
        } else {
            Ok(RawSignal::Regions(Vec::new()))
        }
    }
}

fn still_background(dir: &tempfile::TempDir) -> Result<String> {
    let path = dir.path().join("background.png");
    image::RgbImage::from_pixel(32, 24, image::Rgb([0, 128, 255])).save(&path)?;
    Ok(path.to_string_lossy().to_string())
}

fn config(background: &str) -> Result<BackdropConfig> {
    let json = format!(
        r#"{{
            "capture": {{ "source": "stub://camera?fps=200" }},
            "output": {{ "device": "memory", "width": 64, "height": 48 }},
            "background": "{}",
            "detector": {{ "input_size": 16 }}
        }}"#,
        background
    );
    BackdropConfig::from_json(&json)
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn composites_with_still_background_until_stopped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(&still_background(&dir)?)?;
    let sink = MemorySink::default();
    let mut pipeline = Pipeline::start(&cfg, Box::new(sink.clone()), Box::new(StubBackend::new(16)))?;

    for _ in 0..5 {
        assert!(pipeline.step()?);
    }
    assert!(wait_for(|| sink.count() >= 3));

    let stats = pipeline.stats();
    assert_eq!(stats.mask_updates, 5);
    assert_eq!(stats.detector_failures, 0);
    assert_eq!(stats.background, 0);

    pipeline.context().request_stop();
    pipeline.run()?;

    let frames = sink.frames.lock().map_err(|_| anyhow!("poisoned"))?;
    assert!(frames.iter().all(|f| f.len() == i420_len(64, 48)));
    Ok(())
}

#[test]
fn video_background_is_pulled_per_frame() -> Result<()> {
    let cfg = config("stub://background?fps=100")?;
    let sink = MemorySink::default();
    let mut pipeline = Pipeline::start(&cfg, Box::new(sink.clone()), Box::new(StubBackend::new(16)))?;

    assert!(pipeline.step()?);
    assert!(wait_for(|| sink.count() >= 3));
    assert!(wait_for(|| pipeline.stats().background > 0));

    pipeline.context().request_stop();
    pipeline.run()
}

#[test]
fn detector_failures_keep_pipeline_running() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(&still_background(&dir)?)?;
    let sink = MemorySink::default();
    let mut pipeline = Pipeline::start(&cfg, Box::new(sink.clone()), Box::new(FailingDetector))?;

    for _ in 0..3 {
        assert!(pipeline.step()?);
    }
    let stats = pipeline.stats();
    assert_eq!(stats.detector_failures, 3);
    assert_eq!(stats.mask_updates, 0);

    // Nothing published: every written frame is pure background.
    assert!(wait_for(|| sink.count() >= 1));
    {
        let frames = sink.frames.lock().map_err(|_| anyhow!("poisoned"))?;
        // Limited-range BT.601 luma of (0, 128, 255) is about 105.5.
        let plane = &frames[0][..64 * 48];
        assert!(plane.iter().all(|&y| y == plane[0]));
        assert!((104..=107).contains(&plane[0]), "luma {}", plane[0]);
    }

    pipeline.context().request_stop();
    pipeline.run()
}

#[test]
fn sink_failure_ends_the_pipeline_with_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(&still_background(&dir)?)?;
    let sink = MemorySink {
        broken: true,
        ..MemorySink::default()
    };
    let pipeline = Pipeline::start(&cfg, Box::new(sink), Box::new(StubBackend::new(16)))?;
    let context = pipeline.context();

    let err = pipeline.run().expect_err("sink failure must surface");
    assert!(format!("{:#}", err).contains("sink closed"));
    assert!(context.should_stop());
    Ok(())
}

#[test]
fn unopenable_capture_source_fails_start() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(&still_background(&dir)?)?;
    cfg.capture.source = "stub://camera?bogus=1".to_string();
    let result = Pipeline::start(&cfg, Box::new(MemorySink::default()), Box::new(StubBackend::new(16)));
    assert!(result.is_err());
    Ok(())
}

#[test]
fn face_mask_is_held_while_detector_finds_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(&still_background(&dir)?)?;
    let frame_sizes = Arc::new(Mutex::new(Vec::new()));
    let detector = ScriptedFaces {
        hits: 2,
        calls: 0,
        frame_sizes: Arc::clone(&frame_sizes),
    };
    let mut pipeline = Pipeline::start(&cfg, Box::new(MemorySink::default()), Box::new(detector))?;
    let context = pipeline.context();

    assert!(pipeline.step()?);
    assert!(pipeline.step()?);
    let mut found = Mask::new(64, 48);
    context.read_mask_into(&mut found);
    assert!(found.get(32, 18) > 0.5, "face centre weight {}", found.get(32, 18));
    assert_eq!(found.get(0, 47), 0.0);

    assert!(pipeline.step()?);
    let mut held = Mask::new(64, 48);
    context.read_mask_into(&mut held);
    assert_eq!(held, found);
    assert_eq!(pipeline.stats().mask_updates, 3);

    {
        let sizes = frame_sizes.lock().map_err(|_| anyhow!("poisoned"))?;
        assert!(sizes.iter().all(|&size| size == (64, 48)));
    }

    context.request_stop();
    pipeline.run()
}
