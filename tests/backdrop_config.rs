use std::sync::Mutex;

use tempfile::NamedTempFile;

use backdrop::config::BackdropConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BACKDROP_CONFIG",
        "BACKDROP_CAPTURE",
        "BACKDROP_OUTPUT",
        "BACKDROP_BACKGROUND",
        "BACKDROP_MODEL",
        "BACKDROP_BACKEND",
        "BACKDROP_WIDTH",
        "BACKDROP_HEIGHT",
        "BACKDROP_NODENOISE",
        "BACKDROP_NOBLUR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "capture": { "source": "/dev/video4", "fps": 15 },
        "output": { "device": "/dev/video9", "width": 1280, "height": 720 },
        "background": "beach.jpg",
        "detector": {
            "backend": "stub",
            "signal": "bounded_score",
            "input_size": 128,
            "score_cutoff": 0.5
        },
        "refine": { "large_element": 9, "blur_kernel": 5 },
        "telemetry": { "interval_secs": 10 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("BACKDROP_CONFIG", file.path());
    std::env::set_var("BACKDROP_CAPTURE", "stub://camera");
    std::env::set_var("BACKDROP_NOBLUR", "1");

    let cfg = BackdropConfig::load().expect("load config");
    assert_eq!(cfg.capture.source, "stub://camera");
    assert_eq!(cfg.capture.fps, Some(15));
    assert_eq!((cfg.capture.width, cfg.capture.height), (1280, 720));
    assert_eq!(cfg.output.device, "/dev/video9");
    assert_eq!(cfg.background, "beach.jpg");
    assert_eq!(cfg.detector.input_size, 128);
    assert_eq!(cfg.detector.score_cutoff, 0.5);
    assert_eq!(cfg.refine.large_element, 9);
    assert_eq!(cfg.refine.blur_kernel, 5);
    assert!(cfg.refine.denoise);
    assert!(!cfg.refine.blur);
    assert_eq!(cfg.telemetry_interval.as_secs(), 10);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = BackdropConfig::load().expect("load default config");
    assert_eq!(cfg.capture.source, "/dev/video1");
    assert_eq!(cfg.output.device, "/dev/video0");
    assert_eq!((cfg.output.width, cfg.output.height), (640, 480));
    assert_eq!(cfg.background, "background.png");
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.foreground_class().expect("person label"), 15);
    assert!(cfg.refine.denoise && cfg.refine.blur);
    assert_eq!(cfg.telemetry_interval.as_secs(), 5);
}

#[test]
fn geometry_overrides_apply_to_capture_and_output() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BACKDROP_WIDTH", "320");
    std::env::set_var("BACKDROP_HEIGHT", "240");
    std::env::set_var("BACKDROP_NODENOISE", "");

    let cfg = BackdropConfig::load().expect("load config");
    assert_eq!((cfg.output.width, cfg.output.height), (320, 240));
    assert_eq!((cfg.capture.width, cfg.capture.height), (320, 240));
    assert!(!cfg.refine.denoise);
    assert!(cfg.refine.blur);

    clear_env();
}

#[test]
fn rejects_invalid_env_and_file_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BACKDROP_WIDTH", "wide");
    assert!(BackdropConfig::load().is_err());
    clear_env();

    std::env::set_var("BACKDROP_HEIGHT", "241");
    assert!(BackdropConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "detector": { "score_cutoff": 1.5 } }"#)
        .expect("write config");
    std::env::set_var("BACKDROP_CONFIG", file.path());
    assert!(BackdropConfig::load().is_err());
    clear_env();

    std::env::set_var("BACKDROP_CONFIG", "/nonexistent/backdrop.json");
    assert!(BackdropConfig::load().is_err());
    clear_env();

    std::env::set_var("BACKDROP_BACKEND", "tract");
    assert!(BackdropConfig::load().is_err());
    clear_env();
}
