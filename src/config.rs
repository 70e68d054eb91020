use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::SignalKind;

const DEFAULT_CAPTURE_SOURCE: &str = "/dev/video1";
const DEFAULT_OUTPUT_DEVICE: &str = "/dev/video0";
const DEFAULT_BACKGROUND: &str = "background.png";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 257;
const DEFAULT_FOREGROUND_LABEL: &str = "person";
const DEFAULT_SCORE_CUTOFF: f32 = 0.65;
const DEFAULT_SMALL_ELEMENT: u32 = 3;
const DEFAULT_LARGE_ELEMENT: u32 = 7;
const DEFAULT_BLUR_KERNEL: u32 = 7;
const DEFAULT_TELEMETRY_SECS: u64 = 5;

/// PASCAL VOC classes, as emitted by DeepLab-style segmentation models.
pub const VOC_LABELS: [&str; 21] = [
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "dining table",
    "dog",
    "horse",
    "motorbike",
    "person",
    "potted plant",
    "sheep",
    "sofa",
    "train",
    "tv",
];

#[derive(Debug, Deserialize, Default)]
struct BackdropConfigFile {
    capture: Option<CaptureConfigFile>,
    output: Option<OutputConfigFile>,
    background: Option<String>,
    detector: Option<DetectorConfigFile>,
    refine: Option<RefineConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    signal: Option<String>,
    input_size: Option<u32>,
    layout: Option<String>,
    normalization: Option<String>,
    labels: Option<Vec<String>>,
    foreground_label: Option<String>,
    score_cutoff: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RefineConfigFile {
    denoise: Option<bool>,
    blur: Option<bool>,
    small_element: Option<u32>,
    large_element: Option<u32>,
    blur_kernel: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BackdropConfig {
    pub capture: CaptureSettings,
    pub output: OutputSettings,
    /// Still image (`.png`, `.jpg`, `.jpeg`) or any capture source.
    pub background: String,
    pub detector: DetectorSettings,
    pub refine: RefineSettings,
    pub telemetry_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Requested device rate. Pacing always follows the rate the source reports.
    pub fps: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// Tensor memory order of model inputs and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

/// How 8-bit pixels are mapped to model input floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputNormalization {
    /// `x / 128 - 1`, range [-1, 1].
    Signed,
    /// `x / 255`, range [0, 1].
    Unit,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// Required signal shape; `None` accepts whatever the backend produces.
    pub signal: Option<SignalKind>,
    pub input_size: u32,
    pub layout: TensorLayout,
    pub normalization: InputNormalization,
    pub labels: Vec<String>,
    pub foreground_label: String,
    pub score_cutoff: f32,
}

impl DetectorSettings {
    /// Index of the foreground class within `labels`.
    pub fn foreground_class(&self) -> Result<usize> {
        self.labels
            .iter()
            .position(|label| label == &self.foreground_label)
            .ok_or_else(|| {
                anyhow!(
                    "foreground label '{}' is not in the label list",
                    self.foreground_label
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineSettings {
    pub denoise: bool,
    pub blur: bool,
    pub small_element: u32,
    pub large_element: u32,
    pub blur_kernel: u32,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            denoise: true,
            blur: true,
            small_element: DEFAULT_SMALL_ELEMENT,
            large_element: DEFAULT_LARGE_ELEMENT,
            blur_kernel: DEFAULT_BLUR_KERNEL,
        }
    }
}

impl BackdropConfig {
    /// Load from `BACKDROP_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BACKDROP_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a JSON document without consulting the environment.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: BackdropConfigFile =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BackdropConfigFile) -> Result<Self> {
        let output_file = file.output.unwrap_or_default();
        let output = OutputSettings {
            device: output_file
                .device
                .unwrap_or_else(|| DEFAULT_OUTPUT_DEVICE.to_string()),
            width: output_file.width.unwrap_or(DEFAULT_WIDTH),
            height: output_file.height.unwrap_or(DEFAULT_HEIGHT),
        };

        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            source: capture_file
                .source
                .unwrap_or_else(|| DEFAULT_CAPTURE_SOURCE.to_string()),
            width: capture_file.width.unwrap_or(output.width),
            height: capture_file.height.unwrap_or(output.height),
            fps: capture_file.fps,
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: detector_file.model_path,
            signal: detector_file
                .signal
                .as_deref()
                .map(parse_signal)
                .transpose()?,
            input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            layout: match detector_file.layout.as_deref() {
                Some(name) => parse_layout(name)?,
                None => TensorLayout::Nhwc,
            },
            normalization: match detector_file.normalization.as_deref() {
                Some(name) => parse_normalization(name)?,
                None => InputNormalization::Signed,
            },
            labels: detector_file
                .labels
                .unwrap_or_else(|| VOC_LABELS.iter().map(|l| l.to_string()).collect()),
            foreground_label: detector_file
                .foreground_label
                .unwrap_or_else(|| DEFAULT_FOREGROUND_LABEL.to_string()),
            score_cutoff: detector_file.score_cutoff.unwrap_or(DEFAULT_SCORE_CUTOFF),
        };

        let refine_file = file.refine.unwrap_or_default();
        let defaults = RefineSettings::default();
        let refine = RefineSettings {
            denoise: refine_file.denoise.unwrap_or(defaults.denoise),
            blur: refine_file.blur.unwrap_or(defaults.blur),
            small_element: refine_file.small_element.unwrap_or(defaults.small_element),
            large_element: refine_file.large_element.unwrap_or(defaults.large_element),
            blur_kernel: refine_file.blur_kernel.unwrap_or(defaults.blur_kernel),
        };

        Ok(Self {
            capture,
            output,
            background: file
                .background
                .unwrap_or_else(|| DEFAULT_BACKGROUND.to_string()),
            detector,
            refine,
            telemetry_interval: Duration::from_secs(
                file.telemetry
                    .and_then(|t| t.interval_secs)
                    .unwrap_or(DEFAULT_TELEMETRY_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = non_empty_env("BACKDROP_CAPTURE") {
            self.capture.source = source;
        }
        if let Some(device) = non_empty_env("BACKDROP_OUTPUT") {
            self.output.device = device;
        }
        if let Some(background) = non_empty_env("BACKDROP_BACKGROUND") {
            self.background = background;
        }
        if let Some(backend) = non_empty_env("BACKDROP_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(model) = non_empty_env("BACKDROP_MODEL") {
            self.detector.model_path = Some(PathBuf::from(model));
        }
        if let Some(width) = non_empty_env("BACKDROP_WIDTH") {
            let width: u32 = width
                .parse()
                .map_err(|_| anyhow!("BACKDROP_WIDTH must be an integer"))?;
            self.output.width = width;
            self.capture.width = width;
        }
        if let Some(height) = non_empty_env("BACKDROP_HEIGHT") {
            let height: u32 = height
                .parse()
                .map_err(|_| anyhow!("BACKDROP_HEIGHT must be an integer"))?;
            self.output.height = height;
            self.capture.height = height;
        }
        // Presence toggles: any value disables the stage.
        if std::env::var_os("BACKDROP_NODENOISE").is_some() {
            self.refine.denoise = false;
        }
        if std::env::var_os("BACKDROP_NOBLUR").is_some() {
            self.refine.blur = false;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.output.width == 0 || self.output.height == 0 {
            return Err(anyhow!("output geometry must be non-zero"));
        }
        if self.output.width % 2 != 0 || self.output.height % 2 != 0 {
            return Err(anyhow!(
                "output geometry {}x{} must be even for I420 output",
                self.output.width,
                self.output.height
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture geometry must be non-zero"));
        }
        for (name, size) in [
            ("small_element", self.refine.small_element),
            ("large_element", self.refine.large_element),
            ("blur_kernel", self.refine.blur_kernel),
        ] {
            if size == 0 || size % 2 == 0 {
                return Err(anyhow!("refine.{} must be odd, got {}", name, size));
            }
        }
        if !(0.0..=1.0).contains(&self.detector.score_cutoff) {
            return Err(anyhow!("detector.score_cutoff must be within [0, 1]"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be non-zero"));
        }
        self.detector.foreground_class()?;
        if matches!(self.detector.backend.as_str(), "tract" | "face")
            && self.detector.model_path.is_none()
        {
            return Err(anyhow!(
                "the {} backend requires detector.model_path",
                self.detector.backend
            ));
        }
        if self.telemetry_interval.is_zero() {
            return Err(anyhow!("telemetry interval must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<BackdropConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_signal(name: &str) -> Result<SignalKind> {
    match name {
        "class_probability" => Ok(SignalKind::ClassProbability),
        "bounded_score" => Ok(SignalKind::BoundedScore),
        "regions" => Ok(SignalKind::Regions),
        other => Err(anyhow!("unknown detector signal '{}'", other)),
    }
}

fn parse_layout(name: &str) -> Result<TensorLayout> {
    match name {
        "nhwc" => Ok(TensorLayout::Nhwc),
        "nchw" => Ok(TensorLayout::Nchw),
        other => Err(anyhow!("unknown tensor layout '{}'", other)),
    }
}

fn parse_normalization(name: &str) -> Result<InputNormalization> {
    match name {
        "signed" => Ok(InputNormalization::Signed),
        "unit" => Ok(InputNormalization::Unit),
        other => Err(anyhow!("unknown input normalization '{}'", other)),
    }
}
