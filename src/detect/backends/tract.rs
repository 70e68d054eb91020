use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::config::{DetectorSettings, InputNormalization, TensorLayout};
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{RawSignal, SignalKind};
use crate::frame::Frame;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract-based backend for ONNX segmentation models.
///
/// Takes a square RGB input and produces either per-class scores
/// (DeepLab-style) or a single foreground score channel (BodyPix-style).
pub struct TractBackend {
    model: Plan,
    size: u32,
    layout: TensorLayout,
    normalization: InputNormalization,
    kind: SignalKind,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, settings: &DetectorSettings) -> Result<Self> {
        let kind = settings.signal.unwrap_or(SignalKind::BoundedScore);
        if kind == SignalKind::Regions {
            return Err(anyhow!("tract backend produces dense scores, not regions"));
        }
        let model_path = model_path.as_ref();
        let size = settings.input_size as usize;
        let shape = match settings.layout {
            TensorLayout::Nhwc => tvec!(1, size, size, 3),
            TensorLayout::Nchw => tvec!(1, 3, size, size),
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractBackend: loaded {} ({}x{} {:?} {:?})",
            model_path.display(),
            size,
            size,
            settings.layout,
            kind
        );
        Ok(Self {
            model,
            size: settings.input_size,
            layout: settings.layout,
            normalization: settings.normalization,
            kind,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.dimensions() != (self.size, self.size) {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width(),
                frame.height(),
                self.size,
                self.size
            ));
        }
        let size = self.size as usize;
        let pixels = frame.data();
        let normalize: fn(u8) -> f32 = match self.normalization {
            InputNormalization::Signed => |v: u8| v as f32 / 128.0 - 1.0,
            InputNormalization::Unit => |v: u8| v as f32 / 255.0,
        };
        let tensor = match self.layout {
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
                    normalize(pixels[(y * size + x) * 3 + c])
                })
                .into_tensor()
            }
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
                    normalize(pixels[(y * size + x) * 3 + c])
                })
                .into_tensor()
            }
        };
        Ok(tensor)
    }

    fn extract_signal(&self, outputs: TVec<TValue>) -> Result<RawSignal> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 4 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let (height, width, classes) = match self.layout {
            TensorLayout::Nhwc => (shape[1], shape[2], shape[3]),
            TensorLayout::Nchw => (shape[2], shape[3], shape[1]),
        };

        // Position-major, class-minor.
        let mut scores = Vec::with_capacity(height * width * classes);
        for y in 0..height {
            for x in 0..width {
                for c in 0..classes {
                    let value = match self.layout {
                        TensorLayout::Nhwc => view[[0, y, x, c]],
                        TensorLayout::Nchw => view[[0, c, y, x]],
                    };
                    scores.push(value);
                }
            }
        }

        match self.kind {
            SignalKind::ClassProbability => Ok(RawSignal::ClassScores {
                width: width as u32,
                height: height as u32,
                classes,
                scores,
            }),
            _ => {
                if classes != 1 {
                    return Err(anyhow!(
                        "bounded-score model must emit one channel, got {}",
                        classes
                    ));
                }
                Ok(RawSignal::BoundedScores {
                    width: width as u32,
                    height: height as u32,
                    scores,
                })
            }
        }
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn signal_kind(&self) -> SignalKind {
        self.kind
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        Some((self.size, self.size))
    }

    fn infer(&mut self, frame: &Frame) -> Result<RawSignal> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_signal(outputs)
    }
}
