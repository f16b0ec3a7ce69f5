//! ResNet-18 cancer classifier backed by tract.
//!
//! The weights are an ONNX export of a ResNet-18 whose final linear layer was
//! replaced with a 2-wide head. The plan is optimized once at startup and
//! then shared read-only between requests.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::io::Reader as ImageReader;
use image::DynamicImage;
use ndarray::Array4;
use tract_onnx::prelude::*;
use tracing::{debug, info};

use crate::config::Normalization;
use crate::error::ClassifierError;
use crate::models::Prediction;

pub const INPUT_SIZE: usize = 224;
const NUM_CLASSES: usize = 2;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Anything that can turn a staged image into a prediction.
pub trait Classify: Send + Sync + 'static {
    fn predict(&self, image_path: &Path) -> Result<Prediction, ClassifierError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierOptions {
    pub normalization: Normalization,
    /// Which of the two output logits scores the cancerous class.
    pub cancerous_index: usize,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            normalization: Normalization::Unit,
            cancerous_index: 1,
        }
    }
}

type Plan = TypedRunnableModel<TypedModel>;

pub struct OnnxClassifier {
    plan: Plan,
    options: ClassifierOptions,
}

impl OnnxClassifier {
    /// Loads and optimizes the model. Fails if the file is missing, cannot be
    /// parsed, or does not produce exactly two logits.
    pub fn load(
        model_path: impl AsRef<Path>,
        options: ClassifierOptions,
    ) -> Result<Self, ClassifierError> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(ClassifierError::ModelNotFound(path.display().to_string()));
        }

        let load_err = |source: TractError| ClassifierError::Load {
            path: path.display().to_string(),
            source,
        };

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(load_err)?
            .with_input_fact(0, f32::fact([1, 3, INPUT_SIZE, INPUT_SIZE]).into())
            .map_err(load_err)?
            .into_optimized()
            .map_err(load_err)?;

        let output_dims = model
            .output_fact(0)
            .map_err(load_err)?
            .shape
            .as_concrete()
            .map(|dims| dims.to_vec());
        match output_dims {
            Some(dims) if dims.last() == Some(&NUM_CLASSES) => {}
            other => {
                return Err(ClassifierError::ShapeMismatch {
                    expected: vec![1, NUM_CLASSES],
                    got: other.unwrap_or_default(),
                })
            }
        }

        let plan = model.into_runnable().map_err(load_err)?;

        info!(
            model = %path.display(),
            input_size = INPUT_SIZE,
            normalization = ?options.normalization,
            cancerous_index = options.cancerous_index,
            "loaded classifier model"
        );

        Ok(Self { plan, options })
    }
}

impl Classify for OnnxClassifier {
    fn predict(&self, image_path: &Path) -> Result<Prediction, ClassifierError> {
        let img = ImageReader::open(image_path)?
            .with_guessed_format()?
            .decode()?;

        let input = preprocess(&img, self.options.normalization);
        let shape = input.shape().to_vec();
        let tensor =
            Tensor::from_shape(&shape, &input.into_raw_vec()).map_err(ClassifierError::Runtime)?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(ClassifierError::Runtime)?;

        let logits: Vec<f32> = outputs[0]
            .to_array_view::<f32>()
            .map_err(ClassifierError::Runtime)?
            .iter()
            .copied()
            .collect();
        if logits.len() != NUM_CLASSES {
            return Err(ClassifierError::ShapeMismatch {
                expected: vec![1, NUM_CLASSES],
                got: outputs[0].shape().to_vec(),
            });
        }
        debug!(?logits, "forward pass complete");

        Ok(interpret(&logits, self.options.cancerous_index))
    }
}

/// RGB conversion, exact resize to the network input, then NCHW layout with
/// the requested scaling.
pub fn preprocess(img: &DynamicImage, normalization: Normalization) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let resized = imageops::resize(
        &rgb,
        INPUT_SIZE as u32,
        INPUT_SIZE as u32,
        FilterType::Triangle,
    );

    let (mean, std) = match normalization {
        Normalization::Unit => ([0.0; 3], [1.0; 3]),
        Normalization::Imagenet => (IMAGENET_MEAN, IMAGENET_STD),
    };

    let mut tensor = Array4::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let value = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
            tensor[[0, c, y as usize, x as usize]] = value;
        }
    }
    tensor
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn interpret(logits: &[f32], cancerous_index: usize) -> Prediction {
    let probs = softmax(logits);
    let cancerous = probs[cancerous_index];
    let non_cancerous = probs[1 - cancerous_index];
    Prediction::from_probabilities(cancerous, non_cancerous)
}
