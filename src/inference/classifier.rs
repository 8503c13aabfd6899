//! Classifier handle and output interpretation

use std::path::Path;
use tract_onnx::prelude::*;

use super::frames::Frame;
use super::{FRAME_SIZE, InferenceError, Label};

/// Slack allowed when checking that two class probabilities sum to 1
const SOFTMAX_SUM_TOLERANCE: f32 = 1e-3;

/// How the model's output vector is read, fixed when the model is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputHead {
    /// Two probabilities, index 0 = FAKE, index 1 = REAL
    TwoClassSoftmax,
    /// One REAL-probability score
    SigmoidScore,
}

impl OutputHead {
    /// Resolve from a concrete output shape such as `[1, 2]` or `[1, 1]`.
    pub fn from_output_shape(shape: &[usize]) -> Option<Self> {
        match shape.last() {
            Some(2) => Some(OutputHead::TwoClassSoftmax),
            Some(1) => Some(OutputHead::SigmoidScore),
            _ => None,
        }
    }

    fn width(&self) -> usize {
        match self {
            OutputHead::TwoClassSoftmax => 2,
            OutputHead::SigmoidScore => 1,
        }
    }

    /// Wrap a flat output vector in the variant this head expects.
    pub fn decode(&self, values: &[f32]) -> Result<ClassifierOutput, InferenceError> {
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(InferenceError::InferenceFailure(format!(
                "Classifier produced non-finite output {}",
                bad
            )));
        }

        if let Some(bad) = values.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(InferenceError::InferenceFailure(format!(
                "Classifier output {} is not a probability",
                bad
            )));
        }

        match (self, values) {
            (OutputHead::TwoClassSoftmax, [fake, real]) => {
                let sum = fake + real;
                if (sum - 1.0).abs() > SOFTMAX_SUM_TOLERANCE {
                    return Err(InferenceError::InferenceFailure(format!(
                        "Softmax outputs sum to {}, expected 1",
                        sum
                    )));
                }
                Ok(ClassifierOutput::TwoClassSoftmax([*fake, *real]))
            }
            (OutputHead::SigmoidScore, [score]) => Ok(ClassifierOutput::SigmoidScore(*score)),
            (head, other) => Err(InferenceError::InferenceFailure(format!(
                "{:?} head expects {} output(s), model returned {}",
                head,
                head.width(),
                other.len()
            ))),
        }
    }
}

impl std::str::FromStr for OutputHead {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "softmax" => Ok(OutputHead::TwoClassSoftmax),
            "sigmoid" => Ok(OutputHead::SigmoidScore),
            other => Err(format!("unknown output head: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassifierOutput {
    TwoClassSoftmax([f32; 2]),
    SigmoidScore(f32),
}

impl ClassifierOutput {
    /// Label plus the probability mass behind it, never below 0.5.
    pub fn interpret(&self) -> (Label, f64) {
        match *self {
            // argmax; a tie goes to index 0
            ClassifierOutput::TwoClassSoftmax([fake, real]) => {
                if real > fake {
                    (Label::Real, f64::from(real))
                } else {
                    (Label::Fake, f64::from(fake))
                }
            }
            ClassifierOutput::SigmoidScore(score) => {
                let score = f64::from(score);
                if score > 0.5 {
                    (Label::Real, score)
                } else {
                    (Label::Fake, 1.0 - score)
                }
            }
        }
    }
}

/// A loaded model. Shared read-only across requests.
pub trait Classifier: Send + Sync {
    /// Run the model on a single frame (batch of one).
    fn predict(&self, frame: &Frame) -> Result<ClassifierOutput, InferenceError>;

    /// Identifier reported with every prediction.
    fn model_id(&self) -> &str;
}

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// ONNX classifier taking NHWC `[1, 128, 128, 3]` float input.
pub struct OnnxClassifier {
    plan: OnnxPlan,
    head: OutputHead,
    model_id: String,
}

impl OnnxClassifier {
    /// Load and optimize the model. The output head comes from `head` when
    /// given, otherwise from the model's declared output shape.
    pub fn load(path: &Path, head: Option<OutputHead>) -> Result<Self, InferenceError> {
        let plan = build_plan(path).map_err(|e| {
            InferenceError::InferenceFailure(format!(
                "Failed to load model {}: {}",
                path.display(),
                e
            ))
        })?;

        let shape = plan
            .model()
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().map(|s| s.to_vec()));

        let head = match head {
            Some(head) => head,
            None => shape
                .as_deref()
                .and_then(OutputHead::from_output_shape)
                .ok_or_else(|| {
                    InferenceError::InferenceFailure(format!(
                        "Cannot resolve output head from shape {:?}; set MODEL_OUTPUT_HEAD",
                        shape
                    ))
                })?,
        };

        log::debug!("Model {} output shape {:?}", path.display(), shape);

        Ok(Self {
            plan,
            head,
            model_id: path.display().to_string(),
        })
    }

    pub fn head(&self) -> OutputHead {
        self.head
    }
}

fn build_plan(path: &Path) -> TractResult<OnnxPlan> {
    let size = FRAME_SIZE as usize;
    tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, f32::fact([1, size, size, 3]).into())?
        .into_optimized()?
        .into_runnable()
}

impl Classifier for OnnxClassifier {
    fn predict(&self, frame: &Frame) -> Result<ClassifierOutput, InferenceError> {
        let size = frame.size() as usize;
        if size != FRAME_SIZE as usize {
            return Err(InferenceError::InferenceFailure(format!(
                "Frame is {}x{}, model expects {}x{}",
                size, size, FRAME_SIZE, FRAME_SIZE
            )));
        }

        let input =
            tract_ndarray::Array4::from_shape_vec((1, size, size, 3), frame.as_slice().to_vec())
                .map_err(|e| InferenceError::InferenceFailure(e.to_string()))?
                .into_tensor();

        let outputs = self
            .plan
            .run(tvec!(input.into_tvalue()))
            .map_err(|e| InferenceError::InferenceFailure(format!("Model run failed: {}", e)))?;

        let output = outputs.first().ok_or_else(|| {
            InferenceError::InferenceFailure("Model produced no outputs".to_string())
        })?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::InferenceFailure(format!("Unexpected output: {}", e)))?;
        let values: Vec<f32> = view.iter().copied().collect();

        log::debug!("Raw classifier output: {:?}", values);

        self.head.decode(&values)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
