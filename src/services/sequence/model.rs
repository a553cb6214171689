/// Multi-task Sequence Model
///
/// Condenses a fixed-length window of normalized ratings into three task
/// outputs: a genre distribution, a rating estimate on [0, 10], and a
/// session-type classification. Loads an ONNX-exported artifact via
/// tract-onnx; falls back to a deterministic heuristic forward pass when no
/// artifact is available, so prediction never fails for lack of a model.
use super::{Result, SequenceError};
use ndarray::Array1;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use tract_onnx::prelude::{tvec, Framework, InferenceModelExt, IntoTValue, Tensor};

/// Number of session-type classes (binge, casual, explorer).
const SESSION_CLASSES: usize = 3;

/// Model input assembled by the predictor from a user's enriched history.
#[derive(Debug, Clone)]
pub struct ModelInput {
    /// Normalized rating window, oldest first, zero-padded at the front.
    pub window: Vec<f64>,
    /// Recency-weighted genre counts aligned with the vocabulary.
    pub genre_affinity: Vec<f64>,
    /// Average minutes between consecutive ratings, when observable.
    pub avg_gap_minutes: Option<f64>,
    /// Number of observed inter-rating gaps.
    pub gap_count: usize,
}

/// Forward-pass output, one entry per task head.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Probability per vocabulary genre; sums to 1.
    pub genre_probs: Vec<f64>,
    /// Rating estimate clamped to [0, 10].
    pub rating: f64,
    /// Probabilities for [binge, casual, explorer]; sums to 1.
    pub session_probs: [f64; 3],
}

type OnnxPlan = tract_onnx::prelude::SimplePlan<
    tract_onnx::prelude::TypedFact,
    Box<dyn tract_onnx::prelude::TypedOp>,
    tract_onnx::prelude::Graph<
        tract_onnx::prelude::TypedFact,
        Box<dyn tract_onnx::prelude::TypedOp>,
    >,
>;

#[derive(Debug, Clone, Copy)]
enum ModelKind {
    Onnx,
    Heuristic,
}

/// Sequence model handle. Owned by the serving component and swapped
/// atomically on retrain; never a module-level global.
pub struct SequenceModel {
    model: Option<Arc<OnnxPlan>>,
    kind: ModelKind,
    sequence_length: usize,
    genre_vocab_size: usize,
    rating_scale: f64,
    binge_gap_minutes: f64,
    binge_min_gaps: usize,
}

impl SequenceModel {
    /// Load an ONNX artifact, falling back to the heuristic forward pass if
    /// the file is missing or fails to load.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        sequence_length: usize,
        genre_vocab_size: usize,
        rating_scale: f64,
        binge_gap_minutes: f64,
        binge_min_gaps: usize,
    ) -> Self {
        let path = model_path.as_ref();
        match Self::try_load_onnx(path) {
            Ok(plan) => {
                debug!("loaded ONNX sequence model from {}", path.display());
                Self {
                    model: Some(Arc::new(plan)),
                    kind: ModelKind::Onnx,
                    sequence_length,
                    genre_vocab_size,
                    rating_scale,
                    binge_gap_minutes,
                    binge_min_gaps,
                }
            }
            Err(e) => {
                warn!(
                    "failed to load sequence model from {}: {}; using heuristic forward pass",
                    path.display(),
                    e
                );
                Self::heuristic(
                    sequence_length,
                    genre_vocab_size,
                    rating_scale,
                    binge_gap_minutes,
                    binge_min_gaps,
                )
            }
        }
    }

    /// Deterministic heuristic model (no artifact required).
    pub fn heuristic(
        sequence_length: usize,
        genre_vocab_size: usize,
        rating_scale: f64,
        binge_gap_minutes: f64,
        binge_min_gaps: usize,
    ) -> Self {
        Self {
            model: None,
            kind: ModelKind::Heuristic,
            sequence_length,
            genre_vocab_size,
            rating_scale,
            binge_gap_minutes,
            binge_min_gaps,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.kind, ModelKind::Onnx)
    }

    /// Run the forward pass over one window.
    pub fn predict(&self, input: &ModelInput) -> Result<ModelOutput> {
        if input.window.len() != self.sequence_length {
            return Err(SequenceError::InvalidWindow(format!(
                "expected window of length {}, got {}",
                self.sequence_length,
                input.window.len()
            )));
        }

        match self.kind {
            ModelKind::Onnx => self.predict_onnx(input),
            ModelKind::Heuristic => Ok(self.predict_heuristic(input)),
        }
    }

    /// ONNX inference. The artifact takes the (1, sequence_length) rating
    /// window and emits a single flat vector laid out as
    /// [genre logits | rating | session logits].
    fn predict_onnx(&self, input: &ModelInput) -> Result<ModelOutput> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| SequenceError::Inference("ONNX model not loaded".to_string()))?;

        let input_tensor = tract_onnx::prelude::tract_ndarray::Array2::from_shape_fn(
            (1, self.sequence_length),
            |(_, j)| input.window[j] as f32,
        );

        let inputs = tvec![Tensor::from(input_tensor.into_dyn()).into_tvalue()];
        let outputs = model
            .run(inputs)
            .map_err(|e| SequenceError::Inference(format!("ONNX inference failed: {}", e)))?;

        let flat = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| SequenceError::Inference(format!("output extraction failed: {}", e)))?;
        let flat: Vec<f64> = flat.iter().map(|&v| v as f64).collect();

        let expected = self.genre_vocab_size + 1 + SESSION_CLASSES;
        if flat.len() != expected {
            return Err(SequenceError::Inference(format!(
                "expected {} outputs, got {}",
                expected,
                flat.len()
            )));
        }

        let genre_probs = softmax(&flat[..self.genre_vocab_size]);
        let rating = (flat[self.genre_vocab_size] * self.rating_scale).clamp(0.0, self.rating_scale);
        let session = softmax(&flat[self.genre_vocab_size + 1..]);

        Ok(ModelOutput {
            genre_probs,
            rating,
            session_probs: [session[0], session[1], session[2]],
        })
    }

    /// Heuristic forward pass used when no trained artifact is loaded.
    ///
    /// - genre head: softmax over the recency-weighted genre affinities
    /// - rating head: recency-weighted mean of the window, rescaled
    /// - session head: the inter-event gap heuristic (binge/casual); the
    ///   explorer class keeps a small floor probability but is never argmax
    fn predict_heuristic(&self, input: &ModelInput) -> ModelOutput {
        let genre_probs = if input.genre_affinity.iter().any(|&a| a > 0.0) {
            softmax(&input.genre_affinity)
        } else {
            vec![1.0 / self.genre_vocab_size as f64; self.genre_vocab_size]
        };

        // Recency-weighted mean over observed (non-padding) entries.
        let observed: Vec<(usize, f64)> = input
            .window
            .iter()
            .enumerate()
            .filter(|(_, &v)| v > 0.0)
            .map(|(i, &v)| (i, v))
            .collect();
        let rating = if observed.is_empty() {
            0.75 * self.rating_scale
        } else {
            let weights = Array1::from_iter(observed.iter().map(|(i, _)| (*i + 1) as f64));
            let values = Array1::from_iter(observed.iter().map(|(_, v)| *v));
            let weighted = (&weights * &values).sum() / weights.sum();
            (weighted * self.rating_scale).clamp(0.0, self.rating_scale)
        };

        let binge = match input.avg_gap_minutes {
            Some(avg) => avg < self.binge_gap_minutes && input.gap_count > self.binge_min_gaps,
            None => false,
        };
        let session_probs = if binge {
            [0.8, 0.15, 0.05]
        } else {
            [0.1, 0.8, 0.1]
        };

        ModelOutput {
            genre_probs,
            rating,
            session_probs,
        }
    }

    fn try_load_onnx(path: &Path) -> std::result::Result<OnnxPlan, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Err(format!("model file not found: {}", path.display()).into());
        }

        let model = tract_onnx::onnx()
            .model_for_path(path)?
            .into_optimized()?
            .into_runnable()?;

        Ok(model)
    }
}

/// Numerically stable softmax.
fn softmax(logits: &[f64]) -> Vec<f64> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
