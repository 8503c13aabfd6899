//! Video-to-prediction pipeline
//!
//! Decodes a bounded run of frames from an uploaded video, classifies the
//! first frame with the preloaded model, and turns the model output into a
//! REAL/FAKE label whose confidence is always at least 0.5.
//!
//! The decoder and classifier are injected handles so the hosting process
//! owns their lifetime.

pub mod classifier;
pub mod frames;

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use classifier::{Classifier, OnnxClassifier, OutputHead};
pub use frames::{ChannelOrder, FfmpegDecoder, Frame, FrameSource, VideoDecoder};

/// Side length of the square model input
pub const FRAME_SIZE: u32 = 128;

/// Upper bound on frames decoded per video
pub const MAX_FRAMES: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// Missing, corrupt, or zero decodable frames
    #[error("{0}")]
    UnreadableMedia(String),

    /// Classifier call failed or returned an unusable output
    #[error("{0}")]
    InferenceFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Real,
    Fake,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Real => "REAL",
            Label::Fake => "FAKE",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline run. Persisting it is the caller's job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub label: Label,
    pub confidence: f64,
    pub inference_time_seconds: f64,
    pub model_identifier: String,
}

/// Decoded, preprocessed frames in stream order.
pub struct FrameBatch {
    frames: Vec<Frame>,
}

impl FrameBatch {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn first(&self) -> Option<&Frame> {
        self.frames.first()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_frames: usize,
    pub channel_order: ChannelOrder,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_frames: MAX_FRAMES,
            channel_order: ChannelOrder::default(),
        }
    }
}

impl PipelineOptions {
    /// `max_frames`, never above [`MAX_FRAMES`].
    pub fn frame_cap(&self) -> usize {
        self.max_frames.min(MAX_FRAMES)
    }
}

/// Pull frames until end of stream or `max_frames`, preprocessing each.
pub fn decode_batch(
    source: &mut dyn FrameSource,
    options: &PipelineOptions,
) -> Result<FrameBatch, InferenceError> {
    let cap = options.frame_cap();
    let mut frames = Vec::with_capacity(cap);

    while frames.len() < cap {
        match source.next_frame()? {
            Some(raw) => frames.push(raw.preprocess(FRAME_SIZE, options.channel_order)?),
            None => break,
        }
    }

    Ok(FrameBatch { frames })
}

/// Classify the first frame of `source`. `started` is the instant the
/// timing span began, normally just before the decoder was opened.
pub fn classify_source(
    source: &mut dyn FrameSource,
    classifier: &dyn Classifier,
    options: &PipelineOptions,
    started: Instant,
) -> Result<PredictionResult, InferenceError> {
    let batch = decode_batch(source, options)?;
    log::debug!("Decoded {} frame(s)", batch.len());

    // Only the first frame is classified.
    let frame = batch
        .first()
        .ok_or_else(|| InferenceError::UnreadableMedia("No frames extracted".to_string()))?;

    let output = classifier.predict(frame)?;
    let (label, confidence) = output.interpret();

    Ok(PredictionResult {
        label,
        confidence,
        inference_time_seconds: round_millis(started.elapsed()),
        model_identifier: classifier.model_id().to_string(),
    })
}

/// Seconds rounded to 3 decimal places.
pub fn round_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}

/// Decoder and classifier bundled for the request path.
pub struct Pipeline {
    decoder: Arc<dyn VideoDecoder>,
    classifier: Arc<dyn Classifier>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        decoder: Arc<dyn VideoDecoder>,
        classifier: Arc<dyn Classifier>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            decoder,
            classifier,
            options,
        }
    }

    pub fn model_id(&self) -> &str {
        self.classifier.model_id()
    }

    /// Run the whole pipeline on a stored video. Blocks the calling thread.
    pub fn predict(&self, path: &Path) -> Result<PredictionResult, InferenceError> {
        let started = Instant::now();
        let mut source = self.decoder.open(path, self.options.frame_cap())?;
        let result = classify_source(
            source.as_mut(),
            self.classifier.as_ref(),
            &self.options,
            started,
        );

        match &result {
            Ok(prediction) => log::info!(
                "Classified {} as {} ({:.4}) in {:.3}s",
                path.display(),
                prediction.label,
                prediction.confidence,
                prediction.inference_time_seconds
            ),
            Err(e) => log::warn!("Prediction failed for {}: {}", path.display(), e),
        }

        result
    }
}
