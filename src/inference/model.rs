//! Classifier model abstraction.

use super::{InputTensor, PreprocessError, TensorLayout};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Input side used by image classifiers exported for the browser.
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Errors from a single classification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("model backend failed: {0}")]
    Backend(String),
    #[error("model returned {got} scores for {expected} labels")]
    OutputMismatch { got: usize, expected: usize },
    #[error("model returned no scores")]
    EmptyOutput,
}

/// A loaded, immutable multi-class image classifier.
///
/// Shared read-only across calls once loaded.
#[async_trait]
pub trait ClassifierModel: Send + Sync {
    /// Side length of the square RGB input.
    fn input_size(&self) -> u32;

    /// Class labels, in output order.
    fn labels(&self) -> &[String];

    fn layout(&self) -> TensorLayout {
        TensorLayout::Nhwc
    }

    /// Number of scores per forward pass, when known without running one.
    fn output_len(&self) -> Option<usize> {
        None
    }

    /// Runs a forward pass, returning one score per label.
    ///
    /// Takes the input by value; its buffer is freed when the call returns.
    async fn predict(&self, input: InputTensor) -> Result<Vec<f32>, InferenceError>;
}

/// Mock model producing deterministic scores.
///
/// Without scripted scores, each label scores the mean of one RGB channel
/// (label `i` uses channel `i % 3`), normalized to sum to one.
#[derive(Debug)]
pub struct MockModel {
    labels: Vec<String>,
    input_size: u32,
    scripted: Mutex<VecDeque<Result<Vec<f32>, InferenceError>>>,
    fixed: Option<Vec<f32>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockModel {
    pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            input_size: DEFAULT_INPUT_SIZE,
            scripted: Mutex::new(VecDeque::new()),
            fixed: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size;
        self
    }

    /// Returns `scores` from every unscripted call.
    pub fn with_scores(mut self, scores: Vec<f32>) -> Self {
        self.fixed = Some(scores);
        self
    }

    /// Makes every call take `delay` before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues the result of the next unscripted call.
    pub fn push_scores(&self, scores: Vec<f32>) {
        self.scripted.lock().push_back(Ok(scores));
    }

    /// Queues a failure for the next unscripted call.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.scripted
            .lock()
            .push_back(Err(InferenceError::Backend(message.into())));
    }

    /// Number of `predict` calls started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn derived_scores(&self, input: &InputTensor) -> Vec<f32> {
        let means = input.channel_means();
        let weights: Vec<f32> = (0..self.labels.len())
            .map(|i| means[i % 3] + 1e-3)
            .collect();
        let total: f32 = weights.iter().sum();
        weights.into_iter().map(|w| w / total).collect()
    }
}

#[async_trait]
impl ClassifierModel for MockModel {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn output_len(&self) -> Option<usize> {
        self.fixed.as_ref().map(Vec::len)
    }

    async fn predict(&self, input: InputTensor) -> Result<Vec<f32>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.scripted.lock().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        match &self.fixed {
            Some(scores) => Ok(scores.clone()),
            None => Ok(self.derived_scores(&input)),
        }
    }
}
