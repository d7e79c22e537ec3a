//! Frame classification.
//!
//! Wraps a loaded [`ClassifierModel`] with preprocessing and ranking.

use super::{preprocess, ClassifierModel, InferenceError, ResizeMode};
use crate::capture::Frame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single class label with its probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    /// Probability in `[0, 1]`.
    pub confidence: f32,
}

/// Class probabilities, highest first.
///
/// Never empty: a classification with no scores is an error.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPredictions {
    ranked: Vec<Prediction>,
}

impl RankedPredictions {
    /// Ranks `scores` against `labels`.
    ///
    /// Non-finite scores count as zero and every score is clamped to
    /// `[0, 1]`. Ties keep label order.
    fn rank(labels: &[String], scores: Vec<f32>) -> Result<Self, InferenceError> {
        if scores.is_empty() {
            return Err(InferenceError::EmptyOutput);
        }
        if scores.len() != labels.len() {
            return Err(InferenceError::OutputMismatch {
                got: scores.len(),
                expected: labels.len(),
            });
        }

        let mut ranked: Vec<Prediction> = labels
            .iter()
            .zip(scores)
            .map(|(label, score)| Prediction {
                label: label.clone(),
                confidence: if score.is_finite() {
                    score.clamp(0.0, 1.0)
                } else {
                    0.0
                },
            })
            .collect();

        // Stable, so equal scores stay in label order.
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        Ok(Self { ranked })
    }

    /// The argmax prediction.
    pub fn top(&self) -> &Prediction {
        &self.ranked[0]
    }

    pub fn into_top(mut self) -> Prediction {
        self.ranked.swap_remove(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
        self.ranked.iter()
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// Preprocesses frames and runs them through a shared model.
#[derive(Clone)]
pub struct Classifier {
    model: Arc<dyn ClassifierModel>,
    resize: ResizeMode,
}

impl Classifier {
    pub fn new(model: Arc<dyn ClassifierModel>, resize: ResizeMode) -> Self {
        Self { model, resize }
    }

    pub fn model(&self) -> &Arc<dyn ClassifierModel> {
        &self.model
    }

    pub fn labels(&self) -> &[String] {
        self.model.labels()
    }

    /// Classifies one frame.
    ///
    /// The input tensor is moved into the model, so it is freed as soon as
    /// the forward pass returns, whatever the outcome.
    pub async fn classify(&self, frame: &Frame) -> Result<RankedPredictions, InferenceError> {
        let input = preprocess(
            frame,
            self.model.input_size(),
            self.resize,
            self.model.layout(),
        )?;

        let scores = self.model.predict(input).await?;
        let ranked = RankedPredictions::rank(self.model.labels(), scores)?;

        tracing::trace!(
            frame = frame.sequence(),
            label = %ranked.top().label,
            confidence = ranked.top().confidence,
            "Frame classified"
        );

        Ok(ranked)
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("labels", &self.model.labels())
            .field("input_size", &self.model.input_size())
            .field("resize", &self.resize)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::MockModel;

    fn frame() -> Frame {
        Frame::new(vec![10u8; 8 * 6 * 3], 8, 6, 7)
    }

    fn build(model: MockModel) -> Classifier {
        Classifier::new(Arc::new(model.with_input_size(4)), ResizeMode::Stretch)
    }

    #[tokio::test]
    async fn test_ranked_highest_first() {
        let classifier = build(MockModel::new(["a", "b", "c"]).with_scores(vec![0.2, 0.7, 0.1]));
        let ranked = classifier.classify(&frame()).await.unwrap();

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked.top().label, "b");
        let order: Vec<&str> = ranked.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(ranked.into_top().confidence, 0.7);
    }

    #[tokio::test]
    async fn test_ties_keep_label_order() {
        let classifier = build(MockModel::new(["a", "b"]).with_scores(vec![0.5, 0.5]));
        let ranked = classifier.classify(&frame()).await.unwrap();
        assert_eq!(ranked.top().label, "a");
    }

    #[tokio::test]
    async fn test_scores_are_sanitized() {
        let classifier =
            build(MockModel::new(["a", "b", "c"]).with_scores(vec![f32::NAN, 1.5, -0.2]));
        let ranked = classifier.classify(&frame()).await.unwrap();

        assert_eq!(ranked.top().label, "b");
        assert_eq!(ranked.top().confidence, 1.0);
        assert!(ranked.iter().all(|p| (0.0..=1.0).contains(&p.confidence)));
    }

    #[tokio::test]
    async fn test_output_length_mismatch() {
        let classifier = build(MockModel::new(["a", "b"]).with_scores(vec![1.0]));
        assert_eq!(
            classifier.classify(&frame()).await,
            Err(InferenceError::OutputMismatch {
                got: 1,
                expected: 2
            })
        );

        let classifier = build(MockModel::new(["a"]).with_scores(vec![]));
        assert_eq!(
            classifier.classify(&frame()).await,
            Err(InferenceError::EmptyOutput)
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_is_inference_error() {
        let model = Arc::new(MockModel::new(["a"]).with_input_size(4));
        let classifier = Classifier::new(model.clone(), ResizeMode::Stretch);
        let bad = Frame::new(vec![0u8; 5], 8, 6, 0);

        assert!(matches!(
            classifier.classify(&bad).await,
            Err(InferenceError::Preprocess(_))
        ));
        assert_eq!(model.calls(), 0);
    }
}
