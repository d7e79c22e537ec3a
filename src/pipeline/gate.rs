//! Confidence gating for displayed predictions.
//!
//! Ambient camera predictions are noisy, so only confident ones reach the
//! view. A still image is a deliberate user action and is always shown.

use crate::inference::Prediction;
use serde::{Deserialize, Serialize};

/// Default minimum confidence for ambient predictions (exclusive).
pub const DEFAULT_THRESHOLD: f32 = 0.70;

/// Where a prediction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatePath {
    /// Periodic sampling of the live camera.
    Ambient,
    /// Still image or explicit snapshot.
    SingleShot,
}

/// What the view should do with a prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Show(Prediction),
    /// Clear the displayed result rather than leave it stale.
    Clear,
}

impl GateDecision {
    pub fn is_shown(&self) -> bool {
        matches!(self, GateDecision::Show(_))
    }
}

/// Threshold filter for the ambient path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceGate {
    /// Ambient predictions must be strictly above this.
    pub threshold: f32,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl ConfidenceGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Decides whether `prediction` is displayed.
    pub fn decide(&self, path: GatePath, prediction: Prediction) -> GateDecision {
        match path {
            GatePath::SingleShot => GateDecision::Show(prediction),
            GatePath::Ambient if prediction.confidence > self.threshold => {
                GateDecision::Show(prediction)
            }
            GatePath::Ambient => {
                tracing::trace!(
                    label = %prediction.label,
                    confidence = prediction.confidence,
                    threshold = self.threshold,
                    "Ambient prediction suppressed"
                );
                GateDecision::Clear
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn prediction(confidence: f32) -> Prediction {
        Prediction {
            label: "Person 1".to_string(),
            confidence,
        }
    }

    #[test]
    fn test_ambient_boundary_is_strict() {
        let gate = ConfidenceGate::default();

        assert_eq!(gate.decide(GatePath::Ambient, prediction(0.70)), GateDecision::Clear);
        assert_eq!(
            gate.decide(GatePath::Ambient, prediction(0.71)),
            GateDecision::Show(prediction(0.71))
        );
    }

    #[test]
    fn test_single_shot_always_shows() {
        let gate = ConfidenceGate::default();

        assert!(gate.decide(GatePath::SingleShot, prediction(0.05)).is_shown());
        assert!(!gate.decide(GatePath::Ambient, prediction(0.05)).is_shown());
    }

    #[test]
    fn test_custom_threshold() {
        let gate = ConfidenceGate::new(0.5);
        assert!(gate.decide(GatePath::Ambient, prediction(0.55)).is_shown());
    }

    proptest! {
        #[test]
        fn prop_ambient_shows_iff_above_threshold(confidence in 0.0f32..=1.0) {
            let decision =
                ConfidenceGate::default().decide(GatePath::Ambient, prediction(confidence));
            prop_assert_eq!(decision.is_shown(), confidence > DEFAULT_THRESHOLD);
        }
    }
}
