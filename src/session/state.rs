//! Presentation-facing session types: commands in, view state out.

use crate::capture::{Frame, PermissionState};
use crate::error::SessionError;
use crate::inference::Prediction;
use crate::pipeline::GatePath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one camera start.
///
/// Every asynchronous result carries the id of the session that started
/// it, so results arriving after that session ended can be recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn first() -> Self {
        SessionId(1)
    }

    pub fn next(self) -> Self {
        SessionId(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Camera lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    #[default]
    Idle,
    /// Permission or stream acquisition in progress.
    Requesting,
    /// A stream is open and being sampled.
    Active,
    Failed,
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CameraState::Idle => "idle",
            CameraState::Requesting => "requesting",
            CameraState::Active => "active",
            CameraState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Commands issued by the presentation layer.
#[derive(Debug, Clone)]
pub enum Command {
    /// Start the camera.
    Start,
    /// Stop the camera, or dismiss a failure.
    Stop,
    /// Ask for camera permission again after a refusal.
    RetryPermission,
    /// Classify a still image. Stops the camera if it is running.
    SelectImage(Frame),
    /// Classify the next live frame, bypassing the confidence gate.
    Capture,
    /// Clear the still-image result.
    ClearImage,
    /// Load the model again after a failed load.
    ReloadModel,
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ViewState {
    /// True while the model is loading.
    pub is_loading: bool,
    pub model_ready: bool,
    /// True while a still image is being classified.
    pub classifying: bool,
    pub permission: PermissionState,
    pub camera: CameraState,
    /// Displayed prediction. Replaced wholesale, never merged.
    pub prediction: Option<Prediction>,
    /// Confidence of the displayed prediction, zero when none.
    pub confidence: f32,
    pub prediction_source: Option<GatePath>,
    pub updated_at: Option<DateTime<Utc>>,
    pub error: Option<SessionError>,
}

impl ViewState {
    /// Label of the displayed prediction, if any.
    pub fn label(&self) -> Option<&str> {
        self.prediction.as_ref().map(|p| p.label.as_str())
    }
}
