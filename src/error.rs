//! User-visible error taxonomy.
//!
//! Every failure that reaches the view is one of these. Per-frame
//! inference failures are not: they are logged and swallowed by the
//! sampler.

use crate::capture::{AcquisitionError, FailureKind};
use crate::inference::ModelUnavailable;
use serde::Serialize;
use thiserror::Error;

/// A failure surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "message", rename_all = "kebab-case")]
pub enum SessionError {
    /// The classifier could not be loaded. Fatal until reloaded.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// Camera access refused. Recoverable by an explicit retry only.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    /// No camera hardware. Still images remain usable.
    #[error("no camera available: {0}")]
    DeviceUnavailable(String),
    /// The platform cannot capture video at all.
    #[error("camera capture not supported on this platform: {0}")]
    UnsupportedPlatform(String),
    /// The camera is held by another application.
    #[error("camera is busy: {0}")]
    DeviceBusy(String),
    /// Every constraint profile was rejected.
    #[error("no camera configuration could be satisfied: {0}")]
    ConstraintUnsatisfiable(String),
    /// The stream opened but never delivered metadata.
    #[error("camera stream timed out: {0}")]
    StreamTimeout(String),
    #[error("camera error: {0}")]
    Other(String),
}

impl SessionError {
    /// Maps a native failure classification.
    pub fn from_kind(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            FailureKind::DeniedByUser => SessionError::PermissionDenied(message),
            FailureKind::NoDevice => SessionError::DeviceUnavailable(message),
            FailureKind::UnsupportedPlatform => SessionError::UnsupportedPlatform(message),
            FailureKind::DeviceBusy => SessionError::DeviceBusy(message),
            FailureKind::OverConstrained => SessionError::ConstraintUnsatisfiable(message),
            FailureKind::Other => SessionError::Other(message),
        }
    }

    /// Whether the user can sensibly try the same action again.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            SessionError::DeviceUnavailable(_) | SessionError::UnsupportedPlatform(_)
        )
    }

    /// Whether the camera path is unusable while still images keep working.
    pub fn blocks_camera(&self) -> bool {
        matches!(
            self,
            SessionError::DeviceUnavailable(_) | SessionError::UnsupportedPlatform(_)
        )
    }
}

impl From<AcquisitionError> for SessionError {
    fn from(error: AcquisitionError) -> Self {
        let message = error.to_string();
        match error {
            // The ladder itself is what failed when nothing more specific is known.
            AcquisitionError::Exhausted {
                kind: FailureKind::Other,
                ..
            } => SessionError::ConstraintUnsatisfiable(message),
            AcquisitionError::Exhausted { kind, .. } => SessionError::from_kind(kind, message),
            AcquisitionError::StreamNotReady { .. } => SessionError::StreamTimeout(message),
            AcquisitionError::EmptyLadder(_) => SessionError::ConstraintUnsatisfiable(message),
        }
    }
}

impl From<ModelUnavailable> for SessionError {
    fn from(error: ModelUnavailable) -> Self {
        SessionError::ModelUnavailable(error.to_string())
    }
}
