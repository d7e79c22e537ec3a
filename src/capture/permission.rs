//! Camera permission negotiation.
//!
//! Permission is read through a non-intrusive query and, when that is
//! inconclusive, requested by opening and immediately closing a probe
//! stream. Native failures are mapped onto a fixed taxonomy so callers
//! never have to inspect platform error names.

use super::{CaptureDevice, ConstraintProfile, NativeError, StreamGuard};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Last known camera permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// Classification of a native capture failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    DeniedByUser,
    NoDevice,
    UnsupportedPlatform,
    DeviceBusy,
    OverConstrained,
    Other,
}

impl FailureKind {
    /// Maps a native error onto the taxonomy by its error name.
    ///
    /// Unrecognized names map to [`FailureKind::Other`].
    pub fn classify(error: &NativeError) -> Self {
        match error.name.as_str() {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                FailureKind::DeniedByUser
            }
            "NotFoundError" | "DevicesNotFoundError" => FailureKind::NoDevice,
            "NotSupportedError" | "TypeError" => FailureKind::UnsupportedPlatform,
            "NotReadableError" | "TrackStartError" | "AbortError" => FailureKind::DeviceBusy,
            "OverconstrainedError" | "ConstraintNotSatisfiedError" => {
                FailureKind::OverConstrained
            }
            _ => FailureKind::Other,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::DeniedByUser => "denied-by-user",
            FailureKind::NoDevice => "no-device",
            FailureKind::UnsupportedPlatform => "unsupported-platform",
            FailureKind::DeviceBusy => "device-busy",
            FailureKind::OverConstrained => "over-constrained",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Result of an explicit permission request.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionOutcome {
    Granted,
    Refused {
        reason: FailureKind,
        message: String,
    },
}

impl PermissionOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionOutcome::Granted)
    }
}

/// Queries and requests camera permission.
///
/// The negotiator is the only writer of the [`PermissionState`]; everyone
/// else reads it through [`PermissionNegotiator::state`].
pub struct PermissionNegotiator {
    device: Arc<dyn CaptureDevice>,
    state: Mutex<PermissionState>,
}

impl PermissionNegotiator {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            state: Mutex::new(PermissionState::Unknown),
        }
    }

    /// Returns the last known permission state.
    pub fn state(&self) -> PermissionState {
        *self.state.lock()
    }

    /// Reads the permission without prompting.
    ///
    /// Best effort: an unsupported query yields `Unknown` and leaves the
    /// stored state untouched.
    pub async fn query(&self) -> PermissionState {
        match self.device.query_permission().await {
            Ok(state) => {
                tracing::debug!(?state, "Camera permission queried");
                if state != PermissionState::Unknown {
                    *self.state.lock() = state;
                }
                state
            }
            Err(e) => {
                tracing::debug!(error = %e, "Camera permission query unsupported");
                PermissionState::Unknown
            }
        }
    }

    /// Requests camera permission.
    ///
    /// A conclusive query answer is returned without prompting. Otherwise
    /// a permissive probe stream is opened and closed again before this
    /// call returns, on every path.
    pub async fn request(&self) -> PermissionOutcome {
        match self.query().await {
            PermissionState::Granted => return PermissionOutcome::Granted,
            PermissionState::Denied => {
                return PermissionOutcome::Refused {
                    reason: FailureKind::DeniedByUser,
                    message: "camera access is blocked in the platform settings".to_string(),
                }
            }
            PermissionState::Unknown => {}
        }

        let probe = ConstraintProfile::permissive("permission-probe");
        let outcome = match self.device.request_stream(&probe).await {
            Ok(stream) => {
                // Dropping the guard stops the probe's tracks.
                drop(StreamGuard::new(stream));
                PermissionOutcome::Granted
            }
            Err(e) => PermissionOutcome::Refused {
                reason: FailureKind::classify(&e),
                message: e.to_string(),
            },
        };

        // Only a user refusal says anything about the permission itself.
        match &outcome {
            PermissionOutcome::Granted => *self.state.lock() = PermissionState::Granted,
            PermissionOutcome::Refused {
                reason: FailureKind::DeniedByUser,
                ..
            } => *self.state.lock() = PermissionState::Denied,
            PermissionOutcome::Refused { .. } => {}
        }

        match &outcome {
            PermissionOutcome::Granted => tracing::info!("Camera permission granted"),
            PermissionOutcome::Refused { reason, message } => {
                tracing::warn!(%reason, %message, "Camera permission refused")
            }
        }

        outcome
    }
}
