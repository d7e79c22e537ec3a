//! Stream acquisition over a constraint-profile fallback ladder.

use super::{
    CaptureDevice, ConstraintProfile, DeviceClass, FailureKind, NativeError, ProfileTable,
    StreamGuard, VideoStream,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default bound on the wait for stream metadata.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that end an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AcquisitionError {
    #[error("all {attempts} constraint profiles failed, last with {kind}: {last}")]
    Exhausted {
        attempts: usize,
        kind: FailureKind,
        last: NativeError,
    },
    #[error("stream-not-ready: profile {profile} produced no metadata within {timeout:?}")]
    StreamNotReady { profile: String, timeout: Duration },
    #[error("no constraint profiles configured for device class {0}")]
    EmptyLadder(DeviceClass),
}

/// A stream that opened and reported readiness.
pub struct Acquired {
    pub stream: Arc<dyn VideoStream>,
    /// Profile the stream was opened with.
    pub profile: ConstraintProfile,
    /// Number of profiles tried, including the successful one.
    pub attempts: usize,
}

impl std::fmt::Debug for Acquired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquired")
            .field("profile", &self.profile.name)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Opens a camera stream by walking the ladder for a device class.
pub struct CameraAcquirer {
    device: Arc<dyn CaptureDevice>,
    profiles: ProfileTable,
    ready_timeout: Duration,
}

impl CameraAcquirer {
    pub fn new(device: Arc<dyn CaptureDevice>, profiles: ProfileTable) -> Self {
        Self {
            device,
            profiles,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Tries each profile of the ladder in order.
    ///
    /// Fails only after the last profile fails, carrying the last native
    /// error. Once a profile opens, the stream must become ready within the
    /// configured timeout or it is closed and the attempt ends.
    pub async fn acquire(&self, class: DeviceClass) -> Result<Acquired, AcquisitionError> {
        let ladder = self.profiles.ladder(class);
        let mut last_error = None;

        for (index, profile) in ladder.iter().enumerate() {
            let attempts = index + 1;
            tracing::debug!(
                %class,
                profile = %profile.name,
                attempt = attempts,
                "Requesting stream"
            );

            let stream = match self.device.request_stream(profile).await {
                Ok(stream) => StreamGuard::new(stream),
                Err(e) => {
                    tracing::warn!(
                        profile = %profile.name,
                        kind = %FailureKind::classify(&e),
                        error = %e,
                        "Constraint profile rejected"
                    );
                    last_error = Some(e);
                    continue;
                }
            };

            if tokio::time::timeout(self.ready_timeout, stream.wait_ready())
                .await
                .is_err()
            {
                tracing::warn!(
                    profile = %profile.name,
                    timeout = ?self.ready_timeout,
                    "Stream metadata never arrived, closing stream"
                );
                // `stream` is dropped here, closing the partial stream.
                return Err(AcquisitionError::StreamNotReady {
                    profile: profile.name.clone(),
                    timeout: self.ready_timeout,
                });
            }

            tracing::info!(profile = %profile.name, attempts, "Camera stream acquired");
            return Ok(Acquired {
                stream: stream.release(),
                profile: profile.clone(),
                attempts,
            });
        }

        match last_error {
            Some(last) => {
                let kind = FailureKind::classify(&last);
                tracing::warn!(attempts = ladder.len(), %kind, "Constraint ladder exhausted");
                Err(AcquisitionError::Exhausted {
                    attempts: ladder.len(),
                    kind,
                    last,
                })
            }
            None => Err(AcquisitionError::EmptyLadder(class)),
        }
    }
}
