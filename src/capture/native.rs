//! Desktop capture backend built on `nokhwa`.
//!
//! `nokhwa` cameras are not `Send`, so each stream runs on its own worker
//! thread and hands frames over through a latest-frame slot. Facing mode
//! has no meaning for desktop webcams and is ignored.

use super::{CaptureDevice, ConstraintProfile, Frame, NativeError, PermissionState, VideoStream};
use async_trait::async_trait;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
};
use nokhwa::{Camera, NokhwaError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Frame rate requested alongside an ideal resolution.
const REQUESTED_FPS: u32 = 30;

fn native_error(error: &NokhwaError) -> NativeError {
    let name = match error {
        NokhwaError::OpenDeviceError { .. } | NokhwaError::OpenStreamError { .. } => {
            "NotReadableError"
        }
        NokhwaError::UnsupportedOperationError { .. }
        | NokhwaError::NotImplementedError { .. } => "NotSupportedError",
        NokhwaError::GetPropertyError { .. } | NokhwaError::SetPropertyError { .. } => {
            "OverconstrainedError"
        }
        _ => "UnknownError",
    };
    NativeError::new(name, error.to_string())
}

fn requested_format(profile: &ConstraintProfile) -> RequestedFormat<'static> {
    let kind = match profile.ideal_resolution() {
        Some((width, height)) => RequestedFormatType::Closest(CameraFormat::new_from(
            width,
            height,
            FrameFormat::MJPEG,
            REQUESTED_FPS,
        )),
        None => RequestedFormatType::AbsoluteHighestFrameRate,
    };
    RequestedFormat::new::<RgbFormat>(kind)
}

/// Capture device backed by a local webcam.
#[derive(Debug, Clone, Default)]
pub struct NativeCameraDevice {
    index: u32,
}

impl NativeCameraDevice {
    pub fn new(index: u32) -> Self {
        Self { index }
    }
}

#[async_trait]
impl CaptureDevice for NativeCameraDevice {
    async fn query_permission(&self) -> Result<PermissionState, NativeError> {
        if nokhwa::nokhwa_check() {
            Ok(PermissionState::Granted)
        } else {
            Ok(PermissionState::Unknown)
        }
    }

    async fn request_stream(
        &self,
        constraints: &ConstraintProfile,
    ) -> Result<Box<dyn VideoStream>, NativeError> {
        let devices = nokhwa::query(ApiBackend::Auto).map_err(|e| native_error(&e))?;
        if devices.is_empty() {
            return Err(NativeError::new("NotFoundError", "no camera attached"));
        }
        if constraints.facing_mode.is_some() {
            tracing::debug!(profile = %constraints.name, "Ignoring facing mode on desktop camera");
        }

        let shared = Arc::new(NativeShared::default());
        let (opened_tx, opened_rx) = oneshot::channel();
        let index = CameraIndex::Index(self.index);
        let format = requested_format(constraints);
        let worker_shared = Arc::clone(&shared);

        std::thread::Builder::new()
            .name("landmark-lens-camera".to_string())
            .spawn(move || capture_loop(index, format, worker_shared, opened_tx))
            .map_err(|e| NativeError::new("AbortError", e.to_string()))?;

        match opened_rx.await {
            Ok(Ok(())) => Ok(Box::new(NativeStream { shared })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(NativeError::new("AbortError", "capture thread exited")),
        }
    }
}

#[derive(Default)]
struct NativeShared {
    latest: Mutex<Option<Frame>>,
    sequence: AtomicU64,
    closed: AtomicBool,
}

fn capture_loop(
    index: CameraIndex,
    format: RequestedFormat<'static>,
    shared: Arc<NativeShared>,
    opened: oneshot::Sender<Result<(), NativeError>>,
) {
    let mut camera = match Camera::new(index, format).and_then(|mut camera| {
        camera.open_stream()?;
        Ok(camera)
    }) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = opened.send(Err(native_error(&e)));
            return;
        }
    };

    if opened.send(Ok(())).is_err() {
        // The requester went away before the stream opened.
        let _ = camera.stop_stream();
        return;
    }

    while !shared.closed.load(Ordering::SeqCst) {
        let decoded = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>());
        match decoded {
            Ok(rgb) => {
                let sequence = shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                let (width, height) = rgb.dimensions();
                *shared.latest.lock() = Some(Frame::new(rgb.into_raw(), width, height, sequence));
            }
            Err(e) => tracing::warn!(error = %e, "Failed to read camera frame"),
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!(error = %e, "Failed to stop camera stream");
    }
    tracing::debug!("Camera worker exited");
}

struct NativeStream {
    shared: Arc<NativeShared>,
}

#[async_trait]
impl VideoStream for NativeStream {
    fn is_ready(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst) && self.shared.latest.lock().is_some()
    }

    fn read_frame(&self) -> Result<Frame, NativeError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(NativeError::new("InvalidStateError", "stream is closed"));
        }
        self.shared
            .latest
            .lock()
            .clone()
            .ok_or_else(|| NativeError::new("InvalidStateError", "no frame decoded yet"))
    }

    fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Native camera stream closed");
        }
    }
}

impl Drop for NativeStream {
    fn drop(&mut self) {
        self.close();
    }
}
