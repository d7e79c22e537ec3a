//! Device capture surface.
//!
//! This module provides a trait-based abstraction over the platform's
//! camera API, allowing for both native capture backends and a mock
//! implementation for testing. Errors keep the platform's own error
//! name so they can be classified deterministically.

use super::{ConstraintProfile, Frame, PermissionState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Interval used by the default [`VideoStream::wait_ready`] poll loop.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// An error reported by the platform capture API.
///
/// `name` carries the platform's error identifier (for example
/// `"NotAllowedError"` or `"NotReadableError"`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct NativeError {
    pub name: String,
    pub message: String,
}

impl NativeError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// A live video stream opened by a [`CaptureDevice`].
#[async_trait]
pub trait VideoStream: Send + Sync {
    /// Returns true once stream metadata has arrived and frames can be read.
    fn is_ready(&self) -> bool;

    /// Resolves when the stream becomes ready.
    ///
    /// Never resolves if the stream never becomes ready; callers race it
    /// against a timeout.
    async fn wait_ready(&self) {
        while !self.is_ready() {
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Reads the current frame.
    fn read_frame(&self) -> Result<Frame, NativeError>;

    /// Stops all tracks of the stream. Calling it more than once is a no-op.
    fn close(&self);
}

/// Platform camera API consumed by the permission negotiator and acquirer.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Reads the current camera permission without prompting the user.
    ///
    /// An error means the platform cannot answer the query.
    async fn query_permission(&self) -> Result<PermissionState, NativeError>;

    /// Opens a stream satisfying `constraints`.
    async fn request_stream(
        &self,
        constraints: &ConstraintProfile,
    ) -> Result<Box<dyn VideoStream>, NativeError>;
}

/// Closes the wrapped stream when dropped, unless released.
///
/// Every freshly opened stream goes through a guard so that early returns,
/// errors and cancelled futures cannot leak a running camera.
pub struct StreamGuard {
    stream: Arc<dyn VideoStream>,
    armed: bool,
}

impl StreamGuard {
    pub fn new(stream: Box<dyn VideoStream>) -> Self {
        Self {
            stream: Arc::from(stream),
            armed: true,
        }
    }

    /// Disarms the guard and hands the stream to the caller.
    pub fn release(mut self) -> Arc<dyn VideoStream> {
        self.armed = false;
        Arc::clone(&self.stream)
    }
}

impl Deref for StreamGuard {
    type Target = dyn VideoStream;

    fn deref(&self) -> &Self::Target {
        self.stream.as_ref()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.armed {
            self.stream.close();
        }
    }
}

/// Scripted behaviour of a [`MockDevice`].
#[derive(Debug, Clone)]
struct MockScript {
    permission: Result<PermissionState, NativeError>,
    outcomes: VecDeque<Result<(), NativeError>>,
    default_outcome: Result<(), NativeError>,
    open_delay: Duration,
    ready_after: Option<Duration>,
    frame_size: (u32, u32),
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            permission: Ok(PermissionState::Unknown),
            outcomes: VecDeque::new(),
            default_outcome: Ok(()),
            open_delay: Duration::ZERO,
            ready_after: Some(Duration::ZERO),
            frame_size: (64, 48),
        }
    }
}

#[derive(Debug, Default)]
struct MockShared {
    script: Mutex<MockScript>,
    attempts: Mutex<Vec<ConstraintProfile>>,
    open_streams: Arc<AtomicUsize>,
    streams_opened: AtomicUsize,
}

/// Mock capture device that generates synthetic frames.
///
/// Request outcomes, permission answers, and timing are scripted; every
/// request is recorded so tests can assert on the attempted profiles and
/// on the number of streams still open.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    shared: Arc<MockShared>,
}

impl MockDevice {
    /// Creates a device whose permission is not yet decided and whose
    /// requests succeed with immediately-ready streams.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(self, state: PermissionState) -> Self {
        self.shared.script.lock().permission = Ok(state);
        self
    }

    /// Makes permission queries fail as unsupported.
    pub fn with_permission_query_unsupported(self) -> Self {
        self.shared.script.lock().permission = Err(NativeError::new(
            "NotSupportedError",
            "permission query is not supported",
        ));
        self
    }

    /// Queues a failure for the next request that has no scripted outcome yet.
    pub fn fail_next(self, error: NativeError) -> Self {
        self.shared.script.lock().outcomes.push_back(Err(error));
        self
    }

    /// Queues a success for the next request that has no scripted outcome yet.
    pub fn succeed_next(self) -> Self {
        self.shared.script.lock().outcomes.push_back(Ok(()));
        self
    }

    /// Makes every unscripted request fail with `error`.
    pub fn fail_always(self, error: NativeError) -> Self {
        self.shared.script.lock().default_outcome = Err(error);
        self
    }

    /// Delays every request by `delay` before it resolves.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.shared.script.lock().open_delay = delay;
        self
    }

    /// Makes opened streams report readiness `delay` after opening.
    pub fn with_ready_delay(self, delay: Duration) -> Self {
        self.shared.script.lock().ready_after = Some(delay);
        self
    }

    /// Makes opened streams never report readiness.
    pub fn never_ready(self) -> Self {
        self.shared.script.lock().ready_after = None;
        self
    }

    pub fn with_frame_size(self, width: u32, height: u32) -> Self {
        self.shared.script.lock().frame_size = (width, height);
        self
    }

    /// Returns every profile requested so far, in order.
    pub fn attempts(&self) -> Vec<ConstraintProfile> {
        self.shared.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.shared.attempts.lock().len()
    }

    /// Returns the number of streams opened and not yet closed.
    pub fn open_streams(&self) -> usize {
        self.shared.open_streams.load(Ordering::SeqCst)
    }

    /// Returns the number of streams ever opened.
    pub fn streams_opened(&self) -> usize {
        self.shared.streams_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for MockDevice {
    async fn query_permission(&self) -> Result<PermissionState, NativeError> {
        self.shared.script.lock().permission.clone()
    }

    async fn request_stream(
        &self,
        constraints: &ConstraintProfile,
    ) -> Result<Box<dyn VideoStream>, NativeError> {
        self.shared.attempts.lock().push(constraints.clone());

        let (outcome, delay, ready_after, frame_size) = {
            let mut script = self.shared.script.lock();
            let outcome = script
                .outcomes
                .pop_front()
                .unwrap_or_else(|| script.default_outcome.clone());
            (outcome, script.open_delay, script.ready_after, script.frame_size)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome?;

        self.shared.open_streams.fetch_add(1, Ordering::SeqCst);
        let id = self.shared.streams_opened.fetch_add(1, Ordering::SeqCst) as u64;
        tracing::debug!(stream = id, profile = %constraints.name, "MockDevice opened stream");

        Ok(Box::new(MockStream {
            id,
            opened_at: tokio::time::Instant::now(),
            ready_after,
            frame_size,
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            open_streams: Arc::clone(&self.shared.open_streams),
        }))
    }
}

/// Stream produced by [`MockDevice`].
struct MockStream {
    id: u64,
    opened_at: tokio::time::Instant,
    ready_after: Option<Duration>,
    frame_size: (u32, u32),
    sequence: AtomicU64,
    closed: AtomicBool,
    open_streams: Arc<AtomicUsize>,
}

#[async_trait]
impl VideoStream for MockStream {
    fn is_ready(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match self.ready_after {
            Some(delay) => tokio::time::Instant::now() >= self.opened_at + delay,
            None => false,
        }
    }

    async fn wait_ready(&self) {
        match self.ready_after {
            Some(delay) => tokio::time::sleep_until(self.opened_at + delay).await,
            None => std::future::pending().await,
        }
    }

    fn read_frame(&self) -> Result<Frame, NativeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NativeError::new("InvalidStateError", "stream is closed"));
        }

        let (width, height) = self.frame_size;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        // Deterministic gradient shifted by the sequence number
        let pixel_count = (width * height) as usize;
        let pixels: Vec<u8> = (0..pixel_count * 3)
            .map(|i| ((i as u64 ^ sequence) % 256) as u8)
            .collect();

        Ok(Frame::new(pixels, width, height, sequence))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(stream = self.id, "MockDevice closed stream");
        }
    }
}
