//! Periodic frame sampling.
//!
//! The sampler pulls one frame per tick from the active stream and
//! classifies it. At most one inference is in flight at any time: a tick
//! that fires while the previous inference is still running is skipped,
//! never queued. Snapshot requests share the same slot.

use crate::capture::VideoStream;
use crate::inference::{Classifier, InferenceError, RankedPredictions};
use crate::session::SessionId;
use futures::future::{BoxFuture, OptionFuture};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Default period between samples.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

/// Why a frame was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Regular timer tick.
    Periodic,
    /// Explicit user request ("take photo").
    Snapshot,
}

/// A classified frame, tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub session: SessionId,
    pub kind: SampleKind,
    /// Sequence number of the classified frame.
    pub sequence: u64,
    pub predictions: RankedPredictions,
}

/// Cumulative sampler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub ticks: u64,
    /// Ticks skipped because an inference was in flight.
    pub skipped_busy: u64,
    /// Ticks skipped because the stream was not ready.
    pub skipped_not_ready: u64,
    pub frames_submitted: u64,
    /// Frames whose read or classification failed.
    pub inference_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    skipped_busy: AtomicU64,
    skipped_not_ready: AtomicU64,
    frames_submitted: AtomicU64,
    inference_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SamplerStats {
        SamplerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_busy: self.skipped_busy.load(Ordering::Relaxed),
            skipped_not_ready: self.skipped_not_ready.load(Ordering::Relaxed),
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
        }
    }
}

struct Completed {
    kind: SampleKind,
    sequence: u64,
    result: Result<RankedPredictions, InferenceError>,
}

/// Drives periodic classification of a live stream.
///
/// One sampler is reused across camera sessions; each [`start`] spawns a
/// fresh sampling task and [`stop`] aborts it, discarding any inference
/// still in flight.
///
/// [`start`]: FrameSampler::start
/// [`stop`]: FrameSampler::stop
#[derive(Debug, Default)]
pub struct FrameSampler {
    task: Option<JoinHandle<()>>,
    snapshots: Option<mpsc::UnboundedSender<()>>,
    counters: Arc<Counters>,
}

impl FrameSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts sampling `stream` every `interval`.
    ///
    /// Results are sent to `sink`. A sampler that is already running is
    /// stopped first. The first tick fires one interval after start.
    pub fn start<E>(
        &mut self,
        session: SessionId,
        stream: Arc<dyn VideoStream>,
        classifier: Classifier,
        interval: Duration,
        sink: mpsc::UnboundedSender<E>,
    ) where
        E: From<SampleOutcome> + Send + 'static,
    {
        if self.stop() {
            tracing::debug!(%session, "Restarting frame sampler");
        }

        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let task = SamplingTask {
            session,
            stream,
            classifier,
            counters: Arc::clone(&self.counters),
        };

        tracing::debug!(%session, ?interval, "Frame sampler started");
        self.snapshots = Some(snapshot_tx);
        self.task = Some(tokio::spawn(task.run(interval, snapshot_rx, sink)));
    }

    /// Stops sampling. Returns whether the sampler was running.
    ///
    /// Idempotent. A late inference result is dropped with the task.
    pub fn stop(&mut self) -> bool {
        self.snapshots = None;
        match self.task.take() {
            Some(task) => {
                task.abort();
                tracing::debug!("Frame sampler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Asks for one single-shot classification of the next frame.
    ///
    /// Runs as soon as no inference is in flight, ahead of the next tick.
    /// Returns false if the sampler is not running.
    pub fn request_snapshot(&self) -> bool {
        self.snapshots
            .as_ref()
            .is_some_and(|snapshots| snapshots.send(()).is_ok())
    }

    pub fn stats(&self) -> SamplerStats {
        self.counters.snapshot()
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SamplingTask {
    session: SessionId,
    stream: Arc<dyn VideoStream>,
    classifier: Classifier,
    counters: Arc<Counters>,
}

impl SamplingTask {
    async fn run<E>(
        self,
        interval: Duration,
        mut snapshots: mpsc::UnboundedReceiver<()>,
        sink: mpsc::UnboundedSender<E>,
    ) where
        E: From<SampleOutcome> + Send + 'static,
    {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<BoxFuture<'static, Completed>> = None;
        let mut snapshot_pending = false;

        loop {
            tokio::select! {
                biased;

                Some(done) = OptionFuture::from(in_flight.as_mut()) => {
                    in_flight = None;
                    if !self.deliver(done, &sink) {
                        tracing::debug!(
                            session = %self.session,
                            "Sample sink closed, sampler exiting"
                        );
                        return;
                    }
                }
                Some(()) = snapshots.recv(), if in_flight.is_none() => {
                    snapshot_pending = true;
                    in_flight = self.submit_snapshot(&mut snapshot_pending);
                }
                _ = ticker.tick() => {
                    Counters::bump(&self.counters.ticks);
                    if in_flight.is_some() {
                        Counters::bump(&self.counters.skipped_busy);
                        tracing::trace!(
                            session = %self.session,
                            "Inference in flight, skipping tick"
                        );
                        continue;
                    }
                    if snapshot_pending {
                        in_flight = self.submit_snapshot(&mut snapshot_pending);
                        if snapshot_pending {
                            Counters::bump(&self.counters.skipped_not_ready);
                        }
                    } else {
                        in_flight = self.submit(SampleKind::Periodic);
                    }
                }
            }
        }
    }

    /// Starts a pending snapshot, or leaves it pending until the stream is ready.
    fn submit_snapshot(&self, pending: &mut bool) -> Option<BoxFuture<'static, Completed>> {
        if !self.stream.is_ready() {
            tracing::debug!(
                session = %self.session,
                kind = ?SampleKind::Snapshot,
                "Stream not ready, snapshot deferred to the next tick"
            );
            return None;
        }
        *pending = false;
        self.submit(SampleKind::Snapshot)
    }

    /// Reads one frame and starts classifying it.
    fn submit(&self, kind: SampleKind) -> Option<BoxFuture<'static, Completed>> {
        if !self.stream.is_ready() {
            Counters::bump(&self.counters.skipped_not_ready);
            tracing::trace!(session = %self.session, ?kind, "Stream not ready, skipping frame");
            return None;
        }

        let frame = match self.stream.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                Counters::bump(&self.counters.inference_failures);
                tracing::warn!(session = %self.session, ?kind, error = %e, "Frame read failed");
                return None;
            }
        };

        Counters::bump(&self.counters.frames_submitted);
        let classifier = self.classifier.clone();
        Some(Box::pin(async move {
            let result = classifier.classify(&frame).await;
            Completed {
                kind,
                sequence: frame.sequence(),
                result,
            }
        }))
    }

    /// Forwards a finished inference. Returns false once the sink is gone.
    fn deliver<E>(&self, done: Completed, sink: &mpsc::UnboundedSender<E>) -> bool
    where
        E: From<SampleOutcome>,
    {
        match done.result {
            Ok(predictions) => sink
                .send(E::from(SampleOutcome {
                    session: self.session,
                    kind: done.kind,
                    sequence: done.sequence,
                    predictions,
                }))
                .is_ok(),
            Err(e) => {
                Counters::bump(&self.counters.inference_failures);
                tracing::warn!(
                    session = %self.session,
                    frame = done.sequence,
                    kind = ?done.kind,
                    error = %e,
                    "Inference failed, continuing with next tick"
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureDevice, ConstraintProfile, MockDevice};
    use crate::inference::{MockModel, ResizeMode};

    async fn open(device: &MockDevice) -> Arc<dyn VideoStream> {
        let stream = device
            .request_stream(&ConstraintProfile::permissive("any"))
            .await
            .unwrap();
        Arc::from(stream)
    }

    fn classifier(model: &Arc<MockModel>) -> Classifier {
        Classifier::new(model.clone(), ResizeMode::Stretch)
    }

    fn model() -> MockModel {
        MockModel::new(["a", "b"]).with_input_size(4)
    }

    const INTERVAL: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_tick_during_inference_is_skipped() {
        let device = MockDevice::new();
        let model = Arc::new(model().with_delay(Duration::from_millis(2500)));
        let (tx, mut rx) = mpsc::unbounded_channel::<SampleOutcome>();

        let mut sampler = FrameSampler::new();
        sampler.start(SessionId::first(), open(&device).await, classifier(&model), INTERVAL, tx);

        // Ticks at 1000 ms (submits) and 2000 ms (busy).
        time::sleep(Duration::from_millis(2200)).await;
        assert_eq!(model.calls(), 1);
        assert_eq!(sampler.stats().skipped_busy, 1);

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.kind, SampleKind::Periodic);
        assert_eq!(outcome.sequence, 1);
        assert_eq!(model.calls(), 1);
        sampler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_samples_arrive_in_order() {
        let device = MockDevice::new();
        let model = Arc::new(model());
        let (tx, mut rx) = mpsc::unbounded_channel::<SampleOutcome>();

        let mut sampler = FrameSampler::new();
        sampler.start(SessionId::first(), open(&device).await, classifier(&model), INTERVAL, tx);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(first.session, SessionId::first());
        assert_eq!(sampler.stats().frames_submitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let device = MockDevice::new();
        let model = Arc::new(model());
        let (tx, mut rx) = mpsc::unbounded_channel::<SampleOutcome>();

        let mut sampler = FrameSampler::new();
        assert!(!sampler.stop());

        sampler.start(SessionId::first(), open(&device).await, classifier(&model), INTERVAL, tx);
        assert!(sampler.is_running());
        assert!(sampler.stop());
        assert!(!sampler.stop());
        assert!(!sampler.is_running());
        assert!(!sampler.request_snapshot());

        time::sleep(INTERVAL * 3).await;
        assert_eq!(model.calls(), 0);
        // The aborted task dropped its sender.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let device = MockDevice::new();
        let model = Arc::new(model().with_delay(Duration::from_millis(500)));
        let (tx, mut rx) = mpsc::unbounded_channel::<SampleOutcome>();

        let mut sampler = FrameSampler::new();
        sampler.start(SessionId::first(), open(&device).await, classifier(&model), INTERVAL, tx);

        time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(model.calls(), 1);
        sampler.stop();

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_stream_skips_ticks() {
        let device = MockDevice::new().never_ready();
        let model = Arc::new(model());
        let (tx, _rx) = mpsc::unbounded_channel::<SampleOutcome>();

        let mut sampler = FrameSampler::new();
        sampler.start(SessionId::first(), open(&device).await, classifier(&model), INTERVAL, tx);

        time::sleep(Duration::from_millis(3500)).await;
        let stats = sampler.stats();
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.skipped_not_ready, 3);
        assert_eq!(stats.frames_submitted, 0);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inference_failure_is_swallowed() {
        let device = MockDevice::new();
        let model = Arc::new(model());
        model.push_failure("transient");
        let (tx, mut rx) = mpsc::unbounded_channel::<SampleOutcome>();

        let mut sampler = FrameSampler::new();
        sampler.start(SessionId::first(), open(&device).await, classifier(&model), INTERVAL, tx);

        // First frame fails silently; the second tick still delivers.
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.sequence, 2);
        assert_eq!(sampler.stats().inference_failures, 1);
        assert!(sampler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_waits_for_in_flight_inference() {
        let device = MockDevice::new();
        let model = Arc::new(model().with_delay(Duration::from_millis(300)));
        let (tx, mut rx) = mpsc::unbounded_channel::<SampleOutcome>();

        let mut sampler = FrameSampler::new();
        sampler.start(SessionId::first(), open(&device).await, classifier(&model), INTERVAL, tx);

        time::sleep(Duration::from_millis(1100)).await;
        assert!(sampler.request_snapshot());

        let periodic = rx.recv().await.unwrap();
        assert_eq!(periodic.kind, SampleKind::Periodic);
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.kind, SampleKind::Snapshot);
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(sampler.stats().ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_on_unready_stream_runs_once_ready() {
        let device = MockDevice::new().with_ready_delay(Duration::from_millis(1500));
        let model = Arc::new(model());
        let (tx, mut rx) = mpsc::unbounded_channel::<SampleOutcome>();

        let mut sampler = FrameSampler::new();
        sampler.start(SessionId::first(), open(&device).await, classifier(&model), INTERVAL, tx);

        time::sleep(Duration::from_millis(100)).await;
        assert!(sampler.request_snapshot());

        // Not ready at 1000 ms; the 2000 ms tick takes the snapshot.
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.kind, SampleKind::Snapshot);
        assert_eq!(outcome.sequence, 1);
        assert_eq!(sampler.stats().skipped_not_ready, 1);
        assert_eq!(model.calls(), 1);

        let next = rx.recv().await.unwrap();
        assert_eq!(next.kind, SampleKind::Periodic);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_closed_mid_session_counts_failures() {
        let device = MockDevice::new();
        let model = Arc::new(model());
        let stream = open(&device).await;
        let (tx, _rx) = mpsc::unbounded_channel::<SampleOutcome>();

        let mut sampler = FrameSampler::new();
        sampler.start(SessionId::first(), Arc::clone(&stream), classifier(&model), INTERVAL, tx);
        stream.close();

        time::sleep(Duration::from_millis(1500)).await;
        // A closed mock stream reports not ready.
        assert_eq!(sampler.stats().skipped_not_ready, 1);
        assert_eq!(model.calls(), 0);
    }
}
