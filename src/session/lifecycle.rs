//! Camera lifecycle state machine.
//!
//! `Idle → Requesting → Active → Idle` on stop, or
//! `Requesting/Active → Failed → Idle` on retry or dismiss.
//!
//! The lifecycle exclusively owns the active stream and the sampler. All
//! asynchronous work (model load, permission, acquisition, inference)
//! runs in spawned tasks that report back through one event channel, and
//! every event is applied on the lifecycle's own task in arrival order.
//! Results tagged with a session or request that is no longer current
//! are discarded; a late stream is closed rather than adopted.

use super::{CameraState, Command, SessionId, ViewState};
use crate::capture::{
    Acquired, AcquisitionError, CameraAcquirer, CaptureDevice, DeviceClass, Frame,
    PermissionNegotiator, PermissionOutcome, PermissionState, ProfileTable, VideoStream,
    DEFAULT_READY_TIMEOUT,
};
use crate::error::SessionError;
use crate::inference::{
    Classifier, ClassifierModel, InferenceError, ModelLoader, ModelSource, ModelUnavailable,
    Prediction, RankedPredictions,
};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{
    ConfidenceGate, FrameSampler, GateDecision, GatePath, SampleKind, SampleOutcome,
    DEFAULT_INTERVAL,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Capacity of the presentation command channel.
const COMMAND_BUFFER: usize = 32;

/// Lifecycle settings.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Selects the constraint-profile ladder.
    pub device_class: DeviceClass,
    pub model: ModelSource,
    /// Per-class ladder overrides.
    pub profiles: ProfileTable,
    pub ready_timeout: Duration,
    pub sampling_interval: Duration,
    pub gate: ConfidenceGate,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            device_class: DeviceClass::default(),
            model: ModelSource::default(),
            profiles: ProfileTable::default(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            sampling_interval: DEFAULT_INTERVAL,
            gate: ConfidenceGate::default(),
        }
    }
}

/// Results of background work, applied in arrival order.
enum Event {
    ModelLoaded(Result<Arc<dyn ClassifierModel>, ModelUnavailable>),
    PermissionQueried(PermissionState),
    PermissionResolved {
        session: SessionId,
        outcome: PermissionOutcome,
    },
    Acquired {
        session: SessionId,
        result: Result<Acquired, AcquisitionError>,
    },
    Sampled(SampleOutcome),
    StillClassified {
        request: u64,
        result: Result<RankedPredictions, InferenceError>,
    },
}

impl From<SampleOutcome> for Event {
    fn from(outcome: SampleOutcome) -> Self {
        Event::Sampled(outcome)
    }
}

/// The open stream of an active session.
struct CameraSession {
    id: SessionId,
    stream: Arc<dyn VideoStream>,
    profile: String,
}

enum Camera {
    Idle,
    Requesting(SessionId),
    Active(CameraSession),
    Failed,
}

impl Camera {
    fn state(&self) -> CameraState {
        match self {
            Camera::Idle => CameraState::Idle,
            Camera::Requesting(_) => CameraState::Requesting,
            Camera::Active(_) => CameraState::Active,
            Camera::Failed => CameraState::Failed,
        }
    }

    fn is_pending(&self, session: SessionId) -> bool {
        matches!(self, Camera::Requesting(id) if *id == session)
    }

    fn is_active(&self, session: SessionId) -> bool {
        matches!(self, Camera::Active(active) if active.id == session)
    }
}

#[derive(Debug, Default)]
struct Displayed {
    prediction: Option<Prediction>,
    source: Option<GatePath>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    predictions_shown: u64,
    predictions_suppressed: u64,
    acquisitions: u64,
    acquisition_failures: u64,
    last_confidence: Option<f32>,
}

/// Orchestrates permission, acquisition, sampling, and display.
pub struct CameraLifecycle {
    negotiator: Arc<PermissionNegotiator>,
    acquirer: Arc<CameraAcquirer>,
    loader: Arc<dyn ModelLoader>,
    options: LifecycleOptions,

    classifier: Option<Classifier>,
    model_loading: bool,
    camera: Camera,
    next_session: SessionId,
    sampler: FrameSampler,
    still: Option<JoinHandle<()>>,
    still_request: u64,

    displayed: Displayed,
    error: Option<SessionError>,
    counters: Counters,

    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    view: watch::Sender<ViewState>,
    metrics: watch::Sender<MetricsSnapshot>,
}

impl CameraLifecycle {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        loader: Arc<dyn ModelLoader>,
        options: LifecycleOptions,
    ) -> Self {
        let negotiator = Arc::new(PermissionNegotiator::new(Arc::clone(&device)));
        let acquirer = Arc::new(
            CameraAcquirer::new(device, options.profiles.clone())
                .with_ready_timeout(options.ready_timeout),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view, _) = watch::channel(ViewState::default());
        let (metrics, _) = watch::channel(MetricsSnapshot::default());

        Self {
            negotiator,
            acquirer,
            loader,
            options,
            classifier: None,
            model_loading: false,
            camera: Camera::Idle,
            next_session: SessionId::first(),
            sampler: FrameSampler::new(),
            still: None,
            still_request: 0,
            displayed: Displayed::default(),
            error: None,
            counters: Counters::default(),
            events_tx,
            events_rx,
            view,
            metrics,
        }
    }

    /// Starts loading the model and reads the camera permission.
    pub fn init(&mut self) {
        self.load_model();

        let negotiator = Arc::clone(&self.negotiator);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let state = negotiator.query().await;
            let _ = events.send(Event::PermissionQueried(state));
        });

        self.publish();
    }

    /// Runs the lifecycle on a spawned task.
    pub fn spawn(self) -> LifecycleHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let view = self.view.subscribe();
        let metrics = self.metrics.subscribe();
        let task = tokio::spawn(self.run(receiver));

        LifecycleHandle {
            commands,
            view,
            metrics,
            task,
        }
    }

    /// Handles commands and events until the command channel closes.
    ///
    /// Tears the camera down on return.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.init();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        tracing::debug!("Command channel closed, shutting down");
        self.shutdown();
    }

    /// Waits for the next background result and applies it.
    pub async fn process_next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
    }

    /// Returns the current view.
    pub fn view(&self) -> ViewState {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view.subscribe()
    }

    /// Applies one presentation command.
    pub fn handle(&mut self, command: Command) {
        tracing::debug!(?command, camera = %self.camera.state(), "Handling command");

        match command {
            Command::Start => self.start_camera(),
            Command::Stop => self.stop_camera(),
            Command::RetryPermission => {
                tracing::info!("Retrying camera permission");
                self.start_camera();
            }
            Command::SelectImage(frame) => self.classify_still(frame),
            Command::Capture => self.capture(),
            Command::ClearImage => self.clear_image(),
            Command::ReloadModel => self.reload_model(),
        }

        self.publish();
    }

    /// Stops the camera and any still-image work.
    pub fn shutdown(&mut self) {
        self.cancel_still();
        if !matches!(self.camera, Camera::Idle) {
            self.transition(Camera::Idle);
        }
        self.sampler.stop();
        self.publish();
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let sampler = self.sampler.stats();
        MetricsSnapshot {
            camera_active: matches!(self.camera, Camera::Active(_)),
            frames_sampled: sampler.frames_submitted,
            ticks_skipped_busy: sampler.skipped_busy,
            ticks_skipped_not_ready: sampler.skipped_not_ready,
            inference_failures: sampler.inference_failures,
            predictions_shown: self.counters.predictions_shown,
            predictions_suppressed: self.counters.predictions_suppressed,
            acquisition_attempts: self.counters.acquisitions,
            acquisition_failures: self.counters.acquisition_failures,
            last_confidence: self.counters.last_confidence,
        }
    }

    fn load_model(&mut self) {
        if self.model_loading {
            return;
        }
        self.model_loading = true;

        let loader = Arc::clone(&self.loader);
        let source = self.options.model.clone();
        let events = self.events_tx.clone();
        tracing::info!(path = ?source.path, "Loading classifier model");
        tokio::spawn(async move {
            let result = loader.load(&source).await;
            let _ = events.send(Event::ModelLoaded(result));
        });
    }

    fn reload_model(&mut self) {
        if self.classifier.is_some() || self.model_loading {
            tracing::debug!("Model already loaded or loading");
            return;
        }
        if matches!(self.error, Some(SessionError::ModelUnavailable(_))) {
            self.error = None;
        }
        self.load_model();
    }

    fn start_camera(&mut self) {
        if matches!(self.camera, Camera::Requesting(_) | Camera::Active(_)) {
            tracing::debug!(camera = %self.camera.state(), "Camera already started");
            return;
        }
        if self.classifier.is_none() {
            tracing::warn!("Camera start ignored, model not ready");
            return;
        }

        self.clear_image();
        if matches!(self.camera, Camera::Failed) {
            self.error = None;
            self.transition(Camera::Idle);
        }

        let session = self.next_session;
        self.next_session = session.next();
        self.counters.acquisitions += 1;
        self.transition(Camera::Requesting(session));

        let negotiator = Arc::clone(&self.negotiator);
        let acquirer = Arc::clone(&self.acquirer);
        let class = self.options.device_class;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = negotiator.request().await;
            let granted = outcome.is_granted();
            if events
                .send(Event::PermissionResolved { session, outcome })
                .is_err()
                || !granted
            {
                return;
            }

            let result = acquirer.acquire(class).await;
            if let Err(SendError(Event::Acquired {
                result: Ok(acquired),
                ..
            })) = events.send(Event::Acquired { session, result })
            {
                acquired.stream.close();
            }
        });
    }

    fn stop_camera(&mut self) {
        match self.camera {
            Camera::Idle => tracing::debug!("Camera already stopped"),
            Camera::Requesting(_) | Camera::Active(_) | Camera::Failed => {
                self.error = None;
                self.transition(Camera::Idle);
            }
        }
    }

    fn capture(&mut self) {
        match &self.camera {
            Camera::Active(session) if self.sampler.request_snapshot() => {
                tracing::debug!(session = %session.id, "Snapshot requested");
            }
            _ => tracing::warn!(
                camera = %self.camera.state(),
                "Capture ignored, camera not active"
            ),
        }
    }

    fn classify_still(&mut self, frame: Frame) {
        let Some(classifier) = self.classifier.clone() else {
            tracing::warn!("Still image ignored, model not ready");
            return;
        };

        if matches!(self.camera, Camera::Requesting(_) | Camera::Active(_)) {
            tracing::info!("Stopping camera for still image");
            self.transition(Camera::Idle);
        }

        self.clear_image();
        let request = self.still_request;
        let events = self.events_tx.clone();
        tracing::debug!(request, frame = ?frame, "Classifying still image");
        self.still = Some(tokio::spawn(async move {
            let result = classifier.classify(&frame).await;
            let _ = events.send(Event::StillClassified { request, result });
        }));
    }

    fn clear_image(&mut self) {
        self.cancel_still();
        if self.displayed.source == Some(GatePath::SingleShot) {
            self.displayed = Displayed::default();
        }
    }

    /// Aborts still-image work and invalidates any result already queued.
    fn cancel_still(&mut self) {
        self.still_request += 1;
        if let Some(task) = self.still.take() {
            task.abort();
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ModelLoaded(Ok(model)) => {
                self.model_loading = false;
                tracing::info!(
                    labels = model.labels().len(),
                    input_size = model.input_size(),
                    "Classifier model ready"
                );
                self.classifier = Some(Classifier::new(model, self.options.model.resize));
                if matches!(self.error, Some(SessionError::ModelUnavailable(_))) {
                    self.error = None;
                }
            }
            Event::ModelLoaded(Err(e)) => {
                self.model_loading = false;
                tracing::warn!(error = %e, "Classifier model unavailable");
                self.error = Some(e.into());
            }
            Event::PermissionQueried(state) => {
                tracing::debug!(?state, "Initial camera permission");
            }
            Event::PermissionResolved { session, outcome } => {
                self.on_permission(session, outcome);
            }
            Event::Acquired { session, result } => self.on_acquired(session, result),
            Event::Sampled(outcome) => self.on_sample(outcome),
            Event::StillClassified { request, result } => {
                if request != self.still_request {
                    tracing::debug!(request, "Discarding superseded still-image result");
                } else {
                    self.still = None;
                    match result {
                        Ok(ranked) => self.show(GatePath::SingleShot, ranked.into_top()),
                        Err(e) => tracing::warn!(error = %e, "Still image classification failed"),
                    }
                }
            }
        }

        self.publish();
    }

    fn on_permission(&mut self, session: SessionId, outcome: PermissionOutcome) {
        if !self.camera.is_pending(session) {
            tracing::debug!(%session, "Ignoring permission result for an ended session");
            return;
        }

        if let PermissionOutcome::Refused { reason, message } = outcome {
            self.counters.acquisition_failures += 1;
            self.fail(SessionError::from_kind(reason, message));
        }
    }

    fn on_acquired(&mut self, session: SessionId, result: Result<Acquired, AcquisitionError>) {
        let pending = self.camera.is_pending(session);

        match result {
            Ok(acquired) if pending => self.activate(session, acquired),
            Ok(acquired) => {
                tracing::debug!(
                    %session,
                    profile = %acquired.profile.name,
                    "Closing stream acquired for an ended session"
                );
                acquired.stream.close();
            }
            Err(e) if pending => {
                self.counters.acquisition_failures += 1;
                self.fail(e.into());
            }
            Err(e) => {
                tracing::debug!(
                    %session,
                    error = %e,
                    "Ignoring acquisition failure for an ended session"
                );
            }
        }
    }

    fn activate(&mut self, session: SessionId, acquired: Acquired) {
        let Some(classifier) = self.classifier.clone() else {
            acquired.stream.close();
            self.transition(Camera::Idle);
            return;
        };

        self.sampler.start(
            session,
            Arc::clone(&acquired.stream),
            classifier,
            self.options.sampling_interval,
            self.events_tx.clone(),
        );
        tracing::info!(
            %session,
            profile = %acquired.profile.name,
            attempts = acquired.attempts,
            "Camera session active"
        );
        self.transition(Camera::Active(CameraSession {
            id: session,
            stream: acquired.stream,
            profile: acquired.profile.name,
        }));
    }

    fn on_sample(&mut self, outcome: SampleOutcome) {
        if !self.camera.is_active(outcome.session) {
            tracing::debug!(session = %outcome.session, "Discarding sample from an ended session");
            return;
        }

        let path = match outcome.kind {
            SampleKind::Periodic => GatePath::Ambient,
            SampleKind::Snapshot => GatePath::SingleShot,
        };
        self.show(path, outcome.predictions.into_top());
    }

    fn show(&mut self, path: GatePath, prediction: Prediction) {
        self.counters.last_confidence = Some(prediction.confidence);

        match self.options.gate.decide(path, prediction) {
            GateDecision::Show(prediction) => {
                self.counters.predictions_shown += 1;
                self.displayed = Displayed {
                    prediction: Some(prediction),
                    source: Some(path),
                    updated_at: Some(Utc::now()),
                };
            }
            GateDecision::Clear => {
                self.counters.predictions_suppressed += 1;
                self.displayed = Displayed::default();
            }
        }
    }

    fn fail(&mut self, error: SessionError) {
        tracing::warn!(%error, "Camera session failed");
        self.transition(Camera::Failed);
        self.error = Some(error);
    }

    /// Moves to `to`, tearing the session down first when leaving Active.
    fn transition(&mut self, to: Camera) {
        if matches!(self.camera, Camera::Active(_)) {
            self.teardown();
        }

        let from = self.camera.state();
        self.camera = to;
        let to = self.camera.state();
        if from != to {
            tracing::info!(%from, %to, "Camera state changed");
        }
    }

    /// Stops the sampler, then the stream, then clears prediction and error.
    fn teardown(&mut self) {
        if let Camera::Active(session) = &self.camera {
            self.sampler.stop();
            session.stream.close();
            self.displayed = Displayed::default();
            self.error = None;
            tracing::debug!(
                session = %session.id,
                profile = %session.profile,
                "Camera session torn down"
            );
        }
    }

    fn publish(&self) {
        let view = ViewState {
            is_loading: self.model_loading,
            model_ready: self.classifier.is_some(),
            classifying: self.still.is_some(),
            permission: self.negotiator.state(),
            camera: self.camera.state(),
            prediction: self.displayed.prediction.clone(),
            confidence: self
                .displayed
                .prediction
                .as_ref()
                .map_or(0.0, |p| p.confidence),
            prediction_source: self.displayed.source,
            updated_at: self.displayed.updated_at,
            error: self.error.clone(),
        };

        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
        self.metrics.send_replace(self.metrics_snapshot());
    }
}

impl Drop for CameraLifecycle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The lifecycle task has exited.
#[derive(Debug, Error)]
#[error("camera lifecycle has shut down")]
pub struct LifecycleClosed;

/// Presentation-side handle to a spawned lifecycle.
pub struct LifecycleHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<ViewState>,
    metrics: watch::Receiver<MetricsSnapshot>,
    task: JoinHandle<()>,
}

impl LifecycleHandle {
    pub async fn send(&self, command: Command) -> Result<(), LifecycleClosed> {
        self.commands.send(command).await.map_err(|_| LifecycleClosed)
    }

    /// Returns the current view.
    pub fn view(&self) -> ViewState {
        self.view.borrow().clone()
    }

    /// Returns a receiver notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view.clone()
    }

    pub fn metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        self.metrics.clone()
    }

    /// Closes the command channel and waits for teardown to finish.
    pub async fn shutdown(self) {
        let LifecycleHandle { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Lifecycle task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MockDevice, NativeError};
    use crate::inference::{MockModel, MockModelLoader, ResizeMode};

    const INTERVAL: Duration = Duration::from_millis(1000);

    fn options() -> LifecycleOptions {
        LifecycleOptions {
            device_class: DeviceClass::Android,
            sampling_interval: INTERVAL,
            ..Default::default()
        }
    }

    fn model() -> MockModel {
        MockModel::new(["Person 1", "Person 2"]).with_input_size(4)
    }

    fn frame() -> Frame {
        Frame::new(vec![120u8; 8 * 8 * 3], 8, 8, 0)
    }

    fn lifecycle(device: &MockDevice, model: &Arc<MockModel>) -> CameraLifecycle {
        let loader = MockModelLoader::new().with_model(Arc::clone(model));
        CameraLifecycle::new(Arc::new(device.clone()), Arc::new(loader), options())
    }

    /// Applies events until `done` holds.
    async fn drive(lifecycle: &mut CameraLifecycle, done: impl Fn(&CameraLifecycle) -> bool) {
        tokio::time::timeout(Duration::from_secs(60), async {
            while !done(lifecycle) {
                lifecycle.process_next_event().await;
            }
        })
        .await
        .expect("lifecycle stalled");
    }

    async fn ready(device: &MockDevice, model: &Arc<MockModel>) -> CameraLifecycle {
        let mut lifecycle = lifecycle(device, model);
        lifecycle.init();
        drive(&mut lifecycle, |l| l.view().model_ready).await;
        lifecycle
    }

    async fn active(device: &MockDevice, model: &Arc<MockModel>) -> CameraLifecycle {
        let mut lifecycle = ready(device, model).await;
        lifecycle.handle(Command::Start);
        drive(&mut lifecycle, |l| l.view().camera == CameraState::Active).await;
        lifecycle
    }

    fn granted() -> MockDevice {
        MockDevice::new().with_permission(PermissionState::Granted)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reaches_active_and_samples() {
        let device = granted();
        let model = Arc::new(model().with_scores(vec![0.9, 0.1]));
        let mut lifecycle = active(&device, &model).await;

        assert_eq!(device.open_streams(), 1);
        assert!(lifecycle.sampler.is_running());
        assert_eq!(lifecycle.view().permission, PermissionState::Granted);

        drive(&mut lifecycle, |l| l.view().prediction.is_some()).await;
        let view = lifecycle.view();
        assert_eq!(view.label(), Some("Person 1"));
        assert_eq!(view.confidence, 0.9);
        assert_eq!(view.prediction_source, Some(GatePath::Ambient));
        assert!(view.updated_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_acquisition_resolves_closes_late_stream() {
        let device = MockDevice::new().with_open_delay(Duration::from_millis(500));
        let model = Arc::new(model());
        let mut lifecycle = ready(&device, &model).await;

        lifecycle.handle(Command::Start);
        assert_eq!(lifecycle.view().camera, CameraState::Requesting);
        lifecycle.handle(Command::Stop);
        assert_eq!(lifecycle.view().camera, CameraState::Idle);

        // Probe stream, then the late acquisition.
        drive(&mut lifecycle, |_| device.streams_opened() == 2 && device.open_streams() == 0).await;

        assert_eq!(lifecycle.view().camera, CameraState::Idle);
        assert!(!lifecycle.sampler.is_running());
        assert!(lifecycle.view().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_is_noop() {
        let device = granted();
        let model = Arc::new(model());
        let mut lifecycle = active(&device, &model).await;

        lifecycle.handle(Command::Stop);
        let after_first = lifecycle.view();
        lifecycle.handle(Command::Stop);

        assert_eq!(lifecycle.view(), after_first);
        assert_eq!(after_first.camera, CameraState::Idle);
        assert!(after_first.error.is_none());
        assert!(!lifecycle.sampler.is_running());
        assert_eq!(device.open_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_camera_fails_but_still_images_work() {
        let device = granted().fail_always(NativeError::new("NotFoundError", "no camera"));
        let model = Arc::new(model().with_scores(vec![0.6, 0.4]));
        let mut lifecycle = ready(&device, &model).await;

        lifecycle.handle(Command::Start);
        drive(&mut lifecycle, |l| l.view().camera == CameraState::Failed).await;

        let error = lifecycle.view().error.unwrap();
        assert!(matches!(error, SessionError::DeviceUnavailable(_)));
        assert!(error.blocks_camera());
        // Every profile of the Android ladder was tried.
        assert_eq!(device.attempt_count(), 3);
        assert_eq!(device.open_streams(), 0);

        lifecycle.handle(Command::SelectImage(frame()));
        drive(&mut lifecycle, |l| l.view().prediction.is_some()).await;
        assert_eq!(lifecycle.view().label(), Some("Person 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_then_retry() {
        let device = MockDevice::new().with_permission(PermissionState::Denied);
        let model = Arc::new(model());
        let mut lifecycle = ready(&device, &model).await;

        lifecycle.handle(Command::Start);
        drive(&mut lifecycle, |l| l.view().camera == CameraState::Failed).await;
        assert!(matches!(
            lifecycle.view().error,
            Some(SessionError::PermissionDenied(_))
        ));
        assert_eq!(lifecycle.view().permission, PermissionState::Denied);
        assert_eq!(device.attempt_count(), 0);

        // The user grants access in the platform settings.
        let _ = device.clone().with_permission(PermissionState::Granted);
        lifecycle.handle(Command::RetryPermission);
        assert!(lifecycle.view().error.is_none());
        drive(&mut lifecycle, |l| l.view().camera == CameraState::Active).await;
        assert_eq!(lifecycle.view().permission, PermissionState::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_surfaces_stream_timeout() {
        let device = granted().never_ready();
        let model = Arc::new(model());
        let mut lifecycle = ready(&device, &model).await;

        lifecycle.handle(Command::Start);
        drive(&mut lifecycle, |l| l.view().camera == CameraState::Failed).await;

        assert!(matches!(
            lifecycle.view().error,
            Some(SessionError::StreamTimeout(_))
        ));
        assert_eq!(device.open_streams(), 0);
        assert_eq!(lifecycle.metrics_snapshot().acquisition_failures, 1);

        lifecycle.handle(Command::Stop);
        assert_eq!(lifecycle.view().camera, CameraState::Idle);
        assert!(lifecycle.view().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambient_gate_clears_low_confidence() {
        let device = granted();
        let model = Arc::new(model());
        model.push_scores(vec![0.71, 0.29]);
        model.push_scores(vec![0.70, 0.30]);
        let mut lifecycle = active(&device, &model).await;

        drive(&mut lifecycle, |l| l.metrics_snapshot().predictions_shown == 1).await;
        assert_eq!(lifecycle.view().confidence, 0.71);

        drive(&mut lifecycle, |l| l.metrics_snapshot().predictions_suppressed == 1).await;
        let view = lifecycle.view();
        assert!(view.prediction.is_none());
        assert_eq!(view.confidence, 0.0);
        assert_eq!(lifecycle.metrics_snapshot().last_confidence, Some(0.70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_image_always_shown() {
        let device = MockDevice::new();
        let model = Arc::new(model().with_scores(vec![0.05, 0.03]));
        let mut lifecycle = ready(&device, &model).await;

        lifecycle.handle(Command::SelectImage(frame()));
        drive(&mut lifecycle, |l| l.view().prediction.is_some()).await;

        let view = lifecycle.view();
        assert_eq!(view.confidence, 0.05);
        assert_eq!(view.prediction_source, Some(GatePath::SingleShot));
        assert_eq!(view.camera, CameraState::Idle);

        lifecycle.handle(Command::ClearImage);
        assert!(lifecycle.view().prediction.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_still_image_settles_without_prediction() {
        let device = MockDevice::new();
        let model = Arc::new(model().with_scores(vec![0.8, 0.2]));
        let mut lifecycle = ready(&device, &model).await;

        lifecycle.handle(Command::SelectImage(frame()));
        drive(&mut lifecycle, |l| l.view().prediction.is_some()).await;

        model.push_failure("backend crashed");
        lifecycle.handle(Command::SelectImage(frame()));
        let view = lifecycle.view();
        assert!(view.classifying);
        assert!(view.prediction.is_none());

        drive(&mut lifecycle, |l| !l.view().classifying).await;
        let view = lifecycle.view();
        assert!(view.prediction.is_none());
        assert!(view.error.is_none());
        assert_eq!(view.camera, CameraState::Idle);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_label_output_mismatch_surfaces_model_unavailable() {
        let device = granted();
        let model = Arc::new(model().with_scores(vec![0.5, 0.3, 0.2]));
        let mut lifecycle = lifecycle(&device, &model);

        lifecycle.init();
        drive(&mut lifecycle, |l| !l.view().is_loading).await;

        let view = lifecycle.view();
        assert!(!view.model_ready);
        assert!(matches!(view.error, Some(SessionError::ModelUnavailable(_))));

        lifecycle.handle(Command::Start);
        assert_eq!(lifecycle.view().camera, CameraState::Idle);
        assert_eq!(device.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_image_tears_camera_down() {
        let device = granted();
        let model = Arc::new(model().with_scores(vec![0.2, 0.8]));
        let mut lifecycle = active(&device, &model).await;

        lifecycle.handle(Command::SelectImage(frame()));
        assert_eq!(lifecycle.view().camera, CameraState::Idle);
        assert_eq!(device.open_streams(), 0);
        assert!(!lifecycle.sampler.is_running());

        drive(&mut lifecycle, |l| l.view().prediction.is_some()).await;
        assert_eq!(lifecycle.view().label(), Some("Person 2"));
        assert_eq!(lifecycle.view().prediction_source, Some(GatePath::SingleShot));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_bypasses_gate() {
        let device = granted();
        let model = Arc::new(model().with_scores(vec![0.3, 0.1]));
        let mut lifecycle = active(&device, &model).await;

        lifecycle.handle(Command::Capture);
        drive(&mut lifecycle, |l| l.view().prediction.is_some()).await;

        let view = lifecycle.view();
        assert_eq!(view.confidence, 0.3);
        assert_eq!(view.prediction_source, Some(GatePath::SingleShot));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_from_ended_session_is_discarded() {
        let device = granted();
        let model = Arc::new(model().with_scores(vec![0.9, 0.1]));
        let mut lifecycle = active(&device, &model).await;

        lifecycle.handle(Command::Stop);
        lifecycle.handle(Command::Start);
        drive(&mut lifecycle, |l| l.view().camera == CameraState::Active).await;

        let classifier = Classifier::new(model.clone(), ResizeMode::Stretch);
        let predictions = classifier.classify(&frame()).await.unwrap();
        lifecycle.handle_event(Event::Sampled(SampleOutcome {
            session: SessionId::first(),
            kind: SampleKind::Periodic,
            sequence: 99,
            predictions,
        }));

        assert!(lifecycle.view().prediction.is_none());
        assert_eq!(lifecycle.metrics_snapshot().predictions_shown, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_failure_then_reload() {
        let device = granted();
        let model = Arc::new(model());
        let loader = Arc::new(
            MockModelLoader::new()
                .with_model(Arc::clone(&model))
                .fail_next(ModelUnavailable::Backend("offline".into())),
        );
        let mut lifecycle =
            CameraLifecycle::new(Arc::new(device.clone()), loader.clone(), options());

        lifecycle.init();
        assert!(lifecycle.view().is_loading);
        drive(&mut lifecycle, |l| !l.view().is_loading).await;

        let view = lifecycle.view();
        assert!(!view.model_ready);
        assert!(matches!(view.error, Some(SessionError::ModelUnavailable(_))));

        lifecycle.handle(Command::Start);
        assert_eq!(lifecycle.view().camera, CameraState::Idle);
        assert_eq!(device.attempt_count(), 0);

        lifecycle.handle(Command::ReloadModel);
        assert!(lifecycle.view().is_loading);
        assert!(lifecycle.view().error.is_none());
        drive(&mut lifecycle, |l| l.view().model_ready).await;
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_active_stream() {
        let device = granted();
        let model = Arc::new(model());
        let lifecycle = active(&device, &model).await;

        assert_eq!(device.open_streams(), 1);
        drop(lifecycle);
        assert_eq!(device.open_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_lifecycle_round_trip() {
        let device = granted();
        let model = Arc::new(model().with_scores(vec![0.95, 0.05]));
        let handle = lifecycle(&device, &model).spawn();
        let mut view = handle.subscribe();

        view.wait_for(|v| v.model_ready).await.unwrap();
        handle.send(Command::Start).await.unwrap();
        view.wait_for(|v| v.prediction.is_some()).await.unwrap();
        assert_eq!(handle.view().camera, CameraState::Active);
        assert_eq!(handle.metrics().borrow().predictions_shown, 1);

        handle.shutdown().await;
        assert_eq!(device.open_streams(), 0);
    }
}
