//! Metrics collection and registry.

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of lifecycle state for metrics update.
///
/// Counters are cumulative since the lifecycle was created.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Whether a camera session is active.
    pub camera_active: bool,
    /// Frames submitted for classification by the sampler.
    pub frames_sampled: u64,
    /// Sampler ticks skipped while an inference was in flight.
    pub ticks_skipped_busy: u64,
    /// Sampler ticks skipped because the stream was not ready.
    pub ticks_skipped_not_ready: u64,
    /// Frames whose read or classification failed.
    pub inference_failures: u64,
    /// Predictions that reached the view.
    pub predictions_shown: u64,
    /// Ambient predictions cleared by the confidence gate.
    pub predictions_suppressed: u64,
    /// Camera acquisitions started.
    pub acquisition_attempts: u64,
    /// Camera acquisitions that failed.
    pub acquisition_failures: u64,
    /// Top confidence of the latest classification.
    pub last_confidence: Option<f32>,
}

/// Prometheus metrics registry for the recognition pipeline.
pub struct MetricsRegistry {
    registry: Registry,

    camera_active: IntGauge,

    // Sampler metrics
    frames_sampled_total: IntCounter,
    ticks_skipped_busy_total: IntCounter,
    ticks_skipped_not_ready_total: IntCounter,
    inference_failures_total: IntCounter,

    // Gate metrics
    predictions_shown_total: IntCounter,
    predictions_suppressed_total: IntCounter,
    last_confidence: Gauge,

    // Acquisition metrics
    acquisition_attempts_total: IntCounter,
    acquisition_failures_total: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all pipeline metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let camera_active = IntGauge::new(
            "landmark_lens_camera_active",
            "Whether a camera session is active (1=active, 0=not)",
        )?;

        let frames_sampled_total = IntCounter::new(
            "landmark_lens_frames_sampled_total",
            "Total frames submitted for classification",
        )?;
        let ticks_skipped_busy_total = IntCounter::new(
            "landmark_lens_ticks_skipped_busy_total",
            "Sampler ticks skipped because an inference was in flight",
        )?;
        let ticks_skipped_not_ready_total = IntCounter::new(
            "landmark_lens_ticks_skipped_not_ready_total",
            "Sampler ticks skipped because the stream was not ready",
        )?;
        let inference_failures_total = IntCounter::new(
            "landmark_lens_inference_failures_total",
            "Frames whose read or classification failed",
        )?;

        let predictions_shown_total = IntCounter::new(
            "landmark_lens_predictions_shown_total",
            "Predictions displayed to the user",
        )?;
        let predictions_suppressed_total = IntCounter::new(
            "landmark_lens_predictions_suppressed_total",
            "Ambient predictions cleared by the confidence gate",
        )?;
        let last_confidence = Gauge::new(
            "landmark_lens_last_confidence",
            "Top confidence of the latest classification",
        )?;

        let acquisition_attempts_total = IntCounter::new(
            "landmark_lens_acquisition_attempts_total",
            "Camera acquisitions started",
        )?;
        let acquisition_failures_total = IntCounter::new(
            "landmark_lens_acquisition_failures_total",
            "Camera acquisitions that failed",
        )?;

        registry.register(Box::new(camera_active.clone()))?;
        registry.register(Box::new(frames_sampled_total.clone()))?;
        registry.register(Box::new(ticks_skipped_busy_total.clone()))?;
        registry.register(Box::new(ticks_skipped_not_ready_total.clone()))?;
        registry.register(Box::new(inference_failures_total.clone()))?;
        registry.register(Box::new(predictions_shown_total.clone()))?;
        registry.register(Box::new(predictions_suppressed_total.clone()))?;
        registry.register(Box::new(last_confidence.clone()))?;
        registry.register(Box::new(acquisition_attempts_total.clone()))?;
        registry.register(Box::new(acquisition_failures_total.clone()))?;

        Ok(Self {
            registry,
            camera_active,
            frames_sampled_total,
            ticks_skipped_busy_total,
            ticks_skipped_not_ready_total,
            inference_failures_total,
            predictions_shown_total,
            predictions_suppressed_total,
            last_confidence,
            acquisition_attempts_total,
            acquisition_failures_total,
        })
    }

    /// Updates all metrics from a snapshot of lifecycle state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.camera_active.set(i64::from(snapshot.camera_active));

        // Counters only move forward, by the difference
        advance(&self.frames_sampled_total, snapshot.frames_sampled);
        advance(&self.ticks_skipped_busy_total, snapshot.ticks_skipped_busy);
        advance(&self.ticks_skipped_not_ready_total, snapshot.ticks_skipped_not_ready);
        advance(&self.inference_failures_total, snapshot.inference_failures);
        advance(&self.predictions_shown_total, snapshot.predictions_shown);
        advance(&self.predictions_suppressed_total, snapshot.predictions_suppressed);
        advance(&self.acquisition_attempts_total, snapshot.acquisition_attempts);
        advance(&self.acquisition_failures_total, snapshot.acquisition_failures);

        if let Some(confidence) = snapshot.last_confidence {
            self.last_confidence.set(f64::from(confidence));
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let snapshot = MetricsSnapshot {
            camera_active: true,
            frames_sampled: 10,
            ticks_skipped_busy: 2,
            predictions_shown: 4,
            predictions_suppressed: 6,
            acquisition_attempts: 1,
            last_confidence: Some(0.5),
            ..Default::default()
        };

        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("landmark_lens_camera_active 1"));
        assert!(output.contains("landmark_lens_frames_sampled_total 10"));
        assert!(output.contains("landmark_lens_predictions_suppressed_total 6"));
        assert!(output.contains("landmark_lens_last_confidence 0.5"));
    }

    #[test]
    fn test_counters_never_move_backwards() {
        let registry = MetricsRegistry::new().unwrap();

        registry.update(&MetricsSnapshot {
            frames_sampled: 10,
            ..Default::default()
        });
        registry.update(&MetricsSnapshot {
            frames_sampled: 7,
            ..Default::default()
        });

        let output = registry.encode().unwrap();
        assert!(output.contains("landmark_lens_frames_sampled_total 10"));
        assert!(output.contains("landmark_lens_camera_active 0"));
    }

    #[test]
    fn test_metrics_encode() {
        let registry = MetricsRegistry::new().unwrap();
        let output = registry.encode().unwrap();

        assert!(output.contains("landmark_lens_ticks_skipped_not_ready_total"));
        assert!(output.contains("landmark_lens_acquisition_failures_total"));
        assert!(output.contains("landmark_lens_inference_failures_total"));
    }
}
