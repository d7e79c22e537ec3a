//! Prometheus metrics exporter for the recognition pipeline.
//!
//! The lifecycle publishes a [`MetricsSnapshot`] after every handled
//! command or event; the registry turns snapshots into Prometheus metrics,
//! optionally served over HTTP (feature `metrics`).
//!
//! # Metrics Exposed
//!
//! - `landmark_lens_camera_active` - Whether a camera session is active
//! - `landmark_lens_frames_sampled_total` - Frames submitted for classification
//! - `landmark_lens_ticks_skipped_busy_total` - Ticks skipped while an inference was in flight
//! - `landmark_lens_ticks_skipped_not_ready_total` - Ticks skipped on a stream that was not ready
//! - `landmark_lens_inference_failures_total` - Per-frame failures (logged, never shown)
//! - `landmark_lens_predictions_shown_total` - Predictions displayed
//! - `landmark_lens_predictions_suppressed_total` - Ambient predictions cleared by the gate
//! - `landmark_lens_acquisition_attempts_total` - Camera acquisitions started
//! - `landmark_lens_acquisition_failures_total` - Camera acquisitions that failed
//! - `landmark_lens_last_confidence` - Top confidence of the latest classification
//!
//! # Example
//!
//! ```no_run
//! use landmark_lens::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let snapshot = MetricsSnapshot {
//!     camera_active: true,
//!     frames_sampled: 12,
//!     predictions_shown: 3,
//!     last_confidence: Some(0.82),
//!     ..Default::default()
//! };
//!
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
