//! Landmark Lens Library
//!
//! On-device recognition of a subject from a live camera or a still image,
//! using a pretrained multi-class image classifier.
//!
//! # Architecture
//!
//! ```text
//! ModelLoader ──► Classifier ◄── still image
//!                     ▲
//! PermissionNegotiator ─► CameraAcquirer ─► FrameSampler
//!                     │
//!              ConfidenceGate ─► ViewState
//! ```
//!
//! The [`session::CameraLifecycle`] owns the state machine
//! (`Idle → Requesting → Active`, or `Failed`) and everything a running
//! camera holds: the stream and the sampler.
//!
//! # Design Principles
//!
//! - **One inference at a time**: sampler ticks are skipped, never queued
//! - **Structural teardown**: streams are closed by guards and by the state
//!   machine's exit from Active, on every path
//! - **Late results are discarded**: every async result is tagged with the
//!   session or request that started it
//! - **Data-driven fallbacks**: capture constraints are an ordered ladder
//!   per device class, overridable from configuration
//!
//! # Example
//!
//! ```no_run
//! use landmark_lens::{
//!     capture::{DeviceClass, MockDevice},
//!     inference::MockModelLoader,
//!     session::{CameraLifecycle, Command, LifecycleOptions},
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let options = LifecycleOptions {
//!     device_class: DeviceClass::Android,
//!     ..Default::default()
//! };
//! let handle = CameraLifecycle::new(
//!     Arc::new(MockDevice::new()),
//!     Arc::new(MockModelLoader::new()),
//!     options,
//! )
//! .spawn();
//!
//! let mut view = handle.subscribe();
//! view.wait_for(|v| v.model_ready).await.unwrap();
//! handle.send(Command::Start).await.unwrap();
//!
//! while view.changed().await.is_ok() {
//!     if let Some(prediction) = &view.borrow().prediction {
//!         println!("{} ({:.2})", prediction.label, prediction.confidence);
//!     }
//! }
//! # }
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod config;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod pipeline;
pub mod session;

// Re-export commonly used types at crate root
pub use capture::{CaptureDevice, DeviceClass, Frame, MockDevice, PermissionState};
pub use config::{ConfigError, FileConfig};
pub use error::SessionError;
pub use inference::{Classifier, MockModelLoader, ModelLoader, ModelSource, Prediction};
pub use pipeline::{ConfidenceGate, GatePath};
pub use session::{CameraLifecycle, CameraState, Command, LifecycleHandle, ViewState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
