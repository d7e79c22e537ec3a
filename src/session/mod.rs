//! Camera session orchestration.
//!
//! The [`CameraLifecycle`] owns the camera state machine, consumes
//! [`Command`]s from the presentation layer, and publishes a [`ViewState`]
//! after every change.

mod lifecycle;
mod state;

pub use lifecycle::{CameraLifecycle, LifecycleClosed, LifecycleHandle, LifecycleOptions};
pub use state::{CameraState, Command, SessionId, ViewState};
