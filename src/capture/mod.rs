//! Camera input: permission, stream acquisition, and frame handling.
//!
//! This module provides abstractions over the platform capture surface,
//! the permission negotiation that gates it, and the fallback ladder of
//! constraint profiles used to open a stream on picky platforms.

mod acquirer;
mod constraints;
mod device;
mod frame;
#[cfg(feature = "camera")]
mod native;
mod permission;

pub use acquirer::{Acquired, AcquisitionError, CameraAcquirer, DEFAULT_READY_TIMEOUT};
pub use constraints::{
    builtin_ladder, Bounds, ConstraintProfile, DeviceClass, FacingMode, ProfileTable,
    UnknownDeviceClass,
};
pub use device::{CaptureDevice, MockDevice, NativeError, StreamGuard, VideoStream};
pub use frame::Frame;
#[cfg(feature = "camera")]
pub use native::NativeCameraDevice;
pub use permission::{FailureKind, PermissionNegotiator, PermissionOutcome, PermissionState};
