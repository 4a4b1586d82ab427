//! Capture backends
//!
//! The session controller talks to the platform capture framework through
//! [`CaptureBackend`]. A simulated backend is always available; the native
//! one needs the `native-camera` feature.

pub mod simulated;
pub mod traits;

#[cfg(feature = "native-camera")]
pub mod native;

pub use simulated::SimulatedBackend;
pub use traits::{
    BackendError, BackendResult, CameraPosition, CaptureBackend, CaptureDevice,
    ConfigurationLock, DeviceInput, FocusMode, ImageCodec, MediaType, MovieFinalizer, PhotoSettings,
    PixelFormat, QualityPrioritization,
};

#[cfg(feature = "native-camera")]
pub use native::NativeBackend;
