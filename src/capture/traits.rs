//! Capture trait definitions
//!
//! Platform-agnostic device model and the backend trait the session
//! controller drives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;

/// Physical placement of a camera relative to the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Rear,
}

impl CameraPosition {
    /// The camera on the other side of the device
    pub fn opposite(self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Rear,
            CameraPosition::Rear => CameraPosition::Front,
        }
    }
}

/// Kind of media a device produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

/// Reference to a discovered capture device.
///
/// Devices are owned by the platform; this only identifies one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDevice {
    /// Unique device ID
    pub id: String,

    /// Human readable name
    pub name: String,

    /// Video or audio
    pub media_type: MediaType,

    /// Camera placement, `None` for microphones and unclassified cameras
    pub position: Option<CameraPosition>,
}

impl CaptureDevice {
    pub fn camera(id: impl Into<String>, name: impl Into<String>, position: Option<CameraPosition>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            media_type: MediaType::Video,
            position,
        }
    }

    pub fn microphone(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            media_type: MediaType::Audio,
            position: None,
        }
    }
}

/// A device bound as a session input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInput {
    pub device: CaptureDevice,
}

impl DeviceInput {
    pub fn media_type(&self) -> MediaType {
        self.device.media_type
    }

    pub fn position(&self) -> Option<CameraPosition> {
        self.device.position
    }
}

/// Focus behavior applied while a device is locked for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusMode {
    Locked,
    AutoFocus,
    ContinuousAutoFocus,
}

/// Still image codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageCodec {
    Jpeg,
}

impl ImageCodec {
    /// Get the file extension for this codec
    pub fn extension(&self) -> &'static str {
        match self {
            ImageCodec::Jpeg => "jpeg",
        }
    }
}

/// Speed/quality trade-off for still capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPrioritization {
    Speed,
    Balanced,
    Quality,
}

/// Pixel layout of preview-sized images delivered alongside a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra,
    Nv12,
    Yuyv,
    Rgb,
}

/// Settings for a single still capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoSettings {
    pub codec: ImageCodec,
    pub quality: QualityPrioritization,
    pub portrait_matte: bool,
    pub preview_format: Option<PixelFormat>,
}

impl PhotoSettings {
    /// Baseline JPEG settings a photo output is prepared with
    pub fn baseline() -> Self {
        Self {
            codec: ImageCodec::Jpeg,
            quality: QualityPrioritization::Balanced,
            portrait_matte: false,
            preview_format: None,
        }
    }
}

/// Errors raised by the platform capture layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device is busy: {0}")]
    DeviceBusy(String),

    #[error("Configuration lock refused for {0}")]
    LockRefused(String),

    #[error("Unsupported setting: {0}")]
    Unsupported(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BackendError {
    fn from(error: std::io::Error) -> Self {
        BackendError::Io(error.to_string())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Platform media-capture framework.
///
/// Synchronous methods are called from the blocking configuration thread or
/// under the session write lock and must not wait on frame delivery.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// All cameras the platform exposes
    fn discover_cameras(&self) -> Vec<CaptureDevice>;

    /// First camera at the given position
    fn camera_at(&self, position: CameraPosition) -> Option<CaptureDevice> {
        self.discover_cameras()
            .into_iter()
            .find(|camera| camera.position == Some(position))
    }

    /// System default microphone, if any
    fn default_audio_device(&self) -> Option<CaptureDevice>;

    /// Take the exclusive configuration lock on a device
    fn lock_for_configuration(&self, device: &CaptureDevice) -> BackendResult<()>;

    /// Release a lock taken by [`CaptureBackend::lock_for_configuration`]
    fn unlock_for_configuration(&self, device: &CaptureDevice);

    /// Change focus behavior; the device must be locked
    fn set_focus_mode(&self, device: &CaptureDevice, mode: FocusMode) -> BackendResult<()>;

    /// Bind a device so it can be added to a session
    fn open_input(&self, device: &CaptureDevice) -> BackendResult<DeviceInput>;

    /// Start frame delivery for the given inputs
    fn start_running(&self, inputs: &[DeviceInput]) -> BackendResult<()>;

    /// Apply a changed input set to a running session
    fn commit_configuration(&self, inputs: &[DeviceInput]) -> BackendResult<()>;

    /// Stop frame delivery
    fn stop_running(&self);

    /// Preview pixel formats available for still capture, in preference order
    fn available_preview_formats(&self) -> Vec<PixelFormat>;

    /// Capture and encode one still image
    async fn capture_photo(&self, settings: PhotoSettings) -> BackendResult<Vec<u8>>;

    /// Begin writing a movie file to `path`.
    ///
    /// Fails with [`BackendError::DeviceBusy`] while another movie is still
    /// attached; detach it with [`stop_movie`](Self::stop_movie) first.
    fn start_movie(&self, path: &Path) -> BackendResult<()>;

    /// Detach the movie being written and hand back its finalization.
    ///
    /// Detaching happens before this returns, so a following `start_movie`
    /// never touches the detached writer. Returns `None` when nothing was
    /// being recorded.
    fn stop_movie(&self) -> Option<MovieFinalizer>;
}

/// Pending finalization of a detached movie; resolves to the written file
pub type MovieFinalizer = Pin<Box<dyn Future<Output = BackendResult<PathBuf>> + Send>>;

/// Exclusive configuration lock on a device, released on drop
pub struct ConfigurationLock<'a> {
    backend: &'a dyn CaptureBackend,
    device: &'a CaptureDevice,
}

impl<'a> ConfigurationLock<'a> {
    pub fn acquire(backend: &'a dyn CaptureBackend, device: &'a CaptureDevice) -> BackendResult<Self> {
        backend.lock_for_configuration(device)?;
        Ok(Self { backend, device })
    }

    pub fn set_focus_mode(&self, mode: FocusMode) -> BackendResult<()> {
        self.backend.set_focus_mode(self.device, mode)
    }
}

impl Drop for ConfigurationLock<'_> {
    fn drop(&mut self) {
        self.backend.unlock_for_configuration(self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_position() {
        assert_eq!(CameraPosition::Front.opposite(), CameraPosition::Rear);
        assert_eq!(CameraPosition::Rear.opposite(), CameraPosition::Front);
    }

    #[test]
    fn test_baseline_settings() {
        let settings = PhotoSettings::baseline();
        assert_eq!(settings.codec, ImageCodec::Jpeg);
        assert_eq!(settings.quality, QualityPrioritization::Balanced);
        assert!(!settings.portrait_matte);
        assert_eq!(settings.codec.extension(), "jpeg");
    }

    #[test]
    fn test_device_serializes_camel_case() {
        let device = CaptureDevice::camera("0", "Back Camera", Some(CameraPosition::Rear));
        let json = serde_json::to_string(&device).unwrap();
        assert!(json.contains("\"mediaType\":\"video\""));
        assert!(json.contains("\"position\":\"rear\""));
    }
}
