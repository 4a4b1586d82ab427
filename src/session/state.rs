//! Capture session state
//!
//! Defines the controller state machine, the error kinds it reports, and the
//! session aggregate with its configuration bracket.

use crate::capture::{BackendError, CameraPosition, DeviceInput, MediaType, PhotoSettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle of a capture session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    /// No session has been prepared
    Uninitialized,
    /// Devices are being discovered and wired
    Configuring,
    /// Session is configured and running
    Ready,
    /// The last prepare attempt failed
    Failed,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

/// Errors reported by the capture session controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Capture session is already running")]
    CaptureSessionAlreadyRunning,

    #[error("Capture session is missing or not running")]
    CaptureSessionIsMissing,

    #[error("Inputs are invalid")]
    InputsAreInvalid,

    #[error("Invalid operation")]
    InvalidOperation,

    #[error("No cameras available")]
    NoCamerasAvailable,

    #[error("Unknown camera error")]
    Unknown,

    #[error("Device error: {0}")]
    Device(#[from] BackendError),
}

impl CameraError {
    /// Stable code for UI consumers
    pub fn code(&self) -> &'static str {
        match self {
            CameraError::CaptureSessionAlreadyRunning => "CAPTURE_SESSION_ALREADY_RUNNING",
            CameraError::CaptureSessionIsMissing => "CAPTURE_SESSION_IS_MISSING",
            CameraError::InputsAreInvalid => "INPUTS_ARE_INVALID",
            CameraError::InvalidOperation => "INVALID_OPERATION",
            CameraError::NoCamerasAvailable => "NO_CAMERAS_AVAILABLE",
            CameraError::Unknown => "UNKNOWN",
            CameraError::Device(_) => "DEVICE_ERROR",
        }
    }
}

pub type CameraResult<T> = Result<T, CameraError>;

/// Kind of output sink attached to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Photo,
    Movie,
}

/// Consumer of captured frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputSink {
    /// Still-photo encoder prepared with the given settings
    Photo { prepared: Vec<PhotoSettings> },
    /// Movie-file writer
    Movie,
}

impl OutputSink {
    pub fn kind(&self) -> OutputKind {
        match self {
            OutputSink::Photo { .. } => OutputKind::Photo,
            OutputSink::Movie => OutputKind::Movie,
        }
    }
}

/// Staged input/output sets inside a configuration bracket
#[derive(Debug, Clone)]
pub struct SessionConfiguration {
    inputs: Vec<DeviceInput>,
    outputs: Vec<OutputSink>,
}

impl SessionConfiguration {
    pub fn inputs(&self) -> &[DeviceInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSink] {
        &self.outputs
    }

    /// At most one input per media type, and never the same device twice
    pub fn can_add_input(&self, input: &DeviceInput) -> bool {
        !self.inputs.iter().any(|existing| {
            existing.media_type() == input.media_type() || existing.device.id == input.device.id
        })
    }

    pub fn add_input(&mut self, input: DeviceInput) -> CameraResult<()> {
        if !self.can_add_input(&input) {
            return Err(CameraError::InputsAreInvalid);
        }
        self.inputs.push(input);
        Ok(())
    }

    /// Remove and return the input of the given media type
    pub fn remove_input(&mut self, media_type: MediaType) -> Option<DeviceInput> {
        let index = self
            .inputs
            .iter()
            .position(|input| input.media_type() == media_type)?;
        Some(self.inputs.remove(index))
    }

    pub fn can_add_output(&self, output: &OutputSink) -> bool {
        !self.outputs.iter().any(|o| o.kind() == output.kind())
    }

    pub fn add_output(&mut self, output: OutputSink) -> CameraResult<()> {
        if !self.can_add_output(&output) {
            return Err(CameraError::InvalidOperation);
        }
        self.outputs.push(output);
        Ok(())
    }
}

/// Aggregate of active inputs and outputs
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    inputs: Vec<DeviceInput>,
    outputs: Vec<OutputSink>,
    running: bool,
}

impl Session {
    /// Create an empty, stopped session
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            running: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn inputs(&self) -> &[DeviceInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSink] {
        &self.outputs
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn input(&self, media_type: MediaType) -> Option<&DeviceInput> {
        self.inputs.iter().find(|i| i.media_type() == media_type)
    }

    pub fn output(&self, kind: OutputKind) -> Option<&OutputSink> {
        self.outputs.iter().find(|o| o.kind() == kind)
    }

    /// Position of the active camera
    pub fn camera_position(&self) -> Option<CameraPosition> {
        self.input(MediaType::Video).and_then(DeviceInput::position)
    }

    /// Apply input/output changes atomically.
    ///
    /// `f` works on a staged copy; the copy replaces the live sets only when
    /// `f` succeeds, so an error leaves the session exactly as it was.
    pub fn configure<T, E>(
        &mut self,
        f: impl FnOnce(&mut SessionConfiguration) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut staged = SessionConfiguration {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        };
        let value = f(&mut staged)?;
        self.inputs = staged.inputs;
        self.outputs = staged.outputs;
        Ok(value)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            created_at: self.created_at,
            inputs: self.inputs.clone(),
            outputs: self.outputs.iter().map(OutputSink::kind).collect(),
            running: self.running,
            camera_position: self.camera_position(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a session for readers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub inputs: Vec<DeviceInput>,
    pub outputs: Vec<OutputKind>,
    pub running: bool,
    pub camera_position: Option<CameraPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureDevice;

    fn camera(id: &str, position: CameraPosition) -> DeviceInput {
        DeviceInput {
            device: CaptureDevice::camera(id, id, Some(position)),
        }
    }

    fn microphone() -> DeviceInput {
        DeviceInput {
            device: CaptureDevice::microphone("mic", "Microphone"),
        }
    }

    #[test]
    fn test_one_input_per_media_type() {
        let mut session = Session::new();
        let result = session.configure(|config| {
            config.add_input(camera("rear", CameraPosition::Rear))?;
            config.add_input(microphone())?;
            config.add_input(camera("front", CameraPosition::Front))
        });

        assert_eq!(result, Err(CameraError::InputsAreInvalid));
        // Whole bracket discarded
        assert!(session.inputs().is_empty());
    }

    #[test]
    fn test_configure_commits_on_success() {
        let mut session = Session::new();
        session
            .configure(|config| {
                config.add_input(camera("rear", CameraPosition::Rear))?;
                config.add_output(OutputSink::Movie)
            })
            .unwrap();

        assert_eq!(session.camera_position(), Some(CameraPosition::Rear));
        assert!(session.output(OutputKind::Movie).is_some());
    }

    #[test]
    fn test_failed_bracket_keeps_previous_inputs() {
        let mut session = Session::new();
        session
            .configure(|config| config.add_input(camera("rear", CameraPosition::Rear)))
            .unwrap();

        let result: CameraResult<()> = session.configure(|config| {
            config.remove_input(MediaType::Video);
            Err(CameraError::NoCamerasAvailable)
        });

        assert_eq!(result, Err(CameraError::NoCamerasAvailable));
        assert_eq!(session.camera_position(), Some(CameraPosition::Rear));
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut session = Session::new();
        let result = session.configure(|config| {
            config.add_output(OutputSink::Movie)?;
            config.add_output(OutputSink::Movie)
        });
        assert_eq!(result, Err(CameraError::InvalidOperation));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CameraError::CaptureSessionIsMissing.code(),
            "CAPTURE_SESSION_IS_MISSING"
        );
        let device = CameraError::from(BackendError::DeviceBusy("cam".to_string()));
        assert_eq!(device.code(), "DEVICE_ERROR");
    }
}
