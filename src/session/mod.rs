//! Capture session module
//!
//! - CaptureSessionController drives one capture session over a backend
//! - Session holds the active inputs and outputs behind a configuration bracket
//! - Preview attachment for the UI layer

pub mod controller;
pub mod preview;
pub mod state;

pub use controller::{
    CaptureEvent, CaptureOptions, CaptureSessionController, PhotoCapture, RecordingHandle,
    RecordingOutcome,
};
pub use preview::{PreviewLayer, PreviewSurface, Rect, VideoGravity, VideoOrientation};
pub use state::{
    CameraError, CameraResult, ControllerState, OutputKind, OutputSink, Session,
    SessionConfiguration, SessionSnapshot,
};
