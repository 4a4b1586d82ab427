//! Capture session controller
//!
//! Negotiates camera and microphone inputs, attaches the photo and movie
//! outputs, and exposes still capture, recording and camera switching.

use super::preview::{self, PreviewLayer, PreviewSurface};
use super::state::{
    CameraError, CameraResult, ControllerState, OutputKind, OutputSink, Session,
    SessionConfiguration, SessionSnapshot,
};
use crate::capture::{
    BackendError, CameraPosition, CaptureBackend, ConfigurationLock, FocusMode, MediaType,
    MovieFinalizer, PhotoSettings,
};
use crate::storage::{MediaStore, NamingScheme, DEFAULT_VIDEO_EXTENSION};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

/// Events emitted by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Session prepared with the camera at this position active
    Prepared(Option<CameraPosition>),
    /// Prepare failed
    PrepareFailed(String),
    /// Active camera changed
    CameraSwitched(CameraPosition),
    /// Still capture written to storage
    PhotoSaved(PathBuf),
    /// Still capture failed and was discarded
    PhotoDropped,
    /// Movie writing began
    RecordingStarted(PathBuf),
    /// Movie finalized
    RecordingFinished(PathBuf),
    /// Movie could not be finalized
    RecordingFailed(String),
    /// Session torn down
    SessionStopped,
}

/// Tunables for a controller
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Attach the default microphone when one exists
    pub capture_audio: bool,
    pub photo_naming: NamingScheme,
    pub video_naming: NamingScheme,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            capture_audio: true,
            photo_naming: NamingScheme::new("picture", "jpeg"),
            video_naming: NamingScheme::new("recording", DEFAULT_VIDEO_EXTENSION),
        }
    }
}

/// Final result of a recording: the written file, or why it failed
pub type RecordingOutcome = Result<PathBuf, CameraError>;

struct PendingRecording {
    path: PathBuf,
    started_at: DateTime<Utc>,
    completion: oneshot::Sender<RecordingOutcome>,
}

/// Completion of a still capture
pub struct PhotoCapture {
    receiver: oneshot::Receiver<Option<PathBuf>>,
}

impl PhotoCapture {
    /// Path of the stored photo, `None` when the capture was dropped
    pub async fn saved(self) -> Option<PathBuf> {
        self.receiver.await.ok().flatten()
    }
}

/// Completion of a recording started with
/// [`CaptureSessionController::start_recording`]
pub struct RecordingHandle {
    path: Option<PathBuf>,
    receiver: oneshot::Receiver<RecordingOutcome>,
}

impl RecordingHandle {
    /// Destination being written, `None` when the recording never started
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Wait for the recording to resolve.
    ///
    /// Returns `None` when a later `start_recording` replaced this handle's
    /// completion before the recording finished.
    pub async fn finished(self) -> Option<RecordingOutcome> {
        self.receiver.await.ok()
    }
}

/// Owns one capture session and everything attached to it
pub struct CaptureSessionController {
    backend: Arc<dyn CaptureBackend>,
    store: MediaStore,
    options: CaptureOptions,
    state: RwLock<ControllerState>,
    session: RwLock<Option<Session>>,
    preview: Mutex<Option<PreviewLayer>>,
    pending_recording: Arc<Mutex<Option<PendingRecording>>>,
    event_tx: broadcast::Sender<CaptureEvent>,
}

impl CaptureSessionController {
    pub fn new(backend: Arc<dyn CaptureBackend>, store: MediaStore, options: CaptureOptions) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            backend,
            store,
            options,
            state: RwLock::new(ControllerState::Uninitialized),
            session: RwLock::new(None),
            preview: Mutex::new(None),
            pending_recording: Arc::new(Mutex::new(None)),
            event_tx,
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.read()
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.event_tx.subscribe()
    }

    /// Consistent copy of the current session, if any
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session.read().as_ref().map(Session::snapshot)
    }

    pub fn is_running(&self) -> bool {
        self.session.read().as_ref().is_some_and(Session::is_running)
    }

    pub fn current_position(&self) -> Option<CameraPosition> {
        self.session.read().as_ref().and_then(Session::camera_position)
    }

    /// Whether a recording completion is waiting to be resolved
    pub fn has_pending_recording(&self) -> bool {
        self.pending_recording.lock().is_some()
    }

    pub fn preview_layer(&self) -> Option<PreviewLayer> {
        self.preview.lock().clone()
    }

    /// Discover devices, wire inputs and outputs, and start the session.
    ///
    /// The blocking configuration sequence runs on the blocking thread pool.
    pub async fn prepare(&self) -> CameraResult<()> {
        {
            let mut state = self.state.write();
            match *state {
                ControllerState::Configuring | ControllerState::Ready => {
                    return Err(CameraError::CaptureSessionAlreadyRunning);
                }
                ControllerState::Uninitialized | ControllerState::Failed => {
                    *state = ControllerState::Configuring;
                }
            }
        }

        tracing::info!("Preparing capture session on {} backend", self.backend.name());

        let backend = self.backend.clone();
        let capture_audio = self.options.capture_audio;
        let result =
            match tokio::task::spawn_blocking(move || build_session(backend.as_ref(), capture_audio))
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Session configuration task failed: {}", e);
                    Err(CameraError::Unknown)
                }
            };

        match result {
            Ok(session) => {
                let position = session.camera_position();
                *self.session.write() = Some(session);
                *self.state.write() = ControllerState::Ready;
                let _ = self.event_tx.send(CaptureEvent::Prepared(position));
                tracing::info!("Capture session ready, camera position {:?}", position);
                Ok(())
            }
            Err(error) => {
                *self.state.write() = ControllerState::Failed;
                let _ = self.event_tx.send(CaptureEvent::PrepareFailed(error.to_string()));
                tracing::warn!("Capture session preparation failed: {}", error);
                Err(error)
            }
        }
    }

    /// Attach a live preview to `surface`
    pub fn display_preview(&self, surface: &mut dyn PreviewSurface) -> CameraResult<PreviewLayer> {
        let session_id = match self.session.read().as_ref() {
            Some(session) if session.is_running() => session.id(),
            _ => return Err(CameraError::CaptureSessionIsMissing),
        };

        let layer = preview::attach(surface, session_id);
        *self.preview.lock() = Some(layer.clone());
        tracing::debug!("Preview layer {} attached", layer.id);
        Ok(layer)
    }

    /// Swap between the front and rear camera in one configuration bracket.
    ///
    /// On failure the previous camera stays active.
    pub fn switch_cameras(&self) -> CameraResult<CameraPosition> {
        let backend = self.backend.as_ref();

        let position = self.reconfigure(|config| {
            let current = config
                .remove_input(MediaType::Video)
                .ok_or(CameraError::InvalidOperation)?;
            let target = match current.position() {
                Some(CameraPosition::Rear) => CameraPosition::Front,
                _ => CameraPosition::Rear,
            };

            let camera = backend
                .camera_at(target)
                .ok_or(CameraError::NoCamerasAvailable)?;
            config.add_input(backend.open_input(&camera)?)?;

            // Re-add audio after video
            if let Some(audio) = config.remove_input(MediaType::Audio) {
                match backend.open_input(&audio.device) {
                    Ok(input) if config.can_add_input(&input) => config.add_input(input)?,
                    Ok(_) => tracing::warn!("Audio input {} rejected after switch", audio.device.name),
                    Err(e) => tracing::warn!("Audio input dropped after switch: {}", e),
                }
            }

            Ok(target)
        });

        match &position {
            Ok(target) => {
                let _ = self.event_tx.send(CaptureEvent::CameraSwitched(*target));
                tracing::info!("Switched to {:?} camera", target);
            }
            Err(e) => tracing::warn!("Camera switch failed: {}", e),
        }
        position
    }

    /// Capture one still image and store it.
    ///
    /// Must be called within a tokio runtime. Exactly one completion is
    /// delivered; encoding or storage failures are logged and yield `None`.
    pub fn take_picture(&self) -> PhotoCapture {
        let (tx, rx) = oneshot::channel();

        let has_photo_output = self
            .session
            .read()
            .as_ref()
            .is_some_and(|s| s.is_running() && s.output(OutputKind::Photo).is_some());
        if !has_photo_output {
            tracing::debug!("No running photo output, still capture dropped");
            let _ = tx.send(None);
            return PhotoCapture { receiver: rx };
        }

        let settings = PhotoSettings {
            preview_format: self.backend.available_preview_formats().first().copied(),
            ..PhotoSettings::baseline()
        };

        let backend = self.backend.clone();
        let store = self.store.clone();
        let naming = self.options.photo_naming.clone();
        let events = self.event_tx.clone();

        tokio::spawn(async move {
            let saved = match backend.capture_photo(settings).await {
                Ok(data) => match store.write_new(&naming, &data) {
                    Ok(path) => {
                        tracing::info!("Photo saved to {:?}", path);
                        Some(path)
                    }
                    Err(e) => {
                        tracing::warn!("Failed to store photo: {}", e);
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!("Photo capture failed: {}", e);
                    None
                }
            };

            let event = match &saved {
                Some(path) => CaptureEvent::PhotoSaved(path.clone()),
                None => CaptureEvent::PhotoDropped,
            };
            let _ = events.send(event);
            let _ = tx.send(saved);
        });

        PhotoCapture { receiver: rx }
    }

    /// Begin recording to the next free video name.
    ///
    /// The returned handle resolves when a later
    /// [`stop_recording`](Self::stop_recording) finalizes the movie, or
    /// immediately when the recording cannot start. Must be called within a
    /// tokio runtime.
    pub fn start_recording(&self) -> RecordingHandle {
        let (tx, rx) = oneshot::channel();
        let fail = |tx: oneshot::Sender<RecordingOutcome>,
                    rx: oneshot::Receiver<RecordingOutcome>,
                    error: CameraError| {
            tracing::warn!("Recording not started: {}", error);
            let _ = tx.send(Err(error));
            RecordingHandle { path: None, receiver: rx }
        };

        let (running, has_movie_output) = match self.session.read().as_ref() {
            Some(session) => (session.is_running(), session.output(OutputKind::Movie).is_some()),
            None => (false, false),
        };
        if !running {
            return fail(tx, rx, CameraError::CaptureSessionIsMissing);
        }
        if !has_movie_output {
            return fail(tx, rx, CameraError::InvalidOperation);
        }

        // Unstopped recording: its movie is finalized on its own and its
        // completion is dropped
        if let Some(finalizer) = self.backend.stop_movie() {
            if let Some(previous) = self.pending_recording.lock().take() {
                tracing::warn!(
                    "Pending completion for {:?} replaced by a new recording",
                    previous.path
                );
            }
            spawn_finalize(finalizer, None, self.event_tx.clone());
        }

        if let Err(e) = std::fs::create_dir_all(self.store.root()) {
            return fail(tx, rx, BackendError::from(e).into());
        }
        let path = self.store.next_available_path(&self.options.video_naming);
        if let Err(e) = self.backend.start_movie(&path) {
            return fail(tx, rx, e.into());
        }

        let replaced = self.pending_recording.lock().replace(PendingRecording {
            path: path.clone(),
            started_at: Utc::now(),
            completion: tx,
        });
        if let Some(previous) = replaced {
            tracing::warn!(
                "Pending completion for {:?} replaced by a new recording",
                previous.path
            );
        }

        let _ = self.event_tx.send(CaptureEvent::RecordingStarted(path.clone()));
        tracing::info!("Recording started: {:?}", path);

        RecordingHandle {
            path: Some(path),
            receiver: rx,
        }
    }

    /// Ask the movie output to finalize.
    ///
    /// The movie and its completion are detached before this returns, so a
    /// `start_recording` right after it begins a fresh recording. Only
    /// precondition failures are reported here; the outcome of the recording
    /// goes to the handle returned by `start_recording`. Must be called
    /// within a tokio runtime.
    pub fn stop_recording(&self) -> CameraResult<()> {
        if !self.is_running() {
            return Err(CameraError::CaptureSessionIsMissing);
        }

        let Some(finalizer) = self.backend.stop_movie() else {
            tracing::debug!("Stop requested with no recording in flight");
            return Ok(());
        };
        let recording = self.pending_recording.lock().take();
        spawn_finalize(finalizer, recording, self.event_tx.clone());

        Ok(())
    }

    /// Stop the session and drop it; the controller can be prepared again
    pub fn shutdown(&self) {
        let session = self.session.write().take();
        if session.is_some_and(|s| s.is_running()) {
            self.backend.stop_running();
        }
        if self.backend.stop_movie().is_some() {
            tracing::warn!("Movie writer discarded unfinished");
        }
        if let Some(recording) = self.pending_recording.lock().take() {
            tracing::warn!("Discarding pending completion for {:?}", recording.path);
        }
        *self.preview.lock() = None;
        *self.state.write() = ControllerState::Uninitialized;
        let _ = self.event_tx.send(CaptureEvent::SessionStopped);
        tracing::info!("Capture session stopped");
    }

    /// Run `f` as one configuration bracket on the live session.
    ///
    /// The session write lock is held for the whole bracket, so readers see
    /// either the old or the new input set. A running backend is told about
    /// the new inputs before the bracket commits.
    fn reconfigure<T>(
        &self,
        f: impl FnOnce(&mut SessionConfiguration) -> CameraResult<T>,
    ) -> CameraResult<T> {
        let mut guard = self.session.write();
        let session = guard.as_mut().ok_or(CameraError::CaptureSessionIsMissing)?;
        let running = session.is_running();
        let backend = self.backend.as_ref();

        session.configure(|config| {
            let value = f(config)?;
            if running {
                backend.commit_configuration(config.inputs())?;
            }
            Ok(value)
        })
    }
}

/// Await a detached movie and deliver the outcome to its completion, if any
fn spawn_finalize(
    finalizer: MovieFinalizer,
    recording: Option<PendingRecording>,
    events: broadcast::Sender<CaptureEvent>,
) {
    tokio::spawn(async move {
        let outcome = finalizer.await.map_err(CameraError::from);
        let event = match &outcome {
            Ok(path) => CaptureEvent::RecordingFinished(path.clone()),
            Err(e) => CaptureEvent::RecordingFailed(e.to_string()),
        };
        let _ = events.send(event);

        match recording {
            Some(recording) => {
                let elapsed = Utc::now() - recording.started_at;
                tracing::info!(
                    "Recording {:?} resolved after {}ms: {:?}",
                    recording.path,
                    elapsed.num_milliseconds(),
                    outcome
                );
                let _ = recording.completion.send(outcome);
            }
            None => tracing::debug!("Recording finished with no completion registered: {:?}", outcome),
        }
    });
}

/// The prepare sequence. Runs on a blocking thread.
fn build_session(backend: &dyn CaptureBackend, capture_audio: bool) -> CameraResult<Session> {
    let mut session = Session::new();

    let cameras = backend.discover_cameras();
    if cameras.is_empty() {
        return Err(CameraError::NoCamerasAvailable);
    }

    let front = cameras
        .iter()
        .find(|c| c.position == Some(CameraPosition::Front))
        .cloned();
    let rear = cameras
        .iter()
        .find(|c| c.position == Some(CameraPosition::Rear))
        .cloned();

    for camera in [&front, &rear].into_iter().flatten() {
        let lock = ConfigurationLock::acquire(backend, camera)?;
        lock.set_focus_mode(FocusMode::ContinuousAutoFocus)?;
    }

    let audio_device = if capture_audio {
        backend.default_audio_device()
    } else {
        None
    };
    if audio_device.is_none() {
        tracing::debug!("No audio input, recording video only");
    }

    let (camera, position) = match (&rear, &front) {
        (Some(rear), _) => (rear, CameraPosition::Rear),
        (None, Some(front)) => (front, CameraPosition::Front),
        (None, None) => return Err(CameraError::NoCamerasAvailable),
    };
    session.configure(|config| {
        config.add_input(backend.open_input(camera)?)?;
        if let Some(audio) = &audio_device {
            config.add_input(backend.open_input(audio)?)?;
        }
        Ok::<_, CameraError>(())
    })?;
    tracing::debug!("Using {:?} camera {}", position, camera.name);

    session.configure(|config| {
        config.add_output(OutputSink::Photo {
            prepared: vec![PhotoSettings::baseline()],
        })
    })?;

    session.configure(|config| config.add_output(OutputSink::Movie))?;

    backend.start_running(session.inputs())?;
    session.set_running(true);

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{BackendError, CaptureBackend, SimulatedBackend};
    use crate::session::preview::tests::RecordingSurface;
    use crate::session::preview::{VideoGravity, VideoOrientation};
    use std::fs;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn controller_with(backend: SimulatedBackend) -> (CaptureSessionController, Arc<SimulatedBackend>, TempDir) {
        let dir = tempdir().unwrap();
        let backend = Arc::new(backend);
        let controller = CaptureSessionController::new(
            backend.clone(),
            MediaStore::new(dir.path()),
            CaptureOptions::default(),
        );
        (controller, backend, dir)
    }

    async fn ready_phone() -> (CaptureSessionController, Arc<SimulatedBackend>, TempDir) {
        let (controller, backend, dir) = controller_with(SimulatedBackend::phone());
        controller.prepare().await.unwrap();
        (controller, backend, dir)
    }

    fn count(snapshot: &SessionSnapshot, media_type: MediaType) -> usize {
        snapshot
            .inputs
            .iter()
            .filter(|i| i.media_type() == media_type)
            .count()
    }

    #[tokio::test]
    async fn test_prepare_prefers_rear_camera_and_adds_microphone() {
        let (controller, backend, _dir) = ready_phone().await;

        assert_eq!(controller.state(), ControllerState::Ready);
        let snapshot = controller.snapshot().unwrap();
        assert!(snapshot.running);
        assert_eq!(snapshot.camera_position, Some(CameraPosition::Rear));
        assert_eq!(count(&snapshot, MediaType::Video), 1);
        assert_eq!(count(&snapshot, MediaType::Audio), 1);
        assert_eq!(snapshot.outputs, vec![OutputKind::Photo, OutputKind::Movie]);

        assert!(backend.is_running());
        assert_eq!(backend.running_inputs().len(), 2);
        for id in ["back-wide", "front-wide"] {
            assert_eq!(backend.focus_mode(id), Some(FocusMode::ContinuousAutoFocus));
            assert!(!backend.is_locked(id));
        }
    }

    #[tokio::test]
    async fn test_prepare_falls_back_to_front_camera() {
        let backend = SimulatedBackend::new().with_camera("front", "Front", Some(CameraPosition::Front));
        let (controller, _backend, _dir) = controller_with(backend);

        controller.prepare().await.unwrap();

        let snapshot = controller.snapshot().unwrap();
        assert_eq!(snapshot.camera_position, Some(CameraPosition::Front));
        assert_eq!(count(&snapshot, MediaType::Audio), 0);
    }

    #[tokio::test]
    async fn test_prepare_without_cameras_fails() {
        let (controller, backend, _dir) = controller_with(SimulatedBackend::new());

        assert_eq!(controller.prepare().await, Err(CameraError::NoCamerasAvailable));
        assert_eq!(controller.state(), ControllerState::Failed);
        assert!(controller.snapshot().is_none());
        assert!(!backend.is_running());
    }

    #[tokio::test]
    async fn test_prepare_with_unclassified_cameras_fails() {
        let backend = SimulatedBackend::new().with_camera("usb", "USB Camera", None);
        let (controller, _backend, _dir) = controller_with(backend);

        assert_eq!(controller.prepare().await, Err(CameraError::NoCamerasAvailable));
    }

    #[tokio::test]
    async fn test_prepare_twice_is_rejected() {
        let (controller, _backend, _dir) = ready_phone().await;
        assert_eq!(
            controller.prepare().await,
            Err(CameraError::CaptureSessionAlreadyRunning)
        );
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[tokio::test]
    async fn test_refused_lock_fails_then_retry_succeeds() {
        let (controller, backend, _dir) = controller_with(SimulatedBackend::phone());
        backend.refuse_locks(true);

        let result = controller.prepare().await;
        assert!(matches!(
            result,
            Err(CameraError::Device(BackendError::LockRefused(_)))
        ));
        assert_eq!(controller.state(), ControllerState::Failed);
        assert!(!backend.is_running());

        backend.refuse_locks(false);
        controller.prepare().await.unwrap();
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[tokio::test]
    async fn test_busy_microphone_fails_whole_prepare() {
        let (controller, backend, _dir) = controller_with(SimulatedBackend::phone());
        backend.make_unavailable("mic");

        assert!(matches!(
            controller.prepare().await,
            Err(CameraError::Device(BackendError::DeviceBusy(_)))
        ));
        assert!(controller.snapshot().is_none());
        assert!(!backend.is_running());
    }

    #[tokio::test]
    async fn test_audio_capture_can_be_disabled() {
        let dir = tempdir().unwrap();
        let options = CaptureOptions {
            capture_audio: false,
            ..CaptureOptions::default()
        };
        let controller = CaptureSessionController::new(
            Arc::new(SimulatedBackend::phone()),
            MediaStore::new(dir.path()),
            options,
        );

        controller.prepare().await.unwrap();
        assert_eq!(count(&controller.snapshot().unwrap(), MediaType::Audio), 0);
    }

    #[tokio::test]
    async fn test_switch_twice_returns_to_original_camera() {
        let (controller, backend, _dir) = ready_phone().await;

        assert_eq!(controller.switch_cameras(), Ok(CameraPosition::Front));
        let snapshot = controller.snapshot().unwrap();
        assert_eq!(snapshot.camera_position, Some(CameraPosition::Front));
        assert_eq!(count(&snapshot, MediaType::Audio), 1);
        assert_eq!(snapshot.inputs[0].media_type(), MediaType::Video);
        assert!(backend
            .running_inputs()
            .iter()
            .any(|i| i.device.id == "front-wide"));

        assert_eq!(controller.switch_cameras(), Ok(CameraPosition::Rear));
        assert_eq!(controller.current_position(), Some(CameraPosition::Rear));
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_current_camera() {
        let (controller, backend, _dir) = ready_phone().await;
        backend.remove_cameras_at(CameraPosition::Front);

        assert_eq!(controller.switch_cameras(), Err(CameraError::NoCamerasAvailable));

        let snapshot = controller.snapshot().unwrap();
        assert_eq!(snapshot.camera_position, Some(CameraPosition::Rear));
        assert_eq!(count(&snapshot, MediaType::Video), 1);
        assert_eq!(count(&snapshot, MediaType::Audio), 1);
        assert!(backend
            .running_inputs()
            .iter()
            .any(|i| i.device.id == "back-wide"));
    }

    #[tokio::test]
    async fn test_switch_to_busy_camera_keeps_current_camera() {
        let (controller, backend, _dir) = ready_phone().await;
        backend.make_unavailable("front-wide");

        assert!(matches!(
            controller.switch_cameras(),
            Err(CameraError::Device(BackendError::DeviceBusy(_)))
        ));
        assert_eq!(controller.current_position(), Some(CameraPosition::Rear));
    }

    #[test]
    fn test_switch_without_session() {
        let (controller, _backend, _dir) = controller_with(SimulatedBackend::phone());
        assert_eq!(
            controller.switch_cameras(),
            Err(CameraError::CaptureSessionIsMissing)
        );
    }

    #[tokio::test]
    async fn test_picture_takes_next_free_name() {
        let (controller, backend, dir) = ready_phone().await;
        fs::write(dir.path().join("picture.jpeg"), b"0").unwrap();
        fs::write(dir.path().join("picture1.jpeg"), b"1").unwrap();

        let saved = controller.take_picture().saved().await;

        assert_eq!(saved, Some(dir.path().join("picture2.jpeg")));
        let data = fs::read(dir.path().join("picture2.jpeg")).unwrap();
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
        assert_eq!(backend.photos_taken(), 1);
    }

    #[tokio::test]
    async fn test_failed_photo_is_dropped() {
        let (controller, backend, dir) = ready_phone().await;
        backend.fail_photos(true);
        let mut events = controller.subscribe();

        assert_eq!(controller.take_picture().saved().await, None);
        assert_eq!(events.recv().await.unwrap(), CaptureEvent::PhotoDropped);
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_picture_without_session_is_dropped() {
        let (controller, backend, _dir) = controller_with(SimulatedBackend::phone());
        assert_eq!(controller.take_picture().saved().await, None);
        assert_eq!(backend.photos_taken(), 0);
    }

    #[tokio::test]
    async fn test_start_recording_without_session_fails_immediately() {
        let (controller, _backend, dir) = controller_with(SimulatedBackend::phone());

        let handle = controller.start_recording();

        assert!(handle.path().is_none());
        assert_eq!(
            handle.finished().await,
            Some(Err(CameraError::CaptureSessionIsMissing))
        );
        assert!(!controller.has_pending_recording());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_recording_resolves_start_completion_on_stop() {
        let (controller, backend, dir) = ready_phone().await;

        let handle = controller.start_recording();
        let expected = dir.path().join("recording.mp4");
        assert_eq!(handle.path(), Some(expected.as_path()));
        assert!(backend.is_recording());

        assert_eq!(controller.stop_recording(), Ok(()));
        assert_eq!(handle.finished().await, Some(Ok(expected.clone())));
        assert!(expected.exists());
        assert!(!controller.has_pending_recording());

        let next = controller.start_recording();
        assert_eq!(next.path(), Some(dir.path().join("recording1.mp4").as_path()));
    }

    #[tokio::test]
    async fn test_recording_failure_reaches_start_completion() {
        let (controller, backend, _dir) = ready_phone().await;
        backend.fail_next_movie();

        let handle = controller.start_recording();
        controller.stop_recording().unwrap();

        assert!(matches!(
            handle.finished().await,
            Some(Err(CameraError::Device(BackendError::Encoding(_))))
        ));
    }

    #[test]
    fn test_stop_recording_without_session() {
        let (controller, _backend, _dir) = controller_with(SimulatedBackend::phone());
        assert_eq!(
            controller.stop_recording(),
            Err(CameraError::CaptureSessionIsMissing)
        );
    }

    #[tokio::test]
    async fn test_stop_with_nothing_in_flight_leaves_completion_alone() {
        let (controller, backend, _dir) = ready_phone().await;
        let mut handle = controller.start_recording();

        // Writer goes away without reporting, as on a device interruption
        assert!(backend.stop_movie().is_some());

        assert_eq!(controller.stop_recording(), Ok(()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(controller.has_pending_recording());
        assert!(matches!(
            handle.receiver.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_second_start_replaces_pending_completion() {
        let (controller, _backend, dir) = ready_phone().await;
        let mut events = controller.subscribe();
        let first_path = dir.path().join("recording.mp4");

        let first = controller.start_recording();
        let second = controller.start_recording();
        assert_eq!(second.path(), Some(dir.path().join("recording1.mp4").as_path()));

        controller.stop_recording().unwrap();

        assert_eq!(first.finished().await, None);
        assert_eq!(
            second.finished().await,
            Some(Ok(dir.path().join("recording1.mp4")))
        );

        // The replaced movie is still finalized
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(CaptureEvent::RecordingFinished(path)) = events.recv().await {
                    if path == first_path {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(fs::read(&first_path).unwrap(), b"SIMULATED-MOVIE\nEND\n");
    }

    #[tokio::test]
    async fn test_start_right_after_stop_keeps_both_recordings() {
        let (controller, backend, dir) = ready_phone().await;
        let first_path = dir.path().join("recording.mp4");
        let second_path = dir.path().join("recording1.mp4");

        let first = controller.start_recording();
        controller.stop_recording().unwrap();
        let mut second = controller.start_recording();
        assert_eq!(second.path(), Some(second_path.as_path()));

        assert_eq!(first.finished().await, Some(Ok(first_path.clone())));
        assert_eq!(fs::read(&first_path).unwrap(), b"SIMULATED-MOVIE\nEND\n");

        // The first stop did not touch the new recording
        assert!(backend.is_recording());
        assert!(controller.has_pending_recording());
        assert!(matches!(
            second.receiver.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));

        controller.stop_recording().unwrap();
        assert_eq!(second.finished().await, Some(Ok(second_path)));
    }

    #[tokio::test]
    async fn test_preview_requires_running_session() {
        let (controller, _backend, _dir) = controller_with(SimulatedBackend::phone());
        let mut surface = RecordingSurface::default();

        assert_eq!(
            controller.display_preview(&mut surface),
            Err(CameraError::CaptureSessionIsMissing)
        );
        assert!(surface.calls.is_empty());

        controller.prepare().await.unwrap();
        let layer = controller.display_preview(&mut surface).unwrap();

        assert_eq!(layer.session_id, controller.snapshot().unwrap().id);
        assert_eq!(layer.gravity, VideoGravity::ResizeAspectFill);
        assert_eq!(layer.orientation, VideoOrientation::Portrait);
        assert_eq!(layer.frame, surface.bounds());
        assert_eq!(controller.preview_layer(), Some(layer));
    }

    #[tokio::test]
    async fn test_shutdown_allows_new_prepare() {
        let (controller, backend, _dir) = ready_phone().await;

        controller.shutdown();
        assert_eq!(controller.state(), ControllerState::Uninitialized);
        assert!(!backend.is_running());
        assert!(controller.snapshot().is_none());
        assert_eq!(
            controller.stop_recording(),
            Err(CameraError::CaptureSessionIsMissing)
        );

        controller.prepare().await.unwrap();
        assert!(controller.is_running());
    }

    #[tokio::test]
    async fn test_prepare_emits_event() {
        let (controller, _backend, _dir) = controller_with(SimulatedBackend::phone());
        let mut events = controller.subscribe();

        controller.prepare().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            CaptureEvent::Prepared(Some(CameraPosition::Rear))
        );
    }
}
