//! In-process capture backend
//!
//! Devices are declared up front and behave deterministically. Failures can
//! be injected per device or per operation, which is what the controller
//! tests rely on. Photos are JPEG-framed payloads and movies are plain files
//! written to the requested destination.

use super::traits::{
    BackendError, BackendResult, CameraPosition, CaptureBackend, CaptureDevice, DeviceInput,
    FocusMode, MediaType, MovieFinalizer, PhotoSettings, PixelFormat,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MOVIE_HEADER: &[u8] = b"SIMULATED-MOVIE\n";
const MOVIE_TRAILER: &[u8] = b"END\n";

#[derive(Default)]
struct SimulatedState {
    cameras: Vec<CaptureDevice>,
    microphone: Option<CaptureDevice>,
    locked: HashSet<String>,
    focus: HashMap<String, FocusMode>,
    unavailable: HashSet<String>,
    refuse_locks: bool,
    fail_photos: bool,
    fail_next_movie: bool,
    running_inputs: Vec<DeviceInput>,
    running: bool,
    movie: Option<PathBuf>,
    photos_taken: u64,
}

/// Scriptable backend with virtual cameras and microphone
#[derive(Default)]
pub struct SimulatedBackend {
    state: Mutex<SimulatedState>,
}

impl SimulatedBackend {
    /// Backend with no devices at all
    pub fn new() -> Self {
        Self::default()
    }

    /// Rear and front camera plus a microphone, like a phone
    pub fn phone() -> Self {
        Self::new()
            .with_camera("back-wide", "Back Camera", Some(CameraPosition::Rear))
            .with_camera("front-wide", "Front Camera", Some(CameraPosition::Front))
            .with_microphone("mic", "iPhone Microphone")
    }

    pub fn with_camera(self, id: &str, name: &str, position: Option<CameraPosition>) -> Self {
        self.state
            .lock()
            .cameras
            .push(CaptureDevice::camera(id, name, position));
        self
    }

    pub fn with_microphone(self, id: &str, name: &str) -> Self {
        self.state.lock().microphone = Some(CaptureDevice::microphone(id, name));
        self
    }

    /// Make `open_input` fail for a device
    pub fn make_unavailable(&self, device_id: &str) {
        self.state.lock().unavailable.insert(device_id.to_string());
    }

    /// Unplug every camera at `position`
    pub fn remove_cameras_at(&self, position: CameraPosition) {
        self.state
            .lock()
            .cameras
            .retain(|camera| camera.position != Some(position));
    }

    pub fn refuse_locks(&self, refuse: bool) {
        self.state.lock().refuse_locks = refuse;
    }

    pub fn fail_photos(&self, fail: bool) {
        self.state.lock().fail_photos = fail;
    }

    /// The next finalized movie reports an encoder failure
    pub fn fail_next_movie(&self) {
        self.state.lock().fail_next_movie = true;
    }

    pub fn focus_mode(&self, device_id: &str) -> Option<FocusMode> {
        self.state.lock().focus.get(device_id).copied()
    }

    pub fn is_locked(&self, device_id: &str) -> bool {
        self.state.lock().locked.contains(device_id)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().movie.is_some()
    }

    /// Inputs frames are currently delivered from
    pub fn running_inputs(&self) -> Vec<DeviceInput> {
        self.state.lock().running_inputs.clone()
    }

    pub fn photos_taken(&self) -> u64 {
        self.state.lock().photos_taken
    }
}

#[async_trait]
impl CaptureBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn discover_cameras(&self) -> Vec<CaptureDevice> {
        self.state.lock().cameras.clone()
    }

    fn default_audio_device(&self) -> Option<CaptureDevice> {
        self.state.lock().microphone.clone()
    }

    fn lock_for_configuration(&self, device: &CaptureDevice) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.refuse_locks || !state.locked.insert(device.id.clone()) {
            return Err(BackendError::LockRefused(device.name.clone()));
        }
        Ok(())
    }

    fn unlock_for_configuration(&self, device: &CaptureDevice) {
        self.state.lock().locked.remove(&device.id);
    }

    fn set_focus_mode(&self, device: &CaptureDevice, mode: FocusMode) -> BackendResult<()> {
        let mut state = self.state.lock();
        if !state.locked.contains(&device.id) {
            return Err(BackendError::Unsupported(format!(
                "{} must be locked before changing focus",
                device.name
            )));
        }
        state.focus.insert(device.id.clone(), mode);
        Ok(())
    }

    fn open_input(&self, device: &CaptureDevice) -> BackendResult<DeviceInput> {
        let state = self.state.lock();
        let known = match device.media_type {
            MediaType::Video => state.cameras.iter().any(|c| c.id == device.id),
            MediaType::Audio => state.microphone.as_ref().is_some_and(|m| m.id == device.id),
        };
        if !known {
            return Err(BackendError::DeviceNotFound(device.name.clone()));
        }
        if state.unavailable.contains(&device.id) {
            return Err(BackendError::DeviceBusy(device.name.clone()));
        }
        Ok(DeviceInput {
            device: device.clone(),
        })
    }

    fn start_running(&self, inputs: &[DeviceInput]) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.running_inputs = inputs.to_vec();
        state.running = true;
        Ok(())
    }

    fn commit_configuration(&self, inputs: &[DeviceInput]) -> BackendResult<()> {
        self.state.lock().running_inputs = inputs.to_vec();
        Ok(())
    }

    fn stop_running(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.running_inputs.clear();
    }

    fn available_preview_formats(&self) -> Vec<PixelFormat> {
        vec![PixelFormat::Bgra, PixelFormat::Nv12]
    }

    async fn capture_photo(&self, settings: PhotoSettings) -> BackendResult<Vec<u8>> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(BackendError::Encoding("session is not running".to_string()));
        }
        if state.fail_photos {
            return Err(BackendError::Encoding("photo encoder failed".to_string()));
        }
        state.photos_taken += 1;

        let camera = state
            .running_inputs
            .iter()
            .find(|input| input.media_type() == MediaType::Video)
            .map(|input| input.device.id.clone())
            .unwrap_or_default();

        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(&JPEG_SOI);
        data.extend_from_slice(
            format!("{camera}#{}:{:?}", state.photos_taken, settings.quality).as_bytes(),
        );
        data.extend_from_slice(&JPEG_EOI);
        Ok(data)
    }

    fn start_movie(&self, path: &Path) -> BackendResult<()> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(BackendError::Encoding("session is not running".to_string()));
        }
        if let Some(current) = &state.movie {
            return Err(BackendError::DeviceBusy(format!(
                "movie output is writing {}",
                current.display()
            )));
        }
        let mut file = File::create(path)?;
        file.write_all(MOVIE_HEADER)?;
        state.movie = Some(path.to_path_buf());
        Ok(())
    }

    fn stop_movie(&self) -> Option<MovieFinalizer> {
        let (path, fail) = {
            let mut state = self.state.lock();
            let path = state.movie.take()?;
            (path, std::mem::take(&mut state.fail_next_movie))
        };

        Some(Box::pin(async move {
            if fail {
                return Err(BackendError::Encoding(format!(
                    "failed to finalize {}",
                    path.display()
                )));
            }

            OpenOptions::new()
                .append(true)
                .open(&path)
                .and_then(|mut file| file.write_all(MOVIE_TRAILER))?;
            Ok(path)
        }))
    }
}
