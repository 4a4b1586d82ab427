//! Native capture backend
//!
//! Cameras are enumerated and streamed with nokhwa, the default microphone is
//! discovered through cpal, and movies are written by an FFmpeg child process.
//! Frames are requested as MJPEG so still captures can be stored without
//! re-encoding.

mod encoder;

use super::traits::{
    BackendError, BackendResult, CameraPosition, CaptureBackend, CaptureDevice, DeviceInput,
    FocusMode, MediaType, MovieFinalizer, PhotoSettings, PixelFormat,
};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use encoder::MovieEncoder;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use encoder::ffmpeg_available;

const FRAME_WAIT_ATTEMPTS: u32 = 40;
const FRAME_WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Guess which side of the device a camera faces from its name
fn classify_position(name: &str) -> Option<CameraPosition> {
    let name = name.to_lowercase();
    if ["front", "facetime", "user", "selfie"]
        .iter()
        .any(|hint| name.contains(hint))
    {
        Some(CameraPosition::Front)
    } else if ["back", "rear", "environment", "world"]
        .iter()
        .any(|hint| name.contains(hint))
    {
        Some(CameraPosition::Rear)
    } else {
        None
    }
}

fn camera_index(device: &CaptureDevice) -> CameraIndex {
    match device.id.parse::<u32>() {
        Ok(index) => CameraIndex::Index(index),
        Err(_) => CameraIndex::String(device.id.clone()),
    }
}

#[derive(Default)]
struct StreamShared {
    latest_frame: Mutex<Option<Vec<u8>>>,
    frame_rate: AtomicU32,
    encoder: Mutex<Option<Arc<MovieEncoder>>>,
}

struct StreamWorker {
    running: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<()>,
}

impl StreamWorker {
    fn spawn(device: CaptureDevice, shared: Arc<StreamShared>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = std::thread::spawn(move || {
            let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                CameraFormat::new(Resolution::new(1280, 720), FrameFormat::MJPEG, 30),
            ));

            let mut camera = match Camera::new(camera_index(&device), format) {
                Ok(camera) => camera,
                Err(e) => {
                    tracing::error!("Failed to open camera {}: {:?}", device.name, e);
                    return;
                }
            };

            if let Err(e) = camera.open_stream() {
                tracing::error!("Failed to open camera stream: {:?}", e);
                return;
            }

            let camera_format = camera.camera_format();
            shared
                .frame_rate
                .store(camera_format.frame_rate(), Ordering::Relaxed);
            tracing::info!(
                "Camera {} streaming {}x{} @ {}fps ({:?})",
                device.name,
                camera_format.resolution().width(),
                camera_format.resolution().height(),
                camera_format.frame_rate(),
                camera_format.format()
            );

            let mut warned = false;
            while flag.load(Ordering::SeqCst) {
                match camera.frame() {
                    Ok(frame) => {
                        if frame.source_frame_format() != FrameFormat::MJPEG {
                            if !warned {
                                tracing::warn!(
                                    "Camera {} delivers {:?}, stills and movies need MJPEG",
                                    device.name,
                                    frame.source_frame_format()
                                );
                                warned = true;
                            }
                            continue;
                        }
                        let data = frame.buffer();
                        if let Some(encoder) = shared.encoder.lock().as_ref() {
                            encoder.write_frame(data);
                        }
                        *shared.latest_frame.lock() = Some(data.to_vec());
                    }
                    Err(e) => tracing::debug!("Failed to capture frame: {:?}", e),
                }
            }

            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Error stopping camera stream: {:?}", e);
            }
            tracing::info!("Camera {} stream stopped", device.name);
        });

        Self { running, handle }
    }

    fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

/// Backend for real cameras attached to this machine
#[derive(Default)]
pub struct NativeBackend {
    locked: Mutex<HashSet<String>>,
    focus: Mutex<HashMap<String, FocusMode>>,
    worker: Mutex<Option<StreamWorker>>,
    shared: Arc<StreamShared>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn restart_stream(&self, inputs: &[DeviceInput]) {
        let mut worker = self.worker.lock();
        if let Some(previous) = worker.take() {
            previous.stop();
        }
        *self.shared.latest_frame.lock() = None;

        if let Some(video) = inputs.iter().find(|i| i.media_type() == MediaType::Video) {
            *worker = Some(StreamWorker::spawn(video.device.clone(), self.shared.clone()));
        }
    }
}

#[async_trait]
impl CaptureBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn discover_cameras(&self) -> Vec<CaptureDevice> {
        let cameras = match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras,
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {:?}", e);
                return Vec::new();
            }
        };

        let mut devices: Vec<CaptureDevice> = cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                let name = info.human_name();
                let position = classify_position(&name);
                CaptureDevice::camera(id, name, position)
            })
            .collect();

        // A lone webcam with no hint in its name faces the user
        if devices.iter().all(|d| d.position.is_none()) {
            if let Some(first) = devices.first_mut() {
                first.position = Some(CameraPosition::Front);
            }
        }

        devices
    }

    fn default_audio_device(&self) -> Option<CaptureDevice> {
        let device = cpal::default_host().default_input_device()?;
        let name = device.name().ok()?;
        Some(CaptureDevice::microphone(name.clone(), name))
    }

    fn lock_for_configuration(&self, device: &CaptureDevice) -> BackendResult<()> {
        if !self.locked.lock().insert(device.id.clone()) {
            return Err(BackendError::LockRefused(device.name.clone()));
        }
        Ok(())
    }

    fn unlock_for_configuration(&self, device: &CaptureDevice) {
        self.locked.lock().remove(&device.id);
    }

    fn set_focus_mode(&self, device: &CaptureDevice, mode: FocusMode) -> BackendResult<()> {
        if !self.locked.lock().contains(&device.id) {
            return Err(BackendError::Unsupported(format!(
                "{} must be locked before changing focus",
                device.name
            )));
        }
        // nokhwa has no portable autofocus control; the driver default applies
        tracing::debug!("Focus mode {:?} requested for {}", mode, device.name);
        self.focus.lock().insert(device.id.clone(), mode);
        Ok(())
    }

    fn open_input(&self, device: &CaptureDevice) -> BackendResult<DeviceInput> {
        let present = match device.media_type {
            MediaType::Video => self.discover_cameras().iter().any(|c| c.id == device.id),
            MediaType::Audio => self
                .default_audio_device()
                .is_some_and(|m| m.id == device.id),
        };
        if !present {
            return Err(BackendError::DeviceNotFound(device.name.clone()));
        }
        Ok(DeviceInput {
            device: device.clone(),
        })
    }

    fn start_running(&self, inputs: &[DeviceInput]) -> BackendResult<()> {
        self.restart_stream(inputs);
        Ok(())
    }

    fn commit_configuration(&self, inputs: &[DeviceInput]) -> BackendResult<()> {
        self.restart_stream(inputs);
        Ok(())
    }

    fn stop_running(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.stop();
        }
    }

    fn available_preview_formats(&self) -> Vec<PixelFormat> {
        vec![PixelFormat::Rgb, PixelFormat::Yuyv]
    }

    async fn capture_photo(&self, settings: PhotoSettings) -> BackendResult<Vec<u8>> {
        tracing::debug!("Capturing still with {:?}", settings);
        for _ in 0..FRAME_WAIT_ATTEMPTS {
            if let Some(frame) = self.shared.latest_frame.lock().clone() {
                return Ok(frame);
            }
            tokio::time::sleep(FRAME_WAIT_INTERVAL).await;
        }
        Err(BackendError::Encoding(
            "no MJPEG frame delivered by the camera".to_string(),
        ))
    }

    fn start_movie(&self, path: &Path) -> BackendResult<()> {
        if self.worker.lock().is_none() {
            return Err(BackendError::Encoding("camera is not streaming".to_string()));
        }
        if self.shared.encoder.lock().is_some() {
            return Err(BackendError::DeviceBusy(
                "movie encoder is still attached".to_string(),
            ));
        }
        if !encoder::ffmpeg_available() {
            return Err(BackendError::Unsupported("ffmpeg not found".to_string()));
        }

        let fps = match self.shared.frame_rate.load(Ordering::Relaxed) {
            0 => 30,
            fps => fps,
        };
        let encoder = MovieEncoder::new(fps, path)?;
        *self.shared.encoder.lock() = Some(Arc::new(encoder));
        Ok(())
    }

    fn stop_movie(&self) -> Option<MovieFinalizer> {
        // Detached here so the stream thread stops feeding it right away
        let encoder = self.shared.encoder.lock().take()?;
        Some(Box::pin(async move {
            match tokio::task::spawn_blocking(move || encoder.finish()).await {
                Ok(result) => result.map_err(BackendError::from),
                Err(e) => Err(BackendError::Encoding(format!("encoder task failed: {e}"))),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_position_from_name() {
        assert_eq!(
            classify_position("FaceTime HD Camera"),
            Some(CameraPosition::Front)
        );
        assert_eq!(
            classify_position("Back Dual Camera"),
            Some(CameraPosition::Rear)
        );
        assert_eq!(classify_position("USB Video Device"), None);
    }
}
