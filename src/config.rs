//! Application configuration
//!
//! Read from the JSON file named by `AVCAPTURE_CONFIG`; every field is
//! optional and falls back to its default.

use crate::capture::{CaptureBackend, SimulatedBackend};
use crate::session::CaptureOptions;
use crate::storage::{MediaStore, NamingScheme};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Environment variable holding the configuration file path
pub const CONFIG_ENV_VAR: &str = "AVCAPTURE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Backend not available in this build: {0}")]
    BackendUnavailable(String),
}

/// Which capture backend drives the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Simulated,
    Native,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "native-camera") {
            BackendKind::Native
        } else {
            BackendKind::Simulated
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Directory photos and movies are written to
    pub media_dir: PathBuf,
    pub photo: NamingScheme,
    pub video: NamingScheme,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let options = CaptureOptions::default();
        Self {
            media_dir: PathBuf::from("media"),
            photo: options.photo_naming,
            video: options.video_naming,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    pub capture_audio: bool,
    pub backend: BackendKind,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_audio: true,
            backend: BackendKind::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    /// `tracing_subscriber` filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            capture: CaptureConfig::default(),
            log_filter: "avcapture_player=debug".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `AVCAPTURE_CONFIG` if set, defaults otherwise
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for naming in [&self.storage.photo, &self.storage.video] {
            naming
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.storage.photo == self.storage.video {
            return Err(ConfigError::Invalid(
                "photos and videos must use different names".to_string(),
            ));
        }
        Ok(())
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            capture_audio: self.capture.capture_audio,
            photo_naming: self.storage.photo.clone(),
            video_naming: self.storage.video.clone(),
        }
    }

    pub fn media_store(&self) -> MediaStore {
        MediaStore::new(self.storage.media_dir.clone())
            .with_video_extension(self.storage.video.extension.clone())
    }

    /// Instantiate the configured capture backend
    pub fn backend(&self) -> Result<Arc<dyn CaptureBackend>, ConfigError> {
        match self.capture.backend {
            BackendKind::Simulated => Ok(Arc::new(SimulatedBackend::phone())),
            #[cfg(feature = "native-camera")]
            BackendKind::Native => Ok(Arc::new(crate::capture::NativeBackend::new())),
            #[cfg(not(feature = "native-camera"))]
            BackendKind::Native => Err(ConfigError::BackendUnavailable(
                "rebuild with the native-camera feature".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "storage": { "mediaDir": "/tmp/captures" }, "capture": { "captureAudio": false } }"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();

        assert_eq!(config.storage.media_dir, PathBuf::from("/tmp/captures"));
        assert_eq!(config.storage.photo, NamingScheme::new("picture", "jpeg"));
        assert_eq!(config.storage.video, NamingScheme::new("recording", "mp4"));
        assert!(!config.capture.capture_audio);
        assert_eq!(config.log_filter, "avcapture_player=debug");
        assert!(!config.capture_options().capture_audio);
    }

    #[test]
    fn test_rejects_clashing_names() {
        let mut config = AppConfig::default();
        config.storage.video = config.storage.photo.clone();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            AppConfig::from_file(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_simulated_backend_builds() {
        let config = AppConfig {
            capture: CaptureConfig {
                capture_audio: true,
                backend: BackendKind::Simulated,
            },
            ..AppConfig::default()
        };
        let backend = config.backend().unwrap();
        assert_eq!(backend.name(), "simulated");
        assert_eq!(backend.discover_cameras().len(), 2);
    }
}
