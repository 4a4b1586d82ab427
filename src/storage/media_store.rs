//! Media directory store
//!
//! Lists, names, writes and deletes captured photos and movies.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension recorded movies are stored with unless configured otherwise
pub const DEFAULT_VIDEO_EXTENSION: &str = "mp4";

const IMAGE_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "png", "heic"];

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file naming: {0}")]
    InvalidName(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Base name and extension of a collision-free file series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamingScheme {
    pub base: String,
    pub extension: String,
}

impl NamingScheme {
    pub fn new(base: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            extension: extension.into(),
        }
    }

    /// `picture.jpeg` for version 0, `picture3.jpeg` for version 3
    pub fn file_name(&self, version: u32) -> String {
        if version == 0 {
            format!("{}.{}", self.base, self.extension)
        } else {
            format!("{}{}.{}", self.base, version, self.extension)
        }
    }

    /// Reject names that would escape the media directory
    pub fn validate(&self) -> StorageResult<()> {
        let bad = |part: &str| part.is_empty() || part.contains(['/', '\\']) || part == "..";
        if bad(&self.base) || bad(&self.extension) {
            return Err(StorageError::InvalidName(self.file_name(0)));
        }
        Ok(())
    }
}

/// What a stored file is, judged by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// Classify `path`, treating `video_extension` as the movie extension
    pub fn classify(path: &Path, video_extension: &str) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        match extension.as_deref() {
            Some(ext) if ext.eq_ignore_ascii_case(video_extension) => MediaKind::Video,
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => MediaKind::Image,
            _ => MediaKind::Other,
        }
    }
}

/// Flat directory of captured media
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    video_extension: String,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            video_extension: DEFAULT_VIDEO_EXTENSION.to_string(),
        }
    }

    /// Recognize movies by `extension` instead of the default
    pub fn with_video_extension(mut self, extension: impl Into<String>) -> Self {
        self.video_extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_extension(&self) -> &str {
        &self.video_extension
    }

    pub fn kind_of(&self, path: &Path) -> MediaKind {
        MediaKind::classify(path, &self.video_extension)
    }

    /// Every entry in the directory, sorted by file name
    pub fn list_all(&self) -> StorageResult<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            tracing::debug!("Found {:?}", path.file_name());
            items.push(path);
        }

        items.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(items)
    }

    /// Stored movies, in the same order as [`MediaStore::list_all`]
    pub fn list_videos(&self) -> StorageResult<Vec<PathBuf>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|path| self.kind_of(path) == MediaKind::Video)
            .collect())
    }

    /// Position of `path` among the stored movies, 0 when absent
    pub fn index_of(&self, path: &Path) -> usize {
        match self.list_videos() {
            Ok(videos) => videos.iter().position(|v| v == path).unwrap_or(0),
            Err(e) => {
                tracing::warn!("Failed to list videos in {:?}: {}", self.root, e);
                0
            }
        }
    }

    /// First name of the series that does not exist yet
    pub fn next_available_path(&self, naming: &NamingScheme) -> PathBuf {
        let mut version = 0;
        let mut path = self.root.join(naming.file_name(version));
        while path.exists() {
            version += 1;
            path = self.root.join(naming.file_name(version));
        }
        path
    }

    /// Write `data` under the next free name of the series
    pub fn write_new(&self, naming: &NamingScheme, data: &[u8]) -> StorageResult<PathBuf> {
        naming.validate()?;
        fs::create_dir_all(&self.root)?;

        loop {
            let path = self.next_available_path(naming);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                // Another writer took the name between the existence check and create
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(data)?;
            tracing::debug!("Wrote {} bytes to {:?}", data.len(), path);
            return Ok(path);
        }
    }

    /// Delete `base.ext`, `base1.ext`, ... up to the first missing name.
    ///
    /// Returns the number of files removed.
    pub fn delete_series(&self, naming: &NamingScheme) -> StorageResult<usize> {
        naming.validate()?;

        let mut removed = 0;
        let mut version = 0;
        let mut path = self.root.join(naming.file_name(version));
        while path.exists() {
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("Deleted: {:?}", path.file_name());
                    removed += 1;
                }
                Err(e) => tracing::warn!("Error deleting {:?}: {}", path.file_name(), e),
            }
            version += 1;
            path = self.root.join(naming.file_name(version));
        }
        Ok(removed)
    }

    /// Delete everything in the media directory.
    ///
    /// Returns the number of entries removed.
    pub fn delete_all(&self) -> StorageResult<usize> {
        let mut removed = 0;
        for path in self.list_all()? {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Error deleting {:?}: {}", path.file_name(), e),
            }
        }
        Ok(removed)
    }
}
