//! Video playback queue
//!
//! Cursor over stored movies with play and mute state for the player.

use crate::storage::{MediaStore, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ordered list of stored videos with a play cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackQueue {
    items: Vec<PathBuf>,
    current: usize,
    playing: bool,
    muted: bool,
}

impl PlaybackQueue {
    /// Queue over `items` starting at `start` (clamped to the last item)
    pub fn new(items: Vec<PathBuf>, start: usize) -> Self {
        let current = start.min(items.len().saturating_sub(1));
        Self {
            items,
            current,
            playing: false,
            muted: false,
        }
    }

    /// All stored videos, positioned at `selected`
    pub fn from_store(store: &MediaStore, selected: &Path) -> StorageResult<Self> {
        let items = store.list_videos()?;
        Ok(Self::new(items, store.index_of(selected)))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&Path> {
        self.items.get(self.current).map(PathBuf::as_path)
    }

    /// File name of the current item, shown as the player title
    pub fn title(&self) -> Option<String> {
        self.current()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string())
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Skip forward; playback pauses on manual navigation
    pub fn next(&mut self) -> Option<&Path> {
        self.playing = false;
        if self.current + 1 < self.items.len() {
            self.current += 1;
        }
        self.current()
    }

    /// Skip back; playback pauses on manual navigation
    pub fn previous(&mut self) -> Option<&Path> {
        self.playing = false;
        self.current = self.current.saturating_sub(1);
        self.current()
    }

    /// Current item played to the end.
    ///
    /// Advances and keeps playing unless this was the last item. Returns
    /// whether playback continues.
    pub fn on_item_finished(&mut self) -> bool {
        if self.current + 1 < self.items.len() {
            self.current += 1;
            self.playing = true;
        } else {
            self.playing = false;
        }
        tracing::debug!(
            "Playback item finished, now at {} (playing: {})",
            self.current,
            self.playing
        );
        self.playing
    }

    pub fn toggle_play(&mut self) -> bool {
        self.playing = !self.is_empty() && !self.playing;
        self.playing
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }
}
