//! Video playback
//!
//! Non-visual state of the stored-video player.

mod queue;

pub use queue::PlaybackQueue;
