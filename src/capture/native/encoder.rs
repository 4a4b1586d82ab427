//! FFmpeg movie-file writer
//!
//! Camera frames arrive as MJPEG and are piped into an `ffmpeg` child process
//! that produces an H.264 MP4 at the requested path.

use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Check whether `ffmpeg` can be spawned
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg").arg("-version").output().is_ok()
}

pub struct MovieEncoder {
    process: Mutex<Option<Child>>,
    frame_count: AtomicU64,
    running: AtomicBool,
    output_file: PathBuf,
}

impl MovieEncoder {
    pub fn new(fps: u32, output_file: &Path) -> Result<Self, std::io::Error> {
        if let Some(parent) = output_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let process = Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "mjpeg",
                "-framerate",
                &fps.to_string(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-pix_fmt",
                "yuv420p",
                "-crf",
                "18",
                "-g",
                &(fps * 2).to_string(), // 2 second GOP
                "-movflags",
                "+faststart",
            ])
            .arg(output_file)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        tracing::info!(
            "Started FFmpeg movie encoder @ {}fps, output: {}",
            fps,
            output_file.display()
        );

        Ok(Self {
            process: Mutex::new(Some(process)),
            frame_count: AtomicU64::new(0),
            running: AtomicBool::new(true),
            output_file: output_file.to_path_buf(),
        })
    }

    pub fn write_frame(&self, data: &[u8]) -> bool {
        if !self.running.load(Ordering::Relaxed) {
            return false;
        }

        let mut guard = self.process.lock();
        if let Some(ref mut process) = *guard {
            if let Some(ref mut stdin) = process.stdin {
                if stdin.write_all(data).is_ok() {
                    self.frame_count.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
            }
        }
        false
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Close stdin and wait for the container to be finalized
    pub fn finish(&self) -> Result<PathBuf, std::io::Error> {
        self.running.store(false, Ordering::Relaxed);
        let mut guard = self.process.lock();
        if let Some(mut process) = guard.take() {
            drop(process.stdin.take());
            let output = process.wait_with_output()?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(std::io::Error::other(format!(
                    "ffmpeg exited with status {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }
        }

        if !self.output_file.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} was not written", self.output_file.display()),
            ));
        }

        tracing::info!(
            "FFmpeg movie finished: {} frames, output: {}",
            self.frame_count(),
            self.output_file.display()
        );

        Ok(self.output_file.clone())
    }
}

impl Drop for MovieEncoder {
    fn drop(&mut self) {
        // Never finished: stop ffmpeg and reap it
        if let Some(mut process) = self.process.get_mut().take() {
            tracing::warn!(
                "Movie encoder for {} dropped unfinished",
                self.output_file.display()
            );
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}
