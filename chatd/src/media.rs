//! Lip-sync post-processing of synthesized speech.
//!
//! For each dialogue line the TTS step leaves `message_{i}.mp3` in a
//! request-scoped directory. [`MediaPipeline::lip_sync`] transcodes it to WAV
//! and runs the phoneme aligner over the WAV to produce `message_{i}.json`.

use crate::command::{shell_quote, CommandError, CommandRunner};
use avatar_core::config::MediaConfig;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Audio conversion failed for message {index}: {source}")]
    Transcode {
        index: usize,
        #[source]
        source: CommandError,
    },

    #[error("Lip sync failed for message {index}: {source}")]
    Align {
        index: usize,
        #[source]
        source: CommandError,
    },

    #[error("Media directory error at {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The three files produced for one dialogue line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFiles {
    pub index: usize,
    pub mp3: PathBuf,
    pub wav: PathBuf,
    pub cues: PathBuf,
}

impl MessageFiles {
    pub fn new(dir: &Path, index: usize) -> Self {
        Self {
            index,
            mp3: dir.join(format!("message_{}.mp3", index)),
            wav: dir.join(format!("message_{}.wav", index)),
            cues: dir.join(format!("message_{}.json", index)),
        }
    }
}

/// A directory private to one chat request
#[derive(Debug)]
pub struct RequestWorkspace {
    request_id: Uuid,
    dir: PathBuf,
    keep: bool,
}

impl RequestWorkspace {
    /// Create `{root}/{request_id}/`
    pub async fn create(root: &Path, keep: bool) -> Result<Self, MediaError> {
        let request_id = Uuid::new_v4();
        let dir = root.join(request_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| MediaError::Workspace {
                path: dir.clone(),
                source,
            })?;
        Ok(Self {
            request_id,
            dir,
            keep,
        })
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self, index: usize) -> MessageFiles {
        MessageFiles::new(&self.dir, index)
    }

}

/// Removes the directory unless artifacts are kept, including when the
/// owning turn is cancelled mid-flight. Failures are only logged.
impl Drop for RequestWorkspace {
    fn drop(&mut self) {
        if self.keep {
            info!(dir = %self.dir.display(), "Keeping media artifacts");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "Failed to remove media directory");
        }
    }
}

/// Runs the transcode and alignment tools for dialogue lines
#[derive(Debug, Clone)]
pub struct MediaPipeline {
    runner: CommandRunner,
    transcode_template: String,
    lipsync_template: String,
}

impl MediaPipeline {
    pub fn new(runner: CommandRunner, transcode_template: &str, lipsync_template: &str) -> Self {
        Self {
            runner,
            transcode_template: transcode_template.to_string(),
            lipsync_template: lipsync_template.to_string(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            CommandRunner::new(Duration::from_secs(config.command_timeout_secs())),
            config.transcode_command(),
            config.lipsync_command(),
        )
    }

    /// Transcode `mp3` → `wav`, then align `wav` → cue JSON. Strictly sequential.
    pub async fn lip_sync(&self, files: &MessageFiles) -> Result<(), MediaError> {
        let started = Instant::now();
        let index = files.index;
        info!(index, "Starting lip sync");

        let transcode = render(&self.transcode_template, &files.mp3, &files.wav);
        self.runner.run_shell(&transcode).await.map_err(|source| {
            error!(index, error = %source, "Audio conversion failed");
            MediaError::Transcode { index, source }
        })?;
        info!(index, "Audio conversion completed");

        let align = render(&self.lipsync_template, &files.wav, &files.cues);
        self.runner.run_shell(&align).await.map_err(|source| {
            error!(index, error = %source, "Lip sync generation failed");
            MediaError::Align { index, source }
        })?;

        info!(
            index,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Lip sync completed"
        );
        Ok(())
    }
}

/// Substitute `{input}` and `{output}` with shell-quoted paths
fn render(template: &str, input: &Path, output: &Path) -> String {
    template
        .replace("{input}", &shell_quote(&input.to_string_lossy()))
        .replace("{output}", &shell_quote(&output.to_string_lossy()))
}
