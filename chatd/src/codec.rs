// Readers that turn media artifacts into response payload fields

use avatar_core::dialogue::TimingCueSet;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid timing cue JSON in {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read and decode the aligner's JSON output
pub async fn read_timing_cues(path: &Path) -> Result<TimingCueSet, CodecError> {
    debug!(path = %path.display(), "Reading timing cues");
    let data = tokio::fs::read_to_string(path).await.map_err(|source| {
        error!(path = %path.display(), error = %source, "Error reading timing cues");
        CodecError::Read {
            path: path.to_path_buf(),
            source,
        }
    })?;

    serde_json::from_str(&data).map_err(|source| {
        error!(path = %path.display(), error = %source, "Error decoding timing cues");
        CodecError::Decode {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Read an audio file and return it as standard base64
pub async fn encode_audio_base64(path: &Path) -> Result<String, CodecError> {
    debug!(path = %path.display(), "Converting audio file to base64");
    let bytes = tokio::fs::read(path).await.map_err(|source| {
        error!(path = %path.display(), error = %source, "Error reading audio file");
        CodecError::Read {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(STANDARD.encode(bytes))
}
