//! # Call Recording Buffer
//!
//! Accumulates every frame of a call, inbound caller audio and outbound
//! synthesized speech alike, in arrival order. When the call ends the buffer is
//! muxed into a WAV file once and released.
//!
//! ## Key Features:
//! - **Append-only**: Frames are never reordered or edited
//! - **Single owner**: Only the call's session touches the buffer, so no locking
//! - **One-shot flush**: `flush_to_file` consumes the buffer

use crate::audio::wav;
use crate::error::CallError;
use std::fs;
use std::path::{Path, PathBuf};

/// Recording configuration for one call.
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Sample rate declared in the WAV header (the call rate, 8000)
    pub sample_rate: u32,
    /// Directory the WAV file is written to
    pub directory: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            directory: PathBuf::from("."),
        }
    }
}

/// Ordered byte buffer holding the full call audio.
pub struct RecordingBuffer {
    config: RecordingConfig,
    data: Vec<u8>,
}

impl RecordingBuffer {
    pub fn new(config: RecordingConfig) -> Self {
        Self {
            config,
            data: Vec::new(),
        }
    }

    /// Append one frame.
    pub fn append(&mut self, frame: &[u8]) {
        self.data.extend_from_slice(frame);
    }

    /// Number of recorded bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Recorded audio length in seconds.
    ///
    /// ## Calculation:
    /// Duration = bytes / 2 / sample_rate
    pub fn duration_seconds(&self) -> f64 {
        self.data.len() as f64 / 2.0 / self.config.sample_rate as f64
    }

    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Path of the WAV file for a call.
    pub fn file_path(&self, session_id: &str) -> PathBuf {
        recording_path(&self.config.directory, session_id)
    }

    /// Mux the buffer into a WAV file named after the session and release it.
    ///
    /// ## Returns:
    /// - **Ok(path)**: The file that was written
    /// - **Err(CallError::Recording)**: Directory creation or the write failed; nothing is retried
    pub fn flush_to_file(self, session_id: &str) -> Result<PathBuf, CallError> {
        let path = self.file_path(session_id);
        let to_error = |source| CallError::Recording {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.config.directory).map_err(to_error)?;
        let image = wav::encode_wav(&self.data, self.config.sample_rate).map_err(to_error)?;
        fs::write(&path, image).map_err(to_error)?;
        Ok(path)
    }
}

/// `full_conversation_<session id>.wav` inside `directory`.
pub fn recording_path(directory: &Path, session_id: &str) -> PathBuf {
    directory.join(format!("full_conversation_{}.wav", session_id))
}
