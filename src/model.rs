use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Status shown before the first download is started
pub const IDLE_STATUS: &str = "Waiting for action...";

/// Target audio codec offered in the format dropdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Wav,
    Opus,
}

impl AudioFormat {
    /// Every selectable format, in dropdown order
    pub const ALL: [AudioFormat; 4] = [Self::Mp3, Self::M4a, Self::Wav, Self::Opus];

    /// Codec name as understood by yt-dlp's `--audio-format`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Wav => "wav",
            Self::Opus => "opus",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-initiated download, built from the form fields
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    /// Media page URL
    pub url: String,
    /// Folder the transcoded file lands in
    pub output_dir: PathBuf,
    /// Requested codec
    pub format: AudioFormat,
    /// Requested bitrate, passed through untouched (e.g. "320")
    pub bitrate: String,
}

impl DownloadRequest {
    pub fn new(
        url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        format: AudioFormat,
        bitrate: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            output_dir: output_dir.into(),
            format,
            bitrate: bitrate.into(),
        }
    }

    /// Trims the URL and bitrate, rejecting a blank URL
    pub fn validated(mut self) -> Result<Self, DispatchError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(DispatchError::BlankUrl);
        }
        self.url = url.to_owned();
        self.bitrate = self.bitrate.trim().to_owned();
        Ok(self)
    }
}

/// Message sent from a background download to the presentation loop
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// Replace the status line
    Status(String),
    /// Replace the progress percentage (0-100)
    Percent(f32),
    /// The attempt completed
    Succeeded,
    /// The attempt failed with the given description
    Failed(String),
    /// The attempt was cancelled by the user
    Cancelled,
}

impl DownloadEvent {
    /// Whether this is the last event of an attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Cancelled)
    }
}

/// What the form displays: the status line and the progress bar value
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub status: String,
    /// Percentage in 0.0..=100.0
    pub percent: f32,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            status: IDLE_STATUS.to_owned(),
            percent: 0.0,
        }
    }
}

impl ProgressState {
    pub fn apply(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Status(text) => self.status.clone_from(text),
            DownloadEvent::Percent(value) => self.percent = value.clamp(0.0, 100.0),
            DownloadEvent::Succeeded => {
                self.percent = 100.0;
                self.status = "✅ Download completed successfully.".to_owned();
            }
            DownloadEvent::Failed(reason) => self.status = format!("❌ Error: {reason}"),
            DownloadEvent::Cancelled => self.status = "⏹️ Download cancelled.".to_owned(),
        }
    }

    /// Progress as the 0.0..=1.0 fraction egui's progress bar expects
    pub fn fraction(&self) -> f32 {
        self.percent / 100.0
    }
}
