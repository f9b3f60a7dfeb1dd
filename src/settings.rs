use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::AudioFormat;

/// Overrides the directory holding `settings.json`
pub const CONFIG_DIR_ENV: &str = "AUDIO_GRABBER_CONFIG_DIR";
const SETTINGS_FILE: &str = "settings.json";

/// User preferences remembered between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Last used output folder
    pub output_dir: PathBuf,
    pub format: AudioFormat,
    /// Bitrate in kbps, kept as typed
    pub bitrate: String,
    /// yt-dlp executable; PATH lookup when unset
    pub ytdlp_path: Option<PathBuf>,
    /// Folder or binary handed to yt-dlp's `--ffmpeg-location`
    pub ffmpeg_location: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            format: AudioFormat::default(),
            bitrate: "320".to_owned(),
            ytdlp_path: None,
            ffmpeg_location: None,
        }
    }
}

/// `$AUDIO_GRABBER_CONFIG_DIR/settings.json`, else the platform config dir
pub fn settings_path() -> Option<PathBuf> {
    let dir = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()?.join("audio-grabber"),
    };
    Some(dir.join(SETTINGS_FILE))
}

impl Settings {
    /// Missing file yields defaults; unreadable or malformed files are errors
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Never fails: problems are logged and defaults used
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            warn!("no config directory available, using default settings");
            return Self::default();
        };
        Self::load_from(path).unwrap_or_else(|e| {
            warn!("ignoring settings: {e:#}");
            Self::default()
        })
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), "settings saved");
        Ok(())
    }
}
