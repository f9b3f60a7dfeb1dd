//! Translates a [`DownloadRequest`] into the yt-dlp invocation.

use std::path::{Path, PathBuf};

use crate::model::{AudioFormat, DownloadRequest};

/// Names files after the media title
pub const TITLE_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Audio-only source, falling back to the best combined stream
pub const AUDIO_FORMAT_SELECTOR: &str = "bestaudio/best";

/// Marker that prefixes every progress line yt-dlp prints for us
pub const PROGRESS_MARKER: &str = "progress:";

/// One line per progress tick: `progress:<status>|<percent>`
const PROGRESS_TEMPLATE: &str = "download:progress:%(progress.status)s|%(progress._percent_str)s";

/// Post-processing steps run by yt-dlp after the download
#[derive(Debug, Clone, PartialEq)]
pub enum PostProcessor {
    /// Extract and transcode the audio track
    ExtractAudio {
        codec: AudioFormat,
        /// `None` leaves yt-dlp's default quality
        quality: Option<String>,
    },
    /// Write title/artist/etc. tags into the output file
    EmbedMetadata,
}

/// Everything yt-dlp needs for one attempt, except the URL
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    pub format_selector: String,
    pub output_template: PathBuf,
    pub no_playlist: bool,
    pub quiet: bool,
    pub no_warnings: bool,
    pub postprocessors: Vec<PostProcessor>,
    pub ffmpeg_location: Option<PathBuf>,
}

impl DownloadOptions {
    pub fn for_request(request: &DownloadRequest) -> Self {
        let quality = Some(request.bitrate.trim())
            .filter(|b| !b.is_empty())
            .map(str::to_owned);

        Self {
            format_selector: AUDIO_FORMAT_SELECTOR.to_owned(),
            output_template: request.output_dir.join(TITLE_TEMPLATE),
            no_playlist: true,
            quiet: true,
            no_warnings: true,
            postprocessors: vec![
                PostProcessor::ExtractAudio {
                    codec: request.format,
                    quality,
                },
                PostProcessor::EmbedMetadata,
            ],
            ffmpeg_location: None,
        }
    }

    pub fn with_ffmpeg_location(mut self, location: Option<&Path>) -> Self {
        self.ffmpeg_location = location
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);
        self
    }

    /// Renders the yt-dlp command line, URL last
    pub fn to_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "-f".to_owned(),
            self.format_selector.clone(),
            "-o".to_owned(),
            self.output_template.to_string_lossy().into_owned(),
        ];

        if self.no_playlist {
            args.push("--no-playlist".to_owned());
        }
        if self.quiet {
            args.push("--quiet".to_owned());
        }
        if self.no_warnings {
            args.push("--no-warnings".to_owned());
        }

        // Keep progress visible under --quiet, one machine-readable line per tick
        args.extend([
            "--progress".to_owned(),
            "--newline".to_owned(),
            "--progress-template".to_owned(),
            PROGRESS_TEMPLATE.to_owned(),
        ]);

        for step in &self.postprocessors {
            match step {
                PostProcessor::ExtractAudio { codec, quality } => {
                    args.push("-x".to_owned());
                    args.push("--audio-format".to_owned());
                    args.push(codec.as_str().to_owned());
                    if let Some(q) = quality {
                        args.push("--audio-quality".to_owned());
                        args.push(q.clone());
                    }
                }
                PostProcessor::EmbedMetadata => args.push("--embed-metadata".to_owned()),
            }
        }

        if let Some(location) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_owned());
            args.push(location.to_string_lossy().into_owned());
        }

        args.push("--".to_owned());
        args.push(url.to_owned());
        args
    }
}
