use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::{model::DownloadEvent, options::PROGRESS_MARKER};

pub const CONVERTING_STATUS: &str = "🔄 Converting to audio...";

/// One progress report from the downloader
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressTick {
    /// Still fetching; `percent` is the raw string, e.g. " 55.5%"
    Downloading { percent: String },
    /// Fetching done, post-processing starts
    Finished,
    /// Any other phase (e.g. "error")
    Other(String),
}

/// Parses a `progress:<status>|<percent>` line printed through our progress template
pub fn parse_progress_line(line: &str) -> Option<ProgressTick> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let (status, percent) = rest.split_once('|').unwrap_or((rest, ""));
    let tick = match status.trim() {
        "downloading" => ProgressTick::Downloading {
            percent: percent.to_owned(),
        },
        "finished" => ProgressTick::Finished,
        other => ProgressTick::Other(other.to_owned()),
    };
    Some(tick)
}

/// "55.5%" -> 55.5; `None` for "N/A", "Unknown %" and the like
pub fn parse_percent(raw: &str) -> Option<f32> {
    let number = raw.trim().trim_end_matches('%').trim();
    number.parse::<f32>().ok().filter(|v| v.is_finite())
}

/// Turns downloader progress ticks into events for the presentation loop
#[derive(Clone)]
pub struct ProgressProjector {
    tx: UnboundedSender<DownloadEvent>,
}

impl ProgressProjector {
    pub fn new(tx: UnboundedSender<DownloadEvent>) -> Self {
        Self { tx }
    }

    pub fn on_progress(&self, tick: &ProgressTick) {
        match tick {
            ProgressTick::Downloading { percent } => {
                let Some(value) = parse_percent(percent) else {
                    debug!(raw = %percent, "skipping unparseable progress");
                    return;
                };
                self.emit(DownloadEvent::Percent(value));
                let shown = percent.trim().trim_end_matches('%').trim();
                self.emit(DownloadEvent::Status(format!("⬇️ Downloading... {shown}%")));
            }
            ProgressTick::Finished => self.emit(DownloadEvent::Status(CONVERTING_STATUS.to_owned())),
            ProgressTick::Other(phase) => debug!(%phase, "ignoring progress phase"),
        }
    }

    pub fn emit(&self, event: DownloadEvent) {
        // Receiver gone means the form was closed; nothing left to update
        let _ = self.tx.send(event);
    }
}
