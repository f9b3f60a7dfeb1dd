use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    process::{ChildStderr, ChildStdout, Command},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    error::FetchError,
    options::DownloadOptions,
    progress::{ProgressProjector, parse_progress_line},
};

/// The external "download this URL" call
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        options: &DownloadOptions,
        progress: &ProgressProjector,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError>;
}

/// Runs the yt-dlp executable as a child process
pub struct YtDlpFetcher {
    program: PathBuf,
}

impl YtDlpFetcher {
    /// Uses `program`, or `yt-dlp` from PATH when none is configured
    pub fn new(program: Option<PathBuf>) -> Self {
        let program = program
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(default_bin()));
        Self { program }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

fn default_bin() -> &'static str {
    if cfg!(target_os = "windows") { "yt-dlp.exe" } else { "yt-dlp" }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        url: &str,
        options: &DownloadOptions,
        progress: &ProgressProjector,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let args = options.to_args(url);
        debug!(program = %self.program.display(), ?args, "spawning yt-dlp");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FetchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Failed("yt-dlp stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::Failed("yt-dlp stderr not captured".into()))?;
        let stderr_task = tokio::spawn(collect_stderr(stderr));

        let mut stdout = BufReader::new(stdout);
        let cancelled = tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            pumped = pump_progress(&mut stdout, progress) => {
                pumped?;
                false
            }
        };

        let status = if cancelled {
            None
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                status = child.wait() => Some(status?),
            }
        };

        let Some(status) = status else {
            info!(url, "cancelling yt-dlp");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill yt-dlp");
            }
            return Err(FetchError::Cancelled);
        };

        let stderr_summary = stderr_task.await.ok().flatten();
        if status.success() {
            return Ok(());
        }

        warn!(%status, "yt-dlp failed");
        Err(FetchError::Failed(
            stderr_summary.unwrap_or_else(|| format!("yt-dlp exited with {status}")),
        ))
    }
}

/// Next line with invalid UTF-8 replaced; yt-dlp on Windows writes in the locale codepage
async fn next_lossy_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf.as_slice());
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
}

async fn pump_progress(
    stdout: &mut BufReader<ChildStdout>,
    progress: &ProgressProjector,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    while let Some(line) = next_lossy_line(stdout, &mut buf).await? {
        match parse_progress_line(&line) {
            Some(tick) => progress.on_progress(&tick),
            None => trace!(%line, "yt-dlp"),
        }
    }
    Ok(())
}

/// Drains stderr to EOF, returning the most useful line for the status bar
async fn collect_stderr(stderr: ChildStderr) -> Option<String> {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut collected = Vec::new();
    loop {
        match next_lossy_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                debug!(%line, "yt-dlp stderr");
                collected.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "reading yt-dlp stderr failed");
                break;
            }
        }
    }
    summarize_stderr(&collected)
}

/// Last `ERROR:` line with the prefix stripped, else the last non-empty line
pub fn summarize_stderr<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    let lines: Vec<&str> = lines
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.is_empty())
        .collect();

    lines
        .iter()
        .rev()
        .find_map(|l| l.strip_prefix("ERROR:"))
        .map(|l| l.trim().to_owned())
        .or_else(|| lines.last().map(|l| (*l).to_owned()))
}
