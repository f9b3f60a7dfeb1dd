//! Runs downloads in the background and feeds their events back to the form.
//!
//! At most one download is active at a time. A request made while another
//! is running is rejected with [`DispatchError::Busy`] and the running one is
//! left alone. The background task never touches the UI state directly; it
//! sends [`DownloadEvent`]s that [`DownloadController::poll`] applies on the
//! presentation loop.

use std::{path::PathBuf, sync::Arc};

use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    downloader::MediaFetcher,
    error::{DispatchError, FetchError},
    model::{DownloadEvent, DownloadRequest, ProgressState},
    options::DownloadOptions,
    progress::ProgressProjector,
};

pub const BLANK_URL_STATUS: &str = "⚠️ Enter a valid URL.";
pub const BUSY_STATUS: &str = "⚠️ A download is already in progress.";
pub const STARTING_STATUS: &str = "⏳ Downloading audio...";
const LOST_STATUS: &str = "❌ Error: the download task stopped unexpectedly.";

struct ActiveDownload {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    events: UnboundedReceiver<DownloadEvent>,
}

pub struct DownloadController {
    runtime: Handle,
    fetcher: Arc<dyn MediaFetcher>,
    ffmpeg_location: Option<PathBuf>,
    state: ProgressState,
    active: Option<ActiveDownload>,
    next_id: u64,
}

impl DownloadController {
    pub fn new(runtime: Handle, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            runtime,
            fetcher,
            ffmpeg_location: None,
            state: ProgressState::default(),
            active: None,
            next_id: 1,
        }
    }

    pub fn with_ffmpeg_location(mut self, location: Option<PathBuf>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Starts `request` in the background and returns its id right away
    pub fn start(&mut self, request: DownloadRequest) -> Result<u64, DispatchError> {
        let request = match request.validated() {
            Ok(request) => request,
            Err(e) => {
                warn!("rejected download: {e}");
                self.state.status = BLANK_URL_STATUS.to_owned();
                return Err(e);
            }
        };

        if let Some(active) = &self.active {
            warn!(active = active.id, url = %request.url, "rejected download: busy");
            self.state.status = BUSY_STATUS.to_owned();
            return Err(DispatchError::Busy);
        }

        let id = self.next_id;
        self.next_id += 1;

        let (tx, events) = unbounded_channel();
        let cancel = CancellationToken::new();
        info!(
            id,
            url = %request.url,
            format = %request.format,
            bitrate = %request.bitrate,
            dir = %request.output_dir.display(),
            "starting download"
        );
        let handle = self.runtime.spawn(run_attempt(
            id,
            Arc::clone(&self.fetcher),
            request,
            self.ffmpeg_location.clone(),
            tx,
            cancel.clone(),
        ));

        self.active = Some(ActiveDownload {
            id,
            cancel,
            handle,
            events,
        });
        Ok(id)
    }

    /// Applies pending events; returns whether anything changed
    pub fn poll(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        let mut changed = false;
        let mut finished = false;
        while !finished {
            match active.events.try_recv() {
                Ok(event) => {
                    finished = event.is_terminal();
                    self.state.apply(&event);
                    changed = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    error!(id = active.id, "download task ended without a result");
                    self.state.status = LOST_STATUS.to_owned();
                    changed = true;
                    finished = true;
                }
            }
        }

        if finished {
            if let Some(done) = self.active.take() {
                debug!(id = done.id, "download slot released");
            }
        }
        changed
    }

    /// Asks the active download, if any, to stop
    pub fn cancel(&self) {
        if let Some(active) = &self.active {
            info!(id = active.id, "cancel requested");
            active.cancel.cancel();
        }
    }
}

impl Drop for DownloadController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            // yt-dlp is spawned with kill_on_drop, so aborting also reaps it
            active.handle.abort();
        }
    }
}

async fn run_attempt(
    id: u64,
    fetcher: Arc<dyn MediaFetcher>,
    request: DownloadRequest,
    ffmpeg_location: Option<PathBuf>,
    tx: UnboundedSender<DownloadEvent>,
    cancel: CancellationToken,
) {
    let projector = ProgressProjector::new(tx);
    projector.emit(DownloadEvent::Status(STARTING_STATUS.to_owned()));

    let outcome = attempt(
        fetcher.as_ref(),
        &request,
        ffmpeg_location,
        &projector,
        &cancel,
    )
    .await;

    let event = match outcome {
        Ok(()) => {
            info!(id, url = %request.url, "download finished");
            DownloadEvent::Succeeded
        }
        Err(FetchError::Cancelled) => {
            info!(id, "download cancelled");
            DownloadEvent::Cancelled
        }
        Err(e) => {
            error!(id, url = %request.url, error = %e, "download failed");
            DownloadEvent::Failed(e.to_string())
        }
    };
    projector.emit(event);
}

async fn attempt(
    fetcher: &dyn MediaFetcher,
    request: &DownloadRequest,
    ffmpeg_location: Option<PathBuf>,
    projector: &ProgressProjector,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    tokio::fs::create_dir_all(&request.output_dir)
        .await
        .map_err(|source| FetchError::OutputDir {
            path: request.output_dir.clone(),
            source,
        })?;

    let options =
        DownloadOptions::for_request(request).with_ffmpeg_location(ffmpeg_location.as_deref());
    fetcher.fetch(&request.url, &options, projector, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::AudioFormat, progress::ProgressTick};
    use async_trait::async_trait;
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    /// Replays fixed ticks, then succeeds or fails
    struct ScriptedFetcher {
        ticks: Vec<ProgressTick>,
        failure: Option<String>,
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, DownloadOptions)>>,
    }

    impl ScriptedFetcher {
        fn new(ticks: Vec<ProgressTick>, failure: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                ticks,
                failure: failure.map(str::to_owned),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MediaFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            url: &str,
            options: &DownloadOptions,
            progress: &ProgressProjector,
            _cancel: &CancellationToken,
        ) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((url.to_owned(), options.clone()));
            for tick in &self.ticks {
                progress.on_progress(tick);
            }
            match &self.failure {
                Some(reason) => Err(FetchError::Failed(reason.clone())),
                None => Ok(()),
            }
        }
    }

    /// Blocks until cancelled
    struct StalledFetcher;

    #[async_trait]
    impl MediaFetcher for StalledFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _options: &DownloadOptions,
            progress: &ProgressProjector,
            cancel: &CancellationToken,
        ) -> Result<(), FetchError> {
            progress.on_progress(&ProgressTick::Downloading {
                percent: "12.5%".into(),
            });
            cancel.cancelled().await;
            Err(FetchError::Cancelled)
        }
    }

    fn downloading(p: &str) -> ProgressTick {
        ProgressTick::Downloading { percent: p.into() }
    }

    fn request(url: &str, dir: &std::path::Path) -> DownloadRequest {
        DownloadRequest::new(url, dir, AudioFormat::Mp3, "320")
    }

    async fn drive(controller: &mut DownloadController) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.is_busy() {
                controller.poll();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("download did not finish");
    }

    /// Polls until `check` holds for the current state
    async fn wait_for(controller: &mut DownloadController, check: impl Fn(&ProgressState) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                controller.poll();
                if check(controller.state()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("state never reached");
    }

    #[tokio::test]
    async fn blank_url_never_starts_a_download() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(vec![], None);
        let mut controller = DownloadController::new(Handle::current(), fetcher.clone());

        for url in ["", "   ", "\n\t "] {
            assert_eq!(controller.start(request(url, dir.path())), Err(DispatchError::BlankUrl));
            assert!(!controller.is_busy());
            assert_eq!(controller.state().status, BLANK_URL_STATUS);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_ends_at_one_hundred_percent() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(
            vec![downloading("3.1%"), downloading("97.0%"), downloading("40%"), ProgressTick::Finished],
            None,
        );
        let mut controller = DownloadController::new(Handle::current(), fetcher.clone());

        controller.start(request("  https://youtu.be/abc ", dir.path())).unwrap();
        drive(&mut controller).await;

        assert_eq!(controller.state().percent, 100.0);
        assert!(controller.state().status.contains("completed"));
        let seen = fetcher.seen.lock().unwrap();
        assert_eq!(seen[0].0, "https://youtu.be/abc");
    }

    #[tokio::test]
    async fn failure_reports_reason_and_keeps_percent() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(
            vec![downloading("42%")],
            Some("Unsupported URL: https://example.com"),
        );
        let mut controller = DownloadController::new(Handle::current(), fetcher);

        controller.start(request("https://example.com", dir.path())).unwrap();
        drive(&mut controller).await;

        assert_eq!(controller.state().percent, 42.0);
        assert!(controller.state().status.contains("Unsupported URL: https://example.com"));
        assert!(controller.state().status.starts_with("❌"));
    }

    #[tokio::test]
    async fn creates_missing_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("music");
        assert!(!target.exists());

        let fetcher = ScriptedFetcher::new(vec![], None);
        let mut controller = DownloadController::new(Handle::current(), fetcher.clone());
        controller.start(request("https://youtu.be/abc", &target)).unwrap();
        drive(&mut controller).await;

        assert!(target.is_dir());
        let seen = fetcher.seen.lock().unwrap();
        assert!(seen[0].1.output_template.starts_with(&target));
    }

    #[tokio::test]
    async fn unwritable_output_directory_fails_the_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let fetcher = ScriptedFetcher::new(vec![], None);
        let mut controller = DownloadController::new(Handle::current(), fetcher.clone());
        controller.start(request("https://youtu.be/abc", &file.join("sub"))).unwrap();
        drive(&mut controller).await;

        assert!(controller.state().status.contains("could not create output folder"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ffmpeg_location_reaches_the_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(vec![], None);
        let mut controller = DownloadController::new(Handle::current(), fetcher.clone())
            .with_ffmpeg_location(Some(PathBuf::from("/opt/ffmpeg")));
        controller.start(request("https://youtu.be/abc", dir.path())).unwrap();
        drive(&mut controller).await;

        let seen = fetcher.seen.lock().unwrap();
        assert_eq!(seen[0].1.ffmpeg_location.as_deref(), Some(std::path::Path::new("/opt/ffmpeg")));
    }

    #[tokio::test]
    async fn second_download_is_rejected_while_busy() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = DownloadController::new(Handle::current(), Arc::new(StalledFetcher));

        let first = controller.start(request("https://youtu.be/one", dir.path())).unwrap();
        wait_for(&mut controller, |s| s.percent == 12.5).await;

        assert_eq!(
            controller.start(request("https://youtu.be/two", dir.path())),
            Err(DispatchError::Busy)
        );
        assert_eq!(controller.state().status, BUSY_STATUS);
        assert!(controller.is_busy());

        controller.cancel();
        drive(&mut controller).await;
        assert!(controller.state().status.contains("cancelled"));
        assert_eq!(controller.state().percent, 12.5);

        let fetcher = ScriptedFetcher::new(vec![], None);
        controller.fetcher = fetcher.clone() as Arc<dyn MediaFetcher>;
        let second = controller.start(request("https://youtu.be/two", dir.path())).unwrap();
        assert!(second > first);
        drive(&mut controller).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_without_download_is_a_no_op() {
        let controller = DownloadController::new(Handle::current(), ScriptedFetcher::new(vec![], None));
        controller.cancel();
        assert!(!controller.is_busy());
    }
}
