//! Audio Grabber: a small desktop form that drives yt-dlp to fetch audio

// Shared data model: formats, requests, progress state
mod model;
// Typed errors for dispatch and download attempts
mod error;
// Request -> yt-dlp invocation
mod options;
// Progress line parsing and projection onto UI events
mod progress;
// External downloader seam and the yt-dlp process runner
mod downloader;
// Background download lifecycle
mod dispatcher;
// Persistent user preferences
mod settings;
// tracing subscriber setup
mod logging;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, anyhow};
use dispatcher::DownloadController;
use downloader::YtDlpFetcher;
// eframe/egui for GUI application framework
use eframe::{App, Frame, egui};
use egui::{Color32, RichText, Visuals};
use model::{AudioFormat, DownloadRequest};
// OnceCell for single-time runtime initialization
use once_cell::sync::OnceCell;
// FileDialog for folder selection dialogs
use rfd::FileDialog;
use settings::Settings;
use tokio::runtime::{Handle, Runtime};
use tracing::{info, warn};

// Global Tokio runtime, created on first use
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

const ORANGE: Color32 = Color32::from_rgb(0xf7, 0x7f, 0x00);

/// Program entry point: initializes logging, runtime and settings, then launches the GUI
fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let runtime = RUNTIME
        .get_or_try_init(Runtime::new)
        .context("starting tokio runtime")?;

    let settings_path = settings::settings_path();
    let settings = Settings::load_or_default(settings_path.as_deref());
    let handle = runtime.handle().clone();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([520.0, 580.0])
            .with_resizable(false),
        ..Default::default()
    };

    eframe::run_native(
        "Audio Grabber",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(visuals());
            Box::new(AudioGrabberApp::new(settings, settings_path, handle))
        }),
    )
    .map_err(|e| anyhow!("window failed: {e}"))
}

fn visuals() -> Visuals {
    let mut visuals = Visuals::light();
    visuals.selection.bg_fill = ORANGE;
    visuals.hyperlink_color = ORANGE;
    visuals
}

/// Application state for the GUI
struct AudioGrabberApp {
    /// Input field for the media URL
    url_input: String,
    /// Destination folder for downloads
    download_folder: String,
    /// Selected audio codec
    format: AudioFormat,
    /// Bitrate field, in kbps
    bitrate: String,
    /// Owns the background download and the displayed progress
    controller: DownloadController,
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl AudioGrabberApp {
    fn new(settings: Settings, settings_path: Option<PathBuf>, runtime: Handle) -> Self {
        let fetcher = YtDlpFetcher::new(settings.ytdlp_path.clone());
        info!(
            ytdlp = %fetcher.program().display(),
            ffmpeg = ?settings.ffmpeg_location,
            "ready"
        );
        let controller = DownloadController::new(runtime, Arc::new(fetcher))
            .with_ffmpeg_location(settings.ffmpeg_location.clone());

        Self {
            url_input: String::new(),
            download_folder: settings.output_dir.display().to_string(),
            format: settings.format,
            bitrate: settings.bitrate.clone(),
            controller,
            settings,
            settings_path,
        }
    }

    fn start_download(&mut self) {
        let request = DownloadRequest::new(
            self.url_input.clone(),
            self.download_folder.trim(),
            self.format,
            self.bitrate.clone(),
        );
        if self.controller.start(request).is_ok() {
            self.remember_choices();
        }
    }

    /// Stores folder, format and bitrate for the next launch
    fn remember_choices(&mut self) {
        self.settings.output_dir = PathBuf::from(self.download_folder.trim());
        self.settings.format = self.format;
        self.settings.bitrate = self.bitrate.trim().to_owned();
        if let Some(path) = &self.settings_path {
            if let Err(e) = self.settings.save_to(path) {
                warn!("could not save settings: {e:#}");
            }
        }
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for AudioGrabberApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        // 1️⃣ Apply whatever the background download reported since last frame
        self.controller.poll();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.heading(RichText::new("🎵 Audio Grabber").color(ORANGE).strong());
            });
            ui.add_space(8.0);

            // 2️⃣ URL input
            ui.group(|ui| {
                ui.label("Video link");
                ui.add(
                    egui::TextEdit::singleline(&mut self.url_input)
                        .hint_text("https://...")
                        .desired_width(f32::INFINITY),
                );
            });

            // 3️⃣ Output folder with picker
            ui.group(|ui| {
                ui.label("Output folder");
                ui.horizontal(|ui| {
                    ui.text_edit_singleline(&mut self.download_folder);
                    if ui.button("Choose…").clicked() {
                        choose_directory(&mut self.download_folder, pick_folder);
                    }
                });
            });

            // 4️⃣ Format dropdown (read-only) and bitrate
            ui.group(|ui| {
                egui::Grid::new("conversion_settings")
                    .num_columns(2)
                    .spacing([24.0, 4.0])
                    .show(ui, |ui| {
                        ui.label("Format:");
                        ui.label("Bitrate (kbps):");
                        ui.end_row();

                        egui::ComboBox::from_id_source("audio_format")
                            .selected_text(self.format.as_str())
                            .show_ui(ui, |ui| {
                                for format in AudioFormat::ALL {
                                    ui.selectable_value(&mut self.format, format, format.as_str());
                                }
                            });
                        ui.add(egui::TextEdit::singleline(&mut self.bitrate).desired_width(60.0));
                        ui.end_row();
                    });
            });

            ui.add_space(12.0);

            // 5️⃣ Download / cancel; only one download at a time
            let busy = self.controller.is_busy();
            ui.horizontal(|ui| {
                if ui
                    .add_enabled(!busy, egui::Button::new("⬇️ Download"))
                    .clicked()
                {
                    self.start_download();
                }
                if ui.add_enabled(busy, egui::Button::new("⏹ Cancel")).clicked() {
                    self.controller.cancel();
                }
            });

            ui.add_space(8.0);

            // 6️⃣ Progress bar and status line
            let state = self.controller.state();
            ui.add(egui::ProgressBar::new(state.fraction()).show_percentage());
            ui.label(&state.status);

            ui.add_space(12.0);
            if ui.button("Exit").clicked() {
                self.controller.cancel();
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            }
        });

        // Request periodic repaint for progress updates
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

/// Opens the native folder dialog starting at `start`
fn pick_folder(start: &Path) -> Option<PathBuf> {
    FileDialog::new().set_directory(&start).pick_folder()
}

/// Replaces `field` with the picked folder; a cancelled dialog leaves it untouched
fn choose_directory(field: &mut String, pick: impl FnOnce(&Path) -> Option<PathBuf>) -> bool {
    match pick(Path::new(field.as_str())) {
        Some(folder) => {
            *field = folder.display().to_string();
            true
        }
        None => false,
    }
}
