//! The try-on session: sole owner of the frame source, detection worker,
//! render loop and asset cache.
//!
//! Nothing is acquired in [`TryOnSession::new`]. [`TryOnSession::activate`]
//! brings everything up; dropping the session (or calling
//! [`TryOnSession::deactivate`]) stops the camera, joins the detection worker
//! and clears the scene, in that order.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::assets::{AssetKey, AssetManager};
use crate::camera::CameraProvider;
use crate::config::AppConfig;
use crate::error::Result;
use crate::pipeline::LandmarkDetector;
use crate::render_loop::{RenderLoop, TickInput, TickReport};
use crate::snapshot::{ExportFormat, Snapshot};
use crate::source::{FrameSourceManager, ModeState, SourceFrame, SourceState};
use crate::tracking::{DetectionPipeline, DetectionSnapshot, FrameTicket};

/// Builds the landmark detector. Called again by [`TryOnSession::retry`]
/// after a failed model load.
pub type DetectorFactory = Box<dyn FnMut() -> Result<Box<dyn LandmarkDetector>>>;

/// A still image handed to the detector, and the failure count seen at the time.
#[derive(Debug, Clone, Copy)]
struct StillSubmission {
    epoch: u64,
    failures_before: u64,
    at: Instant,
}

pub struct TryOnSession {
    source: FrameSourceManager,
    detection: Option<DetectionPipeline>,
    render: RenderLoop,
    assets: AssetManager,
    detector_factory: DetectorFactory,
    config: AppConfig,
    selected: Option<AssetKey>,
    last_submit: Option<Instant>,
    image_submitted: Option<StillSubmission>,
    model_error: Option<String>,
    asset_error: Option<String>,
}

impl TryOnSession {
    pub fn new(config: AppConfig, camera: Box<dyn CameraProvider>, detector_factory: DetectorFactory) -> Self {
        Self {
            source: FrameSourceManager::new(camera, config.camera.mirror),
            detection: None,
            render: RenderLoop::new(&config),
            assets: AssetManager::new(),
            detector_factory,
            config,
            selected: None,
            last_submit: None,
            image_submitted: None,
            model_error: None,
            asset_error: None,
        }
    }

    /// Load the detector and assets, select `initial_asset` (or the first
    /// available one) and start the configured frame source.
    ///
    /// Model or asset failures are returned but leave the session running:
    /// frames are still shown and [`TryOnSession::retry`] can recover. A
    /// denied camera is not an error here; the session falls back to image
    /// mode and reports it through [`TryOnSession::notice`].
    pub fn activate(&mut self, initial_asset: Option<AssetKey>) -> Result<()> {
        info!("Activating try-on session");
        let model = self.start_detection().err();
        let assets = self.load_assets().err();

        match initial_asset {
            Some(key) if self.assets.contains(&key) => self.selected = Some(key),
            Some(key) => {
                warn!("Requested asset '{key}' is not available, using the default");
                self.select_default();
            }
            None => self.select_default(),
        }

        // Source failures leave the session in upload mode with a notice.
        let source = match self.config.ui.initial_image.clone() {
            Some(path) => self.use_image(&path),
            None => self.use_camera(),
        };
        if let Err(e) = source {
            warn!("No frame source after activation: {e}");
        }

        match model.or(assets) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the camera, join the detection worker and drop every overlay
    /// instance. Idempotent.
    pub fn deactivate(&mut self) {
        self.source.release();
        if let Some(mut detection) = self.detection.take() {
            detection.shutdown();
        }
        self.render.clear();
        self.last_submit = None;
        self.image_submitted = None;
    }

    /// Retry whatever failed to initialize: the detector model and any
    /// catalog entries that are still missing.
    pub fn retry(&mut self) -> Result<()> {
        let model = self.start_detection().err();
        let assets = self.load_assets().err();
        if self.selected.is_none() {
            self.select_default();
        }
        match model.or(assets) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn start_detection(&mut self) -> Result<()> {
        if self.detection.is_some() {
            return Ok(());
        }
        match (self.detector_factory)() {
            Ok(detector) => {
                self.detection = Some(DetectionPipeline::start(detector));
                self.model_error = None;
                Ok(())
            }
            Err(e) => {
                warn!("Detector unavailable: {e}");
                self.model_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn load_assets(&mut self) -> Result<()> {
        match self.assets.load_all(&self.config.catalog, &self.config.calibration) {
            Ok(()) => {
                self.asset_error = None;
                Ok(())
            }
            Err(e) => {
                self.asset_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn select_default(&mut self) {
        self.selected = self.config.catalog.keys().find(|k| self.assets.contains(k)).cloned();
    }

    // Mode switching

    fn reset_submission(&mut self) {
        self.last_submit = None;
        self.image_submitted = None;
    }

    pub fn use_camera(&mut self) -> Result<()> {
        self.reset_submission();
        self.source.activate_camera()
    }

    pub fn use_image(&mut self, path: &Path) -> Result<()> {
        self.reset_submission();
        self.source.activate_image(path)
    }

    pub fn use_decoded_image(&mut self, image: RgbImage) -> Result<()> {
        self.reset_submission();
        self.source.activate_decoded_image(image)
    }

    /// Camera -> upload mode (the configured image if any), anything else -> camera.
    pub fn toggle_mode(&mut self) -> Result<()> {
        match self.source.mode() {
            Some(ModeState::UsingCamera) => match self.config.ui.initial_image.clone() {
                Some(path) => self.use_image(&path),
                None => {
                    self.reset_submission();
                    self.source.await_image();
                    Ok(())
                }
            },
            _ => self.use_camera(),
        }
    }

    // Asset selection

    /// Select an overlay by key; `None` hides all overlays. Returns whether
    /// the asset is loaded and will be drawn.
    pub fn select_asset(&mut self, key: Option<AssetKey>) -> bool {
        let available = key.as_ref().map_or(true, |k| self.assets.contains(k));
        if !available {
            if let Some(k) = &key {
                warn!("Asset '{k}' is not loaded; nothing will be drawn");
            }
        }
        debug!(asset = ?key, "asset selected");
        self.selected = key;
        available
    }

    /// Select the n-th catalog entry (0-based).
    pub fn select_index(&mut self, index: usize) -> bool {
        match self.config.catalog.entries.get(index) {
            Some(entry) => {
                let key = entry.key.clone();
                self.select_asset(Some(key))
            }
            None => false,
        }
    }

    /// Step to the next loaded catalog entry, wrapping around.
    pub fn cycle_asset(&mut self) -> Option<&AssetKey> {
        let loaded: Vec<&AssetKey> = self.config.catalog.keys().filter(|k| self.assets.contains(k)).collect();
        if loaded.is_empty() {
            return None;
        }
        let next = match &self.selected {
            Some(cur) => loaded
                .iter()
                .position(|k| *k == cur)
                .map_or(0, |i| (i + 1) % loaded.len()),
            None => 0,
        };
        self.selected = Some(loaded[next].clone());
        self.selected.as_ref()
    }

    pub fn selected_asset(&self) -> Option<&AssetKey> {
        self.selected.as_ref()
    }

    pub fn selected_label(&self) -> Option<&str> {
        self.selected.as_ref().and_then(|k| self.config.catalog.label(k))
    }

    // Frame loop

    /// Pull a frame, feed the detector if due and render the composite.
    /// `Ok(None)` means there is no active frame source yet.
    pub fn tick(&mut self) -> Result<Option<TickReport>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };
        self.submit(&frame);

        let detections = self
            .detection
            .as_ref()
            .map(|d| d.reader().latest())
            .unwrap_or_default();
        let report = self.render.tick(TickInput {
            frame: &frame.image,
            mirrored: frame.mirrored,
            epoch: frame.epoch,
            detections: &detections,
            assets: &self.assets,
            selected: self.selected.as_ref(),
        })?;
        Ok(Some(report))
    }

    fn submit(&mut self, frame: &SourceFrame) {
        let Some(detection) = &self.detection else { return };
        let ticket = || FrameTicket { epoch: frame.epoch, frame: frame.image.clone() };
        let interval = Duration::from_millis(self.config.detection.interval_ms);

        if frame.still {
            // One detection per image unless it failed; a busy worker means try again next tick.
            let latest = detection.reader().latest();
            if let Some(prev) = self.image_submitted.filter(|s| s.epoch == frame.epoch) {
                let failed = latest.failed_epoch == Some(frame.epoch) && latest.failures > prev.failures_before;
                if !failed || prev.at.elapsed() < interval {
                    return;
                }
                debug!(epoch = frame.epoch, "detection failed for still image, retrying");
            }
            if detection.submit(ticket()) {
                debug!(epoch = frame.epoch, "still image submitted for detection");
                self.image_submitted = Some(StillSubmission {
                    epoch: frame.epoch,
                    failures_before: latest.failures,
                    at: Instant::now(),
                });
            }
        } else {
            let due = self.last_submit.map_or(true, |t| t.elapsed() >= interval);
            if due && detection.submit(ticket()) {
                self.last_submit = Some(Instant::now());
            }
        }
    }

    /// Latest detection result, or an empty one when no detector runs.
    pub fn detections(&self) -> std::sync::Arc<DetectionSnapshot> {
        self.detection.as_ref().map(|d| d.reader().latest()).unwrap_or_default()
    }

    /// The composite shown on screen.
    pub fn frame(&self) -> &RgbImage {
        self.render.frame()
    }

    pub fn render_loop(&self) -> &RenderLoop {
        &self.render
    }

    /// Save what is on screen to the snapshot directory.
    pub fn snapshot(&self) -> Result<PathBuf> {
        let image = Snapshot::capture(self.render.surfaces())?;
        let format = ExportFormat::from_name(&self.config.snapshot.format)?;
        Snapshot::export(&image, &self.config.snapshot.directory, format)
    }

    // Status

    pub fn mode(&self) -> Option<ModeState> {
        self.source.mode()
    }

    pub fn source_state(&self) -> &SourceState {
        self.source.state()
    }

    pub fn source(&self) -> &FrameSourceManager {
        &self.source
    }

    pub fn detector_name(&self) -> Option<&str> {
        self.detection.as_ref().map(|d| d.name())
    }

    pub fn assets(&self) -> &AssetManager {
        &self.assets
    }

    /// Why the overlay cannot be shown at all, if it cannot.
    pub fn overlay_blocked(&self) -> Option<String> {
        if let Some(e) = &self.model_error {
            return Some(e.clone());
        }
        if self.assets.is_empty() {
            return Some(self.asset_error.clone().unwrap_or_else(|| "no overlay assets loaded".to_string()));
        }
        None
    }

    /// Non-blocking message for the user, newest concern first.
    pub fn notice(&self) -> Option<&str> {
        self.source.notice().or(self.asset_error.as_deref())
    }
}

impl Drop for TryOnSession {
    fn drop(&mut self) {
        self.deactivate();
        info!("Try-on session closed");
    }
}
