//! Camera / still-image lifecycle and the mode state machine.
//!
//! At most one frame source is held at a time. Every acquisition first
//! releases the previous source (camera tracks stopped) and bumps the epoch,
//! so detection results computed for an earlier source can be told apart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageReader, RgbImage};
use tracing::{debug, info, warn};

use crate::camera::{CameraProvider, CameraStream};
use crate::error::{Result, TryOnError};
use crate::types::FrameSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeState {
    UsingCamera,
    UsingUploadedImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    AcquiringCamera,
    Live,
    AwaitingImage,
    ImageReady,
    /// Camera acquisition failed; the manager is waiting for an image instead.
    Error(String),
}

pub struct ActiveCamera {
    stream: Box<dyn CameraStream>,
    size: FrameSize,
    mirror: bool,
}

pub struct StillImage {
    path: Option<PathBuf>,
    frame: Arc<RgbImage>,
}

pub enum FrameSource {
    Camera(ActiveCamera),
    Image(StillImage),
}

impl FrameSource {
    pub fn size(&self) -> FrameSize {
        match self {
            FrameSource::Camera(cam) => cam.size,
            FrameSource::Image(img) => FrameSize::new(img.frame.width(), img.frame.height()),
        }
    }

    pub fn width(&self) -> u32 {
        self.size().width
    }

    pub fn height(&self) -> u32 {
        self.size().height
    }

    /// Camera name or image file name, for the status line.
    pub fn describe(&self) -> String {
        match self {
            FrameSource::Camera(cam) => cam.stream.name(),
            FrameSource::Image(img) => match &img.path {
                Some(p) => p.file_name().unwrap_or(p.as_os_str()).to_string_lossy().into_owned(),
                None => "image".to_string(),
            },
        }
    }
}

/// A frame from the active source, tagged with the source epoch.
pub struct SourceFrame {
    pub epoch: u64,
    pub image: Arc<RgbImage>,
    pub mirrored: bool,
    pub still: bool,
}

pub struct FrameSourceManager {
    provider: Box<dyn CameraProvider>,
    mirror_camera: bool,
    mode: Option<ModeState>,
    state: SourceState,
    active: Option<FrameSource>,
    epoch: u64,
    notice: Option<String>,
}

impl FrameSourceManager {
    pub fn new(provider: Box<dyn CameraProvider>, mirror_camera: bool) -> Self {
        Self {
            provider,
            mirror_camera,
            mode: None,
            state: SourceState::Idle,
            active: None,
            epoch: 0,
            notice: None,
        }
    }

    pub fn mode(&self) -> Option<ModeState> {
        self.mode
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    pub fn source(&self) -> Option<&FrameSource> {
        self.active.as_ref()
    }

    /// Last user-facing message (camera denied, decode failure, ...).
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Stop the camera or drop the image. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(source) = self.active.take() {
            match source {
                FrameSource::Camera(mut cam) => {
                    cam.stream.stop();
                    info!("Camera released");
                }
                FrameSource::Image(img) => {
                    debug!(path = ?img.path, "image released");
                }
            }
        }
        self.state = SourceState::Idle;
    }

    fn begin(&mut self, mode: ModeState) {
        // Teardown completes before anything new is acquired.
        self.release();
        self.mode = Some(mode);
        self.epoch += 1;
        self.notice = None;
    }

    /// Switch to the camera. On failure the manager falls back to upload
    /// mode in the `Error` state and the error is returned.
    pub fn activate_camera(&mut self) -> Result<()> {
        self.begin(ModeState::UsingCamera);
        self.state = SourceState::AcquiringCamera;

        match self.provider.open() {
            Ok(stream) => {
                let (w, h) = stream.resolution();
                info!("Camera live: {} ({}x{})", stream.name(), w, h);
                self.active = Some(FrameSource::Camera(ActiveCamera {
                    stream,
                    size: FrameSize::new(w, h),
                    mirror: self.mirror_camera,
                }));
                self.state = SourceState::Live;
                Ok(())
            }
            Err(e) => {
                warn!("Camera acquisition failed, falling back to image mode: {e}");
                let msg = match &e {
                    TryOnError::Permission(_) => "Camera access denied. Type an image path in the terminal instead.".to_string(),
                    other => format!("{other}. Type an image path in the terminal instead."),
                };
                self.mode = Some(ModeState::UsingUploadedImage);
                self.state = SourceState::Error(msg.clone());
                self.notice = Some(msg);
                Err(e)
            }
        }
    }

    /// Switch to upload mode without an image yet.
    pub fn await_image(&mut self) {
        self.begin(ModeState::UsingUploadedImage);
        self.state = SourceState::AwaitingImage;
    }

    /// Switch to upload mode and decode `path`. A decode failure leaves the
    /// manager awaiting an image.
    pub fn activate_image(&mut self, path: &Path) -> Result<()> {
        self.await_image();
        match decode(path) {
            Ok(frame) => {
                self.install_image(frame, Some(path.to_path_buf()));
                Ok(())
            }
            Err(e) => {
                warn!("{e}");
                self.notice = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Use an already decoded image.
    pub fn activate_decoded_image(&mut self, frame: RgbImage) -> Result<()> {
        self.await_image();
        if frame.width() == 0 || frame.height() == 0 {
            return Err(TryOnError::FrameSize { width: frame.width(), height: frame.height() });
        }
        self.install_image(frame, None);
        Ok(())
    }

    fn install_image(&mut self, frame: RgbImage, path: Option<PathBuf>) {
        info!("Image ready: {}x{}", frame.width(), frame.height());
        self.active = Some(FrameSource::Image(StillImage { path, frame: Arc::new(frame) }));
        self.state = SourceState::ImageReady;
    }

    /// The current frame, or `None` when nothing is active.
    pub fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        let epoch = self.epoch;
        match self.active.as_mut() {
            None => Ok(None),
            Some(FrameSource::Camera(cam)) => {
                let image = cam.stream.capture()?;
                cam.size = FrameSize::new(image.width(), image.height());
                Ok(Some(SourceFrame { epoch, image: Arc::new(image), mirrored: cam.mirror, still: false }))
            }
            Some(FrameSource::Image(img)) => Ok(Some(SourceFrame {
                epoch,
                image: img.frame.clone(),
                mirrored: false,
                still: true,
            })),
        }
    }
}

impl Drop for FrameSourceManager {
    fn drop(&mut self) {
        self.release();
    }
}

fn decode(path: &Path) -> Result<RgbImage> {
    let decode_err = |reason: String| TryOnError::ImageDecode { path: path.to_path_buf(), reason };
    let img = ImageReader::open(path)
        .map_err(|e| decode_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(TryOnError::FrameSize { width: img.width(), height: img.height() });
    }
    Ok(img.to_rgb8())
}
