use image::RgbImage;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraIndex, RequestedFormat, RequestedFormatType},
    Camera,
};
use tracing::{info, warn};

use crate::error::{Result, TryOnError};

/// Something that can grant a camera stream.
pub trait CameraProvider {
    fn open(&mut self) -> Result<Box<dyn CameraStream>>;
}

/// An open camera stream. Tracks stay live until [`CameraStream::stop`].
pub trait CameraStream {
    fn name(&self) -> String;
    fn resolution(&self) -> (u32, u32);
    fn capture(&mut self) -> Result<RgbImage>;
    /// Stop all tracks. Must be safe to call more than once.
    fn stop(&mut self);
}

/// Native camera access through nokhwa.
pub struct NokhwaProvider {
    index: u32,
}

impl NokhwaProvider {
    pub fn new(index: u32) -> Self {
        Self { index }
    }
}

impl CameraProvider for NokhwaProvider {
    fn open(&mut self) -> Result<Box<dyn CameraStream>> {
        let cam_index = CameraIndex::Index(self.index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(cam_index, requested).map_err(classify)?;
        camera.open_stream().map_err(classify)?;

        info!("Opened camera: {} ({})", camera.info().human_name(), camera.camera_format());
        Ok(Box::new(NokhwaStream { camera, active: true }))
    }
}

/// Permission problems are recoverable by falling back to an image; anything
/// else means the device itself is unusable.
fn classify(e: nokhwa::NokhwaError) -> TryOnError {
    let msg = e.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        TryOnError::Permission(msg)
    } else {
        TryOnError::CameraUnavailable(msg)
    }
}

pub struct NokhwaStream {
    camera: Camera,
    active: bool,
}

impl CameraStream for NokhwaStream {
    fn name(&self) -> String {
        self.camera.info().human_name()
    }

    fn resolution(&self) -> (u32, u32) {
        let res = self.camera.resolution();
        (res.width(), res.height())
    }

    fn capture(&mut self) -> Result<RgbImage> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| TryOnError::CameraUnavailable(format!("failed to get frame: {e}")))?;
        frame
            .decode_image::<RgbFormat>()
            .map_err(|e| TryOnError::CameraUnavailable(format!("failed to decode frame: {e}")))
    }

    fn stop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(e) = self.camera.stop_stream() {
            warn!("Stopping camera stream failed: {}", e);
        }
        self.active = false;
        info!("Camera stream stopped");
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        self.stop();
    }
}
