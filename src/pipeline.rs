use crate::error::Result;
use crate::landmarks::LandmarkSet;
use image::RgbImage;

/// A landmark model: one frame in, one [`LandmarkSet`] per visible face out.
///
/// Implementations run on the detection worker thread, hence `Send`.
pub trait LandmarkDetector: Send {
    fn name(&self) -> String;
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<LandmarkSet>>;
}
