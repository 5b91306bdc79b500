use image::{imageops::FilterType, RgbImage};
use ort::session::Session;
use std::path::Path;
use tracing::{debug, info, trace};

use crate::config::{DetectionConfig, ModelPaths};
use crate::detector::{detection_err, open_session, DetectorParams, FaceDetector};
use crate::error::Result;
use crate::landmarks::{LandmarkSet, FACE_MESH_468};
use crate::pipeline::LandmarkDetector;
use crate::types::{Landmark, Rect};

const MESH_INPUT: u32 = 192;
const MESH_POINTS: usize = 468;

/// Face detector followed by a 468-point face mesh run on every detected box.
pub struct OnnxLandmarkDetector {
    detector: FaceDetector,
    mesh_session: Session,
}

impl OnnxLandmarkDetector {
    /// Loads both models. Either one missing is a blocking model-load error.
    pub fn new(models: &ModelPaths, detection: &DetectionConfig) -> Result<Self> {
        let params = DetectorParams {
            score_threshold: detection.score_threshold,
            nms_iou: detection.nms_iou,
            max_faces: detection.max_faces.max(1),
        };
        info!("Loading face detector from {}...", models.face_detection_path);
        let detector = FaceDetector::new(Path::new(&models.face_detection_path), models.intra_threads, params)?;
        info!("Loading face mesh from {}...", models.face_mesh_path);
        let mesh_session = open_session(Path::new(&models.face_mesh_path), models.intra_threads)?;
        Ok(Self { detector, mesh_session })
    }

    fn mesh_for(&mut self, frame: &RgbImage, rect: &Rect) -> Result<Option<LandmarkSet>> {
        // Expand ROI slightly for better mesh context
        let roi = rect.padded_within(0.25, frame.width(), frame.height());
        if roi.width < 1.0 || roi.height < 1.0 {
            return Ok(None);
        }
        let crop = image::imageops::crop_imm(frame, roi.x as u32, roi.y as u32, roi.width as u32, roi.height as u32)
            .to_image();
        let resized = image::imageops::resize(&crop, MESH_INPUT, MESH_INPUT, FilterType::Triangle);

        // NHWC [1, 192, 192, 3] in [-1, 1]
        let mut input_data = Vec::with_capacity((MESH_INPUT * MESH_INPUT * 3) as usize);
        for pixel in resized.pixels() {
            for c in 0..3 {
                input_data.push(pixel[c] as f32 / 127.5 - 1.0);
            }
        }

        let input = ort::value::Tensor::from_array((vec![1, 192, 192, 3], input_data)).map_err(detection_err)?;
        let outputs = self.mesh_session.run(ort::inputs![input]).map_err(detection_err)?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>().map_err(detection_err)?;

        if raw.len() < MESH_POINTS * 3 {
            debug!("face mesh returned {} values, expected {}", raw.len(), MESH_POINTS * 3);
            return Ok(None);
        }

        // Mesh local (0..192) -> crop -> full frame -> normalized
        let fw = frame.width() as f32;
        let fh = frame.height() as f32;
        let sx = roi.width / MESH_INPUT as f32;
        let sy = roi.height / MESH_INPUT as f32;
        let points = raw
            .chunks_exact(3)
            .take(MESH_POINTS)
            .map(|p| Landmark {
                x: (roi.x + p[0] * sx) / fw,
                y: (roi.y + p[1] * sy) / fh,
                // depth is in mesh pixels; put it on the same scale as x
                z: p[2] * sx / fw,
            })
            .collect();
        Ok(Some(LandmarkSet::new(points, FACE_MESH_468)))
    }
}

impl LandmarkDetector for OnnxLandmarkDetector {
    fn name(&self) -> String {
        "Face Mesh (468 pts, UltraFace ROI)".to_string()
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<LandmarkSet>> {
        let boxes = self.detector.detect(frame)?;
        trace!("{} face box(es)", boxes.len());
        let mut faces = Vec::with_capacity(boxes.len());
        for rect in &boxes {
            if let Some(set) = self.mesh_for(frame, rect)? {
                faces.push(set);
            }
        }
        Ok(faces)
    }
}
