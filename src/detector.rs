use crate::error::{Result, TryOnError};
use crate::types::Rect;
use image::{imageops::FilterType, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;

const INPUT_W: u32 = 320;
const INPUT_H: u32 = 240;

/// Box decoding parameters of the UltraFace detector.
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    pub score_threshold: f32,
    pub nms_iou: f32,
    pub max_faces: usize,
}

pub struct FaceDetector {
    session: Session,
    anchors: Vec<(f32, f32, f32, f32)>, // cx, cy, w, h
    params: DetectorParams,
}

impl FaceDetector {
    pub fn new(model_path: &Path, intra_threads: usize, params: DetectorParams) -> Result<Self> {
        let session = open_session(model_path, intra_threads)?;
        let anchors = generate_anchors(INPUT_W as usize, INPUT_H as usize);
        Ok(Self { session, anchors, params })
    }

    /// All faces above the score threshold, left to right.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Rect>> {
        let resized = image::imageops::resize(frame, INPUT_W, INPUT_H, FilterType::Triangle);

        // NCHW [1, 3, 240, 320], normalized (pixel - 127) / 128
        let mut input_data = Vec::with_capacity(3 * (INPUT_W * INPUT_H) as usize);
        for c in 0..3 {
            for y in 0..INPUT_H {
                for x in 0..INPUT_W {
                    let p = resized.get_pixel(x, y)[c];
                    input_data.push((p as f32 - 127.0) / 128.0);
                }
            }
        }

        let input_tensor = Tensor::from_array((vec![1, 3, 240, 320], input_data))
            .map_err(detection_err)?;
        let outputs = self.session.run(ort::inputs![input_tensor]).map_err(detection_err)?;

        let (_, scores) = outputs["scores"].try_extract_tensor::<f32>().map_err(detection_err)?;
        let (_, boxes) = outputs["boxes"].try_extract_tensor::<f32>().map_err(detection_err)?;

        let sx = frame.width() as f32 / INPUT_W as f32;
        let sy = frame.height() as f32 / INPUT_H as f32;

        let mut faces: Vec<Rect> = post_process(&self.anchors, scores, boxes, &self.params)
            .into_iter()
            .map(|r| Rect::new(r.x * sx, r.y * sy, r.width * sx, r.height * sy))
            .collect();
        faces.sort_by(|a, b| a.x.total_cmp(&b.x));
        Ok(faces)
    }
}

pub(crate) fn open_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    if !model_path.exists() {
        return Err(TryOnError::ModelLoad {
            path: model_path.to_path_buf(),
            reason: "file not found".to_string(),
        });
    }
    Session::builder()
        .map_err(load_err(model_path))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(load_err(model_path))?
        .with_intra_threads(intra_threads)
        .map_err(load_err(model_path))?
        .with_execution_providers([ort::execution_providers::CPUExecutionProvider::default().build()])
        .map_err(load_err(model_path))?
        .commit_from_file(model_path)
        .map_err(load_err(model_path))
}

fn load_err<E: std::fmt::Display>(path: &Path) -> impl Fn(E) -> TryOnError + '_ {
    move |e| TryOnError::ModelLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

pub(crate) fn detection_err<E: std::fmt::Display>(e: E) -> TryOnError {
    TryOnError::Detection(e.to_string())
}

/// Decode anchors, threshold, then greedy non-maximum suppression.
/// Boxes are in detector input pixels.
fn post_process(
    anchors: &[(f32, f32, f32, f32)],
    scores_raw: &[f32],
    boxes_raw: &[f32],
    params: &DetectorParams,
) -> Vec<Rect> {
    // Variance for UltraFace
    let center_variance = 0.1;
    let size_variance = 0.2;

    let mut candidates: Vec<(f32, Rect)> = Vec::new();
    for (i, &(ax, ay, aw, ah)) in anchors.iter().enumerate() {
        let Some(&score) = scores_raw.get(i * 2 + 1) else { break };
        if score <= params.score_threshold || boxes_raw.len() < i * 4 + 4 {
            continue;
        }
        let enc = &boxes_raw[i * 4..i * 4 + 4];
        let cx = enc[0] * center_variance * aw + ax;
        let cy = enc[1] * center_variance * ah + ay;
        let w = (enc[2] * size_variance).exp() * aw;
        let h = (enc[3] * size_variance).exp() * ah;

        let rect = Rect::new(
            (cx - w / 2.0) * INPUT_W as f32,
            (cy - h / 2.0) * INPUT_H as f32,
            w * INPUT_W as f32,
            h * INPUT_H as f32,
        );
        candidates.push((score, rect));
    }

    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
    let mut kept: Vec<Rect> = Vec::new();
    for (_, rect) in candidates {
        if kept.len() >= params.max_faces {
            break;
        }
        if kept.iter().all(|k| k.iou(&rect) < params.nms_iou) {
            kept.push(rect);
        }
    }
    kept
}

fn generate_anchors(width: usize, height: usize) -> Vec<(f32, f32, f32, f32)> {
    // UltraFace configs
    let shrinkage_list = [8, 16, 32, 64];
    let min_boxes: [&[f32]; 4] = [&[10.0, 16.0, 24.0], &[32.0, 48.0], &[64.0, 96.0], &[128.0, 192.0, 256.0]];
    let mut anchors = Vec::new();

    let w = width as f32;
    let h = height as f32;

    for (i, &shrinkage) in shrinkage_list.iter().enumerate() {
        let feature_h = (height as f32 / shrinkage as f32).ceil() as usize;
        let feature_w = (width as f32 / shrinkage as f32).ceil() as usize;

        for v in 0..feature_h {
            for u in 0..feature_w {
                let cx = (u as f32 * shrinkage as f32 + shrinkage as f32 / 2.0) / w;
                let cy = (v as f32 * shrinkage as f32 + shrinkage as f32 / 2.0) / h;

                for &min_box in min_boxes[i] {
                    anchors.push((cx, cy, min_box / w, min_box / h));
                }
            }
        }
    }
    anchors
}
