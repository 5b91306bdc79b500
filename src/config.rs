use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use tracing::info;

use crate::assets::{AssetCatalog, CalibrationTable};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub models: ModelPaths,
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    pub render: RenderConfig,
    pub catalog: AssetCatalog,
    pub calibration: CalibrationTable,
    pub snapshot: SnapshotConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub face_detection_path: String,
    pub face_mesh_path: String,
    pub intra_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    /// Camera frames are shown as a mirror image unless this is off.
    pub mirror: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum time between camera frames handed to the detector.
    pub interval_ms: u64,
    pub score_threshold: f32,
    pub nms_iou: f32,
    pub max_faces: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Consecutive empty detection cycles before all overlays are hidden.
    pub hide_after_empty_cycles: u32,
    /// Render ticks a hidden pooled instance survives before eviction.
    pub instance_pool_ttl: u32,
    /// EMA weight of the newest pose. 1.0 disables smoothing.
    pub smoothing_alpha: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub fov_y_deg: f32,
    /// Distance from the camera at which landmarks are unprojected.
    pub reference_depth: f32,
    pub near: f32,
    pub far: f32,
    pub ambient: f32,
    pub directional: f32,
    pub light_direction: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub directory: PathBuf,
    /// "png" or "jpeg".
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub window_title: String,
    pub status_scale: usize,
    pub status_color_hex: String,
    pub error_color_hex: String,
    pub initial_asset: Option<String>,
    pub initial_image: Option<PathBuf>,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            face_detection_path: "models/face_detection.onnx".to_string(),
            face_mesh_path: "models/face_mesh.onnx".to_string(),
            intra_threads: 4,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { index: 0, mirror: true }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            score_threshold: 0.7,
            nms_iou: 0.3,
            max_faces: 4,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            hide_after_empty_cycles: 1,
            instance_pool_ttl: 120,
            smoothing_alpha: 0.6,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fov_y_deg: 50.0,
            reference_depth: 0.6,
            near: 0.01,
            far: 10.0,
            ambient: 0.45,
            directional: 0.75,
            light_direction: [-0.3, -0.5, -1.0],
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("snapshots"),
            format: "png".to_string(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_title: "Rusty Frames".to_string(),
            status_scale: 2,
            status_color_hex: "#FFFFFF".to_string(),
            error_color_hex: "#FF5050".to_string(),
            initial_asset: None,
            initial_image: None,
        }
    }
}

impl AppConfig {
    pub const DEFAULT_PATH: &'static str = "config.json";

    /// Load from `path`, falling back to defaults, and write the merged result back.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            // Missing fields come from Default thanks to #[serde(default)].
            // A malformed file is an error rather than silently overwritten.
            let c: AppConfig = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            c
        } else {
            info!("Configuration file not found. Creating default at {}", path.display());
            Self::default()
        };

        config.save(path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{ "detection": { "interval_ms": 150 } }"#).unwrap();
        assert_eq!(cfg.detection.interval_ms, 150);
        assert_eq!(cfg.detection.max_faces, 4);
        assert_eq!(cfg.catalog.entries.len(), 2);
        assert!(cfg.camera.mirror);
    }

    #[test]
    fn calibration_section_requires_default_entry() {
        let parsed = serde_json::from_str::<AppConfig>(r#"{ "calibration": { "assets": {} } }"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn load_writes_back_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = AppConfig::load(&path).unwrap();
        assert!(path.exists());
        let again = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.render.fov_y_deg, again.render.fov_y_deg);
    }

    #[test]
    fn malformed_file_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
