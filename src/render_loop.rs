//! Per-frame driver: keeps surfaces and camera in sync with the source,
//! places one overlay instance per tracked face and produces the composite.

use image::RgbImage;
use tracing::{debug, trace};

use crate::assets::{AssetKey, AssetManager};
use crate::config::AppConfig;
use crate::error::{Result, TryOnError};
use crate::pose::{PoseEstimator, PoseSmoother};
use crate::render::RenderSurfaces;
use crate::scene::Scene;
use crate::tracking::DetectionSnapshot;
use crate::types::FrameSize;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub faces: usize,
    pub visible: usize,
    pub resized: bool,
}

/// Inputs of one render tick.
pub struct TickInput<'a> {
    pub frame: &'a RgbImage,
    pub mirrored: bool,
    /// Epoch of the source `frame` came from.
    pub epoch: u64,
    pub detections: &'a DetectionSnapshot,
    pub assets: &'a AssetManager,
    pub selected: Option<&'a AssetKey>,
}

pub struct RenderLoop {
    surfaces: RenderSurfaces,
    scene: Scene,
    estimator: PoseEstimator,
    smoother: PoseSmoother,
    hide_after: u32,
    composite: RgbImage,
}

impl RenderLoop {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            surfaces: RenderSurfaces::new(),
            scene: Scene::new(&config.render, config.tracking.instance_pool_ttl),
            estimator: PoseEstimator::new(),
            smoother: PoseSmoother::new(config.tracking.smoothing_alpha),
            hide_after: config.tracking.hide_after_empty_cycles.max(1),
            composite: RgbImage::new(0, 0),
        }
    }

    pub fn surfaces(&self) -> &RenderSurfaces {
        &self.surfaces
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// The last composite, as shown on screen.
    pub fn frame(&self) -> &RgbImage {
        &self.composite
    }

    /// Render one frame. A zero-sized frame skips the tick with
    /// [`TryOnError::FrameSize`] and leaves the previous composite in place.
    pub fn tick(&mut self, input: TickInput<'_>) -> Result<TickReport> {
        let size = FrameSize::new(input.frame.width(), input.frame.height());
        if size.is_empty() {
            return Err(TryOnError::FrameSize { width: size.width, height: size.height });
        }

        // Surfaces and camera change size together, before anything is drawn.
        let resized = self.surfaces.resync(size);
        if resized {
            self.scene.resync(size);
        }
        self.surfaces.set_base(input.frame, input.mirrored);

        let asset = input.selected.and_then(|k| input.assets.get(k));
        let det = input.detections;
        let current = det.epoch == input.epoch && det.generation > 0;
        let faces: &[_] = if current { &det.faces } else { &[] };

        match &asset {
            None => self.hide_all(),
            Some(_) if !current => self.hide_all(),
            Some(_) if faces.is_empty() => {
                // Keep the last placement through short gaps.
                if det.empty_streak >= self.hide_after {
                    self.hide_all();
                }
            }
            Some(asset) => {
                for (i, face) in faces.iter().enumerate() {
                    match self.estimator.estimate(face, asset, &self.scene.camera) {
                        Some(pose) => {
                            let pose = self.smoother.filter(i, pose);
                            self.scene.show(i, &asset.key, pose);
                        }
                        None => {
                            trace!(face = i, "no pose for face");
                            self.scene.hide(i);
                            self.smoother.forget(i);
                        }
                    }
                }
                self.scene.hide_from(faces.len());
                let gone: Vec<usize> = self.scene.instances().filter(|(_, i)| !i.visible).map(|(k, _)| k).collect();
                for face in gone {
                    self.smoother.forget(face);
                }
            }
        }
        for face in self.scene.end_tick() {
            self.smoother.forget(face);
        }

        self.surfaces.clear_overlay();
        let placed: Vec<_> = self
            .scene
            .visible()
            .filter_map(|inst| input.assets.get(&inst.asset).map(|a| (a, inst.pose.clone())))
            .collect();
        for (asset, pose) in &placed {
            self.surfaces.draw_instance(&self.scene, asset, pose);
        }
        let visible = placed.len();
        self.composite = self.surfaces.composite();

        if resized {
            debug!(width = size.width, height = size.height, "render loop resynchronized");
        }
        Ok(TickReport { faces: faces.len(), visible, resized })
    }

    fn hide_all(&mut self) {
        self.scene.hide_all();
        self.smoother.clear();
    }

    /// Drop every pooled instance, e.g. on session teardown.
    pub fn clear(&mut self) {
        self.scene.clear();
        self.smoother.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{Calibration, OverlayAsset};
    use crate::mesh::Mesh;
    use crate::testing::{level_face, GLASSES_OBJ};

    struct Fixture {
        lp: RenderLoop,
        assets: AssetManager,
        key: AssetKey,
        frame: RgbImage,
    }

    fn fixture(hide_after: u32) -> Fixture {
        let mut config = AppConfig::default();
        config.tracking.hide_after_empty_cycles = hide_after;
        config.tracking.smoothing_alpha = 1.0;
        let key = AssetKey::from("a");
        let mut assets = AssetManager::new();
        assets.insert(OverlayAsset::from_mesh(key.clone(), Mesh::from_obj(GLASSES_OBJ).unwrap(), Calibration::default()));
        Fixture { lp: RenderLoop::new(&config), assets, key, frame: RgbImage::new(64, 48) }
    }

    fn snap(epoch: u64, generation: u64, faces: usize, empty_streak: u32) -> DetectionSnapshot {
        DetectionSnapshot {
            epoch,
            generation,
            faces: (0..faces).map(|i| level_face(0.3 + 0.4 * i as f32, 0.5, 0.15)).collect(),
            empty_streak,
            ..DetectionSnapshot::default()
        }
    }

    impl Fixture {
        fn tick(&mut self, det: &DetectionSnapshot, selected: bool) -> Result<TickReport> {
            self.lp.tick(TickInput {
                frame: &self.frame,
                mirrored: false,
                epoch: 1,
                detections: det,
                assets: &self.assets,
                selected: selected.then_some(&self.key),
            })
        }
    }

    #[test]
    fn one_instance_per_face() {
        let mut f = fixture(1);
        let report = f.tick(&snap(1, 1, 2, 0), true).unwrap();
        assert_eq!(report, TickReport { faces: 2, visible: 2, resized: true });
        assert_eq!(f.lp.scene().pool_len(), 2);
        assert_eq!(f.lp.frame().dimensions(), (64, 48));

        let report = f.tick(&snap(1, 2, 1, 0), true).unwrap();
        assert_eq!(report.visible, 1);
        assert!(!f.lp.scene().instance(1).unwrap().visible);
        assert!(!report.resized);
    }

    #[test]
    fn hides_all_after_n_empty_cycles() {
        let mut f = fixture(3);
        f.tick(&snap(1, 1, 1, 0), true).unwrap();
        assert_eq!(f.tick(&snap(1, 2, 0, 1), true).unwrap().visible, 1);
        assert_eq!(f.tick(&snap(1, 3, 0, 2), true).unwrap().visible, 1);

        let report = f.tick(&snap(1, 4, 0, 3), true).unwrap();
        assert_eq!(report.visible, 0);
        // Hidden, not merely skipped by the rasterizer.
        assert!(!f.lp.scene().instance(0).unwrap().visible);
    }

    #[test]
    fn results_from_an_older_source_are_ignored() {
        let mut f = fixture(1);
        f.tick(&snap(1, 1, 1, 0), true).unwrap();
        let stale = snap(0, 2, 1, 0);
        assert_eq!(f.tick(&stale, true).unwrap().visible, 0);
    }

    #[test]
    fn no_selected_asset_hides_everything() {
        let mut f = fixture(1);
        f.tick(&snap(1, 1, 1, 0), true).unwrap();
        let report = f.tick(&snap(1, 1, 1, 0), false).unwrap();
        assert_eq!(report.visible, 0);
        assert_eq!(f.lp.frame(), &f.frame);
    }

    #[test]
    fn zero_sized_frames_skip_the_tick() {
        let mut f = fixture(1);
        f.frame = RgbImage::new(0, 10);
        let err = f.tick(&snap(1, 1, 1, 0), true).unwrap_err();
        assert!(matches!(err, TryOnError::FrameSize { width: 0, height: 10 }));
        assert!(!f.lp.surfaces().is_sized());
    }

    #[test]
    fn frame_size_changes_resync_the_camera() {
        let mut f = fixture(1);
        f.tick(&snap(1, 1, 1, 0), true).unwrap();
        f.frame = RgbImage::new(40, 40);
        let report = f.tick(&snap(1, 1, 1, 0), true).unwrap();
        assert!(report.resized);
        assert_eq!(f.lp.scene().camera.aspect, 1.0);
        assert_eq!(f.lp.surfaces().overlay().dimensions(), (40, 40));
    }
}
