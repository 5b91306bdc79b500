//! Scene state owned by the render loop: camera, lights and the overlay
//! instance pool keyed by face index.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use tracing::debug;

use crate::assets::AssetKey;
use crate::camera_model::PerspectiveCamera;
use crate::config::RenderConfig;
use crate::pose::FacePose;
use crate::types::FrameSize;

#[derive(Debug, Clone, Copy)]
pub struct AmbientLight {
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct DirectionalLight {
    /// Unit vector the light travels along.
    pub direction: Vector3<f32>,
    pub intensity: f32,
}

impl DirectionalLight {
    pub fn new(direction: [f32; 3], intensity: f32) -> Self {
        let direction = Vector3::from(direction)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| -Vector3::z());
        Self { direction, intensity }
    }

    /// Lambert term for a face normal, two-sided.
    pub fn lambert(&self, normal: &Vector3<f32>) -> f32 {
        normal.dot(&-self.direction).abs() * self.intensity
    }
}

/// One placed copy of an overlay asset, reused across ticks for the same face.
#[derive(Debug, Clone)]
pub struct OverlayInstance {
    pub asset: AssetKey,
    pub visible: bool,
    pub pose: FacePose,
    hidden_ticks: u32,
}

pub struct Scene {
    pub camera: PerspectiveCamera,
    pub ambient: AmbientLight,
    pub directional: DirectionalLight,
    instances: BTreeMap<usize, OverlayInstance>,
    pool_ttl: u32,
}

impl Scene {
    pub fn new(render: &RenderConfig, pool_ttl: u32) -> Self {
        Self {
            camera: PerspectiveCamera::new(render.fov_y_deg, render.near, render.far, render.reference_depth),
            ambient: AmbientLight { intensity: render.ambient },
            directional: DirectionalLight::new(render.light_direction, render.directional),
            instances: BTreeMap::new(),
            pool_ttl,
        }
    }

    pub fn resync(&mut self, size: FrameSize) {
        self.camera.set_viewport(size);
    }

    /// Place the instance for `face`, creating it on first use.
    pub fn show(&mut self, face: usize, asset: &AssetKey, pose: FacePose) {
        match self.instances.get_mut(&face) {
            Some(inst) => {
                if &inst.asset != asset {
                    inst.asset = asset.clone();
                }
                inst.pose = pose;
                inst.visible = true;
                inst.hidden_ticks = 0;
            }
            None => {
                debug!(face, asset = %asset, "overlay instance created");
                self.instances.insert(
                    face,
                    OverlayInstance { asset: asset.clone(), visible: true, pose, hidden_ticks: 0 },
                );
            }
        }
    }

    pub fn hide(&mut self, face: usize) {
        if let Some(inst) = self.instances.get_mut(&face) {
            inst.visible = false;
        }
    }

    /// Hide every instance whose face index is `>= count`.
    pub fn hide_from(&mut self, count: usize) {
        for (_, inst) in self.instances.range_mut(count..) {
            inst.visible = false;
        }
    }

    pub fn hide_all(&mut self) {
        self.hide_from(0);
    }

    /// Age hidden instances and evict the ones past the pool TTL.
    /// Returns the evicted face indices.
    pub fn end_tick(&mut self) -> Vec<usize> {
        let mut evicted = Vec::new();
        for (face, inst) in self.instances.iter_mut() {
            if !inst.visible {
                inst.hidden_ticks += 1;
                if inst.hidden_ticks > self.pool_ttl {
                    evicted.push(*face);
                }
            }
        }
        for face in &evicted {
            self.instances.remove(face);
        }
        if !evicted.is_empty() {
            debug!(?evicted, "overlay instances evicted");
        }
        evicted
    }

    pub fn instance(&self, face: usize) -> Option<&OverlayInstance> {
        self.instances.get(&face)
    }

    pub fn instances(&self) -> impl Iterator<Item = (usize, &OverlayInstance)> {
        self.instances.iter().map(|(k, v)| (*k, v))
    }

    pub fn visible(&self) -> impl Iterator<Item = &OverlayInstance> {
        self.instances.values().filter(|i| i.visible)
    }

    pub fn pool_len(&self) -> usize {
        self.instances.len()
    }

    pub fn clear(&mut self) {
        self.instances.clear();
    }
}
