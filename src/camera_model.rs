use nalgebra::{Perspective3, Point3};

use crate::types::{FrameSize, Landmark};

/// Pinhole camera at the origin looking down -Z with +Y up.
#[derive(Debug, Clone, Copy)]
pub struct PerspectiveCamera {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    /// Depth of the plane landmarks are unprojected onto.
    pub reference_depth: f32,
}

impl PerspectiveCamera {
    pub fn new(fov_y_deg: f32, near: f32, far: f32, reference_depth: f32) -> Self {
        Self {
            fov_y: fov_y_deg.to_radians(),
            aspect: 1.0,
            near,
            far,
            reference_depth,
        }
    }

    /// Match aspect to the frame. Zero-sized frames leave the camera unchanged.
    pub fn set_viewport(&mut self, size: FrameSize) {
        if !size.is_empty() {
            self.aspect = size.aspect();
        }
    }

    pub fn projection(&self) -> Perspective3<f32> {
        Perspective3::new(self.aspect, self.fov_y, self.near, self.far)
    }

    /// World-space (width, height) of the view at the reference depth.
    pub fn plane_extent(&self) -> (f32, f32) {
        let h = 2.0 * self.reference_depth * (self.fov_y / 2.0).tan();
        (h * self.aspect, h)
    }

    /// Normalized image point (+ relative depth) to world space.
    ///
    /// x/y land on the reference plane; `z` is scaled by the plane width so
    /// that depth and lateral distances share units.
    pub fn unproject(&self, l: &Landmark) -> Point3<f32> {
        let (w, h) = self.plane_extent();
        Point3::new(
            (l.x - 0.5) * w,
            (0.5 - l.y) * h,
            -self.reference_depth - l.z * w,
        )
    }

    /// World point to normalized image coordinates plus NDC depth.
    pub fn project(&self, p: &Point3<f32>) -> Point3<f32> {
        let ndc = self.projection().project_point(p);
        Point3::new((ndc.x + 1.0) / 2.0, (1.0 - ndc.y) / 2.0, ndc.z)
    }
}
