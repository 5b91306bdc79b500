//! Landmarks to overlay placement: anchor position, uniform scale, rotation
//! from an orthonormal face basis, and per-side temple lengths.

use std::collections::HashMap;

use nalgebra::{Matrix3, Point3, Rotation3, UnitQuaternion, Vector3};

use crate::assets::OverlayAsset;
use crate::camera_model::PerspectiveCamera;
use crate::landmarks::{FacePoint, LandmarkSet};
use crate::mesh::PartKind;
use crate::types::Landmark;

const EPS: f32 = 1e-6;
const TEMPLE_SCALE_RANGE: (f32, f32) = (0.5, 2.0);

/// Orthonormal face frame in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub right: Vector3<f32>,
    pub up: Vector3<f32>,
    pub forward: Vector3<f32>,
}

impl Basis {
    /// Right from the outer eye line, up from chin to forehead, forward as
    /// their cross product, then up rebuilt from forward x right.
    pub fn from_axes(right_raw: Vector3<f32>, up_raw: Vector3<f32>) -> Option<Basis> {
        let right = right_raw.try_normalize(EPS)?;
        let forward = right.cross(&up_raw).try_normalize(EPS)?;
        let up = forward.cross(&right).normalize();
        Some(Basis { right, up, forward })
    }

    pub fn rotation(&self) -> UnitQuaternion<f32> {
        let m = Matrix3::from_columns(&[self.right, self.up, self.forward]);
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m))
    }
}

/// Length adjustment of one temple arm, applied along model z about the hinge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartPose {
    pub part: PartKind,
    pub hinge_z: f32,
    pub length_scale: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacePose {
    pub position: Point3<f32>,
    pub scale: f32,
    /// Face basis composed with the asset's rotation offset.
    pub rotation: UnitQuaternion<f32>,
    pub basis: Basis,
    /// Anchor in normalized image space.
    pub anchor: Landmark,
    pub parts: Vec<PartPose>,
}

impl FacePose {
    /// In-plane rotation of the eye line, radians. Zero for level eyes.
    pub fn roll(&self) -> f32 {
        self.basis.right.y.atan2(self.basis.right.x)
    }

    fn part_pose(&self, part: PartKind) -> Option<&PartPose> {
        self.parts.iter().find(|p| p.part == part)
    }

    /// Model-space vertex to world space, including temple stretching.
    pub fn transform_vertex(&self, v: &Point3<f32>, part: PartKind) -> Point3<f32> {
        let mut local = *v;
        if part != PartKind::Body {
            if let Some(pp) = self.part_pose(part) {
                local.z = pp.hinge_z + (local.z - pp.hinge_z) * pp.length_scale;
            }
        }
        self.position + self.rotation * (local.coords * self.scale)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoseEstimator;

impl PoseEstimator {
    pub fn new() -> Self {
        Self
    }

    /// `None` when required landmarks are missing or the geometry is degenerate.
    pub fn estimate(
        &self,
        landmarks: &LandmarkSet,
        asset: &OverlayAsset,
        camera: &PerspectiveCamera,
    ) -> Option<FacePose> {
        let cal = &asset.calibration;
        let get = |p| landmarks.point(p);
        let world = |l: &Landmark| camera.unproject(l);

        let inner_l = get(FacePoint::LeftEyeInner)?;
        let inner_r = get(FacePoint::RightEyeInner)?;
        let outer_l = get(FacePoint::LeftEyeOuter)?;
        let outer_r = get(FacePoint::RightEyeOuter)?;
        let nose = get(FacePoint::NoseBridge)?;
        let forehead = get(FacePoint::Forehead)?;
        let chin = get(FacePoint::Chin)?;

        // Position: eye midpoint pulled toward the nose bridge.
        let mid = lerp_landmark(&inner_l, &inner_r, 0.5);
        let anchor = lerp_landmark(&mid, &nose, cal.nose_bias);
        let position = world(&anchor);

        // Scale: inner eye span against the calibrated reference.
        let eye_span = (world(&inner_r) - world(&inner_l)).norm();
        if eye_span < EPS || cal.reference_eye_distance <= 0.0 {
            return None;
        }
        let mut ratio = eye_span / cal.reference_eye_distance;
        let face_height = (world(&forehead) - world(&chin)).norm();
        if face_height > EPS && cal.reference_face_height > 0.0 {
            // Strong yaw shrinks the eye span but barely the face height.
            ratio = ratio.max(0.5 * face_height / cal.reference_face_height);
        }
        let scale = cal.scale_multiplier * ratio;

        // Rotation
        let basis = Basis::from_axes(world(&outer_r) - world(&outer_l), world(&forehead) - world(&chin))?;
        let rotation = basis.rotation() * asset.rotation_offset;

        let parts = match asset.temples {
            Some((left, right)) if scale > EPS => {
                let side = |part, eye: Landmark, ear: FacePoint, hinge_z: f32, length: f32| {
                    let ear = get(ear)?;
                    let measured = (world(&ear) - world(&eye)).norm();
                    let length_scale = (measured / (length * scale)).clamp(TEMPLE_SCALE_RANGE.0, TEMPLE_SCALE_RANGE.1);
                    Some(PartPose { part, hinge_z, length_scale })
                };
                [
                    side(PartKind::TempleLeft, outer_l, FacePoint::LeftEar, left.hinge_z, left.length),
                    side(PartKind::TempleRight, outer_r, FacePoint::RightEar, right.hinge_z, right.length),
                ]
                .into_iter()
                .flatten()
                .collect()
            }
            _ => Vec::new(),
        };

        Some(FacePose { position, scale, rotation, basis, anchor, parts })
    }
}

fn lerp_landmark(a: &Landmark, b: &Landmark, t: f32) -> Landmark {
    Landmark::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t, a.z + (b.z - a.z) * t)
}

/// Exponential moving average of poses, per face index.
pub struct PoseSmoother {
    alpha: f32,
    last: HashMap<usize, FacePose>,
}

impl PoseSmoother {
    pub fn new(alpha: f32) -> Self {
        Self { alpha: alpha.clamp(0.0, 1.0), last: HashMap::new() }
    }

    pub fn filter(&mut self, face: usize, pose: FacePose) -> FacePose {
        let a = self.alpha;
        let smoothed = match self.last.get(&face) {
            Some(prev) if a < 1.0 => FacePose {
                position: prev.position + (pose.position - prev.position) * a,
                scale: prev.scale + (pose.scale - prev.scale) * a,
                rotation: prev.rotation.slerp(&pose.rotation, a),
                ..pose
            },
            _ => pose,
        };
        self.last.insert(face, smoothed.clone());
        smoothed
    }

    pub fn forget(&mut self, face: usize) {
        self.last.remove(&face);
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetKey, Calibration};
    use crate::mesh::Mesh;
    use crate::testing::{face_with, level_face, rolled_face, GLASSES_OBJ};
    use crate::types::FrameSize;

    fn square_camera() -> PerspectiveCamera {
        let mut cam = PerspectiveCamera::new(50.0, 0.01, 10.0, 0.6);
        cam.set_viewport(FrameSize::new(480, 480));
        cam
    }

    fn asset_with(cal: Calibration) -> OverlayAsset {
        OverlayAsset::from_mesh(AssetKey::from("test"), Mesh::from_obj(GLASSES_OBJ).unwrap(), cal)
    }

    fn assert_orthonormal(b: &Basis) {
        for v in [b.right, b.up, b.forward] {
            assert!((v.norm() - 1.0).abs() < 1e-5, "not unit: {v:?}");
        }
        assert!(b.right.dot(&b.up).abs() < 1e-5);
        assert!(b.right.dot(&b.forward).abs() < 1e-5);
        assert!(b.up.dot(&b.forward).abs() < 1e-5);
    }

    #[test]
    fn level_eyes_anchor_on_midline_with_zero_roll() {
        let cam = square_camera();
        let asset = asset_with(Calibration::default());
        let face = face_with(|p| match p {
            FacePoint::LeftEyeInner => Landmark::new(0.4, 0.5, 0.0),
            FacePoint::RightEyeInner => Landmark::new(0.6, 0.5, 0.0),
            FacePoint::LeftEyeOuter => Landmark::new(0.35, 0.5, 0.0),
            FacePoint::RightEyeOuter => Landmark::new(0.65, 0.5, 0.0),
            FacePoint::NoseBridge => Landmark::new(0.5, 0.52, 0.0),
            FacePoint::Forehead => Landmark::new(0.5, 0.3, 0.0),
            FacePoint::Chin => Landmark::new(0.5, 0.7, 0.0),
            FacePoint::LeftEar => Landmark::new(0.28, 0.51, 0.05),
            FacePoint::RightEar => Landmark::new(0.72, 0.51, 0.05),
        });

        let pose = PoseEstimator::new().estimate(&face, &asset, &cam).unwrap();
        assert!((pose.anchor.x - 0.5).abs() < 1e-6);
        assert!(pose.anchor.y > 0.5 && pose.anchor.y < 0.52, "anchor nudged toward nose");
        assert!(pose.position.x.abs() < 1e-6);
        assert!(pose.roll().abs() < 1e-5);
        assert!(pose.rotation.angle() < 1e-4);
    }

    #[test]
    fn basis_is_orthonormal_for_rolled_and_skewed_faces() {
        let cam = square_camera();
        let asset = asset_with(Calibration::default());
        for angle in [-0.6f32, -0.2, 0.0, 0.3, 0.7] {
            let pose = PoseEstimator::new()
                .estimate(&rolled_face(0.5, 0.5, 0.15, angle), &asset, &cam)
                .unwrap();
            assert_orthonormal(&pose.basis);
            // Image y points down, world y up.
            assert!((pose.roll() + angle).abs() < 1e-3, "roll {} vs {}", pose.roll(), -angle);
        }

        // Chin pulled sideways: up is not perpendicular to the eye line before re-orthogonalization.
        let skewed = face_with(|p| match p {
            FacePoint::Chin => Landmark::new(0.56, 0.7, 0.02),
            other => crate::testing::level_face(0.5, 0.5, 0.2).point(other).unwrap(),
        });
        let pose = PoseEstimator::new().estimate(&skewed, &asset, &cam).unwrap();
        assert_orthonormal(&pose.basis);
    }

    #[test]
    fn scale_equals_multiplier_at_reference_distance() {
        let cam = square_camera();
        let cal = Calibration::default();
        let (plane_w, _) = cam.plane_extent();
        let span = cal.reference_eye_distance / plane_w;
        let asset = asset_with(cal.clone());

        let pose = PoseEstimator::new().estimate(&level_face(0.5, 0.5, span), &asset, &cam).unwrap();
        assert!((pose.scale - cal.scale_multiplier).abs() < 1e-6);
    }

    #[test]
    fn scale_grows_with_eye_distance() {
        let cam = square_camera();
        let asset = asset_with(Calibration::default());
        let est = PoseEstimator::new();
        let scales: Vec<f32> = [0.05f32, 0.08, 0.1, 0.14, 0.2, 0.3]
            .iter()
            .map(|s| est.estimate(&level_face(0.5, 0.5, *s), &asset, &cam).unwrap().scale)
            .collect();
        assert!(scales.windows(2).all(|w| w[1] > w[0]), "{scales:?}");
    }

    #[test]
    fn rotation_offset_is_composed_on_top() {
        let cam = square_camera();
        let asset = asset_with(Calibration { rotation_offset_deg: [0.0, 0.0, 30.0], ..Calibration::default() });
        let pose = PoseEstimator::new().estimate(&level_face(0.5, 0.5, 0.2), &asset, &cam).unwrap();
        assert!(pose.roll().abs() < 1e-5);
        assert!((pose.rotation.angle() - 30f32.to_radians()).abs() < 1e-4);
    }

    #[test]
    fn coincident_eye_corners_yield_no_pose() {
        let cam = square_camera();
        let asset = asset_with(Calibration::default());
        let collapsed = face_with(|_| Landmark::new(0.5, 0.5, 0.0));
        assert!(PoseEstimator::new().estimate(&collapsed, &asset, &cam).is_none());

        let truncated = crate::landmarks::LandmarkSet::new(vec![Landmark::default(); 10], crate::landmarks::FACE_MESH_468);
        assert!(PoseEstimator::new().estimate(&truncated, &asset, &cam).is_none());
    }

    #[test]
    fn temples_follow_each_ear_independently() {
        let cam = square_camera();
        let asset = asset_with(Calibration::default());
        let base = level_face(0.5, 0.5, 0.2);
        let face = face_with(|p| match p {
            FacePoint::RightEar => Landmark::new(0.85, 0.52, 0.7),
            other => base.point(other).unwrap(),
        });
        let pose = PoseEstimator::new().estimate(&face, &asset, &cam).unwrap();
        assert_eq!(pose.parts.len(), 2);
        let left = pose.parts.iter().find(|p| p.part == PartKind::TempleLeft).unwrap();
        let right = pose.parts.iter().find(|p| p.part == PartKind::TempleRight).unwrap();
        assert!(right.length_scale > left.length_scale);
        for p in &pose.parts {
            assert!((TEMPLE_SCALE_RANGE.0..=TEMPLE_SCALE_RANGE.1).contains(&p.length_scale));
        }
    }

    #[test]
    fn smoothing_moves_part_way_toward_new_pose() {
        let cam = square_camera();
        let asset = asset_with(Calibration::default());
        let est = PoseEstimator::new();
        let a = est.estimate(&level_face(0.4, 0.5, 0.2), &asset, &cam).unwrap();
        let b = est.estimate(&level_face(0.6, 0.5, 0.2), &asset, &cam).unwrap();

        let mut smoother = PoseSmoother::new(0.5);
        smoother.filter(0, a.clone());
        let mid = smoother.filter(0, b.clone());
        assert!((mid.position.x - (a.position.x + b.position.x) / 2.0).abs() < 1e-6);

        let mut passthrough = PoseSmoother::new(1.0);
        passthrough.filter(0, a);
        assert_eq!(passthrough.filter(0, b.clone()).position, b.position);
    }
}
