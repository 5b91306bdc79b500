//! Landmark sets and the semantic points pose estimation reads from them.
//!
//! "Left" and "right" always mean image-space sides of the unmirrored source
//! frame, not the subject's anatomical sides.

use crate::types::Landmark;

/// Landmarks with fixed semantic meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacePoint {
    LeftEyeOuter,
    LeftEyeInner,
    RightEyeInner,
    RightEyeOuter,
    NoseBridge,
    Forehead,
    Chin,
    LeftEar,
    RightEar,
}

impl FacePoint {
    pub const ALL: [FacePoint; 9] = [
        FacePoint::LeftEyeOuter,
        FacePoint::LeftEyeInner,
        FacePoint::RightEyeInner,
        FacePoint::RightEyeOuter,
        FacePoint::NoseBridge,
        FacePoint::Forehead,
        FacePoint::Chin,
        FacePoint::LeftEar,
        FacePoint::RightEar,
    ];
}

/// Index layout of a landmark model's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandmarkTopology {
    pub len: usize,
    pub left_eye_outer: usize,
    pub left_eye_inner: usize,
    pub right_eye_inner: usize,
    pub right_eye_outer: usize,
    pub nose_bridge: usize,
    pub forehead: usize,
    pub chin: usize,
    pub left_ear: usize,
    pub right_ear: usize,
}

/// 468-point face mesh layout.
pub const FACE_MESH_468: LandmarkTopology = LandmarkTopology {
    len: 468,
    left_eye_outer: 33,
    left_eye_inner: 133,
    right_eye_inner: 362,
    right_eye_outer: 263,
    nose_bridge: 168,
    forehead: 10,
    chin: 152,
    left_ear: 234,
    right_ear: 454,
};

impl LandmarkTopology {
    pub fn index(&self, point: FacePoint) -> usize {
        match point {
            FacePoint::LeftEyeOuter => self.left_eye_outer,
            FacePoint::LeftEyeInner => self.left_eye_inner,
            FacePoint::RightEyeInner => self.right_eye_inner,
            FacePoint::RightEyeOuter => self.right_eye_outer,
            FacePoint::NoseBridge => self.nose_bridge,
            FacePoint::Forehead => self.forehead,
            FacePoint::Chin => self.chin,
            FacePoint::LeftEar => self.left_ear,
            FacePoint::RightEar => self.right_ear,
        }
    }
}

/// Landmarks of one face from one detection cycle. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
    topology: LandmarkTopology,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>, topology: LandmarkTopology) -> Self {
        Self { points, topology }
    }

    /// `None` when the model produced fewer points than the topology expects.
    pub fn point(&self, which: FacePoint) -> Option<Landmark> {
        self.points.get(self.topology.index(which)).copied()
    }
}
