//! Fakes and fixtures shared by unit and integration tests.
//!
//! Nothing here touches a real camera or model file.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use crate::camera::{CameraProvider, CameraStream};
use crate::error::{Result, TryOnError};
use crate::landmarks::{FacePoint, LandmarkSet, FACE_MESH_468};
use crate::pipeline::LandmarkDetector;
use crate::types::Landmark;

/// Small eyewear model: a front plate with two rims and two temple arms.
/// Inner eye span is one model unit.
pub const GLASSES_OBJ: &str = "\
o front
v -1.6 -0.4 0.0
v 1.6 -0.4 0.0
v 1.6 0.4 0.0
v -1.6 0.4 0.0
v -1.6 -0.4 0.1
v 1.6 -0.4 0.1
v 1.6 0.4 0.1
v -1.6 0.4 0.1
f 1 2 3 4
f 5 6 7 8
f 1 2 6 5
f 4 3 7 8
o temple_left
v -1.6 0.3 0.0
v -1.6 0.2 0.0
v -1.6 0.2 -3.0
v -1.6 0.3 -3.0
f 9 10 11 12
o temple_right
v 1.6 0.3 0.0
v 1.6 0.2 0.0
v 1.6 0.2 -3.0
v 1.6 0.3 -3.0
f 13 14 15 16
";

/// A frontal face with level eyes. `span` is the normalized distance
/// between the inner eye corners; the face is centered on `(cx, cy)`.
pub fn level_face(cx: f32, cy: f32, span: f32) -> LandmarkSet {
    face_with(|p| semantic_position(p, cx, cy, span))
}

/// Like [`level_face`] but rolled by `angle` radians about the face center.
/// Only rigid for square frames.
pub fn rolled_face(cx: f32, cy: f32, span: f32, angle: f32) -> LandmarkSet {
    let (s, c) = angle.sin_cos();
    face_with(|p| {
        let l = semantic_position(p, cx, cy, span);
        let (dx, dy) = (l.x - cx, l.y - cy);
        Landmark::new(cx + dx * c - dy * s, cy + dx * s + dy * c, l.z)
    })
}

/// A face with only the given semantic points set; everything else sits at the origin.
pub fn face_with(mut place: impl FnMut(FacePoint) -> Landmark) -> LandmarkSet {
    let mut points = vec![Landmark::default(); FACE_MESH_468.len];
    for p in FacePoint::ALL {
        points[FACE_MESH_468.index(p)] = place(p);
    }
    LandmarkSet::new(points, FACE_MESH_468)
}

fn semantic_position(p: FacePoint, cx: f32, cy: f32, span: f32) -> Landmark {
    let half = span / 2.0;
    match p {
        FacePoint::LeftEyeInner => Landmark::new(cx - half, cy, 0.0),
        FacePoint::RightEyeInner => Landmark::new(cx + half, cy, 0.0),
        FacePoint::LeftEyeOuter => Landmark::new(cx - 0.75 * span, cy, 0.0),
        FacePoint::RightEyeOuter => Landmark::new(cx + 0.75 * span, cy, 0.0),
        FacePoint::NoseBridge => Landmark::new(cx, cy + 0.05 * span, -0.01),
        FacePoint::Forehead => Landmark::new(cx, cy - span, 0.0),
        FacePoint::Chin => Landmark::new(cx, cy + span, 0.0),
        FacePoint::LeftEar => Landmark::new(cx - 1.2 * span, cy + 0.1 * span, 2.5 * span),
        FacePoint::RightEar => Landmark::new(cx + 1.2 * span, cy + 0.1 * span, 2.5 * span),
    }
}

/// Poll `cond` for up to two seconds.
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Detector that replays a fixed script, then fails every call.
#[derive(Clone)]
pub struct ScriptedDetector {
    script: Arc<Mutex<VecDeque<Result<Vec<LandmarkSet>>>>>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Result<Vec<LandmarkSet>>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Append a result, e.g. from the test thread while the worker runs.
    pub fn push(&self, result: Result<Vec<LandmarkSet>>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl LandmarkDetector for ScriptedDetector {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<LandmarkSet>> {
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TryOnError::Detection("script exhausted".to_string())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraEvent {
    Start,
    Stop,
}

#[derive(Debug, Default)]
pub struct CameraLog {
    pub events: Vec<CameraEvent>,
    pub active_tracks: usize,
}

/// Camera that records every start/stop and serves a solid grey frame.
#[derive(Clone)]
pub struct FakeCameraProvider {
    pub log: Arc<Mutex<CameraLog>>,
    width: u32,
    height: u32,
    deny: bool,
}

impl FakeCameraProvider {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            log: Arc::new(Mutex::new(CameraLog::default())),
            width,
            height,
            deny: false,
        }
    }

    pub fn denying() -> Self {
        Self { deny: true, ..Self::new(64, 48) }
    }

    pub fn active_tracks(&self) -> usize {
        self.log.lock().unwrap().active_tracks
    }

    pub fn events(&self) -> Vec<CameraEvent> {
        self.log.lock().unwrap().events.clone()
    }
}

impl CameraProvider for FakeCameraProvider {
    fn open(&mut self) -> Result<Box<dyn CameraStream>> {
        if self.deny {
            return Err(TryOnError::Permission("user denied camera access".to_string()));
        }
        let mut log = self.log.lock().unwrap();
        log.events.push(CameraEvent::Start);
        log.active_tracks += 1;
        Ok(Box::new(FakeStream {
            log: self.log.clone(),
            width: self.width,
            height: self.height,
            active: true,
        }))
    }
}

struct FakeStream {
    log: Arc<Mutex<CameraLog>>,
    width: u32,
    height: u32,
    active: bool,
}

impl CameraStream for FakeStream {
    fn name(&self) -> String {
        "fake camera".to_string()
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&mut self) -> Result<RgbImage> {
        if !self.active {
            return Err(TryOnError::CameraUnavailable("stream stopped".to_string()));
        }
        Ok(RgbImage::from_pixel(self.width, self.height, Rgb([90, 90, 90])))
    }

    fn stop(&mut self) {
        if self.active {
            let mut log = self.log.lock().unwrap();
            log.events.push(CameraEvent::Stop);
            log.active_tracks -= 1;
            self.active = false;
        }
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.stop();
    }
}
