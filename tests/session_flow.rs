use std::path::Path;

use image::{Rgb, RgbImage};
use rusty_frames::assets::{AssetCatalog, AssetKey, CatalogEntry};
use rusty_frames::config::AppConfig;
use rusty_frames::error::TryOnError;
use rusty_frames::pipeline::LandmarkDetector;
use rusty_frames::session::{DetectorFactory, TryOnSession};
use rusty_frames::source::{ModeState, SourceState};
use rusty_frames::testing::{level_face, wait_for, CameraEvent, FakeCameraProvider, ScriptedDetector, GLASSES_OBJ};

fn config_in(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    let mut entries = Vec::new();
    for (key, present) in [("round", true), ("square", true), ("lost", false)] {
        let path = dir.join(format!("{key}.obj"));
        if present {
            std::fs::write(&path, GLASSES_OBJ).unwrap();
        }
        entries.push(CatalogEntry { key: AssetKey::from(key), label: key.to_uppercase(), path });
    }
    config.catalog = AssetCatalog { entries };
    config.detection.interval_ms = 0;
    config.tracking.smoothing_alpha = 1.0;
    config.snapshot.directory = dir.join("shots");
    config
}

fn factory(detector: &ScriptedDetector) -> DetectorFactory {
    let detector = detector.clone();
    Box::new(move || Ok(Box::new(detector.clone()) as Box<dyn LandmarkDetector>))
}

fn tick_until(session: &mut TryOnSession, mut cond: impl FnMut(usize) -> bool) -> bool {
    wait_for(|| match session.tick() {
        Ok(Some(report)) => cond(report.visible),
        _ => false,
    })
}

#[test]
fn camera_session_places_glasses_and_exports_what_was_shown() {
    let dir = tempfile::tempdir().unwrap();
    let camera = FakeCameraProvider::new(64, 48);
    let detector = ScriptedDetector::new(vec![Ok(vec![level_face(0.5, 0.5, 0.2)])]);
    let mut session = TryOnSession::new(config_in(dir.path()), Box::new(camera.clone()), factory(&detector));

    // One of three catalog entries is missing: reported, but the rest work.
    let err = session.activate(Some(AssetKey::from("square"))).unwrap_err();
    assert!(matches!(err, TryOnError::AssetLoad { ref failures } if failures.len() == 1));
    assert_eq!(session.assets().len(), 2);
    assert!(session.overlay_blocked().is_none());
    assert_eq!(session.selected_asset(), Some(&AssetKey::from("square")));
    assert_eq!(session.source_state(), &SourceState::Live);

    assert!(tick_until(&mut session, |visible| visible == 1));
    let shown = session.frame().clone();
    assert_eq!(shown.dimensions(), (64, 48));
    assert_ne!(shown, RgbImage::from_pixel(64, 48, Rgb([90, 90, 90])), "overlay drawn over the grey frame");

    let path = session.snapshot().unwrap();
    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved, shown);

    drop(session);
    assert_eq!(camera.active_tracks(), 0);
    assert_eq!(camera.events(), vec![CameraEvent::Start, CameraEvent::Stop]);
}

#[test]
fn overlays_hide_once_faces_disappear() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(vec![Ok(vec![level_face(0.5, 0.5, 0.2)])]);
    let mut session = TryOnSession::new(config_in(dir.path()), Box::new(FakeCameraProvider::new(64, 48)), factory(&detector));
    let _ = session.activate(None);

    assert!(tick_until(&mut session, |visible| visible == 1));
    detector.push(Ok(vec![]));
    assert!(tick_until(&mut session, |visible| visible == 0));
    assert!(session.render_loop().scene().instances().all(|(_, i)| !i.visible));
}

#[test]
fn switching_to_an_image_stops_the_camera_and_detects_once() {
    let dir = tempfile::tempdir().unwrap();
    let camera = FakeCameraProvider::new(64, 48);
    let detector = ScriptedDetector::new(vec![]);
    let mut session = TryOnSession::new(config_in(dir.path()), Box::new(camera.clone()), factory(&detector));
    let _ = session.activate(None);
    assert_eq!(camera.active_tracks(), 1);

    // No tick has run yet, so no camera frame ever reached the detector.
    session.use_decoded_image(RgbImage::from_pixel(40, 40, Rgb([200, 180, 160]))).unwrap();
    assert_eq!(camera.active_tracks(), 0);
    assert_eq!(session.mode(), Some(ModeState::UsingUploadedImage));

    detector.push(Ok(vec![level_face(0.5, 0.5, 0.25)]));
    assert!(tick_until(&mut session, |visible| visible == 1));
    for _ in 0..20 {
        session.tick().unwrap();
    }
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(detector.calls(), 1);
    assert_eq!(session.frame().dimensions(), (40, 40));

    // Back and forth never leaves two streams open.
    session.use_camera().unwrap();
    session.toggle_mode().unwrap();
    session.use_camera().unwrap();
    assert_eq!(camera.active_tracks(), 1);
    let events = camera.events();
    assert!(events.windows(2).all(|w| w != [CameraEvent::Start, CameraEvent::Start].as_slice()));
}

#[test]
fn failed_detection_of_a_still_image_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(vec![
        Err(TryOnError::Detection("transient".to_string())),
        Ok(vec![level_face(0.5, 0.5, 0.25)]),
    ]);
    let mut session = TryOnSession::new(config_in(dir.path()), Box::new(FakeCameraProvider::new(64, 48)), factory(&detector));
    let _ = session.activate(None);

    session.use_decoded_image(RgbImage::from_pixel(40, 40, Rgb([200, 180, 160]))).unwrap();
    assert!(tick_until(&mut session, |visible| visible == 1));
    assert_eq!(detector.calls(), 2);

    // Detected once it succeeded; no further submissions.
    for _ in 0..20 {
        session.tick().unwrap();
    }
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(detector.calls(), 2);
}

#[test]
fn denied_camera_falls_back_to_image_mode() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(vec![]);
    let mut session = TryOnSession::new(config_in(dir.path()), Box::new(FakeCameraProvider::denying()), factory(&detector));
    let _ = session.activate(None);

    assert_eq!(session.mode(), Some(ModeState::UsingUploadedImage));
    assert!(matches!(session.source_state(), SourceState::Error(_)));
    assert!(session.notice().unwrap().contains("denied"));
    assert!(session.tick().unwrap().is_none());
    assert!(matches!(session.snapshot(), Err(TryOnError::FrameSize { .. })));
}

#[test]
fn model_failure_blocks_the_overlay_until_retry() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(vec![Ok(vec![level_face(0.5, 0.5, 0.2)])]);
    let mut attempts = 0;
    let ok = detector.clone();
    let factory: DetectorFactory = Box::new(move || {
        attempts += 1;
        if attempts == 1 {
            Err(TryOnError::ModelLoad { path: "models/face_mesh.onnx".into(), reason: "missing".to_string() })
        } else {
            Ok(Box::new(ok.clone()) as Box<dyn LandmarkDetector>)
        }
    });
    let mut config = config_in(dir.path());
    config.catalog.entries.retain(|e| e.path.exists());
    let mut session = TryOnSession::new(config, Box::new(FakeCameraProvider::new(64, 48)), factory);

    let err = session.activate(None).unwrap_err();
    assert!(err.is_blocking());
    assert!(session.overlay_blocked().is_some());
    // Frames still flow without a detector.
    assert!(session.tick().unwrap().is_some());

    session.retry().unwrap();
    assert!(session.overlay_blocked().is_none());
    assert!(tick_until(&mut session, |visible| visible == 1));
}

#[test]
fn clearing_the_selection_hides_every_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(vec![Ok(vec![level_face(0.3, 0.5, 0.15), level_face(0.7, 0.5, 0.15)])]);
    let mut session = TryOnSession::new(config_in(dir.path()), Box::new(FakeCameraProvider::new(96, 64)), factory(&detector));
    let _ = session.activate(None);

    assert!(tick_until(&mut session, |visible| visible == 2));
    assert!(session.select_asset(None));
    assert_eq!(session.tick().unwrap().unwrap().visible, 0);

    assert_eq!(session.cycle_asset(), Some(&AssetKey::from("round")));
    assert_eq!(session.cycle_asset(), Some(&AssetKey::from("square")));
    assert_eq!(session.cycle_asset(), Some(&AssetKey::from("round")));
    assert!(!session.select_index(2), "missing asset is not drawable");
}
