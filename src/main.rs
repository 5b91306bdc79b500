use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};

use anyhow::Result;
use clap::Parser;
use colored::*;
use image::RgbImage;
use minifb::Key;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod args;
mod font;
mod output;

use args::Args;
use output::WindowOutput;
use rusty_frames::assets::AssetKey;
use rusty_frames::camera::NokhwaProvider;
use rusty_frames::config::AppConfig;
use rusty_frames::error::TryOnError;
use rusty_frames::inference::OnnxLandmarkDetector;
use rusty_frames::pipeline::LandmarkDetector;
use rusty_frames::session::{DetectorFactory, TryOnSession};
use rusty_frames::source::{ModeState, SourceState};
use rusty_frames::types::parse_hex;

const PLACEHOLDER_SIZE: (u32, u32) = (640, 480);

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("rusty_frames={level}")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rusty_frames=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// A path typed (or dropped) into the terminal: trimmed, unquoted, with
/// shell-escaped spaces restored.
fn parse_path_line(line: &str) -> Option<PathBuf> {
    let trimmed = line.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| trimmed.strip_prefix(*q).and_then(|t| t.strip_suffix(*q)))
        .unwrap_or(trimmed);
    let path = unquoted.replace("\\ ", " ");
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Image paths entered on stdin, read on their own thread so the window never waits.
fn spawn_path_reader() -> Receiver<PathBuf> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if let Some(path) = parse_path_line(&line) {
                if tx.send(path).is_err() {
                    break;
                }
            }
        }
    });
    rx
}

fn list_cameras() -> Result<()> {
    let cameras = nokhwa::query(nokhwa::utils::ApiBackend::Auto)?;
    println!("Available Cameras:");
    println!("{:<5} | {:<30} | {:<10}", "Index", "Name", "Misc");
    println!("{}", "-".repeat(60));
    for cam in cameras {
        println!("{:<5} | {:<30} | {:?}", cam.index(), cam.human_name(), cam.misc());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    if args.list {
        return list_cameras();
    }

    // 0. Config (CLI flags win)
    let mut config = AppConfig::load(&args.config)?;
    if let Some(index) = args.cam_index {
        config.camera.index = index;
    }
    if args.no_mirror {
        config.camera.mirror = false;
    }
    if let Some(image) = &args.image {
        config.ui.initial_image = Some(image.clone());
    }
    let initial_asset = args.asset.clone().or_else(|| config.ui.initial_asset.clone()).map(AssetKey::new);

    println!("{}", "=== Rusty Frames ===".bold().cyan());
    for entry in &config.catalog.entries {
        println!("  {} {} ({})", "*".cyan(), entry.label, entry.key);
    }

    // 1. Session: detector, assets, frame source
    let models = config.models.clone();
    let detection = config.detection.clone();
    let factory: DetectorFactory = Box::new(move || {
        let detector = OnnxLandmarkDetector::new(&models, &detection)?;
        Ok(Box::new(detector) as Box<dyn LandmarkDetector>)
    });
    let camera = Box::new(NokhwaProvider::new(config.camera.index));
    let mut session = TryOnSession::new(config.clone(), camera, factory);

    if let Err(e) = session.activate(initial_asset) {
        println!("{} {}", "Overlay unavailable:".red().bold(), e);
        println!("{}", "Press R to retry.".yellow());
    }
    if let Some(name) = session.detector_name() {
        println!("Active detector: {}", name.green());
    }

    // 2. Window
    let (pw, ph) = session
        .source()
        .source()
        .map(|s| (s.width(), s.height()))
        .filter(|(w, h)| *w > 0 && *h > 0)
        .unwrap_or(PLACEHOLDER_SIZE);
    let mut window = WindowOutput::new(&config.ui.window_title, pw as usize, ph as usize)?;

    println!(
        "Controls: [C] Camera [U] Image [M] Switch mode [1-9] Pick frame [0] None [Tab] Next [S] Snapshot [R] Retry [Esc] Quit"
    );
    println!("{}", "Type or drop an image path here and press Enter to try frames on it.".yellow());

    let mut status: Option<(String, bool)> = None;
    let mut image_path = config.ui.initial_image.clone();
    let paths = spawn_path_reader();

    // 3. Loop
    while window.is_open() {
        while let Ok(path) = paths.try_recv() {
            println!("Loading image {}", path.display());
            report(&mut status, session.use_image(&path));
            image_path = Some(path);
        }

        for key in window.keys_pressed() {
            match key {
                Key::Escape => return Ok(()),
                Key::C => report(&mut status, session.use_camera()),
                Key::U => {
                    let result = match &image_path {
                        Some(path) => session.use_image(path),
                        None => Err(TryOnError::Config("no image yet; type its path in the terminal".to_string())),
                    };
                    report(&mut status, result);
                }
                Key::M => report(&mut status, session.toggle_mode()),
                Key::Tab => {
                    session.cycle_asset();
                    status = None;
                }
                Key::Key0 => {
                    session.select_asset(None);
                }
                Key::S => match session.snapshot() {
                    Ok(path) => {
                        println!("{} {}", "Snapshot saved:".green(), path.display());
                        status = Some((format!("saved {}", path.display()), false));
                    }
                    Err(TryOnError::FrameSize { .. }) => status = Some(("no frame yet".to_string(), true)),
                    Err(e) => {
                        warn!("Snapshot failed: {e}");
                        status = Some((e.to_string(), true));
                    }
                },
                Key::R => {
                    let result = session.retry();
                    if result.is_ok() {
                        println!("{}", "Retry succeeded.".green());
                    }
                    report(&mut status, result);
                }
                other => {
                    if let Some(n) = digit(other) {
                        if !session.select_index(n - 1) {
                            status = Some((format!("frame {n} not available"), true));
                        }
                    }
                }
            }
        }

        match session.tick() {
            Ok(_) => {}
            // Zero-sized frames and capture hiccups skip this tick only.
            Err(e) => debug!("tick skipped: {e}"),
        }

        let mut frame = if session.frame().width() > 0 {
            session.frame().clone()
        } else {
            RgbImage::new(PLACEHOLDER_SIZE.0, PLACEHOLDER_SIZE.1)
        };
        draw_status(&mut frame, &session, status.as_ref(), &config);
        window.update(&frame)?;
    }

    Ok(())
}

fn report(status: &mut Option<(String, bool)>, result: rusty_frames::error::Result<()>) {
    *status = match result {
        Ok(()) => None,
        Err(e) => {
            warn!("{e}");
            Some((e.to_string(), true))
        }
    };
}

fn digit(key: Key) -> Option<usize> {
    Some(match key {
        Key::Key1 => 1,
        Key::Key2 => 2,
        Key::Key3 => 3,
        Key::Key4 => 4,
        Key::Key5 => 5,
        Key::Key6 => 6,
        Key::Key7 => 7,
        Key::Key8 => 8,
        Key::Key9 => 9,
        _ => return None,
    })
}

fn draw_status(frame: &mut RgbImage, session: &TryOnSession, status: Option<&(String, bool)>, config: &AppConfig) {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let scale = config.ui.status_scale.max(1);
    let normal = parse_hex(&config.ui.status_color_hex);
    let error = parse_hex(&config.ui.error_color_hex);

    let described = || session.source().source().map(|s| s.describe()).unwrap_or_default();
    let source = match (session.mode(), session.source_state()) {
        (_, SourceState::Live) => format!("CAMERA {}", described()),
        (_, SourceState::ImageReady) => format!("IMAGE {}", described()),
        (_, SourceState::AcquiringCamera) => "STARTING CAMERA".to_string(),
        (Some(ModeState::UsingUploadedImage), _) => "WAITING FOR IMAGE PATH".to_string(),
        _ => "NO SOURCE".to_string(),
    };
    let asset = session.selected_label().unwrap_or("NO FRAME");
    let faces = session.detections().faces.len();
    let mut lines = vec![(format!("{source} | {asset} | FACES: {faces}"), normal)];

    if let Some(reason) = session.overlay_blocked() {
        lines.push((format!("OVERLAY OFF: {reason} - R TO RETRY"), error));
    }
    if let Some(notice) = session.notice() {
        lines.push((notice.to_string(), error));
    }
    if let Some((msg, is_err)) = status {
        lines.push((msg.clone(), if *is_err { error } else { normal }));
    }

    let mut y = 10;
    for (text, color) in lines {
        // Darken a strip behind the text so it stays readable on bright frames.
        let strip_w = (font::measure_text_width(&text, scale) + 8).min(w.saturating_sub(6));
        for py in y.saturating_sub(2)..(y + font::line_height(scale)).min(h) {
            for px in 6..6 + strip_w {
                let p = frame.get_pixel_mut(px as u32, py as u32);
                p.0 = p.0.map(|c| c / 3);
            }
        }
        font::draw_text_line(&mut **frame, w, h, 10, y, &text, color, scale);
        y += font::line_height(scale);
    }
}
