//! Face-tracked eyewear try-on.
//!
//! Frames come from a camera or a still image, a background worker turns them
//! into face landmarks, and the render loop places a calibrated 3D frame mesh
//! on every tracked face and composites it over the picture.

pub mod assets;
pub mod camera;
pub mod camera_model;
pub mod config;
pub mod detector;
pub mod error;
pub mod inference;
pub mod landmarks;
pub mod mesh;
pub mod pipeline;
pub mod pose;
pub mod render;
pub mod render_loop;
pub mod scene;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod tracking;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod testing;
