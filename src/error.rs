use std::path::PathBuf;

use thiserror::Error;

use crate::assets::AssetKey;

/// One catalog entry that failed to load.
#[derive(Debug, Clone)]
pub struct AssetFailure {
    pub key: AssetKey,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum TryOnError {
    #[error("camera permission denied: {0}")]
    Permission(String),

    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("failed to load detector model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("{} overlay asset(s) failed to load: {}", failures.len(), summarize(failures))]
    AssetLoad { failures: Vec<AssetFailure> },

    #[error("landmark detection failed: {0}")]
    Detection(String),

    #[error("frame has no usable size ({width}x{height})")]
    FrameSize { width: u32, height: u32 },

    #[error("could not decode image {path}: {reason}")]
    ImageDecode { path: PathBuf, reason: String },

    #[error("snapshot export failed: {0}")]
    Export(String),

    #[error("mesh parse error at line {line}: {reason}")]
    Mesh { line: usize, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TryOnError {
    /// Errors that block the overlay feature until a retry succeeds.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::ModelLoad { .. } | Self::AssetLoad { .. })
    }
}

fn summarize(failures: &[AssetFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.key, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, TryOnError>;
