//! Flatten the visible composite into a still and write it to disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::{ImageFormat, RgbImage};
use tracing::info;

use crate::error::{Result, TryOnError};
use crate::render::RenderSurfaces;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            other => Err(TryOnError::Config(format!("unknown snapshot format '{other}'"))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
        }
    }
}

pub struct Snapshot;

impl Snapshot {
    /// Base then overlay, mirrored exactly like the live view. Fails with
    /// [`TryOnError::FrameSize`] before the first frame has been rendered.
    pub fn capture(surfaces: &RenderSurfaces) -> Result<RgbImage> {
        let size = surfaces.size();
        if !surfaces.is_sized() || surfaces.overlay().dimensions() != (size.width, size.height) {
            return Err(TryOnError::FrameSize { width: size.width, height: size.height });
        }
        Ok(surfaces.composite())
    }

    /// Write `image` as `tryon_<unix-millis>.<ext>` under `dir`.
    pub fn export(image: &RgbImage, dir: &Path, format: ExportFormat) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let mut path = dir.join(format!("tryon_{millis}.{}", format.extension()));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("tryon_{millis}_{n}.{}", format.extension()));
            n += 1;
        }

        image
            .save_with_format(&path, format.image_format())
            .map_err(|e| TryOnError::Export(format!("{}: {e}", path.display())))?;
        info!("Snapshot saved to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn unsized_surfaces_cannot_be_captured() {
        let err = Snapshot::capture(&RenderSurfaces::new()).unwrap_err();
        assert!(matches!(err, TryOnError::FrameSize { width: 0, height: 0 }));
    }

    #[test]
    fn capture_matches_base_size_and_mirroring() {
        let mut frame = RgbImage::new(12, 6);
        frame.put_pixel(0, 3, Rgb([250, 0, 0]));
        let mut surfaces = RenderSurfaces::new();
        surfaces.set_base(&frame, true);
        surfaces.clear_overlay();

        let shot = Snapshot::capture(&surfaces).unwrap();
        assert_eq!(shot.dimensions(), (12, 6));
        assert_eq!(shot.get_pixel(11, 3), &Rgb([250, 0, 0]));
        assert_eq!(shot, surfaces.composite());
    }

    #[test]
    fn export_writes_decodable_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let img = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));

        let png = Snapshot::export(&img, &out, ExportFormat::Png).unwrap();
        let jpg = Snapshot::export(&img, &out, ExportFormat::from_name("JPEG").unwrap()).unwrap();
        assert_eq!(png.extension().unwrap(), "png");
        assert_eq!(jpg.extension().unwrap(), "jpg");
        assert!(png.file_name().unwrap().to_string_lossy().starts_with("tryon_"));

        let back = image::open(&png).unwrap().to_rgb8();
        assert_eq!(back, img);
        assert!(image::open(&jpg).is_ok());
    }

    #[test]
    fn unknown_format_is_a_config_error() {
        assert!(matches!(ExportFormat::from_name("gif"), Err(TryOnError::Config(_))));
    }
}
