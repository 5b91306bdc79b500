//! Software render engine: base and overlay surfaces kept at one size, a
//! z-buffered flat-shaded triangle rasterizer, and the final composite.

use image::{imageops, Rgb, RgbImage, Rgba, RgbaImage};
use nalgebra::Point3;
use tracing::debug;

use crate::assets::OverlayAsset;
use crate::pose::FacePose;
use crate::scene::Scene;
use crate::types::FrameSize;

/// Base frame, transparent overlay and depth buffer. All three always share
/// one size; [`RenderSurfaces::resync`] is the only way to change it.
#[derive(Debug, Default)]
pub struct RenderSurfaces {
    base: RgbImage,
    overlay: RgbaImage,
    depth: Vec<f32>,
    mirrored: bool,
}

impl RenderSurfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.base.width(), self.base.height())
    }

    /// False until the first frame has been drawn.
    pub fn is_sized(&self) -> bool {
        !self.size().is_empty()
    }

    pub fn overlay(&self) -> &RgbaImage {
        &self.overlay
    }

    /// Reallocate every surface for `size`. Returns false if already that size.
    pub fn resync(&mut self, size: FrameSize) -> bool {
        if size == self.size() && self.overlay.dimensions() == (size.width, size.height) {
            return false;
        }
        debug!(width = size.width, height = size.height, "render surfaces resized");
        self.base = RgbImage::new(size.width, size.height);
        self.overlay = RgbaImage::new(size.width, size.height);
        self.depth = vec![f32::INFINITY; size.pixel_count()];
        true
    }

    /// Copy the source frame in, unmirrored; mirroring happens at composite time.
    pub fn set_base(&mut self, frame: &RgbImage, mirrored: bool) {
        self.resync(FrameSize::new(frame.width(), frame.height()));
        self.base.copy_from_slice(frame.as_raw());
        self.mirrored = mirrored;
    }

    pub fn clear_overlay(&mut self) {
        for p in self.overlay.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
        self.depth.fill(f32::INFINITY);
    }

    /// Base then overlay (alpha over), with the live view's mirroring applied
    /// to both.
    pub fn composite(&self) -> RgbImage {
        let mut out = self.base.clone();
        for (dst, src) in out.pixels_mut().zip(self.overlay.pixels()) {
            *dst = blend(*dst, *src);
        }
        if self.mirrored {
            imageops::flip_horizontal_in_place(&mut out);
        }
        out
    }

    /// Rasterize one placed asset into the overlay. Returns the number of
    /// triangles that produced at least one fragment.
    pub fn draw_instance(&mut self, scene: &Scene, asset: &OverlayAsset, pose: &FacePose) -> usize {
        let size = self.size();
        if size.is_empty() {
            return 0;
        }
        let (w, h) = (size.width as f32, size.height as f32);
        let cam = &scene.camera;

        let world: Vec<Point3<f32>> = asset
            .mesh
            .vertices
            .iter()
            .zip(&asset.mesh.vertex_parts)
            .map(|(v, part)| pose.transform_vertex(v, *part))
            .collect();
        let screen: Vec<Option<[f32; 3]>> = world
            .iter()
            .map(|p| {
                // Behind or too close to the eye.
                if p.z > -cam.near {
                    return None;
                }
                let ndc = cam.project(p);
                Some([ndc.x * w, ndc.y * h, ndc.z])
            })
            .collect();

        let [cr, cg, cb] = asset.calibration.material.rgb();
        let alpha = (asset.calibration.material.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;

        let mut drawn = 0;
        for tri in &asset.mesh.triangles {
            let [ia, ib, ic] = tri.map(|i| i as usize);
            let (Some(a), Some(b), Some(c)) = (screen[ia], screen[ib], screen[ic]) else {
                continue;
            };
            let Some(normal) = (world[ib] - world[ia]).cross(&(world[ic] - world[ia])).try_normalize(1e-12) else {
                continue;
            };
            let shade = (scene.ambient.intensity + scene.directional.lambert(&normal)).min(1.0);
            let color = Rgba([
                (cr as f32 * shade) as u8,
                (cg as f32 * shade) as u8,
                (cb as f32 * shade) as u8,
                alpha,
            ]);
            if self.fill_triangle(a, b, c, color) {
                drawn += 1;
            }
        }
        drawn
    }

    fn fill_triangle(&mut self, a: [f32; 3], b: [f32; 3], c: [f32; 3], color: Rgba<u8>) -> bool {
        let area = edge(a, b, c[0], c[1]);
        if area.abs() < 1e-9 {
            return false;
        }
        let (width, height) = self.overlay.dimensions();
        let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0) as u32;
        let min_y = a[1].min(b[1]).min(c[1]).floor().max(0.0) as u32;
        let max_x = a[0].max(b[0]).max(c[0]).ceil().min(width as f32 - 1.0);
        let max_y = a[1].max(b[1]).max(c[1]).ceil().min(height as f32 - 1.0);
        if max_x < 0.0 || max_y < 0.0 {
            return false;
        }

        let mut any = false;
        for y in min_y..=max_y as u32 {
            for x in min_x..=max_x as u32 {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(b, c, px, py) / area;
                let w1 = edge(c, a, px, py) / area;
                let w2 = edge(a, b, px, py) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * a[2] + w1 * b[2] + w2 * c[2];
                let idx = y as usize * width as usize + x as usize;
                if z < self.depth[idx] {
                    self.depth[idx] = z;
                    self.overlay.put_pixel(x, y, color);
                    any = true;
                }
            }
        }
        any
    }
}

fn edge(a: [f32; 3], b: [f32; 3], px: f32, py: f32) -> f32 {
    (b[0] - a[0]) * (py - a[1]) - (b[1] - a[1]) * (px - a[0])
}

fn blend(dst: Rgb<u8>, src: Rgba<u8>) -> Rgb<u8> {
    let a = src[3] as f32 / 255.0;
    let mix = |d: u8, s: u8| (d as f32 * (1.0 - a) + s as f32 * a).round() as u8;
    Rgb([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2])])
}
