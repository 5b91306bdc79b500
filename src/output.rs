use anyhow::Result;
use image::RgbImage;
use minifb::{Key, KeyRepeat};

/// The preview window. Any frame size is accepted; minifb scales it to the window.
pub struct WindowOutput {
    window: minifb::Window,
    buffer: Vec<u32>,
}

impl WindowOutput {
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let mut window = minifb::Window::new(
            title,
            width,
            height,
            minifb::WindowOptions {
                resize: true,
                ..minifb::WindowOptions::default()
            },
        )
        .map_err(|e| anyhow::anyhow!("Failed to create window: {}", e))?;

        window.limit_update_rate(Some(std::time::Duration::from_micros(16600))); // ~60 FPS

        Ok(Self {
            window,
            buffer: vec![0; width * height],
        })
    }

    pub fn is_open(&self) -> bool {
        self.window.is_open()
    }

    pub fn keys_pressed(&self) -> Vec<Key> {
        self.window.get_keys_pressed(KeyRepeat::No)
    }

    pub fn update(&mut self, frame: &RgbImage) -> Result<()> {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        if self.buffer.len() != w * h {
            self.buffer.resize(w * h, 0);
        }

        // RGB8 -> 0RGB u32
        for (dst, p) in self.buffer.iter_mut().zip(frame.pixels()) {
            *dst = ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32;
        }

        self.window
            .update_with_buffer(&self.buffer, w, h)
            .map_err(|e| anyhow::anyhow!("Window update failed: {}", e))
    }
}
