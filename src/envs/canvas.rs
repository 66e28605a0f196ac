//! Tiny software rasterizer for headless rendering.
//!
//! Pixel rows are stored bottom-to-top, the order an OpenGL viewport read-back
//! produces; the pool flips them when it ships an image to the controller.

use crate::env::Frame;

pub type Rgb = [u8; 3];

pub const BACKGROUND: Rgb = [245, 245, 240];
pub const WALL: Rgb = [60, 60, 60];
pub const APPLE: Rgb = [40, 170, 60];
pub const BOMB: Rgb = [200, 40, 40];
pub const BODY: Rgb = [40, 80, 200];
pub const TARGET: Rgb = [230, 160, 20];

/// Maps world coordinates onto the pixel grid.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

pub struct Canvas {
    width: usize,
    height: usize,
    view: Viewport,
    data: Vec<u8>,
}

impl Canvas {
    pub fn new(width: usize, height: usize, view: Viewport) -> Self {
        let mut data = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            data.extend_from_slice(&BACKGROUND);
        }
        Self {
            width,
            height,
            view,
            data,
        }
    }

    /// World point to pixel (column, row-from-bottom).
    pub fn to_pixel(&self, x: f64, y: f64) -> (i64, i64) {
        let v = &self.view;
        let px = (x - v.x_min) / (v.x_max - v.x_min) * self.width as f64;
        let py = (y - v.y_min) / (v.y_max - v.y_min) * self.height as f64;
        (px.floor() as i64, py.floor() as i64)
    }

    fn scale(&self) -> f64 {
        self.width as f64 / (self.view.x_max - self.view.x_min)
    }

    pub fn put(&mut self, px: i64, py: i64, color: Rgb) {
        if px < 0 || py < 0 || px >= self.width as i64 || py >= self.height as i64 {
            return;
        }
        let i = (py as usize * self.width + px as usize) * 3;
        self.data[i..i + 3].copy_from_slice(&color);
    }

    pub fn pixel(&self, px: usize, py: usize) -> Option<Rgb> {
        if px >= self.width || py >= self.height {
            return None;
        }
        let i = (py * self.width + px) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    /// Filled disc with a world-space radius.
    pub fn disc(&mut self, x: f64, y: f64, radius: f64, color: Rgb) {
        let (cx, cy) = self.to_pixel(x, y);
        let r = (radius * self.scale()).max(1.0);
        let ri = r.ceil() as i64;
        for dy in -ri..=ri {
            for dx in -ri..=ri {
                if ((dx * dx + dy * dy) as f64) <= r * r {
                    self.put(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// One-pixel line between two world points.
    pub fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Rgb) {
        let (x0, y0) = self.to_pixel(from.0, from.1);
        let (x1, y1) = self.to_pixel(to.0, to.1);
        let steps = (x1 - x0).abs().max((y1 - y0).abs()).max(1);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let px = x0 as f64 + (x1 - x0) as f64 * t;
            let py = y0 as f64 + (y1 - y0) as f64 * t;
            self.put(px.round() as i64, py.round() as i64, color);
        }
    }

    /// Axis-aligned rectangle outline in world space.
    pub fn outline(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgb) {
        self.line((x0, y0), (x1, y0), color);
        self.line((x1, y0), (x1, y1), color);
        self.line((x1, y1), (x0, y1), color);
        self.line((x0, y1), (x0, y0), color);
    }

    pub fn into_frame(self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            data: self.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_view() -> Viewport {
        Viewport {
            x_min: -1.0,
            x_max: 1.0,
            y_min: -1.0,
            y_max: 1.0,
        }
    }

    #[test]
    fn row_zero_is_the_bottom_of_the_world() {
        let mut c = Canvas::new(8, 8, unit_view());
        c.disc(-0.9, -0.9, 0.01, BOMB);
        assert_eq!(c.pixel(0, 0), Some(BOMB));
        assert_eq!(c.pixel(0, 7), Some(BACKGROUND));
        let frame = c.into_frame();
        assert_eq!(frame.data.len(), 8 * 8 * 3);
        assert_eq!(&frame.data[..3], &BOMB);
    }

    #[test]
    fn drawing_off_canvas_is_clipped() {
        let mut c = Canvas::new(4, 4, unit_view());
        c.disc(5.0, 5.0, 0.5, APPLE);
        c.line((-3.0, 0.0), (3.0, 0.0), WALL);
        assert_eq!(c.pixel(0, 2), Some(WALL));
        assert!(c.pixel(4, 0).is_none());
    }
}
