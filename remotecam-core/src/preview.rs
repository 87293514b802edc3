//! Local preview rendering
//!
//! Draws decoded frames onto a caller-owned presentation surface, rotated
//! upright for the current display and scaled to fit.

use image::imageops::{self, FilterType};
use image::RgbImage;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Rotation;
use crate::encode::fit_centered;
use crate::error::Result;

/// A fixed-size surface the preview is drawn on
pub trait PresentationSurface: Send + Sync {
    /// False once the surface has been torn down by its owner
    fn is_valid(&self) -> bool;

    /// Surface size in pixels
    fn size(&self) -> (u32, u32);

    /// Replace the surface contents with `canvas` (same size as the surface)
    fn present(&self, canvas: RgbImage);
}

/// Shared handle to a preview surface
pub type PreviewTarget = Arc<dyn PresentationSurface>;

/// Whether two optional targets are the same surface
pub fn same_target(a: Option<&PreviewTarget>, b: Option<&PreviewTarget>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Clockwise rotation that makes the sensor image upright on the display
pub fn preview_rotation(sensor_orientation: u32, display_rotation: Rotation) -> u32 {
    (sensor_orientation % 360 + 360 - display_rotation.degrees()) % 360
}

/// Render `frame` onto `surface`
///
/// Returns whether anything was presented. An absent or invalid surface or
/// an empty frame is a no-op.
pub fn render(
    frame: &RgbImage,
    surface: Option<&dyn PresentationSurface>,
    sensor_orientation: u32,
    display_rotation: Rotation,
) -> bool {
    let Some(surface) = surface else {
        return false;
    };
    if !surface.is_valid() || frame.width() == 0 || frame.height() == 0 {
        return false;
    }

    let rotated: Cow<'_, RgbImage> = match preview_rotation(sensor_orientation, display_rotation) {
        90 => Cow::Owned(imageops::rotate90(frame)),
        180 => Cow::Owned(imageops::rotate180(frame)),
        270 => Cow::Owned(imageops::rotate270(frame)),
        _ => Cow::Borrowed(frame),
    };

    let (surface_w, surface_h) = surface.size();
    let Some(fit) = fit_centered(rotated.dimensions(), (surface_w, surface_h)) else {
        return false;
    };

    // black background
    let mut canvas = RgbImage::new(surface_w, surface_h);
    let scaled = imageops::resize(rotated.as_ref(), fit.width, fit.height, FilterType::Triangle);
    imageops::replace(&mut canvas, &scaled, fit.x as i64, fit.y as i64);

    surface.present(canvas);
    true
}

/// In-memory surface keeping the last presented canvas
pub struct ImageSurface {
    width: u32,
    height: u32,
    valid: AtomicBool,
    frames: AtomicU64,
    latest: Mutex<Option<RgbImage>>,
}

impl ImageSurface {
    /// Create a surface of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            valid: AtomicBool::new(true),
            frames: AtomicU64::new(0),
            latest: Mutex::new(None),
        }
    }

    /// Mark the surface as torn down
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Number of canvases presented so far
    pub fn frames_presented(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Copy of the last presented canvas
    pub fn snapshot(&self) -> Option<RgbImage> {
        self.latest.lock().clone()
    }

    /// Write the last presented canvas as PNG; false if nothing was presented
    pub fn save_png(&self, path: &Path) -> Result<bool> {
        let Some(canvas) = self.snapshot() else {
            return Ok(false);
        };
        canvas.save_with_format(path, image::ImageFormat::Png)?;
        Ok(true)
    }
}

impl PresentationSurface for ImageSurface {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&self, canvas: RgbImage) {
        *self.latest.lock() = Some(canvas);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Bounding box of non-black pixels
    fn content_box(canvas: &RgbImage) -> (u32, u32) {
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
        for (x, y, px) in canvas.enumerate_pixels() {
            if px.0 != [0, 0, 0] {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
        (max_x - min_x + 1, max_y - min_y + 1)
    }

    fn white(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))
    }

    #[test]
    fn test_preview_rotation() {
        assert_eq!(preview_rotation(90, Rotation::Deg0), 90);
        assert_eq!(preview_rotation(90, Rotation::Deg90), 0);
        assert_eq!(preview_rotation(0, Rotation::Deg90), 270);
        assert_eq!(preview_rotation(270, Rotation::Deg180), 90);
    }

    #[test]
    fn test_aspect_preserved_without_quarter_turn() {
        for (sensor, display) in [(0, Rotation::Deg0), (180, Rotation::Deg0), (90, Rotation::Deg90)] {
            let surface = ImageSurface::new(400, 400);
            assert!(render(&white(320, 160), Some(&surface), sensor, display));
            let (w, h) = content_box(&surface.snapshot().unwrap());
            assert_eq!((w, h), (400, 200));
        }
    }

    #[test]
    fn test_aspect_inverted_with_quarter_turn() {
        for (sensor, display) in [(90, Rotation::Deg0), (270, Rotation::Deg0), (0, Rotation::Deg90)] {
            let surface = ImageSurface::new(400, 400);
            assert!(render(&white(320, 160), Some(&surface), sensor, display));
            let (w, h) = content_box(&surface.snapshot().unwrap());
            assert_eq!((w, h), (200, 400));
        }
    }

    #[test]
    fn test_background_cleared_and_centered() {
        let surface = ImageSurface::new(100, 50);
        render(&white(10, 10), Some(&surface), 0, Rotation::Deg0);
        let canvas = surface.snapshot().unwrap();
        assert_eq!(canvas.get_pixel(0, 25).0, [0, 0, 0]);
        assert_eq!(canvas.get_pixel(99, 25).0, [0, 0, 0]);
        assert_eq!(canvas.get_pixel(50, 25).0, [255, 255, 255]);
    }

    #[test]
    fn test_noop_cases() {
        assert!(!render(&white(10, 10), None, 0, Rotation::Deg0));

        let surface = ImageSurface::new(100, 100);
        assert!(!render(&RgbImage::new(0, 0), Some(&surface), 0, Rotation::Deg0));

        surface.invalidate();
        assert!(!render(&white(10, 10), Some(&surface), 0, Rotation::Deg0));
        assert_eq!(surface.frames_presented(), 0);

        let empty = ImageSurface::new(0, 100);
        assert!(!render(&white(10, 10), Some(&empty), 0, Rotation::Deg0));
    }

    #[test]
    fn test_same_target() {
        let a: PreviewTarget = Arc::new(ImageSurface::new(1, 1));
        let b: PreviewTarget = Arc::new(ImageSurface::new(1, 1));
        assert!(same_target(Some(&a), Some(&a.clone())));
        assert!(!same_target(Some(&a), Some(&b)));
        assert!(same_target(None, None));
        assert!(!same_target(Some(&a), None));
    }
}
