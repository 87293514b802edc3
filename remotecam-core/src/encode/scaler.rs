//! Frame scaling geometry
//!
//! Aspect-preserving fit of a frame into a presentation surface.

/// Placement of a scaled frame inside a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FitRect {
    /// Aspect ratio of the placed frame
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Calculate scaled dimensions maintaining aspect ratio
///
/// Both results are at least 1.
pub fn calculate_scaled_size(
    src_width: u32,
    src_height: u32,
    max_width: u32,
    max_height: u32,
) -> (u32, u32) {
    let src_aspect = src_width as f64 / src_height as f64;
    let dst_aspect = max_width as f64 / max_height as f64;

    if src_aspect > dst_aspect {
        // Width-limited
        let height = (max_width as f64 / src_aspect).round() as u32;
        (max_width, height.clamp(1, max_height))
    } else {
        // Height-limited
        let width = (max_height as f64 * src_aspect).round() as u32;
        (width.clamp(1, max_width), max_height)
    }
}

/// Scale `src` to fit `dst` and center it (letterbox or pillarbox)
///
/// Returns `None` when either size has zero area.
pub fn fit_centered(src: (u32, u32), dst: (u32, u32)) -> Option<FitRect> {
    if src.0 == 0 || src.1 == 0 || dst.0 == 0 || dst.1 == 0 {
        return None;
    }

    let (width, height) = calculate_scaled_size(src.0, src.1, dst.0, dst.1);
    Some(FitRect {
        x: (dst.0 - width) / 2,
        y: (dst.1 - height) / 2,
        width,
        height,
    })
}
