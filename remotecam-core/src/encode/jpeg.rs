//! JPEG frame codec
//!
//! Compressed frames pass through. Planar 4:2:0 frames are repacked into
//! NV21 (full luma plane followed by interleaved V/U), converted to RGB
//! and compressed with the `image` JPEG encoder.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat, RgbImage};
use tracing::trace;

use crate::error::{RemoteCamError, Result};
use crate::formats::PixelFormat;
use crate::types::{Plane, RawFrame};

/// Encode a raw frame at `quality` (1-100)
///
/// Returns an empty buffer when the frame cannot be encoded; the caller
/// drops it and waits for the next one.
pub fn encode(raw: &RawFrame, quality: u8) -> Bytes {
    match try_encode(raw, quality) {
        Ok(bytes) => bytes,
        Err(e) => {
            trace!("Dropping {}x{} {} frame: {}", raw.width, raw.height, raw.format, e);
            Bytes::new()
        }
    }
}

/// Encode a raw frame, reporting why it failed
pub fn try_encode(raw: &RawFrame, quality: u8) -> Result<Bytes> {
    if raw.is_empty() {
        return Err(RemoteCamError::encoder("frame has no pixels"));
    }

    match raw.format {
        PixelFormat::Jpeg => Ok(Bytes::copy_from_slice(&raw.planes[0].data)),
        PixelFormat::Yuv420 => {
            let nv21 = repack_nv21(raw)
                .ok_or_else(|| RemoteCamError::encoder("plane data shorter than its strides"))?;
            let rgb = nv21_to_rgb(&nv21, raw.width, raw.height);
            compress_rgb(&rgb, raw.width, raw.height, quality)
        }
        PixelFormat::Unsupported(_) => Err(RemoteCamError::Unsupported(format!(
            "pixel format {}",
            raw.format
        ))),
    }
}

/// Chroma plane dimensions for a 4:2:0 frame
#[inline]
fn chroma_size(width: usize, height: usize) -> (usize, usize) {
    (width.div_ceil(2), height.div_ceil(2))
}

/// Repack Y/U/V planes into contiguous NV21
///
/// Rows are walked with each plane's `row_stride` and samples with its
/// `pixel_stride`, so padded rows and semi-planar chroma both work.
/// Returns `None` if a plane is too short for its declared layout.
pub fn repack_nv21(raw: &RawFrame) -> Option<Vec<u8>> {
    if raw.format != PixelFormat::Yuv420 || raw.planes.len() < 3 {
        return None;
    }

    let width = raw.width as usize;
    let height = raw.height as usize;
    let (chroma_w, chroma_h) = chroma_size(width, height);
    let (y, u, v) = (&raw.planes[0], &raw.planes[1], &raw.planes[2]);

    let mut out = Vec::with_capacity(width * height + 2 * chroma_w * chroma_h);

    for row in 0..height {
        copy_row(y, row, width, &mut out)?;
    }

    for row in 0..chroma_h {
        for col in 0..chroma_w {
            out.push(v.sample(col, row)?);
            out.push(u.sample(col, row)?);
        }
    }

    Some(out)
}

fn copy_row(plane: &Plane, row: usize, width: usize, out: &mut Vec<u8>) -> Option<()> {
    let start = row * plane.row_stride;
    if plane.pixel_stride == 1 {
        out.extend_from_slice(plane.data.get(start..start + width)?);
    } else {
        for col in 0..width {
            out.push(plane.sample(col, row)?);
        }
    }
    Some(())
}

/// Convert NV21 to packed RGB using full-range BT.601 (JFIF)
pub fn nv21_to_rgb(nv21: &[u8], width: u32, height: u32) -> Vec<u8> {
    let width = width as usize;
    let height = height as usize;
    let (chroma_w, _) = chroma_size(width, height);
    let luma_len = width * height;

    let mut rgb = Vec::with_capacity(luma_len * 3);
    for row in 0..height {
        let vu_row = luma_len + (row / 2) * chroma_w * 2;
        for col in 0..width {
            let luma = nv21[row * width + col] as i32;
            let vu = vu_row + (col / 2) * 2;
            let cr = nv21[vu] as i32 - 128;
            let cb = nv21[vu + 1] as i32 - 128;

            // 16.16 fixed point
            let r = luma + ((91_881 * cr) >> 16);
            let g = luma - ((22_554 * cb + 46_802 * cr) >> 16);
            let b = luma + ((116_130 * cb) >> 16);

            rgb.push(r.clamp(0, 255) as u8);
            rgb.push(g.clamp(0, 255) as u8);
            rgb.push(b.clamp(0, 255) as u8);
        }
    }
    rgb
}

/// Compress packed RGB to JPEG
pub fn compress_rgb(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Bytes> {
    let mut out = Vec::with_capacity(rgb.len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(rgb, width, height, ExtendedColorType::Rgb8)?;
    Ok(Bytes::from(out))
}

/// Decode a JPEG into RGB for preview rendering
pub fn decode(jpeg: &[u8]) -> Option<RgbImage> {
    match image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg) {
        Ok(img) => Some(img.to_rgb8()),
        Err(e) => {
            trace!("Preview decode failed: {}", e);
            None
        }
    }
}
