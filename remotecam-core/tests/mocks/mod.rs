//! Mock infrastructure for testing
//!
//! Builders for strided planar frames and manually driven synthetic
//! cameras.

#![allow(dead_code)]

use remotecam_core::capture::{SyntheticBackend, SyntheticFeed, SyntheticSensor};
use remotecam_core::types::{Plane, RawFrame, Resolution};
use std::sync::Arc;
use std::time::Duration;

/// Byte used for row padding so a stride mistake shows up in the output
pub const PAD: u8 = 0xAB;

/// Small size used by session tests to keep JPEG encoding cheap
pub const SMALL: Resolution = Resolution::new(64, 48);

/// Sample values for one planar frame, unpadded
pub struct PlanarPixels {
    pub width: usize,
    pub height: usize,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

impl PlanarPixels {
    /// Deterministic gradient content
    pub fn gradient(width: usize, height: usize) -> Self {
        let cw = width.div_ceil(2);
        let ch = height.div_ceil(2);
        Self {
            width,
            height,
            y: (0..width * height).map(|i| (i * 7 % 256) as u8).collect(),
            u: (0..cw * ch).map(|i| (100 + i % 50) as u8).collect(),
            v: (0..cw * ch).map(|i| (150 + i % 40) as u8).collect(),
        }
    }

    /// Flat gray frame
    pub fn gray(width: usize, height: usize, luma: u8) -> Self {
        let cw = width.div_ceil(2);
        let ch = height.div_ceil(2);
        Self {
            width,
            height,
            y: vec![luma; width * height],
            u: vec![128; cw * ch],
            v: vec![128; cw * ch],
        }
    }

    fn chroma_size(&self) -> (usize, usize) {
        (self.width.div_ceil(2), self.height.div_ceil(2))
    }

    /// Expected NV21 bytes: luma rows, then V/U pairs
    pub fn nv21(&self) -> Vec<u8> {
        let mut out = self.y.clone();
        for (v, u) in self.v.iter().zip(&self.u) {
            out.push(*v);
            out.push(*u);
        }
        out
    }

    /// Fully planar frame with `padding` extra bytes per row
    pub fn planar(&self, padding: usize) -> RawFrame {
        let (cw, ch) = self.chroma_size();
        let y = pad_rows(&self.y, self.width, self.height, padding);
        let u = pad_rows(&self.u, cw, ch, padding);
        let v = pad_rows(&self.v, cw, ch, padding);
        RawFrame::planar(
            self.width as u32,
            self.height as u32,
            Plane::new(y, self.width + padding, 1),
            Plane::new(u, cw + padding, 1),
            Plane::new(v, cw + padding, 1),
        )
    }

    /// Semi-planar frame, U first in the interleaved plane (NV12 order)
    pub fn semi_planar(&self, padding: usize) -> RawFrame {
        let (cw, ch) = self.chroma_size();
        let y = pad_rows(&self.y, self.width, self.height, padding);
        let stride = cw * 2 + padding;
        let mut uv = vec![PAD; stride * ch];
        for row in 0..ch {
            for col in 0..cw {
                uv[row * stride + col * 2] = self.u[row * cw + col];
                uv[row * stride + col * 2 + 1] = self.v[row * cw + col];
            }
        }
        let uv = bytes::Bytes::from(uv);
        RawFrame::planar(
            self.width as u32,
            self.height as u32,
            Plane::new(y, self.width + padding, 1),
            Plane::new(uv.clone(), stride, 2),
            Plane::new(uv.slice(1..), stride, 2),
        )
    }
}

fn pad_rows(samples: &[u8], width: usize, height: usize, padding: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity((width + padding) * height);
    for row in 0..height {
        out.extend_from_slice(&samples[row * width..(row + 1) * width]);
        out.extend(std::iter::repeat_n(PAD, padding));
    }
    out
}

/// Manually driven backend with one planar camera "0"
pub fn manual_planar(hardware_fps: &[u32]) -> (Arc<SyntheticBackend>, SyntheticFeed) {
    let (backend, feed) =
        SyntheticBackend::manual(vec![SyntheticSensor::planar("0", &[SMALL], hardware_fps)]);
    (Arc::new(backend), feed)
}

/// Poll `check` every 10ms until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
