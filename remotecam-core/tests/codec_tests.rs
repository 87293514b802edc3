//! Integration tests for the JPEG frame codec

mod mocks;

use mocks::PlanarPixels;
use remotecam_core::capture::synthetic::{planar_pattern, PlanarLayout};
use remotecam_core::encode::{self, jpeg};
use remotecam_core::types::{RawFrame, Resolution};

#[test]
fn test_repack_ignores_row_padding() {
    let pixels = PlanarPixels::gradient(10, 6);
    for padding in [0, 3, 16] {
        let repacked = jpeg::repack_nv21(&pixels.planar(padding)).expect("repack");
        assert_eq!(repacked, pixels.nv21(), "padding {}", padding);
    }
}

#[test]
fn test_repack_semi_planar_chroma() {
    let pixels = PlanarPixels::gradient(8, 4);
    let repacked = jpeg::repack_nv21(&pixels.semi_planar(8)).expect("repack");
    assert_eq!(repacked, pixels.nv21());
}

#[test]
fn test_repack_odd_dimensions() {
    // 4:2:0 chroma rounds up
    let pixels = PlanarPixels::gradient(7, 5);
    let repacked = jpeg::repack_nv21(&pixels.planar(2)).expect("repack");
    assert_eq!(repacked.len(), 7 * 5 + 2 * 4 * 3);
    assert_eq!(repacked, pixels.nv21());
}

#[test]
fn test_padding_never_reaches_output() {
    let frame = planar_pattern(Resolution::new(32, 16), 3, PlanarLayout::default());
    let repacked = jpeg::repack_nv21(&frame).expect("repack");
    assert_eq!(repacked.len(), 32 * 16 + 2 * 16 * 8);
    // Luma of the pattern never hits the padding byte in the first row
    assert!(!repacked[..32].contains(&0xEE));
}

#[test]
fn test_gray_frame_round_trips_within_tolerance() {
    let frame = PlanarPixels::gray(32, 32, 120).planar(4);
    let jpeg = encode::encode(&frame, 90);
    assert!(jpeg.starts_with(&[0xFF, 0xD8]));

    let decoded = encode::decode(&jpeg).expect("decodes");
    assert_eq!(decoded.dimensions(), (32, 32));
    for pixel in decoded.pixels() {
        for channel in pixel.0 {
            assert!(
                (i32::from(channel) - 120).abs() <= 3,
                "channel {} too far from 120",
                channel
            );
        }
    }
}

#[test]
fn test_encode_respects_quality() {
    let frame = planar_pattern(Resolution::new(160, 120), 0, PlanarLayout::default());
    let low = encode::encode(&frame, 10);
    let high = encode::encode(&frame, 95);
    assert!(!low.is_empty());
    assert!(high.len() > low.len());
}

#[test]
fn test_compressed_frame_passes_through() {
    let source = PlanarPixels::gray(16, 16, 60).planar(0);
    let jpeg = encode::encode(&source, 70);
    let frame = RawFrame::compressed(16, 16, jpeg.clone());
    assert_eq!(encode::encode(&frame, 10), jpeg);
}

#[test]
fn test_truncated_plane_is_dropped() {
    let mut frame = PlanarPixels::gradient(16, 16).planar(0);
    frame.planes[2].data = frame.planes[2].data.slice(..10);
    assert!(encode::encode(&frame, 80).is_empty());
    assert!(jpeg::try_encode(&frame, 80).is_err());
}
