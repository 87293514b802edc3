//! Frame encoding
//!
//! This module provides:
//! - Frame rate selection against the hardware's fixed rates
//! - Planar 4:2:0 repacking and JPEG compression
//! - Aspect-preserving scaling geometry for previews

pub mod jpeg;
mod rate;
pub mod scaler;

pub use jpeg::{decode, encode};
pub use rate::{FrameGate, RateController, RatePlan};
pub use scaler::{calculate_scaled_size, fit_centered, FitRect};
