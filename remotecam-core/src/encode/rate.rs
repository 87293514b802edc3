//! Frame rate selection
//!
//! Cameras only run at the fixed rates they advertise. The user picks an
//! "effective" rate; we run the hardware at the closest rate at or above
//! it and keep one frame out of every `frame_skip_ratio`.

use serde::{Deserialize, Serialize};

use crate::formats::DEFAULT_HARDWARE_FPS;

/// Hardware rate and decimation chosen for one capture run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePlan {
    /// Fixed rate requested from the hardware
    pub hardware_fps: u32,
    /// Keep one frame in this many, always >= 1
    pub frame_skip_ratio: u32,
}

impl Default for RatePlan {
    fn default() -> Self {
        Self {
            hardware_fps: DEFAULT_HARDWARE_FPS,
            frame_skip_ratio: 1,
        }
    }
}

/// Maps an effective fps onto the hardware's fixed rates
pub struct RateController;

impl RateController {
    /// Choose the hardware rate and skip ratio
    ///
    /// Picks the smallest hardware rate >= `effective_fps`, else the
    /// largest hardware rate.
    pub fn select(effective_fps: u32, hardware_fixed_fps: &[u32]) -> RatePlan {
        let effective_fps = effective_fps.max(1);

        let hardware_fps = hardware_fixed_fps
            .iter()
            .copied()
            .filter(|&fps| fps >= effective_fps)
            .min()
            .or_else(|| hardware_fixed_fps.iter().copied().max())
            .unwrap_or(DEFAULT_HARDWARE_FPS);

        RatePlan {
            hardware_fps,
            frame_skip_ratio: (hardware_fps / effective_fps).max(1),
        }
    }

    /// Whether the frame with this counter value is kept
    #[inline]
    pub fn is_kept(frame_counter: u64, frame_skip_ratio: u32) -> bool {
        frame_counter % u64::from(frame_skip_ratio.max(1)) == 0
    }
}

/// Per-session frame counter applying a [`RatePlan`]
#[derive(Debug, Clone, Default)]
pub struct FrameGate {
    counter: u64,
    frame_skip_ratio: u32,
}

impl FrameGate {
    /// Create a gate starting at counter 0
    pub fn new(plan: RatePlan) -> Self {
        Self {
            counter: 0,
            frame_skip_ratio: plan.frame_skip_ratio.max(1),
        }
    }

    /// Count one delivered frame and report whether it is kept
    pub fn advance(&mut self) -> bool {
        self.counter = self.counter.wrapping_add(1);
        RateController::is_kept(self.counter, self.frame_skip_ratio)
    }

    /// Frames counted since the last reset
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let plan = RateController::select(30, &[30, 15]);
        assert_eq!(plan.hardware_fps, 30);
        assert_eq!(plan.frame_skip_ratio, 1);
    }

    #[test]
    fn test_smallest_at_or_above() {
        let plan = RateController::select(10, &[60, 30, 15]);
        assert_eq!(plan.hardware_fps, 15);
        assert_eq!(plan.frame_skip_ratio, 1);

        let plan = RateController::select(5, &[30]);
        assert_eq!(plan.hardware_fps, 30);
        assert_eq!(plan.frame_skip_ratio, 6);
    }

    #[test]
    fn test_falls_back_to_max() {
        let plan = RateController::select(30, &[15, 24]);
        assert_eq!(plan.hardware_fps, 24);
        assert_eq!(plan.frame_skip_ratio, 1);
    }

    #[test]
    fn test_empty_hardware_list() {
        assert_eq!(RateController::select(15, &[]), RatePlan {
            hardware_fps: DEFAULT_HARDWARE_FPS,
            frame_skip_ratio: 2,
        });
    }

    #[test]
    fn test_selection_properties() {
        let sets: [&[u32]; 6] = [&[30], &[30, 15], &[60, 30, 24, 15, 7], &[1], &[24], &[120, 5]];
        for hardware in sets {
            for effective in [30, 15, 10, 5, 2, 1] {
                let plan = RateController::select(effective, hardware);
                assert!(hardware.contains(&plan.hardware_fps));
                if hardware.iter().any(|&h| h >= effective) {
                    assert!(plan.hardware_fps >= effective);
                    assert!(hardware
                        .iter()
                        .filter(|&&h| h >= effective)
                        .all(|&h| h >= plan.hardware_fps));
                } else {
                    assert_eq!(plan.hardware_fps, *hardware.iter().max().unwrap());
                }
                assert!(plan.frame_skip_ratio >= 1);
                assert_eq!(plan.frame_skip_ratio, (plan.hardware_fps / effective).max(1));
            }
        }
    }

    #[test]
    fn test_frame_gate_keeps_every_nth() {
        let mut gate = FrameGate::new(RatePlan {
            hardware_fps: 30,
            frame_skip_ratio: 6,
        });
        let kept = (0..30).filter(|_| gate.advance()).count();
        assert_eq!(kept, 5);
        assert_eq!(gate.counter(), 30);
    }

    #[test]
    fn test_is_kept_guard_zero_ratio() {
        assert!(RateController::is_kept(7, 0));
    }
}
