use crate::landmark::{
    LandmarkFrame, LEFT_ANKLE, LEFT_HIP, LEFT_SHOULDER, NOSE, RIGHT_ANKLE, RIGHT_HIP,
    RIGHT_SHOULDER,
};

/// Joints that must all be confidently tracked inside the target region.
pub const REQUIRED_POINTS: [usize; 7] = [
    NOSE,
    LEFT_SHOULDER,
    RIGHT_SHOULDER,
    LEFT_HIP,
    RIGHT_HIP,
    LEFT_ANKLE,
    RIGHT_ANKLE,
];

pub const VISIBILITY_MIN: f64 = 0.6;

// Fractional bounds of the target rectangle in the camera frame.
pub const BOX_X_MIN: f64 = 0.10;
pub const BOX_X_MAX: f64 = 0.90;
pub const BOX_Y_MIN: f64 = 0.05;
pub const BOX_Y_MAX: f64 = 0.95;

/// Consecutive passing frames required before the countdown starts.
pub const INSIDE_FRAMES: u32 = 30;

/// True when every required joint is visible above the confidence threshold
/// and lies strictly within the target rectangle. Evaluated from scratch on
/// every frame; no smoothing here.
pub fn inside_box(frame: &LandmarkFrame) -> bool {
    REQUIRED_POINTS.iter().all(|&i| {
        let p = &frame.points[i];
        p.visibility > VISIBILITY_MIN
            && p.x > BOX_X_MIN
            && p.x < BOX_X_MAX
            && p.y > BOX_Y_MIN
            && p.y < BOX_Y_MAX
    })
}

/// Consecutive-frames-inside counter. A single failing frame resets it.
#[derive(Debug, Default)]
pub struct PresenceGate {
    consecutive: u32,
}

impl PresenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame's predicate result. Returns true exactly when the
    /// threshold has just been crossed; the counter resets at that point so
    /// a fresh streak is required for any later trigger.
    pub fn observe(&mut self, inside: bool) -> bool {
        if !inside {
            self.consecutive = 0;
            return false;
        }
        self.consecutive += 1;
        if self.consecutive > INSIDE_FRAMES {
            self.consecutive = 0;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
