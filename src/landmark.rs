use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::error::{Result, TaisoError};

// BlazePose landmark indices (33-point model)
pub const NOSE: usize = 0;
pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_ELBOW: usize = 13;
pub const RIGHT_ELBOW: usize = 14;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;
pub const LEFT_KNEE: usize = 25;
pub const RIGHT_KNEE: usize = 26;
pub const LEFT_ANKLE: usize = 27;
pub const RIGHT_ANKLE: usize = 28;

pub const POINT_COUNT: usize = 33;

/// Frames are timestamped on this fixed clock when recorded.
pub const RECORDING_FPS: f64 = 30.0;

/// One tracked body point in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub visibility: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Self {
        Self { x, y, z, visibility }
    }
}

/// One detector output cycle: all 33 body points.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    pub points: Vec<Landmark>,
}

impl LandmarkFrame {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    /// A frame with every point at the given position, fully visible.
    /// Handy for building test fixtures.
    pub fn uniform(x: f64, y: f64, visibility: f64) -> Self {
        Self {
            points: vec![Landmark::new(x, y, 0.0, visibility); POINT_COUNT],
        }
    }

    /// Parse one JSON line from the detector feed: an array of 33
    /// `[x, y, z, visibility]` arrays.
    pub fn parse_line(line: &str) -> Result<Self> {
        let raw: Vec<[f64; 4]> =
            serde_json::from_str(line).map_err(|e| TaisoError::Frame(e.to_string()))?;

        if raw.len() != POINT_COUNT {
            return Err(TaisoError::Frame(format!(
                "expected {} points, got {}",
                POINT_COUNT,
                raw.len()
            )));
        }

        Ok(Self {
            points: raw
                .into_iter()
                .map(|[x, y, z, v]| Landmark::new(x, y, z, v))
                .collect(),
        })
    }

    /// Serialize to the wire shape used by the scoring endpoint.
    pub fn to_wire(&self) -> Vec<[f64; 4]> {
        self.points
            .iter()
            .map(|p| [p.x, p.y, p.z, p.visibility])
            .collect()
    }
}

/// Single-slot store for the most recently delivered frame.
///
/// The sequencer reads the latest value when it needs it (countdown ticks)
/// instead of reacting to every delivery; later frames overwrite earlier
/// ones.
#[derive(Debug, Default)]
pub struct FrameMailbox {
    slot: Option<LandmarkFrame>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, frame: LandmarkFrame) {
        self.slot = Some(frame);
    }

    pub fn latest(&self) -> Option<&LandmarkFrame> {
        self.slot.as_ref()
    }
}

/// Dump a recording as CSV with the header `time_sec, x_0..v_32`, one row
/// per frame on a fixed 30 fps clock.
pub fn dump_landmarks_csv<W: Write>(frames: &[LandmarkFrame], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);

    let mut header = vec!["time_sec".to_string()];
    for i in 0..POINT_COUNT {
        for axis in ["x", "y", "z", "v"] {
            header.push(format!("{axis}_{i}"));
        }
    }
    wtr.write_record(&header)?;

    for (t, frame) in frames.iter().enumerate() {
        let mut row = vec![format!("{}", t as f64 / RECORDING_FPS)];
        for p in &frame.points {
            row.push(p.x.to_string());
            row.push(p.y.to_string());
            row.push(p.z.to_string());
            row.push(p.visibility.to_string());
        }
        wtr.write_record(&row)?;
    }

    wtr.flush().map_err(TaisoError::Feed)?;
    Ok(())
}

pub fn dump_landmarks_csv_to_path(frames: &[LandmarkFrame], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    dump_landmarks_csv(frames, file)
}
