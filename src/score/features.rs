use crate::landmark::{LEFT_HIP, RIGHT_HIP};
use crate::util;

use super::angles::SEGMENT_ANGLE_COUNT;
use super::normalize::Pose;

/// Sliding-window geometry over the 30fps angle series.
pub const WINDOW: usize = 30;
pub const HOP: usize = 15;

/// 20 angles x {mean, range, var, periodicity} + trunk range, trunk
/// velocity, left/right symmetry.
pub const FEATURE_DIM: usize = 83;

/// The onset detector runs on a decimated 15fps clock.
pub const ONSET_FPS: f64 = 15.0;

const SMOOTH_TAPS: usize = 5;

/// Seconds into the recording where deliberate movement begins, so the
/// idle lead-in before the first exercise does not skew the timeline.
///
/// Frame-to-frame joint speed is box-smoothed, thresholded at two standard
/// deviations over its own mean, and the first crossing wins. A recording
/// with no crossing starts at 0.
pub fn detect_onset_sec(basic_angles: &[[f64; 8]]) -> f64 {
    if basic_angles.len() < 2 {
        return 0.0;
    }
    let speed: Vec<f64> = basic_angles
        .windows(2)
        .map(|pair| {
            let sum: f64 = (0..8).map(|i| (pair[1][i] - pair[0][i]).abs()).sum();
            sum / 8.0
        })
        .collect();

    let smooth = box_smooth(&speed);
    let mean = util::mean(&smooth).unwrap_or(0.0);
    let std = util::std_dev(&smooth).unwrap_or(0.0);
    let threshold = mean + 2.0 * std;

    smooth
        .iter()
        .position(|&v| v > threshold)
        .map(|idx| idx as f64 / ONSET_FPS)
        .unwrap_or(0.0)
}

/// Centered moving average with zero padding at the edges.
fn box_smooth(x: &[f64]) -> Vec<f64> {
    let half = SMOOTH_TAPS as isize / 2;
    (0..x.len() as isize)
        .map(|i| {
            let sum: f64 = (-half..=half)
                .filter_map(|off| {
                    let j = i + off;
                    (j >= 0 && j < x.len() as isize).then(|| x[j as usize])
                })
                .sum();
            sum / SMOOTH_TAPS as f64
        })
        .collect()
}

/// Start offsets of every full window, HOP frames apart.
pub fn window_starts(len: usize) -> Vec<usize> {
    if len < WINDOW {
        return Vec::new();
    }
    (0..=len - WINDOW).step_by(HOP).collect()
}

/// Fraction of spectral energy in the dominant non-DC bin. A clean
/// repeating motion concentrates energy in one bin and scores near 1.
pub fn periodicity(x: &[f64]) -> f64 {
    let n = x.len();
    if n < 4 {
        return 0.0;
    }
    let mut magnitudes = Vec::with_capacity(n / 2);
    for k in 1..=n / 2 {
        let (mut re, mut im) = (0.0, 0.0);
        for (t, &v) in x.iter().enumerate() {
            let phase = -2.0 * std::f64::consts::PI * (k * t) as f64 / n as f64;
            re += v * phase.cos();
            im += v * phase.sin();
        }
        magnitudes.push((re * re + im * im).sqrt());
    }
    let total: f64 = magnitudes.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    let peak = magnitudes.iter().cloned().fold(0.0, f64::max);
    peak / total
}

/// One 83-dimensional feature vector from a single window. `poses` and
/// `angles` must cover the same frames.
pub fn extract_features(
    poses: &[Pose],
    angles: &[[f64; SEGMENT_ANGLE_COUNT]],
) -> [f64; FEATURE_DIM] {
    let mut feats = [0.0; FEATURE_DIM];

    for i in 0..SEGMENT_ANGLE_COUNT {
        let column: Vec<f64> = angles.iter().map(|row| row[i]).collect();
        feats[4 * i] = util::mean(&column).unwrap_or(0.0);
        feats[4 * i + 1] = util::range(&column).unwrap_or(0.0);
        feats[4 * i + 2] = util::variance(&column).unwrap_or(0.0);
        feats[4 * i + 3] = periodicity(&column);
    }

    let pelvis: Vec<[f64; 3]> = poses
        .iter()
        .map(|p| {
            [
                (p[LEFT_HIP][0] + p[RIGHT_HIP][0]) / 2.0,
                (p[LEFT_HIP][1] + p[RIGHT_HIP][1]) / 2.0,
                (p[LEFT_HIP][2] + p[RIGHT_HIP][2]) / 2.0,
            ]
        })
        .collect();

    let pelvis_y: Vec<f64> = pelvis.iter().map(|p| p[1]).collect();
    feats[80] = util::range(&pelvis_y).unwrap_or(0.0);

    let pelvis_steps: Vec<f64> = pelvis
        .windows(2)
        .flat_map(|pair| (0..3).map(move |axis| (pair[1][axis] - pair[0][axis]).abs()))
        .collect();
    feats[81] = util::mean(&pelvis_steps).unwrap_or(0.0);

    let calf_gap: Vec<f64> = angles.iter().map(|row| (row[6] - row[7]).abs()).collect();
    feats[82] = util::mean(&calf_gap).unwrap_or(0.0);

    feats
}

/// Feature vectors for every full window over a contiguous frame run.
pub fn window_features(
    poses: &[Pose],
    angles: &[[f64; SEGMENT_ANGLE_COUNT]],
) -> Vec<[f64; FEATURE_DIM]> {
    window_starts(angles.len().min(poses.len()))
        .into_iter()
        .map(|s| extract_features(&poses[s..s + WINDOW], &angles[s..s + WINDOW]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::POINT_COUNT;

    #[test]
    fn window_starts_respect_hop() {
        assert_eq!(window_starts(29), Vec::<usize>::new());
        assert_eq!(window_starts(30), vec![0]);
        assert_eq!(window_starts(44), vec![0]);
        assert_eq!(window_starts(45), vec![0, 15]);
        assert_eq!(window_starts(90), vec![0, 15, 30, 45, 60]);
    }

    #[test]
    fn periodicity_of_short_or_flat_signal_is_zero() {
        assert_eq!(periodicity(&[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(periodicity(&[5.0; 30]), 0.0);
    }

    #[test]
    fn pure_tone_is_highly_periodic() {
        let x: Vec<f64> = (0..30)
            .map(|t| (2.0 * std::f64::consts::PI * 3.0 * t as f64 / 30.0).sin())
            .collect();
        assert!(periodicity(&x) > 0.9, "got {}", periodicity(&x));
    }

    #[test]
    fn noise_is_less_periodic_than_a_tone() {
        // deterministic pseudo-noise
        let noise: Vec<f64> = (0..30)
            .map(|t| ((t * 7919 + 13) % 97) as f64 / 97.0)
            .collect();
        let tone: Vec<f64> = (0..30)
            .map(|t| (2.0 * std::f64::consts::PI * 3.0 * t as f64 / 30.0).sin())
            .collect();
        assert!(periodicity(&noise) < periodicity(&tone));
    }

    #[test]
    fn onset_found_after_idle_lead_in() {
        // 100 still frames, a short burst of movement, then still again
        let mut angles = vec![[90.0; 8]; 100];
        for t in 0..6 {
            let swing = if t % 2 == 0 { 30.0 } else { 150.0 };
            angles.push([swing; 8]);
        }
        angles.extend(std::iter::repeat([90.0; 8]).take(45));

        let onset = detect_onset_sec(&angles);
        // smoothing reaches the burst at speed index 99 on the 15fps clock
        assert!((onset - 99.0 / ONSET_FPS).abs() < 1e-9, "onset={onset}");
    }

    #[test]
    fn still_recording_has_zero_onset() {
        let angles = vec![[90.0; 8]; 100];
        assert_eq!(detect_onset_sec(&angles), 0.0);
        assert_eq!(detect_onset_sec(&[]), 0.0);
    }

    #[test]
    fn feature_vector_has_expected_shape_and_stats() {
        let poses = vec![[[0.0; 3]; POINT_COUNT]; WINDOW];
        let mut angles = vec![[10.0; 20]; WINDOW];
        for (t, row) in angles.iter_mut().enumerate() {
            row[0] = t as f64; // 0..29
        }
        let f = extract_features(&poses, &angles);

        assert!((f[0] - 14.5).abs() < 1e-9); // mean of 0..29
        assert!((f[1] - 29.0).abs() < 1e-9); // range
        assert!(f[2] > 0.0); // variance
        assert_eq!(f[4], 10.0); // untouched column: mean
        assert_eq!(f[5], 0.0); // untouched column: range
        assert_eq!(f[82], 0.0); // symmetric columns
    }

    #[test]
    fn window_features_count_matches_starts() {
        let poses = vec![[[0.0; 3]; POINT_COUNT]; 75];
        let angles = vec![[0.0; 20]; 75];
        assert_eq!(window_features(&poses, &angles).len(), 4); // starts 0,15,30,45
    }
}
