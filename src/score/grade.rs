use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaisoError};
use crate::landmark::{LandmarkFrame, RECORDING_FPS};
use crate::steps::Routine;
use crate::util;

use super::angles::{basic_angles, segment_angles};
use super::features::{detect_onset_sec, window_features, FEATURE_DIM, WINDOW};
use super::normalize::normalize_pose;

/// Window distances within this tolerance score a full 100.
pub const TOLERANCE: f64 = 3000.0;
/// Decay constant for distances beyond the tolerance. Larger is kinder.
pub const SOFTNESS: f64 = 7000.0;

/// Per-exercise reference window features, one matrix per exercise id,
/// rows = windows, columns = the 83 features.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceProfile {
    #[serde(flatten)]
    exercises: BTreeMap<String, Vec<Vec<f64>>>,
}

impl ReferenceProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| TaisoError::DataFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| TaisoError::DataFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn windows(&self, exercise: &str) -> Option<&[Vec<f64>]> {
        self.exercises.get(exercise).map(|m| m.as_slice())
    }

    /// Minimum L2 distance between consecutive reference windows. Used as
    /// the zero point when normalizing student distances; infinite for a
    /// single-window reference, which makes every comparison score 100.
    pub fn min_consecutive_dist(&self, exercise: &str) -> f64 {
        match self.exercises.get(exercise) {
            Some(rows) => rows
                .windows(2)
                .map(|pair| util::l2_distance(&pair[0], &pair[1]))
                .fold(f64::INFINITY, f64::min),
            None => f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExerciseScore {
    pub exercise: String,
    pub mean_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartError {
    pub exercise: String,
    pub part: String,
    pub mean_abs_error: f64,
}

/// Result of grading one recorded session, either computed locally or
/// returned by the scoring server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreReport {
    pub overall: f64,
    pub exercises: Vec<ExerciseScore>,
    #[serde(default)]
    pub part_errors: Vec<PartError>,
}

/// 100 within tolerance of the normalized distance, exponential decay past
/// it, clamped to [0, 100].
pub fn score_window(student: &[f64], reference: &[f64], min_ref_dist: f64) -> f64 {
    let true_dist = util::l2_distance(student, reference);
    let dist = (true_dist - min_ref_dist).max(0.0);
    if dist <= TOLERANCE {
        return 100.0;
    }
    (100.0 * (-(dist - TOLERANCE) / SOFTNESS).exp()).clamp(0.0, 100.0)
}

/// Body part charged with the error of one feature column.
pub fn part_for_feature(index: usize) -> Option<&'static str> {
    if index < 80 {
        return Some(match index / 4 {
            0 | 1 => "肩",
            2 | 3 | 8 | 9 => "肘",
            4 | 5 => "股関節",
            6 | 7 | 10 | 11 => "膝",
            12..=15 => "腕と脚の協調",
            16 | 17 => "体幹〜四肢の連動",
            _ => "脚の連動",
        });
    }
    match index {
        80 | 81 => Some("体幹"),
        82 => Some("左右バランス"),
        _ => None,
    }
}

/// Grade a recorded session against a reference profile.
///
/// Frames are normalized, the movement onset is subtracted from the
/// timeline, frames are binned per exercise by the routine's cumulative
/// spans, windowed features are compared positionally against the
/// reference windows, and window scores roll up into per-exercise means.
pub fn score_session(
    frames: &[LandmarkFrame],
    routine: &Routine,
    profile: &ReferenceProfile,
) -> Result<ScoreReport> {
    if frames.len() < WINDOW {
        return Err(TaisoError::TooFewFrames {
            have: frames.len(),
            need: WINDOW,
        });
    }

    let poses = normalize_pose(frames);
    // the onset detector runs on every other frame (15 fps)
    let decimated: Vec<_> = basic_angles(&poses).into_iter().step_by(2).collect();
    let onset = detect_onset_sec(&decimated);
    let angles = segment_angles(&poses);

    let mut exercises = Vec::new();
    let mut part_errors = Vec::new();

    for (step, span) in routine.steps.iter().zip(routine.spans()) {
        let Some(reference) = profile.windows(&step.id) else {
            continue;
        };

        // frames inside this exercise's time range, onset-shifted
        let indices: Vec<usize> = (0..frames.len())
            .filter(|&i| {
                let t = i as f64 / RECORDING_FPS - onset;
                t >= span.start_sec && t < span.end_sec
            })
            .collect();
        if indices.len() < WINDOW {
            continue;
        }
        let (first, last) = (indices[0], indices[indices.len() - 1]);
        let student = window_features(&poses[first..=last], &angles[first..=last]);

        let min_ref_dist = profile.min_consecutive_dist(&step.id);
        let compared = student.len().min(reference.len());
        if compared == 0 {
            continue;
        }

        let mut scores = Vec::with_capacity(compared);
        let mut bucket: BTreeMap<&'static str, (f64, usize)> = BTreeMap::new();
        for i in 0..compared {
            scores.push(score_window(&student[i], &reference[i], min_ref_dist));
            for fi in 0..FEATURE_DIM.min(reference[i].len()) {
                if let Some(part) = part_for_feature(fi) {
                    let entry = bucket.entry(part).or_insert((0.0, 0));
                    entry.0 += (student[i][fi] - reference[i][fi]).abs();
                    entry.1 += 1;
                }
            }
        }

        exercises.push(ExerciseScore {
            exercise: step.id.clone(),
            mean_score: util::mean(&scores).unwrap_or(0.0),
        });
        for (part, (total, count)) in bucket {
            part_errors.push(PartError {
                exercise: step.id.clone(),
                part: part.to_string(),
                mean_abs_error: total / count.max(1) as f64,
            });
        }
    }

    if exercises.is_empty() {
        return Err(TaisoError::MissingReference(routine.name.clone()));
    }

    let means: Vec<f64> = exercises.iter().map(|e| e.mean_score).collect();
    Ok(ScoreReport {
        overall: util::mean(&means).unwrap_or(0.0),
        exercises,
        part_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::{
        Landmark, LEFT_ELBOW, LEFT_HIP, LEFT_SHOULDER, RIGHT_HIP, RIGHT_SHOULDER,
    };
    use crate::steps::Step;
    use assert_matches::assert_matches;

    fn profile_json(exercise: &str, rows: usize) -> ReferenceProfile {
        let row: Vec<String> = (0..rows)
            .map(|r| format!("[{}]", vec![r.to_string(); FEATURE_DIM].join(",")))
            .collect();
        let json = format!(r#"{{"{}": [{}]}}"#, exercise, row.join(","));
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn identical_windows_score_100() {
        let v = vec![1.0; FEATURE_DIM];
        assert_eq!(score_window(&v, &v, 0.0), 100.0);
    }

    #[test]
    fn distance_within_tolerance_scores_100() {
        let s = vec![0.0; FEATURE_DIM];
        let mut t = vec![0.0; FEATURE_DIM];
        t[0] = TOLERANCE; // exact boundary
        assert_eq!(score_window(&s, &t, 0.0), 100.0);
    }

    #[test]
    fn distance_beyond_tolerance_decays() {
        let s = vec![0.0; FEATURE_DIM];
        let mut t = vec![0.0; FEATURE_DIM];
        t[0] = TOLERANCE + SOFTNESS;
        let score = score_window(&s, &t, 0.0);
        assert!((score - 100.0 * (-1.0f64).exp()).abs() < 1e-9, "score={score}");
    }

    #[test]
    fn reference_slack_is_subtracted() {
        let s = vec![0.0; FEATURE_DIM];
        let mut t = vec![0.0; FEATURE_DIM];
        t[0] = TOLERANCE + 500.0;
        assert!(score_window(&s, &t, 0.0) < 100.0);
        assert_eq!(score_window(&s, &t, 500.0), 100.0);
    }

    #[test]
    fn single_row_reference_always_scores_100() {
        let profile = profile_json("E01", 1);
        assert_eq!(profile.min_consecutive_dist("E01"), f64::INFINITY);
        let far = vec![1e9; FEATURE_DIM];
        let rows = profile.windows("E01").unwrap();
        assert_eq!(score_window(&far, &rows[0], f64::INFINITY), 100.0);
    }

    #[test]
    fn part_map_covers_all_features() {
        for fi in 0..FEATURE_DIM {
            assert!(part_for_feature(fi).is_some(), "feature {fi} unmapped");
        }
        assert_eq!(part_for_feature(FEATURE_DIM), None);

        assert_eq!(part_for_feature(0), Some("肩"));
        assert_eq!(part_for_feature(8), Some("肘"));
        assert_eq!(part_for_feature(35), Some("肘")); // angle 8
        assert_eq!(part_for_feature(48), Some("腕と脚の協調")); // angle 12
        assert_eq!(part_for_feature(79), Some("脚の連動")); // angle 19
        assert_eq!(part_for_feature(80), Some("体幹"));
        assert_eq!(part_for_feature(82), Some("左右バランス"));
    }

    #[test]
    fn min_consecutive_dist_over_rows() {
        let json = format!(
            r#"{{"E01": [[{z}],[{o}],[{o}]]}}"#,
            z = vec!["0.0"; FEATURE_DIM].join(","),
            o = vec!["1.0"; FEATURE_DIM].join(","),
        );
        let profile: ReferenceProfile = serde_json::from_str(&json).unwrap();
        // rows 1 and 2 are identical, so the minimum is 0
        assert_eq!(profile.min_consecutive_dist("E01"), 0.0);
        assert_eq!(profile.min_consecutive_dist("E02"), f64::INFINITY);
    }

    fn still_frame() -> LandmarkFrame {
        let mut frame = LandmarkFrame::uniform(0.5, 0.5, 1.0);
        frame.points[LEFT_SHOULDER] = Landmark::new(0.4, 0.3, 0.0, 1.0);
        frame.points[RIGHT_SHOULDER] = Landmark::new(0.6, 0.3, 0.0, 1.0);
        frame.points[LEFT_ELBOW] = Landmark::new(0.3, 0.4, 0.0, 1.0);
        frame.points[LEFT_HIP] = Landmark::new(0.45, 0.55, 0.0, 1.0);
        frame.points[RIGHT_HIP] = Landmark::new(0.55, 0.55, 0.0, 1.0);
        frame
    }

    fn one_step_routine(duration_ms: u64) -> Routine {
        Routine {
            name: "short".into(),
            steps: vec![Step {
                id: "E01".into(),
                name: "stretch".into(),
                duration_ms,
            }],
        }
    }

    #[test]
    fn too_short_recording_is_rejected() {
        let frames = vec![still_frame(); WINDOW - 1];
        let profile = profile_json("E01", 2);
        assert_matches!(
            score_session(&frames, &one_step_routine(2000), &profile),
            Err(TaisoError::TooFewFrames { have: 29, need: 30 })
        );
    }

    #[test]
    fn missing_reference_is_an_error() {
        let frames = vec![still_frame(); 60];
        let profile = profile_json("E99", 2);
        assert_matches!(
            score_session(&frames, &one_step_routine(2000), &profile),
            Err(TaisoError::MissingReference(_))
        );
    }

    #[test]
    fn still_session_produces_a_full_report() {
        // 2 seconds of stillness: no onset, one exercise, one window
        let frames = vec![still_frame(); 60];
        let profile = profile_json("E01", 3);
        let report = score_session(&frames, &one_step_routine(2000), &profile).unwrap();

        assert_eq!(report.exercises.len(), 1);
        assert_eq!(report.exercises[0].exercise, "E01");
        assert_eq!(report.overall, report.exercises[0].mean_score);
        assert!((0.0..=100.0).contains(&report.overall));
        // every body part appears in the error table
        let parts: Vec<&str> = report.part_errors.iter().map(|p| p.part.as_str()).collect();
        assert!(parts.contains(&"肩"));
        assert!(parts.contains(&"体幹"));
        assert!(parts.contains(&"左右バランス"));
    }

    #[test]
    fn report_serializes_round_trip() {
        let report = ScoreReport {
            overall: 87.5,
            exercises: vec![ExerciseScore {
                exercise: "E01".into(),
                mean_score: 87.5,
            }],
            part_errors: vec![],
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: ScoreReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
