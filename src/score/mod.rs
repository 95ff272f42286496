pub mod angles;
pub mod features;
pub mod grade;
pub mod normalize;

pub use features::{detect_onset_sec, extract_features, FEATURE_DIM, HOP, WINDOW};
pub use grade::{
    score_session, ExerciseScore, PartError, ReferenceProfile, ScoreReport,
};
pub use normalize::{normalize_pose, Point3, Pose};
