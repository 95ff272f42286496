use crate::landmark::{
    LandmarkFrame, LEFT_HIP, LEFT_SHOULDER, POINT_COUNT, RIGHT_HIP, RIGHT_SHOULDER,
};

pub type Point3 = [f64; 3];
/// One frame's 33 points after normalization, positions only.
pub type Pose = [Point3; POINT_COUNT];

const EPS: f64 = 1e-9;

/// Normalize a recording so poses are comparable across camera placements:
///
/// 1. translate the pelvis midpoint (hip 23/24 mean) to the origin,
/// 2. scale by shoulder width (11-12 distance, epsilon-guarded),
/// 3. rotate about Z so the shoulder line is horizontal.
pub fn normalize_pose(frames: &[LandmarkFrame]) -> Vec<Pose> {
    frames.iter().map(normalize_frame).collect()
}

fn normalize_frame(frame: &LandmarkFrame) -> Pose {
    let mut pose: Pose = [[0.0; 3]; POINT_COUNT];
    for (i, p) in frame.points.iter().enumerate() {
        pose[i] = [p.x, p.y, p.z];
    }

    // 1) translate pelvis midpoint to origin
    let pelvis = [
        (pose[LEFT_HIP][0] + pose[RIGHT_HIP][0]) / 2.0,
        (pose[LEFT_HIP][1] + pose[RIGHT_HIP][1]) / 2.0,
        (pose[LEFT_HIP][2] + pose[RIGHT_HIP][2]) / 2.0,
    ];
    for point in pose.iter_mut() {
        for axis in 0..3 {
            point[axis] -= pelvis[axis];
        }
    }

    // 2) scale by shoulder width
    let width = distance(&pose[LEFT_SHOULDER], &pose[RIGHT_SHOULDER]) + EPS;
    for point in pose.iter_mut() {
        for axis in 0..3 {
            point[axis] /= width;
        }
    }

    // 3) rotate in the XY plane so the shoulder line is horizontal
    let vx = pose[RIGHT_SHOULDER][0] - pose[LEFT_SHOULDER][0];
    let vy = pose[RIGHT_SHOULDER][1] - pose[LEFT_SHOULDER][1];
    let theta = vy.atan2(vx);
    let (sin, cos) = (-theta).sin_cos();

    for point in pose.iter_mut() {
        let (x, y) = (point[0], point[1]);
        point[0] = cos * x - sin * y;
        point[1] = sin * x + cos * y;
    }

    pose
}

pub fn pelvis_center(pose: &Pose) -> Point3 {
    [
        (pose[LEFT_HIP][0] + pose[RIGHT_HIP][0]) / 2.0,
        (pose[LEFT_HIP][1] + pose[RIGHT_HIP][1]) / 2.0,
        (pose[LEFT_HIP][2] + pose[RIGHT_HIP][2]) / 2.0,
    ]
}

pub fn distance(a: &Point3, b: &Point3) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}
