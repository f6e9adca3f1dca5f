//! Per-frame scalar features derived from a pose.

use sentry_types::{
    Features, Keypoint, PoseResult, LEFT_HIP, LEFT_SHOULDER, RIGHT_HIP, RIGHT_SHOULDER,
};

/// Minimum visibility required on each of the shoulder/hip landmarks.
pub const MIN_JOINT_SCORE: f64 = 0.2;

fn center(a: &Keypoint, b: &Keypoint) -> (f64, f64) {
    (0.5 * (a.x + b.x), 0.5 * (a.y + b.y))
}

/// Derive features from one pose, or `None` when the trunk landmarks are
/// missing or below the visibility gate.
pub fn compute_features(pose: &PoseResult) -> Option<Features> {
    let ls = pose.keypoint(LEFT_SHOULDER)?;
    let rs = pose.keypoint(RIGHT_SHOULDER)?;
    let lh = pose.keypoint(LEFT_HIP)?;
    let rh = pose.keypoint(RIGHT_HIP)?;
    if ls
        .score
        .min(rs.score)
        .min(lh.score)
        .min(rh.score)
        < MIN_JOINT_SCORE
    {
        return None;
    }

    let (scx, scy) = center(ls, rs);
    let (hcx, hcy) = center(lh, rh);
    let (vx, vy) = (hcx - scx, hcy - scy);
    // Angle between the trunk vector and vertical: 0° upright, 90° horizontal.
    // The argument swap in atan2 measures from the y axis.
    let theta = vx.atan2(vy).to_degrees().abs();

    let ratio = f64::from(pose.bbox.h) / f64::from(pose.bbox.w).max(1.0);

    Some(Features {
        theta,
        ratio,
        hip_y: hcy,
        h_person: f64::from(pose.bbox.h),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentry_types::{Bbox, NUM_LANDMARKS};

    fn pose_with_trunk(shoulder: (f64, f64), hip: (f64, f64), score: f64) -> PoseResult {
        let mut keypoints = vec![
            Keypoint {
                x: 0.0,
                y: 0.0,
                score: 0.0,
            };
            NUM_LANDMARKS
        ];
        for idx in [LEFT_SHOULDER, RIGHT_SHOULDER] {
            keypoints[idx] = Keypoint {
                x: shoulder.0,
                y: shoulder.1,
                score,
            };
        }
        for idx in [LEFT_HIP, RIGHT_HIP] {
            keypoints[idx] = Keypoint {
                x: hip.0,
                y: hip.1,
                score,
            };
        }
        PoseResult {
            keypoints,
            bbox: Bbox {
                x: 0,
                y: 0,
                w: 100,
                h: 200,
            },
            score,
        }
    }

    #[test]
    fn upright_trunk_is_near_zero_degrees() {
        let pose = pose_with_trunk((100.0, 100.0), (100.0, 300.0), 0.9);
        let ft = compute_features(&pose).unwrap();
        assert!(ft.theta < 1e-9);
        assert_eq!(ft.ratio, 2.0);
        assert_eq!(ft.hip_y, 300.0);
        assert_eq!(ft.h_person, 200.0);
    }

    #[test]
    fn supine_trunk_is_ninety_degrees() {
        let pose = pose_with_trunk((100.0, 300.0), (300.0, 300.0), 0.9);
        let ft = compute_features(&pose).unwrap();
        assert!((ft.theta - 90.0).abs() < 1e-9);
    }

    #[test]
    fn upside_down_trunk_stays_positive() {
        // Hips above shoulders: the trunk vector points up.
        let pose = pose_with_trunk((100.0, 300.0), (110.0, 100.0), 0.9);
        let ft = compute_features(&pose).unwrap();
        assert!(ft.theta > 90.0);
    }

    #[test]
    fn low_joint_score_gives_none() {
        let pose = pose_with_trunk((100.0, 100.0), (100.0, 300.0), 0.1);
        assert!(compute_features(&pose).is_none());
    }

    #[test]
    fn missing_landmarks_give_none() {
        let pose = PoseResult {
            keypoints: vec![
                Keypoint {
                    x: 0.0,
                    y: 0.0,
                    score: 1.0
                };
                5
            ],
            bbox: Bbox {
                x: 0,
                y: 0,
                w: 10,
                h: 10,
            },
            score: 1.0,
        };
        assert!(compute_features(&pose).is_none());
    }
}
