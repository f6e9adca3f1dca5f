//! Shared types for the fall-detection pipeline.
//!
//! The pose topology follows the 33-landmark convention in which indices 11
//! and 12 are the shoulders and 23 and 24 are the hips. Backends with fewer
//! joints map into these indices and leave the remaining slots at score 0.

use serde::{Deserialize, Serialize};

pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;

/// Number of landmark slots in a [`PoseResult`].
pub const NUM_LANDMARKS: usize = 33;

/// Skeleton connections used for visualization.
pub const POSE_EDGES: [(usize, usize); 12] = [
    (11, 12), // shoulders
    (23, 24), // hips
    (11, 23),
    (12, 24), // torso sides
    (11, 13),
    (13, 15), // left arm
    (12, 14),
    (14, 16), // right arm
    (23, 25),
    (25, 27), // left leg
    (24, 26),
    (26, 28), // right leg
];

/// A single landmark in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    /// Estimator visibility/confidence in `[0, 1]`.
    pub score: f64,
}

/// Axis-aligned integer bounding box, clipped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bbox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// One pose estimate. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseResult {
    pub keypoints: Vec<Keypoint>,
    pub bbox: Bbox,
    /// Mean of the keypoint scores.
    pub score: f64,
}

impl PoseResult {
    /// Compute the enclosing bbox and aggregate score from `keypoints`,
    /// clipping to a `width`×`height` frame.
    pub fn from_keypoints(keypoints: Vec<Keypoint>, width: u32, height: u32) -> Self {
        let xs = keypoints.iter().map(|k| k.x as i32);
        let ys = keypoints.iter().map(|k| k.y as i32);
        let x0 = xs.clone().min().unwrap_or(0).max(0);
        let x1 = xs.max().unwrap_or(0).min(width as i32 - 1);
        let y0 = ys.clone().min().unwrap_or(0).max(0);
        let y1 = ys.max().unwrap_or(0).min(height as i32 - 1);
        let score = if keypoints.is_empty() {
            0.0
        } else {
            keypoints.iter().map(|k| k.score).sum::<f64>() / keypoints.len() as f64
        };
        PoseResult {
            keypoints,
            bbox: Bbox {
                x: x0,
                y: y0,
                w: x1 - x0 + 1,
                h: y1 - y0 + 1,
            },
            score,
        }
    }

    pub fn keypoint(&self, idx: usize) -> Option<&Keypoint> {
        self.keypoints.get(idx)
    }
}

/// Per-tick scalar features derived from one pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    /// Trunk tilt from vertical, degrees, non-negative. 0° upright, 90° horizontal.
    pub theta: f64,
    /// Pose bbox height / max(1, width).
    pub ratio: f64,
    /// Pixel y of the hip center.
    pub hip_y: f64,
    /// Pose bbox height in pixels.
    pub h_person: f64,
}

/// Feature values latched when a trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerSnapshot {
    pub theta_max: f64,
    pub ratio_min: f64,
    pub hip_drop: f64,
    pub still_score: f64,
}

fn default_min_conf_joints() -> u32 {
    8
}
fn default_angle_deg_th() -> f64 {
    55.0
}
fn default_ratio_th() -> f64 {
    0.6
}
fn default_t_pose_sec() -> f64 {
    0.5
}
fn default_hip_drop_px_th() -> i64 {
    40
}
fn default_t_drop_sec() -> f64 {
    0.4
}
fn default_t_still_sec() -> f64 {
    1.0
}
fn default_v_still() -> f64 {
    0.5
}
fn default_min_person_height_px() -> f64 {
    120.0
}
fn default_cooldown_sec() -> f64 {
    5.0
}
fn default_c_grace_sec() -> f64 {
    0.6
}

/// Thresholds and window durations for the fall decision procedure.
///
/// The `T_*` field names are kept as-is because they also appear verbatim in
/// config files and event metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionConfig {
    /// Accepted for config compatibility; the per-joint gate of 0.2 on the
    /// shoulder/hip landmarks is what the logic actually enforces.
    #[serde(default = "default_min_conf_joints")]
    pub min_conf_joints: u32,
    #[serde(default = "default_angle_deg_th")]
    pub angle_deg_th: f64,
    #[serde(default = "default_ratio_th")]
    pub ratio_th: f64,
    #[serde(default = "default_t_pose_sec", rename = "T_pose_sec")]
    pub t_pose_sec: f64,
    #[serde(default = "default_hip_drop_px_th")]
    pub hip_drop_px_th: i64,
    #[serde(default = "default_t_drop_sec", rename = "T_drop_sec")]
    pub t_drop_sec: f64,
    #[serde(default = "default_t_still_sec", rename = "T_still_sec")]
    pub t_still_sec: f64,
    #[serde(default = "default_v_still")]
    pub v_still_px_per_frame: f64,
    #[serde(default = "default_min_person_height_px")]
    pub min_person_height_px: f64,
    #[serde(default = "default_cooldown_sec")]
    pub cooldown_sec: f64,
    #[serde(default = "default_c_grace_sec", rename = "C_grace_sec")]
    pub c_grace_sec: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_conf_joints: default_min_conf_joints(),
            angle_deg_th: default_angle_deg_th(),
            ratio_th: default_ratio_th(),
            t_pose_sec: default_t_pose_sec(),
            hip_drop_px_th: default_hip_drop_px_th(),
            t_drop_sec: default_t_drop_sec(),
            t_still_sec: default_t_still_sec(),
            v_still_px_per_frame: default_v_still(),
            min_person_height_px: default_min_person_height_px(),
            cooldown_sec: default_cooldown_sec(),
            c_grace_sec: default_c_grace_sec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_from_keypoints_clips_to_frame() {
        let kps = vec![
            Keypoint {
                x: -5.0,
                y: 10.0,
                score: 1.0,
            },
            Keypoint {
                x: 700.0,
                y: 500.0,
                score: 0.5,
            },
        ];
        let pose = PoseResult::from_keypoints(kps, 640, 480);
        assert_eq!(pose.bbox.x, 0);
        assert_eq!(pose.bbox.y, 10);
        assert_eq!(pose.bbox.x + pose.bbox.w - 1, 639);
        assert_eq!(pose.bbox.y + pose.bbox.h - 1, 479);
        assert!((pose.score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn detection_config_roundtrips_renamed_keys() {
        let cfg = DetectionConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"T_pose_sec\""));
        assert!(json.contains("\"C_grace_sec\""));
        let back: DetectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
