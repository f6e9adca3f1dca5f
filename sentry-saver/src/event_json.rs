//! The `event.json` document. Field order here is the on-disk order.

use serde::{Deserialize, Serialize};

use sentry_types::{DetectionConfig, TriggerSnapshot};

/// Identity of the model that produced the poses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub backend: String,
    pub model_name: String,
    pub model_version: String,
    pub num_threads: u32,
}

/// Decision parameters frozen at trigger time: the flat thresholds plus the
/// nested observed values. The short `T_*`/`v_still` key spellings are part
/// of the metadata schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub angle_deg_th: f64,
    pub ratio_th: f64,
    pub hip_drop_px_th: i64,
    #[serde(rename = "T_pose")]
    pub t_pose: f64,
    #[serde(rename = "T_drop")]
    pub t_drop: f64,
    #[serde(rename = "T_still")]
    pub t_still: f64,
    pub v_still: f64,
    pub min_person_height_px: i64,
    pub cooldown_sec: f64,
    pub features_at_trigger: TriggerSnapshot,
}

impl DecisionRecord {
    pub fn freeze(cfg: &DetectionConfig, snapshot: TriggerSnapshot) -> Self {
        Self {
            angle_deg_th: cfg.angle_deg_th,
            ratio_th: cfg.ratio_th,
            hip_drop_px_th: cfg.hip_drop_px_th,
            t_pose: cfg.t_pose_sec,
            t_drop: cfg.t_drop_sec,
            t_still: cfg.t_still_sec,
            v_still: cfg.v_still_px_per_frame,
            min_person_height_px: cfg.min_person_height_px as i64,
            cooldown_sec: cfg.cooldown_sec,
            features_at_trigger: snapshot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFile {
    pub file: String,
    /// `"annotated"` or `"raw"`.
    pub kind: String,
    pub t_rel_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramesMeta {
    pub pre_ms: i64,
    pub post_ms: i64,
    pub inference_fps: f64,
    pub saved_files: Vec<SavedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyMeta {
    pub face_blur: bool,
    pub blur_kernel: u32,
    pub redact_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMeta {
    /// Absent when metadata redaction is on.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub host: Option<String>,
    pub app_version: String,
    pub git_commit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventJson {
    pub event_id: String,
    pub camera_id: String,
    pub timestamp_utc: String,
    pub model: ModelMeta,
    pub decision: DecisionRecord,
    pub track_id: u32,
    pub frames: FramesMeta,
    pub privacy: PrivacyMeta,
    pub system: SystemMeta,
}

impl EventJson {
    /// UTF-8 JSON, two-space indent, non-ASCII left unescaped.
    pub fn render(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_record_uses_short_key_spellings() {
        let record = DecisionRecord::freeze(
            &DetectionConfig::default(),
            TriggerSnapshot {
                theta_max: 81.0,
                ratio_min: 0.4,
                hip_drop: 55.0,
                still_score: 0.3,
            },
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"T_pose\":0.5"));
        assert!(json.contains("\"v_still\":0.5"));
        assert!(json.contains("\"features_at_trigger\""));
        assert!(!json.contains("T_pose_sec"));
    }

    #[test]
    fn redacted_system_block_has_no_host_key() {
        let sys = SystemMeta {
            host: None,
            app_version: "0.9.0".to_string(),
            git_commit: String::new(),
        };
        let json = serde_json::to_string(&sys).unwrap();
        assert!(!json.contains("host"));
    }
}
