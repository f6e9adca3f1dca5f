//! On-disk behavior of event persistence.

use std::path::Path;
use std::sync::Arc;

use image::{Rgb, RgbImage};

use sentry_annotate::NullFaceDetector;
use sentry_config_data::{ImageFormat, PrivacyConfig, SaverConfig};
use sentry_saver::{
    save_event, CompletedEvent, DecisionRecord, EventJson, FrameToSave, ModelMeta, SaverWorker,
};
use sentry_types::{
    Bbox, DetectionConfig, Keypoint, PoseResult, TriggerSnapshot, LEFT_HIP, LEFT_SHOULDER,
    NUM_LANDMARKS, RIGHT_HIP, RIGHT_SHOULDER,
};

fn test_pose() -> PoseResult {
    let mut keypoints = vec![
        Keypoint {
            x: 0.0,
            y: 0.0,
            score: 0.0,
        };
        NUM_LANDMARKS
    ];
    for (idx, x, y) in [
        (LEFT_SHOULDER, 20.0, 10.0),
        (RIGHT_SHOULDER, 40.0, 10.0),
        (LEFT_HIP, 20.0, 35.0),
        (RIGHT_HIP, 40.0, 35.0),
    ] {
        keypoints[idx] = Keypoint { x, y, score: 0.9 };
    }
    PoseResult {
        keypoints,
        bbox: Bbox {
            x: 10,
            y: 5,
            w: 40,
            h: 40,
        },
        score: 0.9,
    }
}

/// Pre/post frame sequence: `n_pre` frames at -100 ms steps back from zero,
/// then `n_post` frames forward from +100 ms.
fn frames(n_pre: usize, n_post: usize) -> Vec<FrameToSave> {
    let mut out = Vec::new();
    for i in 0..n_pre {
        let t_rel_ms = -100 * (n_pre - 1 - i) as i64;
        out.push(FrameToSave {
            image: Arc::new(RgbImage::from_pixel(64, 48, Rgb([30, 60, 90]))),
            t_rel_ms,
            pose: Some(test_pose()),
        });
    }
    for i in 0..n_post {
        out.push(FrameToSave {
            image: Arc::new(RgbImage::from_pixel(64, 48, Rgb([90, 60, 30]))),
            t_rel_ms: 100 * (i as i64 + 1),
            pose: if i % 5 == 4 { None } else { Some(test_pose()) },
        });
    }
    out
}

fn test_event(base_dir: &Path, event_id: &str, frames: Vec<FrameToSave>) -> CompletedEvent {
    let mut saver = SaverConfig {
        pre_seconds: 1.0,
        post_seconds: 2.0,
        ..Default::default()
    };
    saver.video_clip.enabled = false;
    CompletedEvent {
        event_id: event_id.to_string(),
        ts_utc: "2025-06-01T10:00:00Z".to_string(),
        camera_id: "cam01".to_string(),
        frames,
        decision: DecisionRecord::freeze(
            &DetectionConfig::default(),
            TriggerSnapshot {
                theta_max: 82.0,
                ratio_min: 0.45,
                hip_drop: 58.0,
                still_score: 0.2,
            },
        ),
        model: ModelMeta {
            backend: "movenet".to_string(),
            model_name: "movenet_pose".to_string(),
            model_version: String::new(),
            num_threads: 2,
        },
        inference_fps: 10.0,
        base_dir: base_dir.to_path_buf(),
        privacy: PrivacyConfig::default(),
        saver,
        host: "edge-node-7".to_string(),
        app_version: "0.9.0".to_string(),
        git_commit: "abc1234".to_string(),
    }
}

fn read_event_json(dir: &Path) -> EventJson {
    let text = std::fs::read_to_string(dir.join("event.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn on_disk_layout_matches_the_schema() {
    let tmp = tempfile::tempdir().unwrap();
    let ev = test_event(tmp.path(), "20250601T100000Z_cam01_fall_0001", frames(10, 20));
    save_event(&ev, &NullFaceDetector).unwrap();

    let dir = tmp
        .path()
        .join("cam01/2025/06/01/20250601T100000Z_cam01_fall_0001");
    assert!(dir.is_dir());

    let annotated: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("annotated_"))
        .collect();
    assert_eq!(annotated.len(), 30);
    assert!(annotated.iter().all(|n| n.ends_with(".jpg")));
    assert!(annotated.contains(&"annotated_-900.jpg".to_string()));
    assert!(annotated.contains(&"annotated_2000.jpg".to_string()));

    let doc = read_event_json(&dir);
    assert_eq!(doc.event_id, ev.event_id);
    assert_eq!(doc.track_id, 0);
    assert_eq!(doc.frames.pre_ms, 1000);
    assert_eq!(doc.frames.post_ms, 2000);
    assert_eq!(doc.frames.saved_files.len(), 30);
    let offsets: Vec<i64> = doc.frames.saved_files.iter().map(|f| f.t_rel_ms).collect();
    let mut sorted = offsets.clone();
    sorted.sort();
    assert_eq!(offsets, sorted, "t_rel_ms must be non-decreasing");
    assert_eq!(offsets.first(), Some(&-900));
    assert_eq!(offsets.last(), Some(&2000));
    assert_eq!(doc.decision.features_at_trigger.theta_max, 82.0);
}

#[test]
fn resaving_the_same_event_is_byte_identical() {
    let tmp = tempfile::tempdir().unwrap();
    let ev = test_event(tmp.path(), "20250601T100000Z_cam01_fall_0001", frames(2, 3));
    save_event(&ev, &NullFaceDetector).unwrap();
    let dir = tmp
        .path()
        .join("cam01/2025/06/01/20250601T100000Z_cam01_fall_0001");
    let first = std::fs::read(dir.join("event.json")).unwrap();
    save_event(&ev, &NullFaceDetector).unwrap();
    let second = std::fs::read(dir.join("event.json")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn redaction_controls_the_host_field() {
    let tmp = tempfile::tempdir().unwrap();

    let mut ev = test_event(tmp.path(), "20250601T100000Z_cam01_fall_0001", frames(1, 1));
    ev.privacy.redact_metadata = true;
    save_event(&ev, &NullFaceDetector).unwrap();
    let dir = tmp
        .path()
        .join("cam01/2025/06/01/20250601T100000Z_cam01_fall_0001");
    let text = std::fs::read_to_string(dir.join("event.json")).unwrap();
    assert!(!text.contains("edge-node-7"));
    assert!(!text.contains("\"host\""));

    let mut ev = test_event(tmp.path(), "20250601T100000Z_cam01_fall_0002", frames(1, 1));
    ev.privacy.redact_metadata = false;
    save_event(&ev, &NullFaceDetector).unwrap();
    let dir = tmp
        .path()
        .join("cam01/2025/06/01/20250601T100000Z_cam01_fall_0002");
    let doc = read_event_json(&dir);
    assert_eq!(doc.system.host.as_deref(), Some("edge-node-7"));
}

#[test]
fn save_raw_doubles_the_image_files() {
    let tmp = tempfile::tempdir().unwrap();
    let mut ev = test_event(tmp.path(), "20250601T100000Z_cam01_fall_0001", frames(2, 2));
    ev.saver.save_raw = true;
    save_event(&ev, &NullFaceDetector).unwrap();
    let dir = tmp
        .path()
        .join("cam01/2025/06/01/20250601T100000Z_cam01_fall_0001");
    let doc = read_event_json(&dir);
    assert_eq!(doc.frames.saved_files.len(), 8);
    assert_eq!(
        doc.frames
            .saved_files
            .iter()
            .filter(|f| f.kind == "raw")
            .count(),
        4
    );
    assert!(dir.join("raw_-100.jpg").exists());
}

#[test]
fn png_format_is_honored() {
    let tmp = tempfile::tempdir().unwrap();
    let mut ev = test_event(tmp.path(), "20250601T100000Z_cam01_fall_0001", frames(1, 1));
    ev.saver.image_format = ImageFormat::Png;
    save_event(&ev, &NullFaceDetector).unwrap();
    let dir = tmp
        .path()
        .join("cam01/2025/06/01/20250601T100000Z_cam01_fall_0001");
    assert!(dir.join("annotated_0.png").exists());
    assert!(dir.join("annotated_100.png").exists());
}

#[test]
fn worker_saves_submitted_events_before_stopping() {
    let tmp = tempfile::tempdir().unwrap();
    let mut worker = SaverWorker::new(Box::new(NullFaceDetector));
    worker.submit(test_event(
        tmp.path(),
        "20250601T100000Z_cam01_fall_0001",
        frames(1, 2),
    ));
    worker.submit(test_event(
        tmp.path(),
        "20250601T100001Z_cam01_fall_0002",
        frames(1, 2),
    ));
    worker.stop();

    let day = tmp.path().join("cam01/2025/06/01");
    assert!(day.join("20250601T100000Z_cam01_fall_0001/event.json").exists());
    assert!(day.join("20250601T100001Z_cam01_fall_0002/event.json").exists());
}
