//! MoveNet single-pose backend through the OpenVINO runtime.
//!
//! The network takes one NCHW FP32 tensor and returns 17 COCO-ordered
//! keypoints as `(y, x, score)` triples normalized to `[0, 1]`. The 17 COCO
//! joints are mapped into the 33-landmark topology the rest of the pipeline
//! expects; unmapped slots keep score 0.

use image::RgbImage;
use openvino::{Blob, Core, ExecutableNetwork, Layout, Precision, TensorDesc};
use tracing::info;

use sentry_config_data::ModelConfig;
use sentry_types::{Keypoint, PoseResult, NUM_LANDMARKS};

use crate::{Error, PoseEstimator, Result};

const INPUT_SIZE: usize = 192;
const NUM_COCO_JOINTS: usize = 17;

// COCO joint order -> 33-landmark index.
const COCO_TO_LANDMARK: [usize; NUM_COCO_JOINTS] = [
    0,  // nose
    2,  // left eye
    5,  // right eye
    7,  // left ear
    8,  // right ear
    11, // left shoulder
    12, // right shoulder
    13, // left elbow
    14, // right elbow
    15, // left wrist
    16, // right wrist
    23, // left hip
    24, // right hip
    25, // left knee
    26, // right knee
    27, // left ankle
    28, // right ankle
];

pub(crate) struct MoveNetEstimator {
    network: ExecutableNetwork,
    input_name: String,
    output_name: String,
    model_name: String,
    scratchpad: Vec<f32>,
}

// The estimator is confined to the inference loop; the OpenVINO handles are
// never shared between threads, only moved with their owner.
unsafe impl Send for MoveNetEstimator {}

impl MoveNetEstimator {
    pub(crate) fn new(cfg: &ModelConfig) -> Result<Self> {
        if cfg.model_path.is_empty() {
            return Err(Error::Backend(
                "movenet backend requires model.model_path (OpenVINO .xml)".to_string(),
            ));
        }
        let model_path = std::path::PathBuf::from(&cfg.model_path);
        let weights_path = model_path.with_extension("bin");
        let model_name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "movenet_pose".to_string());

        let mut core = Core::new(None).map_err(|e| Error::Backend(e.to_string()))?;
        let mut network = core
            .read_network_from_file(
                &model_path.to_string_lossy(),
                &weights_path.to_string_lossy(),
            )
            .map_err(|e| Error::Backend(format!("reading {}: {e}", model_path.display())))?;

        let input_name = network
            .get_input_name(0)
            .map_err(|e| Error::Backend(e.to_string()))?;
        let output_name = network
            .get_output_name(0)
            .map_err(|e| Error::Backend(e.to_string()))?;
        network
            .set_input_layout(&input_name, Layout::NCHW)
            .map_err(|e| Error::Backend(e.to_string()))?;

        let network = core
            .load_network(&network, "CPU")
            .map_err(|e| Error::Backend(e.to_string()))?;
        info!("movenet backend ready (model {})", model_name);

        Ok(Self {
            network,
            input_name,
            output_name,
            model_name,
            scratchpad: vec![0.0; 3 * INPUT_SIZE * INPUT_SIZE],
        })
    }

    fn load_scratchpad(&mut self, frame: &RgbImage) {
        let resized = image::imageops::resize(
            frame,
            INPUT_SIZE as u32,
            INPUT_SIZE as u32,
            image::imageops::FilterType::Triangle,
        );
        let plane = INPUT_SIZE * INPUT_SIZE;
        for (i, px) in resized.pixels().enumerate() {
            self.scratchpad[i] = px.0[0] as f32;
            self.scratchpad[plane + i] = px.0[1] as f32;
            self.scratchpad[2 * plane + i] = px.0[2] as f32;
        }
    }
}

fn as_bytes(data: &[f32]) -> &[u8] {
    // SAFETY: f32 has no padding and any bit pattern is a valid byte.
    unsafe { std::slice::from_raw_parts(data.as_ptr().cast::<u8>(), std::mem::size_of_val(data)) }
}

impl PoseEstimator for MoveNetEstimator {
    fn estimate(&mut self, frame: &RgbImage) -> Result<Option<PoseResult>> {
        self.load_scratchpad(frame);

        let desc = TensorDesc::new(Layout::NCHW, &[1, 3, INPUT_SIZE, INPUT_SIZE], Precision::FP32);
        let blob =
            Blob::new(&desc, as_bytes(&self.scratchpad)).map_err(|e| Error::Backend(e.to_string()))?;

        let mut request = self
            .network
            .create_infer_request()
            .map_err(|e| Error::Backend(e.to_string()))?;
        request
            .set_blob(&self.input_name, &blob)
            .map_err(|e| Error::Backend(e.to_string()))?;
        request.infer().map_err(|e| Error::Backend(e.to_string()))?;

        let mut prediction = request
            .get_blob(&self.output_name)
            .map_err(|e| Error::Backend(e.to_string()))?;
        let raw = unsafe { prediction.buffer_mut_as_type::<f32>() }
            .map_err(|e| Error::Backend(e.to_string()))?;
        if raw.len() < NUM_COCO_JOINTS * 3 {
            return Err(Error::Backend(format!(
                "unexpected output tensor length {}",
                raw.len()
            )));
        }

        let (w, h) = (frame.width() as f64, frame.height() as f64);
        let mut keypoints = vec![
            Keypoint {
                x: 0.0,
                y: 0.0,
                score: 0.0,
            };
            NUM_LANDMARKS
        ];
        let mut best_score = 0.0f64;
        let mut scored: Vec<Keypoint> = Vec::with_capacity(NUM_COCO_JOINTS);
        for (joint, slot) in COCO_TO_LANDMARK.iter().enumerate() {
            let y = raw[joint * 3] as f64 * h;
            let x = raw[joint * 3 + 1] as f64 * w;
            let score = raw[joint * 3 + 2] as f64;
            let kp = Keypoint { x, y, score };
            keypoints[*slot] = kp;
            scored.push(kp);
            best_score = best_score.max(score);
        }
        if best_score < 0.1 {
            return Ok(None);
        }

        // Bbox and aggregate score come from the real joints only, not the
        // zero-filled landmark slots.
        let enclosing = PoseResult::from_keypoints(scored, frame.width(), frame.height());
        Ok(Some(PoseResult {
            keypoints,
            bbox: enclosing.bbox,
            score: enclosing.score,
        }))
    }

    fn backend_name(&self) -> &str {
        "movenet"
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}
