//! Persistence of completed fall events.
//!
//! A single background worker drains a FIFO of [`CompletedEvent`]s so that
//! image encoding and disk I/O never stall the inference loop. Events are
//! processed in submission order; a failure is logged with its event id and
//! the worker moves on to the next event.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use tracing::{error, info, warn};

use sentry_annotate::FaceDetector;
use sentry_config_data::{ImageFormat, PrivacyConfig, SaverConfig};
use sentry_types::PoseResult;

mod event_json;
pub use event_json::{
    DecisionRecord, EventJson, FramesMeta, ModelMeta, PrivacyMeta, SavedFile, SystemMeta,
};

/// Free-space floor that triggers pressure deletion during retention sweeps.
const MIN_FREE_PCT: f64 = 5.0;
/// Bound on waiting for the worker to drain at shutdown.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("image encode error: {source}")]
    ImageEncode {
        #[from]
        source: image::ImageError,
    },
    #[error("metadata serialize error: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
    #[error("event store error: {source}")]
    EventStore {
        #[from]
        source: event_store::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One frame of an event, with its signed offset from the trigger frame.
#[derive(Clone)]
pub struct FrameToSave {
    pub image: Arc<RgbImage>,
    /// Negative for pre-trigger frames, non-negative for post.
    pub t_rel_ms: i64,
    pub pose: Option<PoseResult>,
}

/// Everything needed to persist one detected fall. Ownership transfers to
/// the saver on submit.
pub struct CompletedEvent {
    pub event_id: String,
    /// Trigger timestamp, `YYYY-MM-DDTHH:MM:SSZ`.
    pub ts_utc: String,
    pub camera_id: String,
    /// Pre then post frames, in capture order.
    pub frames: Vec<FrameToSave>,
    pub decision: DecisionRecord,
    pub model: ModelMeta,
    pub inference_fps: f64,
    pub base_dir: PathBuf,
    pub privacy: PrivacyConfig,
    pub saver: SaverConfig,
    pub host: String,
    pub app_version: String,
    pub git_commit: String,
}

fn write_image(path: &Path, img: &RgbImage, format: ImageFormat, jpeg_quality: u8) -> Result<()> {
    match format {
        ImageFormat::Jpg => {
            let file = std::fs::File::create(path)?;
            let mut writer = std::io::BufWriter::new(file);
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, jpeg_quality);
            encoder.encode_image(img)?;
        }
        ImageFormat::Png => {
            img.save_with_format(path, image::ImageFormat::Png)?;
        }
    }
    Ok(())
}

fn write_clip(ev: &CompletedEvent, out_dir: &Path) -> std::result::Result<(), clip_writer::Error> {
    let first = &ev.frames[0].image;
    let (w, h) = (first.width(), first.height());
    let clip_path = out_dir.join("clip.mp4");
    let mut writer = clip_writer::ClipWriter::create(
        &clip_path,
        w,
        h,
        ev.saver.video_clip.fps,
        &ev.saver.video_clip.codec,
    )?;
    // Clips use the raw pre-blur frames verbatim.
    for frame in &ev.frames {
        writer.write_frame(&frame.image)?;
    }
    writer.finish()?;
    info!("clip saved: {}", clip_path.display());
    Ok(())
}

/// Persist one event: retention sweep, images, optional clip, metadata.
pub fn save_event(ev: &CompletedEvent, face_detector: &dyn FaceDetector) -> Result<()> {
    event_store::enforce_retention(&ev.base_dir, ev.privacy.retention_days, MIN_FREE_PCT);

    let ts = event_store::parse_iso_utc(&ev.ts_utc)?;
    let out_dir = event_store::event_dir(&ev.base_dir, &ev.camera_id, &ev.event_id, ts);
    std::fs::create_dir_all(&out_dir)?;

    let ext = ev.saver.image_format.extension();
    let mut saved_files = Vec::new();
    for frame in &ev.frames {
        let mut img = (*frame.image).clone();
        if ev.privacy.face_blur {
            let faces = face_detector.detect(&img);
            sentry_annotate::face_blur(&mut img, &faces, ev.privacy.blur_kernel);
        }

        // The annotated slot is written for every frame; without a pose it
        // carries the plain (blurred) image.
        let fname_anno = format!("annotated_{}.{ext}", frame.t_rel_ms);
        let annotated = match (&frame.pose, ev.saver.save_annotated) {
            (Some(pose), true) => {
                let mut copy = img.clone();
                sentry_annotate::draw_pose(&mut copy, pose);
                copy
            }
            _ => img.clone(),
        };
        write_image(
            &out_dir.join(&fname_anno),
            &annotated,
            ev.saver.image_format,
            ev.saver.jpeg_quality,
        )?;
        saved_files.push(SavedFile {
            file: fname_anno,
            kind: "annotated".to_string(),
            t_rel_ms: frame.t_rel_ms,
        });

        if ev.saver.save_raw {
            let fname_raw = format!("raw_{}.{ext}", frame.t_rel_ms);
            write_image(
                &out_dir.join(&fname_raw),
                &img,
                ev.saver.image_format,
                ev.saver.jpeg_quality,
            )?;
            saved_files.push(SavedFile {
                file: fname_raw,
                kind: "raw".to_string(),
                t_rel_ms: frame.t_rel_ms,
            });
        }
    }

    if ev.saver.video_clip.enabled && ev.frames.len() >= 2 {
        // A clip is a bonus artifact; failing to encode it must not cost the
        // event its images or metadata.
        if let Err(e) = write_clip(ev, &out_dir) {
            warn!("clip for {} failed: {e}", ev.event_id);
        }
    }

    let doc = EventJson {
        event_id: ev.event_id.clone(),
        camera_id: ev.camera_id.clone(),
        timestamp_utc: ev.ts_utc.clone(),
        model: ev.model.clone(),
        decision: ev.decision.clone(),
        track_id: 0,
        frames: FramesMeta {
            pre_ms: (ev.saver.pre_seconds * 1000.0) as i64,
            post_ms: (ev.saver.post_seconds * 1000.0) as i64,
            inference_fps: ev.inference_fps,
            saved_files,
        },
        privacy: PrivacyMeta {
            face_blur: ev.privacy.face_blur,
            blur_kernel: ev.privacy.blur_kernel,
            redact_metadata: ev.privacy.redact_metadata,
        },
        system: SystemMeta {
            host: if ev.privacy.redact_metadata {
                None
            } else {
                Some(ev.host.clone())
            },
            app_version: ev.app_version.clone(),
            git_commit: ev.git_commit.clone(),
        },
    };
    std::fs::write(out_dir.join("event.json"), doc.render()?)?;
    Ok(())
}

enum Msg {
    Save(Box<CompletedEvent>),
    Finish,
}

/// Background single-consumer save queue.
pub struct SaverWorker {
    tx: crossbeam_channel::Sender<Msg>,
    done_rx: crossbeam_channel::Receiver<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl SaverWorker {
    pub fn new(face_detector: Box<dyn FaceDetector>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Msg>();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let join = std::thread::Builder::new()
            .name("saver".to_string())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        Msg::Save(ev) => match save_event(&ev, face_detector.as_ref()) {
                            Ok(()) => info!("event saved: {}", ev.event_id),
                            Err(e) => error!("event save failed: {}: {e}", ev.event_id),
                        },
                        Msg::Finish => break,
                    }
                }
                let _ = done_tx.send(());
            })
            .expect("spawning saver thread");
        Self {
            tx,
            done_rx,
            join: Some(join),
        }
    }

    /// Enqueue an event. Never blocks the caller.
    pub fn submit(&self, ev: CompletedEvent) {
        if self.tx.send(Msg::Save(Box::new(ev))).is_err() {
            error!("saver queue is gone; dropping event");
        }
    }

    /// Drain everything already queued, then stop the worker. Bounded wait.
    pub fn stop(&mut self) {
        if self.join.is_none() {
            return;
        }
        let _ = self.tx.send(Msg::Finish);
        match self.done_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(()) => {
                if let Some(join) = self.join.take() {
                    let _ = join.join();
                }
            }
            Err(_) => {
                warn!("saver did not drain within {STOP_TIMEOUT:?}; detaching");
                self.join.take();
            }
        }
    }
}

impl Drop for SaverWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
