//! The event collector: rolling pre-trigger history, trigger handling, and
//! post-trigger frame assembly.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::Utc;
use tracing::info;

use event_store::EventSequence;
use sentry_capture::FrameRecord;
use sentry_config_data::AppConfig;
use sentry_fall_logic::{FallFsm, FsmProbe};
use sentry_saver::{CompletedEvent, DecisionRecord, FrameToSave, ModelMeta};
use sentry_types::PoseResult;

type HistEntry = (FrameRecord, Option<PoseResult>);

struct Collecting {
    event_id: String,
    ts_utc: String,
    trigger_index: u64,
    pre: Vec<HistEntry>,
    frames: Vec<HistEntry>,
    need_post: usize,
    decision: DecisionRecord,
}

/// Owns the per-tick decision flow between capture and the saver.
pub struct EventCollector {
    cfg: AppConfig,
    model: ModelMeta,
    host: String,
    app_version: String,
    git_commit: String,
    infer_fps: f64,
    fsm: FallFsm,
    /// Rolling `(frame, pose)` history at inference rate, for pre-trigger
    /// context. Distinct from the capture ring, which runs at camera rate.
    hist: VecDeque<HistEntry>,
    hist_cap: usize,
    collecting: Option<Collecting>,
    seq: EventSequence,
}

impl EventCollector {
    pub fn new(
        cfg: AppConfig,
        model: ModelMeta,
        host: String,
        app_version: String,
        git_commit: String,
    ) -> Self {
        let infer_fps = f64::from(cfg.camera.inference_fps.max(1));
        let hist_cap = (cfg.saver.pre_seconds * infer_fps * 2.0) as usize + 20;
        let fsm = FallFsm::new(cfg.detection.clone(), infer_fps);
        Self {
            cfg,
            model,
            host,
            app_version,
            git_commit,
            infer_fps,
            fsm,
            hist: VecDeque::with_capacity(hist_cap),
            hist_cap,
            collecting: None,
            seq: EventSequence::new(),
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.is_some()
    }

    pub fn probe(&self, now: Instant) -> FsmProbe {
        self.fsm.probe(now)
    }

    fn push_hist(&mut self, entry: HistEntry) {
        while self.hist.len() >= self.hist_cap {
            self.hist.pop_front();
        }
        self.hist.push_back(entry);
    }

    /// One inference tick. Returns a finished event when the post-trigger
    /// window completes.
    pub fn tick(
        &mut self,
        rec: &FrameRecord,
        pose: Option<PoseResult>,
        now: Instant,
    ) -> Option<CompletedEvent> {
        self.push_hist((rec.clone(), pose.clone()));

        if let Some(col) = self.collecting.as_mut() {
            col.frames.push((rec.clone(), pose));
            if col.frames.len() >= col.need_post {
                let col = self.collecting.take().expect("collecting checked above");
                return Some(self.finalize(col));
            }
            return None;
        }

        // The FSM only sees ticks with a pose; absence of evidence is not
        // evidence of stillness.
        let Some(pose) = pose else {
            return None;
        };
        let (fired, snapshot) = self.fsm.update_at(Some(&pose), now);
        if fired {
            let snapshot = snapshot.expect("trigger carries a snapshot");
            let event_id = self.seq.mint(&self.cfg.camera.camera_id, Utc::now());
            let need_pre = (self.cfg.saver.pre_seconds * self.infer_fps) as usize;
            let pre_start = self.hist.len().saturating_sub(need_pre);
            let pre: Vec<HistEntry> = self.hist.iter().skip(pre_start).cloned().collect();
            info!("fall detected, collecting post window (event {event_id})");
            self.collecting = Some(Collecting {
                event_id,
                ts_utc: event_store::iso_utc(rec.ts_utc),
                trigger_index: rec.index,
                pre,
                frames: Vec::new(),
                need_post: (self.cfg.saver.post_seconds * self.infer_fps) as usize,
                decision: DecisionRecord::freeze(&self.cfg.detection, snapshot),
            });
        }
        None
    }

    fn finalize(&self, col: Collecting) -> CompletedEvent {
        let ms_per_tick = 1000.0 / self.infer_fps.max(1.0);
        let frames: Vec<FrameToSave> = col
            .pre
            .iter()
            .chain(col.frames.iter())
            .map(|(fr, pose)| FrameToSave {
                image: fr.image.clone(),
                t_rel_ms: ((fr.index as i64 - col.trigger_index as i64) as f64 * ms_per_tick)
                    .round() as i64,
                pose: pose.clone(),
            })
            .collect();
        CompletedEvent {
            event_id: col.event_id,
            ts_utc: col.ts_utc,
            camera_id: self.cfg.camera.camera_id.clone(),
            frames,
            decision: col.decision,
            model: self.model.clone(),
            inference_fps: self.infer_fps,
            base_dir: self.cfg.saver.base_dir.clone().into(),
            privacy: self.cfg.privacy.clone(),
            saver: self.cfg.saver.clone(),
            host: self.host.clone(),
            app_version: self.app_version.clone(),
            git_commit: self.git_commit.clone(),
        }
    }
}
