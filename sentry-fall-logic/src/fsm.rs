//! The fall decision state machine.
//!
//! Four predicates are evaluated over sliding windows of the feature
//! history, with `N_X = floor(T_X × infer_fps)`:
//!
//! - A: collapsed posture (`theta > angle_th` or `ratio < ratio_th`) on every
//!   one of the last `N_pose` entries.
//! - B: rapid hip drop; current hip y minus the minimum of the prior entries
//!   in the last `N_drop + 1`, exceeding the pixel threshold.
//! - C: post-drop stillness; the 80th percentile of absolute hip-y first
//!   differences stays under `1.2 × v_still` and at least 70% of the
//!   differences are under `v_still`. A percentile plus a fraction tolerates
//!   a single twitch while demanding that most of the window is quiet.
//! - D: the person bbox is at least `min_person_height_px` tall.
//!
//! B is an impulse and C is a state that needs time to develop, so A∧B∧D
//! latches an `AwaitStill` phase and C gets `T_still + C_grace` to confirm
//! before the machine gives up.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use sentry_types::{DetectionConfig, Features, PoseResult, TriggerSnapshot};

use crate::features::compute_features;

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    AwaitStill {
        /// Feature ticks observed since A∧B∧D first held. A counter rather
        /// than a history-length difference: the bounded history saturates,
        /// and a length difference would stop growing with it.
        since: usize,
        deadline: Instant,
        theta_max: f64,
        ratio_min: f64,
        hip_drop: f64,
    },
}

/// Read-only predicate evaluation for diagnostics overlays.
#[derive(Debug, Clone, Copy)]
pub struct FsmProbe {
    pub a: bool,
    pub b: bool,
    pub c: bool,
    pub d: bool,
    pub theta: f64,
    pub ratio: f64,
    pub hip_drop: f64,
    pub state: &'static str,
    pub cooldown_left: f64,
    pub still_wait: f64,
}

pub struct FallFsm {
    cfg: DetectionConfig,
    infer_fps: f64,
    history: VecDeque<Features>,
    capacity: usize,
    state: State,
    cooldown_until: Option<Instant>,
}

impl FallFsm {
    pub fn new(cfg: DetectionConfig, inference_fps: f64) -> Self {
        let capacity = ((cfg.t_pose_sec + cfg.t_still_sec + cfg.t_drop_sec) * inference_fps + 5.0)
            .max(3.0) as usize;
        Self {
            cfg,
            infer_fps: inference_fps,
            history: VecDeque::with_capacity(capacity),
            capacity,
            state: State::Idle,
            cooldown_until: None,
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn cooldown_remaining(&self, now: Instant) -> f64 {
        match self.cooldown_until {
            Some(t) if t > now => (t - now).as_secs_f64(),
            _ => 0.0,
        }
    }

    fn push(&mut self, ft: Features) {
        while self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(ft);
    }

    fn fps(&self) -> f64 {
        self.infer_fps.max(1.0)
    }

    fn n_of(&self, seconds: f64) -> usize {
        (seconds * self.fps()) as usize
    }

    fn predicate_a(&self) -> bool {
        let n_pose = self.n_of(self.cfg.t_pose_sec);
        self.history.len() >= n_pose
            && self
                .history
                .iter()
                .rev()
                .take(n_pose)
                .all(|f| f.theta > self.cfg.angle_deg_th || f.ratio < self.cfg.ratio_th)
    }

    /// Returns `(B, hip_drop)`. The drop is current-minus-minimum-of-prior,
    /// so a motionless subject yields 0 and it is never negative.
    fn predicate_b(&self) -> (bool, f64) {
        let len = self.history.len();
        if len < 2 {
            return (false, 0.0);
        }
        let n_drop = self.n_of(self.cfg.t_drop_sec);
        let window_len = (n_drop + 1).min(len).max(2);
        let cur = self.history.back().expect("history non-empty");
        let prior_min = self
            .history
            .iter()
            .skip(len - window_len)
            .take(window_len - 1)
            .map(|f| f.hip_y)
            .fold(f64::INFINITY, f64::min);
        let hip_drop = cur.hip_y - prior_min;
        (hip_drop > self.cfg.hip_drop_px_th as f64, hip_drop)
    }

    fn predicate_d(&self) -> bool {
        self.history
            .back()
            .map(|f| f.h_person >= self.cfg.min_person_height_px)
            .unwrap_or(false)
    }

    /// Stillness over the last `seg_len` history entries: `(C, q80)`.
    /// Trivially true when there are no differences to inspect.
    fn stillness(&self, seg_len: usize) -> (bool, f64) {
        let len = self.history.len();
        let seg: Vec<f64> = self
            .history
            .iter()
            .skip(len.saturating_sub(seg_len))
            .map(|f| f.hip_y)
            .collect();
        let diffs: Vec<f64> = seg.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
        if diffs.is_empty() {
            return (true, 0.0);
        }
        let q80 = percentile_80(&diffs);
        let frac_ok = diffs
            .iter()
            .filter(|d| **d <= self.cfg.v_still_px_per_frame)
            .count() as f64
            / diffs.len() as f64;
        let c = q80 < self.cfg.v_still_px_per_frame * 1.2 && frac_ok >= 0.7;
        (c, q80)
    }

    /// Advance one tick using the wall clock.
    pub fn update(&mut self, pose: Option<&PoseResult>) -> (bool, Option<TriggerSnapshot>) {
        self.update_at(pose, Instant::now())
    }

    /// Advance one tick at an explicit instant. Deterministic given the same
    /// pose stream and instants, which lets recorded sequences be replayed
    /// offline.
    pub fn update_at(
        &mut self,
        pose: Option<&PoseResult>,
        now: Instant,
    ) -> (bool, Option<TriggerSnapshot>) {
        if let Some(until) = self.cooldown_until {
            if now < until {
                // Cooling down: keep the history warm but never evaluate.
                if let Some(pose) = pose {
                    if let Some(ft) = compute_features(pose) {
                        self.push(ft);
                    }
                }
                return (false, None);
            }
        }

        let Some(pose) = pose else {
            return (false, None);
        };
        let Some(ft) = compute_features(pose) else {
            return (false, None);
        };
        self.push(ft);

        let a = self.predicate_a();
        let (b, hip_drop) = self.predicate_b();
        let d = self.predicate_d();
        let n_still = self.n_of(self.cfg.t_still_sec);

        match self.state {
            State::Idle => {
                if a && b && d {
                    self.state = State::AwaitStill {
                        since: 0,
                        deadline: now
                            + Duration::from_secs_f64(self.cfg.t_still_sec + self.cfg.c_grace_sec),
                        theta_max: self
                            .history
                            .iter()
                            .map(|f| f.theta)
                            .fold(f64::NEG_INFINITY, f64::max),
                        ratio_min: self
                            .history
                            .iter()
                            .map(|f| f.ratio)
                            .fold(f64::INFINITY, f64::min),
                        hip_drop,
                    };
                    debug!("posture+drop latched (hip_drop={hip_drop:.1}px); awaiting stillness");
                    // No trigger on the transition tick.
                }
                (false, None)
            }
            State::AwaitStill {
                since,
                deadline,
                theta_max,
                ratio_min,
                hip_drop: latched_drop,
            } => {
                let since = since + 1; // this tick appended a feature
                if since >= n_still {
                    let (c, still_score) = self.stillness((n_still + 1).min(since));
                    if c && d {
                        self.cooldown_until =
                            Some(now + Duration::from_secs_f64(self.cfg.cooldown_sec));
                        self.state = State::Idle;
                        return (
                            true,
                            Some(TriggerSnapshot {
                                theta_max,
                                ratio_min,
                                hip_drop: latched_drop,
                                still_score,
                            }),
                        );
                    }
                }
                if now > deadline {
                    debug!("stillness not confirmed before the deadline; back to idle");
                    self.state = State::Idle;
                } else {
                    self.state = State::AwaitStill {
                        since,
                        deadline,
                        theta_max,
                        ratio_min,
                        hip_drop: latched_drop,
                    };
                }
                (false, None)
            }
        }
    }

    /// Evaluate the predicates without mutating anything, for the HUD.
    pub fn probe(&self, now: Instant) -> FsmProbe {
        let n_still = self.n_of(self.cfg.t_still_sec);
        let (b, hip_drop) = self.predicate_b();
        let (c, _q80) = if self.history.len() >= n_still + 1 {
            self.stillness(n_still + 1)
        } else {
            (false, 0.0)
        };
        let last = self.history.back();
        let (state, still_wait) = match self.state {
            State::Idle => ("idle", 0.0),
            State::AwaitStill { deadline, .. } => (
                "await_still",
                if deadline > now {
                    (deadline - now).as_secs_f64()
                } else {
                    0.0
                },
            ),
        };
        FsmProbe {
            a: self.predicate_a(),
            b,
            c,
            d: self.predicate_d(),
            theta: last.map(|f| f.theta).unwrap_or(0.0),
            ratio: last.map(|f| f.ratio).unwrap_or(0.0),
            hip_drop,
            state,
            cooldown_left: self.cooldown_remaining(now),
            still_wait,
        }
    }
}

/// 80th percentile with linear interpolation between closest ranks.
pub(crate) fn percentile_80(values: &[f64]) -> f64 {
    debug_assert!(!values.is_empty());
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN feature values"));
    let rank = 0.8 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let frac = rank - lo as f64;
    if lo + 1 < sorted.len() {
        sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
    } else {
        sorted[lo]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_single_value() {
        assert_eq!(percentile_80(&[2.5]), 2.5);
    }

    #[test]
    fn percentile_interpolates() {
        // rank = 0.8 * 4 = 3.2 -> 4.0 + 0.2 * (5.0 - 4.0)
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile_80(&v) - 4.2).abs() < 1e-12);
    }

    #[test]
    fn percentile_is_order_independent() {
        let v = [5.0, 1.0, 3.0, 2.0, 4.0];
        assert!((percentile_80(&v) - 4.2).abs() < 1e-12);
    }
}
