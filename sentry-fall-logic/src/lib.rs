//! Fall decision logic: per-tick feature extraction and the temporal
//! state machine that turns a feature stream into triggers.

mod features;
mod fsm;

pub use features::{compute_features, MIN_JOINT_SCORE};
pub use fsm::{FallFsm, FsmProbe};
