//! The pose estimator contract and backend registry.
//!
//! A backend maps one RGB frame to at most one [`PoseResult`]. Estimators are
//! synchronous and confined to the inference loop; they must not keep hidden
//! global state that would prevent multiple process instances.

use image::RgbImage;

use sentry_config_data::ModelConfig;
use sentry_types::PoseResult;

#[cfg(feature = "openvino-backend")]
mod movenet;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown pose backend '{0}'")]
    UnknownBackend(String),
    #[error("pose backend '{0}' not compiled in (rebuild with the matching feature)")]
    BackendUnavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Synchronous single-frame pose estimation.
pub trait PoseEstimator: Send {
    /// `Ok(None)` means no person was found in the frame.
    fn estimate(&mut self, frame: &RgbImage) -> Result<Option<PoseResult>>;

    /// Backend name as selected in the configuration.
    fn backend_name(&self) -> &str;

    /// Model identity for event metadata.
    fn model_name(&self) -> String;

    fn model_version(&self) -> String {
        String::new()
    }
}

/// Construct the configured backend.
///
/// Unknown backend names are a fatal startup error; the caller maps this to
/// exit code 101.
pub fn build_estimator(cfg: &ModelConfig) -> Result<Box<dyn PoseEstimator>> {
    tracing::debug!("building pose backend '{}'", cfg.backend);
    match cfg.backend.as_str() {
        "movenet" => {
            #[cfg(feature = "openvino-backend")]
            {
                Ok(Box::new(movenet::MoveNetEstimator::new(cfg)?))
            }
            #[cfg(not(feature = "openvino-backend"))]
            {
                Err(Error::BackendUnavailable(cfg.backend.clone()))
            }
        }
        other => Err(Error::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        let cfg = ModelConfig {
            backend: "definitely-not-a-backend".to_string(),
            ..Default::default()
        };
        match build_estimator(&cfg) {
            Err(Error::UnknownBackend(name)) => {
                assert_eq!(name, "definitely-not-a-backend")
            }
            Ok(_) => panic!("expected UnknownBackend, got Ok"),
            Err(e) => panic!("expected UnknownBackend, got {e:?}"),
        }
    }
}
