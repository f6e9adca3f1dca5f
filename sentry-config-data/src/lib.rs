//! Application configuration, loaded from a YAML file.
//!
//! Every field has a default so a partial (or empty) config file is valid.
//! `saver.base_dir` and `logging.file` may contain shell variables such as
//! `~`, `$A`, or `${B}`.

use serde::{Deserialize, Serialize};

pub use sentry_types::DetectionConfig;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("YAML deserialization error: {source}")]
    YamlDe {
        #[from]
        source: serde_yaml::Error,
    },
    #[error("lookup error on variable: {source}")]
    ShellExpandLookupVar {
        #[from]
        source: shellexpand::LookupError<std::env::VarError>,
    },
}

type Result<T> = std::result::Result<T, Error>;

fn default_source() -> String {
    "0".to_string()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_fps() -> u32 {
    30
}
fn default_inference_fps() -> u32 {
    12
}
fn default_camera_id() -> String {
    "cam01".to_string()
}

// Config files may give the source as a bare integer index.
fn de_source<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SourceRepr {
        Int(i64),
        Str(String),
    }
    Ok(match SourceRepr::deserialize(de)? {
        SourceRepr::Int(i) => i.to_string(),
        SourceRepr::Str(s) => s,
    })
}

/// Camera source and rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    /// Device index (0 or "0"), URL ("rtsp://..."), or video file path.
    /// Strings that are all digits are promoted to device indices.
    #[serde(default = "default_source", deserialize_with = "de_source")]
    pub source: String,
    /// Requested capture width. Best-effort hint.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Requested capture height. Best-effort hint.
    #[serde(default = "default_height")]
    pub height: u32,
    /// Capture rate of the ring buffer.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Rate at which pose inference samples the latest frame.
    #[serde(default = "default_inference_fps")]
    pub inference_fps: u32,
    #[serde(default = "default_camera_id")]
    pub camera_id: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            inference_fps: default_inference_fps(),
            camera_id: default_camera_id(),
        }
    }
}

fn default_backend() -> String {
    "movenet".to_string()
}
fn default_num_threads() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Pose backend name. Unknown names are a fatal startup error.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub model_path: String,
    #[serde(default = "default_num_threads")]
    pub num_threads: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model_path: String::new(),
            num_threads: default_num_threads(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_clip_fps() -> u32 {
    15
}
fn default_clip_max_seconds() -> f64 {
    6.0
}
fn default_codec() -> String {
    "mp4v".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoClipConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_clip_fps")]
    pub fps: u32,
    #[serde(default = "default_clip_max_seconds")]
    pub max_seconds: f64,
    /// FOURCC-style codec name, mapped to an encoder by the clip writer.
    #[serde(default = "default_codec")]
    pub codec: String,
}

impl Default for VideoClipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: default_clip_fps(),
            max_seconds: default_clip_max_seconds(),
            codec: default_codec(),
        }
    }
}

fn default_base_dir() -> String {
    "./falls".to_string()
}
fn default_pre_seconds() -> f64 {
    2.0
}
fn default_post_seconds() -> f64 {
    3.0
}
fn default_image_format() -> ImageFormat {
    ImageFormat::Jpg
}
fn default_jpeg_quality() -> u8 {
    90
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpg,
    Png,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaverConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    #[serde(default = "default_true")]
    pub save_annotated: bool,
    #[serde(default)]
    pub save_raw: bool,
    /// Seconds of context kept before a trigger.
    #[serde(default = "default_pre_seconds")]
    pub pre_seconds: f64,
    /// Seconds of context collected after a trigger.
    #[serde(default = "default_post_seconds")]
    pub post_seconds: f64,
    #[serde(default = "default_image_format")]
    pub image_format: ImageFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default)]
    pub video_clip: VideoClipConfig,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            save_annotated: true,
            save_raw: false,
            pre_seconds: default_pre_seconds(),
            post_seconds: default_post_seconds(),
            image_format: default_image_format(),
            jpeg_quality: default_jpeg_quality(),
            video_clip: VideoClipConfig::default(),
        }
    }
}

fn default_blur_kernel() -> u32 {
    31
}
fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrivacyConfig {
    #[serde(default = "default_true")]
    pub face_blur: bool,
    /// Gaussian kernel size; forced odd and >= 3 when applied.
    #[serde(default = "default_blur_kernel")]
    pub blur_kernel: u32,
    /// Accepted for config compatibility; not implemented.
    #[serde(default)]
    pub encrypt_at_rest: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Remove `system.host` from event metadata before writing.
    #[serde(default = "default_true")]
    pub redact_metadata: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            face_blur: true,
            blur_kernel: default_blur_kernel(),
            encrypt_at_rest: false,
            retention_days: default_retention_days(),
            redact_metadata: true,
        }
    }
}

fn default_log_level() -> String {
    "INFO".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path. Empty disables file logging. A path ending in a
    /// separator is treated as a directory and `app.log` is written inside.
    #[serde(default)]
    pub file: String,
    /// Accepted for config compatibility; no exporter is wired.
    #[serde(default)]
    pub export_prometheus: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
            export_prometheus: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub saver: SaverConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    fn expand_paths(&mut self) -> Result<()> {
        self.saver.base_dir = shellexpand::full(&self.saver.base_dir)?.to_string();
        if !self.logging.file.is_empty() {
            self.logging.file = shellexpand::full(&self.logging.file)?.to_string();
        }
        Ok(())
    }
}

/// Load and validate a config file.
pub fn parse_config_file<P: AsRef<std::path::Path>>(fname: P) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(fname.as_ref())?;
    let mut cfg: AppConfig = serde_yaml::from_str(&contents)?;
    cfg.expand_paths()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_mapping_gives_defaults() {
        let cfg: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.camera.inference_fps, 12);
        assert_eq!(cfg.detection.angle_deg_th, 55.0);
        assert_eq!(cfg.saver.image_format, ImageFormat::Jpg);
        assert_eq!(cfg.privacy.blur_kernel, 31);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let text = "camera:\n  source: \"rtsp://example/stream\"\n  inference_fps: 10\nsaver:\n  video_clip:\n    enabled: false\n";
        let cfg: AppConfig = serde_yaml::from_str(text).unwrap();
        assert_eq!(cfg.camera.source, "rtsp://example/stream");
        assert_eq!(cfg.camera.inference_fps, 10);
        assert_eq!(cfg.camera.fps, 30);
        assert!(!cfg.saver.video_clip.enabled);
        assert_eq!(cfg.saver.video_clip.fps, 15);
    }

    #[test]
    fn integer_source_is_accepted() {
        let cfg: AppConfig = serde_yaml::from_str("camera:\n  source: 2\n").unwrap();
        assert_eq!(cfg.camera.source, "2");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = "camera:\n  sourc: \"0\"\n";
        assert!(serde_yaml::from_str::<AppConfig>(text).is_err());
    }

    #[test]
    fn parse_file_expands_base_dir() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::env::set_var("SENTRY_TEST_BASE", "/data/falls");
        writeln!(f, "saver:\n  base_dir: \"$SENTRY_TEST_BASE/cam\"").unwrap();
        let cfg = parse_config_file(f.path()).unwrap();
        assert_eq!(cfg.saver.base_dir, "/data/falls/cam");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(parse_config_file("/no/such/config.yaml").is_err());
    }
}
