//! The fall-detector application: wiring, the rate-limited inference loop,
//! and orderly shutdown.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};

use sentry_capture::CaptureThread;
use sentry_config_data::AppConfig;
use sentry_saver::{ModelMeta, SaverWorker};

pub mod collector;
pub mod rate;

#[cfg(feature = "display")]
mod display;

pub use collector::EventCollector;
pub use rate::RateCounter;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes: 0 success, 2 config load failure, 3 camera open failure,
/// 101 pose-backend failure.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const CONFIG: i32 = 2;
    pub const CAMERA: i32 = 3;
    pub const POSE_BACKEND: i32 = 101;
}

#[derive(Parser, Debug)]
#[command(
    name = "sentry-cam",
    version,
    about = "Fall detector (camera -> pose -> decision -> save)"
)]
pub struct CliArgs {
    /// Path to the YAML config file.
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,
    /// Show a preview window with the detection HUD; press 'q' to quit.
    #[arg(long)]
    pub display: bool,
}

/// Load the configured file, falling back to `config.example.yaml`.
fn load_config_with_fallback(path: &Path) -> Result<AppConfig, i32> {
    match sentry_config_data::parse_config_file(path) {
        Ok(cfg) => Ok(cfg),
        Err(e) => {
            let example = Path::new("config.example.yaml");
            if example.exists() {
                match sentry_config_data::parse_config_file(example) {
                    Ok(cfg) => {
                        eprintln!(
                            "WARN: failed to load '{}'; using '{}'. Error: {e}",
                            path.display(),
                            example.display()
                        );
                        Ok(cfg)
                    }
                    Err(e2) => {
                        eprintln!("ERROR: failed to load fallback config: {e2}");
                        Err(exit_code::CONFIG)
                    }
                }
            } else {
                eprintln!("ERROR: failed to load config '{}': {e}", path.display());
                Err(exit_code::CONFIG)
            }
        }
    }
}

/// Resolve the log file target: a path ending in a separator (or naming an
/// existing directory) gets `app.log` inside it.
fn resolve_log_path(file: &str) -> PathBuf {
    let path = PathBuf::from(file);
    if file.ends_with('/') || file.ends_with('\\') || path.is_dir() {
        path.join("app.log")
    } else {
        path
    }
}

fn init_logging(cfg: &sentry_config_data::LoggingConfig) {
    use tracing_subscriber::{
        fmt::{self, format, time},
        prelude::*,
        EnvFilter,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.level.to_lowercase()));
    let evt_fmt = format().with_timer(time::Uptime::default()).compact();
    let stdout_layer = fmt::layer().event_format(evt_fmt);
    let registry = tracing_subscriber::registry().with(stdout_layer).with(filter);

    if cfg.file.is_empty() {
        registry.init();
        return;
    }
    let path = resolve_log_path(&cfg.file);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            eprintln!("Logging to file: {}", path.display());
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
                .init();
        }
        Err(e) => {
            eprintln!(
                "WARN: failed to open log file '{}': {e}. Falling back to stdout only.",
                path.display()
            );
            registry.init();
        }
    }
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

pub fn run_app(args: CliArgs) -> i32 {
    let cfg = match load_config_with_fallback(&args.config) {
        Ok(cfg) => cfg,
        Err(code) => return code,
    };
    init_logging(&cfg.logging);
    if cfg.logging.export_prometheus {
        warn!("logging.export_prometheus is set but no exporter is wired");
    }

    info!(
        "starting fall detector {APP_VERSION} (config={})",
        args.config.display()
    );

    let ring_seconds = (cfg.saver.pre_seconds + cfg.saver.post_seconds + 2.0).max(6.0);
    let mut capture = match CaptureThread::start(&cfg.camera, ring_seconds) {
        Ok(capture) => capture,
        Err(e) => {
            error!("camera open failed for source '{}': {e}", cfg.camera.source);
            error!("check camera.source in the config (e.g. '0', an RTSP URL, or a video file)");
            return exit_code::CAMERA;
        }
    };

    let mut estimator = match sentry_pose::build_estimator(&cfg.model) {
        Ok(estimator) => estimator,
        Err(e) => {
            error!("pose backend '{}' failed to initialize: {e}", cfg.model.backend);
            capture.stop();
            return exit_code::POSE_BACKEND;
        }
    };
    let model = ModelMeta {
        backend: estimator.backend_name().to_string(),
        model_name: estimator.model_name(),
        model_version: estimator.model_version(),
        num_threads: cfg.model.num_threads,
    };

    let mut saver = SaverWorker::new(Box::new(sentry_annotate::NullFaceDetector));
    let mut collector = EventCollector::new(
        cfg.clone(),
        model,
        host_name(),
        APP_VERSION.to_string(),
        std::env::var("GIT_COMMIT").unwrap_or_default(),
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            running.store(false, Ordering::Relaxed);
        }) {
            warn!("could not install signal handler: {e}");
        }
    }

    #[cfg(feature = "display")]
    let mut preview = if args.display {
        match display::Preview::open(cfg.camera.width, cfg.camera.height) {
            Ok(preview) => Some(preview),
            Err(e) => {
                warn!("preview window unavailable: {e}");
                None
            }
        }
    } else {
        None
    };
    #[cfg(not(feature = "display"))]
    if args.display {
        warn!("built without the 'display' feature; ignoring --display");
    }

    let infer_interval = Duration::from_secs_f64(1.0 / f64::from(cfg.camera.inference_fps.max(1)));
    let mut next_infer_time = Instant::now();
    let mut rate = RateCounter::new(Instant::now());

    while running.load(Ordering::Relaxed) {
        let Some(rec) = capture.latest() else {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        };

        // Pace inference, independent of the camera rate.
        let now = Instant::now();
        if now < next_infer_time {
            std::thread::sleep(next_infer_time - now);
        }
        next_infer_time = Instant::now() + infer_interval;

        let pose = match estimator.estimate(&rec.image) {
            Ok(pose) => pose,
            Err(e) => {
                // Hot-path failures degrade to a skipped tick.
                warn!("pose estimation failed: {e}");
                None
            }
        };
        let now = Instant::now();
        let infer_fps = rate.tick(now);

        if let Some(event) = collector.tick(&rec, pose.clone(), now) {
            info!("event queued: {} (frames={})", event.event_id, event.frames.len());
            saver.submit(event);
        }

        #[cfg(feature = "display")]
        if let Some(preview) = preview.as_mut() {
            let probe = collector.probe(now);
            match preview.show(&rec.image, pose.as_ref(), &probe, infer_fps) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("preview failed, disabling: {e}");
                    break;
                }
            }
        }
        #[cfg(not(feature = "display"))]
        let _ = infer_fps;
    }

    // In-flight collecting events are dropped deliberately: a partial event
    // lacks its post window and would be misleading on disk.
    if collector.is_collecting() {
        warn!("shutdown during event collection; dropping the partial event");
    }
    info!("shutting down");
    saver.stop();
    capture.stop();
    exit_code::OK
}
