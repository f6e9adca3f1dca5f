//! Camera capture: a producer thread feeding a bounded frame ring.
//!
//! The ring holds `camera_fps × ring_seconds` frames so the event collector
//! can reach back for pre-trigger context at full camera rate, independent of
//! the (slower) inference cadence. One thread produces; the consumer only
//! ever observes the latest element. Frame buffers are reference-counted and
//! immutable after capture, so a snapshot stays valid while the ring churns.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::RgbImage;
use tracing::{debug, warn};

use sentry_config_data::CameraConfig;

mod ffmpeg_source;
pub use ffmpeg_source::FfmpegSource;

/// Backoff after a failed device read.
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(300);
/// Bound on waiting for the capture thread to wind down.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to open camera source '{source_desc}': {msg}")]
    OpenFailed { source_desc: String, msg: String },
    #[error("device sources are not supported on this platform")]
    UnsupportedPlatform,
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One captured frame. Read-only after production.
#[derive(Clone)]
pub struct FrameRecord {
    pub ts_utc: DateTime<Utc>,
    pub image: Arc<RgbImage>,
    /// Process-wide monotone counter of successfully captured frames.
    pub index: u64,
}

impl std::fmt::Debug for FrameRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRecord")
            .field("ts_utc", &self.ts_utc)
            .field("index", &self.index)
            .field("dims", &(self.image.width(), self.image.height()))
            .finish()
    }
}

/// A camera source. `read_frame` blocks for the next frame; `None` means the
/// read failed and the caller should back off and retry.
pub trait VideoSource: Send {
    fn read_frame(&mut self) -> Option<RgbImage>;
    fn release(&mut self) {}
}

/// Unblocks a [`VideoSource`] stuck in `read_frame` during shutdown.
pub trait SourceKiller: Send {
    fn kill(&self);
}

/// How a configured source string is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Local capture device index.
    Device(u32),
    /// URL or file path.
    Uri(String),
}

/// All-digit strings are promoted to device indices.
pub fn parse_source(s: &str) -> SourceKind {
    let trimmed = s.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = trimmed.parse::<u32>() {
            return SourceKind::Device(n);
        }
    }
    SourceKind::Uri(trimmed.to_string())
}

/// Bounded FIFO of [`FrameRecord`]; oldest evicted on overflow.
pub struct CaptureRing {
    inner: Mutex<VecDeque<FrameRecord>>,
    capacity: usize,
}

impl CaptureRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, rec: FrameRecord) {
        let mut guard = self.inner.lock().unwrap();
        while guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(rec);
    }

    /// Snapshot of the most recent frame. Cheap: the image is an `Arc`.
    pub fn latest(&self) -> Option<FrameRecord> {
        self.inner.lock().unwrap().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The capture producer.
pub struct CaptureThread {
    ring: Arc<CaptureRing>,
    stop_flag: Arc<AtomicBool>,
    done_rx: crossbeam_channel::Receiver<()>,
    join: Option<std::thread::JoinHandle<()>>,
    killer: Option<Box<dyn SourceKiller>>,
}

impl CaptureThread {
    /// Open the configured source and start capturing. A failed open is a
    /// fatal initialization error.
    pub fn start(cfg: &CameraConfig, ring_seconds: f64) -> Result<Self> {
        let source = FfmpegSource::open(cfg)?;
        let killer: Box<dyn SourceKiller> = Box::new(source.killer());
        Ok(Self::start_with_source(
            source,
            cfg.fps,
            ring_seconds,
            Some(killer),
        ))
    }

    /// Start capturing from an already-open source. Used directly by tests
    /// with synthetic sources.
    pub fn start_with_source<S: VideoSource + 'static>(
        mut source: S,
        fps: u32,
        ring_seconds: f64,
        killer: Option<Box<dyn SourceKiller>>,
    ) -> Self {
        let capacity = (f64::from(fps.max(1)) * ring_seconds).ceil() as usize;
        let ring = Arc::new(CaptureRing::new(capacity));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_ring = ring.clone();
        let thread_stop = stop_flag.clone();
        let target_delay = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let mut index: u64 = 0;
                while !thread_stop.load(Ordering::Relaxed) {
                    let t_start = Instant::now();
                    let Some(image) = source.read_frame() else {
                        if thread_stop.load(Ordering::Relaxed) {
                            break;
                        }
                        debug!("frame read failed, backing off");
                        std::thread::sleep(READ_RETRY_BACKOFF);
                        continue;
                    };
                    index += 1;
                    thread_ring.push(FrameRecord {
                        ts_utc: Utc::now(),
                        image: Arc::new(image),
                        index,
                    });
                    // Pace toward the camera frame interval.
                    let elapsed = t_start.elapsed();
                    if elapsed < target_delay {
                        std::thread::sleep(target_delay - elapsed);
                    }
                }
                source.release();
                let _ = done_tx.send(());
            })
            .expect("spawning capture thread");

        Self {
            ring,
            stop_flag,
            done_rx,
            join: Some(join),
            killer,
        }
    }

    pub fn ring(&self) -> Arc<CaptureRing> {
        self.ring.clone()
    }

    pub fn latest(&self) -> Option<FrameRecord> {
        self.ring.latest()
    }

    /// Signal termination and join with a bounded wait.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(killer) = self.killer.take() {
            killer.kill();
        }
        match self.done_rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) => {
                if let Some(join) = self.join.take() {
                    let _ = join.join();
                }
            }
            Err(_) => {
                warn!("capture thread did not stop within {JOIN_TIMEOUT:?}; detaching");
                self.join.take();
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.stop();
        }
    }
}
