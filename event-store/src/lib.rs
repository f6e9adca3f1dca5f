//! Event identifiers, the on-disk event layout, and retention enforcement.
//!
//! Events live at `{base}/{camera_id}/{YYYY}/{MM}/{DD}/{event_id}/`. The
//! sweeper deletes directories past the retention age and, under disk
//! pressure, the oldest remaining events until the free-space threshold is
//! met. Every filesystem error during a sweep is non-fatal.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

pub const ISO_FMT: &str = "%Y-%m-%dT%H:%M:%SZ";
const EVENT_ID_TS_FMT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad timestamp: {0}")]
    BadTimestamp(#[from] chrono::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Format a UTC timestamp as `YYYY-MM-DDTHH:MM:SSZ` (whole seconds).
pub fn iso_utc(ts: DateTime<Utc>) -> String {
    ts.format(ISO_FMT).to_string()
}

/// Parse a timestamp written by [`iso_utc`].
pub fn parse_iso_utc(s: &str) -> Result<DateTime<Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(s, ISO_FMT)?;
    Ok(naive.and_utc())
}

/// Mint an event id: `{YYYYMMDDTHHMMSSZ}_{camera_id}_fall_{NNNN}`.
pub fn event_id(camera_id: &str, seq: u32, ts: DateTime<Utc>) -> String {
    format!(
        "{}_{}_fall_{:04}",
        ts.format(EVENT_ID_TS_FMT),
        camera_id,
        seq
    )
}

/// Per-process event sequence, starting at 1.
///
/// Resets on restart; the UTC prefix of the event id disambiguates across
/// process lifetimes.
#[derive(Debug)]
pub struct EventSequence {
    next: u32,
}

impl EventSequence {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn mint(&mut self, camera_id: &str, ts: DateTime<Utc>) -> String {
        let id = event_id(camera_id, self.next, ts);
        self.next += 1;
        id
    }
}

impl Default for EventSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory for one event.
pub fn event_dir(base: &Path, camera_id: &str, ev_id: &str, ts: DateTime<Utc>) -> PathBuf {
    base.join(camera_id)
        .join(ts.format("%Y").to_string())
        .join(ts.format("%m").to_string())
        .join(ts.format("%d").to_string())
        .join(ev_id)
}

fn subdirs(p: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(p) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.push(path);
        }
    }
    out
}

/// All leaf event directories under `base/*/YYYY/MM/DD/*`, sorted by mtime
/// ascending (oldest first).
pub fn list_event_dirs(base: &Path) -> Vec<PathBuf> {
    if !base.exists() {
        return Vec::new();
    }
    let mut events: Vec<(SystemTime, PathBuf)> = Vec::new();
    for camera in subdirs(base) {
        for year in subdirs(&camera) {
            for month in subdirs(&year) {
                for day in subdirs(&month) {
                    for ev in subdirs(&day) {
                        let mtime = std::fs::metadata(&ev)
                            .and_then(|m| m.modified())
                            .unwrap_or(SystemTime::UNIX_EPOCH);
                        events.push((mtime, ev));
                    }
                }
            }
        }
    }
    events.sort_by_key(|(mtime, _)| *mtime);
    events.into_iter().map(|(_, p)| p).collect()
}

fn remove_event_dir(p: &Path) {
    if let Err(e) = std::fs::remove_dir_all(p) {
        warn!("failed to remove event dir {}: {e}", p.display());
    }
}

/// Percentage of free disk space at `path`.
pub fn disk_free_percent(path: &Path) -> std::io::Result<f64> {
    let free = fs2::available_space(path)?;
    let total = fs2::total_space(path)?;
    if total == 0 {
        return Ok(0.0);
    }
    Ok(free as f64 / total as f64 * 100.0)
}

/// Delete events older than `retention_days`, then delete oldest events while
/// free space at `base` is below `min_free_pct`.
pub fn enforce_retention(base: &Path, retention_days: u32, min_free_pct: f64) {
    if !base.exists() {
        return;
    }
    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(retention_days) * 86_400);
    for ev in list_event_dirs(base) {
        match std::fs::metadata(&ev).and_then(|m| m.modified()) {
            Ok(mtime) if mtime < cutoff => {
                debug!("retention: removing expired event {}", ev.display());
                remove_event_dir(&ev);
            }
            _ => {}
        }
    }
    // Under disk pressure, sacrifice the oldest events regardless of age.
    let mut last_removed: Option<PathBuf> = None;
    loop {
        match disk_free_percent(base) {
            Ok(pct) if pct >= min_free_pct => break,
            Err(_) => break,
            Ok(_) => {}
        }
        let events = list_event_dirs(base);
        let Some(oldest) = events.first() else {
            break;
        };
        if last_removed.as_deref() == Some(oldest.as_path()) {
            // The removal did not stick; stop rather than spin on it.
            break;
        }
        debug!("retention: disk pressure, removing {}", oldest.display());
        remove_event_dir(oldest);
        last_removed = Some(oldest.clone());
    }
}
