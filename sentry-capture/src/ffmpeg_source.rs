//! Video input by piping raw frames out of an ffmpeg child process.
//!
//! One ffmpeg invocation handles every source kind the config accepts:
//! device indices (v4l2), network URLs, and video files. Output is forced to
//! rgb24 at the configured geometry so frames can be sliced straight off the
//! pipe.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use image::RgbImage;
use tracing::debug;

use sentry_config_data::CameraConfig;

use crate::{parse_source, Error, Result, SourceKind, SourceKiller, VideoSource};

const STDERR_TAIL_LINES: usize = 20;

pub struct FfmpegSource {
    child: Arc<Mutex<Child>>,
    stdout: BufReader<ChildStdout>,
    stderr_tail: Arc<Mutex<Vec<String>>>,
    width: u32,
    height: u32,
    /// First frame, read at open time to prove the source works.
    probe: Option<RgbImage>,
}

/// Kills the ffmpeg child so a blocked pipe read returns during shutdown.
pub struct FfmpegKiller {
    child: Arc<Mutex<Child>>,
}

impl SourceKiller for FfmpegKiller {
    fn kill(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }
}

fn zq(x: &[&str]) -> Vec<String> {
    x.iter().map(|s| String::from(*s)).collect()
}

fn input_args(kind: &SourceKind, cfg: &CameraConfig) -> Result<Vec<String>> {
    let mut args = Vec::new();
    match kind {
        SourceKind::Device(n) => {
            if !cfg!(target_os = "linux") {
                return Err(Error::UnsupportedPlatform);
            }
            args.extend(zq(&["-f", "v4l2", "-framerate"]));
            args.push(cfg.fps.to_string());
            args.push("-video_size".to_string());
            args.push(format!("{}x{}", cfg.width, cfg.height));
            args.push("-i".to_string());
            args.push(format!("/dev/video{n}"));
        }
        SourceKind::Uri(uri) => {
            // Local files are decoded at native rate to emulate a camera.
            if std::path::Path::new(uri).exists() {
                args.push("-re".to_string());
            }
            args.push("-i".to_string());
            args.push(uri.clone());
        }
    }
    Ok(args)
}

impl FfmpegSource {
    /// Spawn ffmpeg and read one probe frame. Failure to produce that first
    /// frame is reported as an open failure.
    pub fn open(cfg: &CameraConfig) -> Result<Self> {
        let kind = parse_source(&cfg.source);
        let mut args = zq(&["-hide_banner", "-nostdin", "-loglevel", "error"]);
        args.extend(input_args(&kind, cfg)?);
        args.extend(zq(&["-f", "rawvideo", "-pix_fmt", "rgb24", "-vf"]));
        args.push(format!("scale={}:{}", cfg.width, cfg.height));
        args.extend(zq(&["-an", "pipe:1"]));
        debug!("spawning: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::OpenFailed {
                source_desc: cfg.source.clone(),
                msg: format!("spawning ffmpeg: {e}"),
            })?;

        let stdout = child.stdout.take().expect("ffmpeg stdout was piped");
        let stderr = child.stderr.take().expect("ffmpeg stderr was piped");

        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        let tail = stderr_tail.clone();
        std::thread::Builder::new()
            .name("ffmpeg-stderr".to_string())
            .spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    debug!("ffmpeg: {line}");
                    let mut guard = tail.lock().unwrap();
                    if guard.len() >= STDERR_TAIL_LINES {
                        guard.remove(0);
                    }
                    guard.push(line);
                }
            })
            .expect("spawning ffmpeg stderr reader");

        let mut source = Self {
            child: Arc::new(Mutex::new(child)),
            stdout: BufReader::new(stdout),
            stderr_tail,
            width: cfg.width,
            height: cfg.height,
            probe: None,
        };

        match source.read_raw() {
            Some(frame) => {
                source.probe = Some(frame);
                Ok(source)
            }
            None => {
                source.release();
                // Give the stderr reader a moment to catch ffmpeg's parting words.
                std::thread::sleep(std::time::Duration::from_millis(100));
                let tail = source.stderr_tail.lock().unwrap().join("; ");
                Err(Error::OpenFailed {
                    source_desc: cfg.source.clone(),
                    msg: if tail.is_empty() {
                        "no frames produced".to_string()
                    } else {
                        tail
                    },
                })
            }
        }
    }

    pub fn killer(&self) -> FfmpegKiller {
        FfmpegKiller {
            child: self.child.clone(),
        }
    }

    fn read_raw(&mut self) -> Option<RgbImage> {
        let len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; len];
        self.stdout.read_exact(&mut buf).ok()?;
        RgbImage::from_raw(self.width, self.height, buf)
    }
}

impl VideoSource for FfmpegSource {
    fn read_frame(&mut self) -> Option<RgbImage> {
        if let Some(probe) = self.probe.take() {
            return Some(probe);
        }
        self.read_raw()
    }

    fn release(&mut self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
