//! Short evidence clips, written by piping raw RGB frames into an ffmpeg
//! child process. No encoder linkage: ffmpeg does the work.

use std::io::Write;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};

use image::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame is {got:?} but the clip is {want:?}")]
    FrameSizeMismatch { want: (u32, u32), got: (u32, u32) },
    #[error("ffmpeg exited with {status}")]
    FfmpegFailed { status: std::process::ExitStatus },
    #[error("clip already finished")]
    AlreadyFinished,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Map a FOURCC-style codec name from the config onto an ffmpeg encoder.
/// Unrecognized names are passed straight through as `-c:v` values.
fn codec_args(codec: &str) -> Vec<String> {
    let encoder = match codec {
        "mp4v" => "mpeg4",
        "avc1" | "h264" | "x264" => "libx264",
        other => other,
    };
    let mut args = vec!["-c:v".to_string(), encoder.to_string()];
    if encoder == "libx264" {
        // Broadly compatible pixel format for players.
        args.extend(["-pix_fmt", "yuv420p"].map(String::from));
    }
    args
}

pub struct ClipWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
}

impl ClipWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        fps: u32,
        codec: &str,
    ) -> Result<Self> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-nostdin",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-video_size",
        ]
        .map(String::from)
        .to_vec();
        args.push(format!("{width}x{height}"));
        args.push("-framerate".to_string());
        args.push(fps.max(1).to_string());
        args.push("-i".to_string());
        args.push("-".to_string());
        args.extend(codec_args(codec));
        args.push(path.as_ref().to_string_lossy().into_owned());

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child.stdin.take().expect("ffmpeg stdin was piped");

        Ok(Self {
            child,
            stdin: Some(stdin),
            width,
            height,
        })
    }

    pub fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(Error::AlreadyFinished);
        };
        if frame.dimensions() != (self.width, self.height) {
            return Err(Error::FrameSizeMismatch {
                want: (self.width, self.height),
                got: frame.dimensions(),
            });
        }
        stdin.write_all(frame.as_raw())?;
        Ok(())
    }

    /// Close the pipe and wait for ffmpeg to finalize the file.
    pub fn finish(mut self) -> Result<()> {
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if !status.success() {
            return Err(Error::FfmpegFailed { status });
        }
        Ok(())
    }
}

impl Drop for ClipWriter {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ffmpeg_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn codec_names_map_to_encoders() {
        assert_eq!(codec_args("mp4v")[1], "mpeg4");
        assert_eq!(codec_args("h264")[1], "libx264");
        assert_eq!(codec_args("libvpx")[1], "libvpx");
    }

    #[test]
    fn writes_a_playable_clip() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found; skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut writer = ClipWriter::create(&path, 64, 48, 15, "mp4v").unwrap();
        for i in 0..10u8 {
            let frame = RgbImage::from_pixel(64, 48, image::Rgb([i * 20, 40, 200 - i * 10]));
            writer.write_frame(&frame).unwrap();
        }
        writer.finish().unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.len() > 0, "clip file is empty");
    }

    #[test]
    fn rejects_mismatched_frames() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found; skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut writer = ClipWriter::create(&path, 64, 48, 15, "mp4v").unwrap();
        let frame = RgbImage::new(32, 32);
        assert!(matches!(
            writer.write_frame(&frame),
            Err(Error::FrameSizeMismatch { .. })
        ));
    }
}
