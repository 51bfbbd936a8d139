//! FFmpeg-backed V4L2 capture, the default backend.
//!
//! Each device runs one `ffmpeg` child that decodes the camera into raw
//! `bgr24` frames on stdout. FFmpeg cannot drive V4L2 controls, so only the
//! mode-related settings (pixel format, resolution, frame rate) reach the
//! device; the remaining controls are validated and reported as skipped.

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
};

use anyhow::anyhow;
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    CaptureBackend, CaptureDevice,
    camera::parse_device_index,
    settings::CameraSettings,
    types::{CaptureError, Frame, FrameFormat},
};

pub const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);

/// Spawns one FFmpeg process per opened camera.
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
}

impl FfmpegBackend {
    /// Locate the `ffmpeg` binary on `PATH`.
    pub fn locate() -> Result<Self, CaptureError> {
        let ffmpeg = which::which("ffmpeg")
            .map_err(|err| CaptureError::Other(anyhow!("ffmpeg not found on PATH: {err}")))?;
        Ok(Self { ffmpeg })
    }

    pub fn with_binary(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    fn build_command(&self, device: &str, settings: &CameraSettings) -> Command {
        let (width, height) = settings.resolution_or(DEFAULT_RESOLUTION);
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("video4linux2");

        if let Some(format) = settings.pixel_format {
            cmd.arg("-input_format").arg(format.ffmpeg_name());
        }
        cmd.arg("-video_size").arg(format!("{width}x{height}"));
        if let Some(fps) = settings.fps {
            cmd.arg("-framerate").arg(fps.to_string());
        }

        cmd.arg("-i")
            .arg(device)
            .arg("-vf")
            .arg(format!("scale={width}:{height}"))
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");
        cmd
    }
}

impl CaptureBackend for FfmpegBackend {
    fn open(
        &self,
        name: &str,
        path: &str,
        settings: &CameraSettings,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let device = match parse_device_index(path) {
            Some(index) => format!("/dev/video{index}"),
            None => path.to_string(),
        };
        if !Path::new(&device).exists() {
            return Err(CaptureError::Open { uri: device });
        }

        for skipped in unsupported_controls(settings) {
            warn!("camera '{name}': {skipped} is not supported by the ffmpeg backend; skipping");
        }

        let mut cmd = self.build_command(&device, settings);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        debug!("camera '{name}': spawning {:?}", cmd);

        let mut child = cmd.spawn().map_err(|err| CaptureError::Other(err.into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

        let (width, height) = settings.resolution_or(DEFAULT_RESOLUTION);
        Ok(Box::new(FfmpegDevice {
            uri: device,
            child,
            stdout,
            width,
            height,
            buffer: vec![0u8; (width as usize) * (height as usize) * 3],
        }))
    }
}

fn unsupported_controls(settings: &CameraSettings) -> Vec<String> {
    let mut skipped = Vec::new();
    if settings.brightness.is_some() {
        skipped.push("brightness".to_string());
    }
    if settings.white_balance.is_some() {
        skipped.push("white balance".to_string());
    }
    if settings.exposure.is_some() {
        skipped.push("exposure".to_string());
    }
    skipped.extend(
        settings
            .properties
            .iter()
            .map(|property| format!("property {:?}", property.name)),
    );
    skipped
}

struct FfmpegDevice {
    uri: String,
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl CaptureDevice for FfmpegDevice {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        match self.stdout.read_exact(&mut self.buffer) {
            Ok(()) => Ok(Some(Frame {
                data: self.buffer.clone(),
                width: self.width,
                height: self.height,
                timestamp_ms: Utc::now().timestamp_millis(),
                format: FrameFormat::Bgr8,
            })),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(CaptureError::Ended {
                    uri: self.uri.clone(),
                })
            }
            Err(err) => Err(CaptureError::Other(err.into())),
        }
    }
}

impl Drop for FfmpegDevice {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
